//   Copyright (c) 2025-2026 The Floe Authors
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Error types for the floe endpoint.
//!
//! Every error carries a PostgreSQL SQLSTATE so that the wire layer can
//! answer clients with a proper `ErrorResponse`. Per-query errors never tear
//! down a connection; configuration and boot errors are fatal and abort the
//! process from `main`.

use pgwire::error::{ErrorInfo, PgWireError};

/// Primary error type for the endpoint.
#[derive(Debug, thiserror::Error)]
pub enum FloeError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A statement of the engine boot sequence failed. Fatal at startup.
    #[error("engine boot failed while running `{statement}`: {source}")]
    EngineBoot {
        statement: String,
        source: duckdb::Error,
    },

    /// The engine rejected a statement at runtime.
    #[error("engine error: {0}")]
    Engine(#[from] duckdb::Error),

    /// An operation was attempted after `EngineAdapter::close`.
    #[error("engine is closed")]
    EngineClosed,

    /// The incoming SQL did not parse.
    #[error("syntax error: {0}")]
    Parse(String),

    /// A write statement reached the read-only endpoint.
    #[error("cannot execute {0}: floe is a read-only endpoint")]
    ReadOnly(String),

    /// A statement kind the endpoint does not serve.
    #[error("unsupported statement: {0}")]
    Unsupported(String),

    /// The lakehouse reader failed (I/O, listing, metadata decode).
    #[error("storage error: {0}")]
    Storage(String),

    /// A contract inside the remapper was violated.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl FloeError {
    /// SQLSTATE reported to clients for this error.
    ///
    /// Engine errors are inspected so that DuckDB's native "does not exist"
    /// catalog misses surface as the PostgreSQL undefined-table /
    /// undefined-function codes clients branch on.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            FloeError::Config(_) => "F0000",
            FloeError::Parse(_) => "42601",
            FloeError::ReadOnly(_) => "42501",
            FloeError::Unsupported(_) => "0A000",
            FloeError::Storage(_) => "58000",
            FloeError::Engine(e) => {
                let msg = e.to_string();
                if msg.contains("does not exist") {
                    if msg.contains("Table") || msg.contains("table") {
                        "42P01"
                    } else if msg.contains("Function") || msg.contains("function") {
                        "42883"
                    } else {
                        "XX000"
                    }
                } else {
                    "XX000"
                }
            }
            FloeError::EngineBoot { .. }
            | FloeError::EngineClosed
            | FloeError::Invariant(_) => "XX000",
        }
    }

    /// Convert into the pgwire error shape (an `ErrorResponse` on the wire).
    pub fn into_pgwire(self) -> PgWireError {
        let info = ErrorInfo::new(
            "ERROR".to_string(),
            self.sqlstate().to_string(),
            self.to_string(),
        );
        PgWireError::UserError(Box::new(info))
    }
}

impl From<FloeError> for PgWireError {
    fn from(err: FloeError) -> Self {
        err.into_pgwire()
    }
}

/// Crate-wide result alias.
pub type Result<T, E = FloeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_mapping() {
        assert_eq!(FloeError::Parse("x".into()).sqlstate(), "42601");
        assert_eq!(FloeError::ReadOnly("INSERT".into()).sqlstate(), "42501");
        assert_eq!(FloeError::Unsupported("COPY".into()).sqlstate(), "0A000");
        assert_eq!(FloeError::Storage("s3".into()).sqlstate(), "58000");
        assert_eq!(FloeError::Invariant("x".into()).sqlstate(), "XX000");
    }

    #[test]
    fn generic_engine_errors_fall_back_to_internal() {
        let err = FloeError::Engine(duckdb::Error::InvalidColumnIndex(0));
        assert_eq!(err.sqlstate(), "XX000");
    }
}
