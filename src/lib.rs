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

//! floe: a read-only PostgreSQL-compatible endpoint over Apache Iceberg.
//!
//! Clients speak the PostgreSQL wire protocol; queries are parsed, rewritten
//! by a multi-pass AST remapper, and executed by an embedded DuckDB engine
//! that reads Iceberg tables straight from object or local storage.
//!
//! Pipeline: client bytes → [`server`] → parse → [`remap`] passes →
//! engine SQL → [`engine`] → Arrow batches → wire encoder → client.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod iceberg;
pub mod remap;
pub mod server;

// Re-exported so downstream code can work with `QueryResult` batches without
// naming the engine crate.
pub use duckdb::arrow;

pub use config::{Config, ConfigArgs, LogLevel, StorageType};
pub use engine::EngineAdapter;
pub use error::{FloeError, Result};
pub use iceberg::{FsCatalogReader, IcebergReader, IcebergSchemaTable, S3CatalogReader};
pub use remap::QueryRemapper;
pub use server::ProtocolServer;
