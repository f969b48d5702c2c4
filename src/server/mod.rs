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

//! PostgreSQL wire-protocol server.
//!
//! Accepts TCP connections and hands each socket to pgwire, which drives the
//! v3 message state machine (startup, SSL/GSS decline, auth, simple and
//! extended query cycles). Connections run concurrently as independent tasks;
//! the only shared state is the engine adapter and remapper the factory
//! injects into every per-connection handler.

pub mod auth;
pub mod encode;
pub mod handler;

use std::sync::Arc;

use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::StartupHandler;
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::PgWireServerHandlers;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::EngineAdapter;
use crate::error::{FloeError, Result};
use crate::remap::QueryRemapper;

use auth::{FloeAuthSource, FloeParameterProvider};
use handler::FloeQueryHandler;

/// Builds the per-connection pgwire handlers.
pub struct FloeHandlerFactory {
    engine: Arc<EngineAdapter>,
    remapper: Arc<QueryRemapper>,
    encrypted_password: String,
}

impl FloeHandlerFactory {
    fn make_handler(&self) -> FloeQueryHandler {
        FloeQueryHandler::new(Arc::clone(&self.engine), Arc::clone(&self.remapper))
    }
}

impl PgWireServerHandlers for FloeHandlerFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        Arc::new(self.make_handler())
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        Arc::new(self.make_handler())
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        Arc::new(CleartextPasswordAuthStartupHandler::new(
            FloeAuthSource::new(self.encrypted_password.clone()),
            FloeParameterProvider,
        ))
    }
}

/// TCP accept loop bound to the configured address.
pub struct ProtocolServer {
    config: Config,
    engine: Arc<EngineAdapter>,
    remapper: Arc<QueryRemapper>,
}

impl ProtocolServer {
    pub fn new(config: Config, engine: Arc<EngineAdapter>, remapper: Arc<QueryRemapper>) -> Self {
        ProtocolServer {
            config,
            engine,
            remapper,
        }
    }

    /// Serve until Ctrl-C, then stop the refresh loop and close the engine.
    pub async fn run(self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.config.listen_address, self.config.listen_port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| FloeError::Config(format!("binding {addr}: {e}")))?;
        info!(%addr, "floe listening");

        let factory = Arc::new(FloeHandlerFactory {
            engine: Arc::clone(&self.engine),
            remapper: Arc::clone(&self.remapper),
            encrypted_password: self.config.encrypted_password.clone(),
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "accepted connection");
                            let factory = Arc::clone(&factory);
                            tokio::spawn(async move {
                                // A client dropping mid-query surfaces here;
                                // its portal and cached results die with the
                                // handler, and the engine result is discarded.
                                if let Err(e) =
                                    pgwire::tokio::process_socket(socket, None, factory).await
                                {
                                    debug!(%peer, error = %e, "connection closed with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.engine.close().await
    }
}
