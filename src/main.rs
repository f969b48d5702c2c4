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

//! floe server binary.
//!
//! Usage:
//!     floe [start]    launch the PostgreSQL-compatible endpoint (default)
//!     floe sync       run an ingestion cycle against the source database
//!     floe version    print the version and exit

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use floe::catalog::CatalogShim;
use floe::config::{parse_duration, Config, ConfigArgs, StorageType};
use floe::iceberg::IcebergReader;
use floe::{EngineAdapter, FsCatalogReader, ProtocolServer, QueryRemapper, S3CatalogReader};

#[derive(Parser)]
#[command(
    name = "floe",
    version,
    about = "PostgreSQL-compatible read endpoint for Apache Iceberg lakehouses"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Launch the endpoint (the default when no subcommand is given)
    Start,
    /// Run one ingestion cycle from the source PostgreSQL database
    Sync {
        /// Repeat the cycle on this interval, e.g. 10m or 1h30m
        #[arg(long)]
        interval: Option<String>,
    },
    /// Print the version and exit
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Start) {
        Command::Version => {
            println!("floe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Start => {
            let config = Config::from_args(cli.config)?;
            init_tracing(&config);
            start(config).await
        }
        Command::Sync { interval } => {
            let config = Config::from_args(cli.config)?;
            init_tracing(&config);
            sync(&config, interval.as_deref())
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_new(config.log_level.as_filter())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

async fn start(config: Config) -> anyhow::Result<()> {
    let reader: Arc<dyn IcebergReader> = match config.storage_type {
        StorageType::Local => Arc::new(FsCatalogReader::new(&config.storage_path)),
        StorageType::S3 => Arc::new(
            S3CatalogReader::connect(&config)
                .await
                .context("connecting the S3 catalog reader")?,
        ),
    };

    let engine = Arc::new(
        EngineAdapter::boot(&config)
            .await
            .context("booting the engine")?,
    );
    info!("engine booted");

    let shim = CatalogShim::bootstrap(Arc::clone(&engine), reader, &config)
        .await
        .context("registering the pg_catalog shim")?;
    shim.refresh()
        .await
        .context("loading the lakehouse inventory")?;

    let remapper = Arc::new(QueryRemapper::new(shim));
    ProtocolServer::new(config, engine, remapper)
        .run()
        .await
        .context("serving")?;
    Ok(())
}

/// The `sync` surface. The ingestion cycle itself is the external syncer
/// collaborator; this binary validates the configuration it would need and
/// reports that the read path does not bundle it.
fn sync(config: &Config, interval: Option<&str>) -> anyhow::Result<()> {
    if let Some(interval) = interval {
        let duration = parse_duration(interval)?;
        info!(?duration, "sync interval parsed");
    }
    if config.pg.database_url.is_empty() {
        anyhow::bail!("sync requires pg.database_url (--pg-database-url or FLOE_PG_DATABASE_URL)");
    }
    warn!("sync invoked on a read-path build");
    anyhow::bail!(
        "the PostgreSQL-to-Iceberg ingestion component is not part of this binary; \
         run the syncer service against the same lakehouse root, then query it with `floe start`"
    )
}
