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

//! Adapter around the embedded DuckDB engine.
//!
//! Owns the single process-wide connection. All engine calls run inside
//! `spawn_blocking` behind a mutex; the engine therefore serializes queries
//! internally while callers see plain async operations. The S3 credential
//! secret is re-applied every ten minutes by a background task that exits
//! before the connection closes.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use duckdb::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{AwsCredentialsType, Config, LogLevel, StorageType};
use crate::error::{FloeError, Result};

/// How often the S3 secret is re-applied.
pub const SECRET_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Boot sequence used when no init file is configured.
const DEFAULT_BOOT_STATEMENTS: &[&str] = &[
    "INSTALL iceberg",
    "LOAD iceberg",
    // Warms DuckDB's pg_catalog emulation before the shim registers views.
    "SELECT oid FROM pg_catalog.pg_namespace",
    "CREATE SCHEMA IF NOT EXISTS public",
];

/// A fully materialized engine result.
///
/// Results cross a `spawn_blocking` boundary, so rows are fetched eagerly as
/// Arrow record batches together with their schema (present even for empty
/// results).
#[derive(Debug)]
pub struct QueryResult {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// A statement validated by the engine, reusable by the Extended-Query flow.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub sql: String,
}

/// The `CREATE OR REPLACE SECRET` DDL shapes. The engine refuses bind
/// parameters for secret DDL, so values are spliced as sanitized literals
/// through [`sanitize_literal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S3SecretSpec {
    Static {
        key_id: String,
        secret: String,
        region: String,
        endpoint: String,
        scope: String,
    },
    CredentialChain {
        region: String,
        endpoint: String,
        scope: String,
    },
}

impl S3SecretSpec {
    pub fn from_config(config: &Config) -> Self {
        let aws = &config.aws;
        match aws.credentials_type {
            Some(AwsCredentialsType::Static) => S3SecretSpec::Static {
                key_id: aws.access_key_id.clone(),
                secret: aws.secret_access_key.clone(),
                region: aws.region.clone(),
                endpoint: aws.s3_endpoint.clone(),
                scope: config.s3_scope(),
            },
            _ => S3SecretSpec::CredentialChain {
                region: aws.region.clone(),
                endpoint: aws.s3_endpoint.clone(),
                scope: config.s3_scope(),
            },
        }
    }

    pub fn to_sql(&self) -> String {
        let mut clauses = vec!["TYPE S3".to_string()];
        match self {
            S3SecretSpec::Static {
                key_id,
                secret,
                region,
                endpoint,
                scope,
            } => {
                clauses.push(format!("KEY_ID '{}'", sanitize_literal(key_id)));
                clauses.push(format!("SECRET '{}'", sanitize_literal(secret)));
                push_common_clauses(&mut clauses, region, endpoint, scope);
            }
            S3SecretSpec::CredentialChain {
                region,
                endpoint,
                scope,
            } => {
                clauses.push("PROVIDER CREDENTIAL_CHAIN".to_string());
                push_common_clauses(&mut clauses, region, endpoint, scope);
            }
        }
        format!("CREATE OR REPLACE SECRET floe_s3 ({})", clauses.join(", "))
    }
}

fn push_common_clauses(clauses: &mut Vec<String>, region: &str, endpoint: &str, scope: &str) {
    clauses.push(format!("REGION '{}'", sanitize_literal(region)));
    if !endpoint.is_empty() {
        clauses.push(format!("ENDPOINT '{}'", sanitize_literal(endpoint)));
    }
    clauses.push(format!("SCOPE '{}'", sanitize_literal(scope)));
}

/// Strip `'`, `"` and `;` out of a value before splicing it into DDL.
///
/// The single chokepoint for every value that enters engine SQL as a literal.
pub fn sanitize_literal(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | ';'))
        .collect()
}

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// Async adapter owning the engine connection and the secret-refresh task.
pub struct EngineAdapter {
    conn: SharedConnection,
    refresh_stop: watch::Sender<bool>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineAdapter {
    /// Open the engine and run the boot sequence. Any failure here is fatal.
    pub async fn boot(config: &Config) -> Result<EngineAdapter> {
        let statements = boot_statements(config)?;
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            for statement in &statements {
                run_blocking(&conn, statement).map_err(|e| match e {
                    FloeError::Engine(source) => FloeError::EngineBoot {
                        statement: statement.clone(),
                        source,
                    },
                    other => other,
                })?;
            }
            Ok(conn)
        })
        .await
        .map_err(task_panic)??;

        let (refresh_stop, refresh_rx) = watch::channel(false);
        let adapter = EngineAdapter {
            conn: Arc::new(Mutex::new(Some(conn))),
            refresh_stop,
            refresh_task: Mutex::new(None),
        };

        if config.storage_type == StorageType::S3 {
            let spec = S3SecretSpec::from_config(config);
            // First application happens inline so queries never race an
            // unauthenticated engine; the task only repeats it.
            adapter.exec(&spec.to_sql()).await?;
            if config.log_level == LogLevel::Trace {
                adapter.exec("SET enable_http_logging = true").await?;
            }
            let handle = spawn_refresh_loop(Arc::clone(&adapter.conn), spec, refresh_rx);
            *lock(&adapter.refresh_task) = Some(handle);
        }

        Ok(adapter)
    }

    /// Execute a statement, returning the engine's rows-affected count.
    pub async fn exec(&self, sql: &str) -> Result<usize> {
        debug!(sql, "engine exec");
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            let conn = guard.as_ref().ok_or(FloeError::EngineClosed)?;
            Ok(conn.execute(&sql, [])?)
        })
        .await
        .map_err(task_panic)?
    }

    /// Run a list of statements inside one transaction; roll back on failure.
    pub async fn exec_transaction(&self, statements: Vec<String>) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            let conn = guard.as_ref().ok_or(FloeError::EngineClosed)?;
            conn.execute("BEGIN", [])?;
            for statement in &statements {
                if let Err(e) = conn.execute(statement, []) {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(FloeError::Engine(e));
                }
            }
            conn.execute("COMMIT", [])?;
            Ok(())
        })
        .await
        .map_err(task_panic)?
    }

    /// Execute a query and materialize its result.
    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        debug!(sql, "engine query");
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            let conn = guard.as_ref().ok_or(FloeError::EngineClosed)?;
            query_blocking(conn, &sql)
        })
        .await
        .map_err(task_panic)?
    }

    /// Validate a statement against the engine and hand back a reusable handle.
    pub async fn prepare(&self, sql: &str) -> Result<Prepared> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            let conn = guard.as_ref().ok_or(FloeError::EngineClosed)?;
            conn.prepare(&sql)?;
            Ok(Prepared { sql })
        })
        .await
        .map_err(task_panic)?
    }

    /// Stop the refresh task, then close the engine handle.
    pub async fn close(&self) -> Result<()> {
        let _ = self.refresh_stop.send(true);
        let task = lock(&self.refresh_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            if let Some(conn) = lock(&conn).take() {
                if let Err((_, e)) = conn.close() {
                    warn!(error = %e, "engine close reported an error");
                }
            }
        })
        .await
        .map_err(task_panic)?;
        Ok(())
    }
}

fn spawn_refresh_loop(
    conn: SharedConnection,
    spec: S3SecretSpec,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SECRET_REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and the secret was already
        // applied inline at boot; consume it so the loop waits a full period.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let conn = Arc::clone(&conn);
                    let sql = spec.to_sql();
                    let result = tokio::task::spawn_blocking(move || {
                        let guard = lock(&conn);
                        let conn = guard.as_ref().ok_or(FloeError::EngineClosed)?;
                        conn.execute(&sql, [])?;
                        Ok::<_, FloeError>(())
                    })
                    .await;
                    match result {
                        Ok(Ok(())) => debug!("refreshed engine S3 secret"),
                        Ok(Err(e)) => warn!(error = %e, "S3 secret refresh failed"),
                        Err(e) => warn!(error = %e, "S3 secret refresh task panicked"),
                    }
                }
                _ = stop.changed() => break,
            }
        }
    })
}

fn boot_statements(config: &Config) -> Result<Vec<String>> {
    if let Some(path) = &config.init_sql_filepath {
        if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                FloeError::Config(format!("reading init file {}: {e}", path.display()))
            })?;
            let lines: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if !lines.is_empty() {
                return Ok(lines);
            }
        } else {
            debug!(path = %path.display(), "no engine init file, using default boot sequence");
        }
    }
    Ok(DEFAULT_BOOT_STATEMENTS
        .iter()
        .map(|s| s.to_string())
        .collect())
}

/// Run one statement on the blocking side, tolerating returned rows
/// (the boot sequence contains a SELECT).
fn run_blocking(conn: &Connection, sql: &str) -> Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let _batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
    Ok(())
}

fn query_blocking(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
    let schema = match batches.first() {
        Some(batch) => batch.schema(),
        // Empty results keep their column names; types degrade to text,
        // which is how the wire layer renders values anyway.
        None => {
            let mut fields = Vec::with_capacity(stmt.column_count());
            for i in 0..stmt.column_count() {
                let name = stmt
                    .column_name(i)
                    .map(|n| n.to_string())
                    .unwrap_or_default();
                fields.push(Field::new(name, DataType::Utf8, true));
            }
            Arc::new(Schema::new(fields))
        }
    };
    Ok(QueryResult { schema, batches })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn task_panic(err: tokio::task::JoinError) -> FloeError {
    FloeError::Invariant(format!("engine task failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AwsConfig, PgConfig};
    use std::io::Write;

    fn local_config(init_file: &std::path::Path) -> Config {
        Config {
            listen_address: "127.0.0.1".into(),
            listen_port: 0,
            database: "floe".into(),
            user: "floe".into(),
            encrypted_password: String::new(),
            log_level: LogLevel::Info,
            storage_type: StorageType::Local,
            storage_path: "iceberg".into(),
            init_sql_filepath: Some(init_file.to_path_buf()),
            aws: AwsConfig::default(),
            pg: PgConfig::default(),
            disable_anonymous_analytics: false,
        }
    }

    fn offline_init_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "SELECT oid FROM pg_catalog.pg_namespace").unwrap();
        writeln!(f, "CREATE SCHEMA IF NOT EXISTS public").unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn sanitize_strips_quotes_and_semicolons() {
        assert_eq!(sanitize_literal("plain-value"), "plain-value");
        assert_eq!(sanitize_literal("a'b\"c;d"), "abcd");
        assert_eq!(sanitize_literal("'); DROP TABLE x --"), ") DROP TABLE x --");
    }

    #[test]
    fn substituted_ddl_contains_no_injected_characters() {
        let spec = S3SecretSpec::Static {
            key_id: "AKIA';\"KEY".into(),
            secret: "se'cr;et\"".into(),
            region: "us-east-1".into(),
            endpoint: "s3.amazonaws.com".into(),
            scope: "s3://bucket'".into(),
        };
        let sql = spec.to_sql();
        // Every quote left in the DDL is one the template itself wrote:
        // five quoted values, two quotes each.
        assert_eq!(sql.matches('\'').count(), 10);
        assert!(!sql.contains('"'));
        assert!(!sql.contains(';'));
    }

    #[test]
    fn credential_chain_ddl_shape() {
        let spec = S3SecretSpec::CredentialChain {
            region: "eu-west-1".into(),
            endpoint: String::new(),
            scope: "s3://lake".into(),
        };
        let sql = spec.to_sql();
        assert!(
            sql.starts_with("CREATE OR REPLACE SECRET floe_s3 (TYPE S3, PROVIDER CREDENTIAL_CHAIN")
        );
        assert!(sql.contains("REGION 'eu-west-1'"));
        assert!(sql.contains("SCOPE 's3://lake'"));
        assert!(!sql.contains("ENDPOINT"));
    }

    #[tokio::test]
    async fn boot_exec_query_round_trip() {
        let init = offline_init_file();
        let adapter = EngineAdapter::boot(&local_config(init.path()))
            .await
            .unwrap();

        adapter
            .exec("CREATE TABLE t(a INTEGER, b VARCHAR)")
            .await
            .unwrap();
        adapter
            .exec("INSERT INTO t VALUES (1, 'x'), (2, 'y')")
            .await
            .unwrap();

        let result = adapter
            .query("SELECT a, b FROM t ORDER BY a")
            .await
            .unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.schema.fields().len(), 2);

        adapter.prepare("SELECT b FROM t").await.unwrap();

        adapter
            .exec_transaction(vec![
                "DELETE FROM t".to_string(),
                "INSERT INTO t VALUES (3, 'z')".to_string(),
            ])
            .await
            .unwrap();
        let result = adapter.query("SELECT a FROM t").await.unwrap();
        assert_eq!(result.row_count(), 1);

        adapter.close().await.unwrap();
        assert!(adapter.query("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_failure() {
        let init = offline_init_file();
        let adapter = EngineAdapter::boot(&local_config(init.path()))
            .await
            .unwrap();
        adapter.exec("CREATE TABLE t(a INTEGER)").await.unwrap();
        adapter.exec("INSERT INTO t VALUES (1)").await.unwrap();

        let err = adapter
            .exec_transaction(vec![
                "DELETE FROM t".to_string(),
                "INSERT INTO nonexistent VALUES (1)".to_string(),
            ])
            .await;
        assert!(err.is_err());

        // The delete must have been rolled back.
        let result = adapter.query("SELECT a FROM t").await.unwrap();
        assert_eq!(result.row_count(), 1);
        adapter.close().await.unwrap();
    }
}
