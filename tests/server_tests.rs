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

//! Wire-protocol integration tests.
//!
//! Starts the floe binary as a child process and connects with
//! tokio-postgres over both sub-protocols. The engine boots from an init
//! file that skips the Iceberg extension so the tests run offline; the
//! lakehouse is a temp directory the tests write metadata into.

use std::io::Write;
use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;

use tokio_postgres::{NoTls, SimpleQueryMessage};

const PASSWORD: &str = "floe-test-password";

const USERS_METADATA: &str = r#"{
    "format-version": 2,
    "current-schema-id": 0,
    "schemas": [
        {"schema-id": 0, "type": "struct", "fields": [
            {"id": 1, "name": "id", "required": true, "type": "long"},
            {"id": 2, "name": "name", "required": false, "type": "string"}
        ]}
    ]
}"#;

/// RAII guard that kills the server child process on drop.
struct ServerGuard {
    child: Child,
    _init: tempfile::NamedTempFile,
    lakehouse: tempfile::TempDir,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.child.kill().ok();
        self.child.wait().ok();
    }
}

fn write_table(root: &Path, schema: &str, table: &str, metadata: &str) {
    let dir = root.join(schema).join(table).join("metadata");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("v1.metadata.json"), metadata).unwrap();
}

fn start_server(port: u16) -> ServerGuard {
    let lakehouse = tempfile::tempdir().unwrap();

    let mut init = tempfile::NamedTempFile::new().unwrap();
    writeln!(init, "SELECT oid FROM pg_catalog.pg_namespace").unwrap();
    writeln!(init, "CREATE SCHEMA IF NOT EXISTS public").unwrap();
    init.flush().unwrap();

    let binary = env!("CARGO_BIN_EXE_floe");
    let child = Command::new(binary)
        .arg("start")
        .env("FLOE_HOST", "127.0.0.1")
        .env("FLOE_PORT", port.to_string())
        .env("FLOE_DATABASE", "lake")
        .env("FLOE_USER", "reader")
        .env("FLOE_ENCRYPTED_PASSWORD", PASSWORD)
        .env("FLOE_LOG_LEVEL", "error")
        .env("FLOE_STORAGE_TYPE", "LOCAL")
        .env("FLOE_STORAGE_PATH", lakehouse.path())
        .env("FLOE_INIT_SQL_FILEPATH", init.path())
        .spawn()
        .expect("failed to start floe");

    ServerGuard {
        child,
        _init: init,
        lakehouse,
    }
}

async fn connect(port: u16) -> tokio_postgres::Client {
    let connstr = format!(
        "host=127.0.0.1 port={port} user=reader dbname=lake password={PASSWORD}"
    );
    for attempt in 0..50 {
        match tokio_postgres::connect(&connstr, NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        eprintln!("connection error: {e}");
                    }
                });
                return client;
            }
            Err(_) if attempt < 49 => tokio::time::sleep(Duration::from_millis(200)).await,
            Err(e) => panic!("failed to connect: {e}"),
        }
    }
    unreachable!()
}

fn extract_rows(messages: &[SimpleQueryMessage]) -> Vec<&tokio_postgres::SimpleQueryRow> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn handshake_and_select_one() {
    let _server = start_server(15461);
    let client = connect(15461).await;

    let messages = client.simple_query("SELECT 1").await.unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 1);
    let value: &str = rows[0].get(0).unwrap();
    assert_eq!(value, "1");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let _server = start_server(15462);
    // Wait until the server accepts the good credentials first.
    let _client = connect(15462).await;

    let connstr =
        "host=127.0.0.1 port=15462 user=reader dbname=lake password=wrong".to_string();
    let err = tokio_postgres::connect(&connstr, NoTls).await.unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("28P01") || message.to_lowercase().contains("password"),
        "unexpected auth error: {message}"
    );
}

#[tokio::test]
async fn session_utilities_are_acknowledged() {
    let _server = start_server(15463);
    let client = connect(15463).await;

    client.simple_query("BEGIN").await.unwrap();
    client.simple_query("COMMIT").await.unwrap();
    client.simple_query("ROLLBACK").await.unwrap();
    client.simple_query("DISCARD ALL").await.unwrap();
    client
        .simple_query("SET application_name = 'psql'")
        .await
        .unwrap();
}

#[tokio::test]
async fn show_reports_session_settings() {
    let _server = start_server(15464);
    let client = connect(15464).await;

    let messages = client.simple_query("SHOW server_version").await.unwrap();
    let rows = extract_rows(&messages);
    let version: &str = rows[0].get(0).unwrap();
    assert_eq!(version, "16.6");
}

#[tokio::test]
async fn writes_are_refused() {
    let _server = start_server(15465);
    let client = connect(15465).await;

    let err = client
        .simple_query("INSERT INTO users VALUES (1)")
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("42501") || message.to_lowercase().contains("read-only"),
        "unexpected refusal: {message}"
    );

    // The connection survives the refusal.
    let messages = client.simple_query("SELECT 1").await.unwrap();
    assert_eq!(extract_rows(&messages).len(), 1);
}

#[tokio::test]
async fn empty_lakehouse_shows_no_user_tables() {
    let _server = start_server(15466);
    let client = connect(15466).await;

    let messages = client
        .simple_query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema NOT IN ('pg_catalog', 'information_schema', 'main')",
        )
        .await
        .unwrap();
    assert_eq!(extract_rows(&messages).len(), 0);
}

#[tokio::test]
async fn pg_namespace_hides_internal_oids() {
    let _server = start_server(15467);
    let client = connect(15467).await;

    let messages = client
        .simple_query("SELECT oid FROM pg_catalog.pg_namespace")
        .await
        .unwrap();
    for row in extract_rows(&messages) {
        let oid: i64 = row.get(0).unwrap().parse().unwrap();
        assert!(oid > 1265, "internal namespace leaked: oid {oid}");
    }
}

#[tokio::test]
async fn array_upper_runs_end_to_end() {
    let _server = start_server(15468);
    let client = connect(15468).await;

    let messages = client
        .simple_query("SELECT array_upper(ARRAY[10, 20, 30], 1)")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    let value: &str = rows[0].get(0).unwrap();
    assert_eq!(value, "3");
}

#[tokio::test]
async fn table_added_after_startup_is_visible() {
    let server = start_server(15469);
    let client = connect(15469).await;

    write_table(server.lakehouse.path(), "public", "users", USERS_METADATA);

    // information_schema.tables triggers a lakehouse refresh.
    let messages = client
        .simple_query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'",
        )
        .await
        .unwrap();
    let names: Vec<&str> = extract_rows(&messages)
        .iter()
        .map(|r| r.get(0).unwrap())
        .collect();
    assert!(names.contains(&"users"), "missing placeholder: {names:?}");

    // And the synthetic pg_class rows give regclass lookups an oid.
    let messages = client
        .simple_query("SELECT 'public.users'::regclass")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get(0).is_some());
}

// ---------------------------------------------------------------------------
// Extended Query protocol (Parse/Bind/Describe/Execute)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extended_select_constant() {
    let _server = start_server(15470);
    let client = connect(15470).await;

    let rows = client.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    let value: &str = rows[0].get(0);
    assert_eq!(value, "1");
}

#[tokio::test]
async fn extended_parse_error_is_42601() {
    let _server = start_server(15471);
    let client = connect(15471).await;

    let err = client.query("SELEC 1", &[]).await.unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("42601") || message.to_lowercase().contains("syntax"),
        "unexpected parse error: {message}"
    );
}

#[tokio::test]
async fn extended_set_during_handshake() {
    let _server = start_server(15472);
    let client = connect(15472).await;

    client
        .execute("SET extra_float_digits = 3", &[])
        .await
        .unwrap();
}
