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

//! Remapper and catalog-shim tests against a real in-memory engine.
//!
//! The engine boots from an init file that skips the Iceberg extension (no
//! network in tests), the lakehouse lives in a temp directory, and every
//! rewrite is checked both textually and, where the engine can run it,
//! by execution.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use floe::arrow::array::{Array, Int64Array};
use floe::catalog::CatalogShim;
use floe::config::{AwsConfig, Config, LogLevel, PgConfig, StorageType};
use floe::engine::QueryResult;
use floe::{EngineAdapter, FsCatalogReader, QueryRemapper};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

const USERS_METADATA: &str = r#"{
    "format-version": 2,
    "current-schema-id": 0,
    "schemas": [
        {"schema-id": 0, "type": "struct", "fields": [
            {"id": 1, "name": "id", "required": true, "type": "long"},
            {"id": 2, "name": "name", "required": false, "type": "string"},
            {"id": 3, "name": "created_at", "required": false, "type": "timestamptz"}
        ]}
    ]
}"#;

const ORDERS_METADATA: &str = r#"{
    "format-version": 2,
    "current-schema-id": 0,
    "schemas": [
        {"schema-id": 0, "type": "struct", "fields": [
            {"id": 1, "name": "id", "required": true, "type": "long"},
            {"id": 2, "name": "total", "required": false, "type": "decimal(10, 2)"}
        ]}
    ]
}"#;

fn write_table(root: &Path, schema: &str, table: &str, metadata: &str) {
    let dir = root.join(schema).join(table).join("metadata");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("v1.metadata.json"), metadata).unwrap();
}

struct Fixture {
    engine: Arc<EngineAdapter>,
    shim: Arc<CatalogShim>,
    remapper: QueryRemapper,
    // Held so the files outlive the engine.
    _init: tempfile::NamedTempFile,
    lakehouse: tempfile::TempDir,
}

async fn fixture_with(tables: &[(&str, &str, &str)]) -> Fixture {
    let lakehouse = tempfile::tempdir().unwrap();
    for (schema, table, metadata) in tables {
        write_table(lakehouse.path(), schema, table, metadata);
    }

    let mut init = tempfile::NamedTempFile::new().unwrap();
    writeln!(init, "SELECT oid FROM pg_catalog.pg_namespace").unwrap();
    writeln!(init, "CREATE SCHEMA IF NOT EXISTS public").unwrap();
    init.flush().unwrap();

    let config = Config {
        listen_address: "127.0.0.1".into(),
        listen_port: 0,
        database: "lake".into(),
        user: "reader".into(),
        encrypted_password: "pw".into(),
        log_level: LogLevel::Error,
        storage_type: StorageType::Local,
        storage_path: lakehouse.path().display().to_string(),
        init_sql_filepath: Some(init.path().to_path_buf()),
        aws: AwsConfig::default(),
        pg: PgConfig::default(),
        disable_anonymous_analytics: false,
    };

    let engine = Arc::new(EngineAdapter::boot(&config).await.unwrap());
    let reader = Arc::new(FsCatalogReader::new(lakehouse.path()));
    let shim = CatalogShim::bootstrap(Arc::clone(&engine), reader, &config)
        .await
        .unwrap();
    shim.refresh().await.unwrap();

    Fixture {
        remapper: QueryRemapper::new(Arc::clone(&shim)),
        engine,
        shim,
        _init: init,
        lakehouse,
    }
}

async fn fixture() -> Fixture {
    fixture_with(&[
        ("public", "users", USERS_METADATA),
        ("sales", "orders", ORDERS_METADATA),
    ])
    .await
}

async fn remap(fixture: &Fixture, sql: &str) -> String {
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap();
    let mut statement = statements.remove(0);
    fixture.remapper.remap(&mut statement).await.unwrap();
    statement.to_string()
}

fn first_i64(result: &QueryResult) -> i64 {
    let batch = &result.batches[0];
    let column = batch.column(0);
    column
        .as_any()
        .downcast_ref::<Int64Array>()
        .map(|a| a.value(0))
        .unwrap_or_else(|| panic!("expected int64 column, got {:?}", column.data_type()))
}

// ---------------------------------------------------------------------------
// Table pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn public_table_becomes_iceberg_scan() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT * FROM public.users").await;
    assert!(sql.contains("iceberg_scan('"), "{sql}");
    assert!(sql.contains("skip_schema_inference = true"), "{sql}");
    assert!(sql.contains("v1.metadata.json"), "{sql}");
    assert!(sql.contains("AS users"), "{sql}");
    assert!(!sql.contains("public.users"), "{sql}");
}

#[tokio::test]
async fn unqualified_table_resolves_through_public() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT id FROM users").await;
    assert!(sql.contains("iceberg_scan('"), "{sql}");
    assert!(sql.contains("AS users"), "{sql}");
}

#[tokio::test]
async fn non_public_schema_gets_underscore_alias() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT * FROM sales.orders").await;
    assert!(sql.contains("AS sales_orders"), "{sql}");
}

#[tokio::test]
async fn explicit_alias_is_preserved() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT u.id FROM public.users u").await;
    assert!(sql.contains("AS u"), "{sql}");
    assert!(sql.contains("u.id"), "{sql}");
}

#[tokio::test]
async fn unknown_table_is_left_for_the_engine() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT * FROM public.missing").await;
    assert!(sql.contains("public.missing"), "{sql}");
    assert!(!sql.contains("iceberg_scan"), "{sql}");

    let err = f.engine.query(&sql).await.unwrap_err();
    assert_eq!(err.sqlstate(), "42P01");
}

#[tokio::test]
async fn shim_tables_are_qualified_to_main_and_run() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT usename, passwd FROM pg_catalog.pg_shadow").await;
    assert!(sql.contains("main.pg_shadow"), "{sql}");

    let result = f.engine.query(&sql).await.unwrap();
    assert_eq!(result.row_count(), 1);
}

#[tokio::test]
async fn unqualified_system_view_is_qualified_to_main() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT * FROM pg_stat_user_tables").await;
    assert!(sql.contains("main.pg_stat_user_tables"), "{sql}");
    // The trigger also populated one synthetic stats row per table.
    let count = f
        .engine
        .query("SELECT count(*) FROM main.pg_stat_user_tables")
        .await
        .unwrap();
    assert_eq!(first_i64(&count), 2);
}

#[tokio::test]
async fn pg_namespace_gets_oid_filter() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT nspname FROM pg_catalog.pg_namespace").await;
    assert!(sql.contains("pg_namespace.oid > 1265"), "{sql}");

    let filtered = f
        .engine
        .query("SELECT count(*) FROM pg_catalog.pg_namespace WHERE oid > 1265")
        .await
        .unwrap();
    let raw = f
        .engine
        .query("SELECT count(*) FROM pg_catalog.pg_namespace")
        .await
        .unwrap();
    assert!(
        first_i64(&raw) >= first_i64(&filtered),
        "filter must never surface more namespaces than the engine holds"
    );
}

#[tokio::test]
async fn pg_namespace_alias_is_respected() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT n.nspname FROM pg_catalog.pg_namespace n WHERE n.nspname = 'public'")
        .await;
    assert!(sql.contains("n.oid > 1265"), "{sql}");
    assert!(sql.contains("AND"), "{sql}");
}

#[tokio::test]
async fn placeholders_match_reader_columns() {
    let f = fixture().await;
    let result = f
        .engine
        .query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = 'users' ORDER BY ordinal_position",
        )
        .await
        .unwrap();
    let names: Vec<String> = result.batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<floe::arrow::array::StringArray>()
        .unwrap()
        .iter()
        .map(|v| v.unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["id", "name", "created_at"]);
}

#[tokio::test]
async fn table_added_after_boot_is_found_on_first_query() {
    let f = fixture_with(&[("public", "users", USERS_METADATA)]).await;
    // New table lands in the lakehouse after startup.
    write_table(f.lakehouse.path(), "public", "orders", ORDERS_METADATA);

    let sql = remap(&f, "SELECT * FROM public.orders").await;
    assert!(sql.contains("iceberg_scan('"), "{sql}");
    assert!(f.shim.contains(&floe::IcebergSchemaTable::new("public", "orders")).await);
}

#[tokio::test]
async fn dropped_table_loses_its_placeholder() {
    let f = fixture().await;
    std::fs::remove_dir_all(f.lakehouse.path().join("sales")).unwrap();
    f.shim.refresh().await.unwrap();

    let count = f
        .engine
        .query(
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema = 'sales' AND table_name = 'orders'",
        )
        .await
        .unwrap();
    assert_eq!(first_i64(&count), 0);
}

#[tokio::test]
async fn empty_lakehouse_lists_no_user_tables() {
    let f = fixture_with(&[]).await;
    let result = f
        .engine
        .query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema NOT IN ('pg_catalog', 'information_schema', 'main')",
        )
        .await
        .unwrap();
    assert_eq!(result.row_count(), 0);
}

// ---------------------------------------------------------------------------
// Function pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn array_upper_becomes_len_and_runs() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT array_upper(ARRAY[10, 20, 30], 1)").await;
    assert!(sql.contains("len("), "{sql}");
    assert!(!sql.contains("array_upper"), "{sql}");

    let result = f.engine.query(&sql).await.unwrap();
    assert_eq!(first_i64(&result), 3);
}

#[tokio::test]
async fn pg_show_all_settings_becomes_duckdb_settings() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT name FROM pg_catalog.pg_show_all_settings()").await;
    assert!(sql.contains("duckdb_settings()"), "{sql}");

    let result = f.engine.query(&sql).await.unwrap();
    assert!(result.row_count() > 0);
}

#[tokio::test]
async fn pg_is_in_recovery_is_constant_false() {
    let f = fixture().await;
    let scalar = remap(&f, "SELECT pg_catalog.pg_is_in_recovery()").await;
    assert!(scalar.contains("false::BOOLEAN"), "{scalar}");
    f.engine.query(&scalar).await.unwrap();

    let table = remap(&f, "SELECT * FROM pg_catalog.pg_is_in_recovery()").await;
    assert!(table.contains("SELECT false::BOOLEAN AS pg_is_in_recovery"), "{table}");
    let result = f.engine.query(&table).await.unwrap();
    assert_eq!(result.row_count(), 1);
}

#[tokio::test]
async fn pg_get_keywords_is_synthesized() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT word FROM pg_catalog.pg_get_keywords()").await;
    assert!(sql.contains("VALUES"), "{sql}");
    assert!(sql.contains("barelabel"), "{sql}");

    let result = f.engine.query(&sql).await.unwrap();
    assert!(result.row_count() >= 20);
}

#[tokio::test]
async fn other_pg_catalog_functions_lose_their_qualifier() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT pg_catalog.length('abc')").await;
    assert!(!sql.contains("pg_catalog."), "{sql}");
    let result = f.engine.query(&sql).await.unwrap();
    assert_eq!(result.row_count(), 1);
}

// ---------------------------------------------------------------------------
// Expression pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn regclass_cast_becomes_oid_subselect() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT 'public.users'::regclass").await;
    assert!(sql.contains("pg_class"), "{sql}");
    assert!(sql.contains("relnamespace"), "{sql}");
    assert!(!sql.contains("regclass"), "{sql}");

    // The placeholder gives the lookup a real oid to find.
    let result = f.engine.query(&sql).await.unwrap();
    assert_eq!(result.row_count(), 1);
    assert!(!result.batches[0].column(0).is_null(0));
}

#[tokio::test]
async fn regclass_oid_cast_is_peeled() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT 'public.users'::regclass::oid").await;
    assert!(sql.contains("pg_class"), "{sql}");
    assert!(!sql.contains("::oid"), "{sql}");
}

#[tokio::test]
async fn regproc_cast_keeps_last_component() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT 'pg_catalog.array_to_string'::regproc").await;
    assert!(sql.contains("'array_to_string'"), "{sql}");
    assert!(!sql.contains("regproc"), "{sql}");
}

#[tokio::test]
async fn text_array_literal_becomes_array_constructor() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT '{a,b,c}'::text[]").await;
    assert!(sql.contains("ARRAY['a', 'b', 'c']"), "{sql}");
}

#[tokio::test]
async fn eq_any_becomes_in_list() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT 1 WHERE 'public' = ANY('{public,main}')").await;
    assert!(sql.contains("IN ('public', 'main')"), "{sql}");
    assert!(!sql.to_lowercase().contains("any"), "{sql}");
}

#[tokio::test]
async fn pg_catalog_operator_is_unqualified() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT 'abc' OPERATOR(pg_catalog.~~) 'a%'").await;
    assert!(!sql.contains("OPERATOR"), "{sql}");
    assert!(sql.contains("~~"), "{sql}");
}

#[tokio::test]
async fn three_part_column_refs_follow_table_aliases() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT sales.orders.id FROM sales.orders").await;
    assert!(sql.contains("sales_orders.id"), "{sql}");

    let public = remap(&f, "SELECT public.users.id FROM public.users").await;
    assert!(public.contains("users.id"), "{public}");
    assert!(!public.contains("public.users.id"), "{public}");
}

#[tokio::test]
async fn default_collate_is_stripped() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT name COLLATE pg_catalog.\"default\" FROM public.users").await;
    assert!(!sql.to_lowercase().contains("collate"), "{sql}");
}

#[tokio::test]
async fn bare_constants_get_the_postgres_column_name() {
    let f = fixture().await;
    let sql = remap(&f, "SELECT 1").await;
    assert!(sql.contains("\"?column?\""), "{sql}");

    let result = f.engine.query(&sql).await.unwrap();
    assert_eq!(result.schema.field(0).name(), "?column?");
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remapping_is_idempotent() {
    let f = fixture().await;
    let queries = [
        "SELECT * FROM public.users",
        "SELECT * FROM sales.orders o JOIN public.users u ON u.id = o.id",
        "SELECT nspname FROM pg_catalog.pg_namespace",
        "SELECT * FROM pg_catalog.pg_shadow",
        "SELECT * FROM information_schema.tables",
        "SELECT array_upper(ARRAY[1, 2], 1)",
        "SELECT 'public.users'::regclass",
        "SELECT '{x,y}'::text[]",
        "SELECT word FROM pg_catalog.pg_get_keywords()",
        "SELECT 1 WHERE 'a' = ANY('{a,b}')",
        "SELECT sales.orders.id FROM sales.orders",
        "SELECT 1",
    ];
    for query in queries {
        let once = remap(&f, query).await;
        let twice = remap(&f, &once).await;
        assert_eq!(once, twice, "remap is not idempotent for {query}");
    }
}

// ---------------------------------------------------------------------------
// Subqueries and CTEs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tables_inside_subqueries_are_remapped() {
    let f = fixture().await;
    let sql = remap(
        &f,
        "SELECT id FROM public.users WHERE id IN (SELECT id FROM sales.orders)",
    )
    .await;
    assert_eq!(sql.matches("iceberg_scan(").count(), 2, "{sql}");
}

#[tokio::test]
async fn cte_names_are_not_treated_as_lakehouse_tables() {
    let f = fixture().await;
    let sql = remap(
        &f,
        "WITH recent AS (SELECT id FROM public.users) SELECT * FROM recent",
    )
    .await;
    assert_eq!(sql.matches("iceberg_scan(").count(), 1, "{sql}");
    assert!(sql.contains("FROM recent"), "{sql}");
}
