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

//! Synthetic `pg_catalog` objects and Iceberg placeholder maintenance.
//!
//! PostgreSQL client tools probe `pg_catalog` and `information_schema` before
//! they run a single user query. DuckDB emulates most of `pg_catalog` but not
//! all of it, so the shim registers the missing tables and views inside the
//! engine's default `main` schema at boot. It also keeps one empty placeholder
//! table per Iceberg table alive in the engine so that name resolution, oid
//! lookups and `information_schema` listings behave; the placeholders are
//! never read for data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{sanitize_literal, EngineAdapter};
use crate::error::Result;
use crate::iceberg::{IcebergReader, IcebergSchemaTable};

/// Namespaces below this oid are DuckDB-internal and hidden from clients.
pub const MAX_REDUNDANT_PG_NAMESPACE_OID: i64 = 1265;

/// `pg_catalog` tables DuckDB itself resolves (shim-owned ones excluded).
pub const PG_SYSTEM_TABLES: &[&str] = &[
    "pg_aggregate",
    "pg_am",
    "pg_attrdef",
    "pg_attribute",
    "pg_auth_members",
    "pg_class",
    "pg_collation",
    "pg_constraint",
    "pg_database",
    "pg_depend",
    "pg_description",
    "pg_enum",
    "pg_extension",
    "pg_index",
    "pg_inherits",
    "pg_namespace",
    "pg_opclass",
    "pg_proc",
    "pg_range",
    "pg_rewrite",
    "pg_sequence",
    "pg_shdescription",
    "pg_tablespace",
    "pg_trigger",
    "pg_type",
];

/// `pg_catalog` views clients reference without qualification.
pub const PG_SYSTEM_VIEWS: &[&str] = &[
    "pg_indexes",
    "pg_matviews",
    "pg_replication_slots",
    "pg_roles",
    "pg_settings",
    "pg_shadow",
    "pg_stat_activity",
    "pg_stat_gssapi",
    "pg_stat_user_tables",
    "pg_statio_user_tables",
    "pg_tables",
    "pg_user",
    "pg_views",
];

/// Catalog functions clients call without the `pg_catalog.` qualifier.
pub const PG_SYSTEM_FUNCTIONS: &[&str] = &[
    "array_upper",
    "pg_get_keywords",
    "pg_is_in_recovery",
    "pg_show_all_settings",
];

pub fn is_system_table(name: &str) -> bool {
    PG_SYSTEM_TABLES.binary_search(&name).is_ok() || PG_SYSTEM_VIEWS.binary_search(&name).is_ok()
}

pub fn is_system_function(name: &str) -> bool {
    PG_SYSTEM_FUNCTIONS.binary_search(&name).is_ok()
}

/// The fixed DDL set registered at boot. Views carrying runtime configuration
/// (user, password, database name) are rendered with literal values.
pub fn pg_catalog_ddl(config: &Config) -> Vec<String> {
    let user = sanitize_literal(&config.user);
    let password = sanitize_literal(&config.encrypted_password);
    let database = sanitize_literal(&config.database);

    vec![
        // Static empty tables
        "CREATE TABLE pg_inherits(inhrelid oid, inhparent oid, inhseqno int4, inhdetachpending bool)".to_string(),
        "CREATE TABLE pg_shdescription(objoid oid, classoid oid, description text)".to_string(),
        "CREATE TABLE pg_statio_user_tables(relid oid, schemaname text, relname text, heap_blks_read int8, heap_blks_hit int8, idx_blks_read int8, idx_blks_hit int8, toast_blks_read int8, toast_blks_hit int8, tidx_blks_read int8, tidx_blks_hit int8)".to_string(),
        "CREATE TABLE pg_replication_slots(slot_name text, plugin text, slot_type text, datoid oid, database text, temporary bool, active bool, active_pid int4, xmin int8, catalog_xmin int8, restart_lsn text, confirmed_flush_lsn text, wal_status text, safe_wal_size int8, two_phase bool, conflicting bool)".to_string(),
        "CREATE TABLE pg_stat_gssapi(pid int4, gss_authenticated bool, principal text, encrypted bool, credentials_delegated bool)".to_string(),
        "CREATE TABLE pg_auth_members(oid text, roleid oid, member oid, grantor oid, admin_option bool, inherit_option bool, set_option bool)".to_string(),
        "CREATE TABLE pg_stat_activity(datid oid, datname text, pid int4, usesysid oid, usename text, application_name text, client_addr text, client_hostname text, client_port int4, backend_start timestamp, xact_start timestamp, query_start timestamp, state_change timestamp, wait_event_type text, wait_event text, state text, backend_xid int8, backend_xmin int8, query text, backend_type text)".to_string(),
        "CREATE TABLE pg_views(schemaname text, viewname text, viewowner text, definition text)".to_string(),
        "CREATE TABLE pg_matviews(schemaname text, matviewname text, matviewowner text, tablespace text, hasindexes bool, ispopulated bool, definition text)".to_string(),
        "CREATE TABLE pg_opclass(oid oid, opcmethod oid, opcname text, opcnamespace oid, opcowner oid, opcfamily oid, opcintype oid, opcdefault bool, opckeytype oid)".to_string(),

        // Populated by the shim on demand; a view is not enough because the
        // engine cannot replace a view that queries are planning against.
        "CREATE TABLE pg_stat_user_tables(relid oid, schemaname text, relname text, seq_scan int8, last_seq_scan timestamp, seq_tup_read int8, idx_scan int8, last_idx_scan timestamp, idx_tup_fetch int8, n_tup_ins int8, n_tup_upd int8, n_tup_del int8, n_tup_hot_upd int8, n_tup_newpage_upd int8, n_live_tup int8, n_dead_tup int8, n_mod_since_analyze int8, n_ins_since_vacuum int8, last_vacuum timestamp, last_autovacuum timestamp, last_analyze timestamp, last_autoanalyze timestamp, vacuum_count int8, autovacuum_count int8, analyze_count int8, autoanalyze_count int8)".to_string(),

        // Views carrying configuration
        format!("CREATE VIEW pg_shadow AS SELECT '{user}' AS usename, '10'::oid AS usesysid, FALSE AS usecreatedb, FALSE AS usesuper, TRUE AS userepl, FALSE AS usebypassrls, '{password}' AS passwd, NULL::timestamp AS valuntil, NULL::text[] AS useconfig"),
        format!("CREATE VIEW pg_roles AS SELECT '10'::oid AS oid, '{user}' AS rolname, TRUE AS rolsuper, TRUE AS rolinherit, TRUE AS rolcreaterole, TRUE AS rolcreatedb, TRUE AS rolcanlogin, FALSE AS rolreplication, -1 AS rolconnlimit, NULL::text AS rolpassword, NULL::timestamp AS rolvaliduntil, FALSE AS rolbypassrls, NULL::text[] AS rolconfig"),
        "CREATE VIEW pg_extension AS SELECT '13823'::oid AS oid, 'plpgsql' AS extname, '10'::oid AS extowner, '11'::oid AS extnamespace, FALSE AS extrelocatable, '1.0'::text AS extversion, NULL::text[] AS extconfig, NULL::text[] AS extcondition".to_string(),
        format!("CREATE VIEW pg_database AS SELECT '16388'::oid AS oid, '{database}' AS datname, '10'::oid AS datdba, '6'::int4 AS encoding, 'c' AS datlocprovider, FALSE AS datistemplate, TRUE AS datallowconn, '-1'::int4 AS datconnlimit, '722'::int8 AS datfrozenxid, '1'::int4 AS datminmxid, '1663'::oid AS dattablespace, 'en_US.UTF-8' AS datcollate, 'en_US.UTF-8' AS datctype, 'en_US.UTF-8' AS datlocale, NULL::text AS daticurules, NULL::text AS datcollversion, NULL::text[] AS datacl"),
        format!("CREATE VIEW pg_user AS SELECT '{user}' AS usename, '10'::oid AS usesysid, TRUE AS usecreatedb, TRUE AS usesuper, TRUE AS userepl, TRUE AS usebypassrls, '' AS passwd, NULL::timestamp AS valuntil, NULL::text[] AS useconfig"),
        "CREATE VIEW pg_collation AS SELECT '100'::oid AS oid, 'default' AS collname, '11'::oid AS collnamespace, '10'::oid AS collowner, 'd' AS collprovider, TRUE AS collisdeterministic, '-1'::int4 AS collencoding, NULL::text AS collcollate, NULL::text AS collctype, NULL::text AS colliculocale, NULL::text AS collicurules, NULL::text AS collversion".to_string(),

        // Projection over the engine's own catalog, adding the column DuckDB lacks
        "CREATE VIEW pg_index AS SELECT *, FALSE AS indnullsnotdistinct FROM pg_catalog.pg_index".to_string(),
    ]
}

/// Pull the object name out of a `CREATE TABLE`/`CREATE VIEW` DDL string.
fn extract_object_name(ddl: &str) -> Option<String> {
    let rest = ddl
        .strip_prefix("CREATE TABLE ")
        .or_else(|| ddl.strip_prefix("CREATE VIEW "))?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Boot-time catalog registration plus Iceberg placeholder maintenance.
pub struct CatalogShim {
    engine: Arc<EngineAdapter>,
    reader: Arc<dyn IcebergReader>,
    /// Names registered by [`pg_catalog_ddl`], resolvable as `main.<name>`.
    catalog_names: BTreeSet<String>,
    /// Known Iceberg tables, keyed by canonical `schema.table`. Mutated only
    /// under the refresh mutex.
    tables: tokio::sync::Mutex<BTreeMap<String, IcebergSchemaTable>>,
}

impl CatalogShim {
    /// Register the fixed catalog objects and start with an empty table set.
    /// Callers run one [`CatalogShim::refresh`] before serving queries.
    pub async fn bootstrap(
        engine: Arc<EngineAdapter>,
        reader: Arc<dyn IcebergReader>,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let ddl = pg_catalog_ddl(config);
        let catalog_names: BTreeSet<String> =
            ddl.iter().filter_map(|s| extract_object_name(s)).collect();
        for statement in &ddl {
            engine.exec(statement).await?;
        }
        info!(objects = catalog_names.len(), "registered pg_catalog shim");

        Ok(Arc::new(CatalogShim {
            engine,
            reader,
            catalog_names,
            tables: tokio::sync::Mutex::new(BTreeMap::new()),
        }))
    }

    /// Is `name` one of the shim-registered `pg_catalog` objects?
    pub fn is_catalog_object(&self, name: &str) -> bool {
        self.catalog_names.contains(name)
    }

    pub async fn contains(&self, table: &IcebergSchemaTable) -> bool {
        self.tables.lock().await.contains_key(&table.canonical())
    }

    pub async fn known_tables(&self) -> Vec<IcebergSchemaTable> {
        self.tables.lock().await.values().cloned().collect()
    }

    /// Newest metadata path for a known table, straight from the reader.
    pub async fn metadata_file_path(&self, table: &IcebergSchemaTable) -> Result<String> {
        self.reader.metadata_file_path(table).await
    }

    /// Align the in-memory set and the engine-side placeholders with the
    /// reader. Serialized: concurrent refreshes queue on the table mutex so
    /// CREATE/DROP DDL never races.
    pub async fn refresh(&self) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let fresh = self.reader.schema_tables().await?;

        let fresh_keys: BTreeMap<String, IcebergSchemaTable> = fresh
            .into_iter()
            .map(|t| (t.canonical(), t))
            .collect();

        for (key, table) in &fresh_keys {
            if tables.contains_key(key) {
                continue;
            }
            let fields = self.reader.table_fields(table).await?;
            let columns: Vec<String> = fields.iter().map(|f| f.to_sql()).collect();
            self.engine
                .exec(&format!(
                    "CREATE SCHEMA IF NOT EXISTS \"{}\"",
                    table.schema
                ))
                .await?;
            self.engine
                .exec(&format!(
                    "CREATE TABLE IF NOT EXISTS \"{}\".\"{}\" ({})",
                    table.schema,
                    table.table,
                    columns.join(", ")
                ))
                .await?;
            debug!(table = %table, "registered iceberg placeholder");
        }

        let removed: Vec<IcebergSchemaTable> = tables
            .iter()
            .filter(|(key, _)| !fresh_keys.contains_key(*key))
            .map(|(_, t)| t.clone())
            .collect();
        for table in removed {
            self.engine
                .exec(&format!(
                    "DROP TABLE IF EXISTS \"{}\".\"{}\"",
                    table.schema, table.table
                ))
                .await?;
            debug!(table = %table, "dropped stale iceberg placeholder");
        }

        *tables = fresh_keys;
        Ok(())
    }

    /// Rewrite the synthetic per-table statistics rows. Runs after a refresh
    /// when a query targets `pg_stat_user_tables`.
    pub async fn upsert_pg_stat_user_tables(&self) -> Result<()> {
        let tables = self.known_tables().await;
        let mut statements = vec!["DELETE FROM pg_stat_user_tables".to_string()];
        if !tables.is_empty() {
            let values: Vec<String> = tables
                .iter()
                .map(|t| {
                    format!(
                        "('123456', '{}', '{}', 0, NULL, 0, 0, NULL, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, NULL, NULL, NULL, NULL, 0, 0, 0, 0)",
                        sanitize_literal(&t.schema),
                        sanitize_literal(&t.table)
                    )
                })
                .collect();
            statements.push(format!(
                "INSERT INTO pg_stat_user_tables VALUES {}",
                values.join(", ")
            ));
        }
        self.engine.exec_transaction(statements).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AwsConfig, LogLevel, PgConfig, StorageType};

    fn test_config() -> Config {
        Config {
            listen_address: "127.0.0.1".into(),
            listen_port: 0,
            database: "lake".into(),
            user: "reader".into(),
            encrypted_password: "scram-sha-256$secret".into(),
            log_level: LogLevel::Info,
            storage_type: StorageType::Local,
            storage_path: "iceberg".into(),
            init_sql_filepath: None,
            aws: AwsConfig::default(),
            pg: PgConfig::default(),
            disable_anonymous_analytics: false,
        }
    }

    #[test]
    fn system_lists_are_sorted_for_binary_search() {
        let mut tables = PG_SYSTEM_TABLES.to_vec();
        tables.sort_unstable();
        assert_eq!(tables, PG_SYSTEM_TABLES);
        let mut views = PG_SYSTEM_VIEWS.to_vec();
        views.sort_unstable();
        assert_eq!(views, PG_SYSTEM_VIEWS);
        let mut functions = PG_SYSTEM_FUNCTIONS.to_vec();
        functions.sort_unstable();
        assert_eq!(functions, PG_SYSTEM_FUNCTIONS);
    }

    #[test]
    fn ddl_names_extract() {
        let ddl = pg_catalog_ddl(&test_config());
        let names: BTreeSet<String> = ddl.iter().filter_map(|s| extract_object_name(s)).collect();
        for expected in [
            "pg_inherits",
            "pg_shdescription",
            "pg_statio_user_tables",
            "pg_replication_slots",
            "pg_stat_gssapi",
            "pg_auth_members",
            "pg_stat_activity",
            "pg_views",
            "pg_matviews",
            "pg_opclass",
            "pg_stat_user_tables",
            "pg_shadow",
            "pg_roles",
            "pg_extension",
            "pg_database",
            "pg_user",
            "pg_collation",
            "pg_index",
        ] {
            assert!(names.contains(expected), "missing {expected}");
        }
        assert_eq!(names.len(), 18);
    }

    #[test]
    fn config_values_are_substituted_and_sanitized() {
        let mut config = test_config();
        config.user = "rea'der".into();
        config.database = "la\"ke;".into();
        let ddl = pg_catalog_ddl(&config);
        let shadow = ddl.iter().find(|s| s.contains("pg_shadow")).unwrap();
        assert!(shadow.contains("'reader'"));
        let database = ddl.iter().find(|s| s.contains("pg_database")).unwrap();
        assert!(database.contains("'lake'"));
    }

    #[test]
    fn system_membership() {
        assert!(is_system_table("pg_class"));
        assert!(is_system_table("pg_stat_user_tables"));
        assert!(!is_system_table("users"));
        assert!(is_system_function("pg_get_keywords"));
        assert!(!is_system_function("sum"));
    }
}
