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

//! Iceberg lakehouse inventory.
//!
//! The lakehouse is laid out as `<root>/<schema>/<table>/metadata/` holding
//! `v<N>.metadata.json` files; the newest `N` describes the table. The
//! [`IcebergReader`] trait is the only channel through which the rest of the
//! endpoint sees the lakehouse: an inventory of schema-qualified tables, the
//! field list per table, and the newest metadata file path handed to the
//! engine's `iceberg_scan`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{AwsCredentialsType, Config};
use crate::error::{FloeError, Result};

/// A schema-qualified table as it exists in the lakehouse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IcebergSchemaTable {
    pub schema: String,
    pub table: String,
}

impl IcebergSchemaTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        IcebergSchemaTable {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Canonical `schema.table` key used for set membership and DDL.
    pub fn canonical(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl fmt::Display for IcebergSchemaTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// One column of an Iceberg table, typed in the engine's SQL dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcebergTableField {
    pub name: String,
    /// Engine-side column type, e.g. `BIGINT` or `DECIMAL(10, 2)`.
    pub sql_type: String,
    pub required: bool,
}

impl IcebergTableField {
    /// Column clause for the shim's `CREATE TABLE` DDL.
    pub fn to_sql(&self) -> String {
        if self.required {
            format!("\"{}\" {} NOT NULL", self.name, self.sql_type)
        } else {
            format!("\"{}\" {}", self.name, self.sql_type)
        }
    }
}

/// Read access to the lakehouse inventory.
#[async_trait]
pub trait IcebergReader: Send + Sync {
    /// All schemas present under the lakehouse root.
    async fn schemas(&self) -> Result<Vec<String>>;

    /// All tables currently visible, deduplicated.
    async fn schema_tables(&self) -> Result<BTreeSet<IcebergSchemaTable>>;

    /// Column list of one table, from its newest metadata file.
    async fn table_fields(&self, table: &IcebergSchemaTable) -> Result<Vec<IcebergTableField>>;

    /// Path of the newest `v*.metadata.json`, in a form the engine can open.
    async fn metadata_file_path(&self, table: &IcebergSchemaTable) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Metadata file decoding (shared by both readers)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TableMetadata {
    #[serde(rename = "format-version")]
    format_version: Option<u8>,
    /// Iceberg v1 single schema.
    schema: Option<MetadataSchema>,
    /// Iceberg v2 schema list.
    schemas: Option<Vec<MetadataSchema>>,
    #[serde(rename = "current-schema-id")]
    current_schema_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MetadataSchema {
    #[serde(rename = "schema-id")]
    schema_id: Option<i64>,
    #[serde(default)]
    fields: Vec<MetadataField>,
}

#[derive(Debug, Deserialize)]
struct MetadataField {
    name: String,
    required: bool,
    /// Primitive types arrive as strings, nested types as objects.
    #[serde(rename = "type")]
    field_type: serde_json::Value,
}

/// Decode the field list out of a metadata JSON document.
fn fields_from_metadata(bytes: &[u8]) -> Result<Vec<IcebergTableField>> {
    let metadata: TableMetadata = serde_json::from_slice(bytes)
        .map_err(|e| FloeError::Storage(format!("invalid table metadata: {e}")))?;

    let schema = match (&metadata.schemas, &metadata.schema) {
        (Some(schemas), _) => {
            let current = metadata.current_schema_id;
            schemas
                .iter()
                .find(|s| current.is_none() || s.schema_id == current)
                .or_else(|| schemas.first())
        }
        (None, Some(schema)) => Some(schema),
        (None, None) => None,
    };
    let schema = schema.ok_or_else(|| {
        FloeError::Storage(format!(
            "table metadata (format-version {:?}) carries no schema",
            metadata.format_version
        ))
    })?;

    Ok(schema
        .fields
        .iter()
        .map(|f| IcebergTableField {
            name: f.name.clone(),
            sql_type: engine_type_for(&f.field_type),
            required: f.required,
        })
        .collect())
}

/// Map an Iceberg field type to the engine's column type.
///
/// Nested list/struct/map types are projected as VARCHAR; the placeholder
/// tables exist for name resolution, not for reading data.
fn engine_type_for(field_type: &serde_json::Value) -> String {
    let name = match field_type.as_str() {
        Some(s) => s,
        None => return "VARCHAR".to_string(),
    };
    if let Some(rest) = name.strip_prefix("decimal(") {
        return format!("DECIMAL({rest}");
    }
    match name {
        "boolean" => "BOOLEAN",
        "int" => "INTEGER",
        "long" => "BIGINT",
        "float" => "FLOAT",
        "double" => "DOUBLE",
        "date" => "DATE",
        "time" => "TIME",
        "timestamp" => "TIMESTAMP",
        "timestamptz" => "TIMESTAMPTZ",
        "string" => "VARCHAR",
        "uuid" => "UUID",
        "binary" => "BLOB",
        other => {
            if other.starts_with("fixed") {
                "BLOB"
            } else {
                "VARCHAR"
            }
        }
    }
    .to_string()
}

/// Pick the newest `v<N>.metadata.json` out of a file-name list.
fn newest_metadata_file(names: &[String]) -> Option<&String> {
    names
        .iter()
        .filter_map(|n| metadata_version(n).map(|v| (v, n)))
        .max_by_key(|(v, _)| *v)
        .map(|(_, n)| n)
}

fn metadata_version(name: &str) -> Option<u64> {
    let rest = name.strip_prefix('v')?;
    let digits = rest.strip_suffix(".metadata.json")?;
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Filesystem-backed reader (storage_type = LOCAL)
// ---------------------------------------------------------------------------

/// Reader over a lakehouse rooted at a local directory.
pub struct FsCatalogReader {
    root: PathBuf,
}

impl FsCatalogReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsCatalogReader { root: root.into() }
    }

    fn table_metadata_dir(&self, table: &IcebergSchemaTable) -> PathBuf {
        self.root
            .join(&table.schema)
            .join(&table.table)
            .join("metadata")
    }

    fn list_dirs(path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(path)
            .map_err(|e| FloeError::Storage(format!("listing {}: {e}", path.display())))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| FloeError::Storage(format!("listing {}: {e}", path.display())))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn newest_metadata_path(&self, table: &IcebergSchemaTable) -> Result<PathBuf> {
        let dir = self.table_metadata_dir(table);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| FloeError::Storage(format!("listing {}: {e}", dir.display())))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| FloeError::Storage(format!("listing {}: {e}", dir.display())))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        let newest = newest_metadata_file(&names).ok_or_else(|| {
            FloeError::Storage(format!("no metadata file for table {table}"))
        })?;
        Ok(dir.join(newest))
    }
}

#[async_trait]
impl IcebergReader for FsCatalogReader {
    async fn schemas(&self) -> Result<Vec<String>> {
        Self::list_dirs(&self.root)
    }

    async fn schema_tables(&self) -> Result<BTreeSet<IcebergSchemaTable>> {
        let mut tables = BTreeSet::new();
        for schema in self.schemas().await? {
            for table in Self::list_dirs(&self.root.join(&schema))? {
                // Only directories with a metadata/ subdir are tables.
                if self
                    .root
                    .join(&schema)
                    .join(&table)
                    .join("metadata")
                    .is_dir()
                {
                    tables.insert(IcebergSchemaTable::new(schema.clone(), table));
                }
            }
        }
        Ok(tables)
    }

    async fn table_fields(&self, table: &IcebergSchemaTable) -> Result<Vec<IcebergTableField>> {
        let path = self.newest_metadata_path(table)?;
        let bytes = std::fs::read(&path)
            .map_err(|e| FloeError::Storage(format!("reading {}: {e}", path.display())))?;
        fields_from_metadata(&bytes)
    }

    async fn metadata_file_path(&self, table: &IcebergSchemaTable) -> Result<String> {
        Ok(self.newest_metadata_path(table)?.display().to_string())
    }
}

// ---------------------------------------------------------------------------
// S3-backed reader (storage_type = S3)
// ---------------------------------------------------------------------------

/// Reader over a lakehouse stored under `s3://<bucket>/<prefix>`.
pub struct S3CatalogReader {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3CatalogReader {
    /// Build a client from the endpoint configuration.
    pub async fn connect(config: &Config) -> Result<Self> {
        let aws = &config.aws;
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(aws.region.clone()));
        if aws.credentials_type == Some(AwsCredentialsType::Static) {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                aws.access_key_id.clone(),
                aws.secret_access_key.clone(),
                None,
                None,
                "floe-static",
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if !aws.s3_endpoint.is_empty() {
            let endpoint = if aws.s3_endpoint.starts_with("http") {
                aws.s3_endpoint.clone()
            } else {
                format!("https://{}", aws.s3_endpoint)
            };
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(S3CatalogReader {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: aws.s3_bucket.clone(),
            prefix: config.storage_path.trim_matches('/').to_string(),
        })
    }

    fn table_metadata_prefix(&self, table: &IcebergSchemaTable) -> String {
        format!(
            "{}/{}/{}/metadata/",
            self.prefix, table.schema, table.table
        )
    }

    /// Immediate child "directories" under a prefix, via delimiter listing.
    async fn list_child_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .delimiter("/")
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| FloeError::Storage(format!("listing s3 prefix {prefix}: {e}")))?;
            for common in resp.common_prefixes() {
                if let Some(p) = common.prefix() {
                    let child = p
                        .trim_end_matches('/')
                        .rsplit('/')
                        .next()
                        .unwrap_or_default();
                    if !child.is_empty() {
                        names.push(child.to_string());
                    }
                }
            }
            match resp.next_continuation_token() {
                Some(t) => token = Some(t.to_string()),
                None => break,
            }
        }
        names.sort();
        Ok(names)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| FloeError::Storage(format!("listing s3 prefix {prefix}: {e}")))?;
            for object in resp.contents() {
                if let Some(k) = object.key() {
                    keys.push(k.to_string());
                }
            }
            match resp.next_continuation_token() {
                Some(t) => token = Some(t.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn newest_metadata_key(&self, table: &IcebergSchemaTable) -> Result<String> {
        let prefix = self.table_metadata_prefix(table);
        let keys = self.list_keys(&prefix).await?;
        let names: Vec<String> = keys
            .iter()
            .filter_map(|k| k.rsplit('/').next().map(str::to_string))
            .collect();
        let newest = newest_metadata_file(&names)
            .ok_or_else(|| FloeError::Storage(format!("no metadata file for table {table}")))?;
        Ok(format!("{prefix}{newest}"))
    }
}

#[async_trait]
impl IcebergReader for S3CatalogReader {
    async fn schemas(&self) -> Result<Vec<String>> {
        self.list_child_prefixes(&format!("{}/", self.prefix)).await
    }

    async fn schema_tables(&self) -> Result<BTreeSet<IcebergSchemaTable>> {
        let mut tables = BTreeSet::new();
        for schema in self.schemas().await? {
            let children = self
                .list_child_prefixes(&format!("{}/{}/", self.prefix, schema))
                .await?;
            for table in children {
                tables.insert(IcebergSchemaTable::new(schema.clone(), table));
            }
        }
        Ok(tables)
    }

    async fn table_fields(&self, table: &IcebergSchemaTable) -> Result<Vec<IcebergTableField>> {
        let key = self.newest_metadata_key(table).await?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| FloeError::Storage(format!("fetching s3://{}/{key}: {e}", self.bucket)))?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| FloeError::Storage(format!("reading s3://{}/{key}: {e}", self.bucket)))?
            .into_bytes();
        fields_from_metadata(&bytes)
    }

    async fn metadata_file_path(&self, table: &IcebergSchemaTable) -> Result<String> {
        let key = self.newest_metadata_key(table).await?;
        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}
