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

//! Runtime configuration.
//!
//! Every option can be set on the command line or through a `FLOE_*`
//! environment variable (clap's `env` fallback). Validation happens once at
//! startup; any failure is a fatal [`FloeError::Config`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{FloeError, Result};

/// Log verbosity, mapped onto a `tracing` EnvFilter directive.
///
/// `Trace` additionally enables DuckDB HTTP logging when the storage backend
/// is an object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string for `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!(
                "invalid log level '{other}' (expected error, info, debug or trace)"
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Where the lakehouse lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Local,
    S3,
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(StorageType::Local),
            "S3" => Ok(StorageType::S3),
            other => Err(format!(
                "invalid storage type '{other}' (expected LOCAL or S3)"
            )),
        }
    }
}

/// How the engine and the catalog reader authenticate against S3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsCredentialsType {
    /// Explicit access key pair from configuration.
    Static,
    /// The SDK credential chain (env, profile, IMDS, ...).
    Default,
}

impl FromStr for AwsCredentialsType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STATIC" => Ok(AwsCredentialsType::Static),
            "DEFAULT" => Ok(AwsCredentialsType::Default),
            other => Err(format!(
                "invalid credentials type '{other}' (expected STATIC or DEFAULT)"
            )),
        }
    }
}

/// S3 connection options, only consulted when `storage_type` is `S3`.
#[derive(Debug, Clone, Default)]
pub struct AwsConfig {
    pub credentials_type: Option<AwsCredentialsType>,
    pub region: String,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Source-database options. Only the `sync` subcommand reads these.
#[derive(Debug, Clone, Default)]
pub struct PgConfig {
    pub database_url: String,
}

/// Full endpoint configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: String,
    pub listen_port: u16,
    /// Database name presented to clients (`pg_database`, startup parameter).
    pub database: String,
    /// Role presented to clients (`pg_shadow`, `pg_roles`, `pg_user`).
    pub user: String,
    /// Credential the cleartext password check compares against.
    pub encrypted_password: String,
    pub log_level: LogLevel,
    pub storage_type: StorageType,
    /// Lakehouse root: a directory (LOCAL) or a key prefix inside the bucket (S3).
    pub storage_path: String,
    /// Optional boot-override file, one SQL statement per line.
    pub init_sql_filepath: Option<PathBuf>,
    pub aws: AwsConfig,
    pub pg: PgConfig,
    pub disable_anonymous_analytics: bool,
}

/// Command-line / environment surface, flattened into the binary's parser.
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Listen address
    #[arg(long, env = "FLOE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Listen port
    #[arg(long, env = "FLOE_PORT", default_value_t = 54321)]
    pub port: u16,

    /// Database name presented to clients
    #[arg(long, env = "FLOE_DATABASE", default_value = "floe")]
    pub database: String,

    /// Role presented to clients
    #[arg(long, env = "FLOE_USER", default_value = "floe")]
    pub user: String,

    /// Credential compared against the client password message
    #[arg(long, env = "FLOE_ENCRYPTED_PASSWORD", default_value = "")]
    pub encrypted_password: String,

    /// Log level: error, info, debug or trace
    #[arg(long, env = "FLOE_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Storage backend: LOCAL or S3
    #[arg(long, env = "FLOE_STORAGE_TYPE", default_value = "LOCAL")]
    pub storage_type: StorageType,

    /// Lakehouse root (directory for LOCAL, key prefix for S3)
    #[arg(long, env = "FLOE_STORAGE_PATH", default_value = "iceberg")]
    pub storage_path: String,

    /// Engine init file, one SQL statement per line (replaces the boot sequence)
    #[arg(long = "init-sql", env = "FLOE_INIT_SQL_FILEPATH")]
    pub init_sql_filepath: Option<PathBuf>,

    /// AWS credentials type: STATIC or DEFAULT
    #[arg(long, env = "FLOE_AWS_CREDENTIALS_TYPE")]
    pub aws_credentials_type: Option<AwsCredentialsType>,

    /// AWS region
    #[arg(long, env = "FLOE_AWS_REGION", default_value = "")]
    pub aws_region: String,

    /// S3 endpoint (host or URL; empty for the AWS default)
    #[arg(long, env = "FLOE_AWS_S3_ENDPOINT", default_value = "")]
    pub aws_s3_endpoint: String,

    /// S3 bucket holding the lakehouse
    #[arg(long, env = "FLOE_AWS_S3_BUCKET", default_value = "")]
    pub aws_s3_bucket: String,

    /// Static AWS access key id
    #[arg(long, env = "FLOE_AWS_ACCESS_KEY_ID", default_value = "")]
    pub aws_access_key_id: String,

    /// Static AWS secret access key
    #[arg(long, env = "FLOE_AWS_SECRET_ACCESS_KEY", default_value = "")]
    pub aws_secret_access_key: String,

    /// Source PostgreSQL URL for the sync subcommand
    #[arg(long, env = "FLOE_PG_DATABASE_URL", default_value = "")]
    pub pg_database_url: String,

    /// Disable anonymous usage analytics
    #[arg(long, env = "FLOE_DISABLE_ANONYMOUS_ANALYTICS", default_value_t = false)]
    pub disable_anonymous_analytics: bool,
}

impl Config {
    /// Build and validate a configuration from the parsed CLI surface.
    pub fn from_args(args: ConfigArgs) -> Result<Self> {
        let config = Config {
            listen_address: args.host,
            listen_port: args.port,
            database: args.database,
            user: args.user,
            encrypted_password: args.encrypted_password,
            log_level: args.log_level,
            storage_type: args.storage_type,
            storage_path: args.storage_path,
            init_sql_filepath: args.init_sql_filepath,
            aws: AwsConfig {
                credentials_type: args.aws_credentials_type,
                region: args.aws_region,
                s3_endpoint: args.aws_s3_endpoint,
                s3_bucket: args.aws_s3_bucket,
                access_key_id: args.aws_access_key_id,
                secret_access_key: args.aws_secret_access_key,
            },
            pg: PgConfig {
                database_url: args.pg_database_url,
            },
            disable_anonymous_analytics: args.disable_anonymous_analytics,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(FloeError::Config("database must not be empty".into()));
        }
        if self.user.is_empty() {
            return Err(FloeError::Config("user must not be empty".into()));
        }
        if self.storage_type == StorageType::S3 {
            if self.aws.s3_bucket.is_empty() {
                return Err(FloeError::Config(
                    "aws.s3_bucket is required when storage_type is S3".into(),
                ));
            }
            if self.aws.region.is_empty() {
                return Err(FloeError::Config(
                    "aws.region is required when storage_type is S3".into(),
                ));
            }
            if self.aws.credentials_type == Some(AwsCredentialsType::Static)
                && (self.aws.access_key_id.is_empty() || self.aws.secret_access_key.is_empty())
            {
                return Err(FloeError::Config(
                    "static AWS credentials require access_key_id and secret_access_key".into(),
                ));
            }
        }
        Ok(())
    }

    /// The `s3://bucket/prefix` form of the lakehouse root for the engine secret scope.
    pub fn s3_scope(&self) -> String {
        format!("s3://{}", self.aws.s3_bucket)
    }
}

/// Parse a compound duration of the `1h30m15s500ms` family.
///
/// Bare integers are rejected: an explicit unit keeps `--interval=60`
/// ambiguity out of deployments.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(FloeError::Config("empty duration".into()));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();
    let mut saw_component = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(FloeError::Config(format!("invalid duration '{input}'")));
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| FloeError::Config(format!("invalid duration '{input}'")))?;
        digits.clear();

        let unit = match c {
            'h' => Duration::from_secs(value * 3600),
            'm' => {
                if chars.peek() == Some(&'s') {
                    chars.next();
                    Duration::from_millis(value)
                } else {
                    Duration::from_secs(value * 60)
                }
            }
            's' => Duration::from_secs(value),
            _ => {
                return Err(FloeError::Config(format!(
                    "invalid duration unit '{c}' in '{input}'"
                )))
            }
        };
        total += unit;
        saw_component = true;
    }

    if !digits.is_empty() || !saw_component {
        return Err(FloeError::Config(format!(
            "invalid duration '{input}' (expected forms like 90s, 10m, 1h30m)"
        )));
    }
    Ok(total)
}
