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

//! Per-connection query handling for both wire sub-protocols.
//!
//! Incoming SQL is fast-pathed (session utilities), parsed, gated to reads,
//! remapped, executed, and encoded. The Extended-Query flow stores raw SQL as
//! its statement form and answers `Describe` by executing once and caching
//! the result, the only reliable way to learn column metadata from a
//! text-oriented engine.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::sink::Sink;
use futures::stream;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeResponse, DescribeStatementResponse,
    FieldFormat, FieldInfo, QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::ClientPortalStore;
use pgwire::api::{ClientInfo, Type};
use pgwire::error::{PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tokio::sync::Mutex;
use tracing::debug;

use super::auth::SERVER_VERSION;
use super::encode;
use crate::engine::{EngineAdapter, QueryResult};
use crate::error::FloeError;
use crate::remap::QueryRemapper;

/// Per-connection handler; cheap to build, shares the process-wide engine.
pub struct FloeQueryHandler {
    engine: Arc<EngineAdapter>,
    remapper: Arc<QueryRemapper>,
    /// Results produced by Describe, consumed by the following Execute.
    describe_cache: Arc<Mutex<HashMap<String, QueryResult>>>,
}

impl FloeQueryHandler {
    pub fn new(engine: Arc<EngineAdapter>, remapper: Arc<QueryRemapper>) -> Self {
        FloeQueryHandler {
            engine,
            remapper,
            describe_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Full simple-protocol pipeline for one client query string.
    async fn execute_sql(&self, sql: &str) -> PgWireResult<Vec<Response>> {
        if let Some(tag) = utility_tag(sql) {
            return Ok(vec![Response::Execution(tag)]);
        }

        let statements = parse(sql)?;
        if statements.is_empty() {
            return Ok(vec![Response::EmptyQuery]);
        }

        let mut responses = Vec::with_capacity(statements.len());
        for statement in statements {
            responses.push(self.run_statement(statement).await?);
        }
        Ok(responses)
    }

    async fn run_statement(&self, statement: Statement) -> PgWireResult<Response> {
        match statement {
            Statement::Query(_) => {
                let mut statement = statement;
                self.remapper.remap(&mut statement).await?;
                let engine_sql = statement.to_string();
                debug!(sql = %engine_sql, "executing remapped query");
                let result = self.engine.query(&engine_sql).await?;
                let response = encode::query_response(&result, false)?;
                Ok(Response::Query(response))
            }

            Statement::ShowVariable { variable } => {
                let name = variable
                    .iter()
                    .map(|i| i.value.to_ascii_lowercase())
                    .collect::<Vec<_>>()
                    .join("_");
                Ok(Response::Query(show_response(&name)?))
            }

            // Session utilities that arrive as parsed statements.
            Statement::SetVariable { .. } | Statement::SetTimeZone { .. } => {
                Ok(Response::Execution(Tag::new("SET")))
            }
            Statement::StartTransaction { .. } => Ok(Response::Execution(Tag::new("BEGIN"))),
            Statement::Commit { .. } => Ok(Response::Execution(Tag::new("COMMIT"))),
            Statement::Rollback { .. } => Ok(Response::Execution(Tag::new("ROLLBACK"))),
            Statement::Discard { .. } => Ok(Response::Execution(Tag::new("DISCARD ALL"))),
            Statement::Deallocate { .. } => Ok(Response::Execution(Tag::new("DEALLOCATE"))),
            Statement::Close { .. } => Ok(Response::Execution(Tag::new("CLOSE"))),

            // Writes are refused outright; the lakehouse is read-only here.
            Statement::Insert { .. }
            | Statement::Update { .. }
            | Statement::Delete { .. }
            | Statement::Merge { .. }
            | Statement::Truncate { .. }
            | Statement::CreateTable { .. }
            | Statement::CreateView { .. }
            | Statement::CreateIndex { .. }
            | Statement::CreateSchema { .. }
            | Statement::AlterTable { .. }
            | Statement::Drop { .. } => {
                Err(FloeError::ReadOnly(statement_kind(&statement)).into())
            }

            other => Err(FloeError::Unsupported(statement_kind(&other)).into()),
        }
    }

    /// Describe path for the Extended-Query flow: remap, validate, execute
    /// once, cache the rows for the Execute that follows, return the schema.
    ///
    /// Columns are described as VARCHAR: Extended-Query clients routinely bind
    /// every column in binary format, and VARCHAR keeps the binary encoding
    /// identical to the text the engine produced.
    async fn describe_and_cache(&self, sql: &str) -> PgWireResult<Vec<FieldInfo>> {
        if utility_tag(sql).is_some() {
            return Ok(vec![]);
        }
        let statements = parse(sql)?;
        let Some(statement) = statements.into_iter().next() else {
            return Ok(vec![]);
        };
        if !matches!(statement, Statement::Query(_)) {
            return Ok(vec![]);
        }

        let mut statement = statement;
        self.remapper.remap(&mut statement).await?;
        let prepared = self.engine.prepare(&statement.to_string()).await?;
        let result = self.engine.query(&prepared.sql).await?;
        let fields = encode::row_description(&result, true);

        let mut cache = self.describe_cache.lock().await;
        cache.insert(sql.to_string(), result);
        Ok(fields)
    }
}

fn parse(sql: &str) -> PgWireResult<Vec<Statement>> {
    Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| FloeError::Parse(e.to_string()).into())
}

/// Statement name for error messages.
fn statement_kind(statement: &Statement) -> String {
    let rendered = statement.to_string();
    rendered
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_ascii_uppercase()
}

/// Session utilities acknowledged without parsing or touching the engine.
/// Only complete single statements take the fast path.
fn utility_tag(sql: &str) -> Option<Tag> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.contains(';') {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    let first = lower.split_whitespace().next()?;
    let tag = match first {
        "begin" => "BEGIN",
        "commit" | "end" => "COMMIT",
        "rollback" => "ROLLBACK",
        "discard" => "DISCARD ALL",
        "set" => "SET",
        "reset" => "RESET",
        "deallocate" => "DEALLOCATE",
        "close" => "CLOSE",
        _ => return None,
    };
    Some(Tag::new(tag))
}

/// Answer `SHOW <name>` from the session-parameter table.
fn show_response(name: &str) -> PgWireResult<QueryResponse> {
    let value = match name {
        "server_version" => SERVER_VERSION,
        "search_path" => "\"$user\", public",
        "transaction_isolation" | "transaction_isolation_level" => "read committed",
        "standard_conforming_strings" => "on",
        "timezone" => "UTC",
        "datestyle" => "ISO, MDY",
        "intervalstyle" => "postgres",
        "client_encoding" => "UTF8",
        "is_superuser" => "off",
        // Unknown settings answer with an empty value rather than an error;
        // clients probe settings speculatively during connection setup.
        _ => "",
    };

    let fields = Arc::new(vec![FieldInfo::new(
        name.to_string(),
        None,
        None,
        Type::TEXT,
        FieldFormat::Text,
    )]);
    let mut encoder = DataRowEncoder::new(fields.clone());
    encoder.encode_field(&Some(value.to_string()))?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(QueryResponse::new(fields, stream::iter(rows)))
}

// ---------------------------------------------------------------------------
// Simple Query protocol
// ---------------------------------------------------------------------------

#[async_trait]
impl SimpleQueryHandler for FloeQueryHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        debug!(sql = query, "simple query");
        self.execute_sql(query).await
    }
}

// ---------------------------------------------------------------------------
// Extended Query protocol
// ---------------------------------------------------------------------------

/// Stores the raw SQL as the prepared-statement form; parse errors surface at
/// Parse time with SQLSTATE 42601.
pub struct FloeQueryParser;

#[async_trait]
impl QueryParser for FloeQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        if utility_tag(sql).is_none() {
            parse(sql)?;
        }
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, _stmt: &String) -> PgWireResult<Vec<Type>> {
        // Bind parameters are not supported by the read path.
        Ok(vec![])
    }

    fn get_result_schema(
        &self,
        _stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        // Schema is learned at Describe time by executing the statement.
        Ok(vec![])
    }
}

#[async_trait]
impl ExtendedQueryHandler for FloeQueryHandler {
    type Statement = String;
    type QueryParser = FloeQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        Arc::new(FloeQueryParser)
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<String>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = String>,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        let query = portal.statement.statement.as_str();
        debug!(sql = query, "extended query");

        // Describe already ran the query; drain its cached result.
        {
            let mut cache = self.describe_cache.lock().await;
            if let Some(result) = cache.remove(query) {
                let response = encode::query_response(&result, true)?;
                return Ok(Response::Query(response));
            }
        }

        let mut responses = self.execute_sql(query).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        statement: &StoredStatement<String>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = String>,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        let fields = self.describe_and_cache(&statement.statement).await?;
        Ok(DescribeStatementResponse::new(vec![], fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        portal: &Portal<String>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = String>,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        let sql = &portal.statement.statement;
        let cache = self.describe_cache.lock().await;
        if let Some(result) = cache.get(sql.as_str()) {
            return Ok(DescribePortalResponse::new(encode::row_description(
                result, true,
            )));
        }
        Ok(DescribePortalResponse::no_data())
    }
}
