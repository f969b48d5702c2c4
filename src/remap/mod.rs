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

//! AST remapper: PostgreSQL surface forms to engine dialect.
//!
//! Client SQL parses against PostgreSQL expectations the engine does not
//! share. Three ordered passes rewrite the tree in place:
//!
//! 1. **Table pass**: `FROM`/`JOIN` references. Shim-owned `pg_catalog`
//!    names are qualified to `main`, Iceberg tables become `iceberg_scan`
//!    calls, and the `pg_namespace` oid filter is injected.
//! 2. **Function pass**: catalog function calls, in both table and scalar
//!    position.
//! 3. **Expression pass**: casts, `ANY` arrays, `OPERATOR()` syntax,
//!    three-part column references, collations, select-list synthesis.
//!
//! The rewrite is idempotent: every surface form a pass targets is absent
//! from its output, so running the remapper over its own output changes
//! nothing.

pub mod expression;
pub mod function;
pub mod table;

use std::sync::Arc;

use sqlparser::ast::{Expr, Ident, ObjectName, SetExpr, Statement, TableFactor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::catalog::CatalogShim;
use crate::error::{FloeError, Result};
use crate::iceberg::IcebergSchemaTable;

pub const PG_SCHEMA_PG_CATALOG: &str = "pg_catalog";
pub const PG_SCHEMA_INFORMATION_SCHEMA: &str = "information_schema";
pub const PG_SCHEMA_PUBLIC: &str = "public";
/// The engine's default schema, home of the shim objects.
pub const ENGINE_SCHEMA_MAIN: &str = "main";

/// A table reference as written in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySchemaTable {
    /// Empty when the reference is unqualified.
    pub schema: String,
    pub table: String,
    /// Empty when the reference carries no alias.
    pub alias: String,
}

impl QuerySchemaTable {
    /// The lakehouse identity this reference would resolve to; unqualified
    /// references land in `public`.
    pub fn to_iceberg(&self) -> IcebergSchemaTable {
        let schema = if self.schema.is_empty() {
            PG_SCHEMA_PUBLIC
        } else {
            self.schema.as_str()
        };
        IcebergSchemaTable::new(schema, self.table.clone())
    }

    /// Alias the rewritten `iceberg_scan` call binds to. The underscore join
    /// keeps non-public schemas unique inside the engine's flat namespace.
    pub fn engine_alias(&self) -> String {
        if !self.alias.is_empty() {
            return self.alias.clone();
        }
        if self.schema.is_empty() || self.schema == PG_SCHEMA_PUBLIC {
            self.table.clone()
        } else {
            format!("{}_{}", self.schema, self.table)
        }
    }
}

/// A function reference as written in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySchemaFunction {
    pub schema: String,
    pub function: String,
}

/// Split an object name into `(schema, object)`, lowercased for matching.
/// Longer paths keep only the trailing two parts (catalog qualifiers are
/// meaningless to the engine).
pub(crate) fn split_object_name(name: &ObjectName) -> (String, String) {
    let parts = &name.0;
    match parts.len() {
        0 => (String::new(), String::new()),
        1 => (String::new(), parts[0].value.to_ascii_lowercase()),
        n => (
            parts[n - 2].value.to_ascii_lowercase(),
            parts[n - 1].value.to_ascii_lowercase(),
        ),
    }
}

/// Lowercased `schema.table` key for decision maps.
pub(crate) fn object_name_key(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

/// Double single quotes so a value can sit inside a SQL string literal.
pub(crate) fn escape_single_quotes(value: &str) -> String {
    value.replace('\'', "''")
}

/// An identifier for generated SQL: bare when trivially safe, quoted otherwise.
pub(crate) fn ident_sql(name: &str) -> String {
    let simple = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if simple {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Parse a generated FROM fragment into a `TableFactor`.
///
/// Generated SQL comes from fixed templates; a parse failure here is a
/// remapper bug, not user error.
pub(crate) fn parse_table_factor(fragment: &str) -> Result<TableFactor> {
    let sql = format!("SELECT * FROM {fragment}");
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql)
        .map_err(|e| FloeError::Invariant(format!("generated fragment `{fragment}`: {e}")))?;
    if let Some(Statement::Query(query)) = statements.pop() {
        if let SetExpr::Select(mut select) = *query.body {
            if let Some(twj) = select.from.pop() {
                return Ok(twj.relation);
            }
        }
    }
    Err(FloeError::Invariant(format!(
        "generated fragment `{fragment}` did not produce a table factor"
    )))
}

/// Parse a generated scalar expression.
pub(crate) fn parse_scalar_expr(expr_sql: &str) -> Result<Expr> {
    let sql = format!("SELECT {expr_sql}");
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql)
        .map_err(|e| FloeError::Invariant(format!("generated expression `{expr_sql}`: {e}")))?;
    if let Some(Statement::Query(query)) = statements.pop() {
        if let SetExpr::Select(mut select) = *query.body {
            if let Some(item) = select.projection.pop() {
                if let sqlparser::ast::SelectItem::UnnamedExpr(expr) = item {
                    return Ok(expr);
                }
            }
        }
    }
    Err(FloeError::Invariant(format!(
        "generated expression `{expr_sql}` did not produce an expression"
    )))
}

/// Run a closure over every `SELECT` in a set-expression tree, without
/// descending into nested `Query` nodes (the visitor reaches those itself).
pub(crate) fn for_each_select_mut(
    set_expr: &mut SetExpr,
    f: &mut impl FnMut(&mut sqlparser::ast::Select),
) {
    match set_expr {
        SetExpr::Select(select) => f(select),
        SetExpr::SetOperation { left, right, .. } => {
            for_each_select_mut(left, f);
            for_each_select_mut(right, f);
        }
        _ => {}
    }
}

/// Make an identifier for the engine SQL, quoting only when needed.
pub(crate) fn make_ident(name: &str) -> Ident {
    let simple = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if simple {
        Ident::new(name)
    } else {
        Ident::with_quote('"', name)
    }
}

/// The multi-pass PostgreSQL-to-engine AST rewriter.
pub struct QueryRemapper {
    shim: Arc<CatalogShim>,
}

impl QueryRemapper {
    pub fn new(shim: Arc<CatalogShim>) -> Self {
        QueryRemapper { shim }
    }

    /// Rewrite one parsed statement in place. The statement is fully rewritten
    /// before any execution begins; callers serialize the result afterwards.
    pub async fn remap(&self, statement: &mut Statement) -> Result<()> {
        table::run(&self.shim, statement).await?;
        function::run(statement)?;
        expression::run(statement)?;
        Ok(())
    }
}
