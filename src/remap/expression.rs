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

//! Expression pass: casts, operators, column references.
//!
//! The last pass. Everything here is a pure, local rewrite keyed on the node
//! shape; `regclass` lookups become sub-selects against the catalog tables the
//! earlier passes left resolvable.

use std::ops::ControlFlow;

use sqlparser::ast::{
    Array, BinaryOperator, Expr, Ident, Query, SelectItem, Statement, Value, VisitMut, VisitorMut,
};

use crate::error::{FloeError, Result};

use super::{
    escape_single_quotes, for_each_select_mut, parse_scalar_expr, PG_SCHEMA_INFORMATION_SCHEMA,
    PG_SCHEMA_PG_CATALOG, PG_SCHEMA_PUBLIC,
};

/// Run the expression pass over one statement.
pub(crate) fn run(statement: &mut Statement) -> Result<()> {
    let mut pass = ExpressionPass { err: None };
    let _ = statement.visit(&mut pass);
    match pass.err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct ExpressionPass {
    err: Option<FloeError>,
}

impl VisitorMut for ExpressionPass {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        // SELECT-list synthesis: bare constants get the name PostgreSQL would
        // give them, so `SELECT 1` describes as `?column?`.
        for_each_select_mut(&mut query.body, &mut |select| {
            for item in &mut select.projection {
                if matches!(item, SelectItem::UnnamedExpr(Expr::Value(_))) {
                    if let SelectItem::UnnamedExpr(expr) = std::mem::replace(
                        item,
                        SelectItem::UnnamedExpr(Expr::Value(Value::Null)),
                    ) {
                        *item = SelectItem::ExprWithAlias {
                            expr,
                            alias: Ident::with_quote('"', "?column?"),
                        };
                    }
                }
            }
        });
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        if self.err.is_some() {
            return ControlFlow::Break(());
        }
        match self.rewrite_expr(expr) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                self.err = Some(e);
                ControlFlow::Break(())
            }
        }
    }
}

impl ExpressionPass {
    fn rewrite_expr(&mut self, expr: &mut Expr) -> Result<()> {
        if let Some(replacement) = cast_replacement(expr)? {
            *expr = replacement;
            return Ok(());
        }
        if let Some(replacement) = any_array_replacement(expr) {
            *expr = replacement;
            return Ok(());
        }
        rewrite_pg_catalog_operator(expr);
        rewrite_column_reference(expr);
        if let Some(replacement) = collate_replacement(expr) {
            *expr = replacement;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Type casts
// ---------------------------------------------------------------------------

fn cast_replacement(expr: &Expr) -> Result<Option<Expr>> {
    let Expr::Cast {
        expr: inner,
        data_type,
        ..
    } = expr
    else {
        return Ok(None);
    };

    match data_type.to_string().to_ascii_uppercase().as_str() {
        // '{a,b,c}'::text[] -> ARRAY['a', 'b', 'c']
        "TEXT[]" => {
            if let Some(literal) = string_literal(inner) {
                if literal.trim_start().starts_with('{') {
                    return Ok(Some(array_from_pg_literal(&literal)));
                }
            }
            Ok(None)
        }
        // 'schema.function'::regproc -> 'function'
        "REGPROC" => {
            if let Some(literal) = string_literal(inner) {
                let last = literal.rsplit('.').next().unwrap_or(&literal);
                return Ok(Some(Expr::Value(Value::SingleQuotedString(
                    last.to_string(),
                ))));
            }
            Ok(None)
        }
        // 'schema.table'::regclass -> oid sub-select
        "REGCLASS" => {
            if let Some(literal) = string_literal(inner) {
                return Ok(Some(oid_subselect(&literal)?));
            }
            Ok(None)
        }
        // '...'::regclass::oid -> same sub-select, one cast peeled
        "OID" => {
            if let Expr::Cast {
                expr: nested_inner,
                data_type: nested_type,
                ..
            } = inner.as_ref()
            {
                if nested_type.to_string().eq_ignore_ascii_case("regclass") {
                    if let Some(literal) = string_literal(nested_inner) {
                        return Ok(Some(oid_subselect(&literal)?));
                    }
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn string_literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(Value::SingleQuotedString(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Turn `{a,"b c",d}` into `ARRAY['a', 'b c', 'd']`.
fn array_from_pg_literal(literal: &str) -> Expr {
    let trimmed = literal.trim();
    let body = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);
    let elem = body
        .split(',')
        .map(|item| {
            let item = item.trim().trim_matches('"');
            Expr::Value(Value::SingleQuotedString(item.to_string()))
        })
        .collect();
    Expr::Array(Array { elem, named: true })
}

/// The catalog lookup PostgreSQL performs for a `regclass` literal, expressed
/// against the placeholder-backed catalog. The namespace filter keeps the
/// sub-select stable under re-remapping (the table pass would inject the same
/// condition) and off the engine's internal namespaces.
fn oid_subselect(literal: &str) -> Result<Expr> {
    let (schema, table) = match literal.split_once('.') {
        Some((schema, table)) => (schema, table),
        None => (PG_SCHEMA_PUBLIC, literal),
    };
    parse_scalar_expr(&format!(
        "(SELECT c.oid FROM pg_catalog.pg_class c \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = '{}' AND c.relname = '{}' AND n.oid > {})",
        escape_single_quotes(schema),
        escape_single_quotes(table),
        crate::catalog::MAX_REDUNDANT_PG_NAMESPACE_OID
    ))
}

// ---------------------------------------------------------------------------
// `= ANY('{...}')`
// ---------------------------------------------------------------------------

fn any_array_replacement(expr: &Expr) -> Option<Expr> {
    let Expr::AnyOp {
        left,
        compare_op: BinaryOperator::Eq,
        right,
        ..
    } = expr
    else {
        return None;
    };
    let literal = string_literal(right)?;
    if !literal.trim_start().starts_with('{') {
        return None;
    }
    let Expr::Array(array) = array_from_pg_literal(&literal) else {
        return None;
    };
    Some(Expr::InList {
        expr: left.clone(),
        list: array.elem,
        negated: false,
    })
}

// ---------------------------------------------------------------------------
// OPERATOR(pg_catalog.op)
// ---------------------------------------------------------------------------

fn rewrite_pg_catalog_operator(expr: &mut Expr) {
    let Expr::BinaryOp { op, .. } = expr else {
        return;
    };
    let BinaryOperator::PGCustomBinaryOperator(parts) = op else {
        return;
    };
    if parts.len() != 2 || !parts[0].eq_ignore_ascii_case(PG_SCHEMA_PG_CATALOG) {
        return;
    }
    if let Some(plain) = plain_operator(&parts[1]) {
        *op = plain;
    }
}

fn plain_operator(symbol: &str) -> Option<BinaryOperator> {
    Some(match symbol {
        "=" => BinaryOperator::Eq,
        "<>" | "!=" => BinaryOperator::NotEq,
        "<" => BinaryOperator::Lt,
        ">" => BinaryOperator::Gt,
        "<=" => BinaryOperator::LtEq,
        ">=" => BinaryOperator::GtEq,
        "||" => BinaryOperator::StringConcat,
        "~" => BinaryOperator::PGRegexMatch,
        "~*" => BinaryOperator::PGRegexIMatch,
        "!~" => BinaryOperator::PGRegexNotMatch,
        "!~*" => BinaryOperator::PGRegexNotIMatch,
        "~~" => BinaryOperator::PGLikeMatch,
        "~~*" => BinaryOperator::PGILikeMatch,
        "!~~" => BinaryOperator::PGNotLikeMatch,
        "!~~*" => BinaryOperator::PGNotILikeMatch,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Column references and COLLATE
// ---------------------------------------------------------------------------

fn rewrite_column_reference(expr: &mut Expr) {
    let Expr::CompoundIdentifier(idents) = expr else {
        return;
    };
    if idents.len() != 3 {
        return;
    }
    let schema = idents[0].value.to_ascii_lowercase();
    if schema == PG_SCHEMA_PG_CATALOG || schema == PG_SCHEMA_INFORMATION_SCHEMA {
        return;
    }
    let table = idents[1].clone();
    let column = idents[2].clone();
    if schema == PG_SCHEMA_PUBLIC {
        *idents = vec![table, column];
    } else {
        // Matches the underscore-joined alias produced by the table pass.
        *idents = vec![Ident::new(format!("{}_{}", schema, table.value)), column];
    }
}

fn collate_replacement(expr: &Expr) -> Option<Expr> {
    let Expr::Collate { expr: inner, collation } = expr else {
        return None;
    };
    let is_default = collation
        .0
        .last()
        .map(|ident| ident.value.eq_ignore_ascii_case("default"))
        .unwrap_or(false);
    if is_default {
        Some((**inner).clone())
    } else {
        None
    }
}
