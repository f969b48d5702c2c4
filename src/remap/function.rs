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

//! Function pass: catalog function calls.
//!
//! Handles both positions a function can appear in: the FROM clause (table
//! functions such as `pg_get_keywords()`) and scalar expressions. Catalog
//! functions the engine knows under another name are renamed; the rest lose
//! their `pg_catalog.` qualifier so the engine resolves its own builtin.

use std::ops::ControlFlow;

use sqlparser::ast::{
    CastKind, DataType, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, ObjectName,
    Statement, TableFactor, Value, VisitMut, VisitorMut,
};

use crate::catalog::is_system_function;
use crate::error::{FloeError, Result};

use super::{parse_table_factor, QuerySchemaFunction, PG_SCHEMA_PG_CATALOG};

/// Keyword inventory behind the synthesized `pg_get_keywords()` rows:
/// (word, catcode, barelabel); the description columns derive from catcode.
const PG_KEYWORDS: &[(&str, &str, bool)] = &[
    ("abort", "U", true),
    ("all", "R", true),
    ("analyze", "U", true),
    ("and", "R", true),
    ("as", "R", false),
    ("asc", "R", true),
    ("begin", "U", true),
    ("between", "C", true),
    ("by", "U", true),
    ("commit", "U", true),
    ("create", "R", false),
    ("delete", "U", true),
    ("desc", "R", true),
    ("distinct", "R", true),
    ("from", "R", false),
    ("group", "R", false),
    ("having", "R", false),
    ("insert", "U", true),
    ("join", "T", true),
    ("limit", "R", true),
    ("order", "R", false),
    ("rollback", "U", true),
    ("select", "R", true),
    ("table", "R", false),
    ("update", "U", true),
    ("where", "R", false),
];

/// Run the function pass over one statement.
pub(crate) fn run(statement: &mut Statement) -> Result<()> {
    let mut pass = FunctionPass { err: None };
    let _ = statement.visit(&mut pass);
    match pass.err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct FunctionPass {
    err: Option<FloeError>,
}

impl VisitorMut for FunctionPass {
    type Break = ();

    fn pre_visit_table_factor(
        &mut self,
        table_factor: &mut TableFactor,
    ) -> ControlFlow<Self::Break> {
        if self.err.is_some() {
            return ControlFlow::Break(());
        }
        let function = match table_factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => schema_function(name),
            _ => return ControlFlow::Continue(()),
        };
        if !is_catalog_function(&function) {
            return ControlFlow::Continue(());
        }

        match function.function.as_str() {
            "pg_get_keywords" => {
                if let Err(e) = replace_with_keywords(table_factor) {
                    self.err = Some(e);
                    return ControlFlow::Break(());
                }
            }
            "pg_show_all_settings" => {
                if let TableFactor::Table {
                    name,
                    args: Some(args),
                    ..
                } = table_factor
                {
                    name.0 = vec![Ident::new("duckdb_settings")];
                    args.args.clear();
                }
            }
            "pg_is_in_recovery" => {
                if let Err(e) = replace_with_recovery_flag(table_factor) {
                    self.err = Some(e);
                    return ControlFlow::Break(());
                }
            }
            _ => strip_pg_catalog_qualifier(table_factor),
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        if self.err.is_some() {
            return ControlFlow::Break(());
        }

        enum Action {
            None,
            RecoveryFlag,
            StripQualifier,
        }

        let mut action = Action::None;
        if let Expr::Function(function) = expr {
            let reference = schema_function(&function.name);

            // array_upper(values, 1) -> len(values), with or without qualifier.
            if reference.function == "array_upper"
                && (reference.schema.is_empty() || reference.schema == PG_SCHEMA_PG_CATALOG)
            {
                if let FunctionArguments::List(list) = &mut function.args {
                    if list.args.len() == 2 && is_literal_one(&list.args[1]) {
                        function.name = ObjectName(vec![Ident::new("len")]);
                        list.args.truncate(1);
                        return ControlFlow::Continue(());
                    }
                }
            }

            if reference.schema == PG_SCHEMA_PG_CATALOG {
                if reference.function == "pg_is_in_recovery" {
                    action = Action::RecoveryFlag;
                } else {
                    action = Action::StripQualifier;
                }
            }
        }

        match action {
            Action::RecoveryFlag => *expr = false_bool_cast(),
            Action::StripQualifier => {
                if let Expr::Function(function) = expr {
                    if let Some(last) = function.name.0.last().cloned() {
                        function.name = ObjectName(vec![last]);
                    }
                }
            }
            Action::None => {}
        }
        ControlFlow::Continue(())
    }
}

fn schema_function(name: &ObjectName) -> QuerySchemaFunction {
    let (schema, function) = super::split_object_name(name);
    QuerySchemaFunction { schema, function }
}

fn is_catalog_function(function: &QuerySchemaFunction) -> bool {
    function.schema == PG_SCHEMA_PG_CATALOG
        || (function.schema.is_empty() && is_system_function(&function.function))
}

fn is_literal_one(arg: &FunctionArg) -> bool {
    matches!(
        arg,
        FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Value(Value::Number(n, _)))) if n == "1"
    )
}

/// `FALSE::BOOLEAN`, the engine-friendly spelling of "not in recovery".
fn false_bool_cast() -> Expr {
    Expr::Cast {
        kind: CastKind::DoubleColon,
        expr: Box::new(Expr::Value(Value::Boolean(false))),
        data_type: DataType::Boolean,
        format: None,
    }
}

fn replace_with_keywords(table_factor: &mut TableFactor) -> Result<()> {
    let user_alias = match table_factor {
        TableFactor::Table { alias, .. } => alias.take(),
        _ => return Ok(()),
    };

    let rows: Vec<String> = PG_KEYWORDS
        .iter()
        .map(|(word, catcode, barelabel)| {
            let catdesc = match *catcode {
                "R" => "reserved",
                "C" => "unreserved (cannot be function or type name)",
                "T" => "reserved (can be function or type name)",
                _ => "unreserved",
            };
            let baredesc = if *barelabel {
                "can be bare label"
            } else {
                "requires AS"
            };
            format!("('{word}', '{catcode}', {barelabel}, '{catdesc}', '{baredesc}')")
        })
        .collect();
    let fragment = format!(
        "(VALUES {}) AS pg_get_keywords(word, catcode, barelabel, catdesc, baredesc)",
        rows.join(", ")
    );

    let mut factor = parse_table_factor(&fragment)?;
    // Keep the caller's alias name; the synthesized column list stays.
    if let (TableFactor::Derived { alias: Some(alias), .. }, Some(user_alias)) =
        (&mut factor, user_alias)
    {
        alias.name = user_alias.name;
    }
    *table_factor = factor;
    Ok(())
}

fn replace_with_recovery_flag(table_factor: &mut TableFactor) -> Result<()> {
    let user_alias = match table_factor {
        TableFactor::Table { alias, .. } => alias.take(),
        _ => return Ok(()),
    };
    let mut factor =
        parse_table_factor("(SELECT FALSE::BOOLEAN AS pg_is_in_recovery) AS pg_is_in_recovery")?;
    if let (TableFactor::Derived { alias: Some(alias), .. }, Some(user_alias)) =
        (&mut factor, user_alias)
    {
        alias.name = user_alias.name;
    }
    *table_factor = factor;
    Ok(())
}

fn strip_pg_catalog_qualifier(table_factor: &mut TableFactor) {
    if let TableFactor::Table { name, .. } = table_factor {
        if let Some(last) = name.0.last().cloned() {
            name.0 = vec![last];
        }
    }
}
