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

//! Table pass: `FROM`/`JOIN` references.
//!
//! The pass runs in three phases so that no engine or reader I/O happens
//! inside the AST visitor: collect every relation, classify and refresh the
//! shim once if any trigger fired, then rewrite with the resolved metadata
//! paths. A rewritten tree references only `main.*` shim objects, engine-native
//! `pg_catalog`/`information_schema` relations, or `iceberg_scan(..)` calls.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Query, Select, Statement, TableFactor, Value, VisitMut,
    VisitorMut,
};

use crate::catalog::{self, CatalogShim, MAX_REDUNDANT_PG_NAMESPACE_OID};
use crate::error::{FloeError, Result};
use crate::iceberg::IcebergSchemaTable;

use super::{
    escape_single_quotes, for_each_select_mut, ident_sql, make_ident, object_name_key,
    parse_table_factor, split_object_name, QuerySchemaTable, ENGINE_SCHEMA_MAIN,
    PG_SCHEMA_INFORMATION_SCHEMA, PG_SCHEMA_PG_CATALOG, PG_SCHEMA_PUBLIC,
};

/// Run the table pass over one statement.
pub(crate) async fn run(shim: &CatalogShim, statement: &mut Statement) -> Result<()> {
    let mut collector = Collector::default();
    let _ = statement.visit(&mut collector);

    let plan = classify(shim, &collector).await?;

    let mut rewriter = Rewriter {
        decisions: plan.decisions,
        namespace_keys: plan.namespace_keys,
        err: None,
    };
    let _ = statement.visit(&mut rewriter);
    match rewriter.err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Phase 1: collect relations
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CollectedRef {
    key: String,
    table: QuerySchemaTable,
}

#[derive(Default)]
struct Collector {
    refs: Vec<CollectedRef>,
    cte_names: BTreeSet<String>,
}

impl VisitorMut for Collector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names
                    .insert(cte.alias.name.value.to_ascii_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(
        &mut self,
        table_factor: &mut TableFactor,
    ) -> ControlFlow<Self::Break> {
        // Table functions belong to the function pass.
        if let TableFactor::Table {
            name,
            alias,
            args: None,
            ..
        } = table_factor
        {
            let (schema, table) = split_object_name(name);
            self.refs.push(CollectedRef {
                key: object_name_key(name),
                table: QuerySchemaTable {
                    schema,
                    table,
                    alias: alias
                        .as_ref()
                        .map(|a| a.name.value.clone())
                        .unwrap_or_default(),
                },
            });
        }
        ControlFlow::Continue(())
    }
}

// ---------------------------------------------------------------------------
// Phase 2: classify, refresh, resolve
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Decision {
    /// Engine resolves this reference natively.
    Leave,
    /// Shim-owned `pg_catalog` object: qualify to `main`.
    QualifyMain,
    /// Lakehouse table: replace with an `iceberg_scan` call.
    IcebergScan {
        path: String,
        target: IcebergSchemaTable,
    },
}

struct Plan {
    decisions: BTreeMap<String, Decision>,
    /// Keys of `pg_namespace` references needing the oid filter.
    namespace_keys: BTreeSet<String>,
}

async fn classify(shim: &CatalogShim, collector: &Collector) -> Result<Plan> {
    let mut decisions: BTreeMap<String, Decision> = BTreeMap::new();
    let mut namespace_keys = BTreeSet::new();
    let mut lakehouse: Vec<(String, IcebergSchemaTable)> = Vec::new();
    let mut needs_refresh = false;
    let mut needs_stats = false;

    for reference in &collector.refs {
        if decisions.contains_key(&reference.key) {
            continue;
        }
        let schema = reference.table.schema.as_str();
        let table = reference.table.table.as_str();

        // Already-remapped trees and explicit engine references stay put.
        if schema == ENGINE_SCHEMA_MAIN {
            decisions.insert(reference.key.clone(), Decision::Leave);
            continue;
        }

        // CTE names shadow everything else.
        if schema.is_empty() && collector.cte_names.contains(table) {
            decisions.insert(reference.key.clone(), Decision::Leave);
            continue;
        }

        // Unqualified system names resolve to pg_catalog unless an Iceberg
        // table of the same name shadows them in public.
        let unqualified_system = schema.is_empty()
            && catalog::is_system_table(table)
            && !shim
                .contains(&IcebergSchemaTable::new(PG_SCHEMA_PUBLIC, table))
                .await;

        if schema == PG_SCHEMA_PG_CATALOG || unqualified_system {
            match table {
                "pg_class" => needs_refresh = true,
                "pg_stat_user_tables" => {
                    needs_refresh = true;
                    needs_stats = true;
                }
                "pg_namespace" => {
                    namespace_keys.insert(reference.key.clone());
                }
                _ => {}
            }
            let decision = if shim.is_catalog_object(table) {
                Decision::QualifyMain
            } else {
                Decision::Leave
            };
            decisions.insert(reference.key.clone(), decision);
            continue;
        }

        if schema == PG_SCHEMA_INFORMATION_SCHEMA {
            if table == "tables" {
                needs_refresh = true;
            }
            decisions.insert(reference.key.clone(), Decision::Leave);
            continue;
        }

        let target = reference.table.to_iceberg();
        if !shim.contains(&target).await {
            needs_refresh = true;
        }
        lakehouse.push((reference.key.clone(), target));
    }

    // One refresh covers every trigger that fired for this statement.
    if needs_refresh {
        shim.refresh().await?;
    }
    if needs_stats {
        shim.upsert_pg_stat_user_tables().await?;
    }

    for (key, target) in lakehouse {
        if decisions.contains_key(&key) {
            continue;
        }
        let decision = if shim.contains(&target).await {
            let path = shim.metadata_file_path(&target).await?;
            Decision::IcebergScan { path, target }
        } else {
            // Unknown after refresh: the engine's own catalog error is the
            // right answer.
            Decision::Leave
        };
        decisions.insert(key, decision);
    }

    Ok(Plan {
        decisions,
        namespace_keys,
    })
}

// ---------------------------------------------------------------------------
// Phase 3: rewrite
// ---------------------------------------------------------------------------

struct Rewriter {
    decisions: BTreeMap<String, Decision>,
    namespace_keys: BTreeSet<String>,
    err: Option<FloeError>,
}

impl VisitorMut for Rewriter {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        if !self.namespace_keys.is_empty() {
            let keys = self.namespace_keys.clone();
            for_each_select_mut(&mut query.body, &mut |select| {
                inject_namespace_filter(select, &keys);
            });
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(
        &mut self,
        table_factor: &mut TableFactor,
    ) -> ControlFlow<Self::Break> {
        if self.err.is_some() {
            return ControlFlow::Break(());
        }
        let decision = match table_factor {
            TableFactor::Table {
                name, args: None, ..
            } => self.decisions.get(&object_name_key(name)).cloned(),
            _ => None,
        };
        match decision {
            Some(Decision::QualifyMain) => {
                if let TableFactor::Table { name, .. } = table_factor {
                    if let Some(last) = name.0.last().cloned() {
                        name.0 = vec![Ident::new(ENGINE_SCHEMA_MAIN), last];
                    }
                }
            }
            Some(Decision::IcebergScan { path, target }) => {
                if let Err(e) = rewrite_to_iceberg_scan(table_factor, &path, &target) {
                    self.err = Some(e);
                    return ControlFlow::Break(());
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn rewrite_to_iceberg_scan(
    table_factor: &mut TableFactor,
    path: &str,
    target: &IcebergSchemaTable,
) -> Result<()> {
    let user_alias = match table_factor {
        TableFactor::Table { alias, .. } => alias.take(),
        _ => return Ok(()),
    };
    let alias_name = QuerySchemaTable {
        schema: target.schema.clone(),
        table: target.table.clone(),
        alias: user_alias
            .as_ref()
            .map(|a| a.name.value.clone())
            .unwrap_or_default(),
    }
    .engine_alias();

    let fragment = format!(
        "iceberg_scan('{}', skip_schema_inference = true) AS {}",
        escape_single_quotes(path),
        ident_sql(&alias_name)
    );
    let mut factor = parse_table_factor(&fragment)?;
    // A user alias may carry column renames; splice it back verbatim.
    if let (TableFactor::Table { alias, .. }, Some(user_alias)) = (&mut factor, user_alias) {
        *alias = Some(user_alias);
    }
    *table_factor = factor;
    Ok(())
}

/// Append `alias.oid > 1265` for every `pg_namespace` reference in this
/// SELECT, hiding the engine's internal namespaces. Skips conditions that are
/// already present so re-remapping stays a no-op.
fn inject_namespace_filter(select: &mut Select, namespace_keys: &BTreeSet<String>) {
    let mut aliases: Vec<String> = Vec::new();
    for twj in &select.from {
        for factor in std::iter::once(&twj.relation).chain(twj.joins.iter().map(|j| &j.relation)) {
            if let TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            } = factor
            {
                if namespace_keys.contains(&object_name_key(name)) {
                    let alias_name = alias
                        .as_ref()
                        .map(|a| a.name.value.clone())
                        .unwrap_or_else(|| "pg_namespace".to_string());
                    aliases.push(alias_name);
                }
            }
        }
    }

    for alias in aliases {
        let condition = Expr::BinaryOp {
            left: Box::new(Expr::CompoundIdentifier(vec![
                make_ident(&alias),
                Ident::new("oid"),
            ])),
            op: BinaryOperator::Gt,
            right: Box::new(Expr::Value(Value::Number(
                MAX_REDUNDANT_PG_NAMESPACE_OID.to_string(),
                false,
            ))),
        };
        let rendered = condition.to_string();
        let already_present = select
            .selection
            .as_ref()
            .map(|s| s.to_string().contains(&rendered))
            .unwrap_or(false);
        if already_present {
            continue;
        }
        select.selection = Some(match select.selection.take() {
            Some(existing) => Expr::BinaryOp {
                left: Box::new(existing),
                op: BinaryOperator::And,
                right: Box::new(condition),
            },
            None => condition,
        });
    }
}
