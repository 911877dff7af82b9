//! AST walk applying the namespace to every identifier position that can
//! name a table, view, or index.
//!
//! The walk mirrors the statement grammar: each arm touches the
//! identifiers that statement kind defines or references, then recurses
//! into any nested query or expression context that can itself contain a
//! qualified reference. Aliases introduced by the statement's own FROM
//! clauses are collected up front so a qualified column reference through
//! an alias keeps its qualifier untouched.

use std::collections::HashSet;

use crate::TableNamespace;
use sqlparser::ast::{
    AlterTableOperation, ColumnDef, ColumnOption, Cte, Delete, Expr, FromTable, FunctionArg,
    FunctionArgExpr, FunctionArguments, GroupByExpr, Insert, Join, JoinConstraint, JoinOperator,
    ObjectName, ObjectType, Query, Select, SelectItem, SetExpr, Statement, TableAlias,
    TableConstraint, TableFactor, TableWithJoins,
};

/// One statement's rewrite context: the namespace plus every alias the
/// statement introduces (lowercased; SQLite identifiers compare
/// case-insensitively).
struct Scope<'a> {
    ns: &'a TableNamespace,
    aliases: HashSet<String>,
}

impl Scope<'_> {
    fn apply(&self, name: &str) -> String {
        self.ns.apply(name)
    }

    fn is_alias(&self, ident: &str) -> bool {
        self.aliases.contains(&ident.to_ascii_lowercase())
    }
}

pub(crate) fn rewrite_statement(stmt: &mut Statement, ns: &TableNamespace) {
    let mut aliases = HashSet::new();
    collect_statement_aliases(stmt, &mut aliases);
    statement(stmt, &Scope { ns, aliases });
}

/// Rewrite for a statement inside a trigger body, where the implicit
/// `NEW` and `OLD` row references must keep their qualifiers.
pub(crate) fn rewrite_body_statement(stmt: &mut Statement, ns: &TableNamespace) {
    let mut aliases = row_aliases();
    collect_statement_aliases(stmt, &mut aliases);
    statement(stmt, &Scope { ns, aliases });
}

/// Rewrite for a trigger WHEN clause, standing alone outside a statement.
pub(crate) fn rewrite_trigger_condition(expr: &mut Expr, ns: &TableNamespace) {
    let mut aliases = row_aliases();
    collect_expr_aliases(expr, &mut aliases);
    rewrite_expr(expr, &Scope { ns, aliases });
}

fn row_aliases() -> HashSet<String> {
    ["new", "old"].iter().map(|s| s.to_string()).collect()
}

fn statement(stmt: &mut Statement, scope: &Scope) {
    match stmt {
        Statement::Query(query) => rewrite_query(query, scope),
        Statement::Insert(Insert {
            table_name, source, ..
        }) => {
            rewrite_object_name(table_name, scope);
            if let Some(source) = source {
                rewrite_query(source, scope);
            }
        }
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => {
            rewrite_table_with_joins(table, scope);
            for assignment in assignments {
                rewrite_expr(&mut assignment.value, scope);
            }
            if let Some(from) = from {
                rewrite_table_with_joins(from, scope);
            }
            if let Some(selection) = selection {
                rewrite_expr(selection, scope);
            }
        }
        Statement::Delete(Delete {
            tables,
            from,
            using,
            selection,
            ..
        }) => {
            for table in tables {
                rewrite_object_name(table, scope);
            }
            let from_tables = match from {
                FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
            };
            for table in from_tables {
                rewrite_table_with_joins(table, scope);
            }
            if let Some(using) = using {
                for table in using {
                    rewrite_table_with_joins(table, scope);
                }
            }
            if let Some(selection) = selection {
                rewrite_expr(selection, scope);
            }
        }
        Statement::CreateTable {
            name,
            columns,
            constraints,
            query,
            ..
        } => {
            rewrite_object_name(name, scope);
            for column in columns {
                rewrite_column_def(column, scope);
            }
            for constraint in constraints {
                rewrite_table_constraint(constraint, scope);
            }
            if let Some(query) = query {
                rewrite_query(query, scope);
            }
        }
        Statement::CreateView { name, query, .. } => {
            rewrite_object_name(name, scope);
            rewrite_query(query, scope);
        }
        Statement::CreateIndex {
            name, table_name, ..
        } => {
            if let Some(name) = name {
                rewrite_object_name(name, scope);
            }
            rewrite_object_name(table_name, scope);
        }
        Statement::AlterTable {
            name, operations, ..
        } => {
            rewrite_object_name(name, scope);
            for op in operations {
                match op {
                    AlterTableOperation::RenameTable { table_name } => {
                        rewrite_object_name(table_name, scope);
                    }
                    AlterTableOperation::AddConstraint(constraint) => {
                        rewrite_table_constraint(constraint, scope);
                    }
                    AlterTableOperation::AddColumn { column_def, .. } => {
                        rewrite_column_def(column_def, scope);
                    }
                    _ => {}
                }
            }
        }
        Statement::Drop {
            object_type, names, ..
        } => {
            if matches!(
                object_type,
                ObjectType::Table | ObjectType::View | ObjectType::Index
            ) {
                for name in names {
                    rewrite_object_name(name, scope);
                }
            }
        }
        Statement::Analyze { table_name, .. } => rewrite_object_name(table_name, scope),
        Statement::Explain { statement: inner, .. } => statement(inner, scope),
        _ => {}
    }
}

fn rewrite_query(query: &mut Query, scope: &Scope) {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            rewrite_cte(cte, scope);
        }
    }
    rewrite_set_expr(&mut query.body, scope);
    for order in &mut query.order_by {
        rewrite_expr(&mut order.expr, scope);
    }
    if let Some(limit) = &mut query.limit {
        rewrite_expr(limit, scope);
    }
    if let Some(offset) = &mut query.offset {
        rewrite_expr(&mut offset.value, scope);
    }
}

fn rewrite_cte(cte: &mut Cte, scope: &Scope) {
    cte.alias.name.value = scope.apply(&cte.alias.name.value);
    rewrite_query(&mut cte.query, scope);
}

fn rewrite_set_expr(body: &mut SetExpr, scope: &Scope) {
    match body {
        SetExpr::Select(select) => rewrite_select(select, scope),
        SetExpr::Query(query) => rewrite_query(query, scope),
        SetExpr::SetOperation { left, right, .. } => {
            rewrite_set_expr(left, scope);
            rewrite_set_expr(right, scope);
        }
        SetExpr::Values(values) => {
            for row in &mut values.rows {
                for expr in row {
                    rewrite_expr(expr, scope);
                }
            }
        }
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) => statement(stmt, scope),
        SetExpr::Table(_) => {}
    }
}

fn rewrite_select(select: &mut Select, scope: &Scope) {
    for item in &mut select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                rewrite_expr(expr, scope);
            }
            SelectItem::QualifiedWildcard(name, _) => rewrite_object_name(name, scope),
            SelectItem::Wildcard(_) => {}
        }
    }
    for table in &mut select.from {
        rewrite_table_with_joins(table, scope);
    }
    if let Some(selection) = &mut select.selection {
        rewrite_expr(selection, scope);
    }
    if let GroupByExpr::Expressions(exprs) = &mut select.group_by {
        for expr in exprs {
            rewrite_expr(expr, scope);
        }
    }
    if let Some(having) = &mut select.having {
        rewrite_expr(having, scope);
    }
    for expr in &mut select.sort_by {
        rewrite_expr(expr, scope);
    }
}

fn rewrite_table_with_joins(table: &mut TableWithJoins, scope: &Scope) {
    rewrite_table_factor(&mut table.relation, scope);
    for join in &mut table.joins {
        rewrite_join(join, scope);
    }
}

fn rewrite_join(join: &mut Join, scope: &Scope) {
    rewrite_table_factor(&mut join.relation, scope);
    match &mut join.join_operator {
        JoinOperator::Inner(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint)
        | JoinOperator::LeftSemi(constraint)
        | JoinOperator::RightSemi(constraint)
        | JoinOperator::LeftAnti(constraint)
        | JoinOperator::RightAnti(constraint) => rewrite_join_constraint(constraint, scope),
        _ => {}
    }
}

fn rewrite_join_constraint(constraint: &mut JoinConstraint, scope: &Scope) {
    if let JoinConstraint::On(expr) = constraint {
        rewrite_expr(expr, scope);
    }
}

fn rewrite_table_factor(factor: &mut TableFactor, scope: &Scope) {
    match factor {
        TableFactor::Table { name, .. } => rewrite_object_name(name, scope),
        TableFactor::Derived { subquery, .. } => rewrite_query(subquery, scope),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => rewrite_table_with_joins(table_with_joins, scope),
        _ => {}
    }
}

fn rewrite_column_def(column: &mut ColumnDef, scope: &Scope) {
    for option in &mut column.options {
        match &mut option.option {
            ColumnOption::ForeignKey { foreign_table, .. } => {
                rewrite_object_name(foreign_table, scope);
            }
            ColumnOption::Check(expr) => rewrite_expr(expr, scope),
            _ => {}
        }
    }
}

fn rewrite_table_constraint(constraint: &mut TableConstraint, scope: &Scope) {
    match constraint {
        TableConstraint::ForeignKey { foreign_table, .. } => {
            rewrite_object_name(foreign_table, scope);
        }
        TableConstraint::Check { expr, .. } => rewrite_expr(expr, scope),
        _ => {}
    }
}

fn rewrite_expr(expr: &mut Expr, scope: &Scope) {
    match expr {
        // `table.column` — the qualifier is a table reference unless it
        // names an alias in scope.
        Expr::CompoundIdentifier(idents) => {
            if idents.len() == 2 && !scope.is_alias(&idents[0].value) {
                idents[0].value = scope.apply(&idents[0].value);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            rewrite_expr(left, scope);
            rewrite_expr(right, scope);
        }
        Expr::UnaryOp { expr, .. } => rewrite_expr(expr, scope),
        Expr::Nested(inner) => rewrite_expr(inner, scope),
        Expr::Cast { expr, .. } => rewrite_expr(expr, scope),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(operand) = operand {
                rewrite_expr(operand, scope);
            }
            for condition in conditions {
                rewrite_expr(condition, scope);
            }
            for result in results {
                rewrite_expr(result, scope);
            }
            if let Some(else_result) = else_result {
                rewrite_expr(else_result, scope);
            }
        }
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => rewrite_query(subquery, scope),
        Expr::InSubquery { expr, subquery, .. } => {
            rewrite_expr(expr, scope);
            rewrite_query(subquery, scope);
        }
        Expr::InList { expr, list, .. } => {
            rewrite_expr(expr, scope);
            for item in list {
                rewrite_expr(item, scope);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            rewrite_expr(expr, scope);
            rewrite_expr(low, scope);
            rewrite_expr(high, scope);
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. } => {
            rewrite_expr(expr, scope);
            rewrite_expr(pattern, scope);
        }
        Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner)
        | Expr::IsUnknown(inner)
        | Expr::IsNotUnknown(inner) => rewrite_expr(inner, scope),
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &mut func.args {
                for arg in &mut list.args {
                    let arg_expr = match arg {
                        FunctionArg::Named { arg, .. } => arg,
                        FunctionArg::Unnamed(arg) => arg,
                    };
                    match arg_expr {
                        FunctionArgExpr::Expr(expr) => rewrite_expr(expr, scope),
                        FunctionArgExpr::QualifiedWildcard(name) => {
                            rewrite_object_name(name, scope);
                        }
                        FunctionArgExpr::Wildcard => {}
                    }
                }
            }
            if let FunctionArguments::Subquery(query) = &mut func.args {
                rewrite_query(query, scope);
            }
            if let Some(filter) = &mut func.filter {
                rewrite_expr(filter, scope);
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                rewrite_expr(item, scope);
            }
        }
        _ => {}
    }
}

/// Applies the namespace to the final segment of a (possibly qualified)
/// object name.
fn rewrite_object_name(name: &mut ObjectName, scope: &Scope) {
    if let Some(last) = name.0.last_mut() {
        last.value = scope.apply(&last.value);
    }
}

// ── Alias collection ─────────────────────────────────────────────────
//
// A flat set per statement is enough: a skipped qualifier can only
// resolve against the statement's own (already rewritten or aliased)
// FROM sources, so skipping never reaches another plugin's tables.

fn note_alias(alias: &Option<TableAlias>, out: &mut HashSet<String>) {
    if let Some(alias) = alias {
        out.insert(alias.name.value.to_ascii_lowercase());
    }
}

fn collect_statement_aliases(stmt: &Statement, out: &mut HashSet<String>) {
    match stmt {
        Statement::Query(query) => collect_query_aliases(query, out),
        Statement::Insert(Insert {
            table_alias,
            source,
            ..
        }) => {
            if let Some(alias) = table_alias {
                out.insert(alias.value.to_ascii_lowercase());
            }
            if let Some(source) = source {
                collect_query_aliases(source, out);
            }
        }
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => {
            collect_table_aliases(table, out);
            for assignment in assignments {
                collect_expr_aliases(&assignment.value, out);
            }
            if let Some(from) = from {
                collect_table_aliases(from, out);
            }
            if let Some(selection) = selection {
                collect_expr_aliases(selection, out);
            }
        }
        Statement::Delete(Delete {
            from,
            using,
            selection,
            ..
        }) => {
            let from_tables = match from {
                FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
            };
            for table in from_tables {
                collect_table_aliases(table, out);
            }
            if let Some(using) = using {
                for table in using {
                    collect_table_aliases(table, out);
                }
            }
            if let Some(selection) = selection {
                collect_expr_aliases(selection, out);
            }
        }
        Statement::CreateTable {
            query: Some(query), ..
        } => collect_query_aliases(query, out),
        Statement::CreateView { query, .. } => collect_query_aliases(query, out),
        Statement::Explain { statement, .. } => collect_statement_aliases(statement, out),
        _ => {}
    }
}

fn collect_query_aliases(query: &Query, out: &mut HashSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_query_aliases(&cte.query, out);
        }
    }
    collect_set_expr_aliases(&query.body, out);
    for order in &query.order_by {
        collect_expr_aliases(&order.expr, out);
    }
}

fn collect_set_expr_aliases(body: &SetExpr, out: &mut HashSet<String>) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.projection {
                match item {
                    SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                        collect_expr_aliases(expr, out);
                    }
                    _ => {}
                }
            }
            for table in &select.from {
                collect_table_aliases(table, out);
            }
            if let Some(selection) = &select.selection {
                collect_expr_aliases(selection, out);
            }
            if let Some(having) = &select.having {
                collect_expr_aliases(having, out);
            }
        }
        SetExpr::Query(query) => collect_query_aliases(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_aliases(left, out);
            collect_set_expr_aliases(right, out);
        }
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) => collect_statement_aliases(stmt, out),
        _ => {}
    }
}

fn collect_table_aliases(table: &TableWithJoins, out: &mut HashSet<String>) {
    collect_factor_aliases(&table.relation, out);
    for join in &table.joins {
        collect_factor_aliases(&join.relation, out);
        match &join.join_operator {
            JoinOperator::Inner(JoinConstraint::On(expr))
            | JoinOperator::LeftOuter(JoinConstraint::On(expr))
            | JoinOperator::RightOuter(JoinConstraint::On(expr))
            | JoinOperator::FullOuter(JoinConstraint::On(expr)) => {
                collect_expr_aliases(expr, out);
            }
            _ => {}
        }
    }
}

fn collect_factor_aliases(factor: &TableFactor, out: &mut HashSet<String>) {
    match factor {
        TableFactor::Table { alias, .. } => note_alias(alias, out),
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            note_alias(alias, out);
            collect_query_aliases(subquery, out);
        }
        TableFactor::NestedJoin {
            table_with_joins,
            alias,
        } => {
            note_alias(alias, out);
            collect_table_aliases(table_with_joins, out);
        }
        _ => {}
    }
}

fn collect_expr_aliases(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
            collect_query_aliases(subquery, out);
        }
        Expr::InSubquery { expr, subquery, .. } => {
            collect_expr_aliases(expr, out);
            collect_query_aliases(subquery, out);
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr_aliases(left, out);
            collect_expr_aliases(right, out);
        }
        Expr::UnaryOp { expr, .. } | Expr::Cast { expr, .. } => collect_expr_aliases(expr, out),
        Expr::Nested(inner) => collect_expr_aliases(inner, out),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(operand) = operand {
                collect_expr_aliases(operand, out);
            }
            for condition in conditions {
                collect_expr_aliases(condition, out);
            }
            for result in results {
                collect_expr_aliases(result, out);
            }
            if let Some(else_result) = else_result {
                collect_expr_aliases(else_result, out);
            }
        }
        Expr::InList { expr, list, .. } => {
            collect_expr_aliases(expr, out);
            for item in list {
                collect_expr_aliases(item, out);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_expr_aliases(expr, out);
            collect_expr_aliases(low, out);
            collect_expr_aliases(high, out);
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. } => {
            collect_expr_aliases(expr, out);
            collect_expr_aliases(pattern, out);
        }
        Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner)
        | Expr::IsUnknown(inner)
        | Expr::IsNotUnknown(inner) => collect_expr_aliases(inner, out),
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    let arg_expr = match arg {
                        FunctionArg::Named { arg, .. } => arg,
                        FunctionArg::Unnamed(arg) => arg,
                    };
                    if let FunctionArgExpr::Expr(expr) = arg_expr {
                        collect_expr_aliases(expr, out);
                    }
                }
            }
            if let FunctionArguments::Subquery(query) = &func.args {
                collect_query_aliases(query, out);
            }
            if let Some(filter) = &func.filter {
                collect_expr_aliases(filter, out);
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                collect_expr_aliases(item, out);
            }
        }
        _ => {}
    }
}
