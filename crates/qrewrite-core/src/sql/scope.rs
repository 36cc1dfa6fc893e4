//! Scope-resolving pass over a parsed query.
//!
//! Every SELECT pushes a [`Frame`] holding the relations its FROM clause
//! exposes; WITH clauses push a CTE scope. Column references resolve from the
//! innermost frame outward, so correlated references find the enclosing
//! query. Relations whose column set cannot be known (table functions,
//! `UNNEST`, unknown wildcard expansions) make resolution lenient instead of
//! failing.

use super::analysis::{
    alias_column_name, children, contains_aggregate, expr_key, find_window_call, function_name,
    ident_key, implicit_name, is_aggregate_call, Child,
};
use crate::catalog::Catalog;
use crate::errors::{SyntaxError, SyntaxErrorKind};
use crate::model::Dialect;
use sqlparser::ast::{
    Expr, GroupByExpr, Ident, JoinConstraint, JoinOperator, OrderBy, Query, Select, SelectItem,
    SetExpr, TableFactor, TableWithJoins, Value as SqlValue,
};
use std::collections::{BTreeMap, BTreeSet};

const SUGGESTION_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationSource {
    Table,
    Cte,
    Derived,
    Opaque,
}

#[derive(Debug, Clone)]
struct Relation {
    name: String,
    source: RelationSource,
    columns: Option<Vec<String>>,
}

impl Relation {
    fn exposes(&self, column: &str) -> Option<bool> {
        self.columns
            .as_ref()
            .map(|cols| cols.iter().any(|c| c == column))
    }
}

#[derive(Debug, Default)]
struct Frame {
    relations: Vec<Relation>,
    aliases: Vec<(String, Expr)>,
    /// Columns merged by `USING` / `NATURAL` joins; never ambiguous.
    merged: BTreeSet<String>,
    opaque: bool,
}

impl Frame {
    fn alias(&self, name: &str) -> Option<&Expr> {
        self.aliases
            .iter()
            .find(|(a, _)| a == name)
            .map(|(_, e)| e)
    }

    fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Projection,
    JoinOn,
    Where,
    GroupBy,
    Having,
    Qualify,
    OrderBy,
}

impl Clause {
    fn label(&self) -> &'static str {
        match self {
            Clause::Projection => "SELECT",
            Clause::JoinOn => "JOIN ... ON",
            Clause::Where => "WHERE",
            Clause::GroupBy => "GROUP BY",
            Clause::Having => "HAVING",
            Clause::Qualify => "QUALIFY",
            Clause::OrderBy => "ORDER BY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved {
    /// `depth` 0 is the innermost SELECT.
    Column {
        depth: usize,
        relation: String,
        column: String,
    },
    Alias,
    Unknown,
}

pub(crate) struct Binder<'c> {
    catalog: &'c Catalog,
    dialect: Dialect,
    frames: Vec<Frame>,
    ctes: Vec<BTreeMap<String, Option<Vec<String>>>>,
    tables: BTreeSet<String>,
}

impl<'c> Binder<'c> {
    pub(crate) fn new(catalog: &'c Catalog, dialect: Dialect) -> Self {
        Self {
            catalog,
            dialect,
            frames: Vec::new(),
            ctes: Vec::new(),
            tables: BTreeSet::new(),
        }
    }

    /// Catalog tables referenced anywhere in the bound queries.
    pub(crate) fn into_tables(self) -> Vec<String> {
        self.tables.into_iter().collect()
    }

    /// Binds a query and returns its output column names when they are
    /// statically known.
    pub(crate) fn bind_query(&mut self, query: &Query) -> Result<Option<Vec<String>>, SyntaxError> {
        let scoped = if let Some(with) = &query.with {
            self.ctes.push(BTreeMap::new());
            for cte in &with.cte_tables {
                let name = ident_key(&cte.alias.name);
                let alias_cols: Vec<String> = cte
                    .alias
                    .columns
                    .iter()
                    .map(|c| alias_column_name(&c.to_string()))
                    .collect();
                if with.recursive {
                    let placeholder = (!alias_cols.is_empty()).then(|| alias_cols.clone());
                    self.declare_cte(&name, placeholder);
                }
                let cols = self.bind_query(&cte.query)?;
                let cols = if alias_cols.is_empty() {
                    cols
                } else {
                    Some(alias_cols)
                };
                self.declare_cte(&name, cols);
            }
            true
        } else {
            false
        };

        let result = match query.body.as_ref() {
            SetExpr::Select(select) => self.bind_select(select, query.order_by.as_ref()),
            other => {
                let names = self.bind_set_expr(other)?;
                if let (Some(order_by), Some(cols)) = (&query.order_by, &names) {
                    for o in &order_by.exprs {
                        if let Expr::Identifier(ident) = &o.expr {
                            let col = ident_key(ident);
                            if !cols.contains(&col) {
                                return Err(SyntaxError::new(
                                    SyntaxErrorKind::ColumnNotInFromScope,
                                    format!("ORDER BY column '{}' is not an output column of the set operation", col),
                                )
                                .with_identifier(col.clone())
                                .with_suggestion(suggest(&col, cols.iter().map(|c| c.as_str()))));
                            }
                        }
                    }
                }
                Ok(names)
            }
        };

        if scoped {
            self.ctes.pop();
        }
        result
    }

    fn declare_cte(&mut self, name: &str, cols: Option<Vec<String>>) {
        if let Some(scope) = self.ctes.last_mut() {
            scope.insert(name.to_string(), cols);
        }
    }

    fn lookup_cte(&self, name: &str) -> Option<&Option<Vec<String>>> {
        self.ctes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn bind_set_expr(&mut self, body: &SetExpr) -> Result<Option<Vec<String>>, SyntaxError> {
        match body {
            SetExpr::Select(select) => self.bind_select(select, None),
            SetExpr::Query(q) => self.bind_query(q),
            SetExpr::SetOperation { left, right, .. } => {
                let names = self.bind_set_expr(left)?;
                self.bind_set_expr(right)?;
                Ok(names)
            }
            SetExpr::Values(_) | SetExpr::Table(_) => Ok(None),
            _ => Err(SyntaxError::new(
                SyntaxErrorKind::UnsupportedStatement,
                "only read-only queries are accepted",
            )),
        }
    }

    fn bind_select(
        &mut self,
        select: &Select,
        order_by: Option<&OrderBy>,
    ) -> Result<Option<Vec<String>>, SyntaxError> {
        self.frames.push(Frame::default());
        let result = self.bind_select_in_frame(select, order_by);
        self.frames.pop();
        result
    }

    fn bind_select_in_frame(
        &mut self,
        select: &Select,
        order_by: Option<&OrderBy>,
    ) -> Result<Option<Vec<String>>, SyntaxError> {
        for item in &select.from {
            self.bind_from_item(item)?;
        }

        let aliases: Vec<(String, Expr)> = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::ExprWithAlias { expr, alias } => {
                    Some((ident_key(alias), expr.clone()))
                }
                _ => None,
            })
            .collect();
        self.frame_mut().aliases = aliases;

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
                    self.bind_expr(e, Clause::Projection)?
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qual = name.0.last().map(ident_key).unwrap_or_default();
                    let frame = self.frame();
                    if frame.relation(&qual).is_none() && !frame.opaque {
                        return Err(SyntaxError::new(
                            SyntaxErrorKind::ColumnNotInFromScope,
                            format!("'{}.*' names no relation in the FROM clause", qual),
                        )
                        .with_identifier(format!("{}.*", qual))
                        .with_suggestion(suggest(
                            &qual,
                            frame.relations.iter().map(|r| r.name.as_str()),
                        )));
                    }
                }
                SelectItem::Wildcard(_) => {}
            }
        }

        if let Some(selection) = &select.selection {
            self.reject_window(selection, Clause::Where)?;
            self.bind_expr(selection, Clause::Where)?;
        }

        let group_exprs: Vec<&Expr> = match &select.group_by {
            GroupByExpr::Expressions(exprs, _) => exprs.iter().collect(),
            GroupByExpr::All(_) => Vec::new(),
        };
        for g in &group_exprs {
            self.reject_window(g, Clause::GroupBy)?;
            self.bind_expr(g, Clause::GroupBy)?;
        }

        if let Some(having) = &select.having {
            self.reject_window(having, Clause::Having)?;
            self.bind_expr(having, Clause::Having)?;
        }

        if let Some(qualify) = &select.qualify {
            self.bind_expr(qualify, Clause::Qualify)?;
        }

        if let Some(order_by) = order_by {
            for o in &order_by.exprs {
                self.bind_expr(&o.expr, Clause::OrderBy)?;
            }
        }

        if !matches!(select.group_by, GroupByExpr::All(_)) {
            self.check_grouping(select, &group_exprs)?;
        }

        Ok(self.output_names(select))
    }

    fn frame(&self) -> &Frame {
        // bind_select always pushes before any frame access
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn bind_from_item(&mut self, item: &TableWithJoins) -> Result<(), SyntaxError> {
        self.bind_table_factor(&item.relation)?;
        for join in &item.joins {
            let before = self.frame().relations.len();
            self.bind_table_factor(&join.relation)?;
            let Some(constraint) = join_constraint(&join.join_operator) else {
                continue;
            };
            match constraint {
                JoinConstraint::On(expr) => self.bind_expr(expr, Clause::JoinOn)?,
                JoinConstraint::Using(cols) => {
                    let names: Vec<String> = cols
                        .iter()
                        .map(|c| {
                            let rendered = c.to_string();
                            let last = rendered.rsplit('.').next().unwrap_or_default();
                            alias_column_name(last)
                        })
                        .collect();
                    self.frame_mut().merged.extend(names);
                }
                JoinConstraint::Natural => {
                    let frame = self.frame();
                    let left: BTreeSet<String> = frame.relations[..before]
                        .iter()
                        .filter_map(|r| r.columns.clone())
                        .flatten()
                        .collect();
                    let right: BTreeSet<String> = frame.relations[before..]
                        .iter()
                        .filter_map(|r| r.columns.clone())
                        .flatten()
                        .collect();
                    let common: Vec<String> = left.intersection(&right).cloned().collect();
                    self.frame_mut().merged.extend(common);
                }
                JoinConstraint::None => {}
            }
        }
        Ok(())
    }

    fn bind_table_factor(&mut self, factor: &TableFactor) -> Result<(), SyntaxError> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                let table = name.0.last().map(ident_key).unwrap_or_default();
                let rel_name = alias
                    .as_ref()
                    .map(|a| ident_key(&a.name))
                    .unwrap_or_else(|| table.clone());

                if args.is_some() {
                    self.push_opaque(rel_name);
                    return Ok(());
                }

                let cte = if name.0.len() == 1 {
                    self.lookup_cte(&table).cloned()
                } else {
                    None
                };
                let (source, columns) = match cte {
                    Some(cols) => (RelationSource::Cte, cols),
                    None => match self.catalog.table(&table) {
                        Some(t) => {
                            self.tables.insert(t.name.clone());
                            (RelationSource::Table, Some(t.columns.clone()))
                        }
                        None => {
                            let mut pool: Vec<String> = self
                                .ctes
                                .iter()
                                .flat_map(|s| s.keys().cloned())
                                .collect();
                            pool.extend(self.catalog.table_names().map(str::to_string));
                            return Err(SyntaxError::new(
                                SyntaxErrorKind::UndefinedTableReference,
                                format!(
                                    "table '{}' is neither a catalog table nor a CTE in scope",
                                    table
                                ),
                            )
                            .with_identifier(table.clone())
                            .with_suggestion(suggest(&table, pool.iter().map(|s| s.as_str()))));
                        }
                    },
                };

                let columns = match alias {
                    Some(a) if !a.columns.is_empty() => columns.map(|mut cols| {
                        for (slot, renamed) in cols.iter_mut().zip(a.columns.iter()) {
                            *slot = alias_column_name(&renamed.to_string());
                        }
                        cols
                    }),
                    _ => columns,
                };
                self.frame_mut().relations.push(Relation {
                    name: rel_name,
                    source,
                    columns,
                });
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let cols = self.bind_query(subquery)?;
                let (name, cols) = match alias {
                    Some(a) if !a.columns.is_empty() => (
                        ident_key(&a.name),
                        Some(
                            a.columns
                                .iter()
                                .map(|c| alias_column_name(&c.to_string()))
                                .collect(),
                        ),
                    ),
                    Some(a) => (ident_key(&a.name), cols),
                    None => ("unnamed_subquery".to_string(), cols),
                };
                self.frame_mut().relations.push(Relation {
                    name,
                    source: RelationSource::Derived,
                    columns: cols,
                });
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.bind_from_item(table_with_joins)?,
            _ => {
                let frame = self.frame_mut();
                frame.opaque = true;
                frame.relations.push(Relation {
                    name: String::new(),
                    source: RelationSource::Opaque,
                    columns: None,
                });
            }
        }
        Ok(())
    }

    fn push_opaque(&mut self, name: String) {
        self.frame_mut().relations.push(Relation {
            name,
            source: RelationSource::Opaque,
            columns: None,
        });
    }

    fn reject_window(&self, expr: &Expr, clause: Clause) -> Result<(), SyntaxError> {
        match find_window_call(expr) {
            Some(name) => Err(SyntaxError::new(
                SyntaxErrorKind::WindowFunctionInInvalidClause,
                format!(
                    "window function {}() is not allowed in {}",
                    name,
                    clause.label()
                ),
            )
            .with_identifier(name)),
            None => Ok(()),
        }
    }

    fn alias_visible(&self, clause: Clause) -> bool {
        match clause {
            Clause::GroupBy | Clause::Having | Clause::Qualify | Clause::OrderBy => true,
            Clause::Projection | Clause::Where => self.dialect.allows_alias_in_where(),
            Clause::JoinOn => false,
        }
    }

    fn bind_expr(&mut self, expr: &Expr, clause: Clause) -> Result<(), SyntaxError> {
        match expr {
            Expr::Identifier(ident) => self.resolve_unqualified(ident, clause).map(|_| ()),
            Expr::CompoundIdentifier(parts) => self.resolve_qualified(parts).map(|_| ()),
            _ => {
                for child in children(expr) {
                    match child {
                        Child::Expr(e) => self.bind_expr(e, clause)?,
                        Child::Query(q) => {
                            self.bind_query(q)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn resolve(&self, expr: &Expr, clause: Clause) -> Result<Resolved, SyntaxError> {
        match expr {
            Expr::Identifier(ident) => self.resolve_unqualified(ident, clause),
            Expr::CompoundIdentifier(parts) => self.resolve_qualified(parts),
            _ => Ok(Resolved::Unknown),
        }
    }

    fn resolve_unqualified(&self, ident: &Ident, clause: Clause) -> Result<Resolved, SyntaxError> {
        let col = ident_key(ident);
        for (depth, frame) in self.frames.iter().rev().enumerate() {
            if depth == 0 && clause == Clause::OrderBy && frame.alias(&col).is_some() {
                return Ok(Resolved::Alias);
            }

            let mut hits: Vec<&Relation> = Vec::new();
            let mut opaque = frame.opaque;
            for rel in &frame.relations {
                match rel.exposes(&col) {
                    Some(true) => hits.push(rel),
                    Some(false) => {}
                    None => opaque = true,
                }
            }

            if hits.len() == 1 || (hits.len() > 1 && frame.merged.contains(&col)) {
                return Ok(Resolved::Column {
                    depth,
                    relation: hits[0].name.clone(),
                    column: col,
                });
            }
            if hits.len() > 1 {
                let candidates: Vec<String> = hits
                    .iter()
                    .map(|r| format!("{}.{}", r.name, col))
                    .collect();
                return Err(SyntaxError::new(
                    SyntaxErrorKind::AmbiguousColumnReference,
                    format!(
                        "column reference '{}' is ambiguous; could refer to {}",
                        col,
                        candidates.join(", ")
                    ),
                )
                .with_identifier(col)
                .with_candidates(candidates));
            }
            if depth == 0 && self.alias_visible(clause) && frame.alias(&col).is_some() {
                return Ok(Resolved::Alias);
            }
            if opaque {
                return Ok(Resolved::Unknown);
            }
        }

        let mut pool: Vec<&str> = Vec::new();
        for frame in self.frames.iter().rev() {
            for rel in &frame.relations {
                if let Some(cols) = &rel.columns {
                    pool.extend(cols.iter().map(|c| c.as_str()));
                }
            }
        }
        Err(SyntaxError::new(
            SyntaxErrorKind::ColumnNotInFromScope,
            format!(
                "column '{}' is not exposed by any relation in the FROM scope of {}",
                col,
                clause.label()
            ),
        )
        .with_identifier(col.clone())
        .with_suggestion(suggest(&col, pool)))
    }

    fn resolve_qualified(&self, parts: &[Ident]) -> Result<Resolved, SyntaxError> {
        if parts.len() < 2 || parts.len() > 3 {
            return Ok(Resolved::Unknown);
        }
        let qual = ident_key(&parts[parts.len() - 2]);
        let col = ident_key(&parts[parts.len() - 1]);
        let reference = format!("{}.{}", qual, col);

        for (depth, frame) in self.frames.iter().rev().enumerate() {
            let Some(rel) = frame.relation(&qual) else {
                continue;
            };
            return match &rel.columns {
                None => Ok(Resolved::Unknown),
                Some(cols) if cols.contains(&col) => Ok(Resolved::Column {
                    depth,
                    relation: qual,
                    column: col,
                }),
                Some(cols) => {
                    let (kind, what) = match rel.source {
                        RelationSource::Cte => (SyntaxErrorKind::MissingProjectedColumn, "CTE"),
                        RelationSource::Derived => {
                            (SyntaxErrorKind::MissingProjectedColumn, "derived table")
                        }
                        _ => (SyntaxErrorKind::ColumnNotInFromScope, "table"),
                    };
                    Err(SyntaxError::new(
                        kind,
                        format!("{} '{}' does not project column '{}'", what, qual, col),
                    )
                    .with_identifier(reference)
                    .with_suggestion(suggest(&col, cols.iter().map(|c| c.as_str()))))
                }
            };
        }

        if self.frames.iter().any(|f| f.opaque) {
            return Ok(Resolved::Unknown);
        }
        let names: Vec<&str> = self
            .frames
            .iter()
            .flat_map(|f| f.relations.iter().map(|r| r.name.as_str()))
            .collect();
        Err(SyntaxError::new(
            SyntaxErrorKind::ColumnNotInFromScope,
            format!("'{}' references relation '{}' which is not in scope", reference, qual),
        )
        .with_identifier(reference)
        .with_suggestion(suggest(&qual, names)))
    }

    fn check_grouping(&self, select: &Select, group_exprs: &[&Expr]) -> Result<(), SyntaxError> {
        let projected: Vec<&Expr> = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => Some(e),
                _ => None,
            })
            .collect();

        let aggregating = !group_exprs.is_empty()
            || projected.iter().any(|e| contains_aggregate(e))
            || select.having.as_ref().is_some_and(contains_aggregate);
        if !aggregating {
            return Ok(());
        }

        let mut grouped = Grouped::default();
        for g in group_exprs {
            for item in flatten_grouping(g) {
                let item = self.substitute_group_item(item, select, &projected);
                grouped.keys.insert(expr_key(item));
                if let Ok(Resolved::Column {
                    depth: 0,
                    relation,
                    column,
                }) = self.resolve(item, Clause::GroupBy)
                {
                    grouped.columns.insert((relation, column));
                }
            }
        }

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
                    self.check_grouped(e, &grouped, Clause::Projection, false)?
                }
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    if !group_exprs.is_empty() {
                        return Err(SyntaxError::new(
                            SyntaxErrorKind::GroupByViolation,
                            "SELECT * cannot be combined with GROUP BY",
                        )
                        .with_identifier("*"));
                    }
                }
            }
        }
        if let Some(having) = &select.having {
            self.check_grouped(having, &grouped, Clause::Having, false)?;
        }
        Ok(())
    }

    /// GROUP BY items may be 1-based ordinals or projection aliases.
    fn substitute_group_item<'e>(
        &self,
        item: &'e Expr,
        select: &'e Select,
        projected: &[&'e Expr],
    ) -> &'e Expr {
        match item {
            Expr::Value(SqlValue::Number(n, _)) => n
                .parse::<usize>()
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| projected.get(i).copied())
                .unwrap_or(item),
            Expr::Identifier(ident) => {
                let is_column = matches!(
                    self.resolve_unqualified(ident, Clause::JoinOn),
                    Ok(Resolved::Column { depth: 0, .. })
                );
                if is_column {
                    return item;
                }
                let name = ident_key(ident);
                select
                    .projection
                    .iter()
                    .find_map(|p| match p {
                        SelectItem::ExprWithAlias { expr, alias } if ident_key(alias) == name => {
                            Some(expr)
                        }
                        _ => None,
                    })
                    .unwrap_or(item)
            }
            _ => item,
        }
    }

    fn check_grouped(
        &self,
        expr: &Expr,
        grouped: &Grouped,
        clause: Clause,
        via_alias: bool,
    ) -> Result<(), SyntaxError> {
        if grouped.keys.contains(&expr_key(expr)) {
            return Ok(());
        }
        match expr {
            Expr::Function(f) if is_aggregate_call(f) => Ok(()),
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                match self.resolve(expr, clause) {
                    Ok(Resolved::Column {
                        depth: 0,
                        relation,
                        column,
                    }) => {
                        if grouped.columns.contains(&(relation.clone(), column.clone())) {
                            Ok(())
                        } else {
                            let shown = expr.to_string();
                            Err(SyntaxError::new(
                                SyntaxErrorKind::GroupByViolation,
                                format!(
                                    "column '{}' in {} must appear in the GROUP BY clause or be used in an aggregate function",
                                    shown,
                                    clause.label()
                                ),
                            )
                            .with_identifier(format!("{}.{}", relation, column)))
                        }
                    }
                    Ok(Resolved::Alias) if !via_alias => {
                        let Expr::Identifier(ident) = expr else {
                            return Ok(());
                        };
                        match self.frame().alias(&ident_key(ident)) {
                            Some(aliased) => self.check_grouped(aliased, grouped, clause, true),
                            None => Ok(()),
                        }
                    }
                    _ => Ok(()),
                }
            }
            _ => {
                for child in children(expr) {
                    if let Child::Expr(e) = child {
                        self.check_grouped(e, grouped, clause, via_alias)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn output_names(&self, select: &Select) -> Option<Vec<String>> {
        let frame = self.frame();
        let mut names = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(e) => names.push(implicit_name(e)),
                SelectItem::ExprWithAlias { alias, .. } => names.push(ident_key(alias)),
                SelectItem::Wildcard(_) => {
                    for rel in &frame.relations {
                        names.extend(rel.columns.clone()?);
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qual = name.0.last().map(ident_key).unwrap_or_default();
                    names.extend(frame.relation(&qual)?.columns.clone()?);
                }
            }
        }
        Some(names)
    }
}

#[derive(Default)]
struct Grouped {
    keys: BTreeSet<String>,
    columns: BTreeSet<(String, String)>,
}

fn flatten_grouping(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => sets
            .iter()
            .flatten()
            .flat_map(|e| match e {
                Expr::Tuple(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .collect(),
        Expr::Tuple(items) => items.iter().collect(),
        // dialects without grouping-set syntax parse ROLLUP(..) as a call
        Expr::Function(f) if matches!(function_name(f).as_str(), "rollup" | "cube") => {
            children(expr)
                .into_iter()
                .filter_map(|c| match c {
                    Child::Expr(e) => Some(e),
                    Child::Query(_) => None,
                })
                .collect()
        }
        other => vec![other],
    }
}

fn join_constraint(op: &JoinOperator) -> Option<&JoinConstraint> {
    match op {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c) => Some(c),
        JoinOperator::AsOf { constraint, .. } => Some(constraint),
        _ => None,
    }
}

/// Closest name by normalised Damerau-Levenshtein similarity, first wins on
/// ties.
pub(crate) fn suggest<'a>(needle: &str, pool: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut best: Option<(f64, &str)> = None;
    for cand in pool {
        if cand.is_empty() || cand == needle {
            continue;
        }
        let score = strsim::normalized_damerau_levenshtein(needle, cand);
        if score >= SUGGESTION_THRESHOLD && best.map_or(true, |(b, _)| score > b) {
            best = Some((score, cand));
        }
    }
    best.map(|(_, c)| c.to_string())
}
