//! Structural helpers over the `sqlparser` expression tree.
//!
//! None of these descend into nested queries: a subquery is its own scope and
//! is reported as [`Child::Query`] for the caller to bind separately.

use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, Query, WindowType,
};

pub(crate) enum Child<'a> {
    Expr(&'a Expr),
    Query(&'a Query),
}

const AGGREGATES: &[&str] = &[
    "any_value",
    "approx_count_distinct",
    "approx_quantile",
    "arbitrary",
    "arg_max",
    "arg_min",
    "argmax",
    "argmin",
    "array_agg",
    "avg",
    "bit_and",
    "bit_or",
    "bit_xor",
    "bool_and",
    "bool_or",
    "corr",
    "count",
    "count_if",
    "covar_pop",
    "covar_samp",
    "entropy",
    "every",
    "favg",
    "first",
    "fsum",
    "group_concat",
    "grouping",
    "grouping_id",
    "histogram",
    "kurtosis",
    "last",
    "list",
    "listagg",
    "mad",
    "max",
    "max_by",
    "median",
    "min",
    "min_by",
    "mode",
    "percentile_cont",
    "percentile_disc",
    "product",
    "quantile",
    "quantile_cont",
    "quantile_disc",
    "regr_avgx",
    "regr_avgy",
    "regr_count",
    "regr_intercept",
    "regr_r2",
    "regr_slope",
    "regr_sxx",
    "regr_sxy",
    "regr_syy",
    "skewness",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "string_agg",
    "sum",
    "sumkahan",
    "var_pop",
    "var_samp",
    "variance",
];

pub(crate) fn function_name(f: &Function) -> String {
    f.name
        .0
        .last()
        .map(|i| i.value.to_ascii_lowercase())
        .unwrap_or_default()
}

pub(crate) fn is_window_call(f: &Function) -> bool {
    f.over.is_some()
}

/// Plain aggregate call. A windowed aggregate (`sum(x) OVER (...)`) is a
/// window function, not an aggregate, for grouping purposes.
pub(crate) fn is_aggregate_call(f: &Function) -> bool {
    !is_window_call(f)
        && (AGGREGATES.binary_search(&function_name(f).as_str()).is_ok() || f.filter.is_some())
}

fn function_children(f: &Function) -> Vec<Child<'_>> {
    let mut out = Vec::new();
    match &f.args {
        FunctionArguments::None => {}
        FunctionArguments::Subquery(q) => out.push(Child::Query(q)),
        FunctionArguments::List(list) => {
            for arg in &list.args {
                let arg_expr = match arg {
                    FunctionArg::Unnamed(a) => Some(a),
                    FunctionArg::Named { arg, .. } => Some(arg),
                    #[allow(unreachable_patterns)]
                    _ => None,
                };
                if let Some(FunctionArgExpr::Expr(e)) = arg_expr {
                    out.push(Child::Expr(e));
                }
            }
        }
    }
    if let Some(filter) = &f.filter {
        out.push(Child::Expr(filter));
    }
    if let Some(WindowType::WindowSpec(spec)) = &f.over {
        for e in &spec.partition_by {
            out.push(Child::Expr(e));
        }
        for o in &spec.order_by {
            out.push(Child::Expr(&o.expr));
        }
    }
    for o in &f.within_group {
        out.push(Child::Expr(&o.expr));
    }
    out
}

/// Direct children of an expression. Variants not listed here are treated as
/// leaves, which errs on the side of accepting unfamiliar syntax.
pub(crate) fn children(expr: &Expr) -> Vec<Child<'_>> {
    use Child::Expr as E;
    match expr {
        Expr::BinaryOp { left, right, .. } => vec![E(left), E(right)],
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr)
        | Expr::IsUnknown(expr)
        | Expr::IsNotUnknown(expr)
        | Expr::Cast { expr, .. }
        | Expr::Extract { expr, .. }
        | Expr::Ceil { expr, .. }
        | Expr::Floor { expr, .. }
        | Expr::Collate { expr, .. } => vec![E(expr)],
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => vec![E(a), E(b)],
        Expr::InList { expr, list, .. } => {
            let mut v = vec![E(expr.as_ref())];
            v.extend(list.iter().map(E));
            v
        }
        Expr::InSubquery { expr, subquery, .. } => vec![E(expr), Child::Query(subquery)],
        Expr::Between {
            expr, low, high, ..
        } => vec![E(expr), E(low), E(high)],
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. } => vec![E(expr), E(pattern)],
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            let mut v = vec![E(expr.as_ref())];
            if let Some(f) = substring_from {
                v.push(E(f));
            }
            if let Some(f) = substring_for {
                v.push(E(f));
            }
            v
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let mut v = Vec::new();
            if let Some(o) = operand {
                v.push(E(o.as_ref()));
            }
            v.extend(conditions.iter().map(E));
            v.extend(results.iter().map(E));
            if let Some(e) = else_result {
                v.push(E(e.as_ref()));
            }
            v
        }
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
            vec![Child::Query(subquery)]
        }
        Expr::Tuple(items) => items.iter().map(E).collect(),
        Expr::Function(f) => function_children(f),
        Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => {
            sets.iter().flatten().map(E).collect()
        }
        Expr::AnyOp { left, right, .. } | Expr::AllOp { left, right, .. } => {
            vec![E(left), E(right)]
        }
        _ => Vec::new(),
    }
}

/// First window function directly inside `expr`, by name.
pub(crate) fn find_window_call(expr: &Expr) -> Option<String> {
    if let Expr::Function(f) = expr {
        if is_window_call(f) {
            return Some(function_name(f));
        }
    }
    children(expr).into_iter().find_map(|c| match c {
        Child::Expr(e) => find_window_call(e),
        Child::Query(_) => None,
    })
}

pub(crate) fn contains_aggregate(expr: &Expr) -> bool {
    if let Expr::Function(f) = expr {
        if is_aggregate_call(f) {
            return true;
        }
    }
    children(expr).into_iter().any(|c| match c {
        Child::Expr(e) => contains_aggregate(e),
        Child::Query(_) => false,
    })
}

/// Lowercased identifier, keeping quoted identifiers case-sensitive.
pub(crate) fn ident_key(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_ascii_lowercase()
    }
}

/// Canonical text of an expression for structural comparison
/// (`GROUP BY d_year` against `SELECT d_year`).
pub(crate) fn expr_key(expr: &Expr) -> String {
    match expr {
        Expr::Nested(inner) => expr_key(inner),
        other => crate::fingerprint::normalize_sql(&other.to_string()),
    }
}

/// Name a select item would carry in the output when it is not aliased.
pub(crate) fn implicit_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(i) => ident_key(i),
        Expr::CompoundIdentifier(parts) => parts.last().map(ident_key).unwrap_or_default(),
        Expr::Nested(inner) => implicit_name(inner),
        Expr::Function(f) => function_name(f),
        Expr::Cast { expr, .. } => implicit_name(expr),
        other => crate::fingerprint::normalize_sql(&other.to_string()),
    }
}

/// Column names coming out of a `TableAlias` column list; robust to the
/// list element carrying an optional type.
pub(crate) fn alias_column_name(rendered: &str) -> String {
    let first = rendered.split_whitespace().next().unwrap_or_default();
    if first.starts_with('"') {
        first.trim_matches('"').to_string()
    } else {
        first.to_ascii_lowercase()
    }
}
