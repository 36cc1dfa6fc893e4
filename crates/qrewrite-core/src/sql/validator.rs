use super::scope::Binder;
use crate::catalog::Catalog;
use crate::errors::{SyntaxError, SyntaxErrorKind};
use crate::model::Dialect;
use sqlparser::ast::{Query, Statement};
use sqlparser::dialect::{
    AnsiDialect, Dialect as SqlDialect, DuckDbDialect, GenericDialect, PostgreSqlDialect,
};
use sqlparser::parser::Parser;

/// A query that parsed and passed scope resolution. Only values of this
/// type reach the execution path.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub query: Box<Query>,
    pub has_order_by: bool,
    pub output_columns: Option<Vec<String>>,
    pub tables: Vec<String>,
}

pub struct Validator<'c> {
    catalog: &'c Catalog,
    dialect: Dialect,
}

fn parser_dialect(d: Dialect) -> Box<dyn SqlDialect> {
    match d {
        Dialect::Duckdb => Box::new(DuckDbDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::Ansi => Box::new(AnsiDialect {}),
        Dialect::Generic => Box::new(GenericDialect {}),
    }
}

impl<'c> Validator<'c> {
    pub fn new(catalog: &'c Catalog, dialect: Dialect) -> Self {
        Self { catalog, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parses `sql` into exactly one query statement.
    pub fn parse(&self, sql: &str) -> Result<Box<Query>, SyntaxError> {
        let dialect = parser_dialect(self.dialect);
        let mut statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| SyntaxError::new(SyntaxErrorKind::ParseError, e.to_string()))?;

        if statements.len() != 1 {
            return Err(SyntaxError::new(
                SyntaxErrorKind::UnsupportedStatement,
                format!("expected a single query, found {} statements", statements.len()),
            ));
        }
        match statements.remove(0) {
            Statement::Query(q) => Ok(q),
            other => {
                let text = other.to_string();
                let keyword = text.split_whitespace().next().unwrap_or("statement");
                Err(SyntaxError::new(
                    SyntaxErrorKind::UnsupportedStatement,
                    format!("only SELECT queries are accepted, got {}", keyword.to_uppercase()),
                ))
            }
        }
    }

    /// Static validation without execution: parse, then resolve every table
    /// and column reference against the catalog.
    pub fn validate(&self, sql: &str) -> Result<ParsedQuery, SyntaxError> {
        let query = self.parse(sql)?;
        let mut binder = Binder::new(self.catalog, self.dialect);
        let output_columns = binder.bind_query(&query)?;
        let has_order_by = query
            .order_by
            .as_ref()
            .is_some_and(|o| !o.exprs.is_empty());

        Ok(ParsedQuery {
            query,
            has_order_by,
            output_columns,
            tables: binder.into_tables(),
        })
    }
}
