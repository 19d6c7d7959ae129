//! Read-only check for generated SQL.
//!
//! Generated SQL must parse as exactly one query statement. Anything else
//! (DML, DDL, multiple statements, `SELECT ... INTO`, row locks, writable
//! CTEs) is rejected before it reaches the database.

use crate::error::{BiError, Result};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{GenericDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

/// Validate `sql` and return it trimmed, without a trailing semicolon.
pub fn ensure_read_only(sql: &str) -> Result<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(BiError::Validation("generated SQL is empty".into()));
    }

    let statements = Parser::parse_sql(&PostgreSqlDialect {}, trimmed)
        .or_else(|_| Parser::parse_sql(&GenericDialect {}, trimmed))
        .map_err(|e| BiError::Validation(format!("generated SQL does not parse: {}", e)))?;

    match statements.as_slice() {
        [Statement::Query(query)] => {
            check_query(query)?;
            Ok(trimmed.to_string())
        }
        [_] => Err(BiError::Validation(
            "only read-only SELECT statements are allowed".into(),
        )),
        _ => Err(BiError::Validation(format!(
            "expected exactly one statement, found {}",
            statements.len()
        ))),
    }
}

fn check_query(query: &Query) -> Result<()> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    if !query.locks.is_empty() {
        return Err(BiError::Validation(
            "row-locking clauses (FOR UPDATE / FOR SHARE) are not allowed".into(),
        ));
    }
    check_body(&query.body)
}

fn check_body(body: &SetExpr) -> Result<()> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => {
            Err(BiError::Validation("SELECT INTO is not allowed".into()))
        }
        SetExpr::Select(_) | SetExpr::Values(_) => Ok(()),
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_body(left)?;
            check_body(right)
        }
        _ => Err(BiError::Validation(
            "data-modifying statements are not allowed".into(),
        )),
    }
}
