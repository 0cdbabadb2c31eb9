//! # Statements
//!
//! The adapter only ever issues a handful of statement shapes, so they are
//! modelled as data instead of free-form SQL. Drivers render them with
//! [`Select::to_sql`] / [`Statement::to_sql`]; the in-memory store evaluates
//! them directly.

use crate::domain::row::{compare_values, values_equal, Row};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A single `WHERE` conjunct.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `column = value`
    Eq { column: String, value: Value },
    /// `column <= value`
    Le { column: String, value: Value },
    /// `column > value`
    Gt { column: String, value: Value },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Le {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Evaluate against a row. A missing column never matches.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::Eq { column, value } => row
                .get(column)
                .is_some_and(|actual| values_equal(actual, value)),
            Predicate::Le { column, value } => row
                .get(column)
                .is_some_and(|actual| compare_values(actual, value) != Ordering::Greater),
            Predicate::Gt { column, value } => row
                .get(column)
                .is_some_and(|actual| compare_values(actual, value) == Ordering::Greater),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq { column, value } => write!(f, "{} = {}", column, literal(value)),
            Predicate::Le { column, value } => write!(f, "{} <= {}", column, literal(value)),
            Predicate::Gt { column, value } => write!(f, "{} > {}", column, literal(value)),
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// `SELECT` with optional `FINAL` (de-duplicating read).
#[derive(Clone, Debug, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub final_read: bool,
    pub filter: Vec<Predicate>,
    pub order_by: Option<(String, Order)>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            final_read: false,
            filter: Vec::new(),
            order_by: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Collapse physical versions to one logical row per key.
    pub fn final_read(mut self) -> Self {
        self.final_read = true;
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filter.iter().all(|p| p.matches(row))
    }

    pub fn to_sql(&self) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", columns, self.table);
        if self.final_read {
            sql.push_str(" FINAL");
        }
        push_where(&mut sql, &self.filter);
        if let Some((column, order)) = &self.order_by {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {} {}", column, dir));
        }
        sql
    }
}

/// Mutations and commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Lightweight delete. Applied eventually by the store, so readers may
    /// briefly observe removed rows.
    Delete {
        table: String,
        cluster: Option<String>,
        filter: Vec<Predicate>,
    },
    /// Refresh a dictionary built from an entity table.
    ReloadDictionary {
        name: String,
        cluster: Option<String>,
    },
}

impl Statement {
    pub fn delete(table: impl Into<String>, cluster: Option<&str>, filter: Vec<Predicate>) -> Self {
        Statement::Delete {
            table: table.into(),
            cluster: cluster.map(str::to_string),
            filter,
        }
    }

    pub fn reload_dictionary(name: impl Into<String>, cluster: Option<&str>) -> Self {
        Statement::ReloadDictionary {
            name: name.into(),
            cluster: cluster.map(str::to_string),
        }
    }

    /// Table a statement mutates, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Delete { table, .. } => Some(table),
            Statement::ReloadDictionary { .. } => None,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Statement::Delete {
                table,
                cluster,
                filter,
            } => {
                let mut sql = format!("DELETE FROM {}", table);
                push_cluster(&mut sql, cluster);
                push_where(&mut sql, filter);
                sql
            }
            Statement::ReloadDictionary { name, cluster } => {
                let mut sql = format!("SYSTEM RELOAD DICTIONARY {}", name);
                push_cluster(&mut sql, cluster);
                sql
            }
        }
    }
}

fn push_cluster(sql: &mut String, cluster: &Option<String>) {
    if let Some(cluster) = cluster {
        sql.push_str(&format!(" ON CLUSTER {}", cluster));
    }
}

fn push_where(sql: &mut String, filter: &[Predicate]) {
    if filter.is_empty() {
        return;
    }
    let clauses: Vec<String> = filter.iter().map(Predicate::to_string).collect();
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}
