use crate::config::{HotStoreConfig, StateTables};
use crate::domain::row::{canonical_text, compare_values, Row};
use crate::domain::statement::{Order, Select, Statement};
use crate::error::StoreError;
use crate::ports::outbound::{ColumnStore, QueryId, DEFAULT_INSERT_BATCH_ROWS};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Storage engine of an in-memory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEngine {
    /// Append-only; `FINAL` has no effect.
    MergeTree,
    /// `FINAL` collapses rows sharing `key` to the last written version.
    ReplacingMergeTree { key: Vec<String> },
}

impl TableEngine {
    pub fn replacing(key: &[&str]) -> Self {
        TableEngine::ReplacingMergeTree {
            key: key.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// One physical call observed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Insert { table: String, rows: usize },
    Query { sql: String },
    Exec { sql: String },
}

#[derive(Debug)]
struct Table {
    engine: TableEngine,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Table>,
    journal: Vec<StoreCall>,
    failures: HashMap<String, usize>,
}

impl Inner {
    fn take_failure(&mut self, table: &str) -> Result<(), StoreError> {
        match self.failures.get_mut(table) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Io {
                    table: table.to_string(),
                    message: "injected write failure".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// In-memory column store for tests and local runs.
///
/// Deletes apply immediately (mutations-on-the-fly). Unknown tables are
/// created as `MergeTree` on first insert; reading or deleting from an
/// unknown table fails.
pub struct InMemoryColumnStore {
    inner: RwLock<Inner>,
    batch_rows: usize,
}

impl Default for InMemoryColumnStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            batch_rows: DEFAULT_INSERT_BATCH_ROWS,
        }
    }

    /// Store with the ledger tables of `config` registered.
    pub fn for_config(config: &HotStoreConfig) -> Self {
        let store = Self::new();
        store.register_state_tables(&config.state_tables());
        store
    }

    pub fn with_batch_rows(mut self, batch_rows: usize) -> Self {
        self.batch_rows = batch_rows;
        self
    }

    /// Create (or re-create, dropping rows) a table.
    pub fn create_table(&self, name: &str, engine: TableEngine) {
        self.inner.write().tables.insert(
            name.to_string(),
            Table {
                engine,
                rows: Vec::new(),
            },
        );
    }

    /// Register the status, hot block and change log tables.
    pub fn register_state_tables(&self, tables: &StateTables) {
        self.create_table(&tables.status, TableEngine::replacing(&["chain_id"]));
        self.create_table(
            &tables.hot_block,
            TableEngine::replacing(&["chain_id", "height"]),
        );
        self.create_table(
            &tables.hot_change_log,
            TableEngine::replacing(&["chain_id", "height", "log_index"]),
        );
    }

    /// Make the next `count` writes (inserts or deletes) to `table` fail.
    pub fn fail_next_writes(&self, table: &str, count: usize) {
        self.inner.write().failures.insert(table.to_string(), count);
    }

    /// Physical rows, every version included.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .read()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Logical rows as a `FINAL` read would return them.
    pub fn final_rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .read()
            .tables
            .get(table)
            .map(|t| collapse(&t.engine, &t.rows))
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.read().journal.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.write().journal.clear();
    }

    /// Number of physical insert calls against `table`.
    pub fn insert_calls(&self, table: &str) -> usize {
        self.inner
            .read()
            .journal
            .iter()
            .filter(|c| matches!(c, StoreCall::Insert { table: t, .. } if t == table))
            .count()
    }

    /// Rendered statements passed to `exec`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.inner
            .read()
            .journal
            .iter()
            .filter_map(|c| match c {
                StoreCall::Exec { sql } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ColumnStore for InMemoryColumnStore {
    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<QueryId, StoreError> {
        let mut inner = self.inner.write();
        inner.journal.push(StoreCall::Insert {
            table: table.to_string(),
            rows: rows.len(),
        });
        inner.take_failure(table)?;
        inner
            .tables
            .entry(table.to_string())
            .or_insert_with(|| Table {
                engine: TableEngine::MergeTree,
                rows: Vec::new(),
            })
            .rows
            .extend(rows.iter().cloned());
        Ok(Uuid::new_v4())
    }

    async fn query(&self, select: &Select) -> Result<Vec<Row>, StoreError> {
        let sql = select.to_sql();
        let mut inner = self.inner.write();
        inner.journal.push(StoreCall::Query { sql: sql.clone() });

        let table = inner
            .tables
            .get(&select.table)
            .ok_or_else(|| StoreError::UnknownTable {
                table: select.table.clone(),
            })?;

        let source = if select.final_read {
            collapse(&table.engine, &table.rows)
        } else {
            table.rows.clone()
        };
        let mut result: Vec<Row> = source.into_iter().filter(|r| select.matches(r)).collect();

        if let Some((column, order)) = &select.order_by {
            result.sort_by(|a, b| {
                let ord = match (a.get(column), b.get(column)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (x, y) => x.is_some().cmp(&y.is_some()),
                };
                match order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            });
        }

        if !select.columns.is_empty() {
            for row in result.iter_mut() {
                row.retain(|k, _| select.columns.iter().any(|c| c == k));
            }
        }

        debug!("[reorg-store] query=[{}] rows={}", sql, result.len());
        Ok(result)
    }

    async fn exec(&self, statement: &Statement) -> Result<QueryId, StoreError> {
        let sql = statement.to_sql();
        let mut inner = self.inner.write();
        inner.journal.push(StoreCall::Exec { sql: sql.clone() });

        if let Statement::Delete { table, filter, .. } = statement {
            inner.take_failure(table)?;
            let target = inner
                .tables
                .get_mut(table)
                .ok_or_else(|| StoreError::UnknownTable {
                    table: table.clone(),
                })?;
            let before = target.rows.len();
            target
                .rows
                .retain(|row| !filter.iter().all(|p| p.matches(row)));
            debug!(
                "[reorg-store] query: [{}] removed {} rows",
                sql,
                before - target.rows.len()
            );
        }
        Ok(Uuid::new_v4())
    }

    fn insert_batch_rows(&self) -> usize {
        self.batch_rows
    }
}

/// Keep the last version of every key, in order of first appearance.
fn collapse(engine: &TableEngine, rows: &[Row]) -> Vec<Row> {
    let key = match engine {
        TableEngine::MergeTree => return rows.to_vec(),
        TableEngine::ReplacingMergeTree { key } => key,
    };
    let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
    let mut logical: Vec<Row> = Vec::new();
    for row in rows {
        let row_key: Vec<String> = key
            .iter()
            .map(|column| row.get(column).map(canonical_text).unwrap_or_default())
            .collect();
        match positions.get(&row_key) {
            Some(&pos) => logical[pos] = row.clone(),
            None => {
                positions.insert(row_key, logical.len());
                logical.push(row.clone());
            }
        }
    }
    logical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::statement::Predicate;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_final_read_collapses_versions() {
        let store = InMemoryColumnStore::new();
        store.create_table("status", TableEngine::replacing(&["chain_id"]));

        store
            .insert(
                "status",
                &[
                    row(json!({"chain_id": 1, "height": 5, "hash": "a"})),
                    row(json!({"chain_id": 1, "height": 6, "hash": "b"})),
                    row(json!({"chain_id": 2, "height": 9, "hash": "z"})),
                ],
            )
            .await
            .unwrap();

        let select = Select::from("status")
            .final_read()
            .filter(Predicate::eq("chain_id", 1));
        let rows = store.query(&select).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["hash"], json!("b"));
        assert_eq!(store.rows("status").len(), 3);
    }

    #[tokio::test]
    async fn test_insert_chunks_into_batches() {
        let store = InMemoryColumnStore::new();
        let rows: Vec<Row> = (0..250_000).map(|i| row(json!({ "id": i }))).collect();

        let inserted = store.insert("events", &rows).await.unwrap();

        assert_eq!(inserted, 250_000);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Insert { table: "events".into(), rows: 99_999 },
                StoreCall::Insert { table: "events".into(), rows: 99_999 },
                StoreCall::Insert { table: "events".into(), rows: 50_002 },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_insert_issues_no_call() {
        let store = InMemoryColumnStore::new();
        assert_eq!(store.insert("events", &[]).await.unwrap(), 0);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_stops_insert() {
        let store = InMemoryColumnStore::new().with_batch_rows(2);
        store.fail_next_writes("events", 1);
        let rows: Vec<Row> = (0..5).map(|i| row(json!({ "id": i }))).collect();

        let err = store.insert("events", &rows).await.unwrap_err();

        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(store.insert_calls("events"), 1);
        assert!(store.rows("events").is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_order() {
        let store = InMemoryColumnStore::new();
        store
            .insert(
                "log",
                &[
                    row(json!({"height": 1, "log_index": 0})),
                    row(json!({"height": 1, "log_index": 2})),
                    row(json!({"height": 1, "log_index": 1})),
                    row(json!({"height": 2, "log_index": 0})),
                ],
            )
            .await
            .unwrap();

        store
            .exec(&Statement::delete("log", None, vec![Predicate::eq("height", 2)]))
            .await
            .unwrap();

        let rows = store
            .query(
                &Select::from("log")
                    .columns(&["log_index"])
                    .order_by("log_index", Order::Desc),
            )
            .await
            .unwrap();
        let indexes: Vec<_> = rows.iter().map(|r| r["log_index"].clone()).collect();
        assert_eq!(indexes, vec![json!(2), json!(1), json!(0)]);
        assert!(!rows[0].contains_key("height"));
    }

    #[tokio::test]
    async fn test_unknown_table_read_fails() {
        let store = InMemoryColumnStore::new();
        let err = store.query(&Select::from("nope")).await.unwrap_err();
        assert_eq!(err, StoreError::UnknownTable { table: "nope".into() });
    }
}
