//! # Change Records
//!
//! Row-level mutations caused by processing a hot block. They are stored in
//! the change log as a JSON document tagged by `kind`:
//!
//! ```text
//! {"kind":"insert","table":"transfers","id":"0xab-0"}
//! {"kind":"update","table":"balances","id":"alice","fields":{"amount":"10"}}
//! ```

use crate::domain::block::Height;
use crate::domain::row::Row;
use serde::{Deserialize, Serialize};

/// One row-level mutation.
///
/// `Update` and `Delete` carry the prior field values needed to restore the
/// row; rollback currently reverses only `Insert`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeRecord {
    Insert {
        table: String,
        id: String,
    },
    Update {
        table: String,
        id: String,
        #[serde(default)]
        fields: Row,
    },
    Delete {
        table: String,
        id: String,
        #[serde(default)]
        fields: Row,
    },
}

impl ChangeRecord {
    pub fn insert(table: impl Into<String>, id: impl Into<String>) -> Self {
        ChangeRecord::Insert {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn update(table: impl Into<String>, id: impl Into<String>, fields: Row) -> Self {
        ChangeRecord::Update {
            table: table.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn delete(table: impl Into<String>, id: impl Into<String>, fields: Row) -> Self {
        ChangeRecord::Delete {
            table: table.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            ChangeRecord::Insert { table, .. }
            | ChangeRecord::Update { table, .. }
            | ChangeRecord::Delete { table, .. } => table,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ChangeRecord::Insert { id, .. }
            | ChangeRecord::Update { id, .. }
            | ChangeRecord::Delete { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeRecord::Insert { .. } => "insert",
            ChangeRecord::Update { .. } => "update",
            ChangeRecord::Delete { .. } => "delete",
        }
    }
}

/// A change record positioned in the log.
///
/// `log_index` increases monotonically within one block; undo walks it in
/// descending order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub height: Height,
    pub log_index: u64,
    pub changes: ChangeRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_wire_format() {
        let record = ChangeRecord::insert("transfers", "0xab-0");
        let encoded = serde_json::to_value(&record).unwrap();

        assert_eq!(
            encoded,
            json!({"kind": "insert", "table": "transfers", "id": "0xab-0"})
        );
    }

    #[test]
    fn test_delete_without_fields_decodes() {
        let record: ChangeRecord =
            serde_json::from_str(r#"{"kind":"delete","table":"t","id":"1"}"#).unwrap();

        assert_eq!(record.kind(), "delete");
        assert_eq!(record.table(), "t");
        assert_eq!(record.id(), "1");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = serde_json::from_str::<ChangeRecord>(r#"{"kind":"upsert","table":"t","id":"1"}"#);
        assert!(result.is_err());
    }
}
