//! # Reorg Store Configuration
//!
//! All values have defaults; `from_env` overrides them from `REORG_STORE_*`
//! variables the way the node runtime loads its settings.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Cluster name used by `ON CLUSTER` clauses unless configured otherwise.
pub const DEFAULT_CLUSTER: &str = "cluster1";

/// What to do when the reconciled chain disagrees with the finalized head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Log a warning and keep going.
    #[default]
    Log,
    /// Treat as a fatal invariant violation.
    Fail,
}

impl FromStr for MismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(MismatchPolicy::Log),
            "fail" => Ok(MismatchPolicy::Fail),
            other => Err(format!("expected `log` or `fail`, got `{}`", other)),
        }
    }
}

/// Per-table settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Column that identifies rows for undo. Tables without one are written
    /// but cannot be rolled back.
    #[serde(default, alias = "trackBy")]
    pub track_by: Option<String>,
    /// Dictionaries to reload after rows are flushed into the table.
    #[serde(default, alias = "relatedDicts")]
    pub related_dicts: Vec<String>,
}

impl TableConfig {
    pub fn tracked(column: impl Into<String>) -> Self {
        Self {
            track_by: Some(column.into()),
            related_dicts: Vec::new(),
        }
    }

    pub fn with_dictionary(mut self, name: impl Into<String>) -> Self {
        self.related_dicts.push(name.into());
        self
    }
}

/// Entity table settings keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TablesConfig(HashMap<String, TableConfig>);

impl TablesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, table: TableConfig) -> Self {
        self.0.insert(name.into(), table);
        self
    }

    pub fn get(&self, table: &str) -> Option<&TableConfig> {
        self.0.get(table)
    }

    pub fn track_by(&self, table: &str) -> Option<&str> {
        self.get(table).and_then(|t| t.track_by.as_deref())
    }

    pub fn related_dicts(&self, table: &str) -> &[String] {
        self.get(table)
            .map(|t| t.related_dicts.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TableConfig)> {
        self.0.iter()
    }
}

/// Fully qualified names of the three ledger tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTables {
    pub status: String,
    pub hot_block: String,
    pub hot_change_log: String,
}

impl StateTables {
    pub fn new(schema: &str) -> Self {
        let qualify = |table: &str| {
            if schema.is_empty() {
                table.to_string()
            } else {
                format!("{}.{}", schema, table)
            }
        };
        Self {
            status: qualify("status"),
            hot_block: qualify("hot_block"),
            hot_change_log: qualify("hot_change_log"),
        }
    }
}

/// Adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotStoreConfig {
    /// Chain identifier qualifying every ledger and entity row.
    pub chain_id: u64,
    /// Schema holding `status`, `hot_block` and `hot_change_log`.
    pub state_schema: String,
    /// Cluster for `ON CLUSTER` clauses; `None` for a single node.
    pub cluster: Option<String>,
    /// Entity table settings.
    pub tables: TablesConfig,
    /// Handling of a finalized-hash mismatch after reconciliation.
    pub finalized_mismatch: MismatchPolicy,
    /// Drop change-log rows of finalized heights.
    pub prune_change_log: bool,
}

impl Default for HotStoreConfig {
    fn default() -> Self {
        Self {
            chain_id: 0,
            state_schema: String::new(),
            cluster: Some(DEFAULT_CLUSTER.to_string()),
            tables: TablesConfig::default(),
            finalized_mismatch: MismatchPolicy::Log,
            prune_change_log: true,
        }
    }
}

impl HotStoreConfig {
    pub fn new(chain_id: u64, state_schema: impl Into<String>) -> Self {
        Self {
            chain_id,
            state_schema: state_schema.into(),
            ..Self::default()
        }
    }

    pub fn with_tables(mut self, tables: TablesConfig) -> Self {
        self.tables = tables;
        self
    }

    pub fn state_tables(&self) -> StateTables {
        StateTables::new(&self.state_schema)
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    /// Load defaults, then apply `REORG_STORE_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("REORG_STORE_CHAIN_ID") {
            config.chain_id = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    var: "REORG_STORE_CHAIN_ID",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(value) = lookup("REORG_STORE_STATE_SCHEMA") {
            config.state_schema = value.trim().to_string();
        }
        if let Some(value) = lookup("REORG_STORE_CLUSTER") {
            let value = value.trim();
            config.cluster = (!value.is_empty()).then(|| value.to_string());
        }
        if let Some(value) = lookup("REORG_STORE_TABLES") {
            config.tables =
                serde_json::from_str(&value).map_err(|e| ConfigError::InvalidEnv {
                    var: "REORG_STORE_TABLES",
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(value) = lookup("REORG_STORE_FINALIZED_MISMATCH") {
            config.finalized_mismatch =
                value.parse().map_err(|reason| ConfigError::InvalidEnv {
                    var: "REORG_STORE_FINALIZED_MISMATCH",
                    value: value.clone(),
                    reason,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject tracked tables whose tracking column is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, table) in self.tables.iter() {
            if matches!(table.track_by.as_deref(), Some(column) if column.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    reason: format!("table {} has an empty tracking column", name),
                });
            }
        }
        Ok(())
    }
}
