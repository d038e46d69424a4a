//! # Catalog Interface
//!
//! The catalog provides the optimizer with table definitions: columns with their
//! statistics, the indexes available on each table, and table-level row count and
//! size. Lookup, merge, zigzag and inverted join generation all depend on knowing
//! which indexes exist and which columns they cover.
//!
//! ## Indexes
//!
//! Index 0 of every table is the primary index. It covers every column of the table
//! and its key columns identify a row. Secondary indexes cover their key columns,
//! their stored columns, and (implicitly) the primary key. An inverted index is keyed
//! on a single geospatial column and can only be probed through a geo function.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is minimal and used behind `dyn Catalog`. `InMemoryCatalog`
//! is a HashMap-backed implementation populated programmatically.

use crate::expr::TableRef;
use crate::stats::ColumnStatistics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Catalog provides table definitions.
pub trait Catalog: Send + Sync {
    fn table(&self, table: &TableRef) -> Option<Arc<TableDef>>;
}

/// One column of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub stats: ColumnStatistics,
}

/// An index on a table. Columns are referenced by ordinal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub key_columns: Vec<usize>,
    #[serde(default)]
    pub stored_columns: Vec<usize>,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, key_columns: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            key_columns,
            stored_columns: Vec::new(),
            inverted: false,
            unique: false,
        }
    }

    pub fn inverted(name: impl Into<String>, column: usize) -> Self {
        Self {
            inverted: true,
            ..Self::new(name, vec![column])
        }
    }

    pub fn storing(mut self, stored: Vec<usize>) -> Self {
        self.stored_columns = stored;
        self
    }
}

/// Definition of a table: columns, indexes, table statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub table: TableRef,
    pub columns: Vec<ColumnDef>,
    /// Index 0 is the primary index.
    pub indexes: Vec<IndexDef>,
    pub row_count: f64,
    pub size_bytes: f64,
}

impl TableDef {
    pub fn new(table: TableRef, row_count: f64) -> Self {
        Self {
            table,
            columns: Vec::new(),
            indexes: Vec::new(),
            row_count,
            size_bytes: row_count * 100.0,
        }
    }

    /// Add a column with the given number of distinct values.
    pub fn with_column(mut self, name: impl Into<String>, ndv: f64) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            stats: ColumnStatistics::new(ndv, 0.0),
        });
        self
    }

    /// Set the primary key (index 0) by column name.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        let keys = columns.iter().filter_map(|c| self.ordinal(c)).collect();
        let primary = IndexDef {
            unique: true,
            ..IndexDef::new("primary", keys)
        };
        if self.indexes.is_empty() {
            self.indexes.push(primary);
        } else {
            self.indexes[0] = primary;
        }
        self
    }

    /// Add a secondary index. A primary index over the first column is created first
    /// when none has been declared.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        if self.indexes.is_empty() {
            self.indexes.push(IndexDef {
                unique: true,
                ..IndexDef::new("primary", vec![0])
            });
        }
        self.indexes.push(index);
        self
    }

    pub fn ordinal(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    /// Primary key ordinals. Falls back to the first column.
    pub fn primary_key(&self) -> Vec<usize> {
        self.indexes
            .first()
            .map(|i| i.key_columns.clone())
            .unwrap_or_else(|| vec![0])
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len().max(1)
    }

    /// Ordinals covered by an index.
    pub fn index_columns(&self, index: usize) -> Vec<usize> {
        if index == 0 {
            return (0..self.columns.len()).collect();
        }
        let Some(def) = self.indexes.get(index) else {
            return Vec::new();
        };
        let mut cols = def.key_columns.clone();
        for c in def.stored_columns.iter().chain(self.primary_key().iter()) {
            if !cols.contains(c) {
                cols.push(*c);
            }
        }
        cols
    }

    /// Key ordinals of an index, the primary index included.
    pub fn index_keys(&self, index: usize) -> Vec<usize> {
        if index == 0 {
            return self.primary_key();
        }
        self.indexes
            .get(index)
            .map(|i| i.key_columns.clone())
            .unwrap_or_default()
    }

    pub fn is_inverted(&self, index: usize) -> bool {
        self.indexes.get(index).map(|i| i.inverted).unwrap_or(false)
    }
}

/// In-memory catalog for testing and development.
///
/// Tables are keyed by their fully-qualified name (`schema.table`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    pub tables: HashMap<String, Arc<TableDef>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, def: TableDef) {
        let key = def.table.to_string();
        self.tables.insert(key, Arc::new(def));
    }
}

impl Catalog for InMemoryCatalog {
    fn table(&self, table: &TableRef) -> Option<Arc<TableDef>> {
        self.tables.get(&table.to_string()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_coverage() {
        let def = TableDef::new(TableRef::new("s", "orders"), 100.0)
            .with_column("id", 100.0)
            .with_column("cust", 10.0)
            .with_column("total", 50.0)
            .with_primary_key(&["id"])
            .with_index(IndexDef::new("by_cust", vec![1]));

        assert_eq!(def.index_columns(0), vec![0, 1, 2]);
        assert_eq!(def.index_columns(1), vec![1, 0]);
        assert_eq!(def.index_keys(1), vec![1]);

        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(def);
        assert!(catalog.table(&TableRef::new("s", "orders")).is_some());
        assert!(catalog.table(&TableRef::new("s", "nope")).is_none());
    }
}
