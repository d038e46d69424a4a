//! # Query Metadata
//!
//! Per-session registry of the tables a query references and the columns they
//! produce. Each table reference gets a [`TableId`] and a fresh, contiguous block of
//! [`ColumnId`]s, so a self-join yields two disjoint column sets. The metadata is
//! owned by the memo and lives exactly as long as it does.

use crate::catalog::{Catalog, TableDef};
use crate::error::{OptError, OptResult};
use crate::expr::{ColSet, ColumnId, TableRef};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Session-unique table reference identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    pub id: TableId,
    pub alias: String,
    pub def: Arc<TableDef>,
    /// Column ids by table ordinal.
    pub columns: Vec<ColumnId>,
}

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub id: ColumnId,
    pub table: TableId,
    pub ordinal: usize,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    tables: Vec<TableMeta>,
    columns: Vec<ColumnMeta>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reference to a catalog table under `alias`.
    pub fn add_table(
        &mut self,
        catalog: &dyn Catalog,
        table: &TableRef,
        alias: impl Into<String>,
    ) -> OptResult<TableId> {
        let def = catalog
            .table(table)
            .ok_or_else(|| OptError::UnknownTable(table.to_string()))?;
        Ok(self.add_table_def(def, alias))
    }

    pub fn add_table_def(&mut self, def: Arc<TableDef>, alias: impl Into<String>) -> TableId {
        let id = TableId(self.tables.len() as u32);
        let mut columns = Vec::with_capacity(def.columns.len());
        for (ordinal, column) in def.columns.iter().enumerate() {
            let col = ColumnId(self.columns.len() as u32);
            self.columns.push(ColumnMeta {
                id: col,
                table: id,
                ordinal,
                name: column.name.clone(),
            });
            columns.push(col);
        }
        self.tables.push(TableMeta {
            id,
            alias: alias.into(),
            def,
            columns,
        });
        id
    }

    pub fn table(&self, id: TableId) -> OptResult<&TableMeta> {
        self.tables
            .get(id.0 as usize)
            .ok_or_else(|| OptError::InvalidInput(format!("unknown table id {id}")))
    }

    pub fn column(&self, id: ColumnId) -> Option<&ColumnMeta> {
        self.columns.get(id.0 as usize)
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.tables
    }

    /// Look a column up by `alias.name`.
    pub fn find_column(&self, alias: &str, name: &str) -> Option<ColumnId> {
        let table = self.tables.iter().find(|t| t.alias == alias)?;
        let ordinal = table.def.ordinal(name)?;
        table.columns.get(ordinal).copied()
    }

    /// Human-readable `alias.name` for a column.
    pub fn column_label(&self, id: ColumnId) -> String {
        match self.column(id) {
            Some(c) => match self.tables.get(c.table.0 as usize) {
                Some(t) => format!("{}.{}", t.alias, c.name),
                None => c.name.clone(),
            },
            None => id.to_string(),
        }
    }

    pub fn table_columns(&self, id: TableId) -> OptResult<ColSet> {
        Ok(self.table(id)?.columns.iter().copied().collect())
    }

    /// Columns covered by an index of a table reference.
    pub fn index_cols(&self, id: TableId, index: usize) -> OptResult<ColSet> {
        let meta = self.table(id)?;
        Ok(meta
            .def
            .index_columns(index)
            .into_iter()
            .filter_map(|o| meta.columns.get(o).copied())
            .collect())
    }

    /// Key columns of an index, in key order.
    pub fn index_keys(&self, id: TableId, index: usize) -> OptResult<Vec<ColumnId>> {
        let meta = self.table(id)?;
        Ok(meta
            .def
            .index_keys(index)
            .into_iter()
            .filter_map(|o| meta.columns.get(o).copied())
            .collect())
    }

    /// Base table statistics re-keyed by session column ids.
    pub fn table_stats(&self, id: TableId) -> OptResult<Statistics> {
        let meta = self.table(id)?;
        let mut stats = Statistics::new(meta.def.row_count, meta.def.size_bytes);
        for (column, col_id) in meta.def.columns.iter().zip(meta.columns.iter()) {
            stats = stats.with_column(*col_id, column.stats.clone());
        }
        Ok(stats)
    }
}
