//! Memo fixtures shared by the rule unit tests.

use crate::default_rule_table;
use xform_core::catalog::{InMemoryCatalog, TableDef};
use xform_core::expr::{ColumnId, Expr, TableRef};
use xform_core::memo::{GroupId, Memo, MemoExpr, ScalarId};
use xform_core::operator::{OpTag, ScanPrivate};
use xform_core::scheduler::{explore, ExploreStats};
use xform_core::search::SearchConfig;

pub(crate) struct Fixture {
    pub memo: Memo,
    catalog: InMemoryCatalog,
}

impl Fixture {
    pub fn new(tables: Vec<TableDef>) -> Self {
        let mut catalog = InMemoryCatalog::new();
        for def in tables {
            catalog.add_table(def);
        }
        Self {
            memo: Memo::new(),
            catalog,
        }
    }

    /// Tables `a`, `b`, `c`, `d` with columns `k` and `v`.
    pub fn abc() -> Self {
        Self::new(
            ["a", "b", "c", "d"]
                .iter()
                .map(|n| {
                    TableDef::new(TableRef::new("s", *n), 100.0)
                        .with_column("k", 100.0)
                        .with_column("v", 10.0)
                })
                .collect(),
        )
    }

    /// Register table `name` under its own name as alias and scan every column.
    pub fn scan(&mut self, name: &str) -> GroupId {
        let table = match self.memo.metadata().tables().iter().find(|t| t.alias == name) {
            Some(t) => t.id,
            None => self
                .memo
                .add_table(&self.catalog, &TableRef::new("s", name), name)
                .unwrap(),
        };
        let cols = self.memo.metadata().table_columns(table).unwrap();
        self.memo.intern(MemoExpr::scan(ScanPrivate::new(table, cols))).unwrap().0
    }

    pub fn col(&self, alias: &str, name: &str) -> ColumnId {
        self.memo.metadata().find_column(alias, name).unwrap()
    }

    pub fn filters(&mut self, exprs: Vec<Expr>) -> Vec<ScalarId> {
        self.memo.intern_filters(exprs)
    }

    pub fn join(&mut self, tag: OpTag, left: GroupId, right: GroupId, on: Vec<Expr>) -> GroupId {
        let on = self.filters(on);
        self.memo.intern(MemoExpr::join(tag, left, right, on)).unwrap().0
    }

    pub fn select(&mut self, input: GroupId, filters: Vec<Expr>) -> GroupId {
        let filters = self.filters(filters);
        self.memo.intern(MemoExpr::select(input, filters)).unwrap().0
    }

    /// Run the default rule table from `root`.
    pub fn explore(&mut self, root: GroupId) -> ExploreStats {
        explore(&mut self.memo, &default_rule_table().unwrap(), &SearchConfig::default(), root).unwrap()
    }

    /// Live members of a group with the given tag.
    pub fn members(&self, group: GroupId, tag: OpTag) -> Vec<&MemoExpr> {
        self.memo
            .group(group)
            .exprs
            .iter()
            .map(|e| self.memo.expr(*e))
            .filter(|e| e.tag == tag)
            .collect()
    }
}
