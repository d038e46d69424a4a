//! End-to-end test: TPC-H Q5 optimization.
//!
//! Builds TPC-H Q5's six-table join with SF=1 statistics, runs exploration with the
//! built-in rules and checks that the selected plan is no worse than the join order
//! as written.

use std::sync::Arc;
use xform_core::catalog::{InMemoryCatalog, TableDef};
use xform_core::cost::DefaultCostModel;
use xform_core::expr::{col, eq, TableRef};
use xform_core::memo::{GroupId, Memo, MemoExpr, PlanNode};
use xform_core::operator::{OpTag, ScanPrivate};
use xform_core::properties::PhysicalPropertySet;
use xform_core::rule::RuleTable;
use xform_core::search::{CascadesSearch, SearchConfig};
use xform_rules::shared_rule_table;

fn tpch_catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    let tables = [
        TableDef::new(TableRef::new("tpch", "region"), 5.0)
            .with_column("r_regionkey", 5.0)
            .with_column("r_name", 5.0)
            .with_primary_key(&["r_regionkey"]),
        TableDef::new(TableRef::new("tpch", "nation"), 25.0)
            .with_column("n_nationkey", 25.0)
            .with_column("n_regionkey", 5.0)
            .with_column("n_name", 25.0)
            .with_primary_key(&["n_nationkey"]),
        TableDef::new(TableRef::new("tpch", "supplier"), 10_000.0)
            .with_column("s_suppkey", 10_000.0)
            .with_column("s_nationkey", 25.0)
            .with_primary_key(&["s_suppkey"]),
        TableDef::new(TableRef::new("tpch", "customer"), 150_000.0)
            .with_column("c_custkey", 150_000.0)
            .with_column("c_nationkey", 25.0)
            .with_primary_key(&["c_custkey"]),
        TableDef::new(TableRef::new("tpch", "orders"), 1_500_000.0)
            .with_column("o_orderkey", 1_500_000.0)
            .with_column("o_custkey", 150_000.0)
            .with_column("o_orderdate", 2500.0)
            .with_primary_key(&["o_orderkey"]),
        TableDef::new(TableRef::new("tpch", "lineitem"), 6_001_215.0)
            .with_column("l_orderkey", 1_500_000.0)
            .with_column("l_linenumber", 7.0)
            .with_column("l_suppkey", 10_000.0)
            .with_column("l_extendedprice", 1_000_000.0)
            .with_column("l_discount", 11.0)
            .with_primary_key(&["l_orderkey", "l_linenumber"]),
    ];
    for def in tables {
        catalog.add_table(def);
    }
    catalog
}

struct Q5 {
    memo: Memo,
    scans: Vec<GroupId>,
}

impl Q5 {
    fn new() -> Self {
        let catalog = tpch_catalog();
        let mut memo = Memo::new();
        let mut scans = Vec::new();
        for name in ["customer", "orders", "lineitem", "supplier", "nation", "region"] {
            let table = memo.add_table(&catalog, &TableRef::new("tpch", name), name).unwrap();
            let cols = memo.metadata().table_columns(table).unwrap();
            scans.push(memo.intern(MemoExpr::scan(ScanPrivate::new(table, cols))).unwrap().0);
        }
        Self { memo, scans }
    }

    fn scan(&self, name: &str) -> GroupId {
        let idx = ["customer", "orders", "lineitem", "supplier", "nation", "region"]
            .iter()
            .position(|n| *n == name)
            .unwrap();
        self.scans[idx]
    }

    fn equi(&mut self, left: GroupId, right: GroupId, l: (&str, &str), r: (&str, &str)) -> GroupId {
        let lc = self.memo.metadata().find_column(l.0, l.1).unwrap();
        let rc = self.memo.metadata().find_column(r.0, r.1).unwrap();
        let on = self.memo.intern_filters(vec![eq(col(lc), col(rc))]);
        self.memo.intern(MemoExpr::join(OpTag::InnerJoin, left, right, on)).unwrap().0
    }
}

/// customer ⋈ orders ⋈ lineitem ⋈ supplier ⋈ nation ⋈ region, left-deep in query
/// text order.
fn suboptimal_plan() -> (Memo, GroupId) {
    let mut q = Q5::new();
    let co = q.equi(q.scan("customer"), q.scan("orders"), ("customer", "c_custkey"), ("orders", "o_custkey"));
    let col_ = q.equi(co, q.scan("lineitem"), ("orders", "o_orderkey"), ("lineitem", "l_orderkey"));
    let cols = q.equi(col_, q.scan("supplier"), ("lineitem", "l_suppkey"), ("supplier", "s_suppkey"));
    let colsn = q.equi(cols, q.scan("nation"), ("supplier", "s_nationkey"), ("nation", "n_nationkey"));
    let root = q.equi(colsn, q.scan("region"), ("nation", "n_regionkey"), ("region", "r_regionkey"));
    (q.memo, root)
}

/// Smallest tables first: the region filter is applied before touching lineitem.
fn bushy_plan() -> (Memo, GroupId) {
    let mut q = Q5::new();
    let nr = q.equi(q.scan("nation"), q.scan("region"), ("nation", "n_regionkey"), ("region", "r_regionkey"));
    let snr = q.equi(q.scan("supplier"), nr, ("supplier", "s_nationkey"), ("nation", "n_nationkey"));
    let ls = q.equi(q.scan("lineitem"), snr, ("lineitem", "l_suppkey"), ("supplier", "s_suppkey"));
    let ols = q.equi(q.scan("orders"), ls, ("orders", "o_orderkey"), ("lineitem", "l_orderkey"));
    let root = q.equi(q.scan("customer"), ols, ("customer", "c_custkey"), ("orders", "o_custkey"));
    (q.memo, root)
}

fn optimize(memo: Memo, root: GroupId, rules: Arc<RuleTable>) -> (CascadesSearch, PlanNode) {
    let mut search = CascadesSearch::new(
        memo,
        rules,
        Arc::new(DefaultCostModel::default()),
        SearchConfig::default(),
    );
    let plan = search.optimize(root, &PhysicalPropertySet::any()).unwrap();
    (search, plan)
}

#[test]
fn test_tpch_q5_suboptimal_plan_optimizes() {
    let (memo, root) = suboptimal_plan();
    let (_, naive) = optimize(memo, root, Arc::new(RuleTable::empty()));
    let (memo, root) = suboptimal_plan();
    let (_, plan) = optimize(memo, root, shared_rule_table().unwrap());

    println!("=== Optimized suboptimal plan ===");
    println!("{}", plan.display(0));
    println!("Total cost: {:.1} (as written: {:.1})", plan.cost.value(), naive.cost.value());

    assert!(!plan.cost.is_infinite());
    assert!(plan.cost <= naive.cost);
    assert_eq!(plan.count(OpTag::Scan) + plan.count(OpTag::LookupJoin), 6);
}

#[test]
fn test_tpch_q5_both_shapes_improve() {
    for (label, build) in [
        ("suboptimal", suboptimal_plan as fn() -> (Memo, GroupId)),
        ("bushy", bushy_plan),
    ] {
        let (memo, root) = build();
        let (_, naive) = optimize(memo, root, Arc::new(RuleTable::empty()));
        let (memo, root) = build();
        let (_, plan) = optimize(memo, root, shared_rule_table().unwrap());
        println!("{label}: {:.1} -> {:.1}", naive.cost.value(), plan.cost.value());
        assert!(plan.cost <= naive.cost, "{label} got worse:\n{}", plan.display(0));
    }
}

#[test]
fn test_tpch_q5_memo_exploration() {
    let (memo, root) = suboptimal_plan();
    let (initial_groups, initial_exprs) = (memo.num_groups(), memo.num_exprs());
    let (search, _) = optimize(memo, root, shared_rule_table().unwrap());

    println!("Memo exploration:");
    println!("  Initial: {initial_groups} groups, {initial_exprs} exprs");
    println!("  Final:   {} groups, {} exprs", search.memo.num_groups(), search.memo.num_exprs());

    // One group per nonempty subset of the six tables.
    assert_eq!(initial_groups, 11);
    assert!(search.memo.num_groups() >= 63);
    assert!(search.memo.num_exprs() > initial_exprs);
    assert!(search.memo.count_exprs(OpTag::MergeJoin) > 0);
    assert!(search.memo.count_exprs(OpTag::LookupJoin) > 0);
    assert!(!search.stats.timed_out && !search.stats.budget_exhausted);
}

#[test]
fn test_simple_two_way_join_probes_big_table() {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(TableDef::new(TableRef::new("test", "small"), 100.0).with_column("id", 100.0));
    catalog.add_table(
        TableDef::new(TableRef::new("test", "big"), 1_000_000.0)
            .with_column("id", 1_000_000.0)
            .with_column("payload", 1000.0)
            .with_primary_key(&["id"]),
    );
    let mut memo = Memo::new();
    let s = memo.add_table(&catalog, &TableRef::new("test", "small"), "small").unwrap();
    let b = memo.add_table(&catalog, &TableRef::new("test", "big"), "big").unwrap();
    let scols = memo.metadata().table_columns(s).unwrap();
    let bcols = memo.metadata().table_columns(b).unwrap();
    let gs = memo.intern(MemoExpr::scan(ScanPrivate::new(s, scols))).unwrap().0;
    let gb = memo.intern(MemoExpr::scan(ScanPrivate::new(b, bcols))).unwrap().0;
    let sid = memo.metadata().find_column("small", "id").unwrap();
    let bid = memo.metadata().find_column("big", "id").unwrap();
    let on = memo.intern_filters(vec![eq(col(sid), col(bid))]);
    let root = memo.intern(MemoExpr::join(OpTag::InnerJoin, gs, gb, on)).unwrap().0;

    let (_, plan) = optimize(memo, root, shared_rule_table().unwrap());
    println!("{}", plan.display(0));

    assert_eq!(plan.tag, Some(OpTag::LookupJoin));
    assert_eq!(plan.count(OpTag::Scan), 1);
}
