//! # Zigzag Join Generation
//!
//! A zigzag join answers a conjunction of equality filters on one table with two
//! secondary indexes at once. Each index is scanned from the prefix fixed by its
//! constant; both sides are ordered by the primary key within that prefix, so the
//! scans leapfrog each other and only primary keys present on both sides come out.
//!
//! ```text
//! [GenerateZigzagJoins, Explore]
//! (Select (Scan $scanPrivate:* & (IsCanonicalScan $scanPrivate)) $filters:*)
//! => (GenerateZigzagJoins $scanPrivate $filters)
//! ```
//!
//! One zigzag join is produced for each pair of forward secondary indexes whose first
//! key columns are distinct and each fixed by a `col = constant` filter. The zigzag
//! join keeps every filter. When the two indexes together do not hold every scanned
//! column, an index join fetches the rest, provided the filters only need columns
//! the indexes do hold.

use crate::functions::{filter_cols, scan_private};
use xform_core::error::{OptResult, RuleLoadError};
use xform_core::expr::{ColSet, ColumnId};
use xform_core::function::{FnContext, FunctionRegistry, Value};
use xform_core::operator::{IndexJoinPrivate, OpTag, Private, ZigzagJoinPrivate};
use xform_core::rule::dsl::*;
use xform_core::rule::{NewExpr, RuleChild, RuleDef, RuleResult};

pub fn rules() -> Vec<RuleDef> {
    vec![RuleDef::explore(
        "GenerateZigzagJoins",
        op(
            "Select",
            vec![
                op(
                    "Scan",
                    vec![guarded(
                        cap("scanPrivate"),
                        guard(call("IsCanonicalScan", vec![var("scanPrivate")])),
                    )],
                ),
                cap("filters"),
            ],
        ),
        call("GenerateZigzagJoins", vec![var("scanPrivate"), var("filters")]),
    )]
}

pub fn register(fns: &mut FunctionRegistry) -> Result<(), RuleLoadError> {
    fns.register("GenerateZigzagJoins", 2, generate_zigzag_joins)
}

fn generate_zigzag_joins(ctx: &FnContext<'_>, args: &[Value]) -> OptResult<Value> {
    let scan = scan_private(&args[0])?;
    let filters = args[1].as_filters()?;
    let memo = ctx.memo;
    let meta = memo.metadata();

    let fixed: Vec<ColumnId> = filters
        .iter()
        .filter_map(|f| memo.scalar(*f).as_constant_equality().map(|(c, _)| c))
        .collect();
    let def = &meta.table(scan.table)?.def;
    let mut candidates: Vec<(usize, ColumnId)> = Vec::new();
    for index in 1..def.index_count() {
        if def.is_inverted(index) {
            continue;
        }
        if let Some(&first) = meta.index_keys(scan.table, index)?.first() {
            if fixed.contains(&first) {
                candidates.push((index, first));
            }
        }
    }

    let eq_cols = meta.index_keys(scan.table, 0)?;
    let needed = filter_cols(memo, filters);
    let mut out = Vec::new();
    for (i, &(left_index, left_col)) in candidates.iter().enumerate() {
        for &(right_index, right_col) in &candidates[i + 1..] {
            if left_col == right_col {
                continue;
            }
            let covered = meta
                .index_cols(scan.table, left_index)?
                .union(&meta.index_cols(scan.table, right_index)?);
            let zigzag = |cols: ColSet| {
                NewExpr::new(
                    OpTag::ZigzagJoin,
                    vec![],
                    filters.to_vec(),
                    Some(Private::ZigzagJoin(ZigzagJoinPrivate {
                        table: scan.table,
                        left_index,
                        right_index,
                        left_fixed: vec![left_col],
                        right_fixed: vec![right_col],
                        eq_cols: eq_cols.clone(),
                        cols,
                    })),
                )
            };
            if scan.cols.is_subset(&covered) {
                out.push(RuleResult::Expr(zigzag(scan.cols.clone())));
            } else if needed.is_subset(&covered) {
                out.push(RuleResult::Expr(NewExpr::new(
                    OpTag::IndexJoin,
                    vec![RuleChild::New(zigzag(scan.cols.intersection(&covered)))],
                    vec![],
                    Some(Private::IndexJoin(IndexJoinPrivate {
                        table: scan.table,
                        cols: scan.cols.clone(),
                    })),
                )));
            }
        }
    }
    Ok(Value::Alternatives(out))
}

#[cfg(test)]
mod tests {
    use crate::testutil::Fixture;
    use xform_core::catalog::{IndexDef, TableDef};
    use xform_core::expr::{col, eq, int, TableRef};
    use xform_core::operator::{OpTag, Private};

    /// `t(id, a, b, c)` with primary key `id` and single-column indexes on `a` and `b`.
    fn fixture(store_c: bool) -> Fixture {
        let by_b = IndexDef::new("t_b", vec![2]);
        Fixture::new(vec![TableDef::new(TableRef::new("s", "t"), 100_000.0)
            .with_column("id", 100_000.0)
            .with_column("a", 1000.0)
            .with_column("b", 1000.0)
            .with_column("c", 10.0)
            .with_primary_key(&["id"])
            .with_index(IndexDef::new("t_a", vec![1]))
            .with_index(if store_c { by_b.storing(vec![3]) } else { by_b })])
    }

    #[test]
    fn test_zigzag_over_two_fixed_indexes() {
        let mut f = fixture(true);
        let t = f.scan("t");
        let (a, b) = (f.col("t", "a"), f.col("t", "b"));
        let select = f.select(t, vec![eq(col(a), int(1)), eq(col(b), int(2))]);
        let filters = f.memo.expr(f.memo.group(select).exprs[0]).filters.clone();
        f.explore(select);

        let zigzags = f.members(select, OpTag::ZigzagJoin);
        assert_eq!(zigzags.len(), 1);
        assert_eq!(zigzags[0].filters, filters);
        match &zigzags[0].private {
            Some(Private::ZigzagJoin(z)) => {
                assert_eq!((z.left_index, z.right_index), (1, 2));
                assert_eq!((z.left_fixed.clone(), z.right_fixed.clone()), (vec![a], vec![b]));
                assert_eq!(z.eq_cols, vec![f.col("t", "id")]);
                assert_eq!(z.cols, f.memo.props(t).output_cols);
            }
            other => panic!("unexpected private {other:?}"),
        }
    }

    #[test]
    fn test_uncovered_columns_are_fetched_by_index_join() {
        let mut f = fixture(false);
        let t = f.scan("t");
        let (a, b) = (f.col("t", "a"), f.col("t", "b"));
        let select = f.select(t, vec![eq(col(a), int(1)), eq(col(b), int(2))]);
        f.explore(select);

        assert!(f.members(select, OpTag::ZigzagJoin).is_empty());
        let index_join = f.members(select, OpTag::IndexJoin);
        assert_eq!(index_join.len(), 1);
        let zigzag = f.members(index_join[0].children[0], OpTag::ZigzagJoin);
        assert_eq!(zigzag.len(), 1);
    }

    #[test]
    fn test_single_fixed_index_does_not_fire() {
        let mut f = fixture(true);
        let t = f.scan("t");
        let (a, c) = (f.col("t", "a"), f.col("t", "c"));
        let select = f.select(t, vec![eq(col(a), int(1)), eq(col(c), int(2))]);
        f.explore(select);
        assert_eq!(f.memo.count_exprs(OpTag::ZigzagJoin), 0);
    }
}
