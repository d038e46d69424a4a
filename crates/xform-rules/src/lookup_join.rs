//! # Lookup Join Generation
//!
//! A lookup join reads its left input and, for every row, probes an index of the
//! right-hand table with the values of the left columns equated to the index key.
//! When the left input is small and the right table is large this avoids reading
//! the right table at all.
//!
//! ```text
//! [GenerateLookupJoins, Explore]
//! (InnerJoin | LeftJoin | SemiJoin | AntiJoin
//!     $left:*
//!     (Scan $scanPrivate:* & (IsCanonicalScan $scanPrivate))
//!     $on:*
//!     $private:*)
//! => (GenerateLookupJoins (OpName) $left $scanPrivate $on $private)
//!
//! [GenerateLookupJoinsWithFilter, Explore]
//! (InnerJoin | LeftJoin | SemiJoin | AntiJoin
//!     $left:*
//!     (Select (Scan $scanPrivate:* & (IsCanonicalScan $scanPrivate)) $filters:*)
//!     $on:*
//!     $private:*)
//! => (GenerateLookupJoins (OpName) $left $scanPrivate (ConcatFilters $on $filters) $private)
//! ```
//!
//! ## Index Choice
//!
//! Every forward index of the table is considered. The lookup key is the longest
//! prefix of the index key whose columns are each equated to some left column; an
//! index whose first key column is not equated is skipped. All ON conjuncts (and,
//! for the filtered form, the right-side filters) stay on the lookup join and are
//! evaluated on the joined rows.
//!
//! ## Covering
//!
//! When the index does not store every column the scan produces, the lookup join
//! only fetches the indexed columns and an index join on the primary key fetches
//! the rest. That is only valid for inner and left joins, and only when the join
//! filters can be evaluated on the fetched columns. Semi and anti joins never
//! output right-hand columns, so they need the filter columns alone.
//!
//! Only the right input is looked up; `CommuteJoin` produces the orientation that
//! looks up into the left table.

use crate::functions::{filter_cols, scan_private};
use xform_core::error::{OptError, OptResult, RuleLoadError};
use xform_core::expr::{ColSet, ColumnId, JoinType};
use xform_core::function::{FnContext, FunctionRegistry, Value};
use xform_core::memo::{GroupId, Memo, ScalarId};
use xform_core::operator::{IndexJoinPrivate, JoinHint, LookupJoinPrivate, OpTag, Private, ScanPrivate};
use xform_core::rule::dsl::*;
use xform_core::rule::{NewExpr, PatternDef, RuleChild, RuleDef, RuleResult};

const LOOKUP_JOINS: &str = "InnerJoin|LeftJoin|SemiJoin|AntiJoin";

fn canonical_scan() -> PatternDef {
    op(
        "Scan",
        vec![guarded(
            cap("scanPrivate"),
            guard(call("IsCanonicalScan", vec![var("scanPrivate")])),
        )],
    )
}

pub fn rules() -> Vec<RuleDef> {
    vec![
        RuleDef::explore(
            "GenerateLookupJoins",
            op(
                LOOKUP_JOINS,
                vec![cap("left"), canonical_scan(), cap("on"), cap("private")],
            ),
            call(
                "GenerateLookupJoins",
                vec![op_name(None), var("left"), var("scanPrivate"), var("on"), var("private")],
            ),
        ),
        RuleDef::explore(
            "GenerateLookupJoinsWithFilter",
            op(
                LOOKUP_JOINS,
                vec![
                    cap("left"),
                    op("Select", vec![canonical_scan(), cap("filters")]),
                    cap("on"),
                    cap("private"),
                ],
            ),
            call(
                "GenerateLookupJoins",
                vec![
                    op_name(None),
                    var("left"),
                    var("scanPrivate"),
                    call("ConcatFilters", vec![var("on"), var("filters")]),
                    var("private"),
                ],
            ),
        ),
    ]
}

pub fn register(fns: &mut FunctionRegistry) -> Result<(), RuleLoadError> {
    fns.register("GenerateLookupJoins", 5, generate_lookup_joins)
}

/// Join type of a logical join tag accepted by the index-probing generators.
pub(crate) fn lookup_join_type(tag: OpTag) -> OptResult<JoinType> {
    match tag.join_type() {
        Some(t @ (JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti)) => Ok(t),
        _ => Err(OptError::internal(format!("{tag} cannot be built as an index probe"))),
    }
}

/// Whether the join's hint forbids probing the right input.
pub(crate) fn hint_forbids_lookup(private: &Value) -> OptResult<bool> {
    let hint = private.as_private()?.as_join().map(|p| p.hint).unwrap_or_default();
    Ok(matches!(hint, JoinHint::Hash | JoinHint::Merge))
}

fn generate_lookup_joins(ctx: &FnContext<'_>, args: &[Value]) -> OptResult<Value> {
    let join_type = lookup_join_type(args[0].as_tag()?)?;
    let left = args[1].as_group()?;
    let scan = scan_private(&args[2])?;
    let on = args[3].as_filters()?;
    if hint_forbids_lookup(&args[4])? {
        return Ok(Value::Alternatives(vec![]));
    }

    let memo = ctx.memo;
    let input_cols = &memo.props(left).output_cols;
    let def = &memo.metadata().table(scan.table)?.def;
    let mut out = Vec::new();
    for index in 0..def.index_count() {
        if def.is_inverted(index) {
            continue;
        }
        let mut key_cols = Vec::new();
        for key in memo.metadata().index_keys(scan.table, index)? {
            match equated_input_col(memo, on, key, input_cols) {
                Some(c) => key_cols.push(c),
                None => break,
            }
        }
        if key_cols.is_empty() {
            continue;
        }
        let build = |lookup_cols: ColSet| {
            NewExpr::new(
                OpTag::LookupJoin,
                vec![RuleChild::Group(left)],
                on.to_vec(),
                Some(Private::LookupJoin(LookupJoinPrivate {
                    join_type,
                    table: scan.table,
                    index,
                    key_cols: key_cols.clone(),
                    lookup_cols,
                })),
            )
        };
        if let Some(expr) = cover_with_index_join(memo, join_type, left, scan, index, on, build)? {
            out.push(RuleResult::Expr(expr));
        }
    }
    Ok(Value::Alternatives(out))
}

/// The input column equated to `key` by some conjunct.
fn equated_input_col(memo: &Memo, on: &[ScalarId], key: ColumnId, input_cols: &ColSet) -> Option<ColumnId> {
    on.iter().find_map(|f| {
        let (x, y) = memo.scalar(*f).as_column_equality()?;
        if x == key && input_cols.contains(y) {
            Some(y)
        } else if y == key && input_cols.contains(x) {
            Some(x)
        } else {
            None
        }
    })
}

/// Build an index probe that produces `scan.cols`.
///
/// `build` receives the table columns the probe itself fetches from `index`. A
/// covering index gets the probe alone. Otherwise inner and left joins are wrapped in
/// an index join over the primary index, and semi and anti joins, which output no
/// table columns, are built directly. `None` when `filters` need a column neither
/// side can supply.
pub(crate) fn cover_with_index_join(
    memo: &Memo,
    join_type: JoinType,
    left: GroupId,
    scan: &ScanPrivate,
    index: usize,
    filters: &[ScalarId],
    build: impl FnOnce(ColSet) -> NewExpr,
) -> OptResult<Option<NewExpr>> {
    let index_cols = memo.metadata().index_cols(scan.table, index)?;
    if scan.cols.is_subset(&index_cols) {
        return Ok(Some(build(scan.cols.clone())));
    }

    let fetched = scan.cols.intersection(&index_cols);
    let available = memo.props(left).output_cols.union(&fetched);
    if !filter_cols(memo, filters).is_subset(&available) {
        return Ok(None);
    }
    Ok(match join_type {
        JoinType::Semi | JoinType::Anti => Some(build(fetched)),
        JoinType::Inner | JoinType::Left => Some(NewExpr::new(
            OpTag::IndexJoin,
            vec![RuleChild::New(build(fetched))],
            vec![],
            Some(Private::IndexJoin(IndexJoinPrivate {
                table: scan.table,
                cols: scan.cols.clone(),
            })),
        )),
        JoinType::Right | JoinType::Full => None,
    })
}

#[cfg(test)]
mod tests {
    use crate::testutil::Fixture;
    use xform_core::catalog::{IndexDef, TableDef};
    use xform_core::expr::{col, eq, int, TableRef};
    use xform_core::memo::MemoExpr;
    use xform_core::operator::{JoinHint, JoinPrivate, OpTag, Private};

    /// `small(k, v)`; `big(id, x, y)` with primary key `id` and an index on `x`.
    fn fixture() -> Fixture {
        Fixture::new(vec![
            TableDef::new(TableRef::new("s", "small"), 10.0)
                .with_column("k", 10.0)
                .with_column("v", 5.0),
            TableDef::new(TableRef::new("s", "big"), 1_000_000.0)
                .with_column("id", 1_000_000.0)
                .with_column("x", 1000.0)
                .with_column("y", 100.0)
                .with_primary_key(&["id"])
                .with_index(IndexDef::new("big_x", vec![1])),
        ])
    }

    #[test]
    fn test_lookup_into_primary_index() {
        let mut f = fixture();
        let (s, b) = (f.scan("small"), f.scan("big"));
        let (k, id) = (f.col("small", "k"), f.col("big", "id"));
        let join = f.join(OpTag::InnerJoin, s, b, vec![eq(col(k), col(id))]);
        f.explore(join);

        // The commuted join probes `small` instead.
        let lookups: Vec<_> = f
            .members(join, OpTag::LookupJoin)
            .into_iter()
            .filter(|e| e.children == vec![s])
            .collect();
        assert_eq!(lookups.len(), 1);
        match &lookups[0].private {
            Some(Private::LookupJoin(p)) => {
                assert_eq!(p.index, 0);
                assert_eq!(p.key_cols, vec![k]);
                assert_eq!(p.lookup_cols, f.memo.props(b).output_cols);
            }
            other => panic!("unexpected private {other:?}"),
        }
    }

    #[test]
    fn test_non_covering_index_gets_index_join() {
        let mut f = fixture();
        let (s, b) = (f.scan("small"), f.scan("big"));
        let (k, x) = (f.col("small", "k"), f.col("big", "x"));
        let join = f.join(OpTag::InnerJoin, s, b, vec![eq(col(k), col(x))]);
        f.explore(join);

        assert!(f
            .members(join, OpTag::LookupJoin)
            .iter()
            .all(|e| e.children != vec![s]));
        let index_joins = f.members(join, OpTag::IndexJoin);
        assert_eq!(index_joins.len(), 1);
        let inner = f.members(index_joins[0].children[0], OpTag::LookupJoin);
        assert_eq!(inner.len(), 1);
        match &inner[0].private {
            Some(Private::LookupJoin(p)) => {
                assert_eq!(p.index, 1);
                assert!(!p.lookup_cols.contains(f.col("big", "y")));
            }
            other => panic!("unexpected private {other:?}"),
        }
    }

    #[test]
    fn test_semi_join_probes_non_covering_index_directly() {
        let mut f = fixture();
        let (s, b) = (f.scan("small"), f.scan("big"));
        let (k, x) = (f.col("small", "k"), f.col("big", "x"));
        let semi = f.join(OpTag::SemiJoin, s, b, vec![eq(col(k), col(x))]);
        f.explore(semi);
        assert_eq!(f.members(semi, OpTag::LookupJoin).len(), 1);
        assert!(f.members(semi, OpTag::IndexJoin).is_empty());
    }

    #[test]
    fn test_filtered_right_input_merges_filters() {
        let mut f = fixture();
        let s = f.scan("small");
        let big = f.scan("big");
        let (k, id, x, y) = (f.col("small", "k"), f.col("big", "id"), f.col("big", "x"), f.col("big", "y"));
        let selected = f.filters(vec![eq(col(y), int(3)), eq(col(x), int(7))]);
        let filtered = f.memo.intern(MemoExpr::select(big, selected.clone())).unwrap().0;
        // `x = 7` is both a join conjunct and a right-side filter.
        let on = f.filters(vec![eq(col(k), col(id)), eq(col(x), int(7))]);
        let join = f.memo.intern(MemoExpr::join(OpTag::InnerJoin, s, filtered, on.clone())).unwrap().0;
        f.explore(join);

        let lookups: Vec<_> = f
            .members(join, OpTag::LookupJoin)
            .into_iter()
            .filter(|e| e.children == vec![s])
            .collect();
        assert_eq!(lookups.len(), 1);

        let mut expected: Vec<_> = on.iter().chain(&selected).copied().collect();
        expected.sort_unstable();
        expected.dedup();
        let mut actual = lookups[0].filters.clone();
        actual.sort_unstable();
        assert_eq!(actual, expected);
        assert_eq!(lookups[0].filters.len(), expected.len());
        assert_eq!(expected.len(), 3);
    }

    #[test]
    fn test_hash_hint_blocks_lookup() {
        let mut f = fixture();
        let (s, b) = (f.scan("small"), f.scan("big"));
        let (k, id) = (f.col("small", "k"), f.col("big", "id"));
        let on = f.filters(vec![eq(col(k), col(id))]);
        let hinted = MemoExpr::new(
            OpTag::InnerJoin,
            vec![s, b],
            on,
            Some(Private::Join(JoinPrivate { hint: JoinHint::Hash })),
        );
        let (join, _) = f.memo.intern(hinted).unwrap();
        f.explore(join);
        assert!(f.members(join, OpTag::LookupJoin).is_empty());
    }
}
