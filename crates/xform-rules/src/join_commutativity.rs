//! # Join Commutativity Rules
//!
//! These rules implement the identity `A JOIN B = B JOIN A` and its variants for the
//! join types whose semantics are not symmetric.
//!
//! ## Why Commutativity Matters
//!
//! In a cost-based optimizer the order of join inputs significantly affects
//! performance:
//!
//! - **Hash join build side**: the right input is built into the hash table, so the
//!   smaller relation should end up on the right.
//! - **Lookup joins**: only the right input can become the looked-up table, so a
//!   lookup into the left table needs the inputs swapped first.
//! - **Join reordering**: combined with associativity, commutativity reaches every
//!   bushy join tree over a set of relations.
//!
//! ## Rules
//!
//! ```text
//! [CommuteJoin, Explore]
//! (InnerJoin | FullJoin $left:* $right:* $on:* $private:*)
//! => ((OpName) $right $left $on $private)
//!
//! [CommuteLeftJoin, Explore]
//! (LeftJoin $left:* $right:* $on:* $private:*)
//! => (RightJoin $right $left $on $private)
//!
//! [CommuteRightJoin, Explore]
//! (RightJoin $left:* $right:* $on:* $private:*)
//! => (LeftJoin $right $left $on $private)
//!
//! [CommuteSemiJoin, Explore]
//! (SemiJoin $left:* $right:* $on:* & (IsSimpleEquality $on) $private:*)
//! => (Project
//!      (InnerJoin
//!        $left
//!        (DistinctOn $right (MakeGrouping (IntersectionCols (OutputCols $right) (FilterOuterCols $on))))
//!        $on
//!        (EmptyJoinPrivate))
//!      (MakeProjection (OutputCols $left)))
//! ```
//!
//! ## Semi Joins
//!
//! A semi join has no commuted form of its own. When the ON condition is a
//! conjunction of column equalities, `A SEMI JOIN B` is equivalent to joining `A` with
//! the distinct values of `B`'s equality columns and projecting `A`'s columns back
//! out. The inner join that results can then be commuted like any other, which lets
//! `B` drive the join. Any other ON condition could match one `A` row against
//! several distinct `B` groupings, so the rule does not fire.
//!
//! The commuted forms re-emit the matched operator through `OpName`, so a single
//! rule serves both inner and full joins.

use xform_core::rule::dsl::*;
use xform_core::rule::{PatternDef, RuleDef, TemplateDef};

fn join_fields() -> Vec<PatternDef> {
    vec![cap("left"), cap("right"), cap("on"), cap("private")]
}

fn swapped() -> Vec<TemplateDef> {
    vec![var("right"), var("left"), var("on"), var("private")]
}

pub fn rules() -> Vec<RuleDef> {
    vec![
        RuleDef::explore(
            "CommuteJoin",
            op("InnerJoin|FullJoin", join_fields()),
            matched_op(None, swapped()),
        ),
        RuleDef::explore("CommuteLeftJoin", op("LeftJoin", join_fields()), construct("RightJoin", swapped())),
        RuleDef::explore("CommuteRightJoin", op("RightJoin", join_fields()), construct("LeftJoin", swapped())),
        RuleDef::explore(
            "CommuteSemiJoin",
            op(
                "SemiJoin",
                vec![
                    cap("left"),
                    cap("right"),
                    guarded(cap("on"), guard(call("IsSimpleEquality", vec![var("on")]))),
                    any(),
                ],
            ),
            construct(
                "Project",
                vec![
                    construct(
                        "InnerJoin",
                        vec![
                            var("left"),
                            construct(
                                "DistinctOn",
                                vec![
                                    var("right"),
                                    call(
                                        "MakeGrouping",
                                        vec![call(
                                            "IntersectionCols",
                                            vec![
                                                call("OutputCols", vec![var("right")]),
                                                call("FilterOuterCols", vec![var("on")]),
                                            ],
                                        )],
                                    ),
                                ],
                            ),
                            var("on"),
                            call("EmptyJoinPrivate", vec![]),
                        ],
                    ),
                    call("MakeProjection", vec![call("OutputCols", vec![var("left")])]),
                ],
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use crate::testutil::Fixture;
    use xform_core::expr::{col, eq, lt};
    use xform_core::operator::{OpTag, Private};

    #[test]
    fn test_commute_join_keeps_matched_operator() {
        let mut f = Fixture::abc();
        let (a, b) = (f.scan("a"), f.scan("b"));
        let on = vec![eq(col(f.col("a", "k")), col(f.col("b", "k")))];
        let full = f.join(OpTag::FullJoin, a, b, on);
        f.explore(full);

        let commuted: Vec<_> = f
            .members(full, OpTag::FullJoin)
            .iter()
            .map(|e| e.children.clone())
            .collect();
        assert!(commuted.contains(&vec![a, b]));
        assert!(commuted.contains(&vec![b, a]));
        assert!(f.members(full, OpTag::InnerJoin).is_empty());
    }

    #[test]
    fn test_commute_left_join_produces_right_join() {
        let mut f = Fixture::abc();
        let (a, b) = (f.scan("a"), f.scan("b"));
        let on = vec![eq(col(f.col("a", "k")), col(f.col("b", "k")))];
        let left = f.join(OpTag::LeftJoin, a, b, on);
        f.explore(left);

        let right = f.members(left, OpTag::RightJoin);
        assert_eq!(right.len(), 1);
        assert_eq!(right[0].children, vec![b, a]);
        // Commuting the right join back lands on the original expression.
        assert_eq!(f.members(left, OpTag::LeftJoin).len(), 1);
    }

    #[test]
    fn test_commute_semi_join_requires_equalities() {
        let mut f = Fixture::abc();
        let (a, b) = (f.scan("a"), f.scan("b"));
        let on = vec![lt(col(f.col("a", "k")), col(f.col("b", "k")))];
        let semi = f.join(OpTag::SemiJoin, a, b, on);
        f.explore(semi);
        assert!(f.members(semi, OpTag::Project).is_empty());
    }

    #[test]
    fn test_commute_semi_join_builds_distinct_inner_join() {
        let mut f = Fixture::abc();
        let (a, b) = (f.scan("a"), f.scan("b"));
        let (ak, av, bk, bv) = (f.col("a", "k"), f.col("a", "v"), f.col("b", "k"), f.col("b", "v"));
        let semi = f.join(
            OpTag::SemiJoin,
            a,
            b,
            vec![eq(col(ak), col(bk)), eq(col(av), col(bv))],
        );
        let on = f.memo.expr(f.memo.group(semi).exprs[0]).filters.clone();
        f.explore(semi);

        let project = f.members(semi, OpTag::Project);
        assert_eq!(project.len(), 1);
        match &project[0].private {
            Some(Private::Project(p)) => assert_eq!(p.cols, f.memo.props(a).output_cols),
            other => panic!("unexpected private {other:?}"),
        }

        let inner = project[0].children[0];
        let join = f
            .members(inner, OpTag::InnerJoin)
            .into_iter()
            .find(|e| e.children[0] == a)
            .unwrap();
        assert_eq!(join.filters, on);

        let distinct = f.members(join.children[1], OpTag::DistinctOn);
        assert_eq!(distinct.len(), 1);
        assert_eq!(distinct[0].children, vec![b]);
        match &distinct[0].private {
            Some(Private::Grouping(g)) => {
                assert_eq!(g.grouping_cols.iter().collect::<Vec<_>>(), vec![bk, bv]);
            }
            other => panic!("unexpected private {other:?}"),
        }
    }
}
