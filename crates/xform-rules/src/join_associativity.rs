//! # Join Associativity Rule
//!
//! This rule implements the algebraic identity for inner joins:
//! `(A JOIN_1 B) JOIN_2 C = A JOIN_1 (B JOIN_2 C)`
//!
//! ## Why Associativity Matters
//!
//! Associativity changes the *shape* of the join tree (left-deep vs right-deep vs
//! bushy). Combined with commutativity it enables exploring the full space of join
//! orderings. This is critical for queries with many tables, where the optimal join
//! order can be orders of magnitude faster than a naive one.
//!
//! For example, consider a 3-table join `(A ⋈ B) ⋈ C`:
//! - Without associativity: only commutativity swaps are explored (A⋈B)⋈C vs C⋈(A⋈B).
//! - With associativity: the optimizer also considers A⋈(B⋈C), which may be much
//!   cheaper if B and C are small and A is large.
//!
//! ## Rule
//!
//! ```text
//! [AssociateJoin, Explore]
//! (InnerJoin
//!     $left:(InnerJoin $innerLeft:* $innerRight:* $innerOn:* $innerPrivate:* & (NoJoinHints $innerPrivate))
//!     $right:*
//!     $on:*
//!     $private:* & (NoJoinHints $private)
//! )
//! =>
//! (InnerJoin
//!     $innerLeft
//!     (InnerJoin
//!         $innerRight
//!         $right
//!         (SortFilters (ExtractBoundConditions $newOn:(ConcatFilters $on $innerOn) $newCols:(OutputCols2 $innerRight $right)))
//!         (EmptyJoinPrivate))
//!     (SortFilters (ExtractUnboundConditions $newOn $newCols))
//!     $private
//! )
//! ```
//!
//! ## Condition Handling
//!
//! For inner joins, predicates can be freely redistributed as long as each predicate
//! is placed on a join where both sides' columns are available. The rule pools the
//! outer and inner conditions and splits the pool by the columns of `B ⋈ C`:
//!
//! 1. **Bound predicates** reference only columns of B and C. They move to the new
//!    inner join.
//! 2. **Unbound predicates** reference A. They stay on the new outer join.
//!
//! Every predicate of the original tree therefore appears exactly once in the
//! rewritten tree. When no predicate connects B and C the new inner join is a cross
//! join; it is still generated so that the search space is complete, and the cost
//! model prices it out.
//!
//! ## Orientation
//!
//! Only the left-to-right direction is implemented. The other orientations are
//! reached through `CommuteJoin` on the outer and inner joins, and a group merge
//! re-queues every ancestor whose pattern may now see a new shape.
//!
//! ## Applicability
//!
//! Inner joins only, and only when neither join carries a hint. Outer join
//! associativity has ordering constraints (`(A LEFT JOIN B) LEFT JOIN C` is not
//! `A LEFT JOIN (B LEFT JOIN C)` in general) that need separate validity checks.

use xform_core::rule::dsl::*;
use xform_core::rule::RuleDef;

pub fn rules() -> Vec<RuleDef> {
    let inner = bind(
        "left",
        op(
            "InnerJoin",
            vec![
                cap("innerLeft"),
                cap("innerRight"),
                cap("innerOn"),
                guarded(cap("innerPrivate"), guard(call("NoJoinHints", vec![var("innerPrivate")]))),
            ],
        ),
    );
    let pattern = op(
        "InnerJoin",
        vec![
            inner,
            cap("right"),
            cap("on"),
            guarded(cap("private"), guard(call("NoJoinHints", vec![var("private")]))),
        ],
    );

    let new_on = let_bind("newOn", call("ConcatFilters", vec![var("on"), var("innerOn")]));
    let new_cols = let_bind("newCols", call("OutputCols2", vec![var("innerRight"), var("right")]));
    let template = construct(
        "InnerJoin",
        vec![
            var("innerLeft"),
            construct(
                "InnerJoin",
                vec![
                    var("innerRight"),
                    var("right"),
                    call(
                        "SortFilters",
                        vec![call("ExtractBoundConditions", vec![new_on, new_cols])],
                    ),
                    call("EmptyJoinPrivate", vec![]),
                ],
            ),
            call(
                "SortFilters",
                vec![call("ExtractUnboundConditions", vec![var("newOn"), var("newCols")])],
            ),
            var("private"),
        ],
    );

    vec![RuleDef::explore("AssociateJoin", pattern, template)]
}
