//! # Normalization Rules
//!
//! Normalization rules rewrite an expression into its canonical form before any
//! exploration rule sees it. The rewritten expression *replaces* the matched one in
//! its group, so the non-canonical shape never takes part in exploration.
//!
//! ## Rules
//!
//! ```text
//! [EliminateSelect, Normalize]
//! (Select $input:* []) => $input
//!
//! [MergeSelects, Normalize]
//! (Select (Select $input:* $inner:*) $filters:*)
//! => (Select $input (ConcatFilters $inner $filters))
//!
//! [MergeSelectInnerJoin, Normalize]
//! (Select (InnerJoin $left:* $right:* $on:* $private:*) $filters:*)
//! => (InnerJoin $left $right (SortFilters (ConcatFilters $on $filters)) $private)
//!
//! [SortJoinFilters, Normalize]
//! (InnerJoin | LeftJoin | RightJoin | FullJoin | SemiJoin | AntiJoin
//!     $left:* $right:* $on:* & ^(IsSortedFilters $on) $private:*)
//! => ((OpName) $left $right (SortFilters $on) $private)
//!
//! [EliminateProject, Normalize]
//! (Project $input:* $private:* & (ColsAreEqual (ProjectionCols $private) (OutputCols $input)))
//! => $input
//! ```
//!
//! ## Canonical Filters
//!
//! Join filters are kept sorted by conjunct id. Exploration rules build joins from
//! pieces of other joins' filters; without a canonical order two joins over the same
//! inputs and conjuncts would be different memo expressions and the search space
//! would never close. `SortJoinFilters` canonicalizes whatever the input tree
//! supplied, and the rules that rebuild join filters sort them themselves.
//!
//! Pushing a `Select` into an inner join places its conjuncts on the join, where
//! `AssociateJoin` later distributes them to the lowest join that binds them.

use xform_core::rule::dsl::*;
use xform_core::rule::RuleDef;

const LOGICAL_JOINS: &str = "InnerJoin|LeftJoin|RightJoin|FullJoin|SemiJoin|AntiJoin";

pub fn rules() -> Vec<RuleDef> {
    vec![
        RuleDef::normalize(
            "EliminateSelect",
            op("Select", vec![cap("input"), empty_list()]),
            var("input"),
        ),
        RuleDef::normalize(
            "MergeSelects",
            op(
                "Select",
                vec![op("Select", vec![cap("input"), cap("inner")]), cap("filters")],
            ),
            construct(
                "Select",
                vec![var("input"), call("ConcatFilters", vec![var("inner"), var("filters")])],
            ),
        ),
        RuleDef::normalize(
            "MergeSelectInnerJoin",
            op(
                "Select",
                vec![
                    op("InnerJoin", vec![cap("left"), cap("right"), cap("on"), cap("private")]),
                    cap("filters"),
                ],
            ),
            construct(
                "InnerJoin",
                vec![
                    var("left"),
                    var("right"),
                    call(
                        "SortFilters",
                        vec![call("ConcatFilters", vec![var("on"), var("filters")])],
                    ),
                    var("private"),
                ],
            ),
        ),
        RuleDef::normalize(
            "SortJoinFilters",
            op(
                LOGICAL_JOINS,
                vec![
                    cap("left"),
                    cap("right"),
                    guarded(
                        cap("on"),
                        not(guard(call("IsSortedFilters", vec![var("on")]))),
                    ),
                    cap("private"),
                ],
            ),
            matched_op(
                None,
                vec![
                    var("left"),
                    var("right"),
                    call("SortFilters", vec![var("on")]),
                    var("private"),
                ],
            ),
        ),
        RuleDef::normalize(
            "EliminateProject",
            op(
                "Project",
                vec![
                    cap("input"),
                    guarded(
                        cap("private"),
                        guard(call(
                            "ColsAreEqual",
                            vec![
                                call("ProjectionCols", vec![var("private")]),
                                call("OutputCols", vec![var("input")]),
                            ],
                        )),
                    ),
                ],
            ),
            var("input"),
        ),
    ]
}
