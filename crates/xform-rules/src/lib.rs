//! # Built-in Transformation Rules
//!
//! This crate provides the default rule corpus for the xform memo engine, written as
//! rule definitions with the `xform_core::rule::dsl` helpers, together with the
//! custom functions those rules call. Rules are divided into two phases:
//!
//! ## Normalization Rules (replace)
//!
//! - **`EliminateSelect`**, **`MergeSelects`**, **`MergeSelectInnerJoin`**: collapse
//!   empty and stacked selections and push selections into inner joins.
//! - **`SortJoinFilters`**: keeps join filter lists in canonical order.
//! - **`EliminateProject`**: drops projections that keep every input column.
//!
//! ## Exploration Rules (add)
//!
//! - **`CommuteJoin`**, **`CommuteLeftJoin`**, **`CommuteRightJoin`**,
//!   **`CommuteSemiJoin`**: swap join inputs.
//! - **`AssociateJoin`**: reshapes `(A ⋈ B) ⋈ C` into `A ⋈ (B ⋈ C)`.
//! - **`GenerateMergeJoins`**: merge joins over the equality columns.
//! - **`GenerateLookupJoins`**, **`GenerateLookupJoinsWithFilter`**: index probes into
//!   the right-hand table.
//! - **`GenerateGeoLookupJoins`**: inverted index probes for spatial predicates.
//! - **`GenerateZigzagJoins`**: two secondary indexes zipped on the primary key.
//!
//! The assembled table is immutable; [`shared_rule_table`] builds it once per
//! process and hands out shared references.

pub mod functions;
pub mod geo_lookup_join;
pub mod join_associativity;
pub mod join_commutativity;
pub mod lookup_join;
pub mod merge_join;
pub mod normalize;
pub mod zigzag_join;

#[cfg(test)]
mod testutil;

use std::sync::{Arc, OnceLock};
use tracing::debug;
use xform_core::error::RuleLoadError;
use xform_core::function::FunctionRegistry;
use xform_core::operator::RelationalOperators;
use xform_core::rule::{RuleDef, RuleTable};

/// Every custom function the built-in rules call.
pub fn builtin_functions() -> Result<FunctionRegistry, RuleLoadError> {
    let mut fns = FunctionRegistry::new();
    functions::register(&mut fns)?;
    merge_join::register(&mut fns)?;
    lookup_join::register(&mut fns)?;
    geo_lookup_join::register(&mut fns)?;
    zigzag_join::register(&mut fns)?;
    Ok(fns)
}

/// The built-in rule definitions, normalization rules first.
pub fn rule_defs() -> Vec<RuleDef> {
    let mut defs = normalize::rules();
    defs.extend(join_commutativity::rules());
    defs.extend(join_associativity::rules());
    defs.extend(merge_join::rules());
    defs.extend(lookup_join::rules());
    defs.extend(geo_lookup_join::rules());
    defs.extend(zigzag_join::rules());
    defs
}

/// Assemble a table from `defs` against the built-in functions and operators.
pub fn rule_table_with(defs: Vec<RuleDef>) -> Result<RuleTable, RuleLoadError> {
    RuleTable::assemble(defs, &builtin_functions()?, &RelationalOperators)
}

pub fn default_rule_table() -> Result<RuleTable, RuleLoadError> {
    rule_table_with(rule_defs())
}

/// The default rule table, assembled on first use.
pub fn shared_rule_table() -> Result<Arc<RuleTable>, RuleLoadError> {
    static TABLE: OnceLock<Result<Arc<RuleTable>, RuleLoadError>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            let table = default_rule_table().map(Arc::new);
            if let Ok(t) = &table {
                debug!(rules = t.len(), "assembled default rule table");
            }
            table
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use xform_core::rule::dsl::*;
    use xform_core::rule::Phase;

    #[test]
    fn test_default_table_assembles() {
        let table = default_rule_table().unwrap();
        assert_eq!(table.len(), rule_defs().len());
        assert_eq!(table.phase_rules(Phase::Normalize).len(), 5);
        assert!(table.get("AssociateJoin").is_some());
        assert!(table.get("GenerateZigzagJoins").is_some());
        // (InnerJoin (InnerJoin ...) ...) and (Join $left (Select (Scan ...)) ...).
        assert_eq!(table.max_explore_depth(), 3);
    }

    #[test]
    fn test_shared_table_is_built_once() {
        let a = shared_rule_table().unwrap();
        let b = shared_rule_table().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_function_names_rule() {
        let bad = RuleDef::explore(
            "CommuteWithTypo",
            op("InnerJoin", vec![cap("left"), cap("right"), cap("on"), cap("private")]),
            construct(
                "InnerJoin",
                vec![var("right"), var("left"), call("SortFilterz", vec![var("on")]), var("private")],
            ),
        );
        let err = rule_table_with(vec![bad]).unwrap_err();
        assert_eq!(err.rule(), Some("CommuteWithTypo"));
        assert!(err.to_string().contains("SortFilterz"));
    }
}
