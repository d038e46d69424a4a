//! # Shared Custom Functions
//!
//! Column-set and filter-list helpers used by several rules, plus the predicates and
//! payload builders that are not tied to one rule family. Generators live next to
//! the rules that call them.
//!
//! ## Filter Lists
//!
//! A filters value is an ordered list of interned conjunct ids. Two join expressions
//! with the same conjuncts in a different order are different memo expressions, so
//! rules that rebuild joins pass their filters through `SortFilters`, and the
//! `SortJoinFilters` normalization sorts whatever the input tree supplied. Sorting is
//! by conjunct id, which is interning order and therefore deterministic for a given
//! input.
//!
//! ## Predicates
//!
//! | name                 | arguments       | true when                                  |
//! |----------------------|-----------------|--------------------------------------------|
//! | `IsSimpleEquality`   | filters         | non-empty, every conjunct is `col = col`   |
//! | `NoJoinHints`        | join private    | no join hint was given                     |
//! | `IsCanonicalScan`    | scan private    | primary index, no constraint, no limit     |
//! | `HasInvertedIndexes` | scan private    | the table has an inverted index            |
//! | `IsGeoIndexFunction` | filter item     | the item calls an indexable geo function   |
//! | `IsSortedFilters`    | filters         | conjunct ids are strictly increasing       |
//! | `ColsAreEqual`       | cols, cols      | the sets are equal                         |

use xform_core::error::{OptError, OptResult, RuleLoadError};
use xform_core::expr::{is_geo_index_function, ColSet, Expr};
use xform_core::function::{FunctionRegistry, Value};
use xform_core::memo::{Memo, ScalarId};
use xform_core::operator::{GroupingPrivate, JoinHint, JoinPrivate, Private, ProjectPrivate, ScanPrivate};

pub fn register(fns: &mut FunctionRegistry) -> Result<(), RuleLoadError> {
    // Column sets.
    fns.register("OutputCols", 1, |ctx, args| {
        Ok(Value::Cols(ctx.memo.props(args[0].as_group()?).output_cols.clone()))
    })?;
    fns.register("OutputCols2", 2, |ctx, args| {
        let left = &ctx.memo.props(args[0].as_group()?).output_cols;
        let right = &ctx.memo.props(args[1].as_group()?).output_cols;
        Ok(Value::Cols(left.union(right)))
    })?;
    fns.register("IntersectionCols", 2, |_, args| {
        Ok(Value::Cols(args[0].as_cols()?.intersection(args[1].as_cols()?)))
    })?;
    fns.register("FilterOuterCols", 1, |ctx, args| {
        Ok(Value::Cols(filter_cols(ctx.memo, args[0].as_filters()?)))
    })?;
    fns.register("ColsAreEqual", 2, |_, args| {
        Ok(Value::Bool(args[0].as_cols()? == args[1].as_cols()?))
    })?;

    // Filter lists.
    fns.register("SortFilters", 1, |_, args| {
        Ok(Value::Filters(sort_filters(args[0].as_filters()?)))
    })?;
    fns.register("IsSortedFilters", 1, |_, args| {
        Ok(Value::Bool(args[0].as_filters()?.windows(2).all(|w| w[0] < w[1])))
    })?;
    fns.register("ConcatFilters", 2, |_, args| {
        Ok(Value::Filters(concat_filters(args[0].as_filters()?, args[1].as_filters()?)))
    })?;
    fns.register("ExtractBoundConditions", 2, |ctx, args| {
        let cols = args[1].as_cols()?;
        Ok(Value::Filters(
            args[0]
                .as_filters()?
                .iter()
                .copied()
                .filter(|f| is_bound(ctx.memo, *f, cols))
                .collect(),
        ))
    })?;
    fns.register("ExtractUnboundConditions", 2, |ctx, args| {
        let cols = args[1].as_cols()?;
        Ok(Value::Filters(
            args[0]
                .as_filters()?
                .iter()
                .copied()
                .filter(|f| !is_bound(ctx.memo, *f, cols))
                .collect(),
        ))
    })?;
    fns.register("IsSimpleEquality", 1, |ctx, args| {
        let filters = args[0].as_filters()?;
        Ok(Value::Bool(
            !filters.is_empty()
                && filters
                    .iter()
                    .all(|f| ctx.scalar(*f).as_column_equality().is_some()),
        ))
    })?;

    // Payloads.
    fns.register("EmptyJoinPrivate", 0, |_, _| Ok(Value::Private(Private::Join(JoinPrivate::default()))))?;
    fns.register("NoJoinHints", 1, |_, args| {
        let hint = match args[0].as_private()? {
            Private::Join(p) => p.hint,
            _ => JoinHint::None,
        };
        Ok(Value::Bool(hint == JoinHint::None))
    })?;
    fns.register("MakeGrouping", 1, |_, args| {
        Ok(Value::Private(Private::Grouping(GroupingPrivate {
            grouping_cols: args[0].as_cols()?.clone(),
            ordering: Vec::new(),
        })))
    })?;
    fns.register("MakeProjection", 1, |_, args| {
        Ok(Value::Private(Private::Project(ProjectPrivate {
            cols: args[0].as_cols()?.clone(),
        })))
    })?;
    fns.register("ProjectionCols", 1, |_, args| match args[0].as_private()? {
        Private::Project(p) => Ok(Value::Cols(p.cols.clone())),
        other => Err(OptError::internal(format!(
            "ProjectionCols expects a projection, found {:?}",
            other.kind()
        ))),
    })?;

    // Scans.
    fns.register("IsCanonicalScan", 1, |_, args| {
        Ok(Value::Bool(scan_private(&args[0])?.is_canonical()))
    })?;
    fns.register("HasInvertedIndexes", 1, |ctx, args| {
        let scan = scan_private(&args[0])?;
        let def = &ctx.memo.metadata().table(scan.table)?.def;
        Ok(Value::Bool((1..def.index_count()).any(|i| def.is_inverted(i))))
    })?;
    fns.register("IsGeoIndexFunction", 1, |ctx, args| {
        Ok(Value::Bool(matches!(
            ctx.scalar(args[0].as_scalar()?),
            Expr::Function { name, .. } if is_geo_index_function(name)
        )))
    })?;
    Ok(())
}

/// The scan payload behind a private value.
pub(crate) fn scan_private(value: &Value) -> OptResult<&ScanPrivate> {
    value
        .as_private()?
        .as_scan()
        .ok_or_else(|| OptError::internal("expected a scan private"))
}

/// Columns referenced by any conjunct.
pub(crate) fn filter_cols(memo: &Memo, filters: &[ScalarId]) -> ColSet {
    let mut cols = ColSet::new();
    for f in filters {
        for c in memo.scalar(*f).columns().iter() {
            cols.insert(c);
        }
    }
    cols
}

/// Whether every column of the conjunct is in `cols`.
pub(crate) fn is_bound(memo: &Memo, filter: ScalarId, cols: &ColSet) -> bool {
    memo.scalar(filter).columns().is_subset(cols)
}

pub(crate) fn sort_filters(filters: &[ScalarId]) -> Vec<ScalarId> {
    let mut sorted = filters.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}

/// `a` followed by the conjuncts of `b` not already in `a`.
pub(crate) fn concat_filters(a: &[ScalarId], b: &[ScalarId]) -> Vec<ScalarId> {
    let mut out = a.to_vec();
    for f in b {
        if !out.contains(f) {
            out.push(*f);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;
    use xform_core::function::FnContext;
    use xform_core::expr::{col, eq, func, lt};
    use xform_core::operator::OpTag;

    fn call(fixture: &Fixture, fns: &FunctionRegistry, name: &str, args: &[Value]) -> Value {
        let ctx = FnContext {
            memo: &fixture.memo,
            rule: "Test",
        };
        fns.get(name).unwrap().call(&ctx, args).unwrap()
    }

    fn registry() -> FunctionRegistry {
        let mut fns = FunctionRegistry::new();
        register(&mut fns).unwrap();
        fns
    }

    #[test]
    fn test_bound_and_unbound_conditions_partition() {
        let mut f = Fixture::abc();
        let fns = registry();
        let (a, b, c) = (f.scan("a"), f.scan("b"), f.scan("c"));
        let (a1, b1, c1) = (f.col("a", "k"), f.col("b", "k"), f.col("c", "k"));
        let filters = f.filters(vec![eq(col(a1), col(b1)), eq(col(b1), col(c1)), lt(col(c1), col(a1))]);

        let bc = call(&f, &fns, "OutputCols2", &[Value::Group(b), Value::Group(c)]);
        let bound = call(&f, &fns, "ExtractBoundConditions", &[Value::Filters(filters.clone()), bc.clone()]);
        let unbound = call(&f, &fns, "ExtractUnboundConditions", &[Value::Filters(filters.clone()), bc]);
        assert_eq!(bound, Value::Filters(vec![filters[1]]));
        assert_eq!(unbound, Value::Filters(vec![filters[0], filters[2]]));

        let ab = call(&f, &fns, "OutputCols2", &[Value::Group(a), Value::Group(b)]);
        let expected: ColSet = [a1, f.col("a", "v"), b1, f.col("b", "v")].into_iter().collect();
        assert_eq!(ab, Value::Cols(expected));
    }

    #[test]
    fn test_filter_list_helpers() {
        let mut f = Fixture::abc();
        let fns = registry();
        f.scan("a");
        f.scan("b");
        let (a1, b1) = (f.col("a", "k"), f.col("b", "k"));
        let ids = f.filters(vec![eq(col(a1), col(b1)), lt(col(a1), col(b1))]);
        let reversed = vec![ids[1], ids[0]];

        assert_eq!(
            call(&f, &fns, "SortFilters", &[Value::Filters(reversed.clone())]),
            Value::Filters(ids.clone())
        );
        assert_eq!(
            call(&f, &fns, "IsSortedFilters", &[Value::Filters(reversed.clone())]),
            Value::Bool(false)
        );
        assert_eq!(
            call(&f, &fns, "ConcatFilters", &[Value::Filters(vec![ids[0]]), Value::Filters(reversed)]),
            Value::Filters(vec![ids[0], ids[1]])
        );
        assert_eq!(
            call(&f, &fns, "IsSimpleEquality", &[Value::Filters(vec![ids[0]])]),
            Value::Bool(true)
        );
        assert_eq!(
            call(&f, &fns, "IsSimpleEquality", &[Value::Filters(ids)]),
            Value::Bool(false)
        );
        assert_eq!(
            call(&f, &fns, "IsSimpleEquality", &[Value::Filters(vec![])]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_geo_function_predicate() {
        let mut f = Fixture::abc();
        let fns = registry();
        f.scan("a");
        f.scan("b");
        let (a1, b1) = (f.col("a", "k"), f.col("b", "k"));
        let ids = f.filters(vec![
            func("ST_Intersects", vec![col(a1), col(b1)]),
            func("lower", vec![col(a1)]),
        ]);
        assert_eq!(call(&f, &fns, "IsGeoIndexFunction", &[Value::Scalar(ids[0])]), Value::Bool(true));
        assert_eq!(call(&f, &fns, "IsGeoIndexFunction", &[Value::Scalar(ids[1])]), Value::Bool(false));
    }

    #[test]
    fn test_private_helpers() {
        let mut f = Fixture::abc();
        let fns = registry();
        let a = f.scan("a");
        let scan = f.memo.expr(f.memo.group(a).exprs[0]).private.clone().unwrap();
        assert_eq!(call(&f, &fns, "IsCanonicalScan", &[Value::Private(scan.clone())]), Value::Bool(true));
        assert_eq!(call(&f, &fns, "HasInvertedIndexes", &[Value::Private(scan)]), Value::Bool(false));

        let hinted = Private::Join(JoinPrivate { hint: JoinHint::Merge });
        assert_eq!(call(&f, &fns, "NoJoinHints", &[Value::Private(hinted)]), Value::Bool(false));
        let empty = call(&f, &fns, "EmptyJoinPrivate", &[]);
        assert_eq!(call(&f, &fns, "NoJoinHints", &[empty]), Value::Bool(true));

        let cols = call(&f, &fns, "OutputCols", &[Value::Group(a)]);
        let projection = call(&f, &fns, "MakeProjection", &[cols.clone()]);
        let projected = call(&f, &fns, "ProjectionCols", &[projection]);
        assert_eq!(call(&f, &fns, "ColsAreEqual", &[projected, cols]), Value::Bool(true));

        let ctx = FnContext {
            memo: &f.memo,
            rule: "Test",
        };
        let err = fns
            .get("ProjectionCols")
            .unwrap()
            .call(&ctx, &[Value::Private(Private::Join(JoinPrivate::default()))])
            .unwrap_err();
        assert!(err.to_string().contains("rule Test"));
        assert!(f.memo.count_exprs(OpTag::Scan) >= 1);
    }
}
