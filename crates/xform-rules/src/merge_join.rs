//! # Merge Join Generation
//!
//! Merges two streams sorted on the equality columns by advancing a cursor on each
//! side. Cheap in CPU and memory, but only when both inputs arrive sorted: the plan
//! selector asks each input for the ordering and adds a sort enforcer where an input
//! cannot provide it, so a merge join wins mostly over index-ordered scans.
//!
//! ```text
//! [GenerateMergeJoins, Explore]
//! (InnerJoin | LeftJoin | RightJoin | FullJoin | SemiJoin | AntiJoin
//!     $left:* $right:* $on:* $private:*)
//! => (GenerateMergeJoins (OpName) $left $right $on $private)
//! ```
//!
//! **Requires**: at least one `left.col = right.col` conjunct, and no hash or lookup
//! hint on the join. The whole ON list stays on the merge join; the equalities also
//! drive the sort order.

use xform_core::error::{OptError, OptResult, RuleLoadError};
use xform_core::expr::ColumnId;
use xform_core::function::{FnContext, FunctionRegistry, Value};
use xform_core::memo::{GroupId, Memo, ScalarId};
use xform_core::operator::{JoinHint, MergeJoinPrivate, OpTag, Private};
use xform_core::rule::dsl::*;
use xform_core::rule::{NewExpr, RuleChild, RuleDef, RuleResult};

pub fn rules() -> Vec<RuleDef> {
    vec![RuleDef::explore(
        "GenerateMergeJoins",
        op(
            "InnerJoin|LeftJoin|RightJoin|FullJoin|SemiJoin|AntiJoin",
            vec![cap("left"), cap("right"), cap("on"), cap("private")],
        ),
        call(
            "GenerateMergeJoins",
            vec![op_name(None), var("left"), var("right"), var("on"), var("private")],
        ),
    )]
}

pub fn register(fns: &mut FunctionRegistry) -> Result<(), RuleLoadError> {
    fns.register("GenerateMergeJoins", 5, generate_merge_joins)
}

fn generate_merge_joins(ctx: &FnContext<'_>, args: &[Value]) -> OptResult<Value> {
    let tag = args[0].as_tag()?;
    let join_type = tag
        .join_type()
        .ok_or_else(|| OptError::internal(format!("{tag} is not a logical join")))?;
    let (left, right) = (args[1].as_group()?, args[2].as_group()?);
    let on = args[3].as_filters()?;
    let hint = args[4].as_private()?.as_join().map(|p| p.hint).unwrap_or_default();
    if matches!(hint, JoinHint::Hash | JoinHint::Lookup) {
        return Ok(Value::Alternatives(vec![]));
    }

    let (left_eq, right_eq) = equality_columns(ctx.memo, on, left, right);
    if left_eq.is_empty() {
        return Ok(Value::Alternatives(vec![]));
    }

    let merge = NewExpr::new(
        OpTag::MergeJoin,
        vec![RuleChild::Group(left), RuleChild::Group(right)],
        on.to_vec(),
        Some(Private::MergeJoin(MergeJoinPrivate {
            join_type,
            left_eq,
            right_eq,
        })),
    );
    Ok(Value::Alternatives(vec![RuleResult::Expr(merge)]))
}

/// Column pairs equated by `on`, oriented left then right, in conjunct order.
pub(crate) fn equality_columns(
    memo: &Memo,
    on: &[ScalarId],
    left: GroupId,
    right: GroupId,
) -> (Vec<ColumnId>, Vec<ColumnId>) {
    let left_cols = &memo.props(left).output_cols;
    let right_cols = &memo.props(right).output_cols;
    let mut pairs: Vec<(ColumnId, ColumnId)> = Vec::new();
    for f in on {
        let Some((x, y)) = memo.scalar(*f).as_column_equality() else {
            continue;
        };
        let pair = if left_cols.contains(x) && right_cols.contains(y) {
            (x, y)
        } else if left_cols.contains(y) && right_cols.contains(x) {
            (y, x)
        } else {
            continue;
        };
        if !pairs.iter().any(|(l, _)| *l == pair.0) {
            pairs.push(pair);
        }
    }
    pairs.into_iter().unzip()
}

#[cfg(test)]
mod tests {
    use crate::testutil::Fixture;
    use xform_core::expr::{col, eq, lt};
    use xform_core::memo::MemoExpr;
    use xform_core::operator::{JoinHint, JoinPrivate, OpTag, Private};

    #[test]
    fn test_merge_join_per_join_orientation() {
        let mut f = Fixture::abc();
        let (a, b) = (f.scan("a"), f.scan("b"));
        let (ak, bk) = (f.col("a", "k"), f.col("b", "k"));
        let join = f.join(OpTag::InnerJoin, a, b, vec![eq(col(bk), col(ak))]);
        f.explore(join);

        let merges = f.members(join, OpTag::MergeJoin);
        // One for A ⋈ B and one for the commuted B ⋈ A.
        assert_eq!(merges.len(), 2);
        let forward = merges.iter().find(|e| e.children == vec![a, b]).unwrap();
        match &forward.private {
            Some(Private::MergeJoin(p)) => {
                assert_eq!(p.left_eq, vec![ak]);
                assert_eq!(p.right_eq, vec![bk]);
            }
            other => panic!("unexpected private {other:?}"),
        }
    }

    #[test]
    fn test_no_merge_join_without_equality_or_with_hash_hint() {
        let mut f = Fixture::abc();
        let (a, b, c) = (f.scan("a"), f.scan("b"), f.scan("c"));
        let (ak, bk, ck) = (f.col("a", "k"), f.col("b", "k"), f.col("c", "k"));
        let theta = f.join(OpTag::InnerJoin, a, b, vec![lt(col(ak), col(bk))]);
        f.explore(theta);
        assert!(f.members(theta, OpTag::MergeJoin).is_empty());

        let on = f.filters(vec![eq(col(ak), col(ck))]);
        let hinted = MemoExpr::new(
            OpTag::LeftJoin,
            vec![a, c],
            on,
            Some(Private::Join(JoinPrivate { hint: JoinHint::Hash })),
        );
        let (g, _) = f.memo.intern(hinted).unwrap();
        f.explore(g);
        assert!(f.members(g, OpTag::MergeJoin).is_empty());
    }
}
