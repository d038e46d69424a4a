//! # Geospatial Lookup Join Generation
//!
//! Spatial predicates such as `st_intersects(a.geom, b.geom)` cannot use a forward
//! index, but an inverted index over `b.geom` maps each covering cell to the rows
//! whose shape touches it. An inverted join probes that index with the cells of each
//! left row's shape and keeps the candidates that satisfy the predicate.
//!
//! ```text
//! [GenerateGeoLookupJoins, Explore]
//! (InnerJoin | LeftJoin | SemiJoin | AntiJoin
//!     $left:*
//!     (Scan $scanPrivate:* & (IsCanonicalScan $scanPrivate) & (HasInvertedIndexes $scanPrivate))
//!     $on:[ ... $item:(Function) & (IsGeoIndexFunction $item) ... ]
//!     $private:*)
//! => (GenerateGeoLookupJoins (OpName) $left $scanPrivate $on $item $private)
//! ```
//!
//! The rule fires once per indexable spatial conjunct. For each inverted index whose
//! column is one argument of the function while the other argument is a left column,
//! one inverted join is produced. The spatial conjunct drives the probe and the
//! remaining conjuncts stay on the join. Covering follows the lookup join rules: an
//! inverted index holds the indexed column and the primary key, so inner and left
//! joins needing other columns get an index join on top.

use crate::functions::scan_private;
use crate::lookup_join::{cover_with_index_join, hint_forbids_lookup, lookup_join_type};
use xform_core::error::{OptResult, RuleLoadError};
use xform_core::expr::{ColSet, ColumnId, Expr, ScalarKind};
use xform_core::function::{FnContext, FunctionRegistry, Value};
use xform_core::memo::ScalarId;
use xform_core::operator::{InvertedJoinPrivate, OpTag, Private};
use xform_core::rule::dsl::*;
use xform_core::rule::{NewExpr, RuleChild, RuleDef, RuleResult};

pub fn rules() -> Vec<RuleDef> {
    let scan = op(
        "Scan",
        vec![guarded(
            cap("scanPrivate"),
            all(vec![
                guard(call("IsCanonicalScan", vec![var("scanPrivate")])),
                guard(call("HasInvertedIndexes", vec![var("scanPrivate")])),
            ]),
        )],
    );
    let geo_item = guarded(
        bind("item", scalar(&[ScalarKind::Function], vec![])),
        guard(call("IsGeoIndexFunction", vec![var("item")])),
    );
    vec![RuleDef::explore(
        "GenerateGeoLookupJoins",
        op(
            "InnerJoin|LeftJoin|SemiJoin|AntiJoin",
            vec![cap("left"), scan, bind("on", existential(geo_item)), cap("private")],
        ),
        call(
            "GenerateGeoLookupJoins",
            vec![
                op_name(None),
                var("left"),
                var("scanPrivate"),
                var("on"),
                var("item"),
                var("private"),
            ],
        ),
    )]
}

pub fn register(fns: &mut FunctionRegistry) -> Result<(), RuleLoadError> {
    fns.register("GenerateGeoLookupJoins", 6, generate_geo_lookup_joins)
}

fn generate_geo_lookup_joins(ctx: &FnContext<'_>, args: &[Value]) -> OptResult<Value> {
    let join_type = lookup_join_type(args[0].as_tag()?)?;
    let left = args[1].as_group()?;
    let scan = scan_private(&args[2])?;
    let on = args[3].as_filters()?;
    let item = args[4].as_scalar()?;
    if hint_forbids_lookup(&args[5])? {
        return Ok(Value::Alternatives(vec![]));
    }

    let memo = ctx.memo;
    let Expr::Function { args: fn_args, .. } = memo.scalar(item) else {
        return Ok(Value::Alternatives(vec![]));
    };
    let input_cols = &memo.props(left).output_cols;
    let remaining: Vec<ScalarId> = on.iter().copied().filter(|f| *f != item).collect();
    let def = &memo.metadata().table(scan.table)?.def;

    let mut out = Vec::new();
    for index in 1..def.index_count() {
        if !def.is_inverted(index) {
            continue;
        }
        let Some(&indexed) = memo.metadata().index_keys(scan.table, index)?.first() else {
            continue;
        };
        let Some(input_col) = probe_column(fn_args, indexed, input_cols) else {
            continue;
        };
        let build = |cols: ColSet| {
            NewExpr::new(
                OpTag::InvertedJoin,
                vec![RuleChild::Group(left)],
                remaining.clone(),
                Some(Private::InvertedJoin(InvertedJoinPrivate {
                    join_type,
                    table: scan.table,
                    index,
                    input_col,
                    inverted_expr: item,
                    cols,
                })),
            )
        };
        if let Some(expr) = cover_with_index_join(memo, join_type, left, scan, index, &remaining, build)? {
            out.push(RuleResult::Expr(expr));
        }
    }
    Ok(Value::Alternatives(out))
}

/// The left column paired with the indexed column among the two shape arguments.
fn probe_column(args: &[Expr], indexed: ColumnId, input_cols: &ColSet) -> Option<ColumnId> {
    match args {
        [Expr::Column(a), Expr::Column(b), ..] if *a == indexed && input_cols.contains(*b) => Some(*b),
        [Expr::Column(a), Expr::Column(b), ..] if *b == indexed && input_cols.contains(*a) => Some(*a),
        _ => None,
    }
}
