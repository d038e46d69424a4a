//! # Physical and Logical Properties
//!
//! ## Logical Properties
//!
//! Logical properties are shared by all expressions in a group because they describe
//! the *what*: which columns are produced, which column sets are keys, and the
//! estimated cardinality. They are derived once, when the group is created, from its
//! first expression and the properties of its input groups. Every later member of the
//! group is equivalent by construction, so nothing is re-derived when members are
//! added.
//!
//! ## Physical Properties
//!
//! Physical properties describe *how* rows are delivered. The only one tracked here is
//! sort order, which merge joins require of their inputs and which a caller may
//! require of the root.
//!
//! ## Property Enforcement
//!
//! When no member of a group can deliver a required ordering on its own, the plan
//! selector places a sort enforcer over the group's best unordered plan. The
//! enforcer's cost is part of the comparison, so a natively ordered plan wins when it
//! is cheaper.
//!
//! ## The "Any" Property Set
//!
//! `PhysicalPropertySet::any()` represents "no requirements".

use crate::error::{OptError, OptResult};
use crate::expr::{ColSet, ColumnId, JoinType, SortKey};
use crate::memo::{Memo, MemoExpr, ScalarId};
use crate::operator::{OpTag, Private};
use crate::stats::{
    derive_distinct_stats, derive_filter_stats, derive_join_stats, estimate_selectivity,
    ColumnStatistics, Statistics,
};
use serde::{Deserialize, Serialize};

/// Logical properties are derived from the logical content of a group.
#[derive(Debug, Clone, Default)]
pub struct LogicalProperties {
    /// Output columns of this group.
    pub output_cols: ColSet,
    /// Column sets known to be unique over the output.
    pub keys: Vec<ColSet>,
    pub stats: Statistics,
}

impl LogicalProperties {
    pub fn row_count(&self) -> f64 {
        self.stats.row_count
    }
}

/// Physical properties describe how data is physically organized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalPropertySet {
    pub sort_order: Option<Vec<SortKey>>,
}

impl PhysicalPropertySet {
    pub fn any() -> Self {
        Self { sort_order: None }
    }

    pub fn with_sort(order: Vec<SortKey>) -> Self {
        if order.is_empty() {
            return Self::any();
        }
        Self {
            sort_order: Some(order),
        }
    }

    pub fn is_any(&self) -> bool {
        self.sort_order.is_none()
    }

    /// Columns the requirement refers to.
    pub fn columns(&self) -> ColSet {
        self.sort_order
            .iter()
            .flatten()
            .map(|k| k.col)
            .collect()
    }

    /// Check if this requirement is satisfied by the given provided properties.
    ///
    /// The required order must be a prefix of (or equal to) the provided order:
    /// `ORDER BY a, b, c` satisfies a requirement of `ORDER BY a, b`.
    pub fn satisfied_by(&self, other: &PhysicalPropertySet) -> bool {
        match (&self.sort_order, &other.sort_order) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required), Some(provided)) => {
                required.len() <= provided.len()
                    && required.iter().zip(provided.iter()).all(|(r, p)| r == p)
            }
        }
    }
}

/// Derives logical properties and maps physical requirements onto children.
pub trait PropertyDeriver: Send + Sync {
    /// Logical properties of a new group whose first member is `expr`. The children
    /// of `expr` are already interned.
    fn derive(&self, memo: &Memo, expr: &MemoExpr) -> OptResult<LogicalProperties>;

    /// Requirements to place on each relational child so that `expr` delivers
    /// `required`, or `None` when `expr` cannot deliver it.
    fn child_requirements(
        &self,
        memo: &Memo,
        expr: &MemoExpr,
        required: &PhysicalPropertySet,
    ) -> Option<Vec<PhysicalPropertySet>>;
}

/// Property derivation for the built-in relational operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPropertyDeriver;

fn input<'a>(memo: &'a Memo, expr: &MemoExpr, i: usize) -> OptResult<&'a LogicalProperties> {
    let g = expr
        .children
        .get(i)
        .ok_or_else(|| OptError::internal(format!("{} is missing input {i}", expr.tag)))?;
    Ok(memo.props(*g))
}

fn missing_private(tag: OpTag) -> OptError {
    OptError::internal(format!("{tag} is missing its private"))
}

fn filter_selectivity(memo: &Memo, filters: &[ScalarId], stats: &Statistics) -> f64 {
    filters
        .iter()
        .map(|f| estimate_selectivity(memo.scalar(*f), stats))
        .product()
}

/// Split join filters into cross-side column equalities and everything else.
fn equi_pairs(
    memo: &Memo,
    filters: &[ScalarId],
    left: &ColSet,
    right: &ColSet,
) -> (Vec<(ColumnId, ColumnId)>, Vec<ScalarId>) {
    let mut pairs = Vec::new();
    let mut rest = Vec::new();
    for &f in filters {
        match memo.scalar(f).as_column_equality() {
            Some((l, r)) if left.contains(l) && right.contains(r) => pairs.push((l, r)),
            Some((l, r)) if left.contains(r) && right.contains(l) => pairs.push((r, l)),
            _ => rest.push(f),
        }
    }
    (pairs, rest)
}

/// Shared join derivation: `right_*` describe the right side (an input group, or the
/// table side of a lookup).
fn join_props(
    memo: &Memo,
    join_type: JoinType,
    left: &LogicalProperties,
    right_cols: &ColSet,
    right_stats: &Statistics,
    right_keys: &[ColSet],
    filters: &[ScalarId],
    extra_pairs: &[(ColumnId, ColumnId)],
) -> LogicalProperties {
    let (mut pairs, rest) = equi_pairs(memo, filters, &left.output_cols, right_cols);
    pairs.extend_from_slice(extra_pairs);
    let joined = derive_join_stats(&left.stats, right_stats, &pairs);
    let joined = derive_filter_stats(&joined, filter_selectivity(memo, &rest, &joined));

    let all = left.output_cols.union(right_cols);
    let stats = match join_type {
        JoinType::Inner => joined,
        JoinType::Left => outer_stats(joined, left.stats.row_count),
        JoinType::Right => outer_stats(joined, right_stats.row_count),
        JoinType::Full => outer_stats(joined, left.stats.row_count.max(right_stats.row_count)),
        JoinType::Semi => {
            let rows = joined.row_count.min(left.stats.row_count);
            left.stats.limit(rows)
        }
        JoinType::Anti => {
            let matched = joined.row_count.min(left.stats.row_count);
            left.stats.limit((left.stats.row_count - matched).max(1.0))
        }
    };

    let output_cols = if join_type.outputs_right() {
        all
    } else {
        left.output_cols.clone()
    };

    // A key of one side stays a key when the other side is joined on one of its keys.
    let mut keys = Vec::new();
    let right_eq: ColSet = pairs.iter().map(|(_, r)| *r).collect();
    let left_eq: ColSet = pairs.iter().map(|(l, _)| *l).collect();
    if !join_type.outputs_right() || right_keys.iter().any(|k| !k.is_empty() && k.is_subset(&right_eq)) {
        keys.extend(left.keys.iter().cloned());
    }
    if join_type.outputs_right() && left.keys.iter().any(|k| !k.is_empty() && k.is_subset(&left_eq)) {
        keys.extend(right_keys.iter().cloned());
    }

    LogicalProperties {
        output_cols,
        keys,
        stats,
    }
}

fn outer_stats(mut joined: Statistics, preserved_rows: f64) -> Statistics {
    if joined.row_count < preserved_rows {
        let width = joined.row_width();
        joined.row_count = preserved_rows;
        joined.total_size_bytes = preserved_rows * width;
    }
    joined
}

/// Statistics of a table restricted to `cols`.
fn table_side(memo: &Memo, table: crate::metadata::TableId, cols: &ColSet) -> OptResult<(Statistics, Vec<ColSet>)> {
    let stats = memo.metadata().table_stats(table)?.restrict(cols);
    let pk: ColSet = memo.metadata().index_keys(table, 0)?.into_iter().collect();
    let keys = if !pk.is_empty() && pk.is_subset(cols) {
        vec![pk]
    } else {
        vec![]
    };
    Ok((stats, keys))
}

/// Ordering a scan delivers: its index key columns, ascending.
fn scan_ordering(memo: &Memo, expr: &MemoExpr) -> Option<PhysicalPropertySet> {
    let scan = expr.private.as_ref()?.as_scan()?;
    let keys = memo.metadata().index_keys(scan.table, scan.index).ok()?;
    let keys: Vec<SortKey> = keys
        .into_iter()
        .take_while(|c| scan.cols.contains(*c))
        .map(SortKey::asc)
        .collect();
    Some(PhysicalPropertySet::with_sort(keys))
}

impl PropertyDeriver for DefaultPropertyDeriver {
    fn derive(&self, memo: &Memo, expr: &MemoExpr) -> OptResult<LogicalProperties> {
        let private = expr.private.as_ref();
        match expr.tag {
            OpTag::Scan => {
                let scan = private
                    .and_then(Private::as_scan)
                    .ok_or_else(|| missing_private(expr.tag))?;
                let (mut stats, keys) = table_side(memo, scan.table, &scan.cols)?;
                if !scan.constraint.is_empty() {
                    stats = derive_filter_stats(&stats, filter_selectivity(memo, &scan.constraint, &stats));
                }
                if let Some(limit) = scan.hard_limit {
                    stats = stats.limit(limit as f64);
                }
                Ok(LogicalProperties {
                    output_cols: scan.cols.clone(),
                    keys,
                    stats,
                })
            }
            OpTag::Select => {
                let input = input(memo, expr, 0)?;
                let sel = filter_selectivity(memo, &expr.filters, &input.stats);
                Ok(LogicalProperties {
                    output_cols: input.output_cols.clone(),
                    keys: input.keys.clone(),
                    stats: derive_filter_stats(&input.stats, sel),
                })
            }
            OpTag::Project => {
                let input = input(memo, expr, 0)?;
                let cols = match private {
                    Some(Private::Project(p)) => &p.cols,
                    _ => return Err(missing_private(expr.tag)),
                };
                Ok(LogicalProperties {
                    output_cols: cols.clone(),
                    keys: input.keys.iter().filter(|k| k.is_subset(cols)).cloned().collect(),
                    stats: input.stats.restrict(cols),
                })
            }
            OpTag::InnerJoin
            | OpTag::LeftJoin
            | OpTag::RightJoin
            | OpTag::FullJoin
            | OpTag::SemiJoin
            | OpTag::AntiJoin
            | OpTag::MergeJoin => {
                let join_type = match (expr.tag.join_type(), private) {
                    (Some(t), _) => t,
                    (None, Some(Private::MergeJoin(p))) => p.join_type,
                    _ => return Err(missing_private(expr.tag)),
                };
                let left = input(memo, expr, 0)?;
                let right = input(memo, expr, 1)?;
                Ok(join_props(
                    memo,
                    join_type,
                    left,
                    &right.output_cols,
                    &right.stats,
                    &right.keys,
                    &expr.filters,
                    &[],
                ))
            }
            OpTag::DistinctOn => {
                let input = input(memo, expr, 0)?;
                let grouping = match private {
                    Some(Private::Grouping(p)) => &p.grouping_cols,
                    _ => return Err(missing_private(expr.tag)),
                };
                Ok(LogicalProperties {
                    output_cols: grouping.clone(),
                    keys: vec![grouping.clone()],
                    stats: derive_distinct_stats(&input.stats, grouping),
                })
            }
            OpTag::IndexJoin => {
                let input = input(memo, expr, 0)?;
                let p = match private {
                    Some(Private::IndexJoin(p)) => p,
                    _ => return Err(missing_private(expr.tag)),
                };
                let (table_stats, _) = table_side(memo, p.table, &p.cols)?;
                let mut stats = input.stats.clone();
                for (col, cs) in table_stats.column_stats {
                    let cs = ColumnStatistics {
                        distinct_count: cs.distinct_count.min(stats.row_count),
                        ..cs
                    };
                    stats.column_stats.entry(col).or_insert(cs);
                }
                stats.total_size_bytes = stats.row_count * (input.stats.row_width() + table_stats.total_size_bytes / table_stats.row_count.max(1.0));
                Ok(LogicalProperties {
                    output_cols: input.output_cols.union(&p.cols),
                    keys: input.keys.clone(),
                    stats,
                })
            }
            OpTag::LookupJoin => {
                let left = input(memo, expr, 0)?;
                let p = match private {
                    Some(Private::LookupJoin(p)) => p,
                    _ => return Err(missing_private(expr.tag)),
                };
                let (stats, keys) = table_side(memo, p.table, &p.lookup_cols)?;
                let index_keys = memo.metadata().index_keys(p.table, p.index)?;
                let pairs: Vec<_> = p.key_cols.iter().copied().zip(index_keys).collect();
                Ok(join_props(
                    memo,
                    p.join_type,
                    left,
                    &p.lookup_cols,
                    &stats,
                    &keys,
                    &expr.filters,
                    &pairs,
                ))
            }
            OpTag::InvertedJoin => {
                let left = input(memo, expr, 0)?;
                let p = match private {
                    Some(Private::InvertedJoin(p)) => p,
                    _ => return Err(missing_private(expr.tag)),
                };
                let (stats, keys) = table_side(memo, p.table, &p.cols)?;
                let mut filters = expr.filters.clone();
                if !filters.contains(&p.inverted_expr) {
                    filters.push(p.inverted_expr);
                }
                Ok(join_props(memo, p.join_type, left, &p.cols, &stats, &keys, &filters, &[]))
            }
            OpTag::ZigzagJoin => {
                let p = match private {
                    Some(Private::ZigzagJoin(p)) => p,
                    _ => return Err(missing_private(expr.tag)),
                };
                let (stats, keys) = table_side(memo, p.table, &p.cols)?;
                let sel = filter_selectivity(memo, &expr.filters, &stats);
                Ok(LogicalProperties {
                    output_cols: p.cols.clone(),
                    keys,
                    stats: derive_filter_stats(&stats, sel),
                })
            }
        }
    }

    fn child_requirements(
        &self,
        memo: &Memo,
        expr: &MemoExpr,
        required: &PhysicalPropertySet,
    ) -> Option<Vec<PhysicalPropertySet>> {
        if let Some(Private::MergeJoin(p)) = &expr.private {
            let left = PhysicalPropertySet::with_sort(p.left_eq.iter().copied().map(SortKey::asc).collect());
            let right = PhysicalPropertySet::with_sort(p.right_eq.iter().copied().map(SortKey::asc).collect());
            if !required.satisfied_by(&left) {
                return None;
            }
            return Some(vec![left, right]);
        }

        let any = || vec![PhysicalPropertySet::any(); expr.children.len()];
        if required.is_any() {
            return Some(any());
        }

        match expr.tag {
            OpTag::Scan => {
                let provided = scan_ordering(memo, expr)?;
                required.satisfied_by(&provided).then(Vec::new)
            }
            // Row order of the first input survives these operators.
            OpTag::Select
            | OpTag::Project
            | OpTag::IndexJoin
            | OpTag::LookupJoin
            | OpTag::InvertedJoin => {
                let input = memo.props(*expr.children.first()?);
                if !required.columns().is_subset(&input.output_cols) {
                    return None;
                }
                let mut reqs = any();
                reqs[0] = required.clone();
                Some(reqs)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexDef, InMemoryCatalog, TableDef};
    use crate::expr::{col, eq, int, TableRef};
    use crate::operator::{MergeJoinPrivate, ScanPrivate};

    fn setup() -> (Memo, crate::memo::GroupId, crate::memo::GroupId) {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            TableDef::new(TableRef::new("s", "orders"), 10_000.0)
                .with_column("id", 10_000.0)
                .with_column("cust", 100.0)
                .with_primary_key(&["id"])
                .with_index(IndexDef::new("by_cust", vec![1])),
        );
        catalog.add_table(
            TableDef::new(TableRef::new("s", "customer"), 100.0)
                .with_column("id", 100.0)
                .with_primary_key(&["id"]),
        );
        let mut memo = Memo::new();
        let o = memo.add_table(&catalog, &TableRef::new("s", "orders"), "o").unwrap();
        let c = memo.add_table(&catalog, &TableRef::new("s", "customer"), "c").unwrap();
        let ocols = memo.metadata().table_columns(o).unwrap();
        let ccols = memo.metadata().table_columns(c).unwrap();
        let (go, _) = memo.intern(MemoExpr::scan(ScanPrivate::new(o, ocols))).unwrap();
        let (gc, _) = memo.intern(MemoExpr::scan(ScanPrivate::new(c, ccols))).unwrap();
        (memo, go, gc)
    }

    #[test]
    fn test_satisfied_by_prefix() {
        let a = SortKey::asc(ColumnId(1));
        let b = SortKey::asc(ColumnId(2));
        let required = PhysicalPropertySet::with_sort(vec![a]);
        assert!(required.satisfied_by(&PhysicalPropertySet::with_sort(vec![a, b])));
        assert!(!PhysicalPropertySet::with_sort(vec![a, b]).satisfied_by(&required));
        assert!(PhysicalPropertySet::any().satisfied_by(&required));
        assert!(!required.satisfied_by(&PhysicalPropertySet::any()));
    }

    #[test]
    fn test_join_derivation() {
        let (mut memo, go, gc) = setup();
        let cust = memo.metadata().find_column("o", "cust").unwrap();
        let cid = memo.metadata().find_column("c", "id").unwrap();
        let on = memo.intern_filters(vec![eq(col(cust), col(cid))]);
        let (j, _) = memo.intern(MemoExpr::join(OpTag::InnerJoin, go, gc, on.clone())).unwrap();
        let props = memo.props(j);
        assert_eq!(props.output_cols.len(), 3);
        assert_eq!(props.row_count(), 10_000.0);
        // Joined on the customer key, so the orders key survives.
        assert!(props.keys.iter().any(|k| k.contains(ColumnId(0))));

        let (semi, _) = memo.intern(MemoExpr::join(OpTag::SemiJoin, go, gc, on)).unwrap();
        assert_eq!(memo.props(semi).output_cols.len(), 2);
    }

    #[test]
    fn test_select_and_scan_ordering() {
        let (mut memo, go, _) = setup();
        let cust = memo.metadata().find_column("o", "cust").unwrap();
        let id = memo.metadata().find_column("o", "id").unwrap();
        let f = memo.intern_filters(vec![eq(col(cust), int(7))]);
        let (sel, _) = memo.intern(MemoExpr::select(go, f)).unwrap();
        assert_eq!(memo.props(sel).row_count(), 100.0);

        let deriver = DefaultPropertyDeriver;
        let scan = memo.expr(memo.group(go).exprs[0]).clone();
        let by_id = PhysicalPropertySet::with_sort(vec![SortKey::asc(id)]);
        let by_cust = PhysicalPropertySet::with_sort(vec![SortKey::asc(cust)]);
        assert_eq!(deriver.child_requirements(&memo, &scan, &by_id), Some(vec![]));
        assert_eq!(deriver.child_requirements(&memo, &scan, &by_cust), None);

        let select = memo.expr(memo.group(sel).exprs[0]).clone();
        assert_eq!(
            deriver.child_requirements(&memo, &select, &by_id),
            Some(vec![by_id.clone()])
        );
    }

    #[test]
    fn test_merge_join_requires_sorted_inputs() {
        let (memo, go, gc) = setup();
        let expr = MemoExpr::new(
            OpTag::MergeJoin,
            vec![go, gc],
            vec![],
            Some(Private::MergeJoin(MergeJoinPrivate {
                join_type: JoinType::Inner,
                left_eq: vec![ColumnId(1)],
                right_eq: vec![ColumnId(2)],
            })),
        );
        let reqs = DefaultPropertyDeriver
            .child_requirements(&memo, &expr, &PhysicalPropertySet::any())
            .unwrap();
        assert_eq!(reqs[0], PhysicalPropertySet::with_sort(vec![SortKey::asc(ColumnId(1))]));
        assert_eq!(reqs[1], PhysicalPropertySet::with_sort(vec![SortKey::asc(ColumnId(2))]));
    }
}
