//! # Statistics for Cost-Based Optimization
//!
//! Statistics are part of a group's logical properties: they are derived once when
//! the group is created, from the group's first expression and the already-derived
//! statistics of its input groups, and shared by every later member.
//!
//! ## Statistics Hierarchy
//!
//! - **Relation-level**: row count and total size in bytes.
//! - **Column-level**: number of distinct values (NDV), null fraction and average
//!   value size, keyed by session [`ColumnId`].
//!
//! ## Derivation Formulas
//!
//! - **Filter**: output_rows = input_rows * selectivity. Column NDVs are scaled
//!   proportionally to the row reduction ratio.
//! - **Join**: output_rows = |left| * |right| / max(NDV_left_key, NDV_right_key),
//!   the standard equi-join formula under a uniform distribution.
//! - **Distinct**: output_rows = product of NDVs of the grouping columns, capped by
//!   the input rows.
//!
//! ## Selectivity Estimation
//!
//! - **Equality**: 1 / NDV.
//! - **Range**: fixed 1/3 heuristic.
//! - **Default**: 0.1 when no better estimate is available.

use crate::expr::{BinaryOp, ColSet, ColumnId, Expr};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default filter selectivity when nothing better is known.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range comparison.
pub const RANGE_SELECTIVITY: f64 = 0.33;

/// Row count assumed for a relation whose statistics are unknown.
pub const DEFAULT_ROW_COUNT: f64 = 1000.0;

/// Statistics for a relation (or group in the memo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    pub column_stats: HashMap<ColumnId, ColumnStatistics>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_COUNT, DEFAULT_ROW_COUNT * 100.0)
    }
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: HashMap::new(),
        }
    }

    pub fn with_column(mut self, col: ColumnId, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(col, stats);
        self
    }

    /// Average width of one row in bytes.
    pub fn row_width(&self) -> f64 {
        if self.row_count > 0.0 {
            self.total_size_bytes / self.row_count
        } else {
            100.0
        }
    }

    /// Keep only the statistics of the given columns (projection).
    pub fn restrict(&self, cols: &ColSet) -> Statistics {
        let column_stats: HashMap<_, _> = self
            .column_stats
            .iter()
            .filter(|(c, _)| cols.contains(**c))
            .map(|(c, s)| (*c, s.clone()))
            .collect();
        let width: f64 = column_stats.values().map(|s| s.avg_size).sum();
        let total_size_bytes = if width > 0.0 {
            self.row_count * width
        } else {
            self.total_size_bytes
        };
        Statistics {
            row_count: self.row_count,
            total_size_bytes,
            column_stats,
        }
    }

    /// Cap the row count (e.g. for a scan with a hard limit).
    pub fn limit(&self, rows: f64) -> Statistics {
        if rows >= self.row_count {
            return self.clone();
        }
        derive_filter_stats(self, rows / self.row_count.max(1.0))
    }
}

/// Per-column statistics used for selectivity estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    pub null_fraction: f64,
    /// Average size of a single value in bytes.
    pub avg_size: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
            avg_size: 8.0,
        }
    }
}

/// Derive statistics for join output.
///
/// ```text
/// |A JOIN B| = |A| * |B| / max(NDV(A.key), NDV(B.key))
/// ```
///
/// Multi-column joins multiply the per-pair selectivities (independence assumption).
/// When NDV information is unavailable for a column, the relation's row count is used.
pub fn derive_join_stats(
    left: &Statistics,
    right: &Statistics,
    join_columns: &[(ColumnId, ColumnId)],
) -> Statistics {
    let mut selectivity = 1.0_f64;

    for (left_col, right_col) in join_columns {
        let left_ndv = left
            .column_stats
            .get(left_col)
            .map(|s| s.distinct_count)
            .unwrap_or(left.row_count);
        let right_ndv = right
            .column_stats
            .get(right_col)
            .map(|s| s.distinct_count)
            .unwrap_or(right.row_count);
        // Containment: the smaller domain is fully contained in the larger one.
        let max_ndv = left_ndv.max(right_ndv).max(1.0);
        selectivity /= max_ndv;
    }

    let row_count = (left.row_count * right.row_count * selectivity).max(1.0);
    let total_size_bytes = row_count * (left.row_width() + right.row_width());

    // NDV is capped by the output row count.
    let mut column_stats = HashMap::new();
    for (col, stats) in left.column_stats.iter().chain(right.column_stats.iter()) {
        let mut cs = stats.clone();
        cs.distinct_count = cs.distinct_count.min(row_count);
        column_stats.insert(*col, cs);
    }

    Statistics {
        row_count,
        total_size_bytes,
        column_stats,
    }
}

/// Derive statistics for filter output.
///
/// Column NDVs are scaled by the same ratio as the rows. This can overestimate NDV for
/// a highly selective filter on the filtered column itself.
pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };

    let mut column_stats = HashMap::new();
    for (col, stats) in &input.column_stats {
        let mut cs = stats.clone();
        cs.distinct_count = (cs.distinct_count * ratio).max(1.0).min(row_count);
        column_stats.insert(*col, cs);
    }

    Statistics {
        row_count,
        total_size_bytes: input.total_size_bytes * ratio,
        column_stats,
    }
}

/// Derive statistics for a distinct / grouping operator.
///
/// The number of output rows is the product of the grouping columns' NDVs, capped by
/// the input rows. Only the grouping columns survive.
pub fn derive_distinct_stats(input: &Statistics, grouping_cols: &ColSet) -> Statistics {
    let mut row_count = 1.0_f64;
    for col in grouping_cols.iter() {
        let ndv = input
            .column_stats
            .get(&col)
            .map(|s| s.distinct_count)
            .unwrap_or(input.row_count);
        row_count *= ndv;
    }
    row_count = row_count.min(input.row_count).max(1.0);

    let mut out = input.restrict(grouping_cols);
    let width = out.row_width();
    out.row_count = row_count;
    out.total_size_bytes = row_count * width;
    for cs in out.column_stats.values_mut() {
        cs.distinct_count = cs.distinct_count.min(row_count);
    }
    out
}

/// Estimate selectivity for an equality predicate: `sel = 1 / NDV`.
pub fn equality_selectivity(stats: &Statistics, col: ColumnId) -> f64 {
    stats
        .column_stats
        .get(&col)
        .map(|cs| 1.0 / cs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

/// Estimate the selectivity of one predicate against the given input statistics.
///
/// - **col = value**: 1 / NDV(col).
/// - **col = col**: 1 / max(NDV) (the join formula applied to a single relation).
/// - **Range**: 1/3.
/// - **AND**: product (independence). **OR**: inclusion-exclusion.
pub fn estimate_selectivity(expr: &Expr, stats: &Statistics) -> f64 {
    match expr {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(l), Expr::Column(r)) => {
                equality_selectivity(stats, *l).min(equality_selectivity(stats, *r))
            }
            (Expr::Column(c), _) | (_, Expr::Column(c)) => equality_selectivity(stats, *c),
            _ => DEFAULT_FILTER_SELECTIVITY,
        },
        Expr::BinaryOp {
            op: BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq,
            ..
        } => RANGE_SELECTIVITY,
        Expr::And(conjuncts) => conjuncts
            .iter()
            .map(|c| estimate_selectivity(c, stats))
            .product(),
        Expr::Or(disjuncts) => {
            let product: f64 = disjuncts
                .iter()
                .map(|d| 1.0 - estimate_selectivity(d, stats))
                .product();
            1.0 - product
        }
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}
