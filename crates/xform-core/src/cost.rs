//! # Cost Model
//!
//! This module defines the cost abstraction and a default cost model for the plan
//! selector.
//!
//! ## Weighted Cost
//!
//! Execution cost depends on CPU time and memory consumption. The `DefaultCostModel`
//! uses a weighted sum of these dimensions to collapse them into a single comparable
//! `Cost` value:
//!
//! ```text
//! total_cost = cpu_weight * cpu_cost + memory_weight * memory_cost
//! ```
//!
//! Random index probes (lookup, index and inverted joins) are charged per probe with
//! `probe_weight`, which is what lets a lookup join beat a hash join when the input is
//! small and the looked-up table is large.
//!
//! ## Cost Accumulation
//!
//! Costs are **additive**: the total cost of a plan is the sum of its local cost
//! (computed by the cost model for the operator) plus the accumulated costs of all
//! child plans.
//!
//! ## Pluggable Design
//!
//! The `CostModel` trait allows replacing the default model with a custom one.

use crate::memo::{GroupId, Memo, MemoExpr};
use crate::operator::{OpTag, Private};
use crate::properties::PhysicalPropertySet;
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// The total weighted cost. Lower is better. `f64::MAX` represents infinity
    /// (an infeasible or not-yet-costed plan).
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }

    pub fn value(&self) -> f64 {
        self.total
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

/// Trait for pluggable cost models.
pub trait CostModel: Send + Sync {
    /// Cost of `expr` (a member of `group`) given the best costs of its children under
    /// the requirements placed on them.
    fn compute_cost(
        &self,
        memo: &Memo,
        group: GroupId,
        expr: &MemoExpr,
        child_costs: &[Cost],
        required: &PhysicalPropertySet,
    ) -> Cost;

    /// Cost of sorting the output of `group`, whose unordered plan costs `input`.
    fn sort_cost(&self, memo: &Memo, group: GroupId, input: Cost) -> Cost;
}

/// Default cost model.
pub struct DefaultCostModel {
    /// Weight for per-row processing.
    pub cpu_weight: f64,
    /// Weight for data held in memory (hash tables, sort buffers), per 100 bytes.
    pub memory_weight: f64,
    /// Weight for one random index probe.
    pub probe_weight: f64,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            probe_weight: 4.0,
        }
    }
}

impl DefaultCostModel {
    fn memory(&self, stats: &Statistics) -> f64 {
        self.memory_weight * stats.total_size_bytes / 100.0
    }
}

impl CostModel for DefaultCostModel {
    fn compute_cost(
        &self,
        memo: &Memo,
        group: GroupId,
        expr: &MemoExpr,
        child_costs: &[Cost],
        _required: &PhysicalPropertySet,
    ) -> Cost {
        let children_total: f64 = child_costs.iter().map(|c| c.total).sum();
        let out_rows = memo.props(group).row_count();
        let child = |i: usize| expr.children.get(i).map(|g| &memo.props(*g).stats);
        let child_rows = |i: usize| child(i).map(|s| s.row_count).unwrap_or(1.0);

        let local_cost = match expr.tag {
            // Rows read, plus a small per-column charge so narrower indexes win.
            OpTag::Scan => {
                let width = match &expr.private {
                    Some(Private::Scan(p)) => p.cols.len() as f64,
                    _ => 1.0,
                };
                self.cpu_weight * out_rows * (1.0 + 0.01 * width)
            }
            OpTag::Select => self.cpu_weight * child_rows(0) * 0.1 * expr.filters.len().max(1) as f64,
            OpTag::Project => self.cpu_weight * child_rows(0) * 0.05,
            // Logical joins are costed as hash joins building on the right input. With
            // no equality there is nothing to hash on, so it is a nested loop.
            OpTag::InnerJoin
            | OpTag::LeftJoin
            | OpTag::RightJoin
            | OpTag::FullJoin
            | OpTag::SemiJoin
            | OpTag::AntiJoin => {
                let has_equality = expr
                    .filters
                    .iter()
                    .any(|f| memo.scalar(*f).as_column_equality().is_some());
                match (child(0), child(1)) {
                    (Some(left), Some(right)) if has_equality => {
                        self.cpu_weight * (right.row_count + left.row_count)
                            + self.memory(right)
                            + self.cpu_weight * out_rows * 0.1
                    }
                    (Some(left), Some(right)) => {
                        self.cpu_weight * left.row_count * right.row_count.max(1.0)
                    }
                    _ => 1000.0,
                }
            }
            OpTag::MergeJoin => {
                self.cpu_weight * (child_rows(0) + child_rows(1)) + self.cpu_weight * out_rows * 0.1
            }
            OpTag::LookupJoin => {
                self.probe_weight * child_rows(0) + self.cpu_weight * out_rows * 0.1
            }
            OpTag::InvertedJoin => {
                2.0 * self.probe_weight * child_rows(0) + self.cpu_weight * out_rows * 0.5
            }
            OpTag::IndexJoin => self.probe_weight * child_rows(0),
            // Walks both indexes in step; proportional to the matching rows.
            OpTag::ZigzagJoin => self.probe_weight * out_rows + 10.0,
            OpTag::DistinctOn => {
                self.cpu_weight * child_rows(0) + self.memory(&memo.props(group).stats)
            }
        };

        Cost::new(children_total + local_cost)
    }

    /// O(n log n) comparison sort over a materialized buffer.
    fn sort_cost(&self, memo: &Memo, group: GroupId, input: Cost) -> Cost {
        let stats = &memo.props(group).stats;
        let rows = stats.row_count;
        let n_log_n = if rows > 1.0 { rows * rows.log2() } else { 1.0 };
        Cost::new(input.total + self.cpu_weight * n_log_n + self.memory(stats))
    }
}
