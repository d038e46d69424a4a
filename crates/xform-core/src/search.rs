//! # Search Driver
//!
//! [`CascadesSearch`] owns one memo for one optimization attempt and runs it in two
//! steps:
//!
//! 1. **Explore** (`explore`): the [`crate::scheduler`] applies normalize and explore
//!    rules until the memo reaches a fixed point or a budget trips.
//! 2. **Select** (`select_plan`): a top-down, memoized walk picks the cheapest member
//!    of every group for each set of required physical properties.
//!
//! ## Plan Selection
//!
//! For a `(group, required)` pair the selector asks the property deriver what each
//! member needs from its children to deliver `required`. Members that cannot deliver it
//! are skipped. The remaining members are costed bottom-up (children first) and the
//! cheapest one becomes the group's winner for `required`. Ties keep the member that
//! was registered first, so the result does not depend on hash order.
//!
//! When `required` asks for an ordering, a sort enforcer on top of the group's best
//! unordered plan competes with the members that deliver the ordering natively.
//!
//! Winners are stored on the group (`best_plan`), so every subproblem is solved once.

use crate::cost::{Cost, CostModel};
use crate::error::{OptError, OptResult};
use crate::memo::{GroupId, Memo, PlanChoice, PlanNode, Winner};
use crate::properties::PhysicalPropertySet;
use crate::rule::RuleTable;
use crate::scheduler::{self, ExploreStats};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Budgets for one optimization attempt.
///
/// `timeout_ms` is the primary knob for interactive use; the iteration and group caps
/// bound memory for pathologically large queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on the number of groups the memo may contain.
    pub max_memo_groups: usize,
    /// Upper bound on worklist entries processed during exploration.
    pub max_iterations: usize,
    /// Normalize rule firings allowed per group visit.
    pub max_normalize_steps: usize,
    /// Wall-clock budget for exploration. `None` means unbounded.
    pub timeout_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_memo_groups: 100_000,
            max_iterations: 1_000_000,
            max_normalize_steps: 64,
            timeout_ms: None,
        }
    }
}

/// One optimization attempt: a memo plus the shared rules and cost model.
pub struct CascadesSearch {
    pub memo: Memo,
    pub rule_table: Arc<RuleTable>,
    pub cost_model: Arc<dyn CostModel>,
    pub config: SearchConfig,
    /// Counters from the last `explore` call.
    pub stats: ExploreStats,
    in_progress: HashSet<(GroupId, PhysicalPropertySet)>,
}

impl CascadesSearch {
    pub fn new(
        memo: Memo,
        rule_table: Arc<RuleTable>,
        cost_model: Arc<dyn CostModel>,
        config: SearchConfig,
    ) -> Self {
        Self {
            memo,
            rule_table,
            cost_model,
            config,
            stats: ExploreStats::default(),
            in_progress: HashSet::new(),
        }
    }

    /// Explore the memo from `root` and return the run's counters.
    pub fn explore(&mut self, root: GroupId) -> OptResult<ExploreStats> {
        self.memo.set_root(root);
        debug!(
            root,
            groups = self.memo.num_groups(),
            exprs = self.memo.num_exprs(),
            rules = self.rule_table.len(),
            "starting exploration"
        );
        let stats = scheduler::explore(&mut self.memo, &self.rule_table, &self.config, root)?;
        self.stats = stats.clone();
        Ok(stats)
    }

    /// Explore, then select the cheapest plan for `root` under `required`.
    pub fn optimize(&mut self, root: GroupId, required: &PhysicalPropertySet) -> OptResult<PlanNode> {
        self.explore(root)?;
        self.select_plan(root, required)
    }

    /// Select the cheapest plan over whatever the memo currently holds.
    pub fn select_plan(&mut self, root: GroupId, required: &PhysicalPropertySet) -> OptResult<PlanNode> {
        let root = self.memo.find(root);
        match self.optimize_group(root, required)? {
            Some(cost) => {
                debug!(root, cost = cost.value(), "plan selected");
                self.memo.extract_best_plan(root, required)
            }
            None => {
                debug!(root, "no plan satisfies the required properties");
                Err(OptError::NoPlan(root))
            }
        }
    }

    /// Best cost for `group` under `required`, or `None` when no member can deliver it.
    fn optimize_group(&mut self, group: GroupId, required: &PhysicalPropertySet) -> OptResult<Option<Cost>> {
        let group = self.memo.find(group);
        if let Some(winner) = self.memo.group(group).best_plan.get(required) {
            return Ok(Some(winner.cost));
        }
        let key = (group, required.clone());
        if !self.in_progress.insert(key.clone()) {
            return Ok(None);
        }

        let mut best: Option<Winner> = None;
        let members = self.memo.group(group).exprs.clone();
        for expr_id in members {
            let expr = self.memo.expr(expr_id).clone();
            let Some(child_props) = self.memo.deriver().child_requirements(&self.memo, &expr, required) else {
                continue;
            };
            if child_props.len() != expr.children.len() {
                return Err(OptError::internal(format!(
                    "{} requirements for {} inputs of {}",
                    child_props.len(),
                    expr.children.len(),
                    expr.tag
                )));
            }

            let mut child_costs = Vec::with_capacity(expr.children.len());
            for (child, props) in expr.children.iter().zip(&child_props) {
                match self.optimize_group(*child, props)? {
                    Some(cost) => child_costs.push(cost),
                    None => break,
                }
            }
            if child_costs.len() != expr.children.len() {
                continue;
            }

            let cost = self
                .cost_model
                .compute_cost(&self.memo, group, &expr, &child_costs, required);
            if best.as_ref().map_or(true, |b| cost < b.cost) {
                trace!(group, expr = expr_id, cost = cost.value(), "new best member");
                best = Some(Winner {
                    choice: PlanChoice::Expr {
                        expr: expr_id,
                        child_props,
                    },
                    cost,
                });
            }
        }

        if !required.is_any() {
            if let Some(input) = self.optimize_group(group, &PhysicalPropertySet::any())? {
                let cost = self.cost_model.sort_cost(&self.memo, group, input);
                if best.as_ref().map_or(true, |b| cost < b.cost) {
                    trace!(group, cost = cost.value(), "sort enforcer wins");
                    best = Some(Winner {
                        choice: PlanChoice::Sort,
                        cost,
                    });
                }
            }
        }

        self.in_progress.remove(&key);
        Ok(best.map(|winner| {
            let cost = winner.cost;
            self.memo.group_mut(group).best_plan.insert(required.clone(), winner);
            cost
        }))
    }
}
