//! # Exploration Scheduler
//!
//! Drives normalization and exploration of a memo to a fixed point.
//!
//! ## Group Lifecycle
//!
//! Every group moves through `Unexplored → Normalizing → Exploring → Done`:
//!
//! 1. **Normalize.** When a group is first seen its inputs are normalized, then the
//!    normalize rules are applied to the group's members until none fires (or the
//!    step cap is reached). A normalize result *replaces* the member it was derived
//!    from.
//! 2. **Explore.** The group's explore rules are queued. Each worklist entry is a
//!    `(group, rule)` pair; processing it matches the rule against every live member
//!    and adds each result to the group.
//!
//! ## Re-exploration
//!
//! The scheduler reacts to memo events:
//!
//! - a new member re-normalizes its group and re-queues the group and its ancestors
//!   up to the deepest explore pattern, since a pattern rooted higher up can now see it;
//! - a merge does the same for every transitive ancestor of the surviving group;
//! - a new group (from a nested constructor) is normalized before anything else.
//!
//! A rule fires at most once per distinct binding fingerprint per group, so queued
//! entries whose bindings were all seen before are cheap no-ops.
//!
//! ## Budgets
//!
//! The deadline, iteration cap and group cap are checked between worklist entries.
//! When one trips, exploration stops and whatever the memo holds is still a valid
//! search space for plan selection.

use crate::error::{OptError, OptResult};
use crate::memo::{AddOutcome, ExploreState, GroupId, Memo, MemoEvent, MemoExpr};
use crate::rule::{NewExpr, Phase, RuleChild, RuleResult, RuleTable};
use crate::search::SearchConfig;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Counters describing one exploration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExploreStats {
    /// Worklist entries processed.
    pub entries_processed: usize,
    /// Rule firings (normalize and explore).
    pub rule_applications: usize,
    pub merges: usize,
    pub groups_created: usize,
    pub timed_out: bool,
    pub budget_exhausted: bool,
}

/// Runs normalize and explore rules over a memo.
pub struct Explorer<'a> {
    memo: &'a mut Memo,
    rules: &'a RuleTable,
    config: &'a SearchConfig,
    normalize: Vec<usize>,
    explore: Vec<usize>,
    worklist: VecDeque<(GroupId, usize)>,
    queued: HashSet<(GroupId, usize)>,
    stats: ExploreStats,
}

impl<'a> Explorer<'a> {
    pub fn new(memo: &'a mut Memo, rules: &'a RuleTable, config: &'a SearchConfig) -> Self {
        Self {
            normalize: rules.phase_rules(Phase::Normalize),
            explore: rules.phase_rules(Phase::Explore),
            memo,
            rules,
            config,
            worklist: VecDeque::new(),
            queued: HashSet::new(),
            stats: ExploreStats::default(),
        }
    }

    /// Normalize and explore everything reachable from `root`.
    pub fn run(mut self, root: GroupId) -> OptResult<ExploreStats> {
        let start = Instant::now();
        let deadline = self
            .config
            .timeout_ms
            .map(|ms| start + Duration::from_millis(ms));
        let merges_before = self.memo.num_merges();

        self.ensure_normalized(root)?;
        self.drain_events()?;

        while let Some((group, rule)) = self.worklist.pop_front() {
            self.queued.remove(&(group, rule));
            if deadline.is_some_and(|d| Instant::now() >= d) {
                self.stats.timed_out = true;
                debug!(event = "explore_timeout", elapsed_ms = start.elapsed().as_millis() as u64, "exploration deadline reached");
                break;
            }
            if self.stats.entries_processed >= self.config.max_iterations
                || self.memo.num_groups() >= self.config.max_memo_groups
            {
                self.stats.budget_exhausted = true;
                debug!(
                    event = "explore_budget",
                    entries = self.stats.entries_processed,
                    groups = self.memo.num_groups(),
                    "exploration budget exhausted"
                );
                break;
            }

            self.stats.entries_processed += 1;
            let group = self.memo.find(group);
            self.apply_explore(group, rule)?;
            self.drain_events()?;
        }

        for g in self.memo.group_ids() {
            if self.memo.group(g).state == ExploreState::Exploring {
                self.memo.set_state(g, ExploreState::Done);
            }
        }
        self.stats.merges = self.memo.num_merges() - merges_before;
        debug!(
            event = "explore_done",
            entries = self.stats.entries_processed,
            applications = self.stats.rule_applications,
            groups = self.memo.num_groups(),
            exprs = self.memo.num_exprs(),
            "exploration finished"
        );
        Ok(self.stats)
    }

    fn drain_events(&mut self) -> OptResult<()> {
        while let Some(event) = self.memo.next_event() {
            match event {
                MemoEvent::GroupCreated(g) => {
                    self.stats.groups_created += 1;
                    self.ensure_normalized(g)?;
                }
                MemoEvent::MemberAdded { group, .. } => {
                    let depth = self.rules.max_explore_depth().saturating_sub(1);
                    self.revisit(group, Some(depth))?;
                }
                MemoEvent::Merged { into, .. } => {
                    self.revisit(into, None)?;
                }
            }
        }
        Ok(())
    }

    /// Re-normalize a changed group and re-queue it with its ancestors.
    fn revisit(&mut self, group: GroupId, depth: Option<usize>) -> OptResult<()> {
        let group = self.memo.find(group);
        if self.memo.group(group).state < ExploreState::Exploring {
            return Ok(());
        }
        let group = self.normalize_group(group)?;
        self.enqueue(group);
        for ancestor in self.memo.ancestors(group, depth) {
            self.enqueue(ancestor);
        }
        Ok(())
    }

    fn ensure_normalized(&mut self, group: GroupId) -> OptResult<()> {
        let group = self.memo.find(group);
        if self.memo.group(group).state != ExploreState::Unexplored {
            return Ok(());
        }
        self.memo.set_state(group, ExploreState::Normalizing);

        let mut children: Vec<GroupId> = Vec::new();
        for &e in &self.memo.group(group).exprs {
            for &c in &self.memo.expr(e).children {
                if !children.contains(&c) {
                    children.push(c);
                }
            }
        }
        for child in children {
            self.ensure_normalized(child)?;
        }

        let group = self.normalize_group(group)?;
        if self.memo.group(group).state == ExploreState::Normalizing {
            self.memo.set_state(group, ExploreState::Exploring);
        }
        self.enqueue(group);
        Ok(())
    }

    /// Apply normalize rules to a fixed point. Returns the (possibly merged) group.
    fn normalize_group(&mut self, group: GroupId) -> OptResult<GroupId> {
        let rules = self.rules;
        let normalize = self.normalize.clone();
        let mut group = self.memo.find(group);
        let mut steps = 0;
        'restart: loop {
            if steps >= self.config.max_normalize_steps {
                warn!(group, steps, "normalization step cap reached");
                return Ok(group);
            }
            let members = self.memo.group(group).exprs.clone();
            for expr in members {
                if !self.memo.is_live(expr) {
                    continue;
                }
                for &r in &normalize {
                    let rule = rules.rule(r);
                    let bindings = rule.bindings(self.memo, expr)?;
                    for b in bindings {
                        let results = rule.results(self.memo, &b)?;
                        let Some(result) = results.into_iter().next() else {
                            continue;
                        };
                        let outcome = match result {
                            RuleResult::Expr(new) => {
                                let new = self.materialize(new)?;
                                self.memo.replace(group, expr, new)
                            }
                            RuleResult::Group(target) => self.memo.replace_with_group(group, expr, target),
                        }
                        .map_err(|e| e.with_rule(&rule.name))?;

                        if outcome == AddOutcome::Unchanged {
                            trace!(rule = %rule.name, group, "normalization is a no-op");
                            continue;
                        }
                        self.stats.rule_applications += 1;
                        steps += 1;
                        trace!(rule = %rule.name, group, ?outcome, "normalized");
                        group = self.memo.find(group);
                        continue 'restart;
                    }
                }
            }
            return Ok(group);
        }
    }

    fn enqueue(&mut self, group: GroupId) {
        let group = self.memo.find(group);
        let tags: Vec<_> = self
            .memo
            .group(group)
            .exprs
            .iter()
            .map(|e| self.memo.expr(*e).tag)
            .collect();
        for &r in &self.explore {
            let rule = self.rules.rule(r);
            if tags.iter().any(|t| rule.matches_tag(*t)) && self.queued.insert((group, r)) {
                self.worklist.push_back((group, r));
            }
        }
    }

    fn apply_explore(&mut self, group: GroupId, r: usize) -> OptResult<()> {
        let rules = self.rules;
        let rule = rules.rule(r);
        let members = self.memo.group(group).exprs.clone();
        for expr in members {
            if !self.memo.is_live(expr) {
                continue;
            }
            for b in rule.bindings(self.memo, expr)? {
                let group = self.memo.find(group);
                if !self.memo.record_applied(group, b.fingerprint(&rule.name)) {
                    continue;
                }
                let results = rule.results(self.memo, &b)?;
                self.stats.rule_applications += 1;
                for result in results {
                    let group = self.memo.find(group);
                    let outcome = match result {
                        RuleResult::Expr(new) => {
                            let new = self.materialize(new)?;
                            self.memo.add_alternative(group, new)
                        }
                        RuleResult::Group(target) => self.memo.merge(group, target).map(AddOutcome::Merged),
                    }
                    .map_err(|e| e.with_rule(&rule.name))?;
                    trace!(rule = %rule.name, group, ?outcome, "explored");
                }
            }
        }
        Ok(())
    }

    /// Intern the nested constructors of a result, bottom-up, and return the root.
    fn materialize(&mut self, new: NewExpr) -> OptResult<MemoExpr> {
        let mut children = Vec::with_capacity(new.children.len());
        for child in new.children {
            let group = match child {
                RuleChild::Group(g) => self.memo.find(g),
                RuleChild::New(inner) => {
                    let expr = self.materialize(inner)?;
                    let (g, _) = self.memo.intern(expr).map_err(internal)?;
                    self.ensure_normalized(g)?;
                    self.memo.find(g)
                }
            };
            children.push(group);
        }
        Ok(MemoExpr::new(new.tag, children, new.filters, new.private))
    }
}

/// A malformed constructor output is a rule bug, not a caller error.
fn internal(err: OptError) -> OptError {
    match err {
        OptError::InvalidInput(detail) => OptError::internal(detail),
        other => other,
    }
}

/// Normalize and explore the memo from `root` under `config`.
pub fn explore(memo: &mut Memo, rules: &RuleTable, config: &SearchConfig, root: GroupId) -> OptResult<ExploreStats> {
    Explorer::new(memo, rules, config).run(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, TableDef};
    use crate::expr::TableRef;
    use crate::function::FunctionRegistry;
    use crate::operator::{OpTag, RelationalOperators, ScanPrivate};
    use crate::rule::dsl::*;
    use crate::rule::RuleDef;

    fn scans(memo: &mut Memo, names: &[&str]) -> Vec<GroupId> {
        let mut catalog = InMemoryCatalog::new();
        for n in names {
            catalog.add_table(TableDef::new(TableRef::new("s", *n), 10.0).with_column("k", 10.0));
        }
        names
            .iter()
            .map(|n| {
                let t = memo.add_table(&catalog, &TableRef::new("s", *n), *n).unwrap();
                let cols = memo.metadata().table_columns(t).unwrap();
                memo.intern(MemoExpr::scan(ScanPrivate::new(t, cols))).unwrap().0
            })
            .collect()
    }

    fn commute_table() -> RuleTable {
        let commute = RuleDef::explore(
            "Commute",
            op("InnerJoin", vec![cap("left"), cap("right"), cap("on"), cap("private")]),
            matched_op(None, vec![var("right"), var("left"), var("on"), var("private")]),
        );
        let drop_empty_select = RuleDef::normalize(
            "DropEmptySelect",
            op("Select", vec![cap("input"), empty_list()]),
            var("input"),
        );
        RuleTable::assemble(vec![drop_empty_select, commute], &FunctionRegistry::new(), &RelationalOperators).unwrap()
    }

    #[test]
    fn test_commute_reaches_fixed_point() {
        let mut memo = Memo::new();
        let s = scans(&mut memo, &["a", "b"]);
        let (root, _) = memo.intern(MemoExpr::join(OpTag::InnerJoin, s[0], s[1], vec![])).unwrap();
        let table = commute_table();
        let stats = explore(&mut memo, &table, &SearchConfig::default(), root).unwrap();

        assert_eq!(memo.group(root).exprs.len(), 2);
        assert_eq!(stats.rule_applications, 2);
        assert_eq!(memo.group(root).state, ExploreState::Done);
        assert!(!stats.timed_out);
    }

    #[test]
    fn test_normalize_collapses_group() {
        let mut memo = Memo::new();
        let s = scans(&mut memo, &["a", "b"]);
        let (sel, _) = memo.intern(MemoExpr::select(s[0], vec![])).unwrap();
        let (root, _) = memo.intern(MemoExpr::join(OpTag::InnerJoin, sel, s[1], vec![])).unwrap();
        explore(&mut memo, &commute_table(), &SearchConfig::default(), root).unwrap();

        assert_eq!(memo.find(sel), s[0]);
        let root = memo.find(root);
        assert!(memo
            .group(root)
            .exprs
            .iter()
            .any(|e| memo.expr(*e).children == vec![s[0], s[1]]));
    }

    #[test]
    fn test_zero_timeout_stops_before_exploring() {
        let mut memo = Memo::new();
        let s = scans(&mut memo, &["a", "b"]);
        let (root, _) = memo.intern(MemoExpr::join(OpTag::InnerJoin, s[0], s[1], vec![])).unwrap();
        let config = SearchConfig {
            timeout_ms: Some(0),
            ..SearchConfig::default()
        };
        let stats = explore(&mut memo, &commute_table(), &config, root).unwrap();
        assert!(stats.timed_out);
        assert_eq!(stats.entries_processed, 0);
        assert_eq!(memo.group(root).exprs.len(), 1);
    }

    /// Commute plus an associate rule for joins without predicates.
    fn reorder_table() -> RuleTable {
        let commute = RuleDef::explore(
            "Commute",
            op("InnerJoin", vec![cap("left"), cap("right"), cap("on"), cap("private")]),
            matched_op(None, vec![var("right"), var("left"), var("on"), var("private")]),
        );
        let associate = RuleDef::explore(
            "Associate",
            op(
                "InnerJoin",
                vec![
                    op("InnerJoin", vec![cap("a"), cap("b"), any(), cap("innerPrivate")]),
                    cap("c"),
                    any(),
                    cap("private"),
                ],
            ),
            construct(
                "InnerJoin",
                vec![
                    var("a"),
                    construct("InnerJoin", vec![var("b"), var("c"), empty_filters(), var("innerPrivate")]),
                    empty_filters(),
                    var("private"),
                ],
            ),
        );
        RuleTable::assemble(vec![commute, associate], &FunctionRegistry::new(), &RelationalOperators).unwrap()
    }

    #[test]
    fn test_merge_requeues_ancestors() {
        let table = reorder_table();

        let mut base = Memo::new();
        let s = scans(&mut base, &["a", "b", "c"]);
        let (ab, _) = base.intern(MemoExpr::join(OpTag::InnerJoin, s[0], s[1], vec![])).unwrap();
        let (root, _) = base.intern(MemoExpr::join(OpTag::InnerJoin, ab, s[2], vec![])).unwrap();
        explore(&mut base, &table, &SearchConfig::default(), root).unwrap();
        let base_root = base.find(root);

        // `b JOIN a` lands in its own group and only meets `a JOIN b` through a merge
        // once commute runs. Its parent `c JOIN (b JOIN a)` must then join the root.
        let mut dup = Memo::new();
        let s = scans(&mut dup, &["a", "b", "c"]);
        let (ab, _) = dup.intern(MemoExpr::join(OpTag::InnerJoin, s[0], s[1], vec![])).unwrap();
        let (root, _) = dup.intern(MemoExpr::join(OpTag::InnerJoin, ab, s[2], vec![])).unwrap();
        let (ba, _) = dup.intern(MemoExpr::join(OpTag::InnerJoin, s[1], s[0], vec![])).unwrap();
        let (cba, _) = dup.intern(MemoExpr::join(OpTag::InnerJoin, s[2], ba, vec![])).unwrap();
        assert_ne!(ab, ba);
        let stats = explore(&mut dup, &table, &SearchConfig::default(), root).unwrap();

        assert!(stats.merges > 0);
        assert_eq!(dup.find(ab), dup.find(ba));
        assert_eq!(dup.find(root), dup.find(cba));
        assert_eq!(dup.num_groups(), base.num_groups());
        assert_eq!(dup.num_exprs(), base.num_exprs());
        assert_eq!(
            dup.group(dup.find(root)).exprs.len(),
            base.group(base_root).exprs.len()
        );
        assert_eq!(base.group(base_root).exprs.len(), 6);
    }

    #[test]
    fn test_non_bool_guard_aborts_exploration() {
        let mut fns = FunctionRegistry::new();
        fns.register("Identity", 1, |_, args| Ok(args[0].clone())).unwrap();
        let rule = RuleDef::explore(
            "BadGuard",
            op(
                "InnerJoin",
                vec![
                    guarded(cap("left"), guard(call("Identity", vec![var("left")]))),
                    cap("right"),
                    cap("on"),
                    cap("private"),
                ],
            ),
            matched_op(None, vec![var("right"), var("left"), var("on"), var("private")]),
        );
        let table = RuleTable::assemble(vec![rule], &fns, &RelationalOperators).unwrap();

        let mut memo = Memo::new();
        let s = scans(&mut memo, &["a", "b"]);
        let (root, _) = memo.intern(MemoExpr::join(OpTag::InnerJoin, s[0], s[1], vec![])).unwrap();
        match explore(&mut memo, &table, &SearchConfig::default(), root) {
            Err(OptError::Internal { rule: Some(rule), detail }) => {
                assert_eq!(rule, "BadGuard");
                assert!(detail.contains("expected bool"), "{detail}");
            }
            other => panic!("expected internal error, got {other:?}"),
        }
        assert_eq!(memo.group(root).exprs.len(), 1);
    }
}
