//! # The Memo
//!
//! The memo compactly represents every plan the optimizer has discovered. It is a set
//! of **groups** (equivalence classes of relational expressions that produce the same
//! result set) whose members are **expressions** (an operator tag, child *groups*,
//! interned filter conjuncts and an immutable private payload).
//!
//! ## Interning
//!
//! Expression identity is purely structural: `(tag, canonical child groups, filters,
//! private)`. The memo keeps a hash index over that key, so interning a structurally
//! equal expression twice always yields the same group. Filter conjuncts are interned
//! separately into [`ScalarId`]s so expressions can be hashed cheaply.
//!
//! ## Growth, Replacement and Merging
//!
//! - [`Memo::intern`] creates a new group (and derives its logical properties) for an
//!   expression it has not seen before.
//! - [`Memo::add_alternative`] adds an exploration result to an *existing* group. It
//!   never creates a group for the root expression. When the expression already lives
//!   in a different group, the two groups are proven equivalent and are merged.
//! - [`Memo::replace`] is the normalization primitive: the old member is superseded
//!   (kept in the arena and the index, never a live member again) and the replacement
//!   takes its place.
//!
//! ## Group Merge
//!
//! Merging keeps the lower-numbered group as the representative. The absorbed group's
//! members, superseded members and applied-rule fingerprints move to it, and every
//! expression whose children mention the absorbed group is re-keyed. Re-keying can
//! make two expressions in different groups structurally equal, which cascades into
//! further merges. A merge that would make a group its own descendant is rejected
//! with [`OptError::CyclicMerge`].
//!
//! Group ids handed out earlier stay valid: [`Memo::find`] maps any id to its current
//! representative.
//!
//! ## Events
//!
//! Every group creation, member addition and merge is queued as a [`MemoEvent`]. The
//! exploration scheduler drains them to decide what to normalize and re-explore.

use crate::cost::Cost;
use crate::error::{OptError, OptResult};
use crate::expr::{ColumnId, Expr, SortKey, TableRef};
use crate::metadata::{Metadata, TableId};
use crate::operator::{ChildKind, OpTag, OperatorCatalog, Private, RelationalOperators};
use crate::properties::{DefaultPropertyDeriver, LogicalProperties, PhysicalPropertySet, PropertyDeriver};
use crate::catalog::Catalog;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, trace};

pub type GroupId = u32;
pub type ExprId = u32;
pub type ScalarId = u32;

/// A relational expression in the memo.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoExpr {
    pub tag: OpTag,
    /// Relational inputs, in schema order.
    pub children: Vec<GroupId>,
    /// The Filters field, for operators that have one.
    pub filters: Vec<ScalarId>,
    pub private: Option<Private>,
}

impl MemoExpr {
    pub fn new(tag: OpTag, children: Vec<GroupId>, filters: Vec<ScalarId>, private: Option<Private>) -> Self {
        Self {
            tag,
            children,
            filters,
            private,
        }
    }

    pub fn scan(private: crate::operator::ScanPrivate) -> Self {
        Self::new(OpTag::Scan, vec![], vec![], Some(Private::Scan(private)))
    }

    pub fn select(input: GroupId, filters: Vec<ScalarId>) -> Self {
        Self::new(OpTag::Select, vec![input], filters, None)
    }

    pub fn project(input: GroupId, cols: crate::expr::ColSet) -> Self {
        Self::new(
            OpTag::Project,
            vec![input],
            vec![],
            Some(Private::Project(crate::operator::ProjectPrivate { cols })),
        )
    }

    /// A logical join with default (hint-free) private.
    pub fn join(tag: OpTag, left: GroupId, right: GroupId, on: Vec<ScalarId>) -> Self {
        Self::new(
            tag,
            vec![left, right],
            on,
            Some(Private::Join(Default::default())),
        )
    }
}

/// Exploration state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExploreState {
    Unexplored,
    Normalizing,
    Exploring,
    Done,
}

/// Which member of a group wins for a given required property set.
#[derive(Debug, Clone)]
pub enum PlanChoice {
    Expr {
        expr: ExprId,
        child_props: Vec<PhysicalPropertySet>,
    },
    /// A sort enforcer over the group's best unordered plan.
    Sort,
}

#[derive(Debug, Clone)]
pub struct Winner {
    pub choice: PlanChoice,
    pub cost: Cost,
}

/// An equivalence class of expressions.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    /// Live members, in registration order.
    pub exprs: Vec<ExprId>,
    /// Members removed by normalization. They stay interned so that re-deriving one
    /// resolves to this group without bringing it back.
    pub superseded: Vec<ExprId>,
    /// Logical properties shared by every member.
    pub props: Arc<LogicalProperties>,
    pub state: ExploreState,
    /// Winning plan per required physical property set.
    pub best_plan: HashMap<PhysicalPropertySet, Winner>,
    /// Fingerprints of `(rule, binding)` pairs already applied to this group.
    pub applied: HashSet<u64>,
}

/// Memo change notifications, drained by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoEvent {
    GroupCreated(GroupId),
    MemberAdded { group: GroupId, expr: ExprId },
    Merged { into: GroupId, absorbed: GroupId },
}

/// Result of adding an expression to an existing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(ExprId),
    /// The expression is already a member of the group.
    Duplicate(ExprId),
    /// The expression lived in another group; both groups are now one.
    Merged(GroupId),
    /// Nothing changed (the replacement was the original or a superseded member).
    Unchanged,
}

impl AddOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, AddOutcome::Duplicate(_) | AddOutcome::Unchanged)
    }
}

/// A node of an extracted plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub group: GroupId,
    /// `None` for a sort enforcer.
    pub tag: Option<OpTag>,
    pub detail: String,
    pub children: Vec<PlanNode>,
    pub cost: Cost,
    pub rows: f64,
}

impl PlanNode {
    pub fn name(&self) -> &'static str {
        self.tag.map(|t| t.name()).unwrap_or("Sort")
    }

    /// Indented multi-line rendering.
    pub fn display(&self, indent: usize) -> String {
        let mut out = String::new();
        self.render(indent, &mut out);
        out
    }

    fn render(&self, indent: usize, out: &mut String) {
        let _ = writeln!(
            out,
            "{}{} {} (G{} rows={:.0} cost={:.1})",
            "  ".repeat(indent),
            self.name(),
            self.detail,
            self.group,
            self.rows,
            self.cost.value()
        );
        for child in &self.children {
            child.render(indent + 1, out);
        }
    }

    /// Number of nodes in the plan with the given tag.
    pub fn count(&self, tag: OpTag) -> usize {
        let own = usize::from(self.tag == Some(tag));
        own + self.children.iter().map(|c| c.count(tag)).sum::<usize>()
    }
}

/// The memo: groups, expressions, scalars and query metadata for one session.
pub struct Memo {
    groups: Vec<Group>,
    exprs: Vec<MemoExpr>,
    /// Group each expression was registered in (resolve with `find`).
    expr_group: Vec<GroupId>,
    live: Vec<bool>,
    index: HashMap<MemoExpr, ExprId>,
    /// Expressions that mention a group among their children.
    referrers: Vec<Vec<ExprId>>,
    /// Union-find parent links; a representative points to itself.
    parent: Vec<GroupId>,
    scalars: Vec<Expr>,
    scalar_index: HashMap<Expr, ScalarId>,
    metadata: Metadata,
    operators: Arc<dyn OperatorCatalog>,
    deriver: Arc<dyn PropertyDeriver>,
    root: Option<GroupId>,
    events: VecDeque<MemoEvent>,
    merges: usize,
}

impl Default for Memo {
    fn default() -> Self {
        Self::new()
    }
}

impl Memo {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(RelationalOperators), Arc::new(DefaultPropertyDeriver))
    }

    pub fn with_parts(operators: Arc<dyn OperatorCatalog>, deriver: Arc<dyn PropertyDeriver>) -> Self {
        Self {
            groups: Vec::new(),
            exprs: Vec::new(),
            expr_group: Vec::new(),
            live: Vec::new(),
            index: HashMap::new(),
            referrers: Vec::new(),
            parent: Vec::new(),
            scalars: Vec::new(),
            scalar_index: HashMap::new(),
            metadata: Metadata::new(),
            operators,
            deriver,
            root: None,
            events: VecDeque::new(),
            merges: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Metadata and scalars
    // -----------------------------------------------------------------------

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn add_table(
        &mut self,
        catalog: &dyn Catalog,
        table: &TableRef,
        alias: impl Into<String>,
    ) -> OptResult<TableId> {
        self.metadata.add_table(catalog, table, alias)
    }

    pub fn operators(&self) -> &dyn OperatorCatalog {
        self.operators.as_ref()
    }

    pub fn deriver(&self) -> &dyn PropertyDeriver {
        self.deriver.as_ref()
    }

    pub fn intern_scalar(&mut self, expr: Expr) -> ScalarId {
        if let Some(&id) = self.scalar_index.get(&expr) {
            return id;
        }
        let id = self.scalars.len() as ScalarId;
        self.scalars.push(expr.clone());
        self.scalar_index.insert(expr, id);
        id
    }

    /// Intern each conjunct of a predicate, flattening AND-chains.
    pub fn intern_filters(&mut self, predicates: Vec<Expr>) -> Vec<ScalarId> {
        let mut ids = Vec::new();
        for p in predicates {
            for c in p.conjuncts() {
                let id = self.intern_scalar(c.clone());
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    pub fn scalar(&self, id: ScalarId) -> &Expr {
        &self.scalars[id as usize]
    }

    pub fn num_scalars(&self) -> usize {
        self.scalars.len()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current representative of a group id.
    pub fn find(&self, mut group: GroupId) -> GroupId {
        while let Some(&p) = self.parent.get(group as usize) {
            if p == group {
                break;
            }
            group = p;
        }
        group
    }

    pub fn group(&self, group: GroupId) -> &Group {
        &self.groups[self.find(group) as usize]
    }

    pub fn group_mut(&mut self, group: GroupId) -> &mut Group {
        let g = self.find(group);
        &mut self.groups[g as usize]
    }

    pub fn expr(&self, expr: ExprId) -> &MemoExpr {
        &self.exprs[expr as usize]
    }

    /// Group an expression currently belongs to.
    pub fn group_of(&self, expr: ExprId) -> GroupId {
        self.find(self.expr_group[expr as usize])
    }

    pub fn is_live(&self, expr: ExprId) -> bool {
        self.live.get(expr as usize).copied().unwrap_or(false)
    }

    pub fn props(&self, group: GroupId) -> &LogicalProperties {
        &self.group(group).props
    }

    pub fn root(&self) -> Option<GroupId> {
        self.root.map(|r| self.find(r))
    }

    pub fn set_root(&mut self, group: GroupId) {
        self.root = Some(group);
    }

    /// Representative group ids, in creation order.
    pub fn group_ids(&self) -> Vec<GroupId> {
        (0..self.groups.len() as GroupId)
            .filter(|g| self.find(*g) == *g)
            .collect()
    }

    pub fn num_groups(&self) -> usize {
        self.group_ids().len()
    }

    /// Number of live expressions across all groups.
    pub fn num_exprs(&self) -> usize {
        self.live.iter().filter(|l| **l).count()
    }

    /// Number of live expressions with the given tag.
    pub fn count_exprs(&self, tag: OpTag) -> usize {
        self.exprs
            .iter()
            .enumerate()
            .filter(|(i, e)| self.live[*i] && e.tag == tag)
            .count()
    }

    pub fn num_merges(&self) -> usize {
        self.merges
    }

    pub fn next_event(&mut self) -> Option<MemoEvent> {
        self.events.pop_front()
    }

    pub fn set_state(&mut self, group: GroupId, state: ExploreState) {
        self.group_mut(group).state = state;
    }

    /// Record that a rule binding has been applied to a group. Returns `false` when
    /// the fingerprint was already present.
    pub fn record_applied(&mut self, group: GroupId, fingerprint: u64) -> bool {
        self.group_mut(group).applied.insert(fingerprint)
    }

    // -----------------------------------------------------------------------
    // Interning
    // -----------------------------------------------------------------------

    fn check_group(&self, group: GroupId) -> OptResult<GroupId> {
        if (group as usize) < self.groups.len() {
            Ok(self.find(group))
        } else {
            Err(OptError::InvalidInput(format!("unknown group {group}")))
        }
    }

    /// Validate an expression against the operator catalog and map its children to
    /// their representatives.
    fn canonicalize(&self, mut expr: MemoExpr) -> OptResult<MemoExpr> {
        let schema = self.operators.child_schema(expr.tag);
        let relational = schema.iter().filter(|k| **k == ChildKind::Relational).count();
        if expr.children.len() != relational {
            return Err(OptError::InvalidInput(format!(
                "{} expects {} input(s), found {}",
                expr.tag,
                relational,
                expr.children.len()
            )));
        }
        if !schema.contains(&ChildKind::Filters) && !expr.filters.is_empty() {
            return Err(OptError::InvalidInput(format!("{} has no filters field", expr.tag)));
        }
        match (self.operators.payload_schema(expr.tag), &expr.private) {
            (None, None) => {}
            (Some(kind), Some(p)) if p.kind() == kind => {}
            (expected, found) => {
                return Err(OptError::InvalidInput(format!(
                    "{} expects private {:?}, found {:?}",
                    expr.tag,
                    expected,
                    found.as_ref().map(|p| p.kind())
                )))
            }
        }
        if let Some(bad) = expr.filters.iter().find(|f| **f as usize >= self.scalars.len()) {
            return Err(OptError::InvalidInput(format!("unknown scalar {bad}")));
        }
        for child in expr.children.iter_mut() {
            *child = self.check_group(*child)?;
        }
        Ok(expr)
    }

    fn insert_expr(&mut self, group: GroupId, expr: MemoExpr) -> ExprId {
        let id = self.exprs.len() as ExprId;
        let mut seen = Vec::new();
        for &child in &expr.children {
            if !seen.contains(&child) {
                self.referrers[child as usize].push(id);
                seen.push(child);
            }
        }
        self.index.insert(expr.clone(), id);
        self.exprs.push(expr);
        self.expr_group.push(group);
        self.live.push(true);
        self.groups[group as usize].exprs.push(id);
        id
    }

    /// Intern an expression, creating a new group when it has not been seen before.
    pub fn intern(&mut self, expr: MemoExpr) -> OptResult<(GroupId, ExprId)> {
        let expr = self.canonicalize(expr)?;
        if let Some(&existing) = self.index.get(&expr) {
            return Ok((self.group_of(existing), existing));
        }

        let deriver = self.deriver.clone();
        let props = deriver.derive(self, &expr)?;

        let group = self.groups.len() as GroupId;
        self.groups.push(Group {
            id: group,
            exprs: Vec::new(),
            superseded: Vec::new(),
            props: Arc::new(props),
            state: ExploreState::Unexplored,
            best_plan: HashMap::new(),
            applied: HashSet::new(),
        });
        self.parent.push(group);
        self.referrers.push(Vec::new());
        let id = self.insert_expr(group, expr);
        self.events.push_back(MemoEvent::GroupCreated(group));
        trace!(group, expr = id, tag = %self.exprs[id as usize].tag, "interned new group");
        Ok((group, id))
    }

    /// Add an exploration result to an existing group.
    pub fn add_alternative(&mut self, group: GroupId, expr: MemoExpr) -> OptResult<AddOutcome> {
        let group = self.check_group(group)?;
        let expr = self.canonicalize(expr)?;
        if let Some(&existing) = self.index.get(&expr) {
            let other = self.group_of(existing);
            if other == group {
                return Ok(AddOutcome::Duplicate(existing));
            }
            let into = self.merge(group, other)?;
            return Ok(AddOutcome::Merged(into));
        }
        self.add_member(group, expr)
    }

    fn add_member(&mut self, group: GroupId, expr: MemoExpr) -> OptResult<AddOutcome> {
        if expr
            .children
            .iter()
            .any(|&c| c == group || self.reaches(c, group))
        {
            return Err(OptError::SelfReference { group });
        }
        let id = self.insert_expr(group, expr);
        self.groups[group as usize].best_plan.clear();
        self.events.push_back(MemoEvent::MemberAdded { group, expr: id });
        trace!(group, expr = id, "added alternative");
        Ok(AddOutcome::Added(id))
    }

    fn supersede(&mut self, group: GroupId, expr: ExprId) {
        let g = &mut self.groups[group as usize];
        if let Some(pos) = g.exprs.iter().position(|e| *e == expr) {
            g.exprs.remove(pos);
            g.superseded.push(expr);
            g.best_plan.clear();
            self.live[expr as usize] = false;
        }
    }

    /// Replace `old` with `expr` in `group` (normalization).
    pub fn replace(&mut self, group: GroupId, old: ExprId, expr: MemoExpr) -> OptResult<AddOutcome> {
        let group = self.check_group(group)?;
        let expr = self.canonicalize(expr)?;
        if let Some(&existing) = self.index.get(&expr) {
            let other = self.group_of(existing);
            if other == group {
                if existing == old || !self.is_live(existing) {
                    return Ok(AddOutcome::Unchanged);
                }
                self.supersede(group, old);
                return Ok(AddOutcome::Duplicate(existing));
            }
            self.supersede(group, old);
            let into = self.merge(group, other)?;
            return Ok(AddOutcome::Merged(into));
        }
        self.supersede(group, old);
        self.add_member(group, expr)
    }

    /// Replace `old` by declaring `group` equivalent to `target` (normalization that
    /// collapses an operator into its input).
    pub fn replace_with_group(&mut self, group: GroupId, old: ExprId, target: GroupId) -> OptResult<AddOutcome> {
        let group = self.check_group(group)?;
        let target = self.check_group(target)?;
        if group == target {
            return Ok(AddOutcome::Unchanged);
        }
        self.supersede(group, old);
        let into = self.merge(group, target)?;
        Ok(AddOutcome::Merged(into))
    }

    // -----------------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------------

    /// Whether `to` is reachable from `from` through live members.
    pub fn reaches(&self, from: GroupId, to: GroupId) -> bool {
        let to = self.find(to);
        let mut stack = vec![self.find(from)];
        let mut seen = HashSet::new();
        while let Some(g) = stack.pop() {
            if !seen.insert(g) {
                continue;
            }
            for &e in &self.groups[g as usize].exprs {
                for &c in &self.exprs[e as usize].children {
                    let c = self.find(c);
                    if c == to {
                        return true;
                    }
                    stack.push(c);
                }
            }
        }
        false
    }

    /// Merge two groups proven equivalent. Returns the representative.
    pub fn merge(&mut self, a: GroupId, b: GroupId) -> OptResult<GroupId> {
        let mut pending = VecDeque::from([(a, b)]);
        let mut result = self.find(a);

        while let Some((x, y)) = pending.pop_front() {
            let (x, y) = (self.find(x), self.find(y));
            if x == y {
                continue;
            }
            let (rep, absorbed) = (x.min(y), x.max(y));
            if self.reaches(rep, absorbed) || self.reaches(absorbed, rep) {
                return Err(OptError::CyclicMerge {
                    target: rep,
                    absorbed,
                });
            }

            self.parent[absorbed as usize] = rep;
            let moved = std::mem::take(&mut self.groups[absorbed as usize].exprs);
            let moved_superseded = std::mem::take(&mut self.groups[absorbed as usize].superseded);
            let moved_applied = std::mem::take(&mut self.groups[absorbed as usize].applied);
            self.groups[absorbed as usize].best_plan.clear();
            {
                let target = &mut self.groups[rep as usize];
                for e in moved {
                    if !target.exprs.contains(&e) {
                        target.exprs.push(e);
                    }
                }
                target.superseded.extend(moved_superseded);
                target.applied.extend(moved_applied);
                target.best_plan.clear();
            }

            // Re-key every expression that mentions the absorbed group.
            let mut refs = std::mem::take(&mut self.referrers[absorbed as usize]);
            refs.sort_unstable();
            refs.dedup();
            for e in refs {
                let old_key = self.exprs[e as usize].clone();
                let mut new_key = old_key.clone();
                for c in new_key.children.iter_mut() {
                    *c = self.find(*c);
                }
                if self.index.get(&old_key) == Some(&e) {
                    self.index.remove(&old_key);
                }
                match self.index.get(&new_key).copied() {
                    Some(other) if other != e => {
                        // `e` is now a duplicate of `other`.
                        let ge = self.group_of(e);
                        let go = self.group_of(other);
                        if self.live[e as usize] {
                            if let Some(pos) = self.groups[ge as usize].exprs.iter().position(|x| *x == e) {
                                self.groups[ge as usize].exprs.remove(pos);
                            }
                            self.groups[ge as usize].superseded.push(e);
                            self.live[e as usize] = false;
                        }
                        if ge != go {
                            pending.push_back((ge, go));
                        }
                    }
                    _ => {
                        self.index.insert(new_key.clone(), e);
                    }
                }
                self.exprs[e as usize] = new_key;
                self.referrers[rep as usize].push(e);
            }

            self.merges += 1;
            self.events.push_back(MemoEvent::Merged { into: rep, absorbed });
            debug!(event = "merge_group", into = rep, absorbed, "merged groups");
            result = rep;
        }
        Ok(self.find(result))
    }

    /// Groups with a live member that takes `group` as an input.
    pub fn parents(&self, group: GroupId) -> Vec<GroupId> {
        let group = self.find(group);
        let mut out: Vec<GroupId> = self.referrers[group as usize]
            .iter()
            .filter(|e| self.is_live(**e))
            .filter(|e| {
                self.exprs[**e as usize]
                    .children
                    .iter()
                    .any(|c| self.find(*c) == group)
            })
            .map(|e| self.group_of(*e))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Ancestors up to `depth` levels above `group` (`None` for all of them).
    pub fn ancestors(&self, group: GroupId, depth: Option<usize>) -> Vec<GroupId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([self.find(group)]);
        let mut frontier = vec![self.find(group)];
        let mut level = 0;
        while !frontier.is_empty() && depth.map_or(true, |d| level < d) {
            let mut next = Vec::new();
            for g in frontier {
                for p in self.parents(g) {
                    if seen.insert(p) {
                        out.push(p);
                        next.push(p);
                    }
                }
            }
            frontier = next;
            level += 1;
        }
        out
    }

    // -----------------------------------------------------------------------
    // Plan extraction and display
    // -----------------------------------------------------------------------

    /// The winning member of `group` under `required`, once the selector has costed it.
    /// `None` when the group has no winner or a sort enforcer wins.
    pub fn best_expression(&self, group: GroupId, required: &PhysicalPropertySet) -> Option<(ExprId, Cost)> {
        match self.group(group).best_plan.get(required)? {
            Winner {
                choice: PlanChoice::Expr { expr, .. },
                cost,
            } => Some((*expr, *cost)),
            Winner {
                choice: PlanChoice::Sort, ..
            } => None,
        }
    }

    /// Build the plan tree recorded by the plan selector.
    pub fn extract_best_plan(&self, group: GroupId, required: &PhysicalPropertySet) -> OptResult<PlanNode> {
        let g = self.group(group);
        let winner = g
            .best_plan
            .get(required)
            .ok_or(OptError::NoPlan(g.id))?;
        let rows = g.props.stats.row_count;
        match &winner.choice {
            PlanChoice::Sort => {
                let input = self.extract_best_plan(g.id, &PhysicalPropertySet::any())?;
                let detail = required
                    .sort_order
                    .as_deref()
                    .map(|keys| self.format_ordering(keys))
                    .unwrap_or_default();
                Ok(PlanNode {
                    group: g.id,
                    tag: None,
                    detail,
                    children: vec![input],
                    cost: winner.cost,
                    rows,
                })
            }
            PlanChoice::Expr { expr, child_props } => {
                let e = self.expr(*expr);
                let mut children = Vec::with_capacity(e.children.len());
                for (child, props) in e.children.iter().zip(child_props.iter()) {
                    children.push(self.extract_best_plan(*child, props)?);
                }
                Ok(PlanNode {
                    group: g.id,
                    tag: Some(e.tag),
                    detail: self.describe_expr(*expr),
                    children,
                    cost: winner.cost,
                    rows,
                })
            }
        }
    }

    pub fn format_filters(&self, filters: &[ScalarId]) -> String {
        let md = &self.metadata;
        filters
            .iter()
            .map(|f| self.format_scalar(self.scalar(*f), md))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn format_scalar(&self, expr: &Expr, md: &Metadata) -> String {
        match expr {
            Expr::Column(c) => md.column_label(*c),
            Expr::Literal(v) => v.to_string(),
            Expr::BinaryOp { op, left, right } => format!(
                "{} {} {}",
                self.format_scalar(left, md),
                op,
                self.format_scalar(right, md)
            ),
            Expr::Function { name, args } => format!(
                "{}({})",
                name,
                args.iter()
                    .map(|a| self.format_scalar(a, md))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            other => other.to_string(),
        }
    }

    fn format_cols(&self, cols: impl IntoIterator<Item = ColumnId>) -> String {
        cols.into_iter()
            .map(|c| self.metadata.column_label(c))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn format_ordering(&self, keys: &[SortKey]) -> String {
        keys.iter()
            .map(|k| format!("{}{}", if k.ascending { "+" } else { "-" }, self.metadata.column_label(k.col)))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn table_label(&self, table: TableId, index: usize) -> String {
        match self.metadata.table(table) {
            Ok(t) => match t.def.indexes.get(index) {
                Some(i) if index > 0 => format!("{}@{}", t.alias, i.name),
                _ => t.alias.clone(),
            },
            Err(_) => table.to_string(),
        }
    }

    /// One-line description of an expression's payload and filters.
    pub fn describe_expr(&self, expr: ExprId) -> String {
        let e = self.expr(expr);
        let mut parts = Vec::new();
        match &e.private {
            Some(Private::Scan(p)) => {
                parts.push(self.table_label(p.table, p.index));
                if let Some(limit) = p.hard_limit {
                    parts.push(format!("limit={limit}"));
                }
            }
            Some(Private::Project(p)) => parts.push(format!("cols=[{}]", self.format_cols(p.cols.iter()))),
            Some(Private::Join(p)) if p.hint != Default::default() => parts.push(format!("hint={:?}", p.hint)),
            Some(Private::Grouping(p)) => parts.push(format!(
                "on=[{}]",
                self.format_cols(p.grouping_cols.iter())
            )),
            Some(Private::IndexJoin(p)) => parts.push(self.table_label(p.table, 0)),
            Some(Private::MergeJoin(p)) => parts.push(format!(
                "{:?} left=[{}] right=[{}]",
                p.join_type,
                self.format_cols(p.left_eq.iter().copied()),
                self.format_cols(p.right_eq.iter().copied())
            )),
            Some(Private::LookupJoin(p)) => parts.push(format!(
                "{:?} {} keys=[{}]",
                p.join_type,
                self.table_label(p.table, p.index),
                self.format_cols(p.key_cols.iter().copied())
            )),
            Some(Private::InvertedJoin(p)) => parts.push(format!(
                "{:?} {} input={}",
                p.join_type,
                self.table_label(p.table, p.index),
                self.metadata.column_label(p.input_col)
            )),
            Some(Private::ZigzagJoin(p)) => parts.push(format!(
                "{} & {}",
                self.table_label(p.table, p.left_index),
                self.table_label(p.table, p.right_index)
            )),
            _ => {}
        }
        if !e.filters.is_empty() {
            parts.push(format!("[{}]", self.format_filters(&e.filters)));
        }
        parts.join(" ")
    }

    /// Deterministic textual dump of every group and its live members.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for g in self.group_ids() {
            let group = &self.groups[g as usize];
            let _ = writeln!(out, "G{g}:");
            for &e in &group.exprs {
                let expr = self.expr(e);
                let children: Vec<String> = expr.children.iter().map(|c| format!("G{}", self.find(*c))).collect();
                let _ = writeln!(
                    out,
                    "  {} {} {}",
                    expr.tag,
                    children.join(" "),
                    self.describe_expr(e)
                );
            }
        }
        out
    }
}
