//! # Declarative Pattern Matching for Rewrite Rules
//!
//! Each rule declares a [`Pattern`] describing the shape of expressions it rewrites.
//! Patterns are compiled from rule definitions against the operator catalog, so every
//! [`Pattern::Op`] here already has one field pattern per schema field and knows which
//! field kind it sits in.
//!
//! ## Pattern Language
//!
//! - `Op { tags, fields }`: an expression whose tag is one of `tags`, with each field
//!   matched by the corresponding field pattern.
//! - `Any`: matches any field.
//! - `Bind { var, inner }`: match `inner` and bind the field's value to `$var`. A
//!   relational field binds its group; an `Op` pattern under a bind also records the
//!   matched tag so templates can rebuild "the same operator".
//! - `Guarded { inner, guard }`: match `inner`, then require the guard to hold over
//!   the bindings collected so far.
//! - `List`: a Filters field that is empty, has *some* item matching a pattern
//!   (existential), or has exactly the listed items.
//! - `Scalar { kinds, operands }`: a filter item (or operand of one) whose kind is in
//!   `kinds`, with operands matched positionally.
//!
//! ## Group-Level Matching
//!
//! A nested `Op` pattern on a relational field is tried against every live member of
//! the child group, and an existential list pattern against every item. Matching
//! therefore returns *all* binding sets, one per combination, and the scheduler
//! applies the rule once per binding set.
//!
//! Matching is side-effect free. Guards run through the same evaluator as templates
//! but may not construct expressions.

use crate::error::{OptError, OptResult};
use crate::expr::{Expr, ScalarKind};
use crate::function::Value;
use crate::memo::{ExprId, GroupId, Memo, ScalarId};
use crate::operator::{ChildKind, OpTag, Private};
use crate::rule::{eval_value, Template};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Compiled pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Op { tags: Vec<OpTag>, fields: Vec<Pattern> },
    Any,
    Bind { var: String, inner: Box<Pattern> },
    Guarded { inner: Box<Pattern>, guard: Guard },
    List(ListPattern),
    Scalar { kinds: Vec<ScalarKind>, operands: Vec<Pattern> },
}

#[derive(Debug, Clone)]
pub enum ListPattern {
    Empty,
    /// Some item matches.
    Existential(Box<Pattern>),
    /// Exactly these items, in order.
    Exact(Vec<Pattern>),
}

/// Boolean condition over bindings.
#[derive(Debug, Clone)]
pub enum Guard {
    Expr(Template),
    Not(Box<Guard>),
    And(Vec<Guard>),
}

impl Guard {
    /// Evaluate the guard. `And` short-circuits.
    pub fn eval(&self, memo: &Memo, rule: &str, bindings: &Bindings) -> OptResult<bool> {
        match self {
            Guard::Expr(t) => match eval_value(memo, rule, t, bindings)? {
                Value::Bool(b) => Ok(b),
                other => Err(OptError::Internal {
                    rule: Some(rule.to_string()),
                    detail: format!("guard returned {}, expected bool", other.kind_name()),
                }),
            },
            Guard::Not(inner) => Ok(!inner.eval(memo, rule, bindings)?),
            Guard::And(guards) => {
                for g in guards {
                    if !g.eval(memo, rule, bindings)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

impl Pattern {
    /// Root tags of an `Op` pattern, looking through binds and guards.
    pub fn root_tags(&self) -> Option<&[OpTag]> {
        match self {
            Pattern::Op { tags, .. } => Some(tags),
            Pattern::Bind { inner, .. } | Pattern::Guarded { inner, .. } => inner.root_tags(),
            _ => None,
        }
    }

    /// Nesting depth of relational `Op` patterns.
    pub fn depth(&self) -> usize {
        match self {
            Pattern::Op { fields, .. } => 1 + fields.iter().map(Pattern::depth).max().unwrap_or(0),
            Pattern::Bind { inner, .. } | Pattern::Guarded { inner, .. } => inner.depth(),
            _ => 0,
        }
    }
}

/// Variable bindings produced by one successful match.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub vars: BTreeMap<String, Value>,
    /// Tags matched by `Op` patterns bound to a variable.
    pub tags: BTreeMap<String, OpTag>,
    /// Tag of the matched root expression.
    pub root_tag: Option<OpTag>,
    /// Matched expressions, in pattern order (root first).
    pub path: Vec<ExprId>,
}

impl Bindings {
    pub fn get(&self, var: &str) -> Option<&Value> {
        self.vars.get(var)
    }

    /// Bind `var`, failing when it is already bound to something else.
    fn bind(mut self, var: &str, value: Value) -> Option<Bindings> {
        match self.vars.get(var) {
            Some(existing) if *existing != value => None,
            Some(_) => Some(self),
            None => {
                self.vars.insert(var.to_string(), value);
                Some(self)
            }
        }
    }

    /// Identity of this binding for a rule. Two matches with the same fingerprint would
    /// produce the same replacement.
    pub fn fingerprint(&self, rule: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        rule.hash(&mut hasher);
        self.path.hash(&mut hasher);
        self.vars.hash(&mut hasher);
        self.tags.hash(&mut hasher);
        hasher.finish()
    }
}

/// Matches compiled patterns against the memo.
pub struct Matcher<'a> {
    memo: &'a Memo,
    rule: &'a str,
}

impl<'a> Matcher<'a> {
    pub fn new(memo: &'a Memo, rule: &'a str) -> Self {
        Self { memo, rule }
    }

    /// Match a rule's root pattern against one expression.
    pub fn match_root(&self, pattern: &Pattern, expr: ExprId) -> OptResult<Vec<Bindings>> {
        let bindings = Bindings {
            root_tag: Some(self.memo.expr(expr).tag),
            ..Bindings::default()
        };
        self.match_expr(pattern, expr, bindings)
    }

    fn guard(&self, guard: &Guard, results: Vec<Bindings>) -> OptResult<Vec<Bindings>> {
        let mut out = Vec::with_capacity(results.len());
        for b in results {
            if guard.eval(self.memo, self.rule, &b)? {
                out.push(b);
            }
        }
        Ok(out)
    }

    fn match_expr(&self, pattern: &Pattern, expr: ExprId, b: Bindings) -> OptResult<Vec<Bindings>> {
        match pattern {
            Pattern::Any => Ok(vec![b]),
            Pattern::Bind { var, inner } => {
                let group = self.memo.group_of(expr);
                let tag = self.memo.expr(expr).tag;
                let mut out = Vec::new();
                for mut r in self.match_expr(inner, expr, b)? {
                    if matches!(inner.root_tags(), Some(_)) {
                        r.tags.insert(var.clone(), tag);
                    }
                    out.extend(r.bind(var, Value::Group(group)));
                }
                Ok(out)
            }
            Pattern::Guarded { inner, guard } => {
                let results = self.match_expr(inner, expr, b)?;
                self.guard(guard, results)
            }
            Pattern::Op { tags, fields } => {
                let e = self.memo.expr(expr);
                if !tags.contains(&e.tag) {
                    return Ok(vec![]);
                }
                let schema = self.memo.operators().child_schema(e.tag);
                if schema.len() != fields.len() {
                    return Err(OptError::Internal {
                        rule: Some(self.rule.to_string()),
                        detail: format!("pattern for {} has {} fields", e.tag, fields.len()),
                    });
                }
                let mut b = b;
                b.path.push(expr);
                let mut partial = vec![b];
                let mut child = 0;
                for (kind, field) in schema.iter().zip(fields) {
                    let mut next = Vec::new();
                    for p in partial {
                        let matched = match kind {
                            ChildKind::Relational => self.match_group(field, e.children[child], p)?,
                            ChildKind::Filters => self.match_filters(field, &e.filters, p)?,
                            ChildKind::Private(_) => self.match_private(field, e.private.as_ref(), p)?,
                        };
                        next.extend(matched);
                    }
                    if *kind == ChildKind::Relational {
                        child += 1;
                    }
                    partial = next;
                    if partial.is_empty() {
                        break;
                    }
                }
                Ok(partial)
            }
            _ => Ok(vec![]),
        }
    }

    fn match_group(&self, pattern: &Pattern, group: GroupId, b: Bindings) -> OptResult<Vec<Bindings>> {
        let group = self.memo.find(group);
        match pattern {
            Pattern::Any => Ok(vec![b]),
            Pattern::Bind { var, inner } if inner.root_tags().is_none() => {
                let results = self.match_group(inner, group, b)?;
                Ok(results
                    .into_iter()
                    .filter_map(|r| r.bind(var, Value::Group(group)))
                    .collect())
            }
            Pattern::Guarded { inner, guard } if inner.root_tags().is_none() => {
                let results = self.match_group(inner, group, b)?;
                self.guard(guard, results)
            }
            // An operator pattern: try every live member.
            _ => {
                let mut out = Vec::new();
                let members = self.memo.group(group).exprs.clone();
                for e in members {
                    out.extend(self.match_expr(pattern, e, b.clone())?);
                }
                Ok(out)
            }
        }
    }

    fn match_filters(&self, pattern: &Pattern, filters: &[ScalarId], b: Bindings) -> OptResult<Vec<Bindings>> {
        match pattern {
            Pattern::Any => Ok(vec![b]),
            Pattern::Bind { var, inner } => {
                let results = self.match_filters(inner, filters, b)?;
                Ok(results
                    .into_iter()
                    .filter_map(|r| r.bind(var, Value::Filters(filters.to_vec())))
                    .collect())
            }
            Pattern::Guarded { inner, guard } => {
                let results = self.match_filters(inner, filters, b)?;
                self.guard(guard, results)
            }
            Pattern::List(ListPattern::Empty) => Ok(if filters.is_empty() { vec![b] } else { vec![] }),
            Pattern::List(ListPattern::Existential(item)) => {
                let mut out = Vec::new();
                for &id in filters {
                    out.extend(self.match_item(item, id, b.clone())?);
                }
                Ok(out)
            }
            Pattern::List(ListPattern::Exact(items)) => {
                if items.len() != filters.len() {
                    return Ok(vec![]);
                }
                let mut partial = vec![b];
                for (item, &id) in items.iter().zip(filters) {
                    let mut next = Vec::new();
                    for p in partial {
                        next.extend(self.match_item(item, id, p)?);
                    }
                    partial = next;
                }
                Ok(partial)
            }
            _ => Ok(vec![]),
        }
    }

    fn match_item(&self, pattern: &Pattern, id: ScalarId, b: Bindings) -> OptResult<Vec<Bindings>> {
        match pattern {
            Pattern::Bind { var, inner } => {
                let results = self.match_item(inner, id, b)?;
                Ok(results
                    .into_iter()
                    .filter_map(|r| r.bind(var, Value::Scalar(id)))
                    .collect())
            }
            Pattern::Guarded { inner, guard } => {
                let results = self.match_item(inner, id, b)?;
                self.guard(guard, results)
            }
            other => self.match_scalar(other, self.memo.scalar(id), b),
        }
    }

    fn match_scalar(&self, pattern: &Pattern, expr: &Expr, b: Bindings) -> OptResult<Vec<Bindings>> {
        match pattern {
            Pattern::Any => Ok(vec![b]),
            Pattern::Bind { var, inner } => {
                let results = self.match_scalar(inner, expr, b)?;
                Ok(results
                    .into_iter()
                    .filter_map(|r| r.bind(var, Value::ScalarExpr(expr.clone())))
                    .collect())
            }
            Pattern::Guarded { inner, guard } => {
                let results = self.match_scalar(inner, expr, b)?;
                self.guard(guard, results)
            }
            Pattern::Scalar { kinds, operands } => {
                if !kinds.is_empty() && !kinds.contains(&expr.kind()) {
                    return Ok(vec![]);
                }
                if operands.is_empty() {
                    return Ok(vec![b]);
                }
                let actual = expr.operands();
                if actual.len() != operands.len() {
                    return Ok(vec![]);
                }
                let mut partial = vec![b];
                for (p, e) in operands.iter().zip(actual) {
                    let mut next = Vec::new();
                    for b in partial {
                        next.extend(self.match_scalar(p, e, b)?);
                    }
                    partial = next;
                }
                Ok(partial)
            }
            _ => Ok(vec![]),
        }
    }

    fn match_private(&self, pattern: &Pattern, private: Option<&Private>, b: Bindings) -> OptResult<Vec<Bindings>> {
        match (pattern, private) {
            (Pattern::Any, _) => Ok(vec![b]),
            (Pattern::Bind { var, inner }, Some(p)) => {
                let results = self.match_private(inner, private, b)?;
                Ok(results
                    .into_iter()
                    .filter_map(|r| r.bind(var, Value::Private(p.clone())))
                    .collect())
            }
            (Pattern::Guarded { inner, guard }, _) => {
                let results = self.match_private(inner, private, b)?;
                self.guard(guard, results)
            }
            _ => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, TableDef};
    use crate::expr::{col, eq, func, TableRef};
    use crate::memo::MemoExpr;
    use crate::operator::ScanPrivate;

    fn memo() -> (Memo, GroupId, GroupId, GroupId) {
        let mut catalog = InMemoryCatalog::new();
        for n in ["a", "b", "c"] {
            catalog.add_table(TableDef::new(TableRef::new("s", n), 10.0).with_column("k", 10.0));
        }
        let mut memo = Memo::new();
        let mut groups = Vec::new();
        for n in ["a", "b", "c"] {
            let t = memo.add_table(&catalog, &TableRef::new("s", n), n).unwrap();
            let cols = memo.metadata().table_columns(t).unwrap();
            groups.push(memo.intern(MemoExpr::scan(ScanPrivate::new(t, cols))).unwrap().0);
        }
        (memo, groups[0], groups[1], groups[2])
    }

    fn join_pattern(left: Pattern) -> Pattern {
        Pattern::Op {
            tags: vec![OpTag::InnerJoin],
            fields: vec![
                left,
                Pattern::Bind { var: "right".into(), inner: Box::new(Pattern::Any) },
                Pattern::Bind { var: "on".into(), inner: Box::new(Pattern::Any) },
                Pattern::Any,
            ],
        }
    }

    #[test]
    fn test_nested_match_binds_groups_and_tags() {
        let (mut memo, a, b, c) = memo();
        let (ab, _) = memo.intern(MemoExpr::join(OpTag::InnerJoin, a, b, vec![])).unwrap();
        let (_, root) = memo.intern(MemoExpr::join(OpTag::InnerJoin, ab, c, vec![])).unwrap();

        let inner_join = Pattern::Op {
            tags: vec![OpTag::InnerJoin],
            fields: vec![
                Pattern::Bind { var: "x".into(), inner: Box::new(Pattern::Any) },
                Pattern::Bind { var: "y".into(), inner: Box::new(Pattern::Any) },
                Pattern::Any,
                Pattern::Any,
            ],
        };
        let inner = Pattern::Bind {
            var: "left".into(),
            inner: Box::new(inner_join),
        };
        let pattern = join_pattern(inner);
        assert_eq!(pattern.depth(), 2);

        let results = Matcher::new(&memo, "T").match_root(&pattern, root).unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.get("left"), Some(&Value::Group(ab)));
        assert_eq!(r.get("x"), Some(&Value::Group(a)));
        assert_eq!(r.get("y"), Some(&Value::Group(b)));
        assert_eq!(r.get("right"), Some(&Value::Group(c)));
        assert_eq!(r.tags.get("left"), Some(&OpTag::InnerJoin));
        assert_eq!(r.path.len(), 2);

        // Reusing a variable across levels requires both to bind the same value.
        let conflicting = join_pattern(Pattern::Bind {
            var: "left".into(),
            inner: Box::new(join_pattern(Pattern::Any)),
        });
        assert!(Matcher::new(&memo, "T").match_root(&conflicting, root).unwrap().is_empty());

        let root_only = Matcher::new(&memo, "T")
            .match_root(&join_pattern(Pattern::Bind { var: "l".into(), inner: Box::new(Pattern::Any) }), root)
            .unwrap();
        assert_eq!(root_only[0].get("right"), Some(&Value::Group(c)));
        assert_eq!(root_only[0].path.len(), 1);
    }

    #[test]
    fn test_existential_yields_binding_per_item() {
        let (mut memo, a, b, _) = memo();
        let ka = memo.metadata().find_column("a", "k").unwrap();
        let kb = memo.metadata().find_column("b", "k").unwrap();
        let on = memo.intern_filters(vec![
            func("st_intersects", vec![col(ka), col(kb)]),
            eq(col(ka), col(kb)),
            func("st_covers", vec![col(ka), col(kb)]),
        ]);
        let (_, e) = memo.intern(MemoExpr::join(OpTag::InnerJoin, a, b, on)).unwrap();

        let item = Pattern::Bind {
            var: "fn".into(),
            inner: Box::new(Pattern::Scalar { kinds: vec![ScalarKind::Function], operands: vec![] }),
        };
        let pattern = Pattern::Op {
            tags: vec![OpTag::InnerJoin],
            fields: vec![
                Pattern::Any,
                Pattern::Any,
                Pattern::List(ListPattern::Existential(Box::new(item))),
                Pattern::Any,
            ],
        };
        let results = Matcher::new(&memo, "T").match_root(&pattern, e).unwrap();
        assert_eq!(results.len(), 2);
        assert_ne!(results[0].fingerprint("T"), results[1].fingerprint("T"));
    }

    #[test]
    fn test_empty_list_and_tag_mismatch() {
        let (mut memo, a, b, _) = memo();
        let (_, e) = memo.intern(MemoExpr::join(OpTag::InnerJoin, a, b, vec![])).unwrap();
        let pattern = Pattern::Op {
            tags: vec![OpTag::InnerJoin],
            fields: vec![Pattern::Any, Pattern::Any, Pattern::List(ListPattern::Empty), Pattern::Any],
        };
        assert_eq!(Matcher::new(&memo, "T").match_root(&pattern, e).unwrap().len(), 1);

        let left = Pattern::Op { tags: vec![OpTag::LeftJoin], fields: vec![Pattern::Any; 4] };
        assert!(Matcher::new(&memo, "T").match_root(&left, e).unwrap().is_empty());
    }
}
