//! # Rule System
//!
//! Rewrite rules are declarative: a rule is a *pattern* over memo expressions, an
//! optional list of *guards*, and a *replacement template*. Rules are authored as plain
//! data ([`RuleDef`], usually via the [`dsl`] helpers) and compiled into a
//! [`RuleTable`] against an operator catalog and a function registry.
//!
//! ## Phases
//!
//! - **Normalize** rules rewrite an expression into its canonical form. The rewritten
//!   expression *replaces* the matched one in its group.
//! - **Explore** rules produce equivalent alternatives. Results are *added* to the
//!   matched expression's group, and the original stays.
//!
//! ## Assembly
//!
//! [`RuleTable::assemble`] resolves operator and function names, checks field counts
//! against each operator's child schema, checks argument counts against the registered
//! arity, and checks that every variable is bound before it is used. Any failure is a
//! [`RuleLoadError`] naming the rule, and no table is produced. An assembled table is
//! immutable and may be shared by concurrent optimizations.
//!
//! ## Templates
//!
//! A template is evaluated against one binding set. Evaluation is pure: nested
//! constructors become [`RuleChild::New`] nodes, which the scheduler interns bottom-up
//! when it applies the result. A template may also be a variable bound to a group
//! (the matched expression is equivalent to that group) or a call to a generator
//! function returning any number of alternatives.
//!
//! ## Rule Deduplication
//!
//! Each successful binding has a fingerprint (see [`crate::pattern::Bindings`]). The
//! scheduler records fingerprints per group so a rule fires at most once per distinct
//! binding, which is what keeps commutativity from swapping back and forth forever.

use crate::error::{OptError, OptResult, RuleLoadError};
use crate::expr::ScalarKind;
use crate::function::{CustomFn, FnContext, FunctionRegistry, Value};
use crate::memo::{ExprId, GroupId, Memo, ScalarId};
use crate::operator::{ChildKind, OpTag, OperatorCatalog, Private};
use crate::pattern::{Bindings, Guard, ListPattern, Matcher, Pattern};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// When a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Normalize,
    Explore,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Normalize => write!(f, "normalize"),
            Phase::Explore => write!(f, "explore"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule definitions (uncompiled)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum PatternDef {
    /// `names` is one or more operator names.
    Op { names: Vec<String>, fields: Vec<PatternDef> },
    Any,
    Bind { var: String, inner: Box<PatternDef> },
    Guarded { inner: Box<PatternDef>, guard: GuardDef },
    EmptyList,
    Existential(Box<PatternDef>),
    ExactList(Vec<PatternDef>),
    Scalar { kinds: Vec<ScalarKind>, operands: Vec<PatternDef> },
}

#[derive(Debug, Clone)]
pub enum GuardDef {
    Expr(TemplateDef),
    Not(Box<GuardDef>),
    And(Vec<GuardDef>),
}

#[derive(Debug, Clone)]
pub enum OpRefDef {
    Named(String),
    /// The operator matched by the root (`None`) or by the pattern bound to a variable.
    Matched(Option<String>),
}

#[derive(Debug, Clone)]
pub enum TemplateDef {
    Var(String),
    Call { func: String, args: Vec<TemplateDef> },
    Construct { op: OpRefDef, fields: Vec<TemplateDef> },
    Bind { var: String, inner: Box<TemplateDef> },
    EmptyFilters,
    OpName(Option<String>),
}

#[derive(Debug, Clone)]
pub struct RuleDef {
    pub name: String,
    pub phase: Phase,
    pub pattern: PatternDef,
    pub guards: Vec<GuardDef>,
    pub template: TemplateDef,
}

impl RuleDef {
    pub fn normalize(name: &str, pattern: PatternDef, template: TemplateDef) -> Self {
        Self {
            name: name.to_string(),
            phase: Phase::Normalize,
            pattern,
            guards: Vec::new(),
            template,
        }
    }

    pub fn explore(name: &str, pattern: PatternDef, template: TemplateDef) -> Self {
        Self {
            phase: Phase::Explore,
            ..Self::normalize(name, pattern, template)
        }
    }

    pub fn with_guard(mut self, guard: GuardDef) -> Self {
        self.guards.push(guard);
        self
    }
}

/// Terse constructors for rule definitions.
///
/// ```text
/// (InnerJoin $left:* $right:* $on:* $private:*) => ((OpName) $right $left $on $private)
/// ```
///
/// is written as
///
/// ```text
/// op("InnerJoin", vec![cap("left"), cap("right"), cap("on"), cap("private")])
/// matched_op(None, vec![var("right"), var("left"), var("on"), var("private")])
/// ```
pub mod dsl {
    use super::*;

    /// An operator pattern. `names` may list alternatives separated by `|`.
    pub fn op(names: &str, fields: Vec<PatternDef>) -> PatternDef {
        PatternDef::Op {
            names: names.split('|').map(|n| n.trim().to_string()).collect(),
            fields,
        }
    }

    pub fn any() -> PatternDef {
        PatternDef::Any
    }

    pub fn bind(var: &str, inner: PatternDef) -> PatternDef {
        PatternDef::Bind {
            var: var.to_string(),
            inner: Box::new(inner),
        }
    }

    /// `$var:*`
    pub fn cap(var: &str) -> PatternDef {
        bind(var, any())
    }

    pub fn guarded(inner: PatternDef, guard: GuardDef) -> PatternDef {
        PatternDef::Guarded {
            inner: Box::new(inner),
            guard,
        }
    }

    pub fn guard(expr: TemplateDef) -> GuardDef {
        GuardDef::Expr(expr)
    }

    pub fn not(inner: GuardDef) -> GuardDef {
        GuardDef::Not(Box::new(inner))
    }

    pub fn all(guards: Vec<GuardDef>) -> GuardDef {
        GuardDef::And(guards)
    }

    pub fn empty_list() -> PatternDef {
        PatternDef::EmptyList
    }

    pub fn existential(item: PatternDef) -> PatternDef {
        PatternDef::Existential(Box::new(item))
    }

    pub fn exact_list(items: Vec<PatternDef>) -> PatternDef {
        PatternDef::ExactList(items)
    }

    pub fn scalar(kinds: &[ScalarKind], operands: Vec<PatternDef>) -> PatternDef {
        PatternDef::Scalar {
            kinds: kinds.to_vec(),
            operands,
        }
    }

    pub fn var(name: &str) -> TemplateDef {
        TemplateDef::Var(name.to_string())
    }

    pub fn call(func: &str, args: Vec<TemplateDef>) -> TemplateDef {
        TemplateDef::Call {
            func: func.to_string(),
            args,
        }
    }

    pub fn construct(op: &str, fields: Vec<TemplateDef>) -> TemplateDef {
        TemplateDef::Construct {
            op: OpRefDef::Named(op.to_string()),
            fields,
        }
    }

    /// Rebuild the operator matched at the root (`None`) or bound to `var`.
    pub fn matched_op(var: Option<&str>, fields: Vec<TemplateDef>) -> TemplateDef {
        TemplateDef::Construct {
            op: OpRefDef::Matched(var.map(str::to_string)),
            fields,
        }
    }

    pub fn let_bind(var: &str, inner: TemplateDef) -> TemplateDef {
        TemplateDef::Bind {
            var: var.to_string(),
            inner: Box::new(inner),
        }
    }

    pub fn empty_filters() -> TemplateDef {
        TemplateDef::EmptyFilters
    }

    pub fn op_name(var: Option<&str>) -> TemplateDef {
        TemplateDef::OpName(var.map(str::to_string))
    }
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum OpRef {
    Fixed(OpTag),
    Matched(Option<String>),
}

/// Compiled replacement template.
#[derive(Debug, Clone)]
pub enum Template {
    Var(String),
    Call { func: Arc<CustomFn>, args: Vec<Template> },
    Construct { op: OpRef, fields: Vec<Template> },
    Bind { var: String, inner: Box<Template> },
    EmptyFilters,
    OpName(Option<String>),
}

/// An expression produced by a template, not yet interned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewExpr {
    pub tag: OpTag,
    pub children: Vec<RuleChild>,
    pub filters: Vec<ScalarId>,
    pub private: Option<Private>,
}

impl NewExpr {
    pub fn new(tag: OpTag, children: Vec<RuleChild>, filters: Vec<ScalarId>, private: Option<Private>) -> Self {
        Self {
            tag,
            children,
            filters,
            private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleChild {
    Group(GroupId),
    New(NewExpr),
}

/// One replacement produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleResult {
    /// A new expression equivalent to the matched one.
    Expr(NewExpr),
    /// The matched expression is equivalent to an existing group.
    Group(GroupId),
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub phase: Phase,
    pub pattern: Pattern,
    pub guards: Vec<Guard>,
    pub template: Template,
    pub root_tags: Vec<OpTag>,
    /// Nesting depth of the pattern's operator matches.
    pub depth: usize,
}

impl Rule {
    pub fn matches_tag(&self, tag: OpTag) -> bool {
        self.root_tags.contains(&tag)
    }

    /// All binding sets for which the pattern and every guard hold.
    pub fn bindings(&self, memo: &Memo, expr: ExprId) -> OptResult<Vec<Bindings>> {
        if !self.matches_tag(memo.expr(expr).tag) {
            return Ok(vec![]);
        }
        let candidates = Matcher::new(memo, &self.name).match_root(&self.pattern, expr)?;
        let mut out = Vec::with_capacity(candidates.len());
        'next: for b in candidates {
            for g in &self.guards {
                if !g.eval(memo, &self.name, &b)? {
                    continue 'next;
                }
            }
            out.push(b);
        }
        Ok(out)
    }

    /// Evaluate the replacement template for one binding set.
    pub fn results(&self, memo: &Memo, bindings: &Bindings) -> OptResult<Vec<RuleResult>> {
        let eval = Evaluator {
            memo,
            rule: &self.name,
            bindings,
        };
        eval.results(&self.template)
            .map_err(|e| e.with_rule(&self.name))
    }
}

/// An immutable, validated set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
    by_name: HashMap<String, usize>,
}

impl RuleTable {
    /// A table with no rules. Optimizing with it costs the input plan as written.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile rule definitions. Rules keep their definition order.
    pub fn assemble(
        defs: Vec<RuleDef>,
        functions: &FunctionRegistry,
        operators: &dyn OperatorCatalog,
    ) -> Result<Self, RuleLoadError> {
        let mut table = RuleTable::default();
        for def in defs {
            if table.by_name.contains_key(&def.name) {
                return Err(RuleLoadError::DuplicateRule(def.name));
            }
            let rule = Compiler::new(&def.name, functions, operators).compile(&def)?;
            table.by_name.insert(def.name.clone(), table.rules.len());
            table.rules.push(rule);
        }
        Ok(table)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, index: usize) -> &Rule {
        &self.rules[index]
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.by_name.get(name).map(|i| &self.rules[*i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Indexes of the rules in a phase, in definition order.
    pub fn phase_rules(&self, phase: Phase) -> Vec<usize> {
        (0..self.rules.len())
            .filter(|i| self.rules[*i].phase == phase)
            .collect()
    }

    /// Deepest explore pattern.
    pub fn max_explore_depth(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| r.phase == Phase::Explore)
            .map(|r| r.depth)
            .max()
            .unwrap_or(1)
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Root,
    Field(ChildKind),
    Item,
    Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateSlot {
    Root,
    Field(ChildKind),
    Value,
}

struct Compiler<'a> {
    rule: &'a str,
    functions: &'a FunctionRegistry,
    operators: &'a dyn OperatorCatalog,
    bound: HashSet<String>,
    /// Variables bound to operator patterns, with the tags they can match.
    op_vars: HashMap<String, Vec<OpTag>>,
    root_tags: Vec<OpTag>,
    in_guard: bool,
}

impl<'a> Compiler<'a> {
    fn new(rule: &'a str, functions: &'a FunctionRegistry, operators: &'a dyn OperatorCatalog) -> Self {
        Self {
            rule,
            functions,
            operators,
            bound: HashSet::new(),
            op_vars: HashMap::new(),
            root_tags: Vec::new(),
            in_guard: false,
        }
    }

    fn invalid(&self, detail: impl Into<String>) -> RuleLoadError {
        RuleLoadError::InvalidRule {
            rule: self.rule.to_string(),
            detail: detail.into(),
        }
    }

    fn compile(mut self, def: &RuleDef) -> Result<Rule, RuleLoadError> {
        let pattern = self.pattern(&def.pattern, Slot::Root)?;
        let root_tags = pattern
            .root_tags()
            .map(<[OpTag]>::to_vec)
            .ok_or_else(|| self.invalid("pattern root must be an operator"))?;
        let guards = def
            .guards
            .iter()
            .map(|g| self.guard(g))
            .collect::<Result<Vec<_>, _>>()?;
        let template = self.template(&def.template, TemplateSlot::Root)?;
        Ok(Rule {
            name: def.name.clone(),
            phase: def.phase,
            depth: pattern.depth(),
            pattern,
            guards,
            template,
            root_tags,
        })
    }

    fn resolve(&self, name: &str) -> Result<OpTag, RuleLoadError> {
        self.operators
            .lookup(name)
            .ok_or_else(|| RuleLoadError::UnknownOperator {
                rule: self.rule.to_string(),
                name: name.to_string(),
            })
    }

    /// Shared child schema of a set of tags.
    fn schema(&self, tags: &[OpTag]) -> Result<&'static [ChildKind], RuleLoadError> {
        let first = tags
            .first()
            .ok_or_else(|| self.invalid("operator pattern names no operator"))?;
        let schema = self.operators.child_schema(*first);
        if tags.iter().any(|t| self.operators.child_schema(*t) != schema) {
            return Err(self.invalid(format!(
                "operators {:?} do not share a field layout",
                tags.iter().map(OpTag::name).collect::<Vec<_>>()
            )));
        }
        Ok(schema)
    }

    fn pattern(&mut self, def: &PatternDef, slot: Slot) -> Result<Pattern, RuleLoadError> {
        match def {
            PatternDef::Any => {
                if slot == Slot::Root {
                    return Err(self.invalid("pattern root must be an operator"));
                }
                Ok(Pattern::Any)
            }
            PatternDef::Bind { var, inner } => {
                let inner = self.pattern(inner, slot)?;
                if let Some(tags) = inner.root_tags() {
                    self.op_vars.insert(var.clone(), tags.to_vec());
                }
                self.bound.insert(var.clone());
                Ok(Pattern::Bind {
                    var: var.clone(),
                    inner: Box::new(inner),
                })
            }
            PatternDef::Guarded { inner, guard } => {
                let inner = self.pattern(inner, slot)?;
                let guard = self.guard(guard)?;
                Ok(Pattern::Guarded {
                    inner: Box::new(inner),
                    guard,
                })
            }
            PatternDef::Op { names, fields } => {
                if !matches!(slot, Slot::Root | Slot::Field(ChildKind::Relational)) {
                    return Err(self.invalid(format!("operator pattern {} in a non-relational field", names.join("|"))));
                }
                let tags = names
                    .iter()
                    .map(|n| self.resolve(n))
                    .collect::<Result<Vec<_>, _>>()?;
                let schema = self.schema(&tags)?;
                if schema.len() != fields.len() {
                    return Err(RuleLoadError::ArityMismatch {
                        rule: self.rule.to_string(),
                        name: names.join("|"),
                        expected: schema.len(),
                        found: fields.len(),
                    });
                }
                if slot == Slot::Root {
                    self.root_tags = tags.clone();
                }
                let fields = schema
                    .iter()
                    .zip(fields)
                    .map(|(kind, f)| self.pattern(f, Slot::Field(*kind)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Pattern::Op { tags, fields })
            }
            PatternDef::EmptyList | PatternDef::Existential(_) | PatternDef::ExactList(_) => {
                if slot != Slot::Field(ChildKind::Filters) {
                    return Err(self.invalid("list pattern outside a filters field"));
                }
                let list = match def {
                    PatternDef::Existential(item) => ListPattern::Existential(Box::new(self.pattern(item, Slot::Item)?)),
                    PatternDef::ExactList(items) => ListPattern::Exact(
                        items
                            .iter()
                            .map(|i| self.pattern(i, Slot::Item))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    _ => ListPattern::Empty,
                };
                Ok(Pattern::List(list))
            }
            PatternDef::Scalar { kinds, operands } => {
                if !matches!(slot, Slot::Item | Slot::Operand) {
                    return Err(self.invalid("scalar pattern outside a list item"));
                }
                let operands = operands
                    .iter()
                    .map(|o| self.pattern(o, Slot::Operand))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Pattern::Scalar {
                    kinds: kinds.clone(),
                    operands,
                })
            }
        }
    }

    fn guard(&mut self, def: &GuardDef) -> Result<Guard, RuleLoadError> {
        let was = std::mem::replace(&mut self.in_guard, true);
        let guard = match def {
            GuardDef::Expr(t) => self.template(t, TemplateSlot::Value).map(Guard::Expr),
            GuardDef::Not(inner) => self.guard(inner).map(|g| Guard::Not(Box::new(g))),
            GuardDef::And(guards) => guards
                .iter()
                .map(|g| self.guard(g))
                .collect::<Result<Vec<_>, _>>()
                .map(Guard::And),
        };
        self.in_guard = was;
        guard
    }

    fn op_var_tags(&self, var: &Option<String>) -> Result<Vec<OpTag>, RuleLoadError> {
        match var {
            None => Ok(self.root_tags.clone()),
            Some(v) => self.op_vars.get(v).cloned().ok_or_else(|| {
                if self.bound.contains(v) {
                    self.invalid(format!("${v} is not bound to an operator"))
                } else {
                    RuleLoadError::UnboundVariable {
                        rule: self.rule.to_string(),
                        var: v.clone(),
                    }
                }
            }),
        }
    }

    fn template(&mut self, def: &TemplateDef, slot: TemplateSlot) -> Result<Template, RuleLoadError> {
        match def {
            TemplateDef::Var(v) => {
                if !self.bound.contains(v) {
                    return Err(RuleLoadError::UnboundVariable {
                        rule: self.rule.to_string(),
                        var: v.clone(),
                    });
                }
                Ok(Template::Var(v.clone()))
            }
            TemplateDef::Call { func, args } => {
                let f = self
                    .functions
                    .get(func)
                    .ok_or_else(|| RuleLoadError::UnknownFunction {
                        rule: self.rule.to_string(),
                        name: func.clone(),
                    })?;
                if f.arity != args.len() {
                    return Err(RuleLoadError::ArityMismatch {
                        rule: self.rule.to_string(),
                        name: func.clone(),
                        expected: f.arity,
                        found: args.len(),
                    });
                }
                let args = args
                    .iter()
                    .map(|a| self.template(a, TemplateSlot::Value))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Template::Call { func: f, args })
            }
            TemplateDef::Construct { op, fields } => {
                if self.in_guard {
                    return Err(self.invalid("guards cannot construct expressions"));
                }
                if !matches!(slot, TemplateSlot::Root | TemplateSlot::Field(ChildKind::Relational)) {
                    return Err(self.invalid("constructor outside a relational field"));
                }
                let (op, tags) = match op {
                    OpRefDef::Named(name) => {
                        let tag = self.resolve(name)?;
                        (OpRef::Fixed(tag), vec![tag])
                    }
                    OpRefDef::Matched(var) => (OpRef::Matched(var.clone()), self.op_var_tags(var)?),
                };
                let schema = self.schema(&tags)?;
                if schema.len() != fields.len() {
                    return Err(RuleLoadError::ArityMismatch {
                        rule: self.rule.to_string(),
                        name: tags.iter().map(OpTag::name).collect::<Vec<_>>().join("|"),
                        expected: schema.len(),
                        found: fields.len(),
                    });
                }
                let fields = schema
                    .iter()
                    .zip(fields)
                    .map(|(kind, f)| self.template(f, TemplateSlot::Field(*kind)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Template::Construct { op, fields })
            }
            TemplateDef::Bind { var, inner } => {
                if matches!(inner.as_ref(), TemplateDef::Construct { .. }) {
                    return Err(self.invalid(format!("${var} cannot bind a constructor")));
                }
                let inner = self.template(inner, slot)?;
                self.bound.insert(var.clone());
                Ok(Template::Bind {
                    var: var.clone(),
                    inner: Box::new(inner),
                })
            }
            TemplateDef::EmptyFilters => {
                if slot == TemplateSlot::Root {
                    return Err(self.invalid("replacement must produce an expression"));
                }
                Ok(Template::EmptyFilters)
            }
            TemplateDef::OpName(var) => {
                if slot == TemplateSlot::Root {
                    return Err(self.invalid("replacement must produce an expression"));
                }
                self.op_var_tags(var)?;
                Ok(Template::OpName(var.clone()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a value-producing template (guards, function arguments).
pub fn eval_value(memo: &Memo, rule: &str, template: &Template, bindings: &Bindings) -> OptResult<Value> {
    let eval = Evaluator {
        memo,
        rule,
        bindings,
    };
    eval.value(template, &mut BTreeMap::new())
        .map_err(|e| e.with_rule(rule))
}

struct Evaluator<'a> {
    memo: &'a Memo,
    rule: &'a str,
    bindings: &'a Bindings,
}

impl Evaluator<'_> {
    fn lookup(&self, var: &str, local: &BTreeMap<String, Value>) -> OptResult<Value> {
        local
            .get(var)
            .or_else(|| self.bindings.get(var))
            .cloned()
            .ok_or_else(|| OptError::internal(format!("${var} is not bound")))
    }

    fn tag_of(&self, var: &Option<String>) -> OptResult<OpTag> {
        match var {
            None => self.bindings.root_tag,
            Some(v) => self.bindings.tags.get(v).copied(),
        }
        .ok_or_else(|| OptError::internal("no matched operator to rebuild"))
    }

    fn value(&self, template: &Template, local: &mut BTreeMap<String, Value>) -> OptResult<Value> {
        match template {
            Template::Var(v) => self.lookup(v, local),
            Template::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.value(a, local)?);
                }
                let ctx = FnContext {
                    memo: self.memo,
                    rule: self.rule,
                };
                func.call(&ctx, &values)
            }
            Template::Construct { .. } => Err(OptError::internal("constructor used as a value")),
            Template::Bind { var, inner } => {
                let v = self.value(inner, local)?;
                local.insert(var.clone(), v.clone());
                Ok(v)
            }
            Template::EmptyFilters => Ok(Value::Filters(Vec::new())),
            Template::OpName(var) => Ok(Value::Tag(self.tag_of(var)?)),
        }
    }

    fn construct(&self, op: &OpRef, fields: &[Template], local: &mut BTreeMap<String, Value>) -> OptResult<NewExpr> {
        let tag = match op {
            OpRef::Fixed(t) => *t,
            OpRef::Matched(var) => self.tag_of(var)?,
        };
        let schema = self.memo.operators().child_schema(tag);
        if schema.len() != fields.len() {
            return Err(OptError::internal(format!("{tag} built with {} fields", fields.len())));
        }
        let mut out = NewExpr::new(tag, Vec::new(), Vec::new(), None);
        for (kind, field) in schema.iter().zip(fields) {
            match kind {
                ChildKind::Relational => {
                    let child = match field {
                        Template::Construct { op, fields } => RuleChild::New(self.construct(op, fields, local)?),
                        other => RuleChild::Group(self.value(other, local)?.as_group()?),
                    };
                    out.children.push(child);
                }
                ChildKind::Filters => {
                    out.filters = self.value(field, local)?.as_filters()?.to_vec();
                }
                ChildKind::Private(expected) => {
                    let value = self.value(field, local)?;
                    let private = value.as_private()?;
                    if private.kind() != *expected {
                        return Err(OptError::internal(format!(
                            "{tag} built with a {:?} private",
                            private.kind()
                        )));
                    }
                    out.private = Some(private.clone());
                }
            }
        }
        Ok(out)
    }

    fn results(&self, template: &Template) -> OptResult<Vec<RuleResult>> {
        let mut local = BTreeMap::new();
        match template {
            Template::Construct { op, fields } => Ok(vec![RuleResult::Expr(self.construct(op, fields, &mut local)?)]),
            other => match self.value(other, &mut local)? {
                Value::Group(g) => Ok(vec![RuleResult::Group(g)]),
                Value::Alternatives(results) => Ok(results),
                v => Err(OptError::internal(format!("replacement produced a {}", v.kind_name()))),
            },
        }
    }
}
