//! # Custom Functions
//!
//! Rule guards and replacement templates call out to named, host-provided functions:
//! predicates such as `IsSimpleEquality`, helpers such as `OutputCols` and
//! `ConcatFilters`, and generators that enumerate physical alternatives. Functions are
//! registered once in a [`FunctionRegistry`] and resolved while the rule table is
//! assembled, so a rule naming an unknown function never reaches optimization.
//!
//! Functions receive read-only access to the memo through [`FnContext`] and exchange
//! [`Value`]s. They must not rely on hidden mutable state.

use crate::error::{OptError, OptResult, RuleLoadError};
use crate::expr::{ColSet, Expr};
use crate::memo::{GroupId, Memo, ScalarId};
use crate::operator::{OpTag, Private};
use crate::rule::RuleResult;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A value flowing through patterns, guards and templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Group(GroupId),
    Filters(Vec<ScalarId>),
    /// One interned filter item.
    Scalar(ScalarId),
    /// A scalar sub-expression bound inside a filter item.
    ScalarExpr(Expr),
    Private(Private),
    Cols(ColSet),
    Bool(bool),
    Tag(OpTag),
    /// Zero or more replacement expressions produced by a generator.
    Alternatives(Vec<RuleResult>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Group(_) => "group",
            Value::Filters(_) => "filters",
            Value::Scalar(_) => "scalar",
            Value::ScalarExpr(_) => "scalar expression",
            Value::Private(_) => "private",
            Value::Cols(_) => "column set",
            Value::Bool(_) => "bool",
            Value::Tag(_) => "operator",
            Value::Alternatives(_) => "alternatives",
        }
    }

    fn mismatch(&self, expected: &str) -> OptError {
        OptError::internal(format!("expected {expected}, found {}", self.kind_name()))
    }

    pub fn as_group(&self) -> OptResult<GroupId> {
        match self {
            Value::Group(g) => Ok(*g),
            other => Err(other.mismatch("group")),
        }
    }

    pub fn as_filters(&self) -> OptResult<&[ScalarId]> {
        match self {
            Value::Filters(f) => Ok(f),
            other => Err(other.mismatch("filters")),
        }
    }

    pub fn as_scalar(&self) -> OptResult<ScalarId> {
        match self {
            Value::Scalar(s) => Ok(*s),
            other => Err(other.mismatch("scalar")),
        }
    }

    pub fn as_private(&self) -> OptResult<&Private> {
        match self {
            Value::Private(p) => Ok(p),
            other => Err(other.mismatch("private")),
        }
    }

    pub fn as_cols(&self) -> OptResult<&ColSet> {
        match self {
            Value::Cols(c) => Ok(c),
            other => Err(other.mismatch("column set")),
        }
    }

    pub fn as_bool(&self) -> OptResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_tag(&self) -> OptResult<OpTag> {
        match self {
            Value::Tag(t) => Ok(*t),
            other => Err(other.mismatch("operator")),
        }
    }
}

/// Read-only context handed to custom functions.
pub struct FnContext<'a> {
    pub memo: &'a Memo,
    /// Name of the rule being evaluated.
    pub rule: &'a str,
}

impl FnContext<'_> {
    /// The interned conjunct behind a scalar id.
    pub fn scalar(&self, id: ScalarId) -> &Expr {
        self.memo.scalar(id)
    }
}

type FnImpl = dyn Fn(&FnContext<'_>, &[Value]) -> OptResult<Value> + Send + Sync;

/// A registered custom function.
pub struct CustomFn {
    pub name: String,
    pub arity: usize,
    f: Box<FnImpl>,
}

impl CustomFn {
    pub fn call(&self, ctx: &FnContext<'_>, args: &[Value]) -> OptResult<Value> {
        if args.len() != self.arity {
            return Err(OptError::internal(format!(
                "{} called with {} argument(s), expects {}",
                self.name,
                args.len(),
                self.arity
            ))
            .with_rule(ctx.rule));
        }
        (self.f)(ctx, args).map_err(|e| e.with_rule(ctx.rule))
    }
}

impl fmt::Debug for CustomFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Name-keyed set of custom functions available to rules.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<CustomFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, arity: usize, f: F) -> Result<(), RuleLoadError>
    where
        F: Fn(&FnContext<'_>, &[Value]) -> OptResult<Value> + Send + Sync + 'static,
    {
        if self.functions.contains_key(name) {
            return Err(RuleLoadError::DuplicateFunction(name.to_string()));
        }
        self.functions.insert(
            name.to_string(),
            Arc::new(CustomFn {
                name: name.to_string(),
                arity,
                f: Box::new(f),
            }),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CustomFn>> {
        self.functions.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_call() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("Not", 1, |_, args| Ok(Value::Bool(!args[0].as_bool()?)))
            .unwrap();
        assert_eq!(
            registry.register("Not", 1, |_, _| Ok(Value::Bool(true))),
            Err(RuleLoadError::DuplicateFunction("Not".into()))
        );

        let memo = Memo::new();
        let ctx = FnContext {
            memo: &memo,
            rule: "R",
        };
        let f = registry.get("Not").unwrap();
        assert_eq!(f.call(&ctx, &[Value::Bool(true)]).unwrap(), Value::Bool(false));

        let err = f.call(&ctx, &[Value::Group(1)]).unwrap_err();
        assert!(err.to_string().contains("rule R"));
    }
}
