//! # xform-core: Memo-Based Rule Engine
//!
//! This crate implements the engine of a rule-driven relational optimizer: a memo of
//! equivalence groups, a declarative pattern matcher, a rule table compiled once from
//! rule definitions, an exploration scheduler that runs the rules to a fixed point,
//! and a cost-based plan selector.
//!
//! The concrete rules (join commutation and association, physical join generators,
//! normalizations) live in `xform-rules`; this crate only knows how to run them.
//!
//! ## Module Overview
//!
//! - **`memo`**: groups, interned expressions, union-find merging and plan extraction.
//! - **`operator`**: the operator catalog (field layouts) and operator private payloads.
//! - **`expr`**: scalar expressions, column sets and sort keys.
//! - **`metadata`** / **`catalog`**: per-query table metadata and the table catalog.
//! - **`properties`**: logical properties and required physical properties.
//! - **`stats`**: cardinality estimation.
//! - **`pattern`**: match patterns, guards and the matcher.
//! - **`function`**: the registry of custom functions callable from rules.
//! - **`rule`**: rule definitions, the compiled [`rule::RuleTable`] and template evaluation.
//! - **`scheduler`**: normalization and exploration to a fixed point under budgets.
//! - **`search`**: the per-query driver and the plan selector.
//! - **`cost`**: cost model trait and default implementation.
//! - **`error`**: load-time and optimization-time errors.

pub mod catalog;
pub mod cost;
pub mod error;
pub mod expr;
pub mod function;
pub mod memo;
pub mod metadata;
pub mod operator;
pub mod pattern;
pub mod properties;
pub mod rule;
pub mod scheduler;
pub mod search;
pub mod stats;
