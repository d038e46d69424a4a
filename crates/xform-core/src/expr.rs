//! # Scalar Expressions and Column Identity
//!
//! Relational operators in the memo refer to their inputs by group, but everything
//! *inside* an operator (filter conjuncts, projections, join equalities) is a scalar
//! expression over columns. This module defines those building blocks.
//!
//! ## Column Identity
//!
//! Every column that appears in a query gets a session-unique [`ColumnId`] from the
//! query [`crate::metadata::Metadata`]. Two scans of the same table produce two
//! disjoint sets of column ids, which is what lets rules reason about "columns from
//! the left input" versus "columns from the right input" with plain set operations on
//! [`ColSet`].
//!
//! ## Scalar Expressions
//!
//! [`Expr`] is a small recursive tree: column references, literals, comparisons and
//! arithmetic, unary operators, named function calls, and flattened AND/OR lists.
//! Filter lists in the memo hold one interned [`Expr`] per conjunct, so "merging" two
//! filter lists is list concatenation over ids rather than tree surgery.
//!
//! ## Scalar Kinds
//!
//! Rule patterns that look inside filter items match on a [`ScalarKind`]
//! discriminant (e.g. "any `Function` item") rather than on the full expression.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Session-unique column identifier, allocated by the query metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Ordered set of column ids.
///
/// Ordered so that iteration, hashing and display are deterministic, which keeps
/// memo fingerprints and chosen plans reproducible across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColSet(BTreeSet<ColumnId>);

impl ColSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, col: ColumnId) {
        self.0.insert(col);
    }

    pub fn contains(&self, col: ColumnId) -> bool {
        self.0.contains(&col)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.0.iter().copied()
    }

    pub fn union(&self, other: &ColSet) -> ColSet {
        ColSet(self.0.union(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &ColSet) -> ColSet {
        ColSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &ColSet) -> ColSet {
        ColSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn is_subset(&self, other: &ColSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn intersects(&self, other: &ColSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }
}

impl FromIterator<ColumnId> for ColSet {
    fn from_iter<I: IntoIterator<Item = ColumnId>>(iter: I) -> Self {
        ColSet(iter.into_iter().collect())
    }
}

impl fmt::Display for ColSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", c.0)?;
        }
        write!(f, ")")
    }
}

/// Scalar value for expressions.
///
/// Uses `OrderedFloat` for `f64` so that literals can take part in `Eq`/`Hash`,
/// which the scalar interner depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{}", v.0),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Date(v) => write!(f, "DATE {v}"),
        }
    }
}

/// Scalar expressions: filter conjuncts, join conditions, function calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnId),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Named function call (e.g. `st_intersects(a.geom, b.geom)`).
    Function { name: String, args: Vec<Expr> },
    /// Conjunction, stored flat.
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// Discriminant of an [`Expr`], used by scalar patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Column,
    Literal,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Arithmetic,
    Not,
    Unary,
    Function,
    And,
    Or,
}

pub fn col(id: ColumnId) -> Expr {
    Expr::Column(id)
}

pub fn lit(value: ScalarValue) -> Expr {
    Expr::Literal(value)
}

pub fn int(v: i64) -> Expr {
    Expr::Literal(ScalarValue::Int64(v))
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Eq, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Lt, left, right)
}

pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
    }
}

impl Expr {
    /// All columns referenced by this expression.
    pub fn columns(&self) -> ColSet {
        let mut cols = ColSet::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns(&self, out: &mut ColSet) {
        match self {
            Expr::Column(c) => out.insert(*c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    pub fn kind(&self) -> ScalarKind {
        match self {
            Expr::Column(_) => ScalarKind::Column,
            Expr::Literal(_) => ScalarKind::Literal,
            Expr::BinaryOp { op, .. } => match op {
                BinaryOp::Eq => ScalarKind::Eq,
                BinaryOp::NotEq => ScalarKind::NotEq,
                BinaryOp::Lt => ScalarKind::Lt,
                BinaryOp::LtEq => ScalarKind::LtEq,
                BinaryOp::Gt => ScalarKind::Gt,
                BinaryOp::GtEq => ScalarKind::GtEq,
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                    ScalarKind::Arithmetic
                }
            },
            Expr::UnaryOp { op: UnaryOp::Not, .. } => ScalarKind::Not,
            Expr::UnaryOp { .. } => ScalarKind::Unary,
            Expr::Function { .. } => ScalarKind::Function,
            Expr::And(_) => ScalarKind::And,
            Expr::Or(_) => ScalarKind::Or,
        }
    }

    /// Direct sub-expressions, in order.
    pub fn operands(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::Literal(_) => vec![],
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::UnaryOp { operand, .. } => vec![operand.as_ref()],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().collect(),
        }
    }

    /// `col = col`, returned as the pair of column ids.
    pub fn as_column_equality(&self) -> Option<(ColumnId, ColumnId)> {
        match self {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Column(l), Expr::Column(r)) => Some((*l, *r)),
                _ => None,
            },
            _ => None,
        }
    }

    /// `col = literal` (either side), returned as the constrained column.
    pub fn as_constant_equality(&self) -> Option<(ColumnId, &ScalarValue)> {
        match self {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Column(c), Expr::Literal(v)) | (Expr::Literal(v), Expr::Column(c)) => {
                    Some((*c, v))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "({e})")?;
                }
                Ok(())
            }
        }
    }
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// SQL join types carried by physical join payloads.
///
/// Logical joins encode their type in the operator tag itself; lookup, merge and
/// inverted joins are a single tag each and carry the type in their private.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

impl JoinType {
    /// Whether columns of the right input reach the join output.
    pub fn outputs_right(&self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }
}

/// One column of a required or provided ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub col: ColumnId,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(col: ColumnId) -> Self {
        Self {
            col,
            ascending: true,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.ascending { "+" } else { "-" }, self.col.0)
    }
}

/// Spatial functions that an inverted (geospatial) index can accelerate.
pub const GEO_INDEX_FUNCTIONS: &[&str] = &[
    "st_covers",
    "st_coveredby",
    "st_contains",
    "st_containsproperly",
    "st_crosses",
    "st_dwithin",
    "st_equals",
    "st_intersects",
    "st_overlaps",
    "st_touches",
    "st_within",
];

pub fn is_geo_index_function(name: &str) -> bool {
    GEO_INDEX_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_and_conjuncts() {
        let e = Expr::And(vec![
            eq(col(ColumnId(1)), col(ColumnId(4))),
            Expr::And(vec![lt(col(ColumnId(2)), int(10))]),
        ]);
        let cols: Vec<_> = e.columns().iter().collect();
        assert_eq!(cols, vec![ColumnId(1), ColumnId(2), ColumnId(4)]);
        assert_eq!(e.conjuncts().len(), 2);
    }

    #[test]
    fn test_equality_shapes() {
        let cc = eq(col(ColumnId(1)), col(ColumnId(2)));
        assert_eq!(cc.as_column_equality(), Some((ColumnId(1), ColumnId(2))));
        assert!(cc.as_constant_equality().is_none());

        let cv = eq(int(3), col(ColumnId(7)));
        assert_eq!(cv.as_constant_equality().map(|(c, _)| c), Some(ColumnId(7)));
        assert_eq!(lt(col(ColumnId(1)), col(ColumnId(2))).kind(), ScalarKind::Lt);
    }

    #[test]
    fn test_colset_ops() {
        let a: ColSet = [ColumnId(1), ColumnId(2)].into_iter().collect();
        let b: ColSet = [ColumnId(2), ColumnId(3)].into_iter().collect();
        assert_eq!(a.intersection(&b).len(), 1);
        assert_eq!(a.union(&b).len(), 3);
        assert!(a.intersects(&b));
        assert!(!a.is_subset(&b));
        assert_eq!(a.to_string(), "(1,2)");
    }

    #[test]
    fn test_geo_function_names() {
        assert!(is_geo_index_function("ST_Intersects"));
        assert!(!is_geo_index_function("st_area"));
    }
}
