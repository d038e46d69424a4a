//! # Operator Catalog
//!
//! The set of relational operators is closed: every expression in the memo carries an
//! [`OpTag`], and every tag declares a fixed *child schema*, an ordered list of field
//! kinds. A field is one of:
//!
//! - **Relational**: a reference to an input group.
//! - **Filters**: an ordered list of interned scalar conjuncts.
//! - **Private**: the operator's immutable payload (table and index ids, join hints,
//!   ordering requirements, lookup key columns...), one [`PrivateKind`] per tag.
//!
//! The rule compiler, the pattern matcher and the template constructor never hard-code
//! a per-operator layout; they ask an [`OperatorCatalog`] for the schema. Rule text
//! refers to operators by name (`"InnerJoin"`), which the catalog resolves at rule
//! table assembly time.
//!
//! ## Tags
//!
//! | tag          | fields                                   |
//! |--------------|------------------------------------------|
//! | Scan         | private                                  |
//! | Select       | input, filters                           |
//! | Project      | input, private                           |
//! | *Join        | left, right, on, private                 |
//! | DistinctOn   | input, private                           |
//! | IndexJoin    | input, private                           |
//! | MergeJoin    | left, right, on, private                 |
//! | LookupJoin   | input, on, private                       |
//! | InvertedJoin | input, on, private                       |
//! | ZigzagJoin   | fixed filters, private                   |

use crate::expr::{ColSet, ColumnId, JoinType, SortKey};
use crate::memo::ScalarId;
use crate::metadata::TableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relational operator tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpTag {
    Scan,
    Select,
    Project,
    InnerJoin,
    LeftJoin,
    RightJoin,
    FullJoin,
    SemiJoin,
    AntiJoin,
    DistinctOn,
    IndexJoin,
    MergeJoin,
    LookupJoin,
    InvertedJoin,
    ZigzagJoin,
}

impl OpTag {
    pub const ALL: [OpTag; 15] = [
        OpTag::Scan,
        OpTag::Select,
        OpTag::Project,
        OpTag::InnerJoin,
        OpTag::LeftJoin,
        OpTag::RightJoin,
        OpTag::FullJoin,
        OpTag::SemiJoin,
        OpTag::AntiJoin,
        OpTag::DistinctOn,
        OpTag::IndexJoin,
        OpTag::MergeJoin,
        OpTag::LookupJoin,
        OpTag::InvertedJoin,
        OpTag::ZigzagJoin,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OpTag::Scan => "Scan",
            OpTag::Select => "Select",
            OpTag::Project => "Project",
            OpTag::InnerJoin => "InnerJoin",
            OpTag::LeftJoin => "LeftJoin",
            OpTag::RightJoin => "RightJoin",
            OpTag::FullJoin => "FullJoin",
            OpTag::SemiJoin => "SemiJoin",
            OpTag::AntiJoin => "AntiJoin",
            OpTag::DistinctOn => "DistinctOn",
            OpTag::IndexJoin => "IndexJoin",
            OpTag::MergeJoin => "MergeJoin",
            OpTag::LookupJoin => "LookupJoin",
            OpTag::InvertedJoin => "InvertedJoin",
            OpTag::ZigzagJoin => "ZigzagJoin",
        }
    }

    /// The join type of a logical join tag.
    pub fn join_type(&self) -> Option<JoinType> {
        match self {
            OpTag::InnerJoin => Some(JoinType::Inner),
            OpTag::LeftJoin => Some(JoinType::Left),
            OpTag::RightJoin => Some(JoinType::Right),
            OpTag::FullJoin => Some(JoinType::Full),
            OpTag::SemiJoin => Some(JoinType::Semi),
            OpTag::AntiJoin => Some(JoinType::Anti),
            _ => None,
        }
    }

    pub fn from_join_type(join_type: JoinType) -> OpTag {
        match join_type {
            JoinType::Inner => OpTag::InnerJoin,
            JoinType::Left => OpTag::LeftJoin,
            JoinType::Right => OpTag::RightJoin,
            JoinType::Full => OpTag::FullJoin,
            JoinType::Semi => OpTag::SemiJoin,
            JoinType::Anti => OpTag::AntiJoin,
        }
    }

    pub fn is_logical_join(&self) -> bool {
        self.join_type().is_some()
    }
}

impl fmt::Display for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of one field in an operator's child schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    Relational,
    Filters,
    Private(PrivateKind),
}

/// Payload schema of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivateKind {
    Scan,
    Project,
    Join,
    Grouping,
    IndexJoin,
    MergeJoin,
    LookupJoin,
    InvertedJoin,
    ZigzagJoin,
}

/// Join hint attached to a logical join by the query author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinHint {
    #[default]
    None,
    Hash,
    Merge,
    Lookup,
}

/// Table access through one index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanPrivate {
    pub table: TableId,
    /// Ordinal into the table's index list; 0 is the primary index.
    pub index: usize,
    pub cols: ColSet,
    /// Index constraint conjuncts already pushed into the scan.
    pub constraint: Vec<ScalarId>,
    pub hard_limit: Option<u64>,
}

impl ScanPrivate {
    pub fn new(table: TableId, cols: ColSet) -> Self {
        Self {
            table,
            index: 0,
            cols,
            constraint: Vec::new(),
            hard_limit: None,
        }
    }

    /// A full primary-index scan that nothing has restricted yet.
    pub fn is_canonical(&self) -> bool {
        self.index == 0 && self.constraint.is_empty() && self.hard_limit.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectPrivate {
    pub cols: ColSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinPrivate {
    pub hint: JoinHint,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingPrivate {
    pub grouping_cols: ColSet,
    pub ordering: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexJoinPrivate {
    pub table: TableId,
    pub cols: ColSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeJoinPrivate {
    pub join_type: JoinType,
    pub left_eq: Vec<ColumnId>,
    pub right_eq: Vec<ColumnId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupJoinPrivate {
    pub join_type: JoinType,
    pub table: TableId,
    pub index: usize,
    /// Input columns equated, in order, with the index key prefix.
    pub key_cols: Vec<ColumnId>,
    /// Table columns produced by the lookup.
    pub lookup_cols: ColSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvertedJoinPrivate {
    pub join_type: JoinType,
    pub table: TableId,
    pub index: usize,
    pub input_col: ColumnId,
    /// The geospatial predicate that drives the index probe.
    pub inverted_expr: ScalarId,
    pub cols: ColSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZigzagJoinPrivate {
    pub table: TableId,
    pub left_index: usize,
    pub right_index: usize,
    pub left_fixed: Vec<ColumnId>,
    pub right_fixed: Vec<ColumnId>,
    /// Columns both indexes carry, on which the two sides are zipped.
    pub eq_cols: Vec<ColumnId>,
    pub cols: ColSet,
}

/// Operator payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Private {
    Scan(ScanPrivate),
    Project(ProjectPrivate),
    Join(JoinPrivate),
    Grouping(GroupingPrivate),
    IndexJoin(IndexJoinPrivate),
    MergeJoin(MergeJoinPrivate),
    LookupJoin(LookupJoinPrivate),
    InvertedJoin(InvertedJoinPrivate),
    ZigzagJoin(ZigzagJoinPrivate),
}

impl Private {
    pub fn kind(&self) -> PrivateKind {
        match self {
            Private::Scan(_) => PrivateKind::Scan,
            Private::Project(_) => PrivateKind::Project,
            Private::Join(_) => PrivateKind::Join,
            Private::Grouping(_) => PrivateKind::Grouping,
            Private::IndexJoin(_) => PrivateKind::IndexJoin,
            Private::MergeJoin(_) => PrivateKind::MergeJoin,
            Private::LookupJoin(_) => PrivateKind::LookupJoin,
            Private::InvertedJoin(_) => PrivateKind::InvertedJoin,
            Private::ZigzagJoin(_) => PrivateKind::ZigzagJoin,
        }
    }

    pub fn as_scan(&self) -> Option<&ScanPrivate> {
        match self {
            Private::Scan(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_join(&self) -> Option<&JoinPrivate> {
        match self {
            Private::Join(p) => Some(p),
            _ => None,
        }
    }
}

/// Operator schema lookup, consumed by the rule compiler, matcher and constructor.
pub trait OperatorCatalog: Send + Sync {
    /// Resolve an operator name used in rule text.
    fn lookup(&self, name: &str) -> Option<OpTag>;

    /// Ordered field kinds of the operator.
    fn child_schema(&self, tag: OpTag) -> &'static [ChildKind];

    /// Payload schema, if the operator carries one.
    fn payload_schema(&self, tag: OpTag) -> Option<PrivateKind> {
        self.child_schema(tag).iter().find_map(|k| match k {
            ChildKind::Private(p) => Some(*p),
            _ => None,
        })
    }
}

/// The built-in relational operator set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationalOperators;

const SCAN: &[ChildKind] = &[ChildKind::Private(PrivateKind::Scan)];
const SELECT: &[ChildKind] = &[ChildKind::Relational, ChildKind::Filters];
const PROJECT: &[ChildKind] = &[ChildKind::Relational, ChildKind::Private(PrivateKind::Project)];
const JOIN: &[ChildKind] = &[
    ChildKind::Relational,
    ChildKind::Relational,
    ChildKind::Filters,
    ChildKind::Private(PrivateKind::Join),
];
const DISTINCT_ON: &[ChildKind] = &[
    ChildKind::Relational,
    ChildKind::Private(PrivateKind::Grouping),
];
const INDEX_JOIN: &[ChildKind] = &[
    ChildKind::Relational,
    ChildKind::Private(PrivateKind::IndexJoin),
];
const MERGE_JOIN: &[ChildKind] = &[
    ChildKind::Relational,
    ChildKind::Relational,
    ChildKind::Filters,
    ChildKind::Private(PrivateKind::MergeJoin),
];
const LOOKUP_JOIN: &[ChildKind] = &[
    ChildKind::Relational,
    ChildKind::Filters,
    ChildKind::Private(PrivateKind::LookupJoin),
];
const INVERTED_JOIN: &[ChildKind] = &[
    ChildKind::Relational,
    ChildKind::Filters,
    ChildKind::Private(PrivateKind::InvertedJoin),
];
const ZIGZAG_JOIN: &[ChildKind] = &[
    ChildKind::Filters,
    ChildKind::Private(PrivateKind::ZigzagJoin),
];

impl OperatorCatalog for RelationalOperators {
    fn lookup(&self, name: &str) -> Option<OpTag> {
        OpTag::ALL.iter().copied().find(|t| t.name() == name)
    }

    fn child_schema(&self, tag: OpTag) -> &'static [ChildKind] {
        match tag {
            OpTag::Scan => SCAN,
            OpTag::Select => SELECT,
            OpTag::Project => PROJECT,
            OpTag::InnerJoin
            | OpTag::LeftJoin
            | OpTag::RightJoin
            | OpTag::FullJoin
            | OpTag::SemiJoin
            | OpTag::AntiJoin => JOIN,
            OpTag::DistinctOn => DISTINCT_ON,
            OpTag::IndexJoin => INDEX_JOIN,
            OpTag::MergeJoin => MERGE_JOIN,
            OpTag::LookupJoin => LOOKUP_JOIN,
            OpTag::InvertedJoin => INVERTED_JOIN,
            OpTag::ZigzagJoin => ZIGZAG_JOIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_round_trips_names() {
        let ops = RelationalOperators;
        for tag in OpTag::ALL {
            assert_eq!(ops.lookup(tag.name()), Some(tag));
        }
        assert_eq!(ops.lookup("HashJoin"), None);
    }

    #[test]
    fn test_join_schema() {
        let ops = RelationalOperators;
        let schema = ops.child_schema(OpTag::FullJoin);
        assert_eq!(schema.len(), 4);
        assert_eq!(ops.payload_schema(OpTag::FullJoin), Some(PrivateKind::Join));
        assert_eq!(ops.payload_schema(OpTag::Select), None);
        assert_eq!(
            ops.child_schema(OpTag::LookupJoin)
                .iter()
                .filter(|k| **k == ChildKind::Relational)
                .count(),
            1
        );
    }

    #[test]
    fn test_canonical_scan() {
        let mut scan = ScanPrivate::new(TableId(0), ColSet::new());
        assert!(scan.is_canonical());
        scan.hard_limit = Some(10);
        assert!(!scan.is_canonical());
    }
}
