//! # JSON Plan Protocol
//!
//! The wire format for `POST /optimize`. A request carries the table definitions the
//! plan refers to and a logical plan tree; the response carries the chosen physical
//! plan with its cost and the exploration counters.
//!
//! ```json
//! {
//!   "tables": [
//!     {"schema": "tpch", "name": "orders", "rowCount": 1500000,
//!      "columns": [{"name": "o_orderkey", "ndv": 1500000}, {"name": "o_custkey", "ndv": 150000}],
//!      "primaryKey": ["o_orderkey"],
//!      "indexes": [{"name": "o_cust", "columns": ["o_custkey"]}]}
//!   ],
//!   "plan": {"op": "join", "joinType": "inner",
//!            "left": {"op": "scan", "table": "customer", "alias": "c"},
//!            "right": {"op": "scan", "table": "orders", "alias": "o"},
//!            "on": [{"eq": [{"col": "c.c_custkey"}, {"col": "o.o_custkey"}]}]},
//!   "requiredOrder": ["o.o_orderkey"]
//! }
//! ```
//!
//! Column references are `alias.column`; a scan without an alias is aliased by its
//! table name. Malformed references surface as [`OptError::InvalidInput`], unknown
//! tables as [`OptError::UnknownTable`].

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use xform_core::catalog::{IndexDef, InMemoryCatalog, TableDef};
use xform_core::error::{OptError, OptResult};
use xform_core::expr::{binary, BinaryOp, ColSet, ColumnId, Expr, ScalarValue, SortKey, TableRef, UnaryOp};
use xform_core::memo::{GroupId, Memo, MemoExpr, PlanNode, ScalarId};
use xform_core::operator::{JoinHint, JoinPrivate, OpTag, Private, ScanPrivate};
use xform_core::properties::PhysicalPropertySet;
use xform_core::scheduler::ExploreStats;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub tables: Vec<TableInfo>,
    pub plan: PlanJson,
    /// Columns the result must be sorted on, ascending.
    #[serde(default)]
    pub required_order: Vec<String>,
    /// Overrides the server's exploration deadline for this request.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub row_count: f64,
    pub size_bytes: Option<f64>,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

fn default_schema() -> String {
    "public".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub ndv: f64,
    #[serde(default)]
    pub null_fraction: f64,
    pub avg_size: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub storing: Vec<String>,
    /// Inverted (spatial) index over the single listed column.
    #[serde(default)]
    pub inverted: bool,
}

/// A logical plan node.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PlanJson {
    Scan {
        table: String,
        alias: Option<String>,
    },
    Select {
        input: Box<PlanJson>,
        filters: Vec<ScalarJson>,
    },
    Project {
        input: Box<PlanJson>,
        columns: Vec<String>,
    },
    Join {
        #[serde(rename = "joinType", default)]
        join_type: JoinKind,
        left: Box<PlanJson>,
        right: Box<PlanJson>,
        #[serde(default)]
        on: Vec<ScalarJson>,
        #[serde(default)]
        hint: HintJson,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

impl JoinKind {
    fn tag(self) -> OpTag {
        match self {
            JoinKind::Inner => OpTag::InnerJoin,
            JoinKind::Left => OpTag::LeftJoin,
            JoinKind::Right => OpTag::RightJoin,
            JoinKind::Full => OpTag::FullJoin,
            JoinKind::Semi => OpTag::SemiJoin,
            JoinKind::Anti => OpTag::AntiJoin,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintJson {
    #[default]
    None,
    Hash,
    Merge,
    Lookup,
}

impl From<HintJson> for JoinHint {
    fn from(hint: HintJson) -> Self {
        match hint {
            HintJson::None => JoinHint::None,
            HintJson::Hash => JoinHint::Hash,
            HintJson::Merge => JoinHint::Merge,
            HintJson::Lookup => JoinHint::Lookup,
        }
    }
}

/// A scalar expression, e.g. `{"lt": [{"col": "o.o_orderdate"}, {"int": 9000}]}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarJson {
    Col(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Eq(Box<ScalarJson>, Box<ScalarJson>),
    Ne(Box<ScalarJson>, Box<ScalarJson>),
    Lt(Box<ScalarJson>, Box<ScalarJson>),
    Le(Box<ScalarJson>, Box<ScalarJson>),
    Gt(Box<ScalarJson>, Box<ScalarJson>),
    Ge(Box<ScalarJson>, Box<ScalarJson>),
    Not(Box<ScalarJson>),
    IsNull(Box<ScalarJson>),
    And(Vec<ScalarJson>),
    Or(Vec<ScalarJson>),
    #[serde(rename = "fn")]
    Func { name: String, args: Vec<ScalarJson> },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub plan: PlanNodeJson,
    pub cost: f64,
    pub stats: ExploreStats,
    pub groups: usize,
    pub exprs: usize,
}

#[derive(Debug, Serialize)]
pub struct PlanNodeJson {
    pub op: String,
    pub detail: String,
    pub group: GroupId,
    pub rows: f64,
    pub cost: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNodeJson>,
}

impl From<&PlanNode> for PlanNodeJson {
    fn from(node: &PlanNode) -> Self {
        Self {
            op: node.name().to_string(),
            detail: node.detail.clone(),
            group: node.group,
            rows: node.rows,
            cost: node.cost.value(),
            children: node.children.iter().map(PlanNodeJson::from).collect(),
        }
    }
}

/// Convert the request's table list into a catalog.
pub fn build_catalog(tables: &[TableInfo]) -> OptResult<InMemoryCatalog> {
    let mut catalog = InMemoryCatalog::new();
    for info in tables {
        let mut def = TableDef::new(TableRef::new(&info.schema, &info.name), info.row_count);
        if let Some(size) = info.size_bytes {
            def.size_bytes = size;
        }
        for c in &info.columns {
            def = def.with_column(&c.name, c.ndv);
            if let Some(last) = def.columns.last_mut() {
                last.stats.null_fraction = c.null_fraction;
                if let Some(avg) = c.avg_size {
                    last.stats.avg_size = avg;
                }
            }
        }
        if !info.primary_key.is_empty() {
            ordinals(&def, &info.primary_key)?;
            let keys: Vec<&str> = info.primary_key.iter().map(String::as_str).collect();
            def = def.with_primary_key(&keys);
        }
        for index in &info.indexes {
            let keys = ordinals(&def, &index.columns)?;
            let index_def = if index.inverted {
                match keys.as_slice() {
                    [col] => IndexDef::inverted(&index.name, *col),
                    _ => {
                        return Err(OptError::InvalidInput(format!(
                            "inverted index {} must have exactly one column",
                            index.name
                        )))
                    }
                }
            } else {
                IndexDef::new(&index.name, keys).storing(ordinals(&def, &index.storing)?)
            };
            def = def.with_index(index_def);
        }
        catalog.add_table(def);
    }
    Ok(catalog)
}

fn ordinals(def: &TableDef, columns: &[String]) -> OptResult<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            def.ordinal(c).ok_or_else(|| {
                OptError::InvalidInput(format!("table {} has no column {c}", def.table.name))
            })
        })
        .collect()
}

/// Intern a plan tree into a fresh memo and return the root group.
pub fn build_memo(catalog: &InMemoryCatalog, tables: &[TableInfo], plan: &PlanJson) -> OptResult<(Memo, GroupId)> {
    let mut memo = Memo::new();
    let root = PlanBuilder {
        catalog,
        tables,
        memo: &mut memo,
    }
    .build(plan)?;
    Ok((memo, root))
}

struct PlanBuilder<'a> {
    catalog: &'a InMemoryCatalog,
    tables: &'a [TableInfo],
    memo: &'a mut Memo,
}

impl PlanBuilder<'_> {
    fn build(&mut self, plan: &PlanJson) -> OptResult<GroupId> {
        let expr = match plan {
            PlanJson::Scan { table, alias } => {
                let info = self
                    .tables
                    .iter()
                    .find(|t| &t.name == table)
                    .ok_or_else(|| OptError::UnknownTable(table.clone()))?;
                let alias = alias.as_deref().unwrap_or(table);
                if self.memo.metadata().tables().iter().any(|t| t.alias == alias) {
                    return Err(OptError::InvalidInput(format!("alias {alias} is used twice")));
                }
                let id = self
                    .memo
                    .add_table(self.catalog, &TableRef::new(&info.schema, &info.name), alias)?;
                let cols = self.memo.metadata().table_columns(id)?;
                MemoExpr::scan(ScanPrivate::new(id, cols))
            }
            PlanJson::Select { input, filters } => {
                let input = self.build(input)?;
                let filters = self.scalars(filters)?;
                MemoExpr::select(input, filters)
            }
            PlanJson::Project { input, columns } => {
                let input = self.build(input)?;
                let mut cols = ColSet::new();
                for c in columns {
                    cols.insert(self.column(c)?);
                }
                MemoExpr::project(input, cols)
            }
            PlanJson::Join {
                join_type,
                left,
                right,
                on,
                hint,
            } => {
                let left = self.build(left)?;
                let right = self.build(right)?;
                let on = self.scalars(on)?;
                let mut join = MemoExpr::join(join_type.tag(), left, right, on);
                join.private = Some(Private::Join(JoinPrivate { hint: (*hint).into() }));
                join
            }
        };
        Ok(self.memo.intern(expr)?.0)
    }

    fn scalars(&mut self, exprs: &[ScalarJson]) -> OptResult<Vec<ScalarId>> {
        let exprs = exprs.iter().map(|e| self.scalar(e)).collect::<OptResult<Vec<_>>>()?;
        Ok(self.memo.intern_filters(exprs))
    }

    fn column(&self, name: &str) -> OptResult<ColumnId> {
        resolve_column(self.memo, name)
    }

    fn scalar(&self, expr: &ScalarJson) -> OptResult<Expr> {
        let cmp = |op: BinaryOp, l: &ScalarJson, r: &ScalarJson| -> OptResult<Expr> {
            Ok(binary(op, self.scalar(l)?, self.scalar(r)?))
        };
        let unary = |op: UnaryOp, e: &ScalarJson| -> OptResult<Expr> {
            Ok(Expr::UnaryOp {
                op,
                operand: Box::new(self.scalar(e)?),
            })
        };
        Ok(match expr {
            ScalarJson::Col(name) => Expr::Column(self.column(name)?),
            ScalarJson::Int(v) => Expr::Literal(ScalarValue::Int64(*v)),
            ScalarJson::Float(v) => Expr::Literal(ScalarValue::Float64(OrderedFloat(*v))),
            ScalarJson::Str(v) => Expr::Literal(ScalarValue::Utf8(v.clone())),
            ScalarJson::Bool(v) => Expr::Literal(ScalarValue::Bool(*v)),
            ScalarJson::Null => Expr::Literal(ScalarValue::Null),
            ScalarJson::Eq(l, r) => cmp(BinaryOp::Eq, l, r)?,
            ScalarJson::Ne(l, r) => cmp(BinaryOp::NotEq, l, r)?,
            ScalarJson::Lt(l, r) => cmp(BinaryOp::Lt, l, r)?,
            ScalarJson::Le(l, r) => cmp(BinaryOp::LtEq, l, r)?,
            ScalarJson::Gt(l, r) => cmp(BinaryOp::Gt, l, r)?,
            ScalarJson::Ge(l, r) => cmp(BinaryOp::GtEq, l, r)?,
            ScalarJson::Not(e) => unary(UnaryOp::Not, e)?,
            ScalarJson::IsNull(e) => unary(UnaryOp::IsNull, e)?,
            ScalarJson::And(items) => Expr::And(items.iter().map(|e| self.scalar(e)).collect::<OptResult<_>>()?),
            ScalarJson::Or(items) => Expr::Or(items.iter().map(|e| self.scalar(e)).collect::<OptResult<_>>()?),
            ScalarJson::Func { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|e| self.scalar(e)).collect::<OptResult<_>>()?,
            },
        })
    }
}

/// Resolve `alias.column` against the memo's metadata.
pub fn resolve_column(memo: &Memo, name: &str) -> OptResult<ColumnId> {
    let (alias, column) = name
        .split_once('.')
        .ok_or_else(|| OptError::InvalidInput(format!("column reference {name} is not alias.column")))?;
    memo.metadata()
        .find_column(alias, column)
        .ok_or_else(|| OptError::InvalidInput(format!("unknown column {name}")))
}

/// The physical properties requested for the plan root.
pub fn required_properties(memo: &Memo, order: &[String]) -> OptResult<PhysicalPropertySet> {
    let keys = order
        .iter()
        .map(|c| resolve_column(memo, c).map(SortKey::asc))
        .collect::<OptResult<Vec<_>>>()?;
    Ok(PhysicalPropertySet::with_sort(keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> OptimizeRequest {
        serde_json::from_str(body).unwrap()
    }

    const TABLES: &str = r#"[
        {"schema": "tpch", "name": "customer", "rowCount": 150000,
         "columns": [{"name": "c_custkey", "ndv": 150000}, {"name": "c_nationkey", "ndv": 25}],
         "primaryKey": ["c_custkey"]},
        {"schema": "tpch", "name": "orders", "rowCount": 1500000,
         "columns": [{"name": "o_orderkey", "ndv": 1500000}, {"name": "o_custkey", "ndv": 150000}],
         "primaryKey": ["o_orderkey"],
         "indexes": [{"name": "o_cust", "columns": ["o_custkey"]}]}
    ]"#;

    #[test]
    fn test_parse_join_request() {
        let req = request(&format!(
            r#"{{"tables": {TABLES},
                "plan": {{"op": "join", "joinType": "left", "hint": "merge",
                         "left": {{"op": "scan", "table": "customer", "alias": "c"}},
                         "right": {{"op": "scan", "table": "orders"}},
                         "on": [{{"eq": [{{"col": "c.c_custkey"}}, {{"col": "orders.o_custkey"}}]}}]}},
                "requiredOrder": ["c.c_custkey"]}}"#
        ));
        match &req.plan {
            PlanJson::Join { join_type, hint, on, .. } => {
                assert_eq!(*join_type, JoinKind::Left);
                assert_eq!(*hint, HintJson::Merge);
                assert_eq!(on.len(), 1);
            }
            other => panic!("unexpected plan {other:?}"),
        }
        assert_eq!(req.required_order, vec!["c.c_custkey"]);
        assert_eq!(req.timeout_ms, None);
    }

    #[test]
    fn test_build_catalog_indexes() {
        let req = request(&format!(
            r#"{{"tables": {TABLES}, "plan": {{"op": "scan", "table": "orders"}}}}"#
        ));
        let catalog = build_catalog(&req.tables).unwrap();
        let (memo, root) = build_memo(&catalog, &req.tables, &req.plan).unwrap();
        let table = &memo.metadata().tables()[0];
        assert_eq!(table.alias, "orders");
        assert_eq!(table.def.index_count(), 2);
        assert_eq!(table.def.index_keys(1), vec![1]);
        assert_eq!(memo.group(root).exprs.len(), 1);
    }

    #[test]
    fn test_build_memo_interns_join() {
        let req = request(&format!(
            r#"{{"tables": {TABLES},
                "plan": {{"op": "select",
                         "input": {{"op": "join",
                                   "left": {{"op": "scan", "table": "customer", "alias": "c"}},
                                   "right": {{"op": "scan", "table": "orders", "alias": "o"}},
                                   "on": [{{"eq": [{{"col": "c.c_custkey"}}, {{"col": "o.o_custkey"}}]}}]}},
                         "filters": [{{"lt": [{{"col": "c.c_nationkey"}}, {{"int": 5}}]}}]}}}}"#
        ));
        let catalog = build_catalog(&req.tables).unwrap();
        let (memo, root) = build_memo(&catalog, &req.tables, &req.plan).unwrap();
        assert_eq!(memo.num_groups(), 4);
        let select = memo.expr(memo.group(root).exprs[0]);
        assert_eq!(select.tag, OpTag::Select);
        let join = memo.expr(memo.group(select.children[0]).exprs[0]);
        assert_eq!(join.tag, OpTag::InnerJoin);
        assert_eq!(join.filters.len(), 1);

        let required = required_properties(&memo, &["o.o_orderkey".to_string()]).unwrap();
        assert!(!required.is_any());
    }

    #[test]
    fn test_bad_references_are_input_errors() {
        let unknown_table = request(&format!(
            r#"{{"tables": {TABLES}, "plan": {{"op": "scan", "table": "lineitem"}}}}"#
        ));
        let catalog = build_catalog(&unknown_table.tables).unwrap();
        let err = build_memo(&catalog, &unknown_table.tables, &unknown_table.plan).err().expect("expected error");
        assert!(matches!(err, OptError::UnknownTable(_)));

        let bad_column = request(&format!(
            r#"{{"tables": {TABLES},
                "plan": {{"op": "select", "input": {{"op": "scan", "table": "orders"}},
                         "filters": [{{"eq": [{{"col": "orders.o_total"}}, {{"int": 1}}]}}]}}}}"#
        ));
        let err = build_memo(&catalog, &bad_column.tables, &bad_column.plan).err().expect("expected error");
        assert!(err.is_input_error());

        let self_join = request(&format!(
            r#"{{"tables": {TABLES},
                "plan": {{"op": "join", "left": {{"op": "scan", "table": "orders"}},
                         "right": {{"op": "scan", "table": "orders"}}}}}}"#
        ));
        let err = build_memo(&catalog, &self_join.tables, &self_join.plan).err().expect("expected error");
        assert!(err.is_input_error());
    }

    #[test]
    fn test_plan_node_json_shape() {
        let node = PlanNode {
            group: 3,
            tag: Some(OpTag::MergeJoin),
            detail: "inner".to_string(),
            children: vec![],
            cost: xform_core::cost::Cost::new(42.0),
            rows: 10.0,
        };
        let json = serde_json::to_value(PlanNodeJson::from(&node)).unwrap();
        assert_eq!(json["op"], "MergeJoin");
        assert_eq!(json["cost"], 42.0);
        assert!(json.get("children").is_none());
    }
}
