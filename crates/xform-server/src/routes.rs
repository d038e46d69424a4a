//! # HTTP Route Handlers
//!
//! ## Optimization Pipeline
//!
//! `POST /optimize` runs on the blocking pool:
//!
//! 1. **Catalog**: build an in-memory catalog from the request's tables.
//! 2. **Memo**: intern the logical plan tree into a fresh memo.
//! 3. **Search**: explore with the shared rule table, then select the cheapest plan
//!    for the requested ordering.
//! 4. **Respond**: the chosen plan, its cost and the exploration counters.
//!
//! ## Error Handling
//!
//! - 400 Bad Request: unknown tables, unknown columns and malformed plans.
//! - 500 Internal Server Error: anything the optimizer itself fails on.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use xform_core::error::OptError;
use xform_core::rule::Phase;
use xform_core::search::CascadesSearch;

use crate::plan_json::{build_catalog, build_memo, required_properties, OptimizeRequest, OptimizeResponse, PlanNodeJson};
use crate::state::AppState;

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /rules: the loaded rules in firing order.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rules = state
        .rule_table
        .rules()
        .iter()
        .map(|r| RuleInfo {
            name: r.name.clone(),
            phase: match r.phase {
                Phase::Normalize => "normalize",
                Phase::Explore => "explore",
            },
        })
        .collect();
    Json(RulesResponse { rules })
}

#[derive(Serialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleInfo>,
}

#[derive(Serialize)]
pub struct RuleInfo {
    pub name: String,
    pub phase: &'static str,
}

/// POST /optimize
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    let result = tokio::task::spawn_blocking(move || run_optimization(&state, &req))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("optimizer task failed: {e}")))?;
    result.map(Json).map_err(|e| {
        let status = error_status(&e);
        warn!(%status, error = %e, "optimization request failed");
        (status, e.to_string())
    })
}

pub fn error_status(err: &OptError) -> StatusCode {
    if err.is_input_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// One optimization attempt with a fresh memo.
pub fn run_optimization(state: &AppState, req: &OptimizeRequest) -> Result<OptimizeResponse, OptError> {
    let catalog = build_catalog(&req.tables)?;
    let (memo, root) = build_memo(&catalog, &req.tables, &req.plan)?;
    let required = required_properties(&memo, &req.required_order)?;

    let mut search = CascadesSearch::new(
        memo,
        Arc::clone(&state.rule_table),
        Arc::clone(&state.cost_model),
        state.config.search_config(req.timeout_ms),
    );
    let plan = search.optimize(root, &required)?;
    debug!(
        cost = plan.cost.value(),
        groups = search.memo.num_groups(),
        timed_out = search.stats.timed_out,
        "request optimized"
    );

    Ok(OptimizeResponse {
        cost: plan.cost.value(),
        plan: PlanNodeJson::from(&plan),
        stats: search.stats.clone(),
        groups: search.memo.num_groups(),
        exprs: search.memo.num_exprs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::OptimizerConfig;

    fn state() -> AppState {
        AppState::new(OptimizerConfig::default()).unwrap()
    }

    fn request(body: serde_json::Value) -> OptimizeRequest {
        serde_json::from_value(body).unwrap()
    }

    fn tables() -> serde_json::Value {
        serde_json::json!([
            {"name": "small", "rowCount": 100, "columns": [{"name": "k", "ndv": 100}]},
            {"name": "big", "rowCount": 1000000,
             "columns": [{"name": "id", "ndv": 1000000}, {"name": "v", "ndv": 10}],
             "primaryKey": ["id"]}
        ])
    }

    #[test]
    fn test_small_input_probes_big_table() {
        let req = request(serde_json::json!({
            "tables": tables(),
            "plan": {"op": "join",
                     "left": {"op": "scan", "table": "big", "alias": "b"},
                     "right": {"op": "scan", "table": "small", "alias": "s"},
                     "on": [{"eq": [{"col": "b.id"}, {"col": "s.k"}]}]}
        }));
        let resp = run_optimization(&state(), &req).unwrap();
        assert_eq!(resp.plan.op, "LookupJoin");
        assert!(resp.stats.rule_applications > 0);
        assert!(resp.groups >= 3);

        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["stats"]["entries_processed"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_required_order_is_delivered() {
        let req = request(serde_json::json!({
            "tables": tables(),
            "plan": {"op": "scan", "table": "big"},
            "requiredOrder": ["big.v"]
        }));
        let resp = run_optimization(&state(), &req).unwrap();
        assert_eq!(resp.plan.op, "Sort");
        assert_eq!(resp.plan.children[0].op, "Scan");
    }

    #[test]
    fn test_input_errors_map_to_bad_request() {
        let req = request(serde_json::json!({
            "tables": tables(),
            "plan": {"op": "scan", "table": "missing"}
        }));
        let err = run_optimization(&state(), &req).unwrap_err();
        assert_eq!(error_status(&err), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(&OptError::NoPlan(0)), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
