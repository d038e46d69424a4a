//! # Application State
//!
//! Shared by every request handler through `Arc`. The rule table and cost model are
//! immutable, so concurrent requests read them without locking; each request builds
//! its own memo.

use std::sync::Arc;
use tracing::warn;
use xform_core::cost::{CostModel, DefaultCostModel};
use xform_core::error::RuleLoadError;
use xform_core::rule::RuleTable;
use xform_core::search::SearchConfig;

/// Server-level optimizer configuration.
///
/// Defaults can be overridden with `XFORM_LISTEN_ADDR`, `XFORM_TIMEOUT_MS` and
/// `XFORM_MAX_MEMO_GROUPS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerConfig {
    pub listen_addr: String,
    /// Exploration deadline for a request that does not set its own.
    pub timeout_ms: u64,
    pub max_memo_groups: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            timeout_ms: 5000,
            max_memo_groups: 100_000,
        }
    }
}

impl OptimizerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Unparsable numbers keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("XFORM_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(ms) = lookup("XFORM_TIMEOUT_MS") {
            match ms.parse() {
                Ok(ms) => config.timeout_ms = ms,
                Err(_) => warn!(value = %ms, "ignoring invalid XFORM_TIMEOUT_MS"),
            }
        }
        if let Some(groups) = lookup("XFORM_MAX_MEMO_GROUPS") {
            match groups.parse() {
                Ok(groups) => config.max_memo_groups = groups,
                Err(_) => warn!(value = %groups, "ignoring invalid XFORM_MAX_MEMO_GROUPS"),
            }
        }
        config
    }

    /// Search budgets for one request.
    pub fn search_config(&self, timeout_ms: Option<u64>) -> SearchConfig {
        SearchConfig {
            max_memo_groups: self.max_memo_groups,
            timeout_ms: Some(timeout_ms.unwrap_or(self.timeout_ms)),
            ..SearchConfig::default()
        }
    }
}

pub struct AppState {
    pub rule_table: Arc<RuleTable>,
    pub cost_model: Arc<dyn CostModel>,
    pub config: OptimizerConfig,
}

impl AppState {
    /// State with the built-in rules and the default cost model.
    pub fn new(config: OptimizerConfig) -> Result<Self, RuleLoadError> {
        Ok(Self {
            rule_table: xform_rules::shared_rule_table()?,
            cost_model: Arc::new(DefaultCostModel::default()),
            config,
        })
    }
}
