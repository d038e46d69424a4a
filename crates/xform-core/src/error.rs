//! # Error Types
//!
//! Two families of errors exist, matching the two moments where something can go
//! wrong:
//!
//! - **`RuleLoadError`**: raised while a rule table is assembled from rule
//!   definitions. These are configuration errors (an operator name the catalog does
//!   not know, a custom function nobody registered, the wrong number of fields) and
//!   every variant names the rule it came from. A table with a load error is never
//!   built; nothing is deferred to optimization time.
//!
//! - **`OptError`**: raised during a single optimization attempt. Malformed input
//!   and catalog misses are precondition failures checked before matching begins.
//!   Everything else (`Internal`, `CyclicMerge`, `SelfReference`) means a rule or the
//!   engine broke an invariant. An `OptError` aborts the current attempt only; the
//!   memo is discarded with it and the shared rule table is untouched.

use crate::memo::GroupId;

/// Error raised while compiling rule definitions into a [`crate::rule::RuleTable`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleLoadError {
    #[error("rule {rule}: unknown operator '{name}'")]
    UnknownOperator { rule: String, name: String },

    #[error("rule {rule}: unknown custom function '{name}'")]
    UnknownFunction { rule: String, name: String },

    #[error("rule {rule}: '{name}' expects {expected} argument(s), found {found}")]
    ArityMismatch {
        rule: String,
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("rule {rule}: variable ${var} is referenced before it is bound")]
    UnboundVariable { rule: String, var: String },

    #[error("rule {rule}: {detail}")]
    InvalidRule { rule: String, detail: String },

    #[error("rule {0} is defined more than once")]
    DuplicateRule(String),

    #[error("custom function {0} is registered more than once")]
    DuplicateFunction(String),
}

impl RuleLoadError {
    /// Name of the rule the error was reported against, if any.
    pub fn rule(&self) -> Option<&str> {
        match self {
            Self::UnknownOperator { rule, .. }
            | Self::UnknownFunction { rule, .. }
            | Self::ArityMismatch { rule, .. }
            | Self::UnboundVariable { rule, .. }
            | Self::InvalidRule { rule, .. } => Some(rule),
            Self::DuplicateRule(rule) => Some(rule),
            Self::DuplicateFunction(_) => None,
        }
    }
}

/// Error raised during one optimization attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OptError {
    /// A rule or the engine violated an invariant (e.g. a guard received a value of
    /// the wrong kind, or a constructor produced a field the operator cannot hold).
    #[error("internal error{}: {detail}", rule.as_ref().map(|r| format!(" in rule {r}")).unwrap_or_default())]
    Internal { rule: Option<String>, detail: String },

    /// Merging the two groups would make a group its own transitive descendant.
    #[error("merging group {absorbed} into group {target} would create a cycle")]
    CyclicMerge { target: GroupId, absorbed: GroupId },

    /// An expression added to a group references that group through its inputs.
    #[error("expression added to group {group} would reference its own group")]
    SelfReference { group: GroupId },

    /// The input expression does not fit the operator catalog.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown table {0}")]
    UnknownTable(String),

    #[error("no plan satisfies the required properties of group {0}")]
    NoPlan(GroupId),

    #[error(transparent)]
    Load(#[from] RuleLoadError),
}

impl OptError {
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            rule: None,
            detail: detail.into(),
        }
    }

    /// Attach the rule name to an `Internal` error that does not carry one yet.
    pub fn with_rule(self, name: &str) -> Self {
        match self {
            Self::Internal { rule: None, detail } => Self::Internal {
                rule: Some(name.to_string()),
                detail,
            },
            other => other,
        }
    }

    /// Whether the error is a caller precondition failure rather than an engine bug.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::UnknownTable(_))
    }
}

pub type OptResult<T> = Result<T, OptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_names_rule() {
        let err = OptError::internal("guard returned a group").with_rule("CommuteJoin");
        assert_eq!(
            err.to_string(),
            "internal error in rule CommuteJoin: guard returned a group"
        );
        let bare = OptError::internal("oops");
        assert_eq!(bare.to_string(), "internal error: oops");
    }

    #[test]
    fn test_with_rule_keeps_existing_name() {
        let err = OptError::Internal {
            rule: Some("A".into()),
            detail: "x".into(),
        }
        .with_rule("B");
        assert!(matches!(err, OptError::Internal { rule: Some(r), .. } if r == "A"));
    }

    #[test]
    fn test_load_error_rule_name() {
        let err = RuleLoadError::UnknownFunction {
            rule: "AssociateJoin".into(),
            name: "Nope".into(),
        };
        assert_eq!(err.rule(), Some("AssociateJoin"));
        assert!(err.to_string().contains("AssociateJoin"));
        assert_eq!(RuleLoadError::DuplicateFunction("F".into()).rule(), None);
    }
}
