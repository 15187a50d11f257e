//! Recovery plans and configuration

use crate::category::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// How to react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-run the same tool with backoff
    Retry,
    /// Run an alternate tool
    Fallback,
    /// Give up on this step and move on
    Skip,
    /// Hand back to a human
    Manual,
    /// Record a rollback and hand back to a human
    Rollback,
}

impl RecoveryStrategy {
    /// Snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Manual => "manual",
            RecoveryStrategy::Rollback => "rollback",
        }
    }
}

/// Alternate tool used by the fallback strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackTarget {
    /// Tool name
    pub tool: String,
    /// Arguments; the failed call's arguments are reused when absent
    #[serde(default)]
    pub args: Option<Value>,
}

impl FallbackTarget {
    /// Fallback to `tool` with the original arguments
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: None,
        }
    }

    /// Override the arguments
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }
}

/// The remedy chosen for one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Strategy
    pub strategy: RecoveryStrategy,
    /// Retries allowed (retry only)
    pub max_retries: u32,
    /// Base backoff in milliseconds (retry only)
    pub backoff_ms: u64,
    /// Alternate tool (fallback only)
    pub fallback: Option<FallbackTarget>,
    /// Whether a retry plan was downgraded after repeated failures
    pub escalated: bool,
}

impl RecoveryPlan {
    fn new(strategy: RecoveryStrategy, max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            strategy,
            max_retries,
            backoff_ms,
            fallback: None,
            escalated: false,
        }
    }

    /// Static plan for a category
    pub fn for_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Network => Self::new(RecoveryStrategy::Retry, 3, 1000),
            ErrorCategory::Timeout => Self::new(RecoveryStrategy::Retry, 2, 2000),
            ErrorCategory::Unknown => Self::new(RecoveryStrategy::Retry, 1, 1000),
            ErrorCategory::FileSystem => Self::new(RecoveryStrategy::Fallback, 0, 0),
            ErrorCategory::Validation => Self::new(RecoveryStrategy::Skip, 0, 0),
            ErrorCategory::Syntax | ErrorCategory::Permission => {
                Self::new(RecoveryStrategy::Manual, 0, 0)
            }
            ErrorCategory::Resource => Self::new(RecoveryStrategy::Rollback, 0, 0),
        }
    }

    /// Downgrade to fallback with no retries
    pub fn escalate(mut self) -> Self {
        self.strategy = RecoveryStrategy::Fallback;
        self.max_retries = 0;
        self.backoff_ms = 0;
        self.escalated = true;
        self
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

/// One failed tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Tool that failed
    pub tool: String,
    /// Arguments it was called with
    pub args: Value,
    /// Error message
    pub message: String,
    /// Stack trace, when the tool provides one
    pub stack: Option<String>,
    /// Classified category
    pub category: ErrorCategory,
    /// When it failed
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    /// Describe a failure, classifying it from message and stack
    pub fn new(
        tool: impl Into<String>,
        args: Value,
        message: impl Into<String>,
        stack: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let message = message.into();
        let category = crate::category::categorize_error(&message, stack.as_deref());
        Self {
            tool: tool.into(),
            args,
            message,
            stack,
            category,
            timestamp,
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Prior occurrences of a (tool, category) pair after which retry plans escalate
    pub escalation_threshold: u32,

    /// Fallback target per tool
    pub fallbacks: HashMap<String, FallbackTarget>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 3,
            fallbacks: HashMap::new(),
        }
    }
}

impl RecoveryConfig {
    /// Set the escalation threshold
    pub fn with_escalation_threshold(mut self, threshold: u32) -> Self {
        self.escalation_threshold = threshold;
        self
    }

    /// Register a fallback for `tool`
    pub fn with_fallback(mut self, tool: impl Into<String>, target: FallbackTarget) -> Self {
        self.fallbacks.insert(tool.into(), target);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_table() {
        let network = RecoveryPlan::for_category(ErrorCategory::Network);
        assert_eq!(network.strategy, RecoveryStrategy::Retry);
        assert_eq!((network.max_retries, network.backoff_ms), (3, 1000));

        let timeout = RecoveryPlan::for_category(ErrorCategory::Timeout);
        assert_eq!((timeout.max_retries, timeout.backoff_ms), (2, 2000));

        assert_eq!(
            RecoveryPlan::for_category(ErrorCategory::FileSystem).strategy,
            RecoveryStrategy::Fallback
        );
        assert_eq!(
            RecoveryPlan::for_category(ErrorCategory::Validation).strategy,
            RecoveryStrategy::Skip
        );
        assert_eq!(
            RecoveryPlan::for_category(ErrorCategory::Permission).strategy,
            RecoveryStrategy::Manual
        );
        assert_eq!(
            RecoveryPlan::for_category(ErrorCategory::Resource).strategy,
            RecoveryStrategy::Rollback
        );
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(2000, 2), Duration::from_millis(4000));
    }

    #[test]
    fn test_escalate() {
        let plan = RecoveryPlan::for_category(ErrorCategory::Network).escalate();
        assert_eq!(plan.strategy, RecoveryStrategy::Fallback);
        assert_eq!(plan.max_retries, 0);
        assert!(plan.escalated);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: RecoveryConfig =
            serde_json::from_str(r#"{"fallbacks": {"render": {"tool": "render_lite"}}}"#).unwrap();
        assert_eq!(config.escalation_threshold, 3);
        assert_eq!(config.fallbacks["render"], FallbackTarget::new("render_lite"));
    }
}
