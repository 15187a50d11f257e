//! # ClipMind Recovery
//!
//! Classifies tool failures and recovers from them with retry, fallback,
//! skip, manual or rollback strategies. Every failure is recorded in a
//! [`clipmind_memory::MemoryStore`] before recovery starts, so error
//! statistics survive restarts.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use clipmind_memory::{MemoryConfig, MemoryStore};
//! use clipmind_recovery::{ErrorRecoveryCoordinator, RecoveryConfig, ToolExecutor, ToolFailure};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Tools;
//!
//! #[async_trait]
//! impl ToolExecutor for Tools {
//!     async fn execute(&self, tool: &str, _args: &Value) -> Result<Value, ToolFailure> {
//!         Ok(json!({ "tool": tool }))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::open(MemoryConfig::new(".clipmind")).await?);
//! let coordinator = ErrorRecoveryCoordinator::new(store, RecoveryConfig::default());
//!
//! let failure = ToolFailure::new("connect ECONNREFUSED");
//! let outcome = coordinator.recover("upload", json!({}), &failure, &Tools).await?;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod category;
pub mod coordinator;
pub mod plan;

pub use category::{categorize_error, ErrorCategory};
pub use coordinator::{
    ErrorRecoveryCoordinator, ErrorStats, RecoveryOutcome, RecoveryStatus, ToolExecutor,
    ToolFailure, FALLBACK_SUCCESS_SCHEMA, RECOVERY_SCHEMAS, ROLLBACK_SCHEMA, TOOL_ERROR_SCHEMA,
};
pub use plan::{
    backoff_delay, ErrorContext, FallbackTarget, RecoveryConfig, RecoveryPlan, RecoveryStrategy,
};
