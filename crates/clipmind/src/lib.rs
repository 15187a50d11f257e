//! # ClipMind
//!
//! Agent memory core for content-generation tools.
//!
//! - **clipmind-memory**: indexed memory store, retrieval and token-budgeted
//!   context assembly
//! - **clipmind-learn**: feedback-driven motion, audio and composition learners
//! - **clipmind-recovery**: tool failure classification and recovery
//!
//! [`ClipMind`] ties them together behind one handle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clipmind::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let memory = ClipMind::initialize(".clipmind").await?;
//!     memory.set_project_context("launch-video", "./projects/launch-video");
//!
//!     memory.add_to_history(MessageRole::User, "Make the logo intro punchier").await?;
//!     let context = memory.get_context_for_ai("Make the logo intro punchier");
//!     println!("{}", context);
//!
//!     memory.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod events;
pub mod facade;

pub use clipmind_learn as learn;
pub use clipmind_memory as memory;
pub use clipmind_recovery as recovery;

pub use config::ClipMindConfig;
pub use events::{LearnerKind, LearningEvent};
pub use facade::{ClipMind, ClipMindStats, CleanupReport, LearnerCounts};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::config::ClipMindConfig;
    pub use crate::events::{LearnerKind, LearningEvent};
    pub use crate::facade::{ClipMind, ClipMindStats, CleanupReport};

    pub use clipmind_memory::{
        BuiltContext, Importance, MemoryConfig, MemoryContent, MemoryError, MemoryKind,
        MemoryResult, MemoryStore, MessageRole, QueryCriteria, StoreOptions, StoreRequest,
    };

    pub use clipmind_learn::{
        AnimationPattern, AudioSceneMapping, CompositionScenario, CompositionTemplate,
        MotionScenario, MusicScenario, SfxPattern, SfxScenario,
    };

    pub use clipmind_recovery::{
        ErrorCategory, RecoveryOutcome, RecoveryStrategy, ToolExecutor, ToolFailure,
    };
}
