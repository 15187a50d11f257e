//! # ClipMind Learn
//!
//! Feedback-driven learners that keep domain records in a
//! [`clipmind_memory::MemoryStore`] and rank them for new scenarios.
//!
//! - [`MotionLearner`]: animation patterns per element type
//! - [`AudioLearner`]: music per scene and sound effects per trigger
//! - [`CompositionLearner`]: video structure templates per category
//!
//! All three are thin wrappers over the generic [`Learner`], which owns
//! seeding, find-or-create learning, usage nudges and ranking.
//!
//! ```rust,no_run
//! use clipmind_learn::{LearnerWeights, MotionLearner, MotionScenario};
//! use clipmind_memory::{MemoryConfig, MemoryStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::open(MemoryConfig::new(".clipmind")).await?);
//! let motion = MotionLearner::new(store, LearnerWeights::motion());
//! motion.initialize().await?;
//!
//! for rec in motion.recommend(&MotionScenario::new("text").with_scene_type("intro")) {
//!     println!("{} {:.2} ({})", rec.record.name, rec.confidence, rec.reason);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod audio;
pub mod composition;
pub mod learner;
pub mod motion;
pub mod records;

pub use audio::{AudioLearner, AudioSceneMapping, MusicScenario, SfxPattern, SfxScenario};
pub use composition::{CompositionLearner, CompositionScenario, CompositionTemplate};
pub use learner::{
    Learner, LearnerSettings, LearnerWeights, Recommendation, Scoring, StoredRecord,
};
pub use motion::{AnimationPattern, MotionLearner, MotionScenario};
pub use records::{Evidence, LearnedRecord, RecordStats, MAX_EVIDENCE};

/// Store categories holding learned catalogs
pub const LEARNED_SCHEMAS: [&str; 4] = [
    AnimationPattern::SCHEMA,
    AudioSceneMapping::SCHEMA,
    SfxPattern::SCHEMA,
    CompositionTemplate::SCHEMA,
];
