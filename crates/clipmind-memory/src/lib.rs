//! # ClipMind Memory
//!
//! Indexed agent memory for content-generation tools.
//!
//! - **MemoryStore**: persisted index of entries with relevance ranking,
//!   keyword search, eviction and consolidation
//! - **WorkingMemory**: per-process project, task and recent-action state
//! - **RetrievalEngine**: weighted semantic search, similarity, pattern
//!   matching and detection
//! - **ContextBudgeter**: token-bounded, prioritized context assembly with a
//!   rolling conversation history
//!
//! ## Example
//!
//! ```rust,no_run
//! use clipmind_memory::{
//!     Importance, MemoryConfig, MemoryContent, MemoryKind, MemoryStore, QueryCriteria,
//!     StoreRequest,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::open(MemoryConfig::new(".clipmind")).await?;
//!
//! let id = store
//!     .store(
//!         MemoryKind::Semantic,
//!         "brand",
//!         MemoryContent::text("Logo always sits top-left"),
//!         StoreRequest::new(Importance::High).with_tags(["logo"]),
//!     )
//!     .await?;
//!
//! let hits = store.query(&QueryCriteria::new().with_tags(["logo"]));
//! assert_eq!(hits[0].id, id);
//!
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod lexicon;
pub mod maintenance;
pub mod retrieval;
pub mod storage;
pub mod store;
pub mod types;
pub mod vector;
pub mod working;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BudgetFractions, ContextBudgetConfig, MemoryConfig};
pub use context::{
    analyze_task, estimate_tokens, optimize_segments, BuiltContext, Complexity, ContextBudgeter,
    ContextSegment, SegmentKind, TaskAnalysis, TaskType, TokenBudget,
};
pub use conversation::{ConversationHistory, ConversationMessage, MessageRole};
pub use error::{MemoryError, MemoryResult};
pub use lexicon::{extract_keywords, infer_domain, Domain};
pub use maintenance::StoreStats;
pub use retrieval::{
    ContextKind, ContextualMemory, DetectedPattern, RetrievalEngine, RetrievalResult,
    SearchOptions, SemanticQuery,
};
pub use storage::{FileStorage, InMemoryStorage, StorageBackend};
pub use store::{relevance, MemoryStore, ScoredEntry, StoreOptions};
pub use types::{
    EntryMetadata, Importance, MemoryContent, MemoryEntry, MemoryKind, QueryCriteria,
    StoreRequest, TypedRecord,
};
pub use vector::{Embedding, EmbeddingProvider, HashEmbeddingProvider};
pub use working::{RecentAction, WorkingMemory};
