//! Memory and context configuration

use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding `global_memory/index.json`
    pub storage_root: PathBuf,

    /// Seconds between background flushes (0 disables the flusher)
    pub flush_interval_secs: u64,

    /// Dimensionality of the hashed bag-of-words embedding
    pub embedding_dim: usize,

    /// Capacity of the working-memory active-context ring
    pub active_context_capacity: usize,

    /// Capacity of the working-memory recent-actions ring
    pub recent_actions_capacity: usize,

    /// Result cap applied when a query does not set one
    pub default_query_limit: usize,
}

impl MemoryConfig {
    /// Create a configuration rooted at `storage_root`
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    /// Set the flush interval
    pub fn with_flush_interval_secs(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    /// Set the embedding dimensionality
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Set the active-context capacity
    pub fn with_active_context_capacity(mut self, capacity: usize) -> Self {
        self.active_context_capacity = capacity;
        self
    }

    /// Set the recent-actions capacity
    pub fn with_recent_actions_capacity(mut self, capacity: usize) -> Self {
        self.recent_actions_capacity = capacity;
        self
    }

    /// Set the default query limit
    pub fn with_default_query_limit(mut self, limit: usize) -> Self {
        self.default_query_limit = limit;
        self
    }

    /// Reject configurations the store cannot run with
    pub fn validate(&self) -> MemoryResult<()> {
        if self.embedding_dim == 0 {
            return Err(MemoryError::validation(
                "embedding_dim",
                "must be greater than zero",
                "0",
            ));
        }
        if self.active_context_capacity == 0 {
            return Err(MemoryError::validation(
                "active_context_capacity",
                "must be greater than zero",
                "0",
            ));
        }
        if self.recent_actions_capacity == 0 {
            return Err(MemoryError::validation(
                "recent_actions_capacity",
                "must be greater than zero",
                "0",
            ));
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(".clipmind"),
            flush_interval_secs: 30,
            embedding_dim: 64,
            active_context_capacity: 50,
            recent_actions_capacity: 20,
            default_query_limit: 50,
        }
    }
}

/// Fractions of the token budget given to each segment kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetFractions {
    /// Instructions share
    pub instructions: f64,
    /// Conversation history share
    pub history: f64,
    /// Retrieved knowledge share
    pub knowledge: f64,
    /// Task / working-memory share
    pub task: f64,
}

impl Default for BudgetFractions {
    fn default() -> Self {
        Self {
            instructions: 0.2,
            history: 0.3,
            knowledge: 0.35,
            task: 0.15,
        }
    }
}

impl BudgetFractions {
    /// Sum of all fractions
    pub fn total(&self) -> f64 {
        self.instructions + self.history + self.knowledge + self.task
    }
}

/// Configuration for context assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudgetConfig {
    /// Token ceiling when the caller does not pass one
    pub max_tokens: usize,

    /// Budget split
    pub fractions: BudgetFractions,

    /// Capacity of the conversation ring before archiving
    pub history_capacity: usize,

    /// Length high-priority segments are cut to when they do not fit
    pub truncate_chars: usize,

    /// Number of knowledge candidates pulled from search and query
    pub knowledge_candidates: usize,
}

impl ContextBudgetConfig {
    /// Set the token ceiling
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the budget split
    pub fn with_fractions(mut self, fractions: BudgetFractions) -> Self {
        self.fractions = fractions;
        self
    }

    /// Set the conversation ring capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Fractions must be non-negative and sum to at most 1
    pub fn validate(&self) -> MemoryResult<()> {
        let f = &self.fractions;
        for (name, value) in [
            ("fractions.instructions", f.instructions),
            ("fractions.history", f.history),
            ("fractions.knowledge", f.knowledge),
            ("fractions.task", f.task),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::validation(
                    name,
                    "must be within [0, 1]",
                    value.to_string(),
                ));
            }
        }

        let total = f.total();
        if total > 1.0 + 1e-9 {
            return Err(MemoryError::validation(
                "fractions",
                "must sum to at most 1",
                format!("{:.3}", total),
            ));
        }

        if self.history_capacity < 2 {
            return Err(MemoryError::validation(
                "history_capacity",
                "must be at least 2",
                self.history_capacity.to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ContextBudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            fractions: BudgetFractions::default(),
            history_capacity: 50,
            truncate_chars: 200,
            knowledge_candidates: 20,
        }
    }
}
