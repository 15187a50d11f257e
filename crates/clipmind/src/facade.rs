//! The `ClipMind` handle
//!
//! One explicit handle wires the memory store, retrieval engine, context
//! budgeter, the three learners and the recovery coordinator together. It is
//! constructed once per storage root and passed to the agent loop.

use crate::config::ClipMindConfig;
use crate::events::{LearnerKind, LearningEvent};
use chrono::Duration;
use clipmind_learn::{AudioLearner, CompositionLearner, MotionLearner, LEARNED_SCHEMAS};
use clipmind_memory::{
    BuiltContext, ContextBudgeter, Importance, MemoryContent, MemoryKind, MemoryResult,
    MemoryStore, MessageRole, RetrievalEngine, ScoredEntry, StoreOptions, StoreRequest,
    StoreStats,
};
use clipmind_recovery::{
    ErrorRecoveryCoordinator, ErrorStats, RecoveryOutcome, ToolExecutor, ToolFailure,
    RECOVERY_SCHEMAS,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Category of actions recorded through [`ClipMind::record_action`]
pub const ACTION_CATEGORY: &str = "action";

/// Number of records each learner holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerCounts {
    /// Animation patterns
    pub motion_patterns: usize,
    /// Music mappings
    pub music_mappings: usize,
    /// Sound effects
    pub sfx_patterns: usize,
    /// Composition templates
    pub templates: usize,
}

/// Combined statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMindStats {
    /// Memory store contents
    pub memory: StoreStats,
    /// Tool failure history
    pub errors: ErrorStats,
    /// Learner catalog sizes
    pub learners: LearnerCounts,
    /// Messages in the conversation ring
    pub conversation_messages: usize,
    /// Current project
    pub project_id: Option<String>,
}

/// What [`ClipMind::cleanup`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Old low-importance entries removed
    pub expired: usize,
    /// Entries removed by consolidation
    pub consolidated: usize,
}

impl CleanupReport {
    /// Total entries removed
    pub fn total(&self) -> usize {
        self.expired + self.consolidated
    }
}

/// Agent memory handle
pub struct ClipMind {
    config: ClipMindConfig,
    store: Arc<MemoryStore>,
    retrieval: RetrievalEngine,
    context: ContextBudgeter,
    motion: MotionLearner,
    audio: AudioLearner,
    composition: CompositionLearner,
    recovery: ErrorRecoveryCoordinator,
    project_root: Mutex<Option<PathBuf>>,
}

impl ClipMind {
    /// Open memory under `storage_root` with default settings
    pub async fn initialize(storage_root: impl Into<PathBuf>) -> MemoryResult<Self> {
        Self::initialize_with(ClipMindConfig::new(storage_root), StoreOptions::new()).await
    }

    /// Open memory with explicit configuration and store options
    ///
    /// Fails with `AlreadyOpen` when another handle owns the same storage
    /// location in this process.
    pub async fn initialize_with(
        config: ClipMindConfig,
        options: StoreOptions,
    ) -> MemoryResult<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::open_with(config.memory.clone(), options).await?);
        let context = ContextBudgeter::new(store.clone(), config.context.clone())?;

        let memory = Self {
            retrieval: RetrievalEngine::new(store.clone()),
            context,
            motion: MotionLearner::new(store.clone(), config.learners.motion),
            audio: AudioLearner::new(store.clone(), config.learners.audio),
            composition: CompositionLearner::new(store.clone(), config.learners.composition),
            recovery: ErrorRecoveryCoordinator::new(store.clone(), config.recovery.clone()),
            project_root: Mutex::new(None),
            store,
            config,
        };

        let seeded = memory.motion.initialize().await?
            + memory.audio.initialize().await?
            + memory.composition.initialize().await?;

        info!(
            location = %memory.store.location(),
            entries = memory.store.len(),
            seeded,
            "ClipMind initialized"
        );
        Ok(memory)
    }

    /// Switch to a project and rebuild working memory for it
    pub fn set_project_context(
        &self,
        project_id: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) {
        let project_root = project_root.into();
        debug!(root = %project_root.display(), "Setting project root");
        *self.project_root.lock() = Some(project_root);
        self.store.set_project(project_id);
    }

    /// Root directory of the current project
    pub fn project_root(&self) -> Option<PathBuf> {
        self.project_root.lock().clone()
    }

    /// Set or clear the task the agent is working on
    pub fn set_current_task(&self, task: Option<String>) {
        self.store.set_current_task(task);
    }

    /// Context string for a generator prompt
    pub fn get_context_for_ai(&self, prompt: &str) -> String {
        self.build_context(prompt).text
    }

    /// Full context assembly result for a prompt
    pub fn build_context(&self, prompt: &str) -> BuiltContext {
        self.context.build_context(prompt, None)
    }

    /// Feed a learning event to the matching learner
    ///
    /// Returns the id of the record that was created or updated, or `None`
    /// for a usage report naming an unknown record.
    pub async fn learn(&self, event: LearningEvent) -> MemoryResult<Option<String>> {
        let name = event.name();
        let id = match event {
            LearningEvent::MotionSuccess { pattern, feedback } => {
                Some(self.motion.learn_from_success(pattern, feedback).await?)
            }
            LearningEvent::MusicSuccess { mapping, feedback } => {
                Some(self.audio.learn_music_success(mapping, feedback).await?)
            }
            LearningEvent::SfxSuccess { pattern, feedback } => {
                Some(self.audio.learn_sfx_success(pattern, feedback).await?)
            }
            LearningEvent::CompositionSuccess { template, feedback } => {
                Some(self.composition.learn_from_success(template, feedback).await?)
            }
            LearningEvent::Usage {
                learner,
                id,
                success,
                feedback,
            } => {
                let known = match learner {
                    LearnerKind::Motion => self.motion.record_usage(&id, success, feedback).await?,
                    LearnerKind::Music => {
                        self.audio.record_music_usage(&id, success, feedback).await?
                    }
                    LearnerKind::Sfx => self.audio.record_sfx_usage(&id, success, feedback).await?,
                    LearnerKind::Composition => {
                        self.composition.record_usage(&id, success, feedback).await?
                    }
                };
                known.then_some(id)
            }
            LearningEvent::Insight {
                category,
                text,
                importance,
                tags,
            } => Some(
                self.store
                    .store(
                        MemoryKind::Semantic,
                        category,
                        MemoryContent::text(text),
                        StoreRequest::new(importance).with_tags(tags),
                    )
                    .await?,
            ),
        };

        debug!(event = name, id = ?id, "Processed learning event");
        Ok(id)
    }

    /// Record an agent action in working memory and the store
    pub async fn record_action(
        &self,
        action: impl Into<String>,
        success: bool,
    ) -> MemoryResult<String> {
        let action = action.into();
        self.store.push_action(action.clone(), success);

        let importance = if success {
            Importance::Low
        } else {
            Importance::Medium
        };
        let outcome = if success { "success" } else { "failure" };

        self.store
            .store(
                MemoryKind::Procedural,
                ACTION_CATEGORY,
                MemoryContent::action(action, success),
                StoreRequest::new(importance).with_tags([outcome]),
            )
            .await
    }

    /// Append a conversation message; returns the archive id when the ring overflowed
    pub async fn add_to_history(
        &self,
        role: MessageRole,
        content: impl Into<String>,
    ) -> MemoryResult<Option<String>> {
        self.context.add_message(role, content).await
    }

    /// Keyword search over the store
    pub fn search(&self, keywords: &[String]) -> Vec<ScoredEntry> {
        self.store.search(keywords, self.config.memory.default_query_limit)
    }

    /// Store an entry directly
    pub async fn store(
        &self,
        kind: MemoryKind,
        category: impl Into<String>,
        content: MemoryContent,
        request: StoreRequest,
    ) -> MemoryResult<String> {
        self.store.store(kind, category, content, request).await
    }

    /// Record a tool failure and recover from it
    pub async fn recover(
        &self,
        tool: &str,
        args: Value,
        failure: &ToolFailure,
        executor: &dyn ToolExecutor,
    ) -> MemoryResult<RecoveryOutcome> {
        let outcome = self.recovery.recover(tool, args, failure, executor).await?;
        self.store.push_action(
            format!("recover {} ({})", tool, outcome.plan.strategy.as_str()),
            outcome.is_success(),
        );
        Ok(outcome)
    }

    /// Combined statistics
    pub fn get_stats(&self) -> ClipMindStats {
        ClipMindStats {
            memory: self.store.stats(),
            errors: self.recovery.get_error_stats(),
            learners: LearnerCounts {
                motion_patterns: self.motion.patterns().len(),
                music_mappings: self.audio.music().all().len(),
                sfx_patterns: self.audio.sfx().all().len(),
                templates: self.composition.templates().len(),
            },
            conversation_messages: self.context.history().len(),
            project_id: self.store.working().project_id,
        }
    }

    /// Remove expired entries, then consolidate oversized groups
    ///
    /// Learned catalogs and recovery records are never consolidated.
    pub async fn cleanup(&self) -> MemoryResult<CleanupReport> {
        self.cleanup_older_than(Duration::days(self.config.cleanup_max_age_days))
            .await
    }

    /// Like [`ClipMind::cleanup`] with an explicit age
    pub async fn cleanup_older_than(&self, max_age: Duration) -> MemoryResult<CleanupReport> {
        let protected: Vec<&str> = LEARNED_SCHEMAS
            .into_iter()
            .chain(RECOVERY_SCHEMAS)
            .collect();
        let report = CleanupReport {
            expired: self.store.cleanup(max_age).await?,
            consolidated: self.store.consolidate_excluding(&protected).await?,
        };
        info!(
            expired = report.expired,
            consolidated = report.consolidated,
            "Cleanup finished"
        );
        Ok(report)
    }

    /// Cancel pending retries, flush and release the storage location
    pub async fn shutdown(&self) -> MemoryResult<()> {
        self.recovery.cancel();
        self.store.shutdown().await
    }

    /// Configuration in use
    pub fn config(&self) -> &ClipMindConfig {
        &self.config
    }

    /// Memory store
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Retrieval engine
    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    /// Context budgeter
    pub fn context(&self) -> &ContextBudgeter {
        &self.context
    }

    /// Motion learner
    pub fn motion(&self) -> &MotionLearner {
        &self.motion
    }

    /// Audio learner
    pub fn audio(&self) -> &AudioLearner {
        &self.audio
    }

    /// Composition learner
    pub fn composition(&self) -> &CompositionLearner {
        &self.composition
    }

    /// Recovery coordinator
    pub fn recovery(&self) -> &ErrorRecoveryCoordinator {
        &self.recovery
    }
}
