//! Indexed memory store
//!
//! [`MemoryStore`] is the authoritative collection of [`MemoryEntry`]s. The
//! whole index lives behind one mutex because every read also updates access
//! metadata. The lock is never held across an `.await`: embeddings are
//! computed before it is taken and flushes snapshot under it and write
//! outside it. Flushes themselves are serialized by an async guard so an
//! older snapshot can never land after a newer one.
//!
//! The index is persisted as one JSON array at `global_memory/index.json`
//! under the storage root. A background task flushes it on an interval
//! whenever it is dirty; [`MemoryStore::shutdown`] stops the task and does a
//! final flush.

use crate::clock::{Clock, SystemClock};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::storage::{FileStorage, StorageBackend};
use crate::types::{
    EntryMetadata, MemoryContent, MemoryEntry, MemoryKind, QueryCriteria, StoreRequest,
};
use crate::vector::{EmbeddingProvider, HashEmbeddingProvider};
use crate::working::WorkingMemory;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Directory holding the persisted index
pub const MEMORY_DIR: &str = "global_memory";

/// Key of the persisted index
pub const INDEX_KEY: &str = "global_memory/index.json";

/// Length of summaries pushed into the active context
const ACTIVE_CONTEXT_SUMMARY_CHARS: usize = 120;

static OPEN_LOCATIONS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Collaborators injected into a store
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Storage backend (defaults to [`FileStorage`] at the configured root)
    pub backend: Option<Arc<dyn StorageBackend>>,

    /// Time source (defaults to [`SystemClock`])
    pub clock: Option<Arc<dyn Clock>>,

    /// Embedding backend (defaults to [`HashEmbeddingProvider`])
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl StoreOptions {
    /// Default collaborators
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific storage backend
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use a specific clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a specific embedding provider
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }
}

/// An entry with the score it was ranked by
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    /// The entry (as of the read)
    pub entry: MemoryEntry,

    /// Ranking score
    pub score: f64,
}

pub(crate) struct StoreState {
    pub(crate) entries: BTreeMap<String, MemoryEntry>,
    pub(crate) working: WorkingMemory,
    pub(crate) dirty: bool,
}

pub(crate) struct StoreInner {
    pub(crate) state: Mutex<StoreState>,
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) config: MemoryConfig,
    flush_guard: tokio::sync::Mutex<()>,
    location: String,
    registered: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl StoreInner {
    /// Write the index if it changed since the last flush
    pub(crate) async fn flush_if_dirty(&self) -> MemoryResult<bool> {
        // Held across snapshot and write
        let _flushing = self.flush_guard.lock().await;

        let bytes = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(false);
            }
            let entries: Vec<&MemoryEntry> = state.entries.values().collect();
            let bytes = serde_json::to_vec_pretty(&entries)
                .map_err(|e| MemoryError::serialization("memory_index", e))?;
            state.dirty = false;
            bytes
        };

        match self.backend.write(INDEX_KEY, &bytes).await {
            Ok(()) => {
                debug!(location = %self.location, bytes = bytes.len(), "Flushed memory index");
                Ok(true)
            }
            Err(e) => {
                self.state.lock().dirty = true;
                Err(e)
            }
        }
    }

    fn release(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            OPEN_LOCATIONS.lock().remove(&self.location);
        }
    }

    pub(crate) fn ensure_open(&self) -> MemoryResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MemoryError::Closed);
        }
        Ok(())
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(embedding) => Some(embedding.vector),
            Err(e) => {
                warn!(error = %e, "Embedding failed, storing entry without a vector");
                None
            }
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// The indexed memory store
pub struct MemoryStore {
    pub(crate) inner: Arc<StoreInner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Open a store persisted under `config.storage_root`
    pub async fn open(config: MemoryConfig) -> MemoryResult<Self> {
        Self::open_with(config, StoreOptions::default()).await
    }

    /// Open a store with injected collaborators
    pub async fn open_with(config: MemoryConfig, options: StoreOptions) -> MemoryResult<Self> {
        config.validate()?;

        let backend = options
            .backend
            .unwrap_or_else(|| Arc::new(FileStorage::new(config.storage_root.clone())));
        let clock = options.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let embedder = options
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbeddingProvider::new(config.embedding_dim)));

        backend.create_dir_all(MEMORY_DIR).await?;

        let location = backend.location();
        if !OPEN_LOCATIONS.lock().insert(location.clone()) {
            return Err(MemoryError::AlreadyOpen { location });
        }

        let entries = load_index(backend.as_ref()).await;
        info!(location = %location, entries = entries.len(), "Opened memory store");

        let working = WorkingMemory::new(
            config.recent_actions_capacity,
            config.active_context_capacity,
        );

        let inner = Arc::new(StoreInner {
            state: Mutex::new(StoreState {
                entries,
                working,
                dirty: false,
            }),
            backend,
            clock,
            embedder,
            flush_guard: tokio::sync::Mutex::new(()),
            location,
            registered: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            config,
        });

        let flusher = match inner.config.flush_interval_secs {
            0 => None,
            secs => Some(spawn_flusher(
                Arc::downgrade(&inner),
                inner.shutdown.clone(),
                Duration::from_secs(secs),
            )),
        };

        Ok(Self {
            inner,
            flusher: Mutex::new(flusher),
        })
    }

    /// Store configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    /// Storage location this store holds
    pub fn location(&self) -> &str {
        &self.inner.location
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether there are unflushed changes
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// Whether [`MemoryStore::shutdown`] has run
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Store a new entry and return its id
    pub async fn store(
        &self,
        kind: MemoryKind,
        category: impl Into<String>,
        content: MemoryContent,
        request: StoreRequest,
    ) -> MemoryResult<String> {
        self.inner.ensure_open()?;

        let category = category.into();
        let embedding = self.inner.embed(&content.searchable_text()).await;

        let mut state = self.inner.state.lock();
        let now = self.inner.clock.now();
        let id = uuid::Uuid::now_v7().to_string();

        let entry = MemoryEntry {
            id: id.clone(),
            kind,
            category,
            content,
            metadata: EntryMetadata {
                created_at: now,
                importance: request.importance,
                access_count: 0,
                last_accessed: now,
                tags: request.tags.into_iter().collect(),
                project_id: state.working.project_id.clone(),
                related_ids: request.related_ids,
            },
            embedding,
        };

        if entry.metadata.importance.is_elevated() {
            state
                .working
                .push_context(entry.summary(ACTIVE_CONTEXT_SUMMARY_CHARS));
        }

        debug!(
            id = %id,
            kind = entry.kind.as_str(),
            category = %entry.category,
            importance = entry.metadata.importance.as_str(),
            "Stored memory"
        );

        state.entries.insert(id.clone(), entry);
        state.dirty = true;

        Ok(id)
    }

    /// Fetch an entry, recording the access
    pub fn get(&self, id: &str) -> Option<MemoryEntry> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        let entry = state.entries.get_mut(id)?;
        entry.touch(now);
        let entry = entry.clone();
        state.dirty = true;
        Some(entry)
    }

    /// Fetch an entry without recording the access
    pub fn peek(&self, id: &str) -> Option<MemoryEntry> {
        self.inner.state.lock().entries.get(id).cloned()
    }

    /// Entries passing the criteria filters, oldest first, without touching them
    pub fn list(&self, criteria: &QueryCriteria) -> Vec<MemoryEntry> {
        let state = self.inner.state.lock();
        let matching = state.entries.values().filter(|e| criteria.matches(e)).cloned();
        match criteria.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Filter, rank by relevance and touch the returned entries
    pub fn query(&self, criteria: &QueryCriteria) -> Vec<MemoryEntry> {
        self.query_scored(criteria)
            .into_iter()
            .map(|scored| scored.entry)
            .collect()
    }

    /// Like [`MemoryStore::query`] but keeps the relevance scores
    pub fn query_scored(&self, criteria: &QueryCriteria) -> Vec<ScoredEntry> {
        let now = self.inner.clock.now();
        let keywords: Vec<String> = criteria.keywords.iter().map(|k| k.to_lowercase()).collect();
        let limit = criteria.limit.unwrap_or(self.inner.config.default_query_limit);

        let mut state = self.inner.state.lock();

        let mut ranked: Vec<(String, f64)> = state
            .entries
            .values()
            .filter(|e| criteria.matches(e))
            .map(|e| (e.id.clone(), relevance(e, now, &keywords)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit);

        let results = touch_all(&mut state.entries, ranked, now);
        if !results.is_empty() {
            state.dirty = true;
        }
        results
    }

    /// Keyword search over text, tags and category
    pub fn search(&self, keywords: &[String], limit: usize) -> Vec<ScoredEntry> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() || limit == 0 {
            return Vec::new();
        }

        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();

        let mut ranked: Vec<(String, f64)> = state
            .entries
            .values()
            .map(|e| (e.id.clone(), keyword_score(e, &keywords)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit);

        let results = touch_all(&mut state.entries, ranked, now);
        if !results.is_empty() {
            state.dirty = true;
        }
        results
    }

    /// Shallow-merge a JSON object into an entry's content
    ///
    /// Returns `Ok(false)` for an unknown id. A merge that leaves the content
    /// invalid is rejected and the entry is left unchanged.
    pub async fn update(&self, id: &str, partial: &Map<String, Value>) -> MemoryResult<bool> {
        self.inner.ensure_open()?;

        let text = {
            let now = self.inner.clock.now();
            let mut state = self.inner.state.lock();
            let Some(entry) = state.entries.get_mut(id) else {
                return Ok(false);
            };

            let mut content = entry.content.clone();
            content.merge(partial)?;
            entry.content = content;
            entry.mark_accessed(now);

            let text = entry.text();
            state.dirty = true;
            text
        };

        self.refresh_embedding(id, &text).await;
        debug!(id = %id, fields = partial.len(), "Updated memory");
        Ok(true)
    }

    /// Replace an entry's content wholesale
    pub async fn replace_content(&self, id: &str, content: MemoryContent) -> MemoryResult<bool> {
        self.inner.ensure_open()?;

        let text = content.searchable_text();
        {
            let now = self.inner.clock.now();
            let mut state = self.inner.state.lock();
            let Some(entry) = state.entries.get_mut(id) else {
                return Ok(false);
            };
            entry.content = content;
            entry.mark_accessed(now);
            state.dirty = true;
        }

        self.refresh_embedding(id, &text).await;
        Ok(true)
    }

    /// Add tags to an entry
    pub fn add_tags<I, S>(&self, id: &str, tags: I) -> MemoryResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.ensure_open()?;

        let mut state = self.inner.state.lock();
        let Some(entry) = state.entries.get_mut(id) else {
            return Ok(false);
        };
        entry.metadata.tags.extend(tags.into_iter().map(Into::into));
        state.dirty = true;
        Ok(true)
    }

    /// Delete an entry
    pub fn delete(&self, id: &str) -> MemoryResult<bool> {
        self.inner.ensure_open()?;

        let mut state = self.inner.state.lock();
        let removed = state.entries.remove(id).is_some();
        if removed {
            state.dirty = true;
            debug!(id = %id, "Deleted memory");
        }
        Ok(removed)
    }

    /// Write the index now if it has unflushed changes
    pub async fn flush(&self) -> MemoryResult<bool> {
        self.inner.ensure_open()?;
        self.inner.flush_if_dirty().await
    }

    /// Stop background flushing, flush once more and release the location
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> MemoryResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.shutdown.cancel();
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Memory flusher task ended abnormally");
            }
        }

        let result = self.inner.flush_if_dirty().await;
        self.inner.release();

        match &result {
            Ok(_) => info!(location = %self.inner.location, "Memory store shut down"),
            Err(e) => warn!(
                location = %self.inner.location,
                error = %e,
                "Final flush failed during shutdown"
            ),
        }

        result.map(|_| ())
    }

    /// Switch project and rebuild working memory from stored entries
    pub fn set_project(&self, project_id: impl Into<String>) {
        let project_id = project_id.into();
        let mut state = self.inner.state.lock();

        let mut owned: Vec<&MemoryEntry> = state
            .entries
            .values()
            .filter(|e| e.metadata.project_id.as_deref() == Some(project_id.as_str()))
            .collect();
        owned.sort_by_key(|e| e.metadata.created_at);

        let mut working = WorkingMemory::new(
            self.inner.config.recent_actions_capacity,
            self.inner.config.active_context_capacity,
        );
        working.reset(Some(project_id.clone()));

        for entry in owned {
            if entry.metadata.importance.is_elevated() {
                working.push_context(entry.summary(ACTIVE_CONTEXT_SUMMARY_CHARS));
            }
            if let MemoryContent::Action { action, success } = &entry.content {
                working.push_action(action.clone(), *success, entry.metadata.created_at);
            }
        }

        info!(
            project_id = %project_id,
            active_context = working.active_context.len(),
            recent_actions = working.recent_actions.len(),
            "Switched project"
        );
        state.working = working;
    }

    /// Set or clear the current task
    pub fn set_current_task(&self, task: Option<String>) {
        self.inner.state.lock().working.current_task = task;
    }

    /// Record an action in working memory
    pub fn push_action(&self, action: impl Into<String>, success: bool) {
        let now = self.inner.clock.now();
        self.inner.state.lock().working.push_action(action, success, now);
    }

    /// Snapshot of working memory
    pub fn working(&self) -> WorkingMemory {
        self.inner.state.lock().working.clone()
    }

    async fn refresh_embedding(&self, id: &str, text: &str) {
        let embedding = self.inner.embed(text).await;
        if let Some(entry) = self.inner.state.lock().entries.get_mut(id) {
            entry.embedding = embedding;
        }
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        if !self.is_closed() && self.is_dirty() {
            warn!(
                location = %self.inner.location,
                "Memory store dropped with unflushed changes"
            );
        }
        self.inner.release();
    }
}

/// Relevance used by `query` and `consolidate`
///
/// importance weight + max(0, 50 - ageHours * 0.5) + min(accessCount * 2, 30)
/// + 10 per matched keyword (capped at 30). `keywords` must be lowercase.
pub fn relevance(entry: &MemoryEntry, now: DateTime<Utc>, keywords: &[String]) -> f64 {
    let importance = entry.metadata.importance.weight();
    let recency = (50.0 - entry.age_hours(now) * 0.5).max(0.0);
    let frequency = (entry.metadata.access_count as f64 * 2.0).min(30.0);

    let keyword_bonus = if keywords.is_empty() {
        0.0
    } else {
        let haystack = format!(
            "{} {} {}",
            entry.text().to_lowercase(),
            entry.category.to_lowercase(),
            entry
                .metadata
                .tags
                .iter()
                .map(|t| t.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let matched = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
        (matched as f64 * 10.0).min(30.0)
    };

    importance + recency + frequency + keyword_bonus
}

/// Keyword presence score used by `search`; `keywords` must be lowercase
pub fn keyword_score(entry: &MemoryEntry, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }

    let text = entry.text().to_lowercase();
    let category = entry.category.to_lowercase();

    let total: f64 = keywords
        .iter()
        .map(|keyword| {
            let mut score = 0.0;
            if text.contains(keyword.as_str()) {
                score += 2.0;
            }
            if entry
                .metadata
                .tags
                .iter()
                .any(|t| t.to_lowercase().contains(keyword.as_str()))
            {
                score += 3.0;
            }
            if category.contains(keyword.as_str()) {
                score += 2.0;
            }
            score
        })
        .sum();

    total / keywords.len() as f64
}

fn touch_all(
    entries: &mut BTreeMap<String, MemoryEntry>,
    ranked: Vec<(String, f64)>,
    now: DateTime<Utc>,
) -> Vec<ScoredEntry> {
    ranked
        .into_iter()
        .filter_map(|(id, score)| {
            let entry = entries.get_mut(&id)?;
            entry.touch(now);
            Some(ScoredEntry {
                entry: entry.clone(),
                score,
            })
        })
        .collect()
}

async fn load_index(backend: &dyn StorageBackend) -> BTreeMap<String, MemoryEntry> {
    let bytes = match backend.read(INDEX_KEY).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return BTreeMap::new(),
        Err(e) => {
            warn!(error = %e, "Could not read memory index, starting empty");
            return BTreeMap::new();
        }
    };

    match serde_json::from_slice::<Vec<MemoryEntry>>(&bytes) {
        Ok(entries) => entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        Err(e) => {
            warn!(error = %e, "Memory index is corrupt, starting empty");
            BTreeMap::new()
        }
    }
}

fn spawn_flusher(
    inner: Weak<StoreInner>,
    token: CancellationToken,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        // The first tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    if let Err(e) = inner.flush_if_dirty().await {
                        warn!(error = %e, "Background flush failed, retrying next tick");
                    }
                }
                _ = token.cancelled() => {
                    debug!("Stopping memory flusher");
                    break;
                }
            }
        }
    })
}
