//! Retrieval on top of the memory store
//!
//! Everything here is built from [`MemoryStore`] reads: weighted semantic
//! search with match reasons, similarity by example, token pattern matching,
//! recurring-pattern detection and fixed context lookups.

use crate::lexicon::{extract_keywords, infer_domain, Domain};
use crate::store::{MemoryStore, ScoredEntry};
use crate::types::{flatten_json, Importance, MemoryEntry, MemoryKind, QueryCriteria};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Candidates pulled from the store per semantic search
const SEMANTIC_CANDIDATES: usize = 100;

/// Entries scanned by pattern matching and detection
const PATTERN_CANDIDATES: usize = 200;

/// Maximum match reasons attached to a result
const MAX_REASONS: usize = 5;

/// Maximum contextual memories returned
const MAX_CONTEXTUAL: usize = 15;

/// Text query with an optional explicit domain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticQuery {
    /// Query text
    pub text: String,

    /// Domain override; inferred from the text when absent
    pub domain: Option<Domain>,

    /// Restrict candidates to a project
    pub project_id: Option<String>,
}

impl SemanticQuery {
    /// Query from text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Force a domain
    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Restrict to a project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Weights and cut-offs for semantic search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Weight of the recency score
    pub recency_weight: f64,
    /// Weight of the importance score
    pub importance_weight: f64,
    /// Weight of the access-frequency score
    pub frequency_weight: f64,
    /// Results below this score are dropped
    pub min_score: f64,
    /// Maximum results
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            recency_weight: 0.2,
            importance_weight: 0.25,
            frequency_weight: 0.15,
            min_score: 0.1,
            max_results: 10,
        }
    }
}

impl SearchOptions {
    /// Set the score cut-off
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    /// Set the result cap
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

/// A semantic search hit
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Matched entry
    pub entry: MemoryEntry,
    /// Combined score
    pub score: f64,
    /// Human-readable reasons for the match
    pub reasons: Vec<String>,
}

/// A token shared by several entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    /// Shared token
    pub token: String,
    /// Number of entries carrying it
    pub occurrences: usize,
    /// `min(occurrences / 5, 1)`
    pub confidence: f64,
    /// Ids of the entries carrying it
    pub entry_ids: Vec<String>,
}

/// Situations with a fixed set of relevant memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Working on motion
    Animation,
    /// Working on music and sound
    Audio,
    /// Structuring scenes
    Composition,
    /// Recovering from tool failures
    ErrorHandling,
    /// Starting or switching projects
    ProjectSetup,
}

struct ContextProfile {
    categories: &'static [&'static str],
    tags: &'static [&'static str],
    kinds: &'static [MemoryKind],
}

impl ContextKind {
    fn profile(&self) -> ContextProfile {
        use MemoryKind::*;
        match self {
            ContextKind::Animation => ContextProfile {
                categories: &["animation", "animation_pattern", "motion"],
                tags: &["animation", "motion", "transition"],
                kinds: &[Procedural, Semantic],
            },
            ContextKind::Audio => ContextProfile {
                categories: &["audio", "audio_scene_mapping", "sfx_pattern", "music"],
                tags: &["audio", "music", "sfx"],
                kinds: &[Procedural, Semantic],
            },
            ContextKind::Composition => ContextProfile {
                categories: &["composition", "composition_template", "structure"],
                tags: &["composition", "template", "scene"],
                kinds: &[Procedural, Semantic],
            },
            ContextKind::ErrorHandling => ContextProfile {
                categories: &["tool_error", "fallback_success", "rollback"],
                tags: &["error", "recovery"],
                kinds: &[Episodic, Procedural],
            },
            ContextKind::ProjectSetup => ContextProfile {
                categories: &["project", "project_setup", "preferences"],
                tags: &["project", "setup", "preference"],
                kinds: &[Semantic, Procedural],
            },
        }
    }
}

/// A memory relevant to a [`ContextKind`]
#[derive(Debug, Clone, PartialEq)]
pub struct ContextualMemory {
    /// The entry
    pub entry: MemoryEntry,
    /// 0.8 for category hits, 0.6 for tag hits
    pub confidence: f64,
}

/// Search engine over a shared store
#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<MemoryStore>,
}

impl RetrievalEngine {
    /// Create an engine over `store`
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Weighted keyword, recency, importance and frequency search
    pub fn semantic_search(
        &self,
        query: &SemanticQuery,
        options: &SearchOptions,
    ) -> Vec<RetrievalResult> {
        let keywords = extract_keywords(&query.text);
        let domain = query.domain.unwrap_or_else(|| infer_domain(&keywords));

        let mut criteria = QueryCriteria::new()
            .with_keywords(keywords.clone())
            .with_limit(SEMANTIC_CANDIDATES);
        if let Some(project) = &query.project_id {
            criteria = criteria.with_project(project.clone());
        }

        let now = self.store.now();
        let mut results: Vec<RetrievalResult> = self
            .store
            .query(&criteria)
            .into_iter()
            .map(|entry| score_entry(entry, &keywords, domain, now, options))
            .filter(|r| r.score >= options.min_score)
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.max_results);

        debug!(
            keywords = keywords.len(),
            domain = domain.as_str(),
            results = results.len(),
            "Semantic search"
        );
        results
    }

    /// Entries similar to an existing one (never including it)
    pub fn find_similar(&self, id: &str, options: &SearchOptions) -> Vec<RetrievalResult> {
        let Some(source) = self.store.peek(id) else {
            return Vec::new();
        };

        let mut text = source.text();
        for tag in &source.metadata.tags {
            text.push(' ');
            text.push_str(tag);
        }

        // Ask for one extra so dropping the source still fills the page
        let widened = SearchOptions {
            max_results: options.max_results + 1,
            ..*options
        };

        let mut results = self.semantic_search(&SemanticQuery::new(text), &widened);
        results.retain(|r| r.entry.id != id);
        results.truncate(options.max_results);
        results
    }

    /// Entries matching the tokens of a free-form pattern
    pub fn find_by_pattern(&self, pattern: &str) -> Vec<ScoredEntry> {
        let pattern = pattern.trim().to_lowercase();
        let tokens: Vec<&str> = pattern
            .split(|c: char| c.is_whitespace() || ",;:/|_.-".contains(c))
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let normalizer = tokens.len() as f64 * 5.0;

        let mut matches: Vec<ScoredEntry> = self
            .recent_candidates(&QueryCriteria::new())
            .into_iter()
            .filter_map(|entry| {
                let text = entry.text().to_lowercase();
                let category = entry.category.to_lowercase();
                let tags: Vec<String> = entry.metadata.tags.iter().map(|t| t.to_lowercase()).collect();

                let mut raw = 0.0;
                for token in &tokens {
                    if text.contains(token) {
                        raw += 2.0;
                    }
                    if category.contains(token) {
                        raw += 3.0;
                    }
                    if tags.iter().any(|t| t.contains(token)) {
                        raw += 2.0;
                    }
                }
                if text.contains(pattern.as_str()) {
                    raw += 5.0;
                }

                let score = raw / normalizer;
                (score > 0.1).then_some(ScoredEntry { entry, score })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches
    }

    /// Tokens shared by at least two recent entries
    pub fn detect_patterns(&self, category: Option<&str>) -> Vec<DetectedPattern> {
        let mut criteria = QueryCriteria::new();
        if let Some(category) = category {
            criteria = criteria.with_category(category);
        }

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.recent_candidates(&criteria) {
            for token in pattern_tokens(&entry) {
                groups.entry(token).or_default().push(entry.id.clone());
            }
        }

        let mut patterns: Vec<DetectedPattern> = groups
            .into_iter()
            .filter(|(_, ids)| ids.len() >= 2)
            .map(|(token, entry_ids)| DetectedPattern {
                occurrences: entry_ids.len(),
                confidence: (entry_ids.len() as f64 / 5.0).min(1.0),
                token,
                entry_ids,
            })
            .collect();

        patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then(a.token.cmp(&b.token)));
        patterns
    }

    /// Memories known to matter for a situation
    pub fn get_contextual_memories(
        &self,
        context: ContextKind,
        project_id: Option<&str>,
    ) -> Vec<ContextualMemory> {
        let profile = context.profile();
        let scoped = |criteria: QueryCriteria| match project_id {
            Some(project) => criteria.with_project(project),
            None => criteria,
        };

        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for category in profile.categories {
            let hits = self
                .store
                .query(&scoped(QueryCriteria::new().with_category(*category).with_limit(MAX_CONTEXTUAL)));
            for entry in hits {
                if profile.kinds.contains(&entry.kind) && seen.insert(entry.id.clone()) {
                    results.push(ContextualMemory {
                        entry,
                        confidence: 0.8,
                    });
                }
            }
        }

        let tagged = self.store.query(&scoped(
            QueryCriteria::new()
                .with_tags(profile.tags.iter().copied())
                .with_limit(MAX_CONTEXTUAL),
        ));
        for entry in tagged {
            if profile.kinds.contains(&entry.kind) && seen.insert(entry.id.clone()) {
                results.push(ContextualMemory {
                    entry,
                    confidence: 0.6,
                });
            }
        }

        results.truncate(MAX_CONTEXTUAL);
        results
    }

    fn recent_candidates(&self, criteria: &QueryCriteria) -> Vec<MemoryEntry> {
        let mut entries = self.store.list(criteria);
        let skip = entries.len().saturating_sub(PATTERN_CANDIDATES);
        entries.drain(..skip);
        entries
    }
}

fn importance_score(importance: Importance) -> f64 {
    match importance {
        Importance::Critical => 1.0,
        Importance::High => 0.75,
        Importance::Medium => 0.5,
        Importance::Low => 0.25,
    }
}

fn score_entry(
    entry: MemoryEntry,
    keywords: &[String],
    domain: Domain,
    now: DateTime<Utc>,
    options: &SearchOptions,
) -> RetrievalResult {
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

    let matched: Vec<&String> = keywords
        .iter()
        .filter(|k| haystack.contains(k.as_str()))
        .collect();
    let keyword_score = if keywords.is_empty() {
        0.0
    } else {
        matched.len() as f64 / keywords.len() as f64
    };

    let age_days = entry.age_hours(now) / 24.0;
    let recency_score = (1.0 - age_days / 30.0).max(0.0);
    let importance = importance_score(entry.metadata.importance);
    let frequency_score = (entry.metadata.access_count as f64 / 10.0).min(1.0);

    let domain_bonus = if domain == Domain::General {
        0.0
    } else if entry.category == domain.as_str() || entry.has_tag(domain.as_str()) {
        0.1
    } else if domain.lexicon().iter().any(|w| haystack.contains(w)) {
        0.05
    } else {
        0.0
    };

    let score = 0.4 * keyword_score
        + options.recency_weight * recency_score
        + options.importance_weight * importance
        + options.frequency_weight * frequency_score
        + domain_bonus;

    let mut reasons = Vec::new();
    if !matched.is_empty() {
        reasons.push(format!(
            "matched keywords: {}",
            matched.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }
    if domain_bonus > 0.0 {
        reasons.push(format!("{} domain", domain));
    }
    if recency_score > 0.8 {
        reasons.push("recently created".to_string());
    }
    if entry.metadata.importance.is_elevated() {
        reasons.push(format!("{} importance", entry.metadata.importance.as_str()));
    }
    if frequency_score >= 0.5 {
        reasons.push(format!("accessed {} times", entry.metadata.access_count));
    }
    reasons.truncate(MAX_REASONS);

    RetrievalResult {
        entry,
        score,
        reasons,
    }
}

fn pattern_tokens(entry: &MemoryEntry) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();

    collect_json_tokens(&entry.content.to_json(), &mut tokens);
    tokens.insert(entry.category.to_lowercase());
    tokens.extend(entry.metadata.tags.iter().map(|t| t.to_lowercase()));

    tokens
}

fn collect_json_tokens(value: &Value, tokens: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                if key.chars().count() > 3 {
                    tokens.insert(key.to_lowercase());
                }
                collect_json_tokens(item, tokens);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_json_tokens(item, tokens)),
        Value::String(s) => {
            let len = s.chars().count();
            if (4..50).contains(&len) {
                tokens.insert(s.to_lowercase());
            }
        }
        other => {
            let mut scalars = Vec::new();
            flatten_json(other, &mut scalars);
            tokens.extend(scalars.into_iter().filter(|s| (4..50).contains(&s.len())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MemoryConfig;
    use crate::storage::InMemoryStorage;
    use crate::store::StoreOptions;
    use crate::types::{MemoryContent, StoreRequest};
    use serde_json::json;

    async fn engine() -> (RetrievalEngine, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(
            MemoryStore::open_with(
                MemoryConfig::default().with_flush_interval_secs(0),
                StoreOptions::new()
                    .with_backend(Arc::new(InMemoryStorage::new()))
                    .with_clock(clock.clone()),
            )
            .await
            .unwrap(),
        );
        (RetrievalEngine::new(store.clone()), store, clock)
    }

    async fn put(
        store: &MemoryStore,
        kind: MemoryKind,
        category: &str,
        content: MemoryContent,
        request: StoreRequest,
    ) -> String {
        store.store(kind, category, content, request).await.unwrap()
    }

    #[tokio::test]
    async fn test_semantic_search_ranks_keyword_matches() {
        let (engine, store, _) = engine().await;

        let fade = put(
            &store,
            MemoryKind::Procedural,
            "animation",
            MemoryContent::text("Slow fade transition works well for intros"),
            StoreRequest::new(Importance::High).with_tags(["animation"]),
        )
        .await;
        put(
            &store,
            MemoryKind::Semantic,
            "brand",
            MemoryContent::text("Client prefers teal backgrounds"),
            StoreRequest::new(Importance::Low),
        )
        .await;

        let results = engine.semantic_search(
            &SemanticQuery::new("fade transition for the intro"),
            &SearchOptions::default(),
        );

        assert_eq!(results[0].entry.id, fade);
        assert!(results[0].score > 0.8);
        assert!(results[0].reasons.len() <= MAX_REASONS);
        assert!(results[0].reasons[0].starts_with("matched keywords"));
        assert!(results.iter().all(|r| r.score >= 0.1));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_semantic_search_recency_decays_over_thirty_days() {
        let (engine, store, clock) = engine().await;

        let old = put(
            &store,
            MemoryKind::Semantic,
            "content",
            MemoryContent::text("narration pacing notes"),
            StoreRequest::new(Importance::Medium),
        )
        .await;
        clock.advance(chrono::Duration::days(40));
        let new = put(
            &store,
            MemoryKind::Semantic,
            "content",
            MemoryContent::text("narration pacing notes"),
            StoreRequest::new(Importance::Medium),
        )
        .await;

        let results = engine.semantic_search(
            &SemanticQuery::new("narration pacing"),
            &SearchOptions::default(),
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.id, new);
        assert_eq!(results[1].entry.id, old);
        assert!((results[0].score - results[1].score - 0.2).abs() < 0.02);
    }

    #[tokio::test]
    async fn test_find_similar_excludes_source() {
        let (engine, store, _) = engine().await;

        let source = put(
            &store,
            MemoryKind::Procedural,
            "animation",
            MemoryContent::text("bounce easing on logo reveal"),
            StoreRequest::default().with_tags(["logo"]),
        )
        .await;
        let sibling = put(
            &store,
            MemoryKind::Procedural,
            "animation",
            MemoryContent::text("bounce easing on title reveal"),
            StoreRequest::default(),
        )
        .await;

        let results = engine.find_similar(&source, &SearchOptions::default());
        assert!(results.iter().all(|r| r.entry.id != source));
        assert_eq!(results[0].entry.id, sibling);

        assert!(engine.find_similar("missing", &SearchOptions::default()).is_empty());
    }

    #[tokio::test]
    async fn test_find_by_pattern() {
        let (engine, store, _) = engine().await;

        let exact = put(
            &store,
            MemoryKind::Procedural,
            "transition",
            MemoryContent::text("use slide-in for lower thirds"),
            StoreRequest::default().with_tags(["slide"]),
        )
        .await;
        put(
            &store,
            MemoryKind::Semantic,
            "misc",
            MemoryContent::text("unrelated words"),
            StoreRequest::default(),
        )
        .await;

        let matches = engine.find_by_pattern("slide-in");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry.id, exact);
        // slide: text 2 + tag 2, in: text 2, exact 5 => 11 / 10
        assert!((matches[0].score - 1.1).abs() < 1e-9);

        assert!(engine.find_by_pattern(" - ").is_empty());
    }

    #[tokio::test]
    async fn test_detect_patterns() {
        let (engine, store, _) = engine().await;

        for scene in ["intro", "outro", "intro"] {
            put(
                &store,
                MemoryKind::Procedural,
                "animation_pattern",
                MemoryContent::Json(json!({"scene_type": scene, "easing": "ease-out"})),
                StoreRequest::default(),
            )
            .await;
        }

        let patterns = engine.detect_patterns(Some("animation_pattern"));
        let by_token: BTreeMap<_, _> = patterns.iter().map(|p| (p.token.as_str(), p)).collect();

        assert_eq!(by_token["ease-out"].occurrences, 3);
        assert!((by_token["ease-out"].confidence - 0.6).abs() < 1e-9);
        assert_eq!(by_token["scene_type"].occurrences, 3);
        assert_eq!(by_token["intro"].occurrences, 2);
        assert!(!by_token.contains_key("outro"));
    }

    #[tokio::test]
    async fn test_contextual_memories() {
        let (engine, store, _) = engine().await;

        let error = put(
            &store,
            MemoryKind::Episodic,
            "tool_error",
            MemoryContent::text("render timed out"),
            StoreRequest::default(),
        )
        .await;
        let tagged = put(
            &store,
            MemoryKind::Procedural,
            "notes",
            MemoryContent::text("retry with lower resolution"),
            StoreRequest::default().with_tags(["recovery"]),
        )
        .await;
        put(
            &store,
            MemoryKind::Semantic,
            "tool_error",
            MemoryContent::text("wrong kind"),
            StoreRequest::default(),
        )
        .await;

        let memories = engine.get_contextual_memories(ContextKind::ErrorHandling, None);
        assert_eq!(memories.len(), 2);
        assert_eq!(memories[0].entry.id, error);
        assert!((memories[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(memories[1].entry.id, tagged);
        assert!((memories[1].confidence - 0.6).abs() < 1e-9);
    }
}
