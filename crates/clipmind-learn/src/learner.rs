//! Generic feedback-driven learner
//!
//! A [`Learner`] keeps records of one [`LearnedRecord`] type in the memory
//! store and turns feedback into a success score:
//!
//! - new observations start at `feedback / 5`
//! - repeat observations and rated usage blend in with an EMA
//! - unrated usage nudges the score up 5% on success, down 5% on failure
//!
//! Recommendations start from the success score and add boosts computed by
//! the domain learner; [`Learner::finalize`] clamps, sorts and truncates them.

use crate::records::{
    feedback_score, normalize_feedback, push_evidence, Evidence, LearnedRecord, RecordStats,
};
use chrono::{DateTime, Duration, Utc};
use clipmind_memory::{
    Importance, MemoryContent, MemoryKind, MemoryResult, MemoryStore, QueryCriteria, StoreRequest,
};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Candidates considered per recommendation
const MAX_CANDIDATES: usize = 100;

/// Per-learner tuning
///
/// Fields missing from a deserialized table take the motion preset values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerWeights {
    /// EMA weight of the previous score
    pub ema_old: f64,
    /// EMA weight of the new observation
    pub ema_new: f64,
    /// Ranking weight of the success score
    pub rank_success: f64,
    /// Ranking weight of usage
    pub rank_usage: f64,
    /// Usage count at which the usage term saturates
    pub usage_saturation: u64,
    /// Usage count above which recommendations get a boost
    pub usage_boost_threshold: u64,
    /// Recommendations returned
    pub top_n: usize,
}

impl LearnerWeights {
    /// Motion pattern tuning
    pub fn motion() -> Self {
        Self {
            ema_old: 0.8,
            ema_new: 0.2,
            rank_success: 0.7,
            rank_usage: 0.3,
            usage_saturation: 10,
            usage_boost_threshold: 5,
            top_n: 5,
        }
    }

    /// Music and SFX tuning
    pub fn audio() -> Self {
        Self {
            ema_old: 0.7,
            ema_new: 0.3,
            rank_success: 0.6,
            rank_usage: 0.4,
            usage_saturation: 20,
            usage_boost_threshold: 10,
            top_n: 5,
        }
    }

    /// Composition template tuning
    pub fn composition() -> Self {
        Self {
            ema_old: 0.8,
            ema_new: 0.2,
            rank_success: 0.8,
            rank_usage: 0.2,
            usage_saturation: 5,
            usage_boost_threshold: 3,
            top_n: 2,
        }
    }
}

impl Default for LearnerWeights {
    fn default() -> Self {
        Self::motion()
    }
}

/// Weights for every learner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerSettings {
    /// Motion learner
    pub motion: LearnerWeights,
    /// Audio learner (music and SFX)
    pub audio: LearnerWeights,
    /// Composition learner
    pub composition: LearnerWeights,
}

impl Default for LearnerSettings {
    fn default() -> Self {
        Self {
            motion: LearnerWeights::motion(),
            audio: LearnerWeights::audio(),
            composition: LearnerWeights::composition(),
        }
    }
}

/// A record with its store id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<R> {
    /// Memory entry id
    pub id: String,
    /// Decoded record
    pub record: R,
}

/// A ranked suggestion
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation<R> {
    /// Memory entry id
    pub id: String,
    /// The record
    pub record: R,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Why it was suggested
    pub reason: String,
}

/// Confidence being accumulated for one candidate
#[derive(Debug, Clone)]
pub struct Scoring {
    confidence: f64,
    reasons: Vec<String>,
}

impl Scoring {
    /// Add `amount` when `condition` holds
    pub fn boost_if(&mut self, condition: bool, amount: f64, reason: impl Into<String>) -> &mut Self {
        if condition {
            self.confidence += amount;
            self.reasons.push(reason.into());
        }
        self
    }

    /// Add a proportional boost (skipped when zero)
    pub fn boost_by(&mut self, amount: f64, reason: impl Into<String>) -> &mut Self {
        if amount > 0.0 {
            self.confidence += amount;
            self.reasons.push(reason.into());
        }
        self
    }
}

/// Learner over one record type
pub struct Learner<R: LearnedRecord> {
    store: Arc<MemoryStore>,
    weights: LearnerWeights,
    /// Serializes read-modify-write updates of this learner's records
    writes: Mutex<()>,
    _record: PhantomData<fn() -> R>,
}

impl<R: LearnedRecord> Learner<R> {
    /// Create a learner over `store`
    pub fn new(store: Arc<MemoryStore>, weights: LearnerWeights) -> Self {
        Self {
            store,
            weights,
            writes: Mutex::new(()),
            _record: PhantomData,
        }
    }

    /// Tuning in use
    pub fn weights(&self) -> &LearnerWeights {
        &self.weights
    }

    /// Current time according to the store
    pub fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    /// Insert catalog records whose key is not stored yet; returns how many were added
    pub async fn seed(&self, catalog: Vec<R>) -> MemoryResult<usize> {
        let _writing = self.writes.lock().await;
        let mut known: Vec<String> = self.all().into_iter().map(|r| r.record.key()).collect();
        let mut added = 0;

        for record in catalog {
            let key = record.key();
            if known.contains(&key) {
                continue;
            }
            self.insert(&record).await?;
            known.push(key);
            added += 1;
        }

        if added > 0 {
            debug!(schema = R::SCHEMA, added, "Seeded learner catalog");
        }
        Ok(added)
    }

    /// Every stored record, without touching
    pub fn all(&self) -> Vec<StoredRecord<R>> {
        self.store
            .list(&QueryCriteria::new().with_category(R::SCHEMA))
            .into_iter()
            .filter_map(|entry| decode(&entry.id, &entry.content))
            .collect()
    }

    /// Record with the given key
    pub fn find(&self, key: &str) -> Option<StoredRecord<R>> {
        self.all().into_iter().find(|r| r.record.key() == key)
    }

    /// Record with the given id
    pub fn get(&self, id: &str) -> Option<StoredRecord<R>> {
        let entry = self.store.peek(id)?;
        if entry.category != R::SCHEMA {
            return None;
        }
        decode(&entry.id, &entry.content)
    }

    /// Records carrying `tag`, ranked by store relevance (touches them)
    pub fn candidates(&self, tag: &str) -> Vec<StoredRecord<R>> {
        self.store
            .query(
                &QueryCriteria::new()
                    .with_category(R::SCHEMA)
                    .with_tags([tag.to_lowercase()])
                    .with_limit(MAX_CANDIDATES),
            )
            .into_iter()
            .filter_map(|entry| decode(&entry.id, &entry.content))
            .collect()
    }

    /// Fold a successful observation in; returns the record id
    ///
    /// An unseen key creates a record scored `feedback / 5`. A known key gets
    /// the evidence appended, its usage bumped and its score EMA-blended.
    pub async fn learn(&self, observed: R, feedback: Option<u8>) -> MemoryResult<String> {
        let _writing = self.writes.lock().await;
        let feedback = normalize_feedback(feedback);
        let now = self.store.now();
        let evidence = Evidence {
            summary: observed.summary(),
            feedback,
            observed_at: now,
        };

        if let Some(StoredRecord { id, mut record }) = self.find(&observed.key()) {
            record.absorb(&observed);
            push_evidence(record.evidence_mut(), evidence);

            let weights = self.weights;
            let stats = record.stats_mut();
            stats.usage_count += 1;
            stats.last_used = Some(now);
            stats.success_score = blend(stats.success_score, feedback, &weights);

            self.replace(&id, &record).await?;
            debug!(schema = R::SCHEMA, id = %id, feedback, "Reinforced learned record");
            return Ok(id);
        }

        let mut record = observed;
        *record.stats_mut() = RecordStats::observed(feedback, now);
        push_evidence(record.evidence_mut(), evidence);

        let id = self.insert(&record).await?;
        debug!(schema = R::SCHEMA, id = %id, feedback, "Learned new record");
        Ok(id)
    }

    /// Record a use of `id`; returns `false` for unknown ids
    pub async fn record_usage(
        &self,
        id: &str,
        success: bool,
        feedback: Option<u8>,
    ) -> MemoryResult<bool> {
        let _writing = self.writes.lock().await;
        let Some(StoredRecord { mut record, .. }) = self.get(id) else {
            return Ok(false);
        };

        let now = self.store.now();
        let weights = self.weights;
        let stats = record.stats_mut();
        stats.usage_count += 1;
        stats.last_used = Some(now);
        stats.success_score = match feedback {
            Some(feedback) => blend(stats.success_score, normalize_feedback(Some(feedback)), &weights),
            None if success => (stats.success_score * 1.05).min(1.0),
            None => (stats.success_score * 0.95).max(0.0),
        };

        self.replace(id, &record).await
    }

    /// `success * w1 + min(usage / K, 1) * w2`
    pub fn rank_score(&self, stats: &RecordStats) -> f64 {
        let saturation = self.weights.usage_saturation.max(1) as f64;
        let usage = (stats.usage_count as f64 / saturation).min(1.0);
        stats.success_score * self.weights.rank_success + usage * self.weights.rank_usage
    }

    /// Best `n` records by rank score
    pub fn top(&self, n: usize) -> Vec<StoredRecord<R>> {
        let mut ranked: Vec<(f64, StoredRecord<R>)> = self
            .all()
            .into_iter()
            .map(|r| (self.rank_score(r.record.stats()), r))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked.into_iter().take(n).map(|(_, r)| r).collect()
    }

    /// Start scoring a candidate from its success score plus usage and recency boosts
    pub fn start_scoring(&self, stats: &RecordStats, now: DateTime<Utc>) -> Scoring {
        let mut scoring = Scoring {
            confidence: stats.success_score,
            reasons: vec![format!("success {:.2}", stats.success_score)],
        };
        scoring
            .boost_if(
                stats.usage_count > self.weights.usage_boost_threshold,
                0.05,
                format!("used {} times", stats.usage_count),
            )
            .boost_if(
                stats
                    .last_used
                    .map_or(false, |last| now - last <= Duration::days(7)),
                0.05,
                "used this week",
            );
        scoring
    }

    /// Clamp, sort and keep the configured number of recommendations
    pub fn finalize(&self, scored: Vec<(StoredRecord<R>, Scoring)>) -> Vec<Recommendation<R>> {
        let mut recommendations: Vec<Recommendation<R>> = scored
            .into_iter()
            .map(|(stored, scoring)| Recommendation {
                id: stored.id,
                record: stored.record,
                confidence: scoring.confidence.clamp(0.0, 1.0),
                reason: scoring.reasons.join("; "),
            })
            .collect();

        recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        recommendations.truncate(self.weights.top_n);
        recommendations
    }

    async fn insert(&self, record: &R) -> MemoryResult<String> {
        let tags: Vec<String> = record.tags().into_iter().map(|t| t.to_lowercase()).collect();
        self.store
            .store(
                MemoryKind::Procedural,
                R::SCHEMA,
                MemoryContent::record(R::SCHEMA, R::VERSION, record)?,
                StoreRequest::new(Importance::Medium).with_tags(tags),
            )
            .await
    }

    async fn replace(&self, id: &str, record: &R) -> MemoryResult<bool> {
        self.store
            .replace_content(id, MemoryContent::record(R::SCHEMA, R::VERSION, record)?)
            .await
    }
}

fn blend(old: f64, feedback: u8, weights: &LearnerWeights) -> f64 {
    (old * weights.ema_old + feedback_score(feedback) * weights.ema_new).clamp(0.0, 1.0)
}

fn decode<R: LearnedRecord>(id: &str, content: &MemoryContent) -> Option<StoredRecord<R>> {
    let record = content.as_record()?;
    match record.decode::<R>(R::SCHEMA) {
        Ok(record) => Some(StoredRecord {
            id: id.to_string(),
            record,
        }),
        Err(e) => {
            warn!(id = %id, schema = R::SCHEMA, error = %e, "Skipping undecodable record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MAX_EVIDENCE;
    use clipmind_memory::{InMemoryStorage, ManualClock, MemoryConfig, StoreOptions};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Preset {
        name: String,
        group: String,
        evidence: Vec<Evidence>,
        stats: RecordStats,
    }

    impl Preset {
        fn new(name: &str, group: &str, score: f64) -> Self {
            Self {
                name: name.to_string(),
                group: group.to_string(),
                evidence: Vec::new(),
                stats: RecordStats::seeded(score, Utc::now()),
            }
        }
    }

    impl LearnedRecord for Preset {
        const SCHEMA: &'static str = "test_preset";
        const VERSION: u32 = 1;

        fn key(&self) -> String {
            self.name.clone()
        }
        fn primary_tag(&self) -> String {
            self.group.clone()
        }
        fn summary(&self) -> String {
            format!("preset {}", self.name)
        }
        fn stats(&self) -> &RecordStats {
            &self.stats
        }
        fn stats_mut(&mut self) -> &mut RecordStats {
            &mut self.stats
        }
        fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
            &mut self.evidence
        }
    }

    async fn learner() -> (Learner<Preset>, Arc<ManualClock>) {
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
        (Learner::new(store, LearnerWeights::motion()), clock)
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (learner, _) = learner().await;
        let catalog = vec![Preset::new("a", "g", 0.8), Preset::new("b", "g", 0.75)];

        assert_eq!(learner.seed(catalog.clone()).await.unwrap(), 2);
        assert_eq!(learner.seed(catalog).await.unwrap(), 0);
        assert_eq!(learner.all().len(), 2);
    }

    #[tokio::test]
    async fn test_learn_creates_then_blends() {
        let (learner, _) = learner().await;

        let id = learner
            .learn(Preset::new("fresh", "g", 0.0), Some(5))
            .await
            .unwrap();
        let created = learner.get(&id).unwrap().record;
        assert!((created.stats.success_score - 1.0).abs() < 1e-9);
        assert_eq!(created.stats.usage_count, 1);
        assert_eq!(created.evidence.len(), 1);

        let same = learner
            .learn(Preset::new("fresh", "g", 0.0), Some(1))
            .await
            .unwrap();
        assert_eq!(same, id);

        let blended = learner.get(&id).unwrap().record;
        // 1.0 * 0.8 + 0.2 * 0.2
        assert!((blended.stats.success_score - 0.84).abs() < 1e-9);
        assert_eq!(blended.stats.usage_count, 2);
        assert_eq!(blended.evidence.len(), 2);
        assert_eq!(learner.all().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_learns_share_one_record() {
        let (learner, _) = learner().await;
        let learner = Arc::new(learner);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let learner = learner.clone();
                tokio::spawn(async move {
                    learner.learn(Preset::new("shared", "g", 0.0), Some(5)).await
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap());
        }

        let all = learner.all();
        assert_eq!(all.len(), 1);
        assert!(ids.iter().all(|id| *id == all[0].id));
        assert_eq!(all[0].record.stats.usage_count, 8);
        assert_eq!(all[0].record.evidence.len(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_learn_pair_reinforces_once_each() {
        let (learner, _) = learner().await;

        let (a, b) = tokio::join!(
            learner.learn(Preset::new("pair", "g", 0.0), Some(5)),
            learner.learn(Preset::new("pair", "g", 0.0), Some(5)),
        );
        assert_eq!(a.unwrap(), b.unwrap());

        let all = learner.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record.stats.usage_count, 2);
    }

    #[tokio::test]
    async fn test_learn_defaults_and_clamps_feedback() {
        let (learner, _) = learner().await;

        let id = learner.learn(Preset::new("x", "g", 0.0), None).await.unwrap();
        assert!((learner.get(&id).unwrap().record.stats.success_score - 0.8).abs() < 1e-9);

        let id = learner.learn(Preset::new("y", "g", 0.0), Some(0)).await.unwrap();
        assert!((learner.get(&id).unwrap().record.stats.success_score - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_evidence_capped_through_learning() {
        let (learner, _) = learner().await;

        let mut id = String::new();
        for _ in 0..(MAX_EVIDENCE + 5) {
            id = learner.learn(Preset::new("busy", "g", 0.0), Some(4)).await.unwrap();
        }
        assert_eq!(learner.get(&id).unwrap().record.evidence.len(), MAX_EVIDENCE);
    }

    #[tokio::test]
    async fn test_record_usage() {
        let (learner, _) = learner().await;
        learner.seed(vec![Preset::new("p", "g", 0.98)]).await.unwrap();
        let id = learner.find("p").unwrap().id;

        assert!(learner.record_usage(&id, true, None).await.unwrap());
        let stats = learner.get(&id).unwrap().record.stats;
        assert!((stats.success_score - 1.0).abs() < 1e-9);
        assert_eq!(stats.usage_count, 1);
        assert!(stats.last_used.is_some());

        assert!(learner.record_usage(&id, false, None).await.unwrap());
        assert!((learner.get(&id).unwrap().record.stats.success_score - 0.95).abs() < 1e-9);

        assert!(learner.record_usage(&id, true, Some(5)).await.unwrap());
        // 0.95 * 0.8 + 1.0 * 0.2
        assert!((learner.get(&id).unwrap().record.stats.success_score - 0.96).abs() < 1e-9);

        assert!(!learner.record_usage("missing", true, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_top_ranks_by_success_and_usage() {
        let (learner, _) = learner().await;
        learner
            .seed(vec![Preset::new("steady", "g", 0.7), Preset::new("shiny", "g", 0.8)])
            .await
            .unwrap();

        let steady = learner.find("steady").unwrap().id;
        for _ in 0..10 {
            learner.record_usage(&steady, true, Some(4)).await.unwrap();
        }

        let top = learner.top(1);
        assert_eq!(top[0].id, steady);
    }

    #[tokio::test]
    async fn test_finalize_clamps_and_truncates() {
        let (learner, _) = learner().await;
        learner
            .seed((0..8).map(|i| Preset::new(&format!("p{}", i), "g", 0.99)).collect())
            .await
            .unwrap();

        let now = learner.now();
        let scored = learner
            .candidates("G")
            .into_iter()
            .map(|stored| {
                let mut scoring = learner.start_scoring(&stored.record.stats, now);
                scoring.boost_if(true, 0.5, "test boost");
                (stored, scoring)
            })
            .collect();

        let recommendations = learner.finalize(scored);
        assert_eq!(recommendations.len(), 5);
        assert!(recommendations
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.confidence)));
        assert!(recommendations[0].reason.contains("test boost"));
    }
}
