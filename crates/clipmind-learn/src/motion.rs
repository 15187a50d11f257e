//! Motion pattern learner
//!
//! Learns which animation (type, easing, duration) works for which element in
//! which kind of scene.

use crate::learner::{Learner, LearnerWeights, Recommendation, StoredRecord};
use crate::records::{
    dimension_tag, keyword_overlap, merge_keywords, within_quarter, Evidence, LearnedRecord,
    RecordStats,
};
use chrono::{DateTime, Utc};
use clipmind_memory::{MemoryResult, MemoryStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A learned animation recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationPattern {
    /// Unique pattern name
    pub name: String,
    /// Element it animates (`text`, `logo`, `image`, ...)
    pub element_type: String,
    /// Animation kind (`fade`, `slide`, `scale`, ...)
    pub animation_type: String,
    /// Easing curve
    pub easing: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Scene types it worked in
    #[serde(default)]
    pub scene_types: Vec<String>,
    /// Moods it worked for
    #[serde(default)]
    pub moods: Vec<String>,
    /// Free keywords
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Supporting observations
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Shared stats
    #[serde(default)]
    pub stats: RecordStats,
}

impl AnimationPattern {
    /// Create a pattern with fresh stats
    pub fn new(
        name: impl Into<String>,
        element_type: impl Into<String>,
        animation_type: impl Into<String>,
        easing: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            element_type: element_type.into().to_lowercase(),
            animation_type: animation_type.into().to_lowercase(),
            easing: easing.into(),
            duration_ms,
            scene_types: Vec::new(),
            moods: Vec::new(),
            keywords: Vec::new(),
            evidence: Vec::new(),
            stats: RecordStats::seeded(0.0, Utc::now()),
        }
    }

    /// Set scene types
    pub fn with_scene_types<I: IntoIterator<Item = S>, S: Into<String>>(mut self, scenes: I) -> Self {
        self.scene_types = scenes.into_iter().map(|s| s.into().to_lowercase()).collect();
        self
    }

    /// Set moods
    pub fn with_moods<I: IntoIterator<Item = S>, S: Into<String>>(mut self, moods: I) -> Self {
        self.moods = moods.into_iter().map(|s| s.into().to_lowercase()).collect();
        self
    }

    /// Set keywords
    pub fn with_keywords<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keywords: I) -> Self {
        self.keywords = keywords.into_iter().map(|s| s.into().to_lowercase()).collect();
        self
    }

    fn seeded(mut self, score: f64, now: DateTime<Utc>) -> Self {
        self.stats = RecordStats::seeded(score, now);
        self
    }
}

impl LearnedRecord for AnimationPattern {
    const SCHEMA: &'static str = "animation_pattern";
    const VERSION: u32 = 1;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn primary_tag(&self) -> String {
        self.element_type.clone()
    }

    fn tags(&self) -> Vec<String> {
        vec![self.element_type.clone(), dimension_tag("animation", &self.animation_type)]
    }

    fn summary(&self) -> String {
        format!(
            "{} {} on {} ({} {}ms)",
            self.name, self.animation_type, self.element_type, self.easing, self.duration_ms
        )
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

    fn absorb(&mut self, observed: &Self) {
        merge_keywords(&mut self.scene_types, &observed.scene_types);
        merge_keywords(&mut self.moods, &observed.moods);
        merge_keywords(&mut self.keywords, &observed.keywords);
    }
}

/// What the caller wants to animate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionScenario {
    /// Element to animate; candidates are filtered by it
    pub element_type: String,
    /// Scene type
    pub scene_type: Option<String>,
    /// Mood
    pub mood: Option<String>,
    /// Preferred easing
    pub easing: Option<String>,
    /// Target duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Free keywords
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl MotionScenario {
    /// Scenario for an element
    pub fn new(element_type: impl Into<String>) -> Self {
        Self {
            element_type: element_type.into(),
            ..Default::default()
        }
    }

    /// Set scene type
    pub fn with_scene_type(mut self, scene_type: impl Into<String>) -> Self {
        self.scene_type = Some(scene_type.into());
        self
    }

    /// Set mood
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    /// Set easing
    pub fn with_easing(mut self, easing: impl Into<String>) -> Self {
        self.easing = Some(easing.into());
        self
    }

    /// Set target duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Set keywords
    pub fn with_keywords<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keywords: I) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Built-in motion catalog
pub fn motion_catalog(now: DateTime<Utc>) -> Vec<AnimationPattern> {
    vec![
        AnimationPattern::new("title-fade-in", "text", "fade", "ease-out", 800)
            .with_scene_types(["intro", "title"])
            .with_moods(["calm", "elegant"])
            .with_keywords(["title", "headline"])
            .seeded(0.8, now),
        AnimationPattern::new("title-slide-up", "text", "slide", "ease-out-cubic", 600)
            .with_scene_types(["intro", "content"])
            .with_moods(["energetic", "modern"])
            .with_keywords(["title", "caption"])
            .seeded(0.78, now),
        AnimationPattern::new("logo-scale-pop", "logo", "scale", "ease-out-back", 500)
            .with_scene_types(["intro", "outro"])
            .with_moods(["energetic", "playful"])
            .with_keywords(["brand", "logo"])
            .seeded(0.8, now),
        AnimationPattern::new("logo-fade-reveal", "logo", "fade", "ease-in-out", 1200)
            .with_scene_types(["outro"])
            .with_moods(["calm", "corporate"])
            .with_keywords(["brand", "ending"])
            .seeded(0.75, now),
        AnimationPattern::new("image-ken-burns", "image", "zoom", "linear", 4000)
            .with_scene_types(["content", "montage"])
            .with_moods(["calm", "cinematic"])
            .with_keywords(["photo", "background"])
            .seeded(0.77, now),
        AnimationPattern::new("shape-wipe", "shape", "wipe", "ease-in-out", 400)
            .with_scene_types(["transition"])
            .with_moods(["energetic", "modern"])
            .with_keywords(["transition", "reveal"])
            .seeded(0.75, now),
    ]
}

/// Learner over [`AnimationPattern`]s
pub struct MotionLearner {
    learner: Learner<AnimationPattern>,
}

impl MotionLearner {
    /// Create a motion learner
    pub fn new(store: Arc<MemoryStore>, weights: LearnerWeights) -> Self {
        Self {
            learner: Learner::new(store, weights),
        }
    }

    /// Seed the built-in catalog; returns how many patterns were added
    pub async fn initialize(&self) -> MemoryResult<usize> {
        self.learner.seed(motion_catalog(self.learner.now())).await
    }

    /// Fold a successful animation into the catalog
    pub async fn learn_from_success(
        &self,
        pattern: AnimationPattern,
        feedback: Option<u8>,
    ) -> MemoryResult<String> {
        self.learner.learn(pattern, feedback).await
    }

    /// Ranked patterns for a scenario
    pub fn recommend(&self, scenario: &MotionScenario) -> Vec<Recommendation<AnimationPattern>> {
        let now = self.learner.now();
        let scene = scenario.scene_type.as_deref().map(str::to_lowercase);
        let mood = scenario.mood.as_deref().map(str::to_lowercase);
        let keywords: Vec<String> = scenario.keywords.iter().map(|k| k.to_lowercase()).collect();

        let scored = self
            .learner
            .candidates(&scenario.element_type)
            .into_iter()
            .map(|stored| {
                let pattern = &stored.record;
                let mut scoring = self.learner.start_scoring(&pattern.stats, now);
                scoring
                    .boost_if(
                        scene.as_ref().map_or(false, |s| pattern.scene_types.contains(s)),
                        0.15,
                        "scene match",
                    )
                    .boost_if(
                        mood.as_ref().map_or(false, |m| pattern.moods.contains(m)),
                        0.1,
                        "mood match",
                    )
                    .boost_if(
                        scenario
                            .easing
                            .as_deref()
                            .map_or(false, |e| pattern.easing.eq_ignore_ascii_case(e)),
                        0.1,
                        "easing match",
                    )
                    .boost_if(
                        scenario.duration_ms.map_or(false, |d| {
                            within_quarter(pattern.duration_ms as f64, d as f64)
                        }),
                        0.1,
                        "duration close",
                    )
                    .boost_by(
                        keyword_overlap(&pattern.keywords, &keywords) * 0.1,
                        "keyword overlap",
                    );
                (stored, scoring)
            })
            .collect();

        self.learner.finalize(scored)
    }

    /// Record a use of a pattern
    pub async fn record_usage(
        &self,
        id: &str,
        success: bool,
        feedback: Option<u8>,
    ) -> MemoryResult<bool> {
        self.learner.record_usage(id, success, feedback).await
    }

    /// Best patterns overall
    pub fn get_top(&self, n: usize) -> Vec<StoredRecord<AnimationPattern>> {
        self.learner.top(n)
    }

    /// Every stored pattern
    pub fn patterns(&self) -> Vec<StoredRecord<AnimationPattern>> {
        self.learner.all()
    }

    /// Underlying generic learner
    pub fn learner(&self) -> &Learner<AnimationPattern> {
        &self.learner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmind_memory::{InMemoryStorage, MemoryConfig, StoreOptions};

    async fn motion() -> MotionLearner {
        let store = MemoryStore::open_with(
            MemoryConfig::default().with_flush_interval_secs(0),
            StoreOptions::new().with_backend(Arc::new(InMemoryStorage::new())),
        )
        .await
        .unwrap();
        MotionLearner::new(Arc::new(store), LearnerWeights::motion())
    }

    #[tokio::test]
    async fn test_initialize_twice_keeps_catalog_size() {
        let learner = motion().await;

        let added = learner.initialize().await.unwrap();
        assert_eq!(added, motion_catalog(Utc::now()).len());
        assert_eq!(learner.initialize().await.unwrap(), 0);
        assert_eq!(learner.patterns().len(), added);

        for stored in learner.patterns() {
            let score = stored.record.stats.success_score;
            assert!((0.75..=0.8).contains(&score));
            assert_eq!(stored.record.stats.usage_count, 0);
        }
    }

    #[tokio::test]
    async fn test_recommend_prefers_matching_scene() {
        let learner = motion().await;
        learner.initialize().await.unwrap();

        let recommendations = learner.recommend(
            &MotionScenario::new("text")
                .with_scene_type("intro")
                .with_mood("calm")
                .with_duration_ms(1000),
        );

        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].record.name, "title-fade-in");
        assert!(recommendations[0].reason.contains("scene match"));
        assert!(recommendations
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[tokio::test]
    async fn test_learned_pattern_joins_candidates() {
        let learner = motion().await;
        learner.initialize().await.unwrap();

        let id = learner
            .learn_from_success(
                AnimationPattern::new("logo-spin", "logo", "rotate", "ease-in-out", 900)
                    .with_scene_types(["outro"]),
                Some(5),
            )
            .await
            .unwrap();

        let recommendations = learner.recommend(&MotionScenario::new("logo").with_scene_type("outro"));
        assert_eq!(recommendations.len(), 3);
        let learned = recommendations.iter().find(|r| r.id == id).unwrap();
        // success 1.0 + scene + recent use, clamped
        assert!((learned.confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_animation_type_is_not_an_element_filter() {
        let learner = motion().await;

        learner
            .learn_from_success(
                AnimationPattern::new("caption-fade", "caption", "fade", "ease-out", 400),
                Some(4),
            )
            .await
            .unwrap();

        assert!(learner.recommend(&MotionScenario::new("fade")).is_empty());
        assert_eq!(learner.recommend(&MotionScenario::new("caption")).len(), 1);
        assert_eq!(learner.learner().candidates("animation:fade").len(), 1);
    }

    #[tokio::test]
    async fn test_learn_merges_scene_types() {
        let learner = motion().await;
        learner.initialize().await.unwrap();

        learner
            .learn_from_success(
                AnimationPattern::new("shape-wipe", "shape", "wipe", "ease-in-out", 400)
                    .with_scene_types(["intro"]),
                None,
            )
            .await
            .unwrap();

        let wipe = learner.learner().find("shape-wipe").unwrap().record;
        assert_eq!(wipe.scene_types, vec!["transition", "intro"]);
        assert_eq!(wipe.stats.usage_count, 1);
        // 0.75 * 0.8 + 0.8 * 0.2
        assert!((wipe.stats.success_score - 0.76).abs() < 1e-9);
    }
}
