//! Composition template learner

use crate::learner::{Learner, LearnerWeights, Recommendation, StoredRecord};
use crate::records::{
    dimension_tag, keyword_overlap, merge_keywords, within_quarter, Evidence, LearnedRecord,
    RecordStats,
};
use chrono::{DateTime, Utc};
use clipmind_memory::{MemoryResult, MemoryStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A reusable video structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionTemplate {
    /// Unique template name
    pub name: String,
    /// Video category (`product_demo`, `social`, `explainer`, ...)
    pub category: String,
    /// Scene sequence, by scene type
    pub scenes: Vec<String>,
    /// Total duration in seconds
    pub duration_secs: f64,
    /// Pacing (`fast`, `medium`, `slow`)
    pub pacing: String,
    /// Aspect ratio
    pub aspect_ratio: String,
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

impl CompositionTemplate {
    /// Create a template with fresh stats
    pub fn new<I, S>(
        name: impl Into<String>,
        category: impl Into<String>,
        scenes: I,
        duration_secs: f64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            category: category.into().to_lowercase(),
            scenes: scenes.into_iter().map(|s| s.into().to_lowercase()).collect(),
            duration_secs,
            pacing: "medium".to_string(),
            aspect_ratio: "16:9".to_string(),
            keywords: Vec::new(),
            evidence: Vec::new(),
            stats: RecordStats::seeded(0.0, Utc::now()),
        }
    }

    /// Set pacing
    pub fn with_pacing(mut self, pacing: impl Into<String>) -> Self {
        self.pacing = pacing.into().to_lowercase();
        self
    }

    /// Set aspect ratio
    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = aspect_ratio.into();
        self
    }

    /// Set keywords
    pub fn with_keywords<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keywords: I) -> Self {
        self.keywords = keywords.into_iter().map(|s| s.into().to_lowercase()).collect();
        self
    }

    /// Number of scenes
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    fn seeded(mut self, score: f64, now: DateTime<Utc>) -> Self {
        self.stats = RecordStats::seeded(score, now);
        self
    }
}

impl LearnedRecord for CompositionTemplate {
    const SCHEMA: &'static str = "composition_template";
    const VERSION: u32 = 1;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn primary_tag(&self) -> String {
        self.category.clone()
    }

    fn tags(&self) -> Vec<String> {
        vec![self.category.clone(), dimension_tag("pacing", &self.pacing)]
    }

    fn summary(&self) -> String {
        format!(
            "{} ({}, {} scenes, {:.0}s)",
            self.name,
            self.category,
            self.scene_count(),
            self.duration_secs
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
        merge_keywords(&mut self.keywords, &observed.keywords);
    }
}

/// Video the caller wants to structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionScenario {
    /// Video category; candidates are filtered by it
    pub category: String,
    /// Target duration in seconds
    pub duration_secs: Option<f64>,
    /// Preferred pacing
    pub pacing: Option<String>,
    /// Desired scene count
    pub scene_count: Option<usize>,
    /// Free keywords
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CompositionScenario {
    /// Scenario for a category
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }

    /// Set target duration
    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Set pacing
    pub fn with_pacing(mut self, pacing: impl Into<String>) -> Self {
        self.pacing = Some(pacing.into());
        self
    }

    /// Set scene count
    pub fn with_scene_count(mut self, count: usize) -> Self {
        self.scene_count = Some(count);
        self
    }

    /// Set keywords
    pub fn with_keywords<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keywords: I) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Built-in template catalog
pub fn template_catalog(now: DateTime<Utc>) -> Vec<CompositionTemplate> {
    vec![
        CompositionTemplate::new(
            "product-demo-classic",
            "product_demo",
            ["intro", "problem", "solution", "features", "outro"],
            60.0,
        )
        .with_keywords(["product", "demo", "features"])
        .seeded(0.8, now),
        CompositionTemplate::new(
            "product-demo-short",
            "product_demo",
            ["intro", "features", "outro"],
            30.0,
        )
        .with_pacing("fast")
        .with_keywords(["product", "teaser"])
        .seeded(0.77, now),
        CompositionTemplate::new("social-hook", "social", ["hook", "content", "cta"], 15.0)
            .with_pacing("fast")
            .with_aspect_ratio("9:16")
            .with_keywords(["reel", "short", "vertical"])
            .seeded(0.78, now),
        CompositionTemplate::new(
            "explainer-steps",
            "explainer",
            ["intro", "step", "step", "step", "summary"],
            90.0,
        )
        .with_pacing("slow")
        .with_keywords(["tutorial", "howto", "steps"])
        .seeded(0.76, now),
        CompositionTemplate::new(
            "brand-story",
            "brand",
            ["intro", "story", "values", "logo"],
            45.0,
        )
        .with_keywords(["brand", "story", "mission"])
        .seeded(0.75, now),
    ]
}

/// Learner over [`CompositionTemplate`]s
pub struct CompositionLearner {
    learner: Learner<CompositionTemplate>,
}

impl CompositionLearner {
    /// Create a composition learner
    pub fn new(store: Arc<MemoryStore>, weights: LearnerWeights) -> Self {
        Self {
            learner: Learner::new(store, weights),
        }
    }

    /// Seed the built-in catalog; returns how many templates were added
    pub async fn initialize(&self) -> MemoryResult<usize> {
        self.learner.seed(template_catalog(self.learner.now())).await
    }

    /// Fold a successful composition in
    pub async fn learn_from_success(
        &self,
        template: CompositionTemplate,
        feedback: Option<u8>,
    ) -> MemoryResult<String> {
        self.learner.learn(template, feedback).await
    }

    /// Ranked templates for a scenario
    pub fn recommend(
        &self,
        scenario: &CompositionScenario,
    ) -> Vec<Recommendation<CompositionTemplate>> {
        let now = self.learner.now();
        let keywords: Vec<String> = scenario.keywords.iter().map(|k| k.to_lowercase()).collect();

        let scored = self
            .learner
            .candidates(&scenario.category)
            .into_iter()
            .map(|stored| {
                let template = &stored.record;
                let mut scoring = self.learner.start_scoring(&template.stats, now);
                scoring
                    .boost_if(
                        scenario
                            .pacing
                            .as_deref()
                            .map_or(false, |p| template.pacing.eq_ignore_ascii_case(p)),
                        0.1,
                        "pacing match",
                    )
                    .boost_if(
                        scenario.scene_count == Some(template.scene_count()),
                        0.1,
                        "scene count match",
                    )
                    .boost_if(
                        scenario
                            .duration_secs
                            .map_or(false, |d| within_quarter(template.duration_secs, d)),
                        0.1,
                        "duration close",
                    )
                    .boost_by(
                        keyword_overlap(&template.keywords, &keywords) * 0.1,
                        "keyword overlap",
                    );
                (stored, scoring)
            })
            .collect();

        self.learner.finalize(scored)
    }

    /// Record a use of a template
    pub async fn record_usage(
        &self,
        id: &str,
        success: bool,
        feedback: Option<u8>,
    ) -> MemoryResult<bool> {
        self.learner.record_usage(id, success, feedback).await
    }

    /// Best templates overall
    pub fn get_top(&self, n: usize) -> Vec<StoredRecord<CompositionTemplate>> {
        self.learner.top(n)
    }

    /// Every stored template
    pub fn templates(&self) -> Vec<StoredRecord<CompositionTemplate>> {
        self.learner.all()
    }

    /// Underlying generic learner
    pub fn learner(&self) -> &Learner<CompositionTemplate> {
        &self.learner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmind_memory::{InMemoryStorage, MemoryConfig, StoreOptions};

    async fn composition() -> CompositionLearner {
        let store = MemoryStore::open_with(
            MemoryConfig::default().with_flush_interval_secs(0),
            StoreOptions::new().with_backend(Arc::new(InMemoryStorage::new())),
        )
        .await
        .unwrap();
        CompositionLearner::new(Arc::new(store), LearnerWeights::composition())
    }

    #[tokio::test]
    async fn test_initialize_twice() {
        let learner = composition().await;
        learner.initialize().await.unwrap();
        learner.initialize().await.unwrap();
        assert_eq!(learner.templates().len(), template_catalog(Utc::now()).len());
    }

    #[tokio::test]
    async fn test_recommend_returns_top_two() {
        let learner = composition().await;
        learner.initialize().await.unwrap();
        learner
            .learn_from_success(
                CompositionTemplate::new("demo-walkthrough", "product_demo", ["intro", "demo"], 120.0)
                    .with_pacing("slow"),
                Some(3),
            )
            .await
            .unwrap();

        let recommendations = learner.recommend(
            &CompositionScenario::new("product_demo")
                .with_pacing("fast")
                .with_duration_secs(30.0),
        );

        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].record.name, "product-demo-short");
        assert_eq!(recommendations[1].record.name, "product-demo-classic");
    }

    #[tokio::test]
    async fn test_pacing_does_not_match_category_filter() {
        let learner = composition().await;

        learner
            .learn_from_success(
                CompositionTemplate::new("quick-cut", "social", ["hook", "cta"], 15.0)
                    .with_pacing("fast"),
                Some(5),
            )
            .await
            .unwrap();

        assert!(learner.recommend(&CompositionScenario::new("fast")).is_empty());
        assert_eq!(learner.recommend(&CompositionScenario::new("social")).len(), 1);
        assert_eq!(learner.learner().candidates("pacing:fast").len(), 1);
    }

    #[tokio::test]
    async fn test_top_favours_usage() {
        let learner = composition().await;
        learner.initialize().await.unwrap();

        let brand = learner.learner().find("brand-story").unwrap().id;
        for _ in 0..5 {
            assert!(learner.record_usage(&brand, true, Some(4)).await.unwrap());
        }

        let top = learner.get_top(1);
        assert_eq!(top[0].id, brand);
    }
}
