//! Music and sound-effect learner

use crate::learner::{Learner, LearnerWeights, Recommendation, StoredRecord};
use crate::records::{
    dimension_tag, keyword_overlap, merge_keywords, within_quarter, Evidence, LearnedRecord,
    RecordStats,
};
use chrono::{DateTime, Utc};
use clipmind_memory::{MemoryResult, MemoryStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Music or ambience that fits a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSceneMapping {
    /// Scene type (`intro`, `content`, `outro`, ...)
    pub scene_type: String,
    /// Audio kind (`music`, `ambient`, ...)
    pub audio_type: String,
    /// Mood
    pub mood: String,
    /// Genre
    pub genre: Option<String>,
    /// Tempo
    pub tempo_bpm: Option<u32>,
    /// Relative volume in [0, 1]
    pub volume: f64,
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

impl AudioSceneMapping {
    /// Create a mapping with fresh stats
    pub fn new(
        scene_type: impl Into<String>,
        audio_type: impl Into<String>,
        mood: impl Into<String>,
    ) -> Self {
        Self {
            scene_type: scene_type.into().to_lowercase(),
            audio_type: audio_type.into().to_lowercase(),
            mood: mood.into().to_lowercase(),
            genre: None,
            tempo_bpm: None,
            volume: 0.6,
            keywords: Vec::new(),
            evidence: Vec::new(),
            stats: RecordStats::seeded(0.0, Utc::now()),
        }
    }

    /// Set genre
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    /// Set tempo
    pub fn with_tempo(mut self, bpm: u32) -> Self {
        self.tempo_bpm = Some(bpm);
        self
    }

    /// Set volume
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
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

impl LearnedRecord for AudioSceneMapping {
    const SCHEMA: &'static str = "audio_scene_mapping";
    const VERSION: u32 = 1;

    fn key(&self) -> String {
        format!("{}|{}|{}", self.scene_type, self.audio_type, self.mood)
    }

    fn primary_tag(&self) -> String {
        self.scene_type.clone()
    }

    fn tags(&self) -> Vec<String> {
        vec![
            self.scene_type.clone(),
            dimension_tag("audio", &self.audio_type),
            dimension_tag("mood", &self.mood),
        ]
    }

    fn summary(&self) -> String {
        format!("{} {} for {} scene", self.mood, self.audio_type, self.scene_type)
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
        if observed.genre.is_some() {
            self.genre = observed.genre.clone();
        }
        if observed.tempo_bpm.is_some() {
            self.tempo_bpm = observed.tempo_bpm;
        }
        merge_keywords(&mut self.keywords, &observed.keywords);
    }
}

/// A sound effect tied to an on-screen trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SfxPattern {
    /// What fires it (`transition`, `text_appear`, `logo_reveal`, ...)
    pub trigger_type: String,
    /// Effect kind (`whoosh`, `pop`, `click`, ...)
    pub sfx_type: String,
    /// Offset from the trigger in milliseconds
    pub timing_offset_ms: i64,
    /// Relative volume in [0, 1]
    pub volume: f64,
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

impl SfxPattern {
    /// Create a pattern with fresh stats
    pub fn new(trigger_type: impl Into<String>, sfx_type: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into().to_lowercase(),
            sfx_type: sfx_type.into().to_lowercase(),
            timing_offset_ms: 0,
            volume: 0.5,
            keywords: Vec::new(),
            evidence: Vec::new(),
            stats: RecordStats::seeded(0.0, Utc::now()),
        }
    }

    /// Set timing offset
    pub fn with_offset_ms(mut self, offset: i64) -> Self {
        self.timing_offset_ms = offset;
        self
    }

    /// Set volume
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
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

impl LearnedRecord for SfxPattern {
    const SCHEMA: &'static str = "sfx_pattern";
    const VERSION: u32 = 1;

    fn key(&self) -> String {
        format!("{}|{}", self.trigger_type, self.sfx_type)
    }

    fn primary_tag(&self) -> String {
        self.trigger_type.clone()
    }

    fn tags(&self) -> Vec<String> {
        vec![self.trigger_type.clone(), dimension_tag("sfx", &self.sfx_type)]
    }

    fn summary(&self) -> String {
        format!("{} on {} ({:+}ms)", self.sfx_type, self.trigger_type, self.timing_offset_ms)
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
        self.timing_offset_ms = observed.timing_offset_ms;
        self.volume = observed.volume;
        merge_keywords(&mut self.keywords, &observed.keywords);
    }
}

/// Scene the caller needs music for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicScenario {
    /// Scene type; candidates are filtered by it
    pub scene_type: String,
    /// Mood
    pub mood: Option<String>,
    /// Preferred audio kind
    pub audio_type: Option<String>,
    /// Target tempo
    pub tempo_bpm: Option<u32>,
    /// Free keywords
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl MusicScenario {
    /// Scenario for a scene type
    pub fn new(scene_type: impl Into<String>) -> Self {
        Self {
            scene_type: scene_type.into(),
            ..Default::default()
        }
    }

    /// Set mood
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    /// Set audio kind
    pub fn with_audio_type(mut self, audio_type: impl Into<String>) -> Self {
        self.audio_type = Some(audio_type.into());
        self
    }

    /// Set tempo
    pub fn with_tempo(mut self, bpm: u32) -> Self {
        self.tempo_bpm = Some(bpm);
        self
    }

    /// Set keywords
    pub fn with_keywords<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keywords: I) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Trigger the caller needs an effect for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SfxScenario {
    /// Trigger type; candidates are filtered by it
    pub trigger_type: String,
    /// Preferred effect kind
    pub sfx_type: Option<String>,
    /// Free keywords
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SfxScenario {
    /// Scenario for a trigger
    pub fn new(trigger_type: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            ..Default::default()
        }
    }

    /// Set preferred effect kind
    pub fn with_sfx_type(mut self, sfx_type: impl Into<String>) -> Self {
        self.sfx_type = Some(sfx_type.into());
        self
    }

    /// Set keywords
    pub fn with_keywords<I: IntoIterator<Item = S>, S: Into<String>>(mut self, keywords: I) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Built-in music catalog
pub fn music_catalog(now: DateTime<Utc>) -> Vec<AudioSceneMapping> {
    vec![
        AudioSceneMapping::new("intro", "music", "energetic")
            .with_genre("electronic")
            .with_tempo(128)
            .with_volume(0.7)
            .with_keywords(["upbeat", "opening"])
            .seeded(0.8, now),
        AudioSceneMapping::new("intro", "music", "calm")
            .with_genre("ambient")
            .with_tempo(80)
            .with_volume(0.5)
            .with_keywords(["soft", "opening"])
            .seeded(0.77, now),
        AudioSceneMapping::new("content", "music", "neutral")
            .with_genre("lofi")
            .with_tempo(90)
            .with_volume(0.3)
            .with_keywords(["background", "narration"])
            .seeded(0.78, now),
        AudioSceneMapping::new("content", "ambient", "calm")
            .with_volume(0.25)
            .with_keywords(["background", "texture"])
            .seeded(0.75, now),
        AudioSceneMapping::new("outro", "music", "uplifting")
            .with_genre("orchestral")
            .with_tempo(110)
            .with_volume(0.6)
            .with_keywords(["ending", "resolve"])
            .seeded(0.8, now),
    ]
}

/// Built-in sound-effect catalog
pub fn sfx_catalog(now: DateTime<Utc>) -> Vec<SfxPattern> {
    vec![
        SfxPattern::new("transition", "whoosh")
            .with_offset_ms(-100)
            .with_volume(0.6)
            .with_keywords(["swipe", "fast"])
            .seeded(0.8, now),
        SfxPattern::new("text_appear", "pop")
            .with_volume(0.4)
            .with_keywords(["title", "light"])
            .seeded(0.77, now),
        SfxPattern::new("text_appear", "typewriter")
            .with_volume(0.35)
            .with_keywords(["typing", "retro"])
            .seeded(0.75, now),
        SfxPattern::new("logo_reveal", "impact")
            .with_offset_ms(50)
            .with_volume(0.7)
            .with_keywords(["brand", "bold"])
            .seeded(0.78, now),
        SfxPattern::new("button_click", "click")
            .with_volume(0.3)
            .with_keywords(["ui", "interface"])
            .seeded(0.75, now),
    ]
}

/// Learner over music mappings and SFX patterns
pub struct AudioLearner {
    music: Learner<AudioSceneMapping>,
    sfx: Learner<SfxPattern>,
}

impl AudioLearner {
    /// Create an audio learner; both record kinds share the weights
    pub fn new(store: Arc<MemoryStore>, weights: LearnerWeights) -> Self {
        Self {
            music: Learner::new(store.clone(), weights),
            sfx: Learner::new(store, weights),
        }
    }

    /// Seed both catalogs; returns how many records were added
    pub async fn initialize(&self) -> MemoryResult<usize> {
        let now = self.music.now();
        let music = self.music.seed(music_catalog(now)).await?;
        let sfx = self.sfx.seed(sfx_catalog(now)).await?;
        debug!(music, sfx, "Initialized audio learner");
        Ok(music + sfx)
    }

    /// Fold a successful music choice in
    pub async fn learn_music_success(
        &self,
        mapping: AudioSceneMapping,
        feedback: Option<u8>,
    ) -> MemoryResult<String> {
        self.music.learn(mapping, feedback).await
    }

    /// Fold a successful effect placement in
    pub async fn learn_sfx_success(
        &self,
        pattern: SfxPattern,
        feedback: Option<u8>,
    ) -> MemoryResult<String> {
        self.sfx.learn(pattern, feedback).await
    }

    /// Ranked music for a scene
    pub fn recommend_music(
        &self,
        scenario: &MusicScenario,
    ) -> Vec<Recommendation<AudioSceneMapping>> {
        let now = self.music.now();
        let mood = scenario.mood.as_deref().map(str::to_lowercase);
        let keywords: Vec<String> = scenario.keywords.iter().map(|k| k.to_lowercase()).collect();

        let scored = self
            .music
            .candidates(&scenario.scene_type)
            .into_iter()
            .map(|stored| {
                let mapping = &stored.record;
                let mut scoring = self.music.start_scoring(&mapping.stats, now);
                scoring
                    .boost_if(mood.as_deref() == Some(mapping.mood.as_str()), 0.2, "mood match")
                    .boost_if(
                        scenario
                            .audio_type
                            .as_deref()
                            .map_or(false, |a| mapping.audio_type.eq_ignore_ascii_case(a)),
                        0.1,
                        "audio type match",
                    )
                    .boost_if(
                        matches!(
                            (scenario.tempo_bpm, mapping.tempo_bpm),
                            (Some(want), Some(have)) if within_quarter(have as f64, want as f64)
                        ),
                        0.1,
                        "tempo close",
                    )
                    .boost_by(
                        keyword_overlap(&mapping.keywords, &keywords) * 0.1,
                        "keyword overlap",
                    );
                (stored, scoring)
            })
            .collect();

        self.music.finalize(scored)
    }

    /// Ranked effects for a trigger
    pub fn recommend_sfx(&self, scenario: &SfxScenario) -> Vec<Recommendation<SfxPattern>> {
        let now = self.sfx.now();
        let keywords: Vec<String> = scenario.keywords.iter().map(|k| k.to_lowercase()).collect();

        let scored = self
            .sfx
            .candidates(&scenario.trigger_type)
            .into_iter()
            .map(|stored| {
                let pattern = &stored.record;
                let mut scoring = self.sfx.start_scoring(&pattern.stats, now);
                scoring
                    .boost_if(
                        scenario
                            .sfx_type
                            .as_deref()
                            .map_or(false, |s| pattern.sfx_type.eq_ignore_ascii_case(s)),
                        0.15,
                        "effect type match",
                    )
                    .boost_by(
                        keyword_overlap(&pattern.keywords, &keywords) * 0.1,
                        "keyword overlap",
                    );
                (stored, scoring)
            })
            .collect();

        self.sfx.finalize(scored)
    }

    /// Record a use of a music mapping
    pub async fn record_music_usage(
        &self,
        id: &str,
        success: bool,
        feedback: Option<u8>,
    ) -> MemoryResult<bool> {
        self.music.record_usage(id, success, feedback).await
    }

    /// Record a use of an effect
    pub async fn record_sfx_usage(
        &self,
        id: &str,
        success: bool,
        feedback: Option<u8>,
    ) -> MemoryResult<bool> {
        self.sfx.record_usage(id, success, feedback).await
    }

    /// Record a use of either kind; returns `false` when the id is neither
    pub async fn record_usage(
        &self,
        id: &str,
        success: bool,
        feedback: Option<u8>,
    ) -> MemoryResult<bool> {
        if self.music.record_usage(id, success, feedback).await? {
            return Ok(true);
        }
        self.sfx.record_usage(id, success, feedback).await
    }

    /// Best music mappings
    pub fn get_top_music(&self, n: usize) -> Vec<StoredRecord<AudioSceneMapping>> {
        self.music.top(n)
    }

    /// Best effects
    pub fn get_top_sfx(&self, n: usize) -> Vec<StoredRecord<SfxPattern>> {
        self.sfx.top(n)
    }

    /// Music learner
    pub fn music(&self) -> &Learner<AudioSceneMapping> {
        &self.music
    }

    /// SFX learner
    pub fn sfx(&self) -> &Learner<SfxPattern> {
        &self.sfx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmind_memory::{InMemoryStorage, MemoryConfig, StoreOptions};

    async fn audio() -> AudioLearner {
        let store = MemoryStore::open_with(
            MemoryConfig::default().with_flush_interval_secs(0),
            StoreOptions::new().with_backend(Arc::new(InMemoryStorage::new())),
        )
        .await
        .unwrap();
        AudioLearner::new(Arc::new(store), LearnerWeights::audio())
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let learner = audio().await;
        let now = Utc::now();
        let expected = music_catalog(now).len() + sfx_catalog(now).len();

        assert_eq!(learner.initialize().await.unwrap(), expected);
        assert_eq!(learner.initialize().await.unwrap(), 0);
        assert_eq!(learner.music().all().len(), music_catalog(now).len());
        assert_eq!(learner.sfx().all().len(), sfx_catalog(now).len());
    }

    #[tokio::test]
    async fn test_music_ema_uses_audio_weights() {
        let learner = audio().await;
        learner.initialize().await.unwrap();

        let id = learner
            .learn_music_success(AudioSceneMapping::new("Intro", "music", "energetic"), Some(5))
            .await
            .unwrap();

        let stored = learner.music().get(&id).unwrap().record;
        // 0.8 * 0.7 + 1.0 * 0.3
        assert!((stored.stats.success_score - 0.86).abs() < 1e-9);
        assert_eq!(stored.genre.as_deref(), Some("electronic"));
        assert_eq!(learner.music().all().len(), music_catalog(Utc::now()).len());
    }

    #[tokio::test]
    async fn test_recommend_music_by_mood() {
        let learner = audio().await;
        learner.initialize().await.unwrap();

        let recommendations =
            learner.recommend_music(&MusicScenario::new("intro").with_mood("calm").with_tempo(85));

        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].record.mood, "calm");
        assert!(recommendations[0].reason.contains("mood match"));
        assert!(recommendations[0].reason.contains("tempo close"));
    }

    #[tokio::test]
    async fn test_recommend_sfx_and_usage() {
        let learner = audio().await;
        learner.initialize().await.unwrap();

        let recommendations =
            learner.recommend_sfx(&SfxScenario::new("text_appear").with_sfx_type("typewriter"));
        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations[0].record.sfx_type, "typewriter");

        let id = recommendations[0].id.clone();
        assert!(learner.record_usage(&id, false, None).await.unwrap());
        let stats = learner.sfx().get(&id).unwrap().record.stats;
        assert_eq!(stats.usage_count, 1);
        assert!((stats.success_score - 0.75 * 0.95).abs() < 1e-9);

        assert!(!learner.record_usage("nope", true, None).await.unwrap());
    }
}
