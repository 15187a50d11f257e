//! Learning events delivered by the transport layer

use clipmind_learn::{AnimationPattern, AudioSceneMapping, CompositionTemplate, SfxPattern};
use clipmind_memory::Importance;
use serde::{Deserialize, Serialize};

/// Which learner a usage report is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerKind {
    /// Animation patterns
    Motion,
    /// Music mappings
    Music,
    /// Sound effects
    Sfx,
    /// Composition templates
    Composition,
}

/// Something the agent learned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningEvent {
    /// An animation worked
    MotionSuccess {
        /// Observed pattern
        pattern: AnimationPattern,
        /// Feedback 1-5
        #[serde(default)]
        feedback: Option<u8>,
    },
    /// A music choice worked
    MusicSuccess {
        /// Observed mapping
        mapping: AudioSceneMapping,
        /// Feedback 1-5
        #[serde(default)]
        feedback: Option<u8>,
    },
    /// A sound effect worked
    SfxSuccess {
        /// Observed pattern
        pattern: SfxPattern,
        /// Feedback 1-5
        #[serde(default)]
        feedback: Option<u8>,
    },
    /// A composition worked
    CompositionSuccess {
        /// Observed template
        template: CompositionTemplate,
        /// Feedback 1-5
        #[serde(default)]
        feedback: Option<u8>,
    },
    /// A recommended record was used
    Usage {
        /// Learner owning the record
        learner: LearnerKind,
        /// Record id
        id: String,
        /// Whether the use went well
        success: bool,
        /// Feedback 1-5
        #[serde(default)]
        feedback: Option<u8>,
    },
    /// Free-form knowledge worth remembering
    Insight {
        /// Store category
        category: String,
        /// The insight
        text: String,
        /// Importance
        #[serde(default)]
        importance: Importance,
        /// Tags
        #[serde(default)]
        tags: Vec<String>,
    },
}

impl LearningEvent {
    /// Snake-case event name
    pub fn name(&self) -> &'static str {
        match self {
            LearningEvent::MotionSuccess { .. } => "motion_success",
            LearningEvent::MusicSuccess { .. } => "music_success",
            LearningEvent::SfxSuccess { .. } => "sfx_success",
            LearningEvent::CompositionSuccess { .. } => "composition_success",
            LearningEvent::Usage { .. } => "usage",
            LearningEvent::Insight { .. } => "insight",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_deserialize_from_transport_json() {
        let event: LearningEvent = serde_json::from_value(json!({
            "type": "sfx_success",
            "pattern": {
                "trigger_type": "transition",
                "sfx_type": "whoosh",
                "timing_offset_ms": -120,
                "volume": 0.5
            },
            "feedback": 5
        }))
        .unwrap();

        match event {
            LearningEvent::SfxSuccess { pattern, feedback } => {
                assert_eq!(pattern.sfx_type, "whoosh");
                assert_eq!(pattern.stats.usage_count, 0);
                assert_eq!(feedback, Some(5));
            }
            other => panic!("unexpected event {:?}", other),
        }

        let insight: LearningEvent = serde_json::from_value(json!({
            "type": "insight",
            "category": "brand",
            "text": "Client prefers muted colors"
        }))
        .unwrap();
        assert_eq!(insight.name(), "insight");
    }
}
