//! Shared record bookkeeping for learned domain records

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Maximum evidence items kept per record
pub const MAX_EVIDENCE: usize = 20;

/// Success and usage bookkeeping shared by every learned record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordStats {
    /// Success score in [0, 1]
    pub success_score: f64,

    /// Number of recorded uses
    pub usage_count: u64,

    /// Last recorded use
    pub last_used: Option<DateTime<Utc>>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl RecordStats {
    /// Stats for a built-in catalog record
    pub fn seeded(success_score: f64, now: DateTime<Utc>) -> Self {
        Self {
            success_score: success_score.clamp(0.0, 1.0),
            usage_count: 0,
            last_used: None,
            created_at: now,
        }
    }

    /// Stats for a record first observed with `feedback`
    pub fn observed(feedback: u8, now: DateTime<Utc>) -> Self {
        Self {
            success_score: feedback_score(feedback),
            usage_count: 1,
            last_used: Some(now),
            created_at: now,
        }
    }
}

impl Default for RecordStats {
    fn default() -> Self {
        Self::seeded(0.0, Utc::now())
    }
}

/// One observation supporting a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// What was observed
    pub summary: String,

    /// Feedback given, 1-5
    pub feedback: u8,

    /// When it was observed
    pub observed_at: DateTime<Utc>,
}

/// A domain record that can be learned from feedback
///
/// Records are stored as procedural memories whose category is
/// [`LearnedRecord::SCHEMA`] and whose content is a schema-tagged record.
pub trait LearnedRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Schema tag, also used as the store category
    const SCHEMA: &'static str;

    /// Schema version
    const VERSION: u32;

    /// Distinguishing key; two records with the same key are the same record
    fn key(&self) -> String;

    /// Tag candidates are filtered by when recommending
    fn primary_tag(&self) -> String;

    /// All tags stored with the record
    fn tags(&self) -> Vec<String> {
        vec![self.primary_tag()]
    }

    /// One-line description used as evidence
    fn summary(&self) -> String;

    /// Shared stats
    fn stats(&self) -> &RecordStats;

    /// Shared stats, mutably
    fn stats_mut(&mut self) -> &mut RecordStats;

    /// Supporting evidence, oldest first
    fn evidence_mut(&mut self) -> &mut Vec<Evidence>;

    /// Fold a new observation of the same record into this one
    fn absorb(&mut self, _observed: &Self) {}
}

/// Tag for a secondary dimension such as `pacing:fast`
///
/// Keeps secondary values from matching primary-tag candidate filters.
pub fn dimension_tag(dimension: &str, value: &str) -> String {
    format!("{}:{}", dimension, value)
}

/// Clamp feedback to 1-5, defaulting to 4
pub fn normalize_feedback(feedback: Option<u8>) -> u8 {
    feedback.unwrap_or(4).clamp(1, 5)
}

/// Feedback mapped to [0.2, 1]
pub fn feedback_score(feedback: u8) -> f64 {
    feedback.clamp(1, 5) as f64 / 5.0
}

/// Append evidence, dropping the oldest past [`MAX_EVIDENCE`]
pub fn push_evidence(evidence: &mut Vec<Evidence>, item: Evidence) {
    evidence.push(item);
    if evidence.len() > MAX_EVIDENCE {
        let excess = evidence.len() - MAX_EVIDENCE;
        evidence.drain(..excess);
    }
}

/// Lowercased union of two keyword lists, preserving first-seen order
pub fn merge_keywords(into: &mut Vec<String>, from: &[String]) {
    for keyword in from {
        let keyword = keyword.to_lowercase();
        if !into.contains(&keyword) {
            into.push(keyword);
        }
    }
}

/// Fraction of `wanted` keywords present in `have` (case-insensitive)
pub fn keyword_overlap(have: &[String], wanted: &[String]) -> f64 {
    if wanted.is_empty() {
        return 0.0;
    }
    let matched = wanted
        .iter()
        .filter(|w| have.iter().any(|h| h.eq_ignore_ascii_case(w)))
        .count();
    matched as f64 / wanted.len() as f64
}

/// Whether `actual` is within 25% of `target`
pub fn within_quarter(actual: f64, target: f64) -> bool {
    target > 0.0 && ((actual - target).abs() / target) <= 0.25
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_normalization() {
        assert_eq!(normalize_feedback(None), 4);
        assert_eq!(normalize_feedback(Some(0)), 1);
        assert_eq!(normalize_feedback(Some(9)), 5);
        assert!((feedback_score(4) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_evidence_is_capped() {
        let now = Utc::now();
        let mut evidence = Vec::new();
        for i in 0..25 {
            push_evidence(
                &mut evidence,
                Evidence {
                    summary: format!("use {}", i),
                    feedback: 4,
                    observed_at: now,
                },
            );
        }
        assert_eq!(evidence.len(), MAX_EVIDENCE);
        assert_eq!(evidence[0].summary, "use 5");
    }

    #[test]
    fn test_keyword_helpers() {
        let mut keywords = vec!["intro".to_string()];
        merge_keywords(&mut keywords, &["Intro".to_string(), "Logo".to_string()]);
        assert_eq!(keywords, vec!["intro", "logo"]);

        let overlap = keyword_overlap(&keywords, &["logo".to_string(), "outro".to_string()]);
        assert!((overlap - 0.5).abs() < 1e-9);

        assert!(within_quarter(1100.0, 1000.0));
        assert!(!within_quarter(1300.0, 1000.0));
    }
}
