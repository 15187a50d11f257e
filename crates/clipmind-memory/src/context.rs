//! Token-budgeted context assembly
//!
//! [`ContextBudgeter::build_context`] classifies the prompt, splits the token
//! budget across instructions, retrieved knowledge, conversation history and
//! working-memory state, builds prioritized segments for each, then keeps the
//! highest-priority segments that fit.
//!
//! Budget layout (fractions are configurable):
//!
//! ```text
//! instructions 20% | history 30% | knowledge 35% | task 15%
//! ```

use crate::config::ContextBudgetConfig;
use crate::conversation::{compress_messages, ConversationHistory, ConversationMessage, MessageRole};
use crate::error::MemoryResult;
use crate::lexicon::{extract_keywords, first_domain_match, Domain};
use crate::store::MemoryStore;
use crate::types::{truncate_chars, Importance, MemoryContent, MemoryKind, QueryCriteria, StoreRequest};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Category of archived conversation slices
pub const CONVERSATION_ARCHIVE_CATEGORY: &str = "conversation_archive";

/// Length knowledge entries are summarised to
const KNOWLEDGE_SUMMARY_CHARS: usize = 300;

/// Recent actions listed in the task segment
const TASK_SUMMARY_ACTIONS: usize = 5;

/// Estimate tokens: one per two chars for dense scripts, one per four otherwise
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    let divisor = if text.chars().any(is_dense_script) { 2 } else { 4 };
    (chars + divisor - 1) / divisor
}

fn is_dense_script(c: char) -> bool {
    matches!(c as u32,
        0x0400..=0x04FF      // Cyrillic
        | 0x0600..=0x06FF    // Arabic
        | 0x0900..=0x097F    // Devanagari
        | 0x0E00..=0x0E7F    // Thai
        | 0x1100..=0x11FF    // Hangul Jamo
        | 0x3040..=0x30FF    // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified
        | 0xAC00..=0xD7AF    // Hangul Syllables
        | 0xF900..=0xFAFF    // CJK Compatibility
    )
}

/// What the prompt asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Make something new
    Create,
    /// Repair something broken
    Fix,
    /// Make something better
    Improve,
    /// Change something specific
    Edit,
    /// Describe or justify
    Explain,
}

impl TaskType {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Create => "create",
            TaskType::Fix => "fix",
            TaskType::Improve => "improve",
            TaskType::Edit => "edit",
            TaskType::Explain => "explain",
        }
    }
}

/// Rough size of the task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Under ten words
    Simple,
    /// Everything in between
    Medium,
    /// Over fifty words or explicitly complex
    Complex,
}

/// Classification of a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    /// Task type
    pub task_type: TaskType,
    /// Content domain
    pub domain: Domain,
    /// Complexity
    pub complexity: Complexity,
    /// Extracted keywords
    pub keywords: Vec<String>,
}

const TASK_RULES: &[(TaskType, &[&str])] = &[
    (TaskType::Fix, &["fix", "bug", "broken", "error", "repair", "wrong"]),
    (TaskType::Improve, &["improve", "better", "enhance", "optimize", "polish"]),
    (TaskType::Edit, &["edit", "change", "modify", "update", "adjust", "replace"]),
    (TaskType::Explain, &["explain", "why", "describe", "what"]),
];

/// Classify a prompt by task type, domain and complexity
pub fn analyze_task(prompt: &str) -> TaskAnalysis {
    let lower = prompt.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let task_type = TASK_RULES
        .iter()
        .find(|(_, triggers)| words.iter().any(|w| triggers.contains(w)))
        .map(|(task_type, _)| *task_type)
        .unwrap_or(TaskType::Create);

    let complexity = if words.len() > 50 || words.iter().any(|w| *w == "complex" || *w == "advanced") {
        Complexity::Complex
    } else if words.len() < 10 {
        Complexity::Simple
    } else {
        Complexity::Medium
    };

    TaskAnalysis {
        task_type,
        domain: first_domain_match(prompt),
        complexity,
        keywords: extract_keywords(prompt),
    }
}

/// Token allowances per segment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Overall ceiling
    pub total: usize,
    /// Instructions allowance
    pub instructions: usize,
    /// History allowance
    pub history: usize,
    /// Knowledge allowance
    pub knowledge: usize,
    /// Task allowance
    pub task: usize,
}

impl TokenBudget {
    /// Split `total` by the configured fractions
    pub fn split(total: usize, config: &ContextBudgetConfig) -> Self {
        let share = |fraction: f64| (total as f64 * fraction + 1e-9).floor() as usize;
        Self {
            total,
            instructions: share(config.fractions.instructions),
            history: share(config.fractions.history),
            knowledge: share(config.fractions.knowledge),
            task: share(config.fractions.task),
        }
    }
}

/// Kind of context segment, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Guidance for the generator
    Instructions,
    /// Retrieved memories
    Knowledge,
    /// Conversation history
    History,
    /// Working-memory state
    Task,
}

/// One prioritized piece of context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSegment {
    /// Segment id (entry id for knowledge segments)
    pub id: String,
    /// Kind
    pub kind: SegmentKind,
    /// Text
    pub text: String,
    /// Priority 1-10, higher survives budget pressure
    pub priority: u8,
    /// Estimated tokens of `text`
    pub token_estimate: usize,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Where the text came from
    pub source: String,
}

impl ContextSegment {
    /// Create a segment, estimating its tokens
    pub fn new(
        id: impl Into<String>,
        kind: SegmentKind,
        text: impl Into<String>,
        priority: u8,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            kind,
            token_estimate: estimate_tokens(&text),
            text,
            priority: priority.clamp(1, 10),
            timestamp,
            source: source.into(),
        }
    }

    fn truncated(&self, max_chars: usize) -> Self {
        let text = truncate_chars(&self.text, max_chars);
        Self {
            token_estimate: estimate_tokens(&text),
            text,
            ..self.clone()
        }
    }
}

/// Result of context assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    /// Final context string
    pub text: String,
    /// Accepted segments, in output order
    pub segments: Vec<ContextSegment>,
    /// Prompt classification
    pub analysis: TaskAnalysis,
    /// Budget the context was built against
    pub budget: TokenBudget,
    /// Sum of accepted segment estimates
    pub tokens_used: usize,
}

/// Keep the highest-priority segments that fit in `max_tokens`
///
/// Segments are considered in descending priority (ties keep their input
/// order). A segment of priority 9 or 10 that does not fit is retried cut to
/// `truncate_chars` characters before being dropped.
pub fn optimize_segments(
    mut segments: Vec<ContextSegment>,
    max_tokens: usize,
    truncate_chars: usize,
) -> Vec<ContextSegment> {
    segments.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut used = 0;
    let mut accepted = Vec::new();

    for segment in segments {
        if used + segment.token_estimate <= max_tokens {
            used += segment.token_estimate;
            accepted.push(segment);
        } else if segment.priority >= 9 {
            let cut = segment.truncated(truncate_chars);
            if used + cut.token_estimate <= max_tokens {
                used += cut.token_estimate;
                accepted.push(cut);
            }
        }
    }

    accepted
}

fn instructions_for(analysis: &TaskAnalysis) -> String {
    let domain = match analysis.domain {
        Domain::Animation => "Favor smooth easing and keep motion consistent across scenes.",
        Domain::Audio => "Match music mood and sound effect timing to the pacing of each scene.",
        Domain::Visual => "Keep colors, fonts and layout consistent with the project's style.",
        Domain::Structure => "Keep scenes well paced and the sequence coherent from intro to outro.",
        Domain::General => "Follow the conventions already established in this project.",
    };
    let complexity = match analysis.complexity {
        Complexity::Simple => "Keep the change minimal.",
        Complexity::Medium => "Briefly state the key decisions you make.",
        Complexity::Complex => "Break the work into steps and check each against the remembered constraints.",
    };

    format!(
        "You are assisting with video content creation ({} task, {} domain). \
         Use the remembered context below when it is relevant.\n{}\n{}",
        analysis.task_type.as_str(),
        analysis.domain,
        domain,
        complexity
    )
}

fn knowledge_priority(importance: Importance) -> u8 {
    match importance {
        Importance::Critical => 10,
        Importance::High => 8,
        Importance::Medium => 5,
        Importance::Low => 2,
    }
}

/// Assembles token-bounded context from the store and a conversation ring
pub struct ContextBudgeter {
    store: Arc<MemoryStore>,
    config: ContextBudgetConfig,
    history: Mutex<ConversationHistory>,
}

impl ContextBudgeter {
    /// Create a budgeter; rejects invalid budget fractions
    pub fn new(store: Arc<MemoryStore>, config: ContextBudgetConfig) -> MemoryResult<Self> {
        config.validate()?;
        let history = ConversationHistory::new(config.history_capacity);
        Ok(Self {
            store,
            config,
            history: Mutex::new(history),
        })
    }

    /// Budget configuration
    pub fn config(&self) -> &ContextBudgetConfig {
        &self.config
    }

    /// Append a message; on overflow the oldest half is archived to the store
    ///
    /// Returns the archive entry id when an archive was written.
    pub async fn add_message(
        &self,
        role: MessageRole,
        content: impl Into<String>,
    ) -> MemoryResult<Option<String>> {
        let message = ConversationMessage::new(role, content, self.store.now());
        let overflow = self.history.lock().push(message);

        let Some(archived) = overflow else {
            return Ok(None);
        };
        let (Some(first), Some(last)) = (archived.first(), archived.last()) else {
            return Ok(None);
        };

        let content = MemoryContent::ConversationArchive {
            summary: compress_messages(&archived),
            message_count: archived.len(),
            first_at: first.timestamp,
            last_at: last.timestamp,
        };
        let stored = self
            .store
            .store(
                MemoryKind::Episodic,
                CONVERSATION_ARCHIVE_CATEGORY,
                content,
                StoreRequest::new(Importance::Medium).with_tags(["conversation"]),
            )
            .await;
        let id = match stored {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, messages = archived.len(), "Archive failed, keeping messages in history");
                self.history.lock().restore(archived);
                return Err(e);
            }
        };

        info!(archive_id = %id, messages = archived.len(), "Archived conversation history");
        Ok(Some(id))
    }

    /// Messages currently in the ring, oldest first
    pub fn history(&self) -> Vec<ConversationMessage> {
        self.history.lock().messages().cloned().collect()
    }

    /// Drop the in-memory conversation
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Build a context for `prompt` within `max_tokens` (configured default when `None`)
    pub fn build_context(&self, prompt: &str, max_tokens: Option<usize>) -> BuiltContext {
        let analysis = analyze_task(prompt);
        let budget = TokenBudget::split(max_tokens.unwrap_or(self.config.max_tokens), &self.config);
        let now = self.store.now();

        let mut segments = vec![ContextSegment::new(
            "instructions",
            SegmentKind::Instructions,
            instructions_for(&analysis),
            10,
            format!("instructions:{}:{:?}", analysis.domain, analysis.complexity).to_lowercase(),
            now,
        )];

        segments.extend(self.knowledge_segments(&analysis, budget.knowledge, now));

        if let Some(history) = self.history_segment(budget.history, now) {
            segments.push(history);
        }

        let summary = self.store.working().summary(TASK_SUMMARY_ACTIONS);
        if !summary.is_empty() {
            let task = ContextSegment::new("task", SegmentKind::Task, summary, 9, "working_memory", now);
            if task.token_estimate <= budget.task {
                segments.push(task);
            }
        }

        let mut accepted = optimize_segments(segments, budget.total, self.config.truncate_chars);
        accepted.sort_by_key(|s| s.kind);

        let tokens_used = accepted.iter().map(|s| s.token_estimate).sum();
        let text = accepted
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        debug!(
            task_type = analysis.task_type.as_str(),
            domain = analysis.domain.as_str(),
            segments = accepted.len(),
            tokens_used,
            max_tokens = budget.total,
            "Built context"
        );

        BuiltContext {
            text,
            segments: accepted,
            analysis,
            budget,
            tokens_used,
        }
    }

    fn knowledge_segments(
        &self,
        analysis: &TaskAnalysis,
        budget: usize,
        now: DateTime<Utc>,
    ) -> Vec<ContextSegment> {
        let limit = self.config.knowledge_candidates;

        let mut candidates: Vec<_> = self
            .store
            .search(&analysis.keywords, limit)
            .into_iter()
            .map(|scored| scored.entry)
            .collect();
        candidates.extend(self.store.query(
            &QueryCriteria::new()
                .with_category(analysis.domain.as_str())
                .with_limit(limit),
        ));

        let mut seen = HashSet::new();
        let mut used = 0;
        let mut segments = Vec::new();

        for entry in candidates {
            if entry.category == CONVERSATION_ARCHIVE_CATEGORY || !seen.insert(entry.id.clone()) {
                continue;
            }
            let segment = ContextSegment::new(
                entry.id.clone(),
                SegmentKind::Knowledge,
                entry.summary(KNOWLEDGE_SUMMARY_CHARS),
                knowledge_priority(entry.metadata.importance),
                format!("memory:{}", entry.kind.as_str()),
                now,
            );
            if used + segment.token_estimate > budget {
                continue;
            }
            used += segment.token_estimate;
            segments.push(segment);
        }

        segments
    }

    fn history_segment(&self, budget: usize, now: DateTime<Utc>) -> Option<ContextSegment> {
        let history = self.history.lock();

        let mut used = 0;
        let mut lines = Vec::new();
        for message in history.messages().rev() {
            let mut line = message.render();
            let mut tokens = estimate_tokens(&line);
            if used + tokens > budget {
                line = compress_messages(std::slice::from_ref(message));
                tokens = estimate_tokens(&line);
                if used + tokens > budget {
                    break;
                }
            }
            used += tokens;
            lines.push(line);
        }

        if lines.is_empty() {
            return None;
        }
        lines.reverse();

        Some(ContextSegment::new(
            "history",
            SegmentKind::History,
            lines.join("\n"),
            8,
            "conversation",
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BudgetFractions, MemoryConfig};
    use crate::storage::InMemoryStorage;
    use crate::store::StoreOptions;

    async fn budgeter(config: ContextBudgetConfig) -> (ContextBudgeter, Arc<MemoryStore>) {
        let store = Arc::new(
            MemoryStore::open_with(
                MemoryConfig::default().with_flush_interval_secs(0),
                StoreOptions::new().with_backend(Arc::new(InMemoryStorage::new())),
            )
            .await
            .unwrap(),
        );
        (ContextBudgeter::new(store.clone(), config).unwrap(), store)
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("日本語"), 2);
        assert_eq!(estimate_tokens("привет"), 3);
    }

    #[test]
    fn test_analyze_task() {
        let fix = analyze_task("Fix the broken fade transition");
        assert_eq!(fix.task_type, TaskType::Fix);
        assert_eq!(fix.domain, Domain::Animation);
        assert_eq!(fix.complexity, Complexity::Simple);

        let explain = analyze_task("explain the music choice");
        assert_eq!(explain.task_type, TaskType::Explain);
        assert_eq!(explain.domain, Domain::Audio);

        let create = analyze_task("An advanced product teaser");
        assert_eq!(create.task_type, TaskType::Create);
        assert_eq!(create.complexity, Complexity::Complex);

        let medium = analyze_task("Create a video with one two three four five six seven eight words");
        assert_eq!(medium.complexity, Complexity::Medium);
        assert_eq!(medium.domain, Domain::General);
    }

    #[test]
    fn test_optimize_segments_truncates_high_priority() {
        let now = Utc::now();
        let segments = vec![
            ContextSegment::new("low", SegmentKind::Knowledge, "k".repeat(40), 2, "t", now),
            ContextSegment::new("big", SegmentKind::Task, "t".repeat(2000), 9, "t", now),
            ContextSegment::new("top", SegmentKind::Instructions, "i".repeat(40), 10, "t", now),
        ];

        let accepted = optimize_segments(segments, 80, 200);
        let ids: Vec<_> = accepted.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "big", "low"]);

        let big = &accepted[1];
        assert_eq!(big.text.chars().count(), 203);
        assert_eq!(big.token_estimate, 51);
        assert!(accepted.iter().map(|s| s.token_estimate).sum::<usize>() <= 80);
    }

    #[test]
    fn test_budget_split() {
        let budget = TokenBudget::split(1000, &ContextBudgetConfig::default());
        assert_eq!(budget.instructions, 200);
        assert_eq!(budget.history, 300);
        assert_eq!(budget.knowledge, 350);
        assert_eq!(budget.task, 150);
    }

    #[tokio::test]
    async fn test_invalid_fractions_rejected() {
        let store = Arc::new(
            MemoryStore::open_with(
                MemoryConfig::default().with_flush_interval_secs(0),
                StoreOptions::new().with_backend(Arc::new(InMemoryStorage::new())),
            )
            .await
            .unwrap(),
        );
        let config = ContextBudgetConfig::default().with_fractions(BudgetFractions {
            instructions: 0.6,
            history: 0.6,
            knowledge: 0.0,
            task: 0.0,
        });
        assert!(ContextBudgeter::new(store, config).is_err());
    }

    #[tokio::test]
    async fn test_build_context_orders_segments() {
        let (budgeter, store) = budgeter(ContextBudgetConfig::default()).await;

        store
            .store(
                MemoryKind::Procedural,
                "animation",
                MemoryContent::text("Use ease-out for fade transitions"),
                StoreRequest::new(Importance::Critical),
            )
            .await
            .unwrap();
        store.set_current_task(Some("polish the intro".to_string()));
        budgeter.add_message(MessageRole::User, "make the intro fade smoother").await.unwrap();
        budgeter.add_message(MessageRole::Assistant, "Adjusted the fade").await.unwrap();

        let built = budgeter.build_context("Improve the fade transition", Some(2000));

        assert_eq!(built.analysis.task_type, TaskType::Improve);
        assert_eq!(built.analysis.domain, Domain::Animation);

        let kinds: Vec<_> = built.segments.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentKind::Instructions,
                SegmentKind::Knowledge,
                SegmentKind::History,
                SegmentKind::Task
            ]
        );
        assert!(built.text.contains("Use ease-out for fade transitions"));
        assert!(built.text.contains("user: make the intro fade smoother\nassistant: Adjusted the fade"));
        assert!(built.text.contains("Current task: polish the intro"));
        assert!(built.tokens_used <= 2000);
    }

    #[tokio::test]
    async fn test_build_context_respects_small_budget() {
        let (budgeter, store) = budgeter(ContextBudgetConfig::default()).await;

        for i in 0..10 {
            store
                .store(
                    MemoryKind::Semantic,
                    "visual",
                    MemoryContent::text(format!("palette rule {} {}", i, "teal ".repeat(30))),
                    StoreRequest::new(Importance::Medium),
                )
                .await
                .unwrap();
        }

        let built = budgeter.build_context("change the palette color", Some(150));
        assert!(built.tokens_used <= 150);
        assert_eq!(built.segments[0].kind, SegmentKind::Instructions);
    }

    #[tokio::test]
    async fn test_history_overflow_archives_to_store() {
        let config = ContextBudgetConfig::default().with_history_capacity(4);
        let (budgeter, store) = budgeter(config).await;

        for i in 0..4 {
            let archived = budgeter
                .add_message(MessageRole::User, format!("message {}", i))
                .await
                .unwrap();
            assert!(archived.is_none());
        }
        let archive_id = budgeter
            .add_message(MessageRole::User, "message 4")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(budgeter.history().len(), 3);

        let archive = store.peek(&archive_id).unwrap();
        assert_eq!(archive.kind, MemoryKind::Episodic);
        assert_eq!(archive.category, CONVERSATION_ARCHIVE_CATEGORY);
        match archive.content {
            MemoryContent::ConversationArchive {
                message_count,
                summary,
                ..
            } => {
                assert_eq!(message_count, 2);
                assert_eq!(summary, "user: message 0\nuser: message 1");
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_archive_failure_keeps_history() {
        let config = ContextBudgetConfig::default().with_history_capacity(4);
        let (budgeter, store) = budgeter(config).await;

        for i in 0..4 {
            budgeter
                .add_message(MessageRole::User, format!("message {}", i))
                .await
                .unwrap();
        }
        store.shutdown().await.unwrap();

        let err = budgeter
            .add_message(MessageRole::User, "message 4")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::MemoryError::Closed));

        let contents: Vec<_> = budgeter.history().into_iter().map(|m| m.content).collect();
        assert_eq!(
            contents,
            vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
        );
    }

    #[tokio::test]
    async fn test_history_segment_compresses_long_messages() {
        let (budgeter, store) = budgeter(ContextBudgetConfig::default()).await;
        budgeter.add_message(MessageRole::User, "keep it short").await.unwrap();
        budgeter
            .add_message(MessageRole::Tool, "x".repeat(1000))
            .await
            .unwrap();

        let segment = budgeter.history_segment(120, store.now()).unwrap();
        let lines: Vec<_> = segment.text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "user: keep it short");
        assert!(lines[1].starts_with("tool: x"));
        assert!(lines[1].ends_with("..."));
        assert!(estimate_tokens(&segment.text) <= 120);

        let roomy = budgeter.history_segment(1000, store.now()).unwrap();
        assert!(!roomy.text.contains("..."));
    }
}
