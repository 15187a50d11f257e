//! Memory entry types
//!
//! A [`MemoryEntry`] is the unit of storage. Its payload is a tagged
//! [`MemoryContent`] variant; domain-specific payloads travel as
//! schema-tagged [`TypedRecord`]s that are validated when decoded.

use crate::error::{MemoryError, MemoryResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Kind of memory being stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Events and outcomes (tool errors, archived conversations)
    Episodic,
    /// Facts and knowledge
    Semantic,
    /// Learned patterns, actions and preferences
    Procedural,
    /// Short-lived task state
    Working,
}

impl MemoryKind {
    /// All kinds, in declaration order
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::Episodic,
        MemoryKind::Semantic,
        MemoryKind::Procedural,
        MemoryKind::Working,
    ];

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Procedural => "procedural",
            MemoryKind::Working => "working",
        }
    }
}

/// Importance of an entry; also a veto against automatic eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    /// Lowest importance, eligible for age-based cleanup
    Low,
    /// Default importance
    Medium,
    /// Seeds the active context
    High,
    /// Never evicted automatically
    Critical,
}

impl Importance {
    /// Weight used by the relevance formula
    pub fn weight(&self) -> f64 {
        match self {
            Importance::Critical => 100.0,
            Importance::High => 50.0,
            Importance::Medium => 20.0,
            Importance::Low => 5.0,
        }
    }

    /// Whether stores of this importance seed the active context
    pub fn is_elevated(&self) -> bool {
        matches!(self, Importance::High | Importance::Critical)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Critical => "critical",
            Importance::High => "high",
            Importance::Medium => "medium",
            Importance::Low => "low",
        }
    }
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Medium
    }
}

/// Bookkeeping attached to every entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Importance level
    #[serde(default)]
    pub importance: Importance,

    /// Number of touches (only increases)
    #[serde(default)]
    pub access_count: u64,

    /// Last touch or update (never moves backwards)
    pub last_accessed: DateTime<Utc>,

    /// Tags for filtering
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Owning project, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Related entry ids
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_ids: Vec<String>,
}

/// Opaque payload tagged with a schema name and version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedRecord {
    /// Schema tag (e.g. `animation_pattern`, `tool_error`)
    pub schema: String,

    /// Schema version
    pub version: u32,

    /// Serialized record
    pub data: Value,
}

impl TypedRecord {
    /// Encode a value under a schema tag
    pub fn encode<T: Serialize>(
        schema: impl Into<String>,
        version: u32,
        value: &T,
    ) -> MemoryResult<Self> {
        let schema = schema.into();
        let data = serde_json::to_value(value)
            .map_err(|e| MemoryError::serialization(format!("encode_{}", schema), e))?;

        Ok(Self {
            schema,
            version,
            data,
        })
    }

    /// Decode the payload, checking the schema tag first
    pub fn decode<T: DeserializeOwned>(&self, schema: &str) -> MemoryResult<T> {
        if self.schema != schema {
            return Err(MemoryError::Schema {
                expected: schema.to_string(),
                found: self.schema.clone(),
            });
        }

        serde_json::from_value(self.data.clone())
            .map_err(|e| MemoryError::serialization(format!("decode_{}", schema), e))
    }
}

/// Payload of a memory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MemoryContent {
    /// Free-form observation
    Text {
        /// The observation
        text: String,
    },

    /// An action taken by the agent
    Action {
        /// Action description
        action: String,
        /// Whether it succeeded
        success: bool,
    },

    /// Compressed slice of conversation history
    ConversationArchive {
        /// Compressed transcript
        summary: String,
        /// Number of archived messages
        message_count: usize,
        /// Timestamp of the first archived message
        first_at: DateTime<Utc>,
        /// Timestamp of the last archived message
        last_at: DateTime<Utc>,
    },

    /// Schema-tagged record
    Record(TypedRecord),

    /// Arbitrary structured payload
    Json(Value),
}

impl MemoryContent {
    /// Free-form text content
    pub fn text(text: impl Into<String>) -> Self {
        MemoryContent::Text { text: text.into() }
    }

    /// Action content
    pub fn action(action: impl Into<String>, success: bool) -> Self {
        MemoryContent::Action {
            action: action.into(),
            success,
        }
    }

    /// Schema-tagged record content
    pub fn record<T: Serialize>(schema: &str, version: u32, value: &T) -> MemoryResult<Self> {
        Ok(MemoryContent::Record(TypedRecord::encode(schema, version, value)?))
    }

    /// The record payload, if this is a record
    pub fn as_record(&self) -> Option<&TypedRecord> {
        match self {
            MemoryContent::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Plain text used for embeddings, keyword search and token estimates
    pub fn searchable_text(&self) -> String {
        match self {
            MemoryContent::Text { text } => text.clone(),
            MemoryContent::Action { action, success } => {
                format!(
                    "{} ({})",
                    action,
                    if *success { "succeeded" } else { "failed" }
                )
            }
            MemoryContent::ConversationArchive { summary, .. } => summary.clone(),
            MemoryContent::Record(record) => {
                let mut parts = vec![record.schema.clone()];
                flatten_json(&record.data, &mut parts);
                parts.join(" ")
            }
            MemoryContent::Json(value) => {
                let mut parts = Vec::new();
                flatten_json(value, &mut parts);
                parts.join(" ")
            }
        }
    }

    /// The payload as a JSON value (record payloads are unwrapped)
    pub fn to_json(&self) -> Value {
        match self {
            MemoryContent::Record(record) => record.data.clone(),
            MemoryContent::Json(value) => value.clone(),
            other => serde_json::to_value(other)
                .ok()
                .and_then(|mut v| v.get_mut("data").map(Value::take))
                .unwrap_or(Value::Null),
        }
    }

    /// Shallow-merge `partial` into the payload
    ///
    /// Record and JSON payloads merge into their data object; the fixed
    /// variants merge field-wise and must still deserialize afterwards.
    pub fn merge(&mut self, partial: &Map<String, Value>) -> MemoryResult<()> {
        match self {
            MemoryContent::Json(Value::Object(map)) => {
                map.extend(partial.clone());
                Ok(())
            }
            MemoryContent::Json(other) => {
                *other = Value::Object(partial.clone());
                Ok(())
            }
            MemoryContent::Record(record) => match &mut record.data {
                Value::Object(map) => {
                    map.extend(partial.clone());
                    Ok(())
                }
                _ => Err(MemoryError::validation(
                    "content",
                    "record payload is not an object",
                    record.schema.clone(),
                )),
            },
            fixed => {
                let mut value = serde_json::to_value(&*fixed)
                    .map_err(|e| MemoryError::serialization("merge_content", e))?;
                if let Some(Value::Object(data)) = value.get_mut("data") {
                    data.extend(partial.clone());
                }
                *fixed = serde_json::from_value(value).map_err(|e| {
                    MemoryError::validation("content", "merged payload is invalid", e.to_string())
                })?;
                Ok(())
            }
        }
    }
}

/// Collect keys and scalar values of a JSON document as text fragments
pub(crate) fn flatten_json(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(b.to_string()),
        Value::Number(n) => out.push(n.to_string()),
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| flatten_json(item, out)),
        Value::Object(map) => {
            for (key, item) in map {
                out.push(key.clone());
                flatten_json(item, out);
            }
        }
    }
}

/// A single stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique, immutable id (UUIDv7)
    pub id: String,

    /// Memory kind
    pub kind: MemoryKind,

    /// Free-form category (e.g. `animation`, `tool_error`)
    pub category: String,

    /// Payload
    pub content: MemoryContent,

    /// Bookkeeping
    pub metadata: EntryMetadata,

    /// Hashed bag-of-words vector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryEntry {
    /// Age in fractional hours relative to `now` (never negative)
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.metadata.created_at).num_milliseconds().max(0);
        millis as f64 / 3_600_000.0
    }

    /// Record an access: bump the counter and advance `last_accessed`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.metadata.access_count += 1;
        self.mark_accessed(now);
    }

    /// Advance `last_accessed` without counting an access
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        if now > self.metadata.last_accessed {
            self.metadata.last_accessed = now;
        }
    }

    /// Whether the entry carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.contains(tag)
    }

    /// Searchable text of the payload
    pub fn text(&self) -> String {
        self.content.searchable_text()
    }

    /// One-line summary used by the active context and context assembly
    pub fn summary(&self, max_chars: usize) -> String {
        let text = self.text();
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("[{}] {}", self.category, truncate_chars(&text, max_chars))
    }
}

/// Truncate to at most `max_chars` characters, appending `...` when cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Options for [`crate::MemoryStore::store`]
#[derive(Debug, Clone, Default)]
pub struct StoreRequest {
    /// Importance level
    pub importance: Importance,
    /// Tags
    pub tags: Vec<String>,
    /// Related entry ids
    pub related_ids: Vec<String>,
}

impl StoreRequest {
    /// Request with the given importance
    pub fn new(importance: Importance) -> Self {
        Self {
            importance,
            ..Default::default()
        }
    }

    /// Set tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set related ids
    pub fn with_related(mut self, related_ids: Vec<String>) -> Self {
        self.related_ids = related_ids;
        self
    }
}

/// Filter for [`crate::MemoryStore::query`]
#[derive(Debug, Clone, Default)]
pub struct QueryCriteria {
    /// Restrict to a kind
    pub kind: Option<MemoryKind>,
    /// Restrict to a category
    pub category: Option<String>,
    /// Entry must carry at least one of these tags
    pub tags: Vec<String>,
    /// Restrict to a project
    pub project_id: Option<String>,
    /// Restrict to an importance level
    pub importance: Option<Importance>,
    /// Keywords contributing a relevance bonus
    pub keywords: Vec<String>,
    /// Maximum results
    pub limit: Option<usize>,
}

impl QueryCriteria {
    /// Empty criteria (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a kind
    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to a category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Require any of these tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to a project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Restrict to an importance level
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Add relevance keywords
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Cap the number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an entry passes the filters (keywords and limit are not filters)
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &entry.category != category {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| entry.has_tag(t)) {
            return false;
        }
        if let Some(project) = &self.project_id {
            if entry.metadata.project_id.as_ref() != Some(project) {
                return false;
            }
        }
        if let Some(importance) = self.importance {
            if entry.metadata.importance != importance {
                return false;
            }
        }
        true
    }
}
