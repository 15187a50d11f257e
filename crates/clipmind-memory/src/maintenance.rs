//! Eviction, consolidation and statistics for the memory store

use crate::error::MemoryResult;
use crate::store::{relevance, MemoryStore};
use crate::types::{Importance, MemoryKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Groups larger than this are consolidated
const CONSOLIDATE_GROUP_THRESHOLD: usize = 10;

/// Entries kept per consolidated group
const CONSOLIDATE_KEEP: usize = 5;

/// Snapshot of store contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total entries
    pub total_entries: usize,

    /// Entries per kind
    pub by_kind: BTreeMap<String, usize>,

    /// Entries per category
    pub by_category: BTreeMap<String, usize>,

    /// Entries per importance
    pub by_importance: BTreeMap<String, usize>,

    /// Approximate serialized size in bytes
    pub approx_bytes: usize,

    /// Oldest creation time
    pub oldest: Option<DateTime<Utc>>,

    /// Newest creation time
    pub newest: Option<DateTime<Utc>>,

    /// Active-context ring size
    pub active_context: usize,

    /// Recent-actions ring size
    pub recent_actions: usize,

    /// Whether there are unflushed changes
    pub dirty: bool,
}

impl MemoryStore {
    /// Remove old, low-importance, rarely accessed entries
    ///
    /// An entry is removed only when it is older than `max_age`, has
    /// importance `low` and has been accessed fewer than two times.
    pub async fn cleanup(&self, max_age: Duration) -> MemoryResult<usize> {
        self.inner.ensure_open()?;

        let max_age_hours = max_age.num_milliseconds() as f64 / 3_600_000.0;

        let removed = {
            let now = self.inner.clock.now();
            let mut state = self.inner.state.lock();

            let expired: Vec<String> = state
                .entries
                .values()
                .filter(|e| {
                    e.age_hours(now) > max_age_hours
                        && e.metadata.importance == Importance::Low
                        && e.metadata.access_count < 2
                })
                .map(|e| e.id.clone())
                .collect();

            for id in &expired {
                state.entries.remove(id);
            }
            if !expired.is_empty() {
                state.dirty = true;
            }
            expired.len()
        };

        if removed > 0 {
            self.inner.flush_if_dirty().await?;
        }

        info!(
            removed,
            max_age_days = max_age.num_days(),
            "Memory cleanup finished"
        );
        Ok(removed)
    }

    /// Trim oversized (kind, category) groups to their most relevant entries
    ///
    /// Critical entries are never removed.
    pub async fn consolidate(&self) -> MemoryResult<usize> {
        self.consolidate_excluding(&[]).await
    }

    /// [`MemoryStore::consolidate`], leaving the named categories untouched
    ///
    /// Used for categories whose entry count is itself meaningful, such as
    /// failure logs or learned catalogs.
    pub async fn consolidate_excluding(&self, excluded: &[&str]) -> MemoryResult<usize> {
        self.inner.ensure_open()?;

        let removed = {
            let now = self.inner.clock.now();
            let mut state = self.inner.state.lock();

            let mut groups: HashMap<(MemoryKind, String), Vec<(String, f64, Importance)>> =
                HashMap::new();
            for entry in state
                .entries
                .values()
                .filter(|e| !excluded.contains(&e.category.as_str()))
            {
                groups
                    .entry((entry.kind, entry.category.clone()))
                    .or_default()
                    .push((
                        entry.id.clone(),
                        relevance(entry, now, &[]),
                        entry.metadata.importance,
                    ));
            }

            let mut doomed = Vec::new();
            for (_, mut members) in groups {
                if members.len() <= CONSOLIDATE_GROUP_THRESHOLD {
                    continue;
                }
                members.sort_by(|a, b| b.1.total_cmp(&a.1));
                doomed.extend(
                    members
                        .into_iter()
                        .skip(CONSOLIDATE_KEEP)
                        .filter(|(_, _, importance)| *importance != Importance::Critical)
                        .map(|(id, _, _)| id),
                );
            }

            for id in &doomed {
                state.entries.remove(id);
            }
            if !doomed.is_empty() {
                state.dirty = true;
            }
            doomed.len()
        };

        if removed > 0 {
            self.inner.flush_if_dirty().await?;
        }

        info!(removed, excluded = excluded.len(), "Memory consolidation finished");
        Ok(removed)
    }

    /// Totals by kind, category and importance plus ring sizes
    pub fn stats(&self) -> StoreStats {
        let state = self.inner.state.lock();
        let mut stats = StoreStats {
            total_entries: state.entries.len(),
            active_context: state.working.active_context.len(),
            recent_actions: state.working.recent_actions.len(),
            dirty: state.dirty,
            ..Default::default()
        };

        for entry in state.entries.values() {
            *stats
                .by_kind
                .entry(entry.kind.as_str().to_string())
                .or_default() += 1;
            *stats.by_category.entry(entry.category.clone()).or_default() += 1;
            *stats
                .by_importance
                .entry(entry.metadata.importance.as_str().to_string())
                .or_default() += 1;

            stats.approx_bytes += serde_json::to_vec(entry).map(|b| b.len()).unwrap_or(0);

            let created = entry.metadata.created_at;
            stats.oldest = Some(stats.oldest.map_or(created, |o| o.min(created)));
            stats.newest = Some(stats.newest.map_or(created, |n| n.max(created)));
        }

        stats
    }
}
