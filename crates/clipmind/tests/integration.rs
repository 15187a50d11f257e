//! End-to-end tests over the `ClipMind` handle

use async_trait::async_trait;
use chrono::Duration;
use clipmind::prelude::*;
use clipmind_learn::{motion::motion_catalog, MusicScenario};
use clipmind_memory::{InMemoryStorage, ManualClock};
use clipmind_recovery::{FallbackTarget, RecoveryConfig};
use serde_json::{json, Value};
use std::sync::Arc;

fn file_config(root: &std::path::Path) -> ClipMindConfig {
    ClipMindConfig::default().with_memory(MemoryConfig::new(root).with_flush_interval_secs(0))
}

async fn in_memory(clock: Arc<ManualClock>) -> ClipMind {
    ClipMind::initialize_with(
        ClipMindConfig::default().with_memory(MemoryConfig::default().with_flush_interval_secs(0)),
        StoreOptions::new()
            .with_backend(Arc::new(InMemoryStorage::new()))
            .with_clock(clock),
    )
    .await
    .unwrap()
}

struct FlakyRender;

#[async_trait]
impl ToolExecutor for FlakyRender {
    async fn execute(&self, tool: &str, _args: &Value) -> Result<Value, ToolFailure> {
        match tool {
            "render_lite" => Ok(json!({"frames": 120})),
            _ => Err(ToolFailure::new("ENOENT: no such file or directory")),
        }
    }
}

#[tokio::test]
async fn test_memory_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first = ClipMind::initialize_with(file_config(dir.path()), StoreOptions::new())
        .await
        .unwrap();
    let id = first
        .learn(LearningEvent::Insight {
            category: "brand".to_string(),
            text: "Client prefers muted teal palettes".to_string(),
            importance: Importance::High,
            tags: vec!["palette".to_string()],
        })
        .await
        .unwrap()
        .unwrap();
    let seeded = first.get_stats().learners;

    let err = ClipMind::initialize_with(file_config(dir.path()), StoreOptions::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, MemoryError::AlreadyOpen { .. }));

    first.shutdown().await.unwrap();
    drop(first);

    let second = ClipMind::initialize_with(file_config(dir.path()), StoreOptions::new())
        .await
        .unwrap();
    let entry = second.memory().peek(&id).unwrap();
    assert!(entry.text().contains("teal"));
    assert_eq!(second.get_stats().learners, seeded);
    assert_eq!(second.search(&["palette".to_string()])[0].entry.id, id);

    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_removes_stale_actions_only() {
    let clock = Arc::new(ManualClock::starting_now());
    let memory = in_memory(clock.clone()).await;

    memory.record_action("render intro", true).await.unwrap();
    memory.record_action("upload draft", false).await.unwrap();
    let before = memory.memory().len();

    clock.advance(Duration::days(10));
    let report = memory.cleanup().await.unwrap();
    assert_eq!(report.total(), 0);

    clock.advance(Duration::days(21));
    let report = memory.cleanup().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.consolidated, 0);
    assert_eq!(memory.memory().len(), before - 1);

    let remaining = memory
        .memory()
        .list(&QueryCriteria::new().with_category("action"));
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].has_tag("failure"));
}

#[tokio::test]
async fn test_learners_seed_once_across_restarts() {
    let dir = tempfile::tempdir().unwrap();

    for _ in 0..2 {
        let memory = ClipMind::initialize_with(file_config(dir.path()), StoreOptions::new())
            .await
            .unwrap();
        assert_eq!(
            memory.motion().patterns().len(),
            motion_catalog(memory.memory().now()).len()
        );
        memory.shutdown().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_escalate_to_fallback() {
    let clock = Arc::new(ManualClock::starting_now());
    let memory = ClipMind::initialize_with(
        ClipMindConfig::default()
            .with_memory(MemoryConfig::default().with_flush_interval_secs(0))
            .with_recovery(
                RecoveryConfig::default()
                    .with_escalation_threshold(1)
                    .with_fallback("upload", FallbackTarget::new("render_lite")),
            ),
        StoreOptions::new()
            .with_backend(Arc::new(InMemoryStorage::new()))
            .with_clock(clock),
    )
    .await
    .unwrap();

    let failure = ToolFailure::new("connection refused");
    for _ in 0..2 {
        let outcome = memory
            .recover("upload", json!({}), &failure, &FlakyRender)
            .await
            .unwrap();
        assert_eq!(outcome.plan.strategy, RecoveryStrategy::Retry);
        assert!(!outcome.is_success());
    }

    let third = memory
        .recover("upload", json!({}), &failure, &FlakyRender)
        .await
        .unwrap();
    assert!(third.plan.escalated);
    assert_eq!(third.plan.strategy, RecoveryStrategy::Fallback);
    assert!(third.is_success());

    let stats = memory.get_stats().errors;
    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.by_tool["upload"], 3);
    assert_eq!(stats.fallback_successes, 1);
}

#[tokio::test]
async fn test_permission_failure_needs_review() {
    let clock = Arc::new(ManualClock::starting_now());
    let memory = in_memory(clock).await;

    let outcome = memory
        .recover(
            "export",
            json!({}),
            &ToolFailure::new("Permission denied while writing output"),
            &FlakyRender,
        )
        .await
        .unwrap();
    assert_eq!(outcome.category, ErrorCategory::Permission);
    assert!(outcome.requires_manual_review());
    assert_eq!(outcome.attempts, 0);
}

#[tokio::test]
async fn test_fallback_through_configured_tool() {
    let clock = Arc::new(ManualClock::starting_now());
    let memory = ClipMind::initialize_with(
        ClipMindConfig::default()
            .with_memory(MemoryConfig::default().with_flush_interval_secs(0))
            .with_recovery(RecoveryConfig::default().with_fallback(
                "render",
                FallbackTarget::new("render_lite"),
            )),
        StoreOptions::new()
            .with_backend(Arc::new(InMemoryStorage::new()))
            .with_clock(clock),
    )
    .await
    .unwrap();

    let outcome = memory
        .recover(
            "render",
            json!({"scene": 2}),
            &ToolFailure::new("ENOENT: no such file or directory"),
            &FlakyRender,
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.category, ErrorCategory::FileSystem);
    assert_eq!(outcome.result, Some(json!({"frames": 120})));
    assert_eq!(memory.get_stats().errors.fallback_successes, 1);
}

#[tokio::test]
async fn test_context_reflects_session() {
    let clock = Arc::new(ManualClock::starting_now());
    let memory = in_memory(clock).await;
    memory.set_project_context("launch", "/work/launch");
    memory.set_current_task(Some("Score the launch trailer".to_string()));

    memory
        .store(
            MemoryKind::Semantic,
            "audio",
            MemoryContent::text("Upbeat electronic music works for product launches"),
            StoreRequest::new(Importance::High).with_tags(["music"]),
        )
        .await
        .unwrap();
    memory
        .add_to_history(MessageRole::User, "Pick music for the launch trailer")
        .await
        .unwrap();

    let built = memory.build_context("Pick upbeat music for the launch trailer");
    assert!(built.tokens_used <= built.budget.total);
    assert!(built.text.contains("launch"));
    assert_eq!(
        memory.get_context_for_ai("Pick upbeat music for the launch trailer"),
        built.text
    );

    let music = memory
        .audio()
        .recommend_music(&MusicScenario::new("intro").with_mood("energetic"));
    assert!(!music.is_empty());

    memory.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_learning_events_from_json() {
    let clock = Arc::new(ManualClock::starting_now());
    let memory = in_memory(clock).await;

    let event: LearningEvent = serde_json::from_value(json!({
        "type": "composition_success",
        "template": {
            "name": "launch-countdown",
            "category": "social",
            "scenes": ["hook", "countdown", "cta"],
            "duration_secs": 12.0,
            "pacing": "fast",
            "aspect_ratio": "9:16"
        },
        "feedback": 5
    }))
    .unwrap();

    let id = memory.learn(event).await.unwrap().unwrap();
    let recommendations = memory
        .composition()
        .recommend(&CompositionScenario::new("social").with_pacing("fast"));
    assert!(recommendations.iter().any(|r| r.id == id));
    assert_eq!(memory.get_stats().learners.templates, 6);
}
