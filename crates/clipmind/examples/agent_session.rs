//! # Agent Session Demo
//!
//! Walks through one agent session against an in-process memory store:
//!
//! ## Features Demonstrated
//!
//! ### 1. Project and Conversation
//! - Switching project context
//! - Recording actions and conversation turns
//!
//! ### 2. Learners
//! - Motion, music and composition recommendations
//! - Feeding successes and usage back in
//!
//! ### 3. Tool Recovery
//! - Classifying a failure and falling back to another tool
//!
//! ### 4. Context and Maintenance
//! - Token-budgeted context for the next generator call
//! - Statistics and cleanup
//!
//! ## Run This Example
//!
//! ```bash
//! cargo run --example agent_session
//! ```

use async_trait::async_trait;
use clipmind::prelude::*;
use clipmind_memory::InMemoryStorage;
use clipmind_recovery::{FallbackTarget, RecoveryConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

struct DemoTools;

#[async_trait]
impl ToolExecutor for DemoTools {
    async fn execute(&self, tool: &str, args: &Value) -> Result<Value, ToolFailure> {
        match tool {
            "render_preview" => Ok(json!({"preview": true, "args": args})),
            _ => Err(ToolFailure::new("ENOENT: no such file or directory, open 'scene-3.json'")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing (simple fmt for examples)
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("=== ClipMind Agent Session Demo ===\n");

    let config = ClipMindConfig::default()
        .with_memory(MemoryConfig::default().with_flush_interval_secs(0))
        .with_recovery(
            RecoveryConfig::default()
                .with_fallback("render_full", FallbackTarget::new("render_preview")),
        );
    let memory = ClipMind::initialize_with(
        config,
        StoreOptions::new().with_backend(Arc::new(InMemoryStorage::new())),
    )
    .await?;

    // ========================================
    // 1. PROJECT AND CONVERSATION
    // ========================================
    info!("--- 1. Project and Conversation ---");

    memory.set_project_context("spring-launch", "./projects/spring-launch");
    memory.set_current_task(Some("Cut a 30 second product teaser".to_string()));
    memory
        .add_to_history(
            MessageRole::User,
            "Make a 30 second teaser for the new headphones, energetic feel",
        )
        .await?;
    memory.record_action("load brand kit", true).await?;
    info!("Working memory:\n{}", memory.memory().working().summary(5));

    // ========================================
    // 2. LEARNERS
    // ========================================
    info!("\n--- 2. Learners ---");

    let templates = memory.composition().recommend(
        &CompositionScenario::new("product_demo")
            .with_pacing("fast")
            .with_duration_secs(30.0),
    );
    for rec in &templates {
        info!("Template {} ({:.2}): {}", rec.record.name, rec.confidence, rec.reason);
    }

    let music = memory
        .audio()
        .recommend_music(&MusicScenario::new("intro").with_mood("energetic"));
    if let Some(best) = music.first() {
        info!(
            "Music {} / {} ({:.2})",
            best.record.mood, best.record.audio_type, best.confidence
        );
        memory
            .learn(LearningEvent::Usage {
                learner: LearnerKind::Music,
                id: best.id.clone(),
                success: true,
                feedback: Some(5),
            })
            .await?;
    }

    let titles = memory
        .motion()
        .recommend(&MotionScenario::new("title").with_scene_type("intro"));
    info!("Title animations: {}", titles.len());

    memory
        .learn(LearningEvent::MotionSuccess {
            pattern: AnimationPattern::new(
                "title-bounce-in",
                "title",
                "bounce",
                "ease-out-back",
                700,
            )
            .with_scene_types(["intro"])
            .with_keywords(["energetic", "playful"]),
            feedback: Some(4),
        })
        .await?;

    // ========================================
    // 3. TOOL RECOVERY
    // ========================================
    info!("\n--- 3. Tool Recovery ---");

    let outcome = memory
        .recover(
            "render_full",
            json!({"scene": 3}),
            &ToolFailure::new("ENOENT: no such file or directory, open 'scene-3.json'"),
            &DemoTools,
        )
        .await?;
    info!(
        "Recovery: category={} strategy={} status={:?}",
        outcome.category,
        outcome.plan.strategy.as_str(),
        outcome.status
    );

    // ========================================
    // 4. CONTEXT AND MAINTENANCE
    // ========================================
    info!("\n--- 4. Context and Maintenance ---");

    let built = memory.build_context("Add upbeat music under the teaser intro");
    info!(
        "Context: {} segments, {}/{} tokens",
        built.segments.len(),
        built.tokens_used,
        built.budget.total
    );
    info!("{}", built.text);

    let stats = memory.get_stats();
    info!("Stats: {}", serde_json::to_string_pretty(&stats)?);

    let report = memory.cleanup().await?;
    info!("Cleanup removed {} entries", report.total());

    memory.shutdown().await?;
    info!("\n=== Demo Complete ===");
    Ok(())
}
