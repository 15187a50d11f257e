//! Aggregated configuration
//!
//! Loaded from an optional TOML file, then overridden by `CLIPMIND__`
//! environment variables (`__` separates nesting levels, e.g.
//! `CLIPMIND__MEMORY__FLUSH_INTERVAL_SECS=10`).

use clipmind_learn::LearnerSettings;
use clipmind_memory::{ContextBudgetConfig, MemoryConfig, MemoryError, MemoryResult};
use clipmind_recovery::RecoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CLIPMIND";

/// Configuration for every ClipMind component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipMindConfig {
    /// Memory store
    pub memory: MemoryConfig,
    /// Context assembly
    pub context: ContextBudgetConfig,
    /// Tool recovery
    pub recovery: RecoveryConfig,
    /// Learner weights
    pub learners: LearnerSettings,
    /// Age past which low-importance entries are cleaned up
    pub cleanup_max_age_days: i64,
}

impl Default for ClipMindConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            context: ContextBudgetConfig::default(),
            recovery: RecoveryConfig::default(),
            learners: LearnerSettings::default(),
            cleanup_max_age_days: 30,
        }
    }
}

impl ClipMindConfig {
    /// Defaults rooted at `storage_root`
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            memory: MemoryConfig::new(storage_root),
            ..Default::default()
        }
    }

    /// Load from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> MemoryResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| MemoryError::configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Set the storage root
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.memory.storage_root = root.into();
        self
    }

    /// Set the memory configuration
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Set the context configuration
    pub fn with_context(mut self, context: ContextBudgetConfig) -> Self {
        self.context = context;
        self
    }

    /// Set the recovery configuration
    pub fn with_recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    /// Set the learner weights
    pub fn with_learners(mut self, learners: LearnerSettings) -> Self {
        self.learners = learners;
        self
    }

    /// Check every section
    pub fn validate(&self) -> MemoryResult<()> {
        self.memory.validate()?;
        self.context.validate()?;
        if self.cleanup_max_age_days <= 0 {
            return Err(MemoryError::validation(
                "cleanup_max_age_days",
                "must be positive",
                self.cleanup_max_age_days.to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClipMindConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cleanup_max_age_days, 30);
        assert_eq!(config.recovery.escalation_threshold, 3);
        assert_eq!(config.learners.audio.ema_new, 0.3);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
cleanup_max_age_days = 14

[memory]
storage_root = "/tmp/clipmind-test"
flush_interval_secs = 5

[context]
max_tokens = 2000

[recovery.fallbacks.render]
tool = "render_lite"

[learners.motion]
ema_old = 0.9
ema_new = 0.1
"#
        )
        .unwrap();

        let config = ClipMindConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.cleanup_max_age_days, 14);
        assert_eq!(config.memory.storage_root, PathBuf::from("/tmp/clipmind-test"));
        assert_eq!(config.memory.flush_interval_secs, 5);
        assert_eq!(config.memory.embedding_dim, 64);
        assert_eq!(config.context.max_tokens, 2000);
        assert_eq!(config.recovery.fallbacks["render"].tool, "render_lite");
        assert_eq!(config.learners.motion.ema_old, 0.9);
        assert_eq!(config.learners.motion.rank_success, 0.7);
    }

    #[test]
    fn test_invalid_fractions_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[context.fractions]
instructions = 0.5
history = 0.5
knowledge = 0.5
task = 0.5
"#
        )
        .unwrap();

        let err = ClipMindConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }
}
