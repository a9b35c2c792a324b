use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub skills: SkillConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl WeftConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| WeftError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Executor defaults; a graph's global config may override `max_parallelism`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Default retry policy for nodes that do not declare their own.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            retry: RetryConfig::default(),
        }
    }
}

/// Per-node retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retries_allowed")]
    pub retries_allowed: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries_allowed: default_retries_allowed(),
            max_attempts: default_max_attempts(),
            interval_seconds: default_interval_seconds(),
            backoff_rate: default_backoff_rate(),
        }
    }
}

/// Context compilation budget and retrieval knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Fraction of the budget past which the budget guard warns.
    #[serde(default = "default_budget_warn_fraction")]
    pub budget_warn_fraction: f64,
    #[serde(default = "default_memory_top_k")]
    pub memory_top_k: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            budget_warn_fraction: default_budget_warn_fraction(),
            memory_top_k: default_memory_top_k(),
        }
    }
}

/// Maintenance trigger cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Recite the plan every N completed steps.
    #[serde(default = "default_recite_every_steps")]
    pub recite_every_steps: u64,
    /// Reflect + curate every M completed nodes.
    #[serde(default = "default_reflect_every_nodes")]
    pub reflect_every_nodes: u64,
    /// Compact once estimated usage crosses this fraction of the budget.
    #[serde(default = "default_compact_at_fraction")]
    pub compact_at_fraction: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            recite_every_steps: default_recite_every_steps(),
            reflect_every_nodes: default_reflect_every_nodes(),
            compact_at_fraction: default_compact_at_fraction(),
        }
    }
}

/// Bounds on skill content loaded into a compiled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    #[serde(default = "default_max_loaded_skills")]
    pub max_loaded_skills: usize,
    /// Total character cap across loaded skill bodies; content past the cap
    /// is truncated, never dropped entirely.
    #[serde(default = "default_max_skill_chars")]
    pub max_skill_chars: usize,
    #[serde(default)]
    pub skills_dir: Option<String>,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            max_loaded_skills: default_max_loaded_skills(),
            max_skill_chars: default_max_skill_chars(),
            skills_dir: None,
        }
    }
}

/// Where the filesystem-backed stores live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_max_parallelism() -> usize {
    4
}

fn default_retries_allowed() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_seconds() -> f64 {
    2.0
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn default_max_context_tokens() -> usize {
    24_000
}

fn default_budget_warn_fraction() -> f64 {
    0.75
}

fn default_memory_top_k() -> usize {
    5
}

fn default_recite_every_steps() -> u64 {
    5
}

fn default_reflect_every_nodes() -> u64 {
    3
}

fn default_compact_at_fraction() -> f64 {
    0.6
}

fn default_max_loaded_skills() -> usize {
    4
}

fn default_max_skill_chars() -> usize {
    20_000
}

fn default_data_dir() -> String {
    ".weft".to_string()
}
