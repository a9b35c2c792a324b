use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Graph errors
    #[error("Graph validation failed: {0}")]
    GraphValidation(String),

    #[error("Node execution failed: {node_id}: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("Deadlock invariant violated: no ready nodes and no failures (remaining: {remaining})")]
    DeadlockInvariant { remaining: usize },

    // Provider errors
    #[error("Model provider request failed: {0}")]
    Provider(String),

    #[error("Provider response parse error: {0}")]
    ProviderParse(String),

    // Skill errors
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Skill error: {0}")]
    Skill(String),

    // Scope errors
    #[error("Scope violation: node '{node_id}' attempted {action} on '{target}'")]
    ScopeViolation {
        node_id: String,
        action: String,
        target: String,
    },

    // Storage errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Invalid artifact name: {0}")]
    InvalidArtifactName(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Diff not found: {0}")]
    DiffNotFound(String),

    #[error("Invalid diff: {0}")]
    InvalidDiff(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;
