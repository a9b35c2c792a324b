use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{CompletionOptions, ModelContext, SkillMetadata};

/// Generative-model backend.
///
/// One call per graph node; the caller owns its own retry policy. The wire
/// protocol behind this boundary is not this crate's concern.
pub trait ModelProvider: Send + Sync + 'static {
    /// Run one completion over a compiled context, returning the raw text.
    fn complete(
        &self,
        context: &ModelContext,
        options: &CompletionOptions,
    ) -> BoxFuture<'_, Result<String>>;
}

/// Skill-content repository.
///
/// The core indexes metadata for every visible skill and loads full markdown
/// only for explicitly selected ones.
pub trait SkillProvider: Send + Sync + 'static {
    /// List metadata for every available skill.
    fn list_metadata(&self) -> Result<Vec<SkillMetadata>>;

    /// Load the full markdown body of one skill.
    fn load_markdown(&self, id: &str) -> Result<String>;
}
