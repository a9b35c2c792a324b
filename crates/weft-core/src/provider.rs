use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use crate::error::{Result, WeftError};
use crate::traits::ModelProvider;
use crate::types::{CompletionOptions, ModelContext};

/// Deterministic provider that replays a queue of canned responses.
///
/// Used by planner, maintenance, and executor tests, and by the CLI's dry
/// mode; no network backend is involved. When the queue runs dry it keeps
/// returning the last response (or errors if none was ever supplied).
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    /// Every context received, for assertions on compiled prompts.
    seen: Mutex<Vec<ModelContext>>,
}

impl ScriptedProvider {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A provider that always returns the same text.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        let provider = Self::new(Vec::<String>::new());
        *provider.last.lock().unwrap() = Some(text);
        provider
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Snapshot of every context received so far.
    pub fn contexts(&self) -> Vec<ModelContext> {
        self.seen.lock().unwrap().clone()
    }
}

impl ModelProvider for ScriptedProvider {
    fn complete(
        &self,
        context: &ModelContext,
        _options: &CompletionOptions,
    ) -> BoxFuture<'_, Result<String>> {
        let context = context.clone();
        Box::pin(async move {
            self.seen.lock().unwrap().push(context);
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(text) => {
                    *self.last.lock().unwrap() = Some(text.clone());
                    Ok(text)
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| WeftError::Provider("scripted provider exhausted".into())),
            }
        })
    }
}

/// Provider that fails every call. For retry and containment tests.
pub struct FailingProvider {
    message: String,
}

impl FailingProvider {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ModelProvider for FailingProvider {
    fn complete(
        &self,
        _context: &ModelContext,
        _options: &CompletionOptions,
    ) -> BoxFuture<'_, Result<String>> {
        let message = self.message.clone();
        Box::pin(async move { Err(WeftError::Provider(message)) })
    }
}
