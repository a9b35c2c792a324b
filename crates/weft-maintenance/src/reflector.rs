use std::sync::Arc;

use tracing::{debug, warn};

use weft_core::traits::ModelProvider;
use weft_core::types::{CompletionOptions, MessageRole, ModelContext, ModelMessage, Reflection};
use weft_graph::extract_json;

const REFLECTOR_SYSTEM: &str = "You extract transferable lessons from one \
finished work node. Respond with JSON only.";

/// Asks the provider for a structured learning snapshot of one node.
///
/// Reflection never fails a run: provider errors and unparseable responses
/// both yield an empty reflection.
pub struct Reflector {
    provider: Arc<dyn ModelProvider>,
}

impl Reflector {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    pub async fn reflect(
        &self,
        node_id: &str,
        objective: &str,
        observations: &[String],
        errors: &[String],
    ) -> Reflection {
        let context = ModelContext {
            system: REFLECTOR_SYSTEM.to_string(),
            messages: vec![ModelMessage {
                role: MessageRole::User,
                content: reflection_prompt(node_id, objective, observations, errors),
            }],
        };

        let response = match self
            .provider
            .complete(&context, &CompletionOptions::default())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(node_id, error = %e, "Reflection call failed, using empty reflection");
                return Reflection::default();
            }
        };

        match serde_json::from_str::<Reflection>(extract_json(&response)) {
            Ok(reflection) => {
                debug!(
                    node_id,
                    worked = reflection.worked.len(),
                    failed = reflection.failed.len(),
                    next_time = reflection.next_time.len(),
                    "Reflection parsed"
                );
                reflection
            }
            Err(e) => {
                warn!(node_id, error = %e, "Unparseable reflection, using empty reflection");
                Reflection::default()
            }
        }
    }
}

fn reflection_prompt(
    node_id: &str,
    objective: &str,
    observations: &[String],
    errors: &[String],
) -> String {
    let mut prompt = format!(
        "Node `{}` just finished.\nObjective: {}\n",
        node_id, objective
    );
    if !observations.is_empty() {
        prompt.push_str("\nObservations:\n");
        for observation in observations {
            prompt.push_str(&format!("- {}\n", observation));
        }
    }
    if !errors.is_empty() {
        prompt.push_str("\nErrors encountered:\n");
        for error in errors {
            prompt.push_str(&format!("- {}\n", error));
        }
    }
    prompt.push_str(
        r#"
Respond with ONLY this JSON shape (arrays may be empty):
{
  "worked": ["approaches that demonstrably worked"],
  "failed": ["approaches that demonstrably failed"],
  "next_time": ["what to do differently next time"]
}"#,
    );
    prompt
}
