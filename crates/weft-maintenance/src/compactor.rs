use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use weft_core::error::Result;
use weft_core::traits::ModelProvider;
use weft_core::types::{
    event_types, CompactionEvent, CompactionSummary, CompletionOptions, EventSpan, MessageRole,
    ModelContext, ModelMessage, Run, SessionEvent,
};
use weft_graph::extract_json;
use weft_store::{ArtifactStore, SessionStore};

const COMPACTOR_SYSTEM: &str = "You compress an execution event log into a \
structured working summary. Respond with JSON only.";

/// Reversible, reference-preserving summarization of the event log.
///
/// Source events are never deleted; a compaction only records a span and a
/// summary that stands in for it. Provider failures degrade to a minimal
/// non-empty summary — compaction never fails a run.
pub struct Compactor {
    provider: Arc<dyn ModelProvider>,
}

impl Compactor {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Compact everything after the previous compaction span. Returns the
    /// new record, or `None` when there is nothing to compact.
    pub async fn compact(
        &self,
        session: &SessionStore,
        artifacts: &ArtifactStore,
        run: &Run,
        node_id: Option<String>,
    ) -> Result<Option<CompactionEvent>> {
        let events = session.uncompacted_events(&run.run_id)?;
        if events.is_empty() {
            return Ok(None);
        }

        // Pointer-first artifact context: sidecars only, never content
        let mut artifact_lines = Vec::new();
        let mut artifacts_index = Vec::new();
        for event in &events {
            for reference in &event.refs {
                if !reference.starts_with("artifact://") {
                    continue;
                }
                if let Ok(metadata) = artifacts.metadata_by_uri(reference) {
                    artifact_lines.push(format!(
                        "- {} ({} bytes) — {}",
                        metadata.handle.uri, metadata.size_bytes, metadata.handle.short_summary
                    ));
                    artifacts_index.push(metadata.handle);
                }
            }
        }

        let summary = match self.summarize(run, &events, &artifact_lines).await {
            Ok(summary) if !summary.next_actions.is_empty() => summary,
            Ok(_) => {
                warn!(run_id = %run.run_id, "Compaction summary had no next actions, using fallback");
                fallback_summary(run, &events)
            }
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Compaction summarization failed, using fallback");
                fallback_summary(run, &events)
            }
        };

        let span = EventSpan {
            from_seq: events.first().map(|e| e.seq).unwrap_or(1),
            to_seq: events.last().map(|e| e.seq).unwrap_or(1),
        };
        let compaction = CompactionEvent {
            run_id: run.run_id.clone(),
            node_id,
            span,
            summary,
            artifacts_index,
            created_at: Utc::now(),
        };
        session.append_compaction_event(compaction.clone())?;

        info!(
            run_id = %run.run_id,
            events = events.len(),
            from_seq = span.from_seq,
            to_seq = span.to_seq,
            "Events compacted"
        );
        Ok(Some(compaction))
    }

    async fn summarize(
        &self,
        run: &Run,
        events: &[SessionEvent],
        artifact_lines: &[String],
    ) -> Result<CompactionSummary> {
        let mut prompt = format!(
            "Objective: {}\n\nEvent log to compress ({} events):\n",
            run.objective,
            events.len()
        );
        for event in events {
            prompt.push_str(&format!(
                "- #{} {} node={} {}\n",
                event.seq,
                event.event_type,
                event.node_id.as_deref().unwrap_or("-"),
                compact_payload(event)
            ));
        }
        if !artifact_lines.is_empty() {
            prompt.push_str("\nArtifacts referenced:\n");
            for line in artifact_lines {
                prompt.push_str(line);
                prompt.push('\n');
            }
        }
        prompt.push_str(
            r#"
Respond with ONLY this JSON shape; "next_actions" must not be empty:
{
  "goal": "the standing objective",
  "decisions": [], "constraints": [], "open_questions": [],
  "next_actions": ["at least one concrete next step"],
  "failures_so_far": []
}"#,
        );

        let context = ModelContext {
            system: COMPACTOR_SYSTEM.to_string(),
            messages: vec![ModelMessage {
                role: MessageRole::User,
                content: prompt,
            }],
        };
        let response = self
            .provider
            .complete(&context, &CompletionOptions::default())
            .await?;
        Ok(serde_json::from_str(extract_json(&response))?)
    }
}

fn compact_payload(event: &SessionEvent) -> String {
    match &event.payload {
        serde_json::Value::Null => String::new(),
        payload => {
            let raw = payload.to_string();
            if raw.len() > 160 {
                let mut cut = 160;
                while !raw.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("{}…", &raw[..cut])
            } else {
                raw
            }
        }
    }
}

/// Minimal non-empty summary used when the provider's output is unusable.
fn fallback_summary(run: &Run, events: &[SessionEvent]) -> CompactionSummary {
    let failures_so_far = events
        .iter()
        .filter(|e| e.event_type == event_types::NODE_FAILED)
        .map(|e| {
            format!(
                "node {} failed",
                e.node_id.as_deref().unwrap_or("unknown")
            )
        })
        .collect();
    CompactionSummary {
        goal: run.objective.clone(),
        decisions: Vec::new(),
        constraints: Vec::new(),
        open_questions: Vec::new(),
        next_actions: vec!["Continue executing the remaining plan".to_string()],
        failures_so_far,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::provider::{FailingProvider, ScriptedProvider};
    use weft_store::PutOptions;

    fn stores() -> (tempfile::TempDir, SessionStore, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionStore::open(dir.path()).unwrap();
        let artifacts = ArtifactStore::open(dir.path()).unwrap();
        (dir, session, artifacts)
    }

    fn seed_events(session: &SessionStore, run: &Run) {
        session
            .append_event(SessionEvent::new(&run.run_id, event_types::NODE_STARTED).with_node("a"))
            .unwrap();
        session
            .append_event(
                SessionEvent::new(&run.run_id, event_types::NODE_COMPLETED).with_node("a"),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_compact_with_structured_summary() {
        let (_dir, session, artifacts) = stores();
        let run = Run::new("ship the report");
        seed_events(&session, &run);

        let provider = Arc::new(ScriptedProvider::new([
            r#"{"goal":"ship the report","decisions":["keep markdown"],"constraints":[],"open_questions":[],"next_actions":["draft section 2"],"failures_so_far":[]}"#,
        ]));
        let compactor = Compactor::new(provider);
        let compaction = compactor
            .compact(&session, &artifacts, &run, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(compaction.span.from_seq, 1);
        assert_eq!(compaction.span.to_seq, 2);
        assert_eq!(compaction.summary.next_actions, vec!["draft section 2"]);
        assert_eq!(compaction.summary.decisions, vec!["keep markdown"]);

        // Subsequent compactions only see newer events
        assert!(session
            .uncompacted_events(&run.run_id)
            .unwrap()
            .iter()
            .all(|e| e.seq > 2));
    }

    #[tokio::test]
    async fn test_parse_failure_falls_back() {
        let (_dir, session, artifacts) = stores();
        let run = Run::new("ship the report");
        seed_events(&session, &run);
        session
            .append_event(
                SessionEvent::new(&run.run_id, event_types::NODE_FAILED).with_node("b"),
            )
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new(["the log looks fine to me"]));
        let compactor = Compactor::new(provider);
        let compaction = compactor
            .compact(&session, &artifacts, &run, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(compaction.summary.goal, "ship the report");
        assert!(!compaction.summary.next_actions.is_empty());
        assert_eq!(compaction.summary.failures_so_far, vec!["node b failed"]);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back() {
        let (_dir, session, artifacts) = stores();
        let run = Run::new("objective");
        seed_events(&session, &run);

        let compactor = Compactor::new(Arc::new(FailingProvider::new("backend down")));
        let compaction = compactor
            .compact(&session, &artifacts, &run, None)
            .await
            .unwrap();
        assert!(compaction.is_some());
    }

    #[tokio::test]
    async fn test_empty_next_actions_falls_back() {
        let (_dir, session, artifacts) = stores();
        let run = Run::new("objective");
        seed_events(&session, &run);

        let provider = Arc::new(ScriptedProvider::new([
            r#"{"goal":"g","decisions":[],"constraints":[],"open_questions":[],"next_actions":[],"failures_so_far":[]}"#,
        ]));
        let compactor = Compactor::new(provider);
        let compaction = compactor
            .compact(&session, &artifacts, &run, None)
            .await
            .unwrap()
            .unwrap();
        assert!(!compaction.summary.next_actions.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_compact() {
        let (_dir, session, artifacts) = stores();
        let run = Run::new("objective");
        let compactor = Compactor::new(Arc::new(FailingProvider::new("unused")));
        assert!(compactor
            .compact(&session, &artifacts, &run, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_referenced_artifacts_indexed() {
        let (_dir, session, artifacts) = stores();
        let run = Run::new("objective");
        let handle = artifacts
            .put_text("a", "notes.txt", "findings", PutOptions::summary("findings"))
            .unwrap();
        session
            .append_event(
                SessionEvent::new(&run.run_id, event_types::ARTIFACT_WRITTEN)
                    .with_node("a")
                    .with_refs(vec![handle.uri.clone()]),
            )
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new([
            r#"{"goal":"g","decisions":[],"constraints":[],"open_questions":[],"next_actions":["next"],"failures_so_far":[]}"#,
        ]));
        let compactor = Compactor::new(provider);
        let compaction = compactor
            .compact(&session, &artifacts, &run, Some("a".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(compaction.artifacts_index.len(), 1);
        assert_eq!(compaction.artifacts_index[0].uri, handle.uri);
    }
}
