use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single orchestrated run: one objective, one task graph, one event log.
///
/// Immutable once created; progress lives in the session log and the
/// executor's completed/failed sets, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub objective: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

impl Run {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            objective: objective.into(),
            input: None,
        }
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }
}

/// Role of a message sent to the model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single message in a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ModelMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// The fully compiled context for one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelContext {
    pub system: String,
    pub messages: Vec<ModelMessage>,
}

/// Options for a provider completion call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub max_tokens: usize,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self { max_tokens: 4096 }
    }
}

/// Content kind of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Text,
    Json,
    Markdown,
    Binary,
}

/// Handle to a stored artifact.
///
/// Immutable once issued. The content hash identifies what was written at
/// put time; it is not re-verified on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// `artifact://<namespace>/<name>`
    pub uri: String,
    /// Hex-encoded SHA-256 of the content at write time.
    pub content_hash: String,
    pub artifact_type: ArtifactType,
    #[serde(default)]
    pub tags: Vec<String>,
    /// One-line summary suitable for inlining into a prompt.
    pub short_summary: String,
}

impl ArtifactHandle {
    /// Split the uri into (namespace, name), if well-formed.
    pub fn parts(&self) -> Option<(&str, &str)> {
        let rest = self.uri.strip_prefix("artifact://")?;
        rest.split_once('/')
    }

    pub fn namespace(&self) -> Option<&str> {
        self.parts().map(|(ns, _)| ns)
    }

    pub fn name(&self) -> Option<&str> {
        self.parts().map(|(_, name)| name)
    }
}

/// One record in the append-only per-run event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub event_type: String,
    pub ts: DateTime<Utc>,
    /// Artifact uris or other record references touched by this event.
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Monotonic per-run sequence number, assigned on append.
    #[serde(default)]
    pub seq: u64,
}

impl SessionEvent {
    pub fn new(run_id: &RunId, event_type: impl Into<String>) -> Self {
        Self {
            run_id: run_id.clone(),
            node_id: None,
            step_id: None,
            event_type: event_type.into(),
            ts: Utc::now(),
            refs: Vec::new(),
            payload: serde_json::Value::Null,
            seq: 0,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_refs(mut self, refs: Vec<String>) -> Self {
        self.refs = refs;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Composite identity key, kept in records for human-readable spans.
    /// Sequence numbers are the authoritative ordering; this key is not
    /// guaranteed unique under rapid bursts with colliding timestamps.
    pub fn composite_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.run_id,
            self.node_id.as_deref().unwrap_or("-"),
            self.step_id.as_deref().unwrap_or("-"),
            self.event_type,
            self.ts.to_rfc3339()
        )
    }
}

/// Well-known event type names.
pub mod event_types {
    pub const RUN_STARTED: &str = "run_started";
    pub const RUN_COMPLETED: &str = "run_completed";
    pub const NODE_STARTED: &str = "node_started";
    pub const NODE_COMPLETED: &str = "node_completed";
    pub const NODE_FAILED: &str = "node_failed";
    pub const ARTIFACT_WRITTEN: &str = "artifact_written";
    pub const RECITATION: &str = "recitation";
    pub const REFLECTION: &str = "reflection";
    pub const DELTA_STAGED: &str = "delta_staged";
    pub const DELTA_COMMITTED: &str = "delta_committed";
    pub const COMPACTION: &str = "compaction";
}

/// Inclusive span of event sequence numbers covered by a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpan {
    pub from_seq: u64,
    pub to_seq: u64,
}

/// Structured summary produced by the compactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSummary {
    pub goal: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// Must be non-empty; the compactor enforces this with a fallback.
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub failures_so_far: Vec<String>,
}

/// One record in the parallel compaction log.
///
/// Additive and reference-based: source events are never deleted, the span
/// only marks which sequence range the summary stands in for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionEvent {
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub span: EventSpan,
    pub summary: CompactionSummary,
    /// Handles referenced by the compacted events, for pointer-first reads.
    #[serde(default)]
    pub artifacts_index: Vec<ArtifactHandle>,
    pub created_at: DateTime<Utc>,
}

/// The five fixed memory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Facts,
    Constraints,
    Preferences,
    Tactics,
    Pitfalls,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 5] = [
        MemoryCategory::Facts,
        MemoryCategory::Constraints,
        MemoryCategory::Preferences,
        MemoryCategory::Tactics,
        MemoryCategory::Pitfalls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Facts => "facts",
            MemoryCategory::Constraints => "constraints",
            MemoryCategory::Preferences => "preferences",
            MemoryCategory::Tactics => "tactics",
            MemoryCategory::Pitfalls => "pitfalls",
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long-lived retrievable memory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub text: String,
    /// At least one reference backing this item (event key, artifact uri, node id).
    pub evidence_refs: Vec<String>,
    /// In [0, 1].
    pub confidence: f64,
}

impl MemoryItem {
    pub fn new(text: impl Into<String>, evidence: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: format!("mem-{}", Uuid::new_v4()),
            text: text.into(),
            evidence_refs: vec![evidence.into()],
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// A retrieval hit with its score.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub category: MemoryCategory,
    pub item: MemoryItem,
    pub score: f64,
}

/// Staged additions to the memory store, one array per category.
///
/// Producing a delta has no effect on the store until it is applied by the
/// commit step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDelta {
    pub run_id: RunId,
    pub node_id: String,
    #[serde(default)]
    pub facts: Vec<MemoryItem>,
    #[serde(default)]
    pub constraints: Vec<MemoryItem>,
    #[serde(default)]
    pub preferences: Vec<MemoryItem>,
    #[serde(default)]
    pub tactics: Vec<MemoryItem>,
    #[serde(default)]
    pub pitfalls: Vec<MemoryItem>,
    pub created_at: DateTime<Utc>,
}

impl MemoryDelta {
    pub fn new(run_id: &RunId, node_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.clone(),
            node_id: node_id.into(),
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn items(&self, category: MemoryCategory) -> &[MemoryItem] {
        match category {
            MemoryCategory::Facts => &self.facts,
            MemoryCategory::Constraints => &self.constraints,
            MemoryCategory::Preferences => &self.preferences,
            MemoryCategory::Tactics => &self.tactics,
            MemoryCategory::Pitfalls => &self.pitfalls,
        }
    }

    pub fn items_mut(&mut self, category: MemoryCategory) -> &mut Vec<MemoryItem> {
        match category {
            MemoryCategory::Facts => &mut self.facts,
            MemoryCategory::Constraints => &mut self.constraints,
            MemoryCategory::Preferences => &mut self.preferences,
            MemoryCategory::Tactics => &mut self.tactics,
            MemoryCategory::Pitfalls => &mut self.pitfalls,
        }
    }

    pub fn is_empty(&self) -> bool {
        MemoryCategory::ALL.iter().all(|c| self.items(*c).is_empty())
    }
}

/// The three playbook documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybookFile {
    Playbook,
    Pitfalls,
    Policies,
}

impl PlaybookFile {
    pub const ALL: [PlaybookFile; 3] = [
        PlaybookFile::Playbook,
        PlaybookFile::Pitfalls,
        PlaybookFile::Policies,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            PlaybookFile::Playbook => "playbook.md",
            PlaybookFile::Pitfalls => "pitfalls.md",
            PlaybookFile::Policies => "policies.md",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PlaybookFile::Playbook => "Playbook",
            PlaybookFile::Pitfalls => "Pitfalls",
            PlaybookFile::Policies => "Policies",
        }
    }
}

/// One bullet in a playbook document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bullet {
    pub id: String,
    pub text: String,
    pub section: String,
}

/// The mutation kinds a playbook diff can carry.
///
/// `RemoveBullet` records the removed section and text so its inverse is an
/// exact re-add; `EditBullet` records both sides for the same reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlaybookOpKind {
    AddBullet {
        section: String,
        text: String,
        /// Assigned by the store when absent; recorded materialized in history.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bullet_id: Option<String>,
    },
    RemoveBullet {
        bullet_id: String,
        section: String,
        text: String,
    },
    EditBullet {
        bullet_id: String,
        before: String,
        after: String,
    },
}

/// A single typed playbook operation with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookOp {
    #[serde(flatten)]
    pub kind: PlaybookOpKind,
    pub target_file: PlaybookFile,
    pub reason: String,
    /// At least one reference backing this op.
    pub evidence_refs: Vec<String>,
    pub confidence: f64,
}

impl PlaybookOp {
    /// The exact inverse of this op. Add and Remove swap; Edit swaps sides.
    pub fn inverse(&self) -> PlaybookOp {
        let kind = match &self.kind {
            PlaybookOpKind::AddBullet {
                section,
                text,
                bullet_id,
            } => PlaybookOpKind::RemoveBullet {
                bullet_id: bullet_id.clone().unwrap_or_default(),
                section: section.clone(),
                text: text.clone(),
            },
            PlaybookOpKind::RemoveBullet {
                bullet_id,
                section,
                text,
            } => PlaybookOpKind::AddBullet {
                section: section.clone(),
                text: text.clone(),
                bullet_id: Some(bullet_id.clone()),
            },
            PlaybookOpKind::EditBullet {
                bullet_id,
                before,
                after,
            } => PlaybookOpKind::EditBullet {
                bullet_id: bullet_id.clone(),
                before: after.clone(),
                after: before.clone(),
            },
        };
        PlaybookOp {
            kind,
            target_file: self.target_file,
            reason: format!("rollback of: {}", self.reason),
            evidence_refs: self.evidence_refs.clone(),
            confidence: self.confidence,
        }
    }
}

/// A staged set of playbook operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookDiff {
    pub run_id: RunId,
    pub node_id: String,
    /// At least one op.
    pub ops: Vec<PlaybookOp>,
    pub created_at: DateTime<Utc>,
}

/// Structured learning snapshot extracted from one node's execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default)]
    pub worked: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub next_time: Vec<String>,
}

impl Reflection {
    pub fn is_empty(&self) -> bool {
        self.worked.is_empty() && self.failed.is_empty() && self.next_time.is_empty()
    }
}

/// Metadata for one skill in the provider's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A skill whose full markdown body has been loaded for context inclusion.
#[derive(Debug, Clone)]
pub struct LoadedSkill {
    pub id: String,
    pub markdown: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_parts() {
        let handle = ArtifactHandle {
            uri: "artifact://research/notes.md".into(),
            content_hash: "abc".into(),
            artifact_type: ArtifactType::Markdown,
            tags: vec![],
            short_summary: "notes".into(),
        };
        assert_eq!(handle.namespace(), Some("research"));
        assert_eq!(handle.name(), Some("notes.md"));
    }

    #[test]
    fn test_composite_key_shape() {
        let run = RunId::from_str("r1");
        let event = SessionEvent::new(&run, "node_started").with_node("a");
        let key = event.composite_key();
        assert!(key.starts_with("r1:a:-:node_started:"));
    }

    #[test]
    fn test_memory_delta_accessors() {
        let run = RunId::from_str("r1");
        let mut delta = MemoryDelta::new(&run, "n1");
        assert!(delta.is_empty());
        delta
            .items_mut(MemoryCategory::Tactics)
            .push(MemoryItem::new("batch writes", "node:n1", 0.7));
        assert!(!delta.is_empty());
        assert_eq!(delta.items(MemoryCategory::Tactics).len(), 1);
        assert!(delta.items(MemoryCategory::Facts).is_empty());
    }

    #[test]
    fn test_playbook_op_inverse_roundtrip() {
        let op = PlaybookOp {
            kind: PlaybookOpKind::EditBullet {
                bullet_id: "b-1".into(),
                before: "old".into(),
                after: "new".into(),
            },
            target_file: PlaybookFile::Policies,
            reason: "tighten wording".into(),
            evidence_refs: vec!["node:n1".into()],
            confidence: 0.8,
        };
        let inv = op.inverse();
        match &inv.kind {
            PlaybookOpKind::EditBullet { before, after, .. } => {
                assert_eq!(before, "new");
                assert_eq!(after, "old");
            }
            other => panic!("unexpected inverse: {:?}", other),
        }
    }

    #[test]
    fn test_add_remove_inverse_pair() {
        let add = PlaybookOp {
            kind: PlaybookOpKind::AddBullet {
                section: "Tactics".into(),
                text: "prefer pointers over inlined content".into(),
                bullet_id: Some("b-9".into()),
            },
            target_file: PlaybookFile::Playbook,
            reason: "curated".into(),
            evidence_refs: vec!["node:n2".into()],
            confidence: 0.7,
        };
        match add.inverse().kind {
            PlaybookOpKind::RemoveBullet { bullet_id, .. } => assert_eq!(bullet_id, "b-9"),
            other => panic!("unexpected inverse: {:?}", other),
        }
    }

    #[test]
    fn test_memory_item_confidence_clamped() {
        let item = MemoryItem::new("x", "ref", 1.7);
        assert_eq!(item.confidence, 1.0);
    }
}
