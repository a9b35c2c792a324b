use chrono::Utc;
use tracing::debug;

use weft_core::error::Result;
use weft_core::types::{
    ArtifactHandle, MemoryDelta, MemoryItem, PlaybookDiff, PlaybookFile, PlaybookOp,
    PlaybookOpKind, Reflection, RunId,
};
use weft_store::{PutOptions, ScopedArtifacts};

/// Tag on staged-delta artifacts, scanned by the commit step.
pub const STAGED_MEMORY_TAG: &str = "staged-memory-delta";
/// Tag on staged-diff artifacts, scanned by the commit step.
pub const STAGED_PLAYBOOK_TAG: &str = "staged-playbook-diff";

const MAX_TACTIC_OPS: usize = 3;
const MAX_FAILURE_OPS: usize = 3;

/// Deterministically maps a reflection into staged state changes.
///
/// The curator only stages: it writes delta/diff artifacts into the node's
/// own namespace and never applies them. Application is the commit step's
/// job.
pub struct Curator;

impl Curator {
    /// Reflection → memory delta. worked→facts@0.8, failed→pitfalls@0.9,
    /// next_time→tactics@0.7.
    pub fn memory_delta(reflection: &Reflection, run_id: &RunId, node_id: &str) -> MemoryDelta {
        let evidence = format!("node:{}", node_id);
        let mut delta = MemoryDelta::new(run_id, node_id);
        for worked in &reflection.worked {
            delta.facts.push(MemoryItem::new(worked.clone(), evidence.clone(), 0.8));
        }
        for failure in &reflection.failed {
            delta
                .pitfalls
                .push(MemoryItem::new(failure.clone(), evidence.clone(), 0.9));
        }
        for tactic in &reflection.next_time {
            delta
                .tactics
                .push(MemoryItem::new(tactic.clone(), evidence.clone(), 0.7));
        }
        delta
    }

    /// Reflection → playbook diff: up to three tactics into the playbook, up
    /// to three failures into the pitfalls document. Always at least one op;
    /// an empty reflection degrades to a single log bullet.
    pub fn playbook_diff(reflection: &Reflection, run_id: &RunId, node_id: &str) -> PlaybookDiff {
        let evidence = vec![format!("node:{}", node_id)];
        let mut ops = Vec::new();

        for tactic in reflection.next_time.iter().take(MAX_TACTIC_OPS) {
            ops.push(PlaybookOp {
                kind: PlaybookOpKind::AddBullet {
                    section: "Tactics".into(),
                    text: tactic.clone(),
                    bullet_id: None,
                },
                target_file: PlaybookFile::Playbook,
                reason: format!("curated from node {}", node_id),
                evidence_refs: evidence.clone(),
                confidence: 0.7,
            });
        }
        for failure in reflection.failed.iter().take(MAX_FAILURE_OPS) {
            ops.push(PlaybookOp {
                kind: PlaybookOpKind::AddBullet {
                    section: "Failures".into(),
                    text: failure.clone(),
                    bullet_id: None,
                },
                target_file: PlaybookFile::Pitfalls,
                reason: format!("curated from node {}", node_id),
                evidence_refs: evidence.clone(),
                confidence: 0.9,
            });
        }

        if ops.is_empty() {
            ops.push(PlaybookOp {
                kind: PlaybookOpKind::AddBullet {
                    section: "Log".into(),
                    text: format!("node {} finished without new lessons", node_id),
                    bullet_id: None,
                },
                target_file: PlaybookFile::Playbook,
                reason: format!("empty reflection for node {}", node_id),
                evidence_refs: evidence,
                confidence: 0.5,
            });
        }

        PlaybookDiff {
            run_id: run_id.clone(),
            node_id: node_id.to_string(),
            ops,
            created_at: Utc::now(),
        }
    }

    /// Persist both staged changes as tagged JSON artifacts in the node's
    /// namespace. The stores themselves are untouched.
    pub fn stage(
        scoped: &ScopedArtifacts,
        delta: &MemoryDelta,
        diff: &PlaybookDiff,
    ) -> Result<(ArtifactHandle, ArtifactHandle)> {
        let delta_handle = scoped.put_json(
            &format!("memory_delta_{}.json", delta.node_id),
            &serde_json::to_value(delta)?,
            PutOptions::summary(format!(
                "staged memory delta from node {}",
                delta.node_id
            ))
            .with_tag(STAGED_MEMORY_TAG),
        )?;
        let diff_handle = scoped.put_json(
            &format!("playbook_diff_{}.json", diff.node_id),
            &serde_json::to_value(diff)?,
            PutOptions::summary(format!(
                "staged playbook diff from node {}",
                diff.node_id
            ))
            .with_tag(STAGED_PLAYBOOK_TAG),
        )?;
        debug!(
            node_id = %delta.node_id,
            delta_uri = %delta_handle.uri,
            diff_uri = %diff_handle.uri,
            "Staged deltas written"
        );
        Ok((delta_handle, diff_handle))
    }
}
