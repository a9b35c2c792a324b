use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use weft_core::error::{Result, WeftError};
use weft_core::types::{Bullet, PlaybookDiff, PlaybookFile, PlaybookOp, PlaybookOpKind};

const DEFAULT_SECTION: &str = "general";

/// Diff-based self-improving playbook.
///
/// Three markdown documents under `<root>/playbook/`, each an ordered bullet
/// list. Mutations go exclusively through `apply_diff`; every applied diff
/// is appended to `diff_history.jsonl`, and `rollback` applies the inverse
/// of a historical diff as a new forward entry — history is never erased.
pub struct PlaybookStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl PlaybookStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let dir = root.join("playbook");
        std::fs::create_dir_all(&dir)?;
        for file in PlaybookFile::ALL {
            let path = dir.join(file.file_name());
            if !path.exists() {
                std::fs::write(&path, format!("# {}\n", file.title()))?;
            }
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn file_path(&self, file: PlaybookFile) -> PathBuf {
        self.root.join("playbook").join(file.file_name())
    }

    fn history_path(&self) -> PathBuf {
        self.root.join("playbook").join("diff_history.jsonl")
    }

    /// The parsed bullet list of one document, in file order.
    pub fn bullets(&self, file: PlaybookFile) -> Result<Vec<Bullet>> {
        let raw = std::fs::read_to_string(self.file_path(file))?;
        Ok(parse_bullets(&raw))
    }

    /// Raw document text, for prompt inclusion.
    pub fn render(&self, file: PlaybookFile) -> Result<String> {
        Ok(std::fs::read_to_string(self.file_path(file))?)
    }

    /// Every applied diff, oldest first.
    pub fn history(&self) -> Result<Vec<PlaybookDiff>> {
        let raw = match std::fs::read_to_string(self.history_path()) {
            Ok(raw) => raw,
            Err(_) => return Ok(Vec::new()),
        };
        let mut diffs = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            diffs.push(serde_json::from_str(line)?);
        }
        Ok(diffs)
    }

    /// Apply a staged diff: execute ops in order, re-serialize the touched
    /// documents, and append the diff as applied (generated bullet ids and
    /// actual removed/edited text materialized) to the audit history.
    /// Returns the effective diff.
    pub fn apply_diff(&self, diff: &PlaybookDiff) -> Result<PlaybookDiff> {
        if diff.ops.is_empty() {
            return Err(WeftError::InvalidDiff("diff has no ops".into()));
        }
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| WeftError::Io(std::io::Error::other("playbook lock poisoned")))?;

        let mut documents: HashMap<PlaybookFile, Vec<Bullet>> = HashMap::new();
        for op in &diff.ops {
            if !documents.contains_key(&op.target_file) {
                let raw = std::fs::read_to_string(self.file_path(op.target_file))?;
                documents.insert(op.target_file, parse_bullets(&raw));
            }
        }

        let mut effective_ops = Vec::with_capacity(diff.ops.len());
        for op in &diff.ops {
            let bullets = documents
                .get_mut(&op.target_file)
                .expect("document loaded above");
            effective_ops.push(apply_op(bullets, op)?);
        }

        for (file, bullets) in &documents {
            std::fs::write(self.file_path(*file), serialize_bullets(*file, bullets))?;
        }

        let effective = PlaybookDiff {
            run_id: diff.run_id.clone(),
            node_id: diff.node_id.clone(),
            ops: effective_ops,
            created_at: diff.created_at,
        };
        let mut history = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())?;
        writeln!(history, "{}", serde_json::to_string(&effective)?)?;

        info!(
            run_id = %effective.run_id,
            node_id = %effective.node_id,
            ops = effective.ops.len(),
            "Playbook diff applied"
        );
        Ok(effective)
    }

    /// Apply the exact inverse of a historical diff as a new forward diff.
    ///
    /// The original history entry stays; the rollback itself becomes the
    /// newest entry.
    pub fn rollback(&self, created_at: DateTime<Utc>) -> Result<PlaybookDiff> {
        let target = self
            .history()?
            .into_iter()
            .find(|d| d.created_at == created_at)
            .ok_or_else(|| WeftError::DiffNotFound(created_at.to_rfc3339()))?;

        let inverse = PlaybookDiff {
            run_id: target.run_id.clone(),
            node_id: target.node_id.clone(),
            ops: target.ops.iter().rev().map(PlaybookOp::inverse).collect(),
            created_at: Utc::now(),
        };
        debug!(rolled_back = %created_at, "Applying inverse playbook diff");
        self.apply_diff(&inverse)
    }
}

/// Apply one op in place, returning the op as actually applied.
fn apply_op(bullets: &mut Vec<Bullet>, op: &PlaybookOp) -> Result<PlaybookOp> {
    let mut effective = op.clone();
    match &op.kind {
        PlaybookOpKind::AddBullet {
            section,
            text,
            bullet_id,
        } => {
            let id = bullet_id
                .clone()
                .unwrap_or_else(|| format!("b-{}", &Uuid::new_v4().simple().to_string()[..8]));
            if bullets.iter().any(|b| b.id == id) {
                return Err(WeftError::InvalidDiff(format!("duplicate bullet id: {}", id)));
            }
            bullets.push(Bullet {
                id: id.clone(),
                text: text.clone(),
                section: section.clone(),
            });
            effective.kind = PlaybookOpKind::AddBullet {
                section: section.clone(),
                text: text.clone(),
                bullet_id: Some(id),
            };
        }
        PlaybookOpKind::RemoveBullet { bullet_id, .. } => {
            let index = bullets
                .iter()
                .position(|b| &b.id == bullet_id)
                .ok_or_else(|| {
                    WeftError::InvalidDiff(format!("bullet not found: {}", bullet_id))
                })?;
            let removed = bullets.remove(index);
            effective.kind = PlaybookOpKind::RemoveBullet {
                bullet_id: removed.id,
                section: removed.section,
                text: removed.text,
            };
        }
        PlaybookOpKind::EditBullet {
            bullet_id, after, ..
        } => {
            let bullet = bullets
                .iter_mut()
                .find(|b| &b.id == bullet_id)
                .ok_or_else(|| {
                    WeftError::InvalidDiff(format!("bullet not found: {}", bullet_id))
                })?;
            let before = std::mem::replace(&mut bullet.text, after.clone());
            effective.kind = PlaybookOpKind::EditBullet {
                bullet_id: bullet_id.clone(),
                before,
                after: after.clone(),
            };
        }
    }
    Ok(effective)
}

/// Parse `## section` headers and `- [id] text` bullets. Anything else is
/// passthrough prose and dropped on re-serialization; the bullet list is the
/// document model.
fn parse_bullets(raw: &str) -> Vec<Bullet> {
    let mut bullets = Vec::new();
    let mut section = DEFAULT_SECTION.to_string();
    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            section = heading.trim().to_string();
        } else if let Some(rest) = trimmed.strip_prefix("- [") {
            if let Some((id, text)) = rest.split_once(']') {
                bullets.push(Bullet {
                    id: id.trim().to_string(),
                    text: text.trim().to_string(),
                    section: section.clone(),
                });
            }
        }
    }
    bullets
}

fn serialize_bullets(file: PlaybookFile, bullets: &[Bullet]) -> String {
    let mut out = format!("# {}\n", file.title());
    let mut current_section: Option<&str> = None;
    for bullet in bullets {
        if current_section != Some(bullet.section.as_str()) {
            out.push_str(&format!("\n## {}\n", bullet.section));
            current_section = Some(bullet.section.as_str());
        }
        out.push_str(&format!("- [{}] {}\n", bullet.id, bullet.text));
    }
    out
}
