use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::types::{MemoryCategory, MemoryDelta, MemoryHit, MemoryItem};

/// A retrieval query over long-lived memory.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub text: String,
    /// Restrict to these categories; `None` searches all five.
    pub categories: Option<Vec<MemoryCategory>>,
    pub top_k: usize,
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            categories: None,
            top_k,
        }
    }
}

/// Retrieval-oriented long-lived memory.
///
/// Five fixed categories, one JSONL file each under `<root>/memory/`.
/// Mutated only via `apply_memory_delta` — the commit-gated boundary that
/// keeps staged deltas inert until merged.
pub struct MemoryStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("memory"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn category_path(&self, category: MemoryCategory) -> PathBuf {
        self.root
            .join("memory")
            .join(format!("{}.jsonl", category.as_str()))
    }

    /// All items in one category, in stored order.
    pub fn items(&self, category: MemoryCategory) -> Result<Vec<MemoryItem>> {
        read_items(&self.category_path(category))
    }

    /// Scored keyword retrieval.
    ///
    /// Score = (fraction of query terms matched as substrings of the item
    /// text, case-insensitive) × item confidence. Zero-score items are
    /// dropped; results are sorted descending and truncated to `top_k`.
    pub fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryHit>> {
        let terms: Vec<String> = query
            .text
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let categories: Vec<MemoryCategory> = match &query.categories {
            Some(categories) => categories.clone(),
            None => MemoryCategory::ALL.to_vec(),
        };

        let mut hits = Vec::new();
        for category in categories {
            for item in self.items(category)? {
                let haystack = item.text.to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                if matched == 0 {
                    continue;
                }
                let score = (matched as f64 / terms.len() as f64) * item.confidence;
                hits.push(MemoryHit {
                    category,
                    item,
                    score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        hits.truncate(query.top_k);
        debug!(query = %query.text, hits = hits.len(), "Memory retrieved");
        Ok(hits)
    }

    /// The sole mutation path: upsert every item in the delta by id, per
    /// category. A delta persisted anywhere else has no effect here.
    pub fn apply_memory_delta(&self, delta: &MemoryDelta) -> Result<usize> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| WeftError::Io(std::io::Error::other("memory lock poisoned")))?;
        let mut applied = 0;

        for category in MemoryCategory::ALL {
            let adds = delta.items(category);
            if adds.is_empty() {
                continue;
            }
            let path = self.category_path(category);
            let mut items = read_items(&path)?;
            for add in adds {
                match items.iter_mut().find(|existing| existing.id == add.id) {
                    Some(existing) => *existing = add.clone(),
                    None => items.push(add.clone()),
                }
                applied += 1;
            }
            write_items(&path, &items)?;
        }

        info!(
            run_id = %delta.run_id,
            node_id = %delta.node_id,
            applied,
            "Memory delta applied"
        );
        Ok(applied)
    }
}

fn read_items(path: &Path) -> Result<Vec<MemoryItem>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Ok(Vec::new()),
    };
    let mut items = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        items.push(serde_json::from_str(line)?);
    }
    Ok(items)
}

fn write_items(path: &Path, items: &[MemoryItem]) -> Result<()> {
    let mut out = String::new();
    for item in items {
        out.push_str(&serde_json::to_string(item)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}
