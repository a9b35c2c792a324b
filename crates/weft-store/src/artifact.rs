use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::{ArtifactHandle, ArtifactType};

/// Options for a put call.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub tags: Vec<String>,
    pub short_summary: String,
}

impl PutOptions {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            tags: Vec::new(),
            short_summary: summary.into(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Sidecar record persisted next to every artifact.
///
/// Lookups that only need the handle or size read this instead of the
/// content itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub handle: ArtifactHandle,
    pub namespace: String,
    pub name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// How to extract a slice of an artifact without materializing the whole
/// content into a prompt.
#[derive(Debug, Clone)]
pub enum SliceSpec {
    /// Lines matching a regex, with surrounding context lines.
    Grep { pattern: String, context_lines: usize },
    /// First `lines` lines.
    Head { lines: usize },
    /// Last `lines` lines.
    Tail { lines: usize },
    /// 1-indexed inclusive line range.
    Range { from_line: usize, to_line: usize },
}

/// An extracted slice.
#[derive(Debug, Clone)]
pub struct ArtifactSlice {
    pub uri: String,
    pub content: String,
    /// Lines in the slice / lines in the source.
    pub slice_lines: usize,
    pub total_lines: usize,
}

/// Namespaced, content-addressed blob/text storage.
///
/// Layout: `<root>/artifacts/<namespace>/<name>` with a `<name>.meta.json`
/// sidecar per artifact. The content hash is identity at write time, not
/// deduplication — every put writes.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self { root })
    }

    pub fn put_text(
        &self,
        namespace: &str,
        name: &str,
        content: &str,
        options: PutOptions,
    ) -> Result<ArtifactHandle> {
        self.put_bytes(namespace, name, content.as_bytes(), ArtifactType::Text, options)
    }

    pub fn put_markdown(
        &self,
        namespace: &str,
        name: &str,
        content: &str,
        options: PutOptions,
    ) -> Result<ArtifactHandle> {
        self.put_bytes(
            namespace,
            name,
            content.as_bytes(),
            ArtifactType::Markdown,
            options,
        )
    }

    pub fn put_json(
        &self,
        namespace: &str,
        name: &str,
        content: &serde_json::Value,
        options: PutOptions,
    ) -> Result<ArtifactHandle> {
        let raw = serde_json::to_vec_pretty(content)?;
        self.put_bytes(namespace, name, &raw, ArtifactType::Json, options)
    }

    pub fn put_binary(
        &self,
        namespace: &str,
        name: &str,
        content: &[u8],
        options: PutOptions,
    ) -> Result<ArtifactHandle> {
        self.put_bytes(namespace, name, content, ArtifactType::Binary, options)
    }

    fn put_bytes(
        &self,
        namespace: &str,
        name: &str,
        content: &[u8],
        artifact_type: ArtifactType,
        options: PutOptions,
    ) -> Result<ArtifactHandle> {
        validate_component(namespace)?;
        validate_component(name)?;

        let dir = self.root.join("artifacts").join(namespace);
        std::fs::create_dir_all(&dir)?;

        let handle = ArtifactHandle {
            uri: format!("artifact://{}/{}", namespace, name),
            content_hash: sha256_hex(content),
            artifact_type,
            tags: options.tags,
            short_summary: options.short_summary,
        };

        std::fs::write(dir.join(name), content)?;

        let metadata = ArtifactMetadata {
            handle: handle.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            size_bytes: content.len() as u64,
            created_at: Utc::now(),
        };
        let sidecar = serde_json::to_vec_pretty(&metadata)?;
        std::fs::write(dir.join(format!("{}.meta.json", name)), sidecar)?;

        debug!(uri = %handle.uri, bytes = content.len(), "Artifact written");
        Ok(handle)
    }

    pub fn get_text(&self, handle: &ArtifactHandle) -> Result<String> {
        let bytes = self.get_binary(handle)?;
        String::from_utf8(bytes)
            .map_err(|_| WeftError::ArtifactNotFound(format!("{} is not utf-8", handle.uri)))
    }

    pub fn get_json(&self, handle: &ArtifactHandle) -> Result<serde_json::Value> {
        let bytes = self.get_binary(handle)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn get_binary(&self, handle: &ArtifactHandle) -> Result<Vec<u8>> {
        let (namespace, name) = handle
            .parts()
            .ok_or_else(|| WeftError::ArtifactNotFound(handle.uri.clone()))?;
        let path = self.root.join("artifacts").join(namespace).join(name);
        std::fs::read(&path).map_err(|_| WeftError::ArtifactNotFound(handle.uri.clone()))
    }

    /// Read the sidecar record without touching the content.
    pub fn get_metadata(&self, handle: &ArtifactHandle) -> Result<ArtifactMetadata> {
        let (namespace, name) = handle
            .parts()
            .ok_or_else(|| WeftError::ArtifactNotFound(handle.uri.clone()))?;
        self.read_sidecar(namespace, name)
    }

    /// Sidecar lookup from a bare `artifact://` uri, for callers holding
    /// only a reference string (event refs, delta evidence).
    pub fn metadata_by_uri(&self, uri: &str) -> Result<ArtifactMetadata> {
        let (namespace, name) = uri
            .strip_prefix("artifact://")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| WeftError::ArtifactNotFound(uri.to_string()))?;
        self.read_sidecar(namespace, name)
    }

    fn read_sidecar(&self, namespace: &str, name: &str) -> Result<ArtifactMetadata> {
        let path = self
            .root
            .join("artifacts")
            .join(namespace)
            .join(format!("{}.meta.json", name));
        let raw = std::fs::read(&path).map_err(|_| {
            WeftError::ArtifactNotFound(format!("artifact://{}/{}", namespace, name))
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Enumerate handles in a namespace, sorted by name.
    pub fn list_namespace(&self, namespace: &str) -> Result<Vec<ArtifactHandle>> {
        validate_component(namespace)?;
        let dir = self.root.join("artifacts").join(namespace);
        let mut handles = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(handles),
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(name) = file_name.strip_suffix(".meta.json") {
                handles.push(self.read_sidecar(namespace, name)?.handle);
            }
        }
        handles.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(handles)
    }

    /// Enumerate all namespaces with at least one artifact, sorted.
    pub fn list_namespaces(&self) -> Result<Vec<String>> {
        let dir = self.root.join("artifacts");
        let mut namespaces = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(namespaces),
        };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                namespaces.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    /// Extract a slice of a text artifact.
    pub fn create_slice(&self, handle: &ArtifactHandle, spec: &SliceSpec) -> Result<ArtifactSlice> {
        let content = self.get_text(handle)?;
        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();

        let selected: Vec<&str> = match spec {
            SliceSpec::Head { lines: n } => lines.iter().take(*n).copied().collect(),
            SliceSpec::Tail { lines: n } => {
                let skip = total_lines.saturating_sub(*n);
                lines.iter().skip(skip).copied().collect()
            }
            SliceSpec::Range { from_line, to_line } => {
                let from = from_line.saturating_sub(1);
                let to = (*to_line).min(total_lines);
                if from >= to {
                    Vec::new()
                } else {
                    lines[from..to].to_vec()
                }
            }
            SliceSpec::Grep {
                pattern,
                context_lines,
            } => {
                let re = Regex::new(pattern)
                    .map_err(|e| WeftError::InvalidArtifactName(format!("bad pattern: {}", e)))?;
                let mut keep = vec![false; total_lines];
                for (i, line) in lines.iter().enumerate() {
                    if re.is_match(line) {
                        let from = i.saturating_sub(*context_lines);
                        let to = (i + context_lines + 1).min(total_lines);
                        for flag in keep.iter_mut().take(to).skip(from) {
                            *flag = true;
                        }
                    }
                }
                lines
                    .iter()
                    .zip(keep.iter())
                    .filter(|(_, keep)| **keep)
                    .map(|(line, _)| *line)
                    .collect()
            }
        };

        Ok(ArtifactSlice {
            uri: handle.uri.clone(),
            content: selected.join("\n"),
            slice_lines: selected.len(),
            total_lines,
        })
    }

    /// A write-isolated view for one node: writes go only to `namespace`,
    /// reads only to `namespace` plus the allow-list.
    pub fn scoped(
        self: &Arc<Self>,
        node_id: impl Into<String>,
        namespace: impl Into<String>,
        allow_reads_from: Vec<String>,
    ) -> ScopedArtifacts {
        ScopedArtifacts {
            store: Arc::clone(self),
            node_id: node_id.into(),
            namespace: namespace.into(),
            allow_reads_from,
            create_only: false,
        }
    }
}

/// Namespace-scoped view handed to a node task.
///
/// Nodes never hold an unguarded store reference; the staging discipline's
/// write isolation is enforced here.
pub struct ScopedArtifacts {
    store: Arc<ArtifactStore>,
    node_id: String,
    namespace: String,
    allow_reads_from: Vec<String>,
    create_only: bool,
}

impl ScopedArtifacts {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reject overwrites of existing artifact names through this view.
    pub fn with_create_only(mut self, create_only: bool) -> Self {
        self.create_only = create_only;
        self
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if self.create_only && self.store.read_sidecar(&self.namespace, name).is_ok() {
            return Err(WeftError::ScopeViolation {
                node_id: self.node_id.clone(),
                action: "overwrite".into(),
                target: format!("artifact://{}/{}", self.namespace, name),
            });
        }
        Ok(())
    }

    pub fn put_text(&self, name: &str, content: &str, options: PutOptions) -> Result<ArtifactHandle> {
        self.check_writable(name)?;
        self.store.put_text(&self.namespace, name, content, options)
    }

    pub fn put_markdown(
        &self,
        name: &str,
        content: &str,
        options: PutOptions,
    ) -> Result<ArtifactHandle> {
        self.check_writable(name)?;
        self.store
            .put_markdown(&self.namespace, name, content, options)
    }

    pub fn put_json(
        &self,
        name: &str,
        content: &serde_json::Value,
        options: PutOptions,
    ) -> Result<ArtifactHandle> {
        self.check_writable(name)?;
        self.store.put_json(&self.namespace, name, content, options)
    }

    pub fn put_binary(&self, name: &str, content: &[u8], options: PutOptions) -> Result<ArtifactHandle> {
        self.check_writable(name)?;
        self.store
            .put_binary(&self.namespace, name, content, options)
    }

    fn check_readable(&self, handle: &ArtifactHandle) -> Result<()> {
        let namespace = handle
            .namespace()
            .ok_or_else(|| WeftError::ArtifactNotFound(handle.uri.clone()))?;
        if namespace == self.namespace || self.allow_reads_from.iter().any(|ns| ns == namespace) {
            Ok(())
        } else {
            Err(WeftError::ScopeViolation {
                node_id: self.node_id.clone(),
                action: "read".into(),
                target: handle.uri.clone(),
            })
        }
    }

    pub fn get_text(&self, handle: &ArtifactHandle) -> Result<String> {
        self.check_readable(handle)?;
        self.store.get_text(handle)
    }

    pub fn get_metadata(&self, handle: &ArtifactHandle) -> Result<ArtifactMetadata> {
        self.check_readable(handle)?;
        self.store.get_metadata(handle)
    }

    pub fn create_slice(&self, handle: &ArtifactHandle, spec: &SliceSpec) -> Result<ArtifactSlice> {
        self.check_readable(handle)?;
        self.store.create_slice(handle, spec)
    }

    /// Handles visible to this node: its own namespace plus the allow-list.
    pub fn visible_handles(&self) -> Result<Vec<ArtifactHandle>> {
        let mut handles = self.store.list_namespace(&self.namespace)?;
        for namespace in &self.allow_reads_from {
            handles.extend(self.store.list_namespace(namespace)?);
        }
        Ok(handles)
    }
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
    {
        return Err(WeftError::InvalidArtifactName(component.to_string()));
    }
    Ok(())
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Arc<ArtifactStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let handle = store
            .put_text("research", "notes.txt", "finding one", PutOptions::summary("notes"))
            .unwrap();
        assert_eq!(handle.uri, "artifact://research/notes.txt");
        assert_eq!(handle.content_hash.len(), 64);
        assert_eq!(store.get_text(&handle).unwrap(), "finding one");

        let metadata = store.get_metadata(&handle).unwrap();
        assert_eq!(metadata.size_bytes, 11);
        assert_eq!(metadata.namespace, "research");
    }

    #[test]
    fn test_hash_is_identity_not_dedup() {
        let (_dir, store) = store();
        let h1 = store
            .put_text("ns", "a.txt", "same", PutOptions::default())
            .unwrap();
        let h2 = store
            .put_text("ns", "b.txt", "same", PutOptions::default())
            .unwrap();
        // Same content, same hash, two distinct artifacts
        assert_eq!(h1.content_hash, h2.content_hash);
        assert_ne!(h1.uri, h2.uri);
        assert_eq!(store.list_namespace("ns").unwrap().len(), 2);
    }

    #[test]
    fn test_list_namespace_sorted() {
        let (_dir, store) = store();
        store.put_text("ns", "b.txt", "b", PutOptions::default()).unwrap();
        store.put_text("ns", "a.txt", "a", PutOptions::default()).unwrap();
        let handles = store.list_namespace("ns").unwrap();
        assert_eq!(handles[0].name(), Some("a.txt"));
        assert_eq!(handles[1].name(), Some("b.txt"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (_dir, store) = store();
        assert!(store
            .put_text("../escape", "a.txt", "x", PutOptions::default())
            .is_err());
        assert!(store
            .put_text("ns", "sub/dir.txt", "x", PutOptions::default())
            .is_err());
        assert!(store.put_text("", "a.txt", "x", PutOptions::default()).is_err());
    }

    #[test]
    fn test_slices() {
        let (_dir, store) = store();
        let content = "alpha\nbeta\ngamma\ndelta\nepsilon";
        let handle = store
            .put_text("ns", "lines.txt", content, PutOptions::default())
            .unwrap();

        let head = store
            .create_slice(&handle, &SliceSpec::Head { lines: 2 })
            .unwrap();
        assert_eq!(head.content, "alpha\nbeta");
        assert_eq!(head.total_lines, 5);

        let tail = store
            .create_slice(&handle, &SliceSpec::Tail { lines: 1 })
            .unwrap();
        assert_eq!(tail.content, "epsilon");

        let range = store
            .create_slice(
                &handle,
                &SliceSpec::Range {
                    from_line: 2,
                    to_line: 3,
                },
            )
            .unwrap();
        assert_eq!(range.content, "beta\ngamma");

        let grep = store
            .create_slice(
                &handle,
                &SliceSpec::Grep {
                    pattern: "^d".into(),
                    context_lines: 1,
                },
            )
            .unwrap();
        assert_eq!(grep.content, "gamma\ndelta\nepsilon");
    }

    #[test]
    fn test_scoped_write_isolation() {
        let (_dir, store) = store();
        let scoped = store.scoped("n1", "own", vec!["shared".to_string()]);

        let own = scoped
            .put_text("mine.txt", "content", PutOptions::default())
            .unwrap();
        assert_eq!(own.namespace(), Some("own"));

        // Reads from the allow-list pass, others are scope violations
        let shared = store
            .put_text("shared", "s.txt", "shared content", PutOptions::default())
            .unwrap();
        let foreign = store
            .put_text("other", "o.txt", "foreign", PutOptions::default())
            .unwrap();

        assert_eq!(scoped.get_text(&shared).unwrap(), "shared content");
        assert!(matches!(
            scoped.get_text(&foreign),
            Err(WeftError::ScopeViolation { .. })
        ));
    }

    #[test]
    fn test_visible_handles() {
        let (_dir, store) = store();
        store.put_text("own", "a.txt", "a", PutOptions::default()).unwrap();
        store.put_text("shared", "b.txt", "b", PutOptions::default()).unwrap();
        store.put_text("hidden", "c.txt", "c", PutOptions::default()).unwrap();

        let scoped = store.scoped("n1", "own", vec!["shared".to_string()]);
        let visible = scoped.visible_handles().unwrap();
        assert_eq!(visible.len(), 2);
    }

    #[test]
    fn test_create_only_rejects_overwrite() {
        let (_dir, store) = store();
        let scoped = store.scoped("n1", "own", vec![]).with_create_only(true);
        scoped.put_text("once.txt", "v1", PutOptions::default()).unwrap();
        assert!(matches!(
            scoped.put_text("once.txt", "v2", PutOptions::default()),
            Err(WeftError::ScopeViolation { .. })
        ));
        // A different name is fine
        scoped.put_text("twice.txt", "v1", PutOptions::default()).unwrap();
    }

    #[test]
    fn test_metadata_by_uri() {
        let (_dir, store) = store();
        let handle = store
            .put_text("ns", "a.txt", "hello", PutOptions::summary("greeting"))
            .unwrap();
        let metadata = store.metadata_by_uri(&handle.uri).unwrap();
        assert_eq!(metadata.handle.short_summary, "greeting");
        assert!(store.metadata_by_uri("artifact://ns/missing.txt").is_err());
        assert!(store.metadata_by_uri("not-a-uri").is_err());
    }

    #[test]
    fn test_put_json_roundtrip() {
        let (_dir, store) = store();
        let value = serde_json::json!({"k": [1, 2, 3]});
        let handle = store
            .put_json("ns", "data.json", &value, PutOptions::default())
            .unwrap();
        assert_eq!(store.get_json(&handle).unwrap(), value);
    }
}
