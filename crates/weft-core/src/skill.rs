use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, WeftError};
use crate::traits::SkillProvider;
use crate::types::SkillMetadata;

/// TOML manifest for a drop-in skill.
///
/// Lives at `<skills_dir>/<id>/skill.toml`, next to a `SKILL.md` body.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    /// Display name.
    pub name: String,
    /// Human-readable description shown in the metadata index.
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Markdown body file, relative to the skill directory.
    #[serde(default = "default_body_file")]
    pub body: String,
}

fn default_body_file() -> String {
    "SKILL.md".to_string()
}

/// Filesystem-backed skill provider.
///
/// Each subdirectory of `skills_dir` holding a `skill.toml` is one skill;
/// the directory name is the skill id. Directories with unreadable or
/// invalid manifests are skipped with a warning, never a hard failure.
pub struct DirSkillProvider {
    skills_dir: PathBuf,
}

impl DirSkillProvider {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
        }
    }

    fn manifest(&self, id: &str) -> Result<SkillManifest> {
        let path = self.skills_dir.join(id).join("skill.toml");
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| WeftError::SkillNotFound(id.to_string()))?;
        toml::from_str(&raw)
            .map_err(|e| WeftError::Skill(format!("invalid manifest for '{}': {}", id, e)))
    }
}

impl SkillProvider for DirSkillProvider {
    fn list_metadata(&self) -> Result<Vec<SkillMetadata>> {
        let mut skills = Vec::new();
        let entries = match std::fs::read_dir(&self.skills_dir) {
            Ok(entries) => entries,
            Err(_) => {
                debug!(dir = %self.skills_dir.display(), "Skills directory missing, no skills");
                return Ok(skills);
            }
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.manifest(&id) {
                Ok(manifest) => skills.push(SkillMetadata {
                    id,
                    name: manifest.name,
                    description: manifest.description,
                    tags: manifest.tags,
                }),
                Err(WeftError::SkillNotFound(_)) => continue,
                Err(e) => {
                    warn!(skill = %id, error = %e, "Skipping skill with invalid manifest");
                }
            }
        }

        skills.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(skills)
    }

    fn load_markdown(&self, id: &str) -> Result<String> {
        let manifest = self.manifest(id)?;
        let path = self.skills_dir.join(id).join(&manifest.body);
        std::fs::read_to_string(&path).map_err(|_| WeftError::SkillNotFound(id.to_string()))
    }
}

/// In-memory skill provider for tests and embedding.
#[derive(Default)]
pub struct StaticSkillProvider {
    metadata: Vec<SkillMetadata>,
    bodies: HashMap<String, String>,
}

impl StaticSkillProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skill(
        mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        markdown: impl Into<String>,
    ) -> Self {
        let id = id.into();
        self.metadata.push(SkillMetadata {
            id: id.clone(),
            name: id.clone(),
            description: description.into(),
            tags: Vec::new(),
        });
        self.bodies.insert(id, markdown.into());
        self
    }
}

impl SkillProvider for StaticSkillProvider {
    fn list_metadata(&self) -> Result<Vec<SkillMetadata>> {
        Ok(self.metadata.clone())
    }

    fn load_markdown(&self, id: &str) -> Result<String> {
        self.bodies
            .get(id)
            .cloned()
            .ok_or_else(|| WeftError::SkillNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &std::path::Path, id: &str, toml_body: &str, md: &str) {
        let skill_dir = dir.join(id);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("skill.toml"), toml_body).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), md).unwrap();
    }

    #[test]
    fn test_list_and_load() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "web-research",
            "name = \"Web Research\"\ndescription = \"How to research on the web\"\ntags = [\"research\"]\n",
            "# Web Research\n\nSearch before you read.",
        );
        write_skill(
            dir.path(),
            "citation",
            "name = \"Citation\"\ndescription = \"Cite sources\"\n",
            "# Citation\n\nAlways cite.",
        );

        let provider = DirSkillProvider::new(dir.path());
        let metadata = provider.list_metadata().unwrap();
        assert_eq!(metadata.len(), 2);
        // Sorted by id
        assert_eq!(metadata[0].id, "citation");
        assert_eq!(metadata[1].id, "web-research");
        assert_eq!(metadata[1].tags, vec!["research"]);

        let body = provider.load_markdown("citation").unwrap();
        assert!(body.contains("Always cite."));
    }

    #[test]
    fn test_missing_skill() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirSkillProvider::new(dir.path());
        assert!(matches!(
            provider.load_markdown("nope"),
            Err(WeftError::SkillNotFound(_))
        ));
    }

    #[test]
    fn test_missing_dir_lists_empty() {
        let provider = DirSkillProvider::new("/nonexistent/weft-skills");
        assert!(provider.list_metadata().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_manifest_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "good", "name = \"Good\"\ndescription = \"ok\"\n", "body");
        let bad_dir = dir.path().join("bad");
        std::fs::create_dir_all(&bad_dir).unwrap();
        std::fs::write(bad_dir.join("skill.toml"), "not valid toml [[[").unwrap();

        let provider = DirSkillProvider::new(dir.path());
        let metadata = provider.list_metadata().unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].id, "good");
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticSkillProvider::new().with_skill("s1", "desc", "# body");
        assert_eq!(provider.list_metadata().unwrap().len(), 1);
        assert_eq!(provider.load_markdown("s1").unwrap(), "# body");
    }
}
