use weft_core::error::Result;

use crate::compiler::{Accumulator, CompileConfig, CompileInput, ContextProcessor};

/// The canonical pipeline, in priority order.
pub fn default_pipeline() -> Vec<Box<dyn ContextProcessor>> {
    vec![
        Box::new(IdentityProcessor),
        Box::new(ObjectiveProcessor),
        Box::new(MemoryProcessor),
        Box::new(ArtifactPointerProcessor),
        Box::new(SkillIndexProcessor),
        Box::new(SkillContentProcessor),
        Box::new(RecitationProcessor),
        Box::new(BudgetGuardProcessor),
        Box::new(TaskInstructionProcessor),
    ]
}

const IDENTITY_RULES: &str = "You are one work node inside a task \
orchestrator. You receive a freshly compiled context, not a running \
transcript. Rules:\n\
- Work only toward this node's objective; upstream results arrive as \
artifact pointers.\n\
- Reference artifacts by uri instead of restating their content.\n\
- Propose memory or playbook changes as staged deltas; never assume they \
are applied.\n\
- Satisfy every acceptance criterion before finishing.";

/// Stable identity/rules prefix. Identical for every node of every run so
/// prompt caches and replays line up.
pub struct IdentityProcessor;

impl ContextProcessor for IdentityProcessor {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn process(
        &self,
        _input: &CompileInput<'_>,
        _config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        acc.push_section("Identity", IDENTITY_RULES);
        Ok(())
    }
}

/// Node objective, acceptance criteria, and isolation scope.
pub struct ObjectiveProcessor;

impl ContextProcessor for ObjectiveProcessor {
    fn name(&self) -> &'static str {
        "objective"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        _config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let node = input.node;
        let mut body = format!(
            "Run objective: {}\nNode `{}` ({:?}): {}\n",
            input.run.objective, node.id, node.node_type, node.objective
        );

        body.push_str("\nAcceptance criteria:\n");
        for test in &node.acceptance {
            body.push_str(&format!("- {}\n", test.describe()));
        }

        if !node.io.inputs.is_empty() {
            body.push_str(&format!("\nExpected inputs: {}\n", node.io.inputs.join(", ")));
        }
        if !node.io.outputs.is_empty() {
            body.push_str(&format!(
                "Promised outputs: {}\n",
                node.io.outputs.join(", ")
            ));
        }

        body.push_str(&format!(
            "\nScope: write artifacts only to namespace `{}`.",
            node.scope.artifact_namespace
        ));
        if !node.scope.artifact_policy.allow_reads_from.is_empty() {
            body.push_str(&format!(
                " Readable namespaces: {}.",
                node.scope.artifact_policy.allow_reads_from.join(", ")
            ));
        }

        acc.push_section("Task", body.trim_end().to_string());
        Ok(())
    }
}

/// Top-N retrieved memory, highest score first.
pub struct MemoryProcessor;

impl ContextProcessor for MemoryProcessor {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if input.memory_hits.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for hit in input.memory_hits.iter().take(config.context.memory_top_k) {
            body.push_str(&format!(
                "- ({}, {:.2}) {}\n",
                hit.category, hit.score, hit.item.text
            ));
        }
        acc.push_section("Relevant Memory", body.trim_end().to_string());
        Ok(())
    }
}

/// Pointer-first artifact index: handle + summary, never raw bytes.
pub struct ArtifactPointerProcessor;

impl ContextProcessor for ArtifactPointerProcessor {
    fn name(&self) -> &'static str {
        "artifacts"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        _config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if input.artifact_handles.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for handle in input.artifact_handles {
            body.push_str(&format!(
                "- {} ({:?}) — {} [{}]\n",
                handle.uri,
                handle.artifact_type,
                handle.short_summary,
                &handle.content_hash[..handle.content_hash.len().min(12)]
            ));
        }
        acc.push_section("Available Artifacts", body.trim_end().to_string());
        Ok(())
    }
}

/// Name + description for every visible skill. Bodies stay out of the
/// prompt unless explicitly selected.
pub struct SkillIndexProcessor;

impl ContextProcessor for SkillIndexProcessor {
    fn name(&self) -> &'static str {
        "skill_index"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        _config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if input.skill_index.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for skill in input.skill_index {
            body.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }
        acc.push_section("Skill Index", body.trim_end().to_string());
        Ok(())
    }
}

/// Full content of explicitly selected skills, bounded by count and total
/// length. Past the cap, content is truncated rather than omitted.
pub struct SkillContentProcessor;

impl ContextProcessor for SkillContentProcessor {
    fn name(&self) -> &'static str {
        "skill_content"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if input.loaded_skills.is_empty() {
            return Ok(());
        }
        let mut remaining = config.skills.max_skill_chars;
        for skill in input.loaded_skills.iter().take(config.skills.max_loaded_skills) {
            if remaining == 0 {
                break;
            }
            let body = if skill.markdown.len() > remaining {
                let mut cut = remaining;
                while !skill.markdown.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("{}\n[truncated]", &skill.markdown[..cut])
            } else {
                skill.markdown.clone()
            };
            remaining = remaining.saturating_sub(skill.markdown.len());
            acc.push_section(format!("Skill: {}", skill.id), body);
        }
        Ok(())
    }
}

/// Current plan and recent observations, re-rendered by the reciter.
pub struct RecitationProcessor;

impl ContextProcessor for RecitationProcessor {
    fn name(&self) -> &'static str {
        "recitation"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        _config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if let Some(recitation) = input.recitation {
            acc.push_section("Current Plan", recitation);
        }
        Ok(())
    }
}

/// Budget accounting: warns once estimated usage crosses the configured
/// fraction, and carries the compacted-history summary when one exists.
pub struct BudgetGuardProcessor;

impl ContextProcessor for BudgetGuardProcessor {
    fn name(&self) -> &'static str {
        "budget_guard"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if let Some(summary) = input.compacted_summary {
            acc.push_section("Compacted History", summary);
        }
        let budget = config.context.max_context_tokens;
        let threshold = (budget as f64 * config.context.budget_warn_fraction) as usize;
        if acc.estimated_tokens() > threshold {
            acc.push_section(
                "Budget Notice",
                format!(
                    "Context usage is high (~{} of {} tokens). Keep output focused and \
                     prefer artifact pointers over inlined content.",
                    acc.estimated_tokens(),
                    budget
                ),
            );
        }
        Ok(())
    }
}

/// Emits the task instruction when no earlier processor has; the compiler
/// turns it into the sole user message.
pub struct TaskInstructionProcessor;

impl ContextProcessor for TaskInstructionProcessor {
    fn name(&self) -> &'static str {
        "task_instruction"
    }

    fn process(
        &self,
        input: &CompileInput<'_>,
        _config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if acc.instruction().is_some() {
            return Ok(());
        }
        match input.instruction {
            Some(instruction) => acc.set_instruction(instruction),
            None => acc.set_instruction(format!(
                "Carry out this node's objective now: {}\nSatisfy every acceptance \
                 criterion listed in the Task section.",
                input.node.objective
            )),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ContextCompiler;
    use weft_core::config::{ContextConfig, SkillConfig};
    use weft_core::types::{
        ArtifactHandle, ArtifactType, LoadedSkill, MemoryCategory, MemoryHit, MemoryItem, Run,
        SkillMetadata,
    };
    use weft_graph::{NodeSpec, NodeType, Scope};

    fn run_and_node() -> (Run, NodeSpec) {
        let run = Run::new("produce the quarterly report");
        let node = NodeSpec::new("draft", NodeType::Execute, "draft the report body").with_scope(
            Scope::new("draft").with_reads_from(vec!["research".into()]),
        );
        (run, node)
    }

    fn base_input<'a>(run: &'a Run, node: &'a NodeSpec) -> CompileInput<'a> {
        CompileInput {
            run,
            node,
            memory_hits: &[],
            artifact_handles: &[],
            skill_index: &[],
            loaded_skills: &[],
            recitation: None,
            compacted_summary: None,
            instruction: None,
        }
    }

    fn handle(uri: &str, summary: &str) -> ArtifactHandle {
        ArtifactHandle {
            uri: uri.into(),
            content_hash: "c0ffee".repeat(11),
            artifact_type: ArtifactType::Markdown,
            tags: vec![],
            short_summary: summary.into(),
        }
    }

    #[test]
    fn test_full_pipeline_section_order() {
        let (run, node) = run_and_node();
        let hits = vec![MemoryHit {
            category: MemoryCategory::Pitfalls,
            item: MemoryItem::new("watch for stale numbers", "node:n0", 0.9),
            score: 0.9,
        }];
        let handles = vec![handle("artifact://research/sources.md", "collected sources")];
        let index = vec![SkillMetadata {
            id: "tables".into(),
            name: "Tables".into(),
            description: "Render markdown tables".into(),
            tags: vec![],
        }];
        let loaded = vec![LoadedSkill {
            id: "tables".into(),
            markdown: "# Tables\nUse pipes.".into(),
        }];

        let mut input = base_input(&run, &node);
        input.memory_hits = &hits;
        input.artifact_handles = &handles;
        input.skill_index = &index;
        input.loaded_skills = &loaded;
        input.recitation = Some("- [x] research\n- [ ] draft");
        input.compacted_summary = Some("Earlier: sources gathered.");

        let compiler = ContextCompiler::new(CompileConfig::default());
        let context = compiler.compile(&input).unwrap();

        let labels = [
            "## Identity",
            "## Task",
            "## Relevant Memory",
            "## Available Artifacts",
            "## Skill Index",
            "## Skill: tables",
            "## Current Plan",
            "## Compacted History",
        ];
        let mut last = 0;
        for label in labels {
            let position = context
                .system
                .find(label)
                .unwrap_or_else(|| panic!("missing section {}", label));
            assert!(position >= last, "section {} out of order", label);
            last = position;
        }
    }

    #[test]
    fn test_pointer_first_no_raw_content() {
        let (run, node) = run_and_node();
        let handles = vec![handle("artifact://research/sources.md", "collected sources")];
        let mut input = base_input(&run, &node);
        input.artifact_handles = &handles;

        let compiler = ContextCompiler::new(CompileConfig::default());
        let context = compiler.compile(&input).unwrap();
        assert!(context.system.contains("artifact://research/sources.md"));
        assert!(context.system.contains("collected sources"));
    }

    #[test]
    fn test_budget_guard_warns_past_fraction() {
        let (run, node) = run_and_node();
        let big = "x".repeat(4000);
        let loaded = vec![LoadedSkill {
            id: "big".into(),
            markdown: big,
        }];
        let mut input = base_input(&run, &node);
        input.loaded_skills = &loaded;

        let config = CompileConfig {
            context: ContextConfig {
                max_context_tokens: 1000,
                budget_warn_fraction: 0.75,
                memory_top_k: 5,
            },
            skills: SkillConfig::default(),
        };
        let context = ContextCompiler::new(config).compile(&input).unwrap();
        assert!(context.system.contains("## Budget Notice"));
    }

    #[test]
    fn test_no_budget_warning_under_fraction() {
        let (run, node) = run_and_node();
        let input = base_input(&run, &node);
        let context = ContextCompiler::new(CompileConfig::default())
            .compile(&input)
            .unwrap();
        assert!(!context.system.contains("## Budget Notice"));
    }

    #[test]
    fn test_skill_content_truncated_not_omitted() {
        let (run, node) = run_and_node();
        let loaded = vec![
            LoadedSkill {
                id: "first".into(),
                markdown: "a".repeat(90),
            },
            LoadedSkill {
                id: "second".into(),
                markdown: "b".repeat(90),
            },
        ];
        let mut input = base_input(&run, &node);
        input.loaded_skills = &loaded;

        let config = CompileConfig {
            context: ContextConfig::default(),
            skills: SkillConfig {
                max_loaded_skills: 4,
                max_skill_chars: 100,
                skills_dir: None,
            },
        };
        let context = ContextCompiler::new(config).compile(&input).unwrap();
        // First fits whole; second is cut to the remaining 10 chars
        assert!(context.system.contains("## Skill: first"));
        assert!(context.system.contains("## Skill: second"));
        assert!(context.system.contains("[truncated]"));
    }

    #[test]
    fn test_skill_count_cap() {
        let (run, node) = run_and_node();
        let loaded: Vec<LoadedSkill> = (0..3)
            .map(|i| LoadedSkill {
                id: format!("s{}", i),
                markdown: "body".into(),
            })
            .collect();
        let mut input = base_input(&run, &node);
        input.loaded_skills = &loaded;

        let config = CompileConfig {
            context: ContextConfig::default(),
            skills: SkillConfig {
                max_loaded_skills: 2,
                max_skill_chars: 10_000,
                skills_dir: None,
            },
        };
        let context = ContextCompiler::new(config).compile(&input).unwrap();
        assert!(context.system.contains("## Skill: s0"));
        assert!(context.system.contains("## Skill: s1"));
        assert!(!context.system.contains("## Skill: s2"));
    }

    #[test]
    fn test_explicit_instruction_wins() {
        let (run, node) = run_and_node();
        let mut input = base_input(&run, &node);
        input.instruction = Some("Only write the executive summary.");

        let context = ContextCompiler::new(CompileConfig::default())
            .compile(&input)
            .unwrap();
        assert_eq!(context.messages[0].content, "Only write the executive summary.");
    }

    #[test]
    fn test_memory_top_k_respected() {
        let (run, node) = run_and_node();
        let hits: Vec<MemoryHit> = (0..10)
            .map(|i| MemoryHit {
                category: MemoryCategory::Facts,
                item: MemoryItem::new(format!("fact number {}", i), "node:n0", 0.5),
                score: 0.5,
            })
            .collect();
        let mut input = base_input(&run, &node);
        input.memory_hits = &hits;

        let config = CompileConfig {
            context: ContextConfig {
                memory_top_k: 3,
                ..Default::default()
            },
            skills: SkillConfig::default(),
        };
        let context = ContextCompiler::new(config).compile(&input).unwrap();
        assert!(context.system.contains("fact number 2"));
        assert!(!context.system.contains("fact number 3"));
    }
}
