use tracing::debug;

use weft_core::config::{ContextConfig, SkillConfig};
use weft_core::error::Result;
use weft_core::token::estimate_tokens;
use weft_core::types::{
    ArtifactHandle, LoadedSkill, MemoryHit, MessageRole, ModelContext, ModelMessage, Run,
    SkillMetadata,
};
use weft_graph::NodeSpec;

use crate::processors::default_pipeline;

/// Everything a compile call may draw on. Gathered by the caller; the
/// compiler itself never reaches into stores.
pub struct CompileInput<'a> {
    pub run: &'a Run,
    pub node: &'a NodeSpec,
    pub memory_hits: &'a [MemoryHit],
    pub artifact_handles: &'a [ArtifactHandle],
    pub skill_index: &'a [SkillMetadata],
    pub loaded_skills: &'a [LoadedSkill],
    pub recitation: Option<&'a str>,
    pub compacted_summary: Option<&'a str>,
    /// Explicit task instruction; synthesized from the node objective when
    /// absent.
    pub instruction: Option<&'a str>,
}

/// One labeled part of the compiled system prompt.
#[derive(Debug, Clone)]
pub struct Section {
    pub label: String,
    pub body: String,
}

/// Shared accumulator the processors append to.
///
/// The contract is section order and content; the literal joined formatting
/// is an implementation detail.
#[derive(Debug, Default)]
pub struct Accumulator {
    sections: Vec<Section>,
    estimated_tokens: usize,
    instruction: Option<String>,
}

impl Accumulator {
    pub fn push_section(&mut self, label: impl Into<String>, body: impl Into<String>) {
        let section = Section {
            label: label.into(),
            body: body.into(),
        };
        self.estimated_tokens += estimate_tokens(&section.label) + estimate_tokens(&section.body);
        self.sections.push(section);
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref()
    }

    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        let instruction = instruction.into();
        self.estimated_tokens += estimate_tokens(&instruction);
        self.instruction = Some(instruction);
    }
}

/// Knobs shared by the processors.
#[derive(Debug, Clone, Default)]
pub struct CompileConfig {
    pub context: ContextConfig,
    pub skills: SkillConfig,
}

/// A single, independent step of the compile pipeline.
///
/// Processors never read each other's output; their fixed ordering governs
/// placement in the prompt, not data dependency.
pub trait ContextProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(
        &self,
        input: &CompileInput<'_>,
        config: &CompileConfig,
        acc: &mut Accumulator,
    ) -> Result<()>;
}

/// Compiles one fresh, token-bounded context per node invocation.
pub struct ContextCompiler {
    config: CompileConfig,
    processors: Vec<Box<dyn ContextProcessor>>,
}

impl ContextCompiler {
    /// The canonical priority-ordered pipeline.
    pub fn new(config: CompileConfig) -> Self {
        Self {
            config,
            processors: default_pipeline(),
        }
    }

    /// A custom pipeline, for tests and embedders.
    pub fn with_processors(config: CompileConfig, processors: Vec<Box<dyn ContextProcessor>>) -> Self {
        Self { config, processors }
    }

    pub fn compile(&self, input: &CompileInput<'_>) -> Result<ModelContext> {
        let mut acc = Accumulator::default();
        for processor in &self.processors {
            processor.process(input, &self.config, &mut acc)?;
        }

        let system = acc
            .sections()
            .iter()
            .map(|s| format!("## {}\n\n{}", s.label, s.body))
            .collect::<Vec<_>>()
            .join("\n\n");

        // The task instruction is the sole user message
        let instruction = acc
            .instruction()
            .map(str::to_string)
            .unwrap_or_else(|| input.node.objective.clone());

        debug!(
            node_id = %input.node.id,
            sections = acc.sections().len(),
            estimated_tokens = acc.estimated_tokens(),
            "Context compiled"
        );

        Ok(ModelContext {
            system,
            messages: vec![ModelMessage {
                role: MessageRole::User,
                content: instruction,
            }],
        })
    }
}
