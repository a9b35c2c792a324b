pub mod compiler;
pub mod processors;

pub use compiler::{
    Accumulator, CompileConfig, CompileInput, ContextCompiler, ContextProcessor, Section,
};
pub use processors::default_pipeline;
