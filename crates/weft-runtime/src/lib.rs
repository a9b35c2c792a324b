pub mod node_runner;
pub mod runtime;

pub use node_runner::{ModelNodeRunner, RunProgress};
pub use runtime::WeftRuntime;
