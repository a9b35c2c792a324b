pub mod config;
pub mod error;
pub mod provider;
pub mod skill;
pub mod token;
pub mod traits;
pub mod types;

pub use config::WeftConfig;
pub use error::{Result, WeftError};
pub use traits::{ModelProvider, SkillProvider};
pub use types::*;
