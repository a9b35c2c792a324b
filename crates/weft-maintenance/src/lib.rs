pub mod compactor;
pub mod curator;
pub mod reciter;
pub mod reflector;
pub mod triggers;

pub use compactor::Compactor;
pub use curator::{Curator, STAGED_MEMORY_TAG, STAGED_PLAYBOOK_TAG};
pub use reciter::{Reciter, Todo, TodoEntry};
pub use reflector::Reflector;
pub use triggers::{MaintenanceTriggers, NodeTriggers};
