pub mod artifact;
pub mod memory;
pub mod playbook;
pub mod session;

pub use artifact::{
    ArtifactMetadata, ArtifactSlice, ArtifactStore, PutOptions, ScopedArtifacts, SliceSpec,
};
pub use memory::{MemoryQuery, MemoryStore};
pub use playbook::PlaybookStore;
pub use session::{EventQuery, RunMetadata, SessionStore};
