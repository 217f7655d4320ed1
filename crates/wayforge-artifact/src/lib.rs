//! On-disk artifact store (C10): backlog, sprints, results, checkpoints,
//! architecture/spec documents. Generic over the caller's serde types so
//! it has no dependency on `wayforge-agent`'s concrete data model.

pub mod error;
pub mod store;

pub use error::ArtifactError;
pub use store::ArtifactStore;
