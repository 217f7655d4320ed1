//! Error taxonomy for the agent crate: `PhaseError` is the only error
//! type that ever propagates out of this crate's public API —
//! everything else (`BlockedTaskError`, `MaxIterationsReached`) is
//! surfaced as data inside a `TaskExecutionResult`, never thrown.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("phase precondition not met: {0}")]
    PreconditionFailed(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("artifact store error: {0}")]
    Artifact(#[from] wayforge_artifact::ArtifactError),

    #[error("oracle error: {0}")]
    Oracle(#[from] wayforge_oracle::OracleError),
}
