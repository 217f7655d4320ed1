//! Agent core (C7/C8/C9): the convergence loop, the DAG task scheduler,
//! and the uniform phase-executor lifecycle built on top of
//! `wayforge-oracle`, `wayforge-tools`, and `wayforge-artifact`.

pub mod error;
pub mod iterator;
pub mod json_extract;
pub mod model;
pub mod phase;
pub mod quality;
pub mod scheduler;

pub use error::PhaseError;
pub use iterator::{IteratorConfig, IteratorOutcome, QualityEvaluator, TaskIterator, TestRunner};
pub use phase::{CompletePhase, ConvergePhase, IteratorTaskRunner, OrchestratePhase, Phase, PhaseCheckpoint, PhaseMetrics, PhaseResult};
pub use scheduler::{ExecutionMode, ProgressEvent, ProgressPhase, ProgressSink, SchedulerConfig, TaskRunner, TaskScheduler};
