//! Stage, pipeline and cluster execution

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod orchestrator;
pub mod scheduler;

pub use cancel::{Interrupted, RunSignal};
pub use engine::{EventBus, EventHandler, ExecutionEvent, HostReport, PipelineRunner};
pub use executor::{StageEnv, StageExecutor};
pub use orchestrator::{aggregate, Orchestrator, OrchestratorOptions, RunReport};
pub use scheduler::{SchedulingStrategy, WorkerScheduler};
