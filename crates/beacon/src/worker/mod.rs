//! Worker processes.
//!
//! - `resolver` - maps a role to an executable path and ordered flags
//! - `supervisor` - launches a worker, forwards its output, and guarantees termination

pub mod resolver;
pub mod supervisor;

pub use resolver::{ConfiguredResolver, ResolvedWorkers, WorkerCommand};
pub use supervisor::{Supervisor, WorkerExit};
