//! Fault-tolerant dispatch of analysis jobs to worker processes
//!
//! - [`protocol`]: JSON lines exchanged with workers
//! - [`scheduler`]: queue, per-slot states and the outstanding counter
//! - [`process`]: subprocess handles and their reader tasks
//! - [`pool`]: event loop, watchdog and worker replacement
//! - [`worker`]: the loop run inside each worker

pub mod pool;
pub mod process;
pub mod protocol;
pub mod scheduler;
pub mod worker;

pub use pool::{PoolOptions, PoolStats, WorkerPool, execute};
pub use process::{PoolEvent, WorkerCommand};
pub use protocol::{WorkerRequest, WorkerResponse, WorkerSettings};
pub use scheduler::{Job, WorkerState};
