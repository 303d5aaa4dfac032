//! Worker side of the tether control plane.
//!
//! A worker turns queue hints (and scan results) into executions. Every hint
//! is untrusted: the executor re-admits the run by acquiring its lease with a
//! conditional update, and a worker that loses the lease abandons all further
//! writes for that run. The heartbeat runs beside each execution and is the
//! only thing keeping the lease alive.

mod dispatch;
mod executor;
mod heartbeat;
mod runner;
mod sink;

pub use dispatch::Dispatcher;
pub use executor::{worker_identity, Executor, ExecutorConfig};
pub use heartbeat::Heartbeat;
pub use runner::{MockRunner, RunnerRegistry};
pub use sink::FsResultSink;
