//! Testing utilities for the tether control plane.
//!
//! [`MemoryRunStore`] mirrors the conditional-update semantics of the
//! Postgres store behind a mutex, so admission and worker logic can be
//! exercised without a database. The conditions in each operation are kept
//! textually parallel to the SQL `WHERE` clauses; a behavioral divergence
//! between the two stores is a bug here.
//!
//! The rest are scripted doubles for the queue, feed, runner, and sink seams.

mod doubles;
mod memory_store;

pub use doubles::{
    ChannelFeed, ChannelQueue, FailingQueue, FailingRunner, FailingSink, HookRunner, MemorySink,
    RecordingQueue, SleepRunner, StaticRunner,
};
pub use memory_store::MemoryRunStore;
