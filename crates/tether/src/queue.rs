//! The queue seam: a one-way, best-effort hand-off from admission to workers.
//!
//! Messages may be dropped, duplicated, or reordered. The queue is never the
//! system of record; a worker that receives a hint still performs its own
//! admission via lease acquisition, and the dispatch loop's periodic scan
//! guarantees a dropped hint cannot strand a run.

use anyhow::Result;
use uuid::Uuid;

/// Producer side: "run R should be attempted".
#[async_trait::async_trait]
pub trait RunQueue: Send + Sync {
    /// Enqueue a hint for the given run. Best-effort; failures are logged by
    /// the caller and never fail admission.
    async fn enqueue(&self, run_id: Uuid) -> Result<()>;
}

/// Consumer side: a stream of run-id hints.
#[async_trait::async_trait]
pub trait RunFeed: Send {
    /// Wait for the next hint. Errors indicate the feed itself failed (e.g.
    /// a lost connection); the dispatch loop falls back to scanning.
    async fn next(&mut self) -> Result<Uuid>;
}

/// A queue that silently drops every hint.
///
/// Use when execution is driven entirely by the dispatch scan.
pub struct NoOpRunQueue;

#[async_trait::async_trait]
impl RunQueue for NoOpRunQueue {
    async fn enqueue(&self, _run_id: Uuid) -> Result<()> {
        Ok(())
    }
}
