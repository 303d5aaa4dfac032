//! Dependency probes for the health endpoint.

use anyhow::Result;

/// A named reachability check for one external dependency.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Short dependency name used as a key in the health body ("db", "queue").
    fn name(&self) -> &str;

    /// Resolve `Ok` when the dependency is reachable.
    async fn check(&self) -> Result<()>;
}
