//! # Tether
//!
//! A durable run control plane where admission deduplicates, leases
//! serialize, and the store defines authority.
//!
//! ## Core Concepts
//!
//! Tether separates **hints** from **authority**:
//! - The queue carries hints ("run R should be attempted") and may drop them
//! - The [`RunStore`] is the single system of record; every state change is a
//!   conditional update against it
//!
//! The key principle: **at-least-once admission, at-most-once execution**.
//! Clients may create duplicate requests and workers may receive duplicate
//! hints; the lease CAS on the run row is what makes execution exclusive.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!     │
//!     ▼ POST /runs
//! Admission ──► canonicalize ──► dedup (key, then hash)
//!     │
//!     ▼ one transaction
//! RunStore (runs + idempotency_keys)
//!     │                                   ▲
//!     │ best-effort hint                  │ conditional updates
//!     ▼                                   │
//! RunQueue ──► Dispatch loop ──► Executor ┤
//!              (hints + scan)       │     │
//!                                   ▼     │
//!                               Heartbeat ┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **The store is authoritative** - queue hints are never trusted for state
//! 2. **Leases gate transitions** - only the current owner can finalize a run
//! 3. **Terminal states are terminal** - no successful update leaves them
//! 4. **Attempts are counted at acquisition** - `attempt_count` increments
//!    once per transition into `Running`
//! 5. **Bindings are immutable** - an idempotency key maps to one run, forever
//!
//! ## Guarantees
//!
//! - **At-most-once execution**: concurrent acquisitions race on a row CAS;
//!   at most one wins per lease window
//! - **No stranded runs**: a dropped hint is recovered by the periodic scan of
//!   `Pending` runs and stale leases
//! - **Fail-silent workers**: a worker that loses its lease abandons all
//!   further writes for that run
//!
//! ## What This Is Not
//!
//! Tether is **not**:
//! - A priority or fair-share scheduler
//! - A result store (results live behind an opaque reference string)
//! - A cancellation API (`Cancelled` exists as a terminal label only)
//!
//! Tether **is**:
//! > A durable run control plane where admission deduplicates, leases
//! > serialize, and the store defines authority.

// Core modules
mod canonical;
mod config;
mod exec;
mod probe;
mod queue;
mod run;
mod store;

// Re-export run model
pub use run::{ParseStatusError, Run, RunStatus};

// Re-export canonical form helpers
pub use canonical::{canonical_params, CanonicalError};

// Re-export store seam
pub use store::{Admission, RunStore, StatusCounts, StoreError};

// Re-export queue seams
pub use queue::{NoOpRunQueue, RunFeed, RunQueue};

// Re-export execution seams
pub use exec::{ModelRunner, ResultSink};

// Re-export dependency probes
pub use probe::Probe;

// Re-export configuration
pub use config::{Config, ConfigError};

// Re-export commonly used external types
pub use async_trait::async_trait;
