//! Canonical parameter form and payload hashing.
//!
//! Implicit deduplication compares requests by content, so two parameter
//! objects that differ only in key order or whitespace must hash identically
//! across runs and processes.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A parameter value that could not be rendered in canonical form.
#[derive(Debug, thiserror::Error)]
#[error("parameters are not serializable: {0}")]
pub struct CanonicalError(#[from] serde_json::Error);

/// Render `params` as its canonical byte string and payload hash.
///
/// The canonical form is minified JSON with lexicographic key order at every
/// nesting level (`serde_json` object maps are BTreeMap-backed, and the
/// compact writer emits no insignificant whitespace). Arrays preserve order;
/// non-ASCII text passes through as UTF-8 without `\u` escaping.
///
/// Returns the canonical string and the lowercase hex SHA-256 of its bytes.
pub fn canonical_params(params: &Map<String, Value>) -> Result<(String, String), CanonicalError> {
    let canonical = serde_json::to_string(params)?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let payload_hash = format!("{:x}", hasher.finalize());

    Ok((canonical, payload_hash))
}
