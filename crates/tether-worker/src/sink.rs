//! Filesystem result sink.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use tether_core::ResultSink;

/// Stores results as `<dir>/<run_id>.json` and hands the path back as the
/// reference. Rewriting the same run's file is idempotent, which is what
/// makes the sink at-least-once safe.
pub struct FsResultSink {
    dir: PathBuf,
}

impl FsResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ResultSink for FsResultSink {
    async fn put(&self, run_id: Uuid, result: &Value) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating result dir {}", self.dir.display()))?;

        let path = self.dir.join(format!("{run_id}.json"));
        let bytes = serde_json::to_vec(result).context("serializing result")?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing result file {}", path.display()))?;

        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_writes_the_result_and_returns_its_path() {
        let dir = std::env::temp_dir().join(format!("tether-sink-{}", std::process::id()));
        let sink = FsResultSink::new(&dir);
        let run_id = Uuid::new_v4();

        let reference = sink.put(run_id, &json!({"accuracy": 0.9})).await.unwrap();
        assert!(reference.ends_with(&format!("{run_id}.json")));

        let written = tokio::fs::read_to_string(&reference).await.unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&written).unwrap(),
            json!({"accuracy": 0.9})
        );

        // Same run again: same reference, no error.
        let again = sink.put(run_id, &json!({"accuracy": 0.9})).await.unwrap();
        assert_eq!(reference, again);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
