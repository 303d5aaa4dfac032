//! Model runner selection and the mock runner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use tether_core::ModelRunner;

/// Registry mapping the `"model"` parameter field to a runner.
///
/// Unknown or absent model names fall back to the default runner; the
/// control plane never depends on runner internals.
pub struct RunnerRegistry {
    default: Arc<dyn ModelRunner>,
    by_name: HashMap<String, Arc<dyn ModelRunner>>,
}

impl RunnerRegistry {
    pub fn new(default: Arc<dyn ModelRunner>) -> Self {
        Self {
            default,
            by_name: HashMap::new(),
        }
    }

    /// Register a runner for a model name.
    ///
    /// # Panics
    ///
    /// Panics if a runner is already registered for this name.
    pub fn register(&mut self, name: impl Into<String>, runner: Arc<dyn ModelRunner>) {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            panic!("runner already registered for model: {name}");
        }
        self.by_name.insert(name, runner);
    }

    pub fn select(&self, parameters: &Value) -> Arc<dyn ModelRunner> {
        parameters
            .get("model")
            .and_then(Value::as_str)
            .and_then(|name| self.by_name.get(name))
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// A mock model that simulates work by sleeping.
///
/// Parameters:
/// - `duration` (seconds, default 5.0): simulated processing time
/// - `fail_probability` (0.0 to 1.0, default 0.0): chance of failing
pub struct MockRunner;

#[async_trait]
impl ModelRunner for MockRunner {
    async fn run(&self, parameters: &Value) -> Result<Value> {
        let duration = parameters
            .get("duration")
            .and_then(Value::as_f64)
            .unwrap_or(5.0)
            .max(0.0);
        let fail_probability = parameters
            .get("fail_probability")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        tracing::info!(duration, fail_probability, "mock run started");
        tokio::time::sleep(Duration::from_secs_f64(duration)).await;

        if fastrand::f64() < fail_probability {
            bail!("simulated random failure in mock runner");
        }

        let accuracy = 0.8 + fastrand::f64() * 0.2;
        let result = json!({
            "accuracy": (accuracy * 10_000.0).round() / 10_000.0,
            "processed_items": fastrand::u32(100..=1000),
            "simulated_duration": duration,
        });

        tracing::info!(result = %result, "mock run finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedRunner(&'static str);

    #[async_trait]
    impl ModelRunner for NamedRunner {
        async fn run(&self, _parameters: &Value) -> Result<Value> {
            Ok(json!({"ran": self.0}))
        }
    }

    #[tokio::test]
    async fn test_registry_selects_by_model_field() {
        let mut registry = RunnerRegistry::new(Arc::new(NamedRunner("default")));
        registry.register("alpha", Arc::new(NamedRunner("alpha")));

        let picked = registry.select(&json!({"model": "alpha"}));
        assert_eq!(picked.run(&json!({})).await.unwrap()["ran"], "alpha");
    }

    #[tokio::test]
    async fn test_registry_falls_back_to_default() {
        let registry = RunnerRegistry::new(Arc::new(NamedRunner("default")));

        for parameters in [json!({}), json!({"model": "unknown"}), json!({"model": 7})] {
            let picked = registry.select(&parameters);
            assert_eq!(picked.run(&json!({})).await.unwrap()["ran"], "default");
        }
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_registry_rejects_duplicate_registration() {
        let mut registry = RunnerRegistry::new(Arc::new(NamedRunner("default")));
        registry.register("alpha", Arc::new(NamedRunner("a")));
        registry.register("alpha", Arc::new(NamedRunner("b")));
    }

    #[tokio::test]
    async fn test_mock_runner_reports_its_simulated_work() {
        let result = MockRunner
            .run(&json!({"duration": 0.0}))
            .await
            .unwrap();

        let accuracy = result["accuracy"].as_f64().unwrap();
        assert!((0.8..=1.0).contains(&accuracy));
        let items = result["processed_items"].as_u64().unwrap();
        assert!((100..=1000).contains(&items));
        assert_eq!(result["simulated_duration"], json!(0.0));
    }

    #[tokio::test]
    async fn test_mock_runner_certain_failure_fails() {
        let err = MockRunner
            .run(&json!({"duration": 0.0, "fail_probability": 1.0}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("simulated"));
    }
}
