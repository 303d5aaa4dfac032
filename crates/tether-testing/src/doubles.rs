//! Scripted doubles for the queue, feed, runner, and sink seams.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use tether_core::{ModelRunner, ResultSink, RunFeed, RunQueue};

/// Queue that records every hint it receives.
#[derive(Default)]
pub struct RecordingQueue {
    hints: Mutex<Vec<Uuid>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hints(&self) -> Vec<Uuid> {
        self.hints.lock().expect("queue mutex poisoned").clone()
    }
}

#[async_trait]
impl RunQueue for RecordingQueue {
    async fn enqueue(&self, run_id: Uuid) -> Result<()> {
        self.hints.lock().expect("queue mutex poisoned").push(run_id);
        Ok(())
    }
}

/// Queue whose every enqueue fails, for exercising the best-effort contract.
pub struct FailingQueue;

#[async_trait]
impl RunQueue for FailingQueue {
    async fn enqueue(&self, _run_id: Uuid) -> Result<()> {
        bail!("queue unavailable")
    }
}

/// Queue that forwards hints into a [`ChannelFeed`], closing the
/// admission-to-worker loop in-process.
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl ChannelQueue {
    pub fn new(tx: mpsc::UnboundedSender<Uuid>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RunQueue for ChannelQueue {
    async fn enqueue(&self, run_id: Uuid) -> Result<()> {
        self.tx
            .send(run_id)
            .map_err(|_| anyhow!("hint channel closed"))
    }
}

/// Feed driven by an in-process channel.
pub struct ChannelFeed {
    rx: mpsc::UnboundedReceiver<Uuid>,
}

impl ChannelFeed {
    pub fn pair() -> (mpsc::UnboundedSender<Uuid>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl RunFeed for ChannelFeed {
    async fn next(&mut self) -> Result<Uuid> {
        self.rx.recv().await.ok_or_else(|| anyhow!("feed closed"))
    }
}

/// Runner that always returns the same result.
pub struct StaticRunner {
    result: Value,
}

impl StaticRunner {
    pub fn new(result: Value) -> Self {
        Self { result }
    }
}

#[async_trait]
impl ModelRunner for StaticRunner {
    async fn run(&self, _parameters: &Value) -> Result<Value> {
        Ok(self.result.clone())
    }
}

/// Runner that always fails with the given message.
pub struct FailingRunner {
    message: String,
}

impl FailingRunner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ModelRunner for FailingRunner {
    async fn run(&self, _parameters: &Value) -> Result<Value> {
        bail!("{}", self.message)
    }
}

/// Runner that sleeps before returning, for timeout and heartbeat tests.
pub struct SleepRunner {
    delay: Duration,
    result: Value,
}

impl SleepRunner {
    pub fn new(delay: Duration, result: Value) -> Self {
        Self { delay, result }
    }
}

#[async_trait]
impl ModelRunner for SleepRunner {
    async fn run(&self, _parameters: &Value) -> Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(self.result.clone())
    }
}

type RunHook =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Runner that delegates to a closure, for interleaving store writes with an
/// in-flight execution (lease theft, mid-run crashes).
pub struct HookRunner {
    hook: RunHook,
}

impl HookRunner {
    pub fn new<F, Fut>(hook: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            hook: Box::new(move |params| Box::pin(hook(params))),
        }
    }
}

#[async_trait]
impl ModelRunner for HookRunner {
    async fn run(&self, parameters: &Value) -> Result<Value> {
        (self.hook)(parameters.clone()).await
    }
}

/// Sink that keeps results in memory and hands out `mem://` references.
#[derive(Default)]
pub struct MemorySink {
    puts: Mutex<Vec<(Uuid, Value)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> Vec<(Uuid, Value)> {
        self.puts.lock().expect("sink mutex poisoned").clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn put(&self, run_id: Uuid, result: &Value) -> Result<String> {
        self.puts
            .lock()
            .expect("sink mutex poisoned")
            .push((run_id, result.clone()));
        Ok(format!("mem://{run_id}"))
    }
}

/// Sink whose every put fails.
pub struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    async fn put(&self, _run_id: Uuid, _result: &Value) -> Result<String> {
        bail!("sink unavailable")
    }
}
