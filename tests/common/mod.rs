//! Shared test utilities: hand-settled sources and polling helpers.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use conveyor::{BoxFuture, PropMap};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

/// Generous upper bound for polling; only ever reached by failing tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Installs the env-filter subscriber once, so `RUST_LOG` works in tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One recorded invocation of a controlled source.
struct Call {
    args: Value,
    settle: Option<oneshot::Sender<anyhow::Result<Value>>>,
}

/// A source whose invocations are recorded and settled by hand, so tests
/// decide exactly when and in which order operations complete.
///
/// Arguments are captured synchronously at dispatch; the returned future stays
/// pending until [`resolve`](Self::resolve) or [`reject`](Self::reject).
#[derive(Clone, Default)]
pub struct Controlled {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Controlled {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher backed by this recorder.
    pub fn fetcher(
        &self,
    ) -> impl Fn(Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync + 'static {
        let calls = self.calls.clone();
        move |args| {
            let (settle, settled) = oneshot::channel();
            calls.lock().push(Call { args, settle: Some(settle) });
            Box::pin(async move {
                match settled.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(anyhow::anyhow!("controlled call dropped unsettled")),
                }
            })
        }
    }

    /// A mutator backed by this recorder; the argument list is recorded as a
    /// single array value.
    pub fn mutator(
        &self,
    ) -> impl Fn(Vec<Value>) -> BoxFuture<anyhow::Result<Value>> + Send + Sync + 'static {
        let calls = self.calls.clone();
        move |args| {
            let (settle, settled) = oneshot::channel();
            calls.lock().push(Call {
                args: Value::Array(args),
                settle: Some(settle),
            });
            Box::pin(async move {
                match settled.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(anyhow::anyhow!("controlled call dropped unsettled")),
                }
            })
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Arguments the n-th call was made with.
    pub fn args(&self, call: usize) -> Value {
        self.calls.lock()[call].args.clone()
    }

    /// Resolves the n-th call with `value`.
    pub fn resolve(&self, call: usize, value: Value) {
        self.settle(call, Ok(value));
    }

    /// Rejects the n-th call with an error carrying `message`.
    pub fn reject(&self, call: usize, message: &str) {
        self.settle(call, Err(anyhow::anyhow!("{message}")));
    }

    fn settle(&self, call: usize, outcome: anyhow::Result<Value>) {
        let settle = self.calls.lock()[call]
            .settle
            .take()
            .expect("call settled twice");
        settle.send(outcome).expect("controlled future dropped");
    }
}

/// A `PropMap` out of key-value pairs.
pub fn inputs(pairs: &[(&str, Value)]) -> PropMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

/// Flattens an optional name list for compact assertions.
pub fn names(list: Option<&[String]>) -> Vec<&str> {
    list.map(|names| names.iter().map(String::as_str).collect())
        .unwrap_or_default()
}

/// Polls until `condition` holds, up to the timeout.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
