//! Execution context: what computable and callback payloads see during a run.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use cronvault_core::CronvaultError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::tasks::{Catalog, CommandSpec};

/// A self-contained unit of work that can be scheduled as a payload.
#[async_trait]
pub trait Computable: Send + Sync {
    /// Name shown in the catalog label and logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Run once. Errors are forwarded to the scheduler error queue.
    async fn compute(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()>;
}

static STATICS: LazyLock<SharedMap> = LazyLock::new(SharedMap::new);
static GLOBALS: LazyLock<SharedMap> = LazyLock::new(SharedMap::new);

/// Concurrent key/value map shared by every job run.
///
/// Backed by a `DashMap`, so payloads can read and write it from any number
/// of concurrent runs without extra coordination.
#[derive(Clone, Default)]
pub struct SharedMap {
    inner: Arc<DashMap<String, Value>>,
}

impl SharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide map shared by all stores of this process.
    pub fn statics() -> Self {
        STATICS.clone()
    }

    /// Global map for data meant to outlive a single store.
    pub fn globals() -> Self {
        GLOBALS.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).map(|v| v.value().clone())
    }

    /// Insert a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Return the current value, inserting `init()` first when absent.
    pub fn compute_if_absent<F>(&self, key: impl Into<String>, init: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        self.inner.entry(key.into()).or_insert_with(init).value().clone()
    }

    /// Atomically replace a value with `f(current)` and return the new value.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        match self.inner.entry(key.into()) {
            Entry::Occupied(mut slot) => {
                let next = f(Some(slot.get()));
                slot.insert(next.clone());
                next
            }
            Entry::Vacant(slot) => {
                let next = f(None);
                slot.insert(next.clone());
                next
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Sending side of the error and warning queues.
///
/// Every report is also logged, so nothing is lost when no consumer drains
/// the queues.
#[derive(Clone, Default)]
pub struct Reporter {
    errors: Option<UnboundedSender<CronvaultError>>,
    warnings: Option<UnboundedSender<String>>,
}

impl Reporter {
    pub fn new(errors: UnboundedSender<CronvaultError>, warnings: UnboundedSender<String>) -> Self {
        Self {
            errors: Some(errors),
            warnings: Some(warnings),
        }
    }

    /// A reporter that only logs.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn error(&self, err: CronvaultError) {
        tracing::warn!("❌ {err}");
        if let Some(tx) = &self.errors {
            let _ = tx.send(err);
        }
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("📣 {message}");
        if let Some(tx) = &self.warnings {
            let _ = tx.send(message);
        }
    }
}

/// Per-run bundle passed to computable and callback payloads.
pub struct ExecutionContext {
    /// Id of the running command.
    pub id: String,
    /// Snapshot of every known ref (cache first, then catalog) and the sync flag.
    pub catalog: Arc<Catalog>,
    /// The command being run.
    pub command: CommandSpec,
    /// Run number of this execution, starting at 1.
    pub run: u32,
    /// Private state of this execution, kept across its runs.
    pub context: HashMap<String, Value>,
    /// Process-wide shared map.
    pub statics: SharedMap,
    /// Global shared map.
    pub globals: SharedMap,
    reporter: Reporter,
}

impl ExecutionContext {
    pub fn new(
        id: String,
        catalog: Arc<Catalog>,
        command: CommandSpec,
        run: u32,
        context: HashMap<String, Value>,
        reporter: Reporter,
    ) -> Self {
        Self {
            id,
            catalog,
            command,
            run,
            context,
            statics: SharedMap::statics(),
            globals: SharedMap::globals(),
            reporter,
        }
    }

    /// Send a message on the warning queue.
    pub fn warn(&self, message: impl Into<String>) {
        self.reporter.warn(message);
    }

    /// Send an error on the error queue.
    pub fn error(&self, message: impl Into<String>) {
        self.reporter.error(CronvaultError::Payload(message.into()));
    }

    /// Hand the private map back once the run is over.
    pub fn into_context(self) -> HashMap<String, Value> {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shared_map_ops() {
        let map = SharedMap::new();
        assert!(map.is_empty());
        assert_eq!(map.set("a", json!(1)), None);
        assert_eq!(map.set("a", json!(2)), Some(json!(1)));
        assert_eq!(map.get("a"), Some(json!(2)));
        assert_eq!(map.compute_if_absent("a", || json!(99)), json!(2));
        assert_eq!(map.compute_if_absent("b", || json!("new")), json!("new"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.remove("b"), Some(json!("new")));
        assert_eq!(map.get("b"), None);
    }

    #[test]
    fn test_shared_map_update_counts() {
        let map = SharedMap::new();
        for _ in 0..3 {
            map.update("hits", |v| json!(v.and_then(Value::as_u64).unwrap_or(0) + 1));
        }
        assert_eq!(map.get("hits"), Some(json!(3)));
    }

    #[test]
    fn test_statics_are_process_wide() {
        SharedMap::statics().set("context-test-key", json!(true));
        assert_eq!(SharedMap::statics().get("context-test-key"), Some(json!(true)));
        SharedMap::statics().remove("context-test-key");
    }

    #[tokio::test]
    async fn test_reporter_delivers_and_detached_drops() {
        let (etx, mut erx) = tokio::sync::mpsc::unbounded_channel();
        let (wtx, mut wrx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = Reporter::new(etx, wtx);
        reporter.warn("done");
        reporter.error(CronvaultError::Payload("boom".into()));
        assert_eq!(wrx.recv().await.as_deref(), Some("done"));
        assert!(matches!(erx.recv().await, Some(CronvaultError::Payload(_))));

        drop(reporter);
        assert!(wrx.recv().await.is_none());

        Reporter::detached().warn("nobody listens");
    }
}
