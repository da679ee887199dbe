//! Run-scoped context handed to every node
//!
//! Besides its input, a node receives a [`NodeContext`]: the read-only run
//! configuration (thread id plus caller-defined keys such as a user id), the
//! long-term [`Store`] when the graph was compiled with one, and a
//! [`StreamWriter`] for streaming tokens or custom data.
//!
//! ```rust,no_run
//! use stepgraph_core::{StateGraph, StateSchema};
//! use serde_json::json;
//!
//! let mut graph = StateGraph::new(StateSchema::new());
//! graph.add_node_with_context("remember", |state, ctx| {
//!     Box::pin(async move {
//!         let user = ctx.get("user_id").and_then(|v| v.as_str()).unwrap_or("anonymous").to_string();
//!         let store = ctx.require_store()?;
//!         let namespace = vec![user, "memories".to_string()];
//!         store.put(&namespace, "last", state["input"].clone()).await?;
//!         ctx.writer().write(json!({"stored": true}));
//!         Ok(json!({}))
//!     })
//! });
//! ```

use crate::error::{GraphError, Result};
use crate::store::Store;
use crate::stream::{Emitter, StreamMode};
use serde_json::Value;
use stepgraph_checkpoint::CheckpointConfig;
use std::sync::Arc;

/// Writes `Messages` and `Custom` chunks on behalf of one node
#[derive(Clone, Default)]
pub struct StreamWriter {
    emitter: Emitter,
    node: String,
    step: i64,
}

impl StreamWriter {
    pub(crate) fn new(emitter: Emitter, node: impl Into<String>, step: i64) -> Self {
        Self {
            emitter,
            node: node.into(),
            step,
        }
    }

    /// Emit custom data; dropped unless `Custom` mode was requested
    pub fn write(&self, data: Value) {
        self.emitter
            .emit(StreamMode::Custom, Some(&self.node), self.step, || data);
    }

    /// Emit a model token or message chunk; dropped unless `Messages` mode was
    /// requested
    pub fn write_message(&self, chunk: Value) {
        self.emitter
            .emit(StreamMode::Messages, Some(&self.node), self.step, || chunk);
    }

    /// True when somebody consumes chunks of `mode`
    pub fn is_enabled(&self, mode: StreamMode) -> bool {
        self.emitter.wants(mode)
    }
}

/// Everything a node can see besides its input
#[derive(Clone)]
pub struct NodeContext {
    node: String,
    step: i64,
    config: Arc<CheckpointConfig>,
    store: Option<Arc<dyn Store>>,
    writer: StreamWriter,
}

impl NodeContext {
    /// Context for running a node outside the executor, e.g. in tests
    pub fn new(node: impl Into<String>, config: CheckpointConfig) -> Self {
        Self {
            node: node.into(),
            step: 0,
            config: Arc::new(config),
            store: None,
            writer: StreamWriter::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn for_task(
        node: &str,
        step: i64,
        config: Arc<CheckpointConfig>,
        store: Option<Arc<dyn Store>>,
        emitter: Emitter,
    ) -> Self {
        Self {
            node: node.to_string(),
            step,
            config,
            store,
            writer: StreamWriter::new(emitter, node, step),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub(crate) fn config_arc(&self) -> Arc<CheckpointConfig> {
        self.config.clone()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.config.thread_id.as_deref()
    }

    /// Caller-defined configuration value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    pub fn require_store(&self) -> Result<&Arc<dyn Store>> {
        self.store.as_ref().ok_or_else(|| {
            GraphError::Configuration(format!(
                "node '{}' needs a store but the graph was compiled without one",
                self.node
            ))
        })
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_context_reads_config() {
        let config = CheckpointConfig::for_thread("t-1").with_extra("user_id", json!("u-7"));
        let ctx = NodeContext::new("agent", config);

        assert_eq!(ctx.node(), "agent");
        assert_eq!(ctx.thread_id(), Some("t-1"));
        assert_eq!(ctx.get("user_id"), Some(&json!("u-7")));
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn test_require_store() {
        let ctx = NodeContext::new("agent", CheckpointConfig::new());
        assert!(matches!(ctx.require_store(), Err(GraphError::Configuration(_))));

        let ctx = ctx.with_store(Arc::new(InMemoryStore::new()));
        assert!(ctx.require_store().is_ok());
    }

    #[test]
    fn test_default_writer_drops_chunks() {
        let ctx = NodeContext::new("agent", CheckpointConfig::new());
        assert!(!ctx.writer().is_enabled(StreamMode::Custom));
        ctx.writer().write(json!({"ignored": true}));
    }
}
