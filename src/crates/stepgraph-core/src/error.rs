//! Error types for graph construction and execution
//!
//! Every fallible operation in this crate returns [`Result`], an alias over
//! [`GraphError`]. Errors from the building blocks (reducers, the checkpoint
//! saver, the store, tools) convert into `GraphError` through `#[from]`, so `?`
//! works across layers.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation         - malformed graph, bad input shape
//! ├── InvalidUpdate      - concurrent writes to a non-associative field
//! ├── State              - reducer failure
//! ├── NodeFailed         - a node (or its router) returned an error
//! ├── NodeInterrupt      - a node asked to pause (reported as an outcome)
//! ├── RecursionLimit     - too many supersteps in one invocation
//! ├── ThreadBusy         - multitask conflict under the reject strategy
//! ├── RunRolledBack      - the run was discarded by a rollback
//! ├── Checkpoint         - persistence errors
//! ├── Store              - long-term store errors
//! ├── Tool               - tool lookup or execution errors
//! ├── Serialization/Yaml - JSON/YAML errors
//! ├── Io                 - file access (settings)
//! ├── Configuration      - missing checkpointer, thread id, ...
//! └── Custom             - application-defined errors
//! ```
//!
//! # Interrupts are not failures
//!
//! A node pauses execution by returning [`GraphError::interrupt`]. The
//! executor never surfaces that value to the caller as an error: the run ends
//! with [`RunStatus::Interrupted`](crate::RunStatus) and the reason is
//! available on the returned [`RunOutcome`](crate::RunOutcome).
//!
//! ```rust
//! use stepgraph_core::error::GraphError;
//! use serde_json::json;
//!
//! fn review(state: &serde_json::Value) -> Result<serde_json::Value, GraphError> {
//!     let text = state["input"].as_str().unwrap_or_default();
//!     if text.len() > 5 {
//!         return Err(GraphError::interrupt(format!("input longer than 5 characters: {}", text)));
//!     }
//!     Ok(json!({}))
//! }
//!
//! assert!(review(&json!({"input": "hello world"})).unwrap_err().is_interrupt());
//! ```
//!
//! # Node failures keep their cause
//!
//! ```rust
//! use stepgraph_core::error::GraphError;
//!
//! let err = GraphError::node_failed("llm", GraphError::Custom("rate limited".into()));
//! match &err {
//!     GraphError::NodeFailed { node, source } => {
//!         assert_eq!(node, "llm");
//!         assert_eq!(source.to_string(), "rate limited");
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use crate::state::StateError;
use crate::store::StoreError;
use crate::tool::ToolError;
use stepgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

/// Error type for all graph operations
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure or input shape is invalid
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// More than one task wrote a field whose reducer cannot combine writes
    #[error("Invalid update: field '{field}' written by {writers:?} in one step, but its reducer is not associative")]
    InvalidUpdate { field: String, writers: Vec<String> },

    /// A reducer rejected an update
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// A node, or the router attached to it, failed
    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<GraphError>,
    },

    /// A node requested a pause. `node` is filled in by the executor.
    #[error("Node '{node}' interrupted: {reason}")]
    NodeInterrupt { node: String, reason: String },

    #[error("Recursion limit of {limit} supersteps reached without hitting a stop condition")]
    RecursionLimit { limit: usize },

    /// A run is already active or queued on the thread
    #[error("Thread '{thread_id}' is busy")]
    ThreadBusy { thread_id: String },

    /// The run was cancelled and its checkpoints deleted
    #[error("Run '{run_id}' was rolled back")]
    RunRolledBack { run_id: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Wrap an error raised while running `node`
    pub fn node_failed(node: impl Into<String>, source: GraphError) -> Self {
        Self::NodeFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Pause signal returned from inside a node
    pub fn interrupt(reason: impl Into<String>) -> Self {
        Self::NodeInterrupt {
            node: String::new(),
            reason: reason.into(),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::NodeInterrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_failed_keeps_source() {
        let err = GraphError::node_failed("fetch", GraphError::custom("timeout"));
        assert_eq!(err.to_string(), "Node 'fetch' failed: timeout");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "timeout");
    }

    #[test]
    fn test_interrupt_is_flagged() {
        let err = GraphError::interrupt("needs approval");
        assert!(err.is_interrupt());
        assert!(!GraphError::custom("boom").is_interrupt());
    }

    #[test]
    fn test_checkpoint_error_converts() {
        let err: GraphError = CheckpointError::NotFound("cp-1".to_string()).into();
        assert!(matches!(err, GraphError::Checkpoint(_)));
    }
}
