//! Router results and map-reduce `Send` tasks
//!
//! A conditional edge calls a router with the state committed by the
//! superstep that just ran. The router answers with a
//! [`ConditionalEdgeResult`]: one node, several nodes, [`END`](crate::END), or
//! a list of [`Send`]s.
//!
//! A `Send` schedules its target node with a *private* input instead of the
//! shared state. Routing one `Send` per item of a list is how a graph fans
//! out over data it only discovers at run time (map), and an `Append` field
//! collects the results (reduce):
//!
//! ```rust
//! use stepgraph_core::send::{ConditionalEdgeResult, Send};
//! use serde_json::{json, Value};
//!
//! fn continue_to_jokes(state: &Value) -> ConditionalEdgeResult {
//!     let subjects = state["subjects"].as_array().cloned().unwrap_or_default();
//!     subjects
//!         .into_iter()
//!         .map(|subject| Send::new("generate_joke", json!({"subject": subject})))
//!         .collect::<Vec<_>>()
//!         .into()
//! }
//!
//! let result = continue_to_jokes(&json!({"subjects": ["cats", "dogs"]}));
//! assert!(matches!(result, ConditionalEdgeResult::Sends(ref sends) if sends.len() == 2));
//! ```

use crate::graph::{NodeId, END};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run `node` in the next superstep with `arg` as its input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Send {
    node: NodeId,
    arg: Value,
}

impl Send {
    pub fn new(node: impl Into<NodeId>, arg: Value) -> Self {
        Self {
            node: node.into(),
            arg,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn arg(&self) -> &Value {
        &self.arg
    }

    pub fn into_parts(self) -> (NodeId, Value) {
        (self.node, self.arg)
    }
}

/// What a router decided
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalEdgeResult {
    /// A single destination, possibly [`END`]
    Node(NodeId),
    /// Several destinations, all run in the next superstep
    Nodes(Vec<NodeId>),
    /// Map-reduce tasks with private inputs
    Sends(Vec<Send>),
}

impl ConditionalEdgeResult {
    pub fn end() -> Self {
        Self::Node(END.to_string())
    }
}

impl From<&str> for ConditionalEdgeResult {
    fn from(node: &str) -> Self {
        Self::Node(node.to_string())
    }
}

impl From<String> for ConditionalEdgeResult {
    fn from(node: String) -> Self {
        Self::Node(node)
    }
}

impl From<Vec<String>> for ConditionalEdgeResult {
    fn from(nodes: Vec<String>) -> Self {
        Self::Nodes(nodes)
    }
}

impl From<Vec<&str>> for ConditionalEdgeResult {
    fn from(nodes: Vec<&str>) -> Self {
        Self::Nodes(nodes.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<Send>> for ConditionalEdgeResult {
    fn from(sends: Vec<Send>) -> Self {
        Self::Sends(sends)
    }
}

impl From<Send> for ConditionalEdgeResult {
    fn from(send: Send) -> Self {
        Self::Sends(vec![send])
    }
}
