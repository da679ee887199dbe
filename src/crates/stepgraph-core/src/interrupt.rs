//! Human-in-the-loop interrupts
//!
//! Execution can pause in three ways:
//!
//! - **Static, before a node**: compile with `interrupt_before`. The run stops
//!   before a superstep that would run one of the listed nodes. The stopping
//!   checkpoint's pending tasks are exactly that superstep, nothing of it has
//!   run yet.
//! - **Static, after a node**: compile with `interrupt_after`. The run stops
//!   once the superstep that ran the node has been committed.
//! - **Dynamic**: a node returns [`interrupt`]`(reason)`. Updates of the other
//!   tasks of that superstep are committed; the interrupted task stays pending
//!   and re-runs on resume. Successors of the tasks that finished are held
//!   back until it does.
//!
//! In every case the run returns a [`RunOutcome`](crate::RunOutcome) with
//! status `Interrupted`. Invoking the same thread again with `None` as input
//! continues; calling `update_state` first edits the state before continuing.
//! A resumed run does not stop again on a task it already paused on; a
//! breakpoint node that became pending through `update_state(.., as_node)`
//! still stops it before it runs. When a task pauses dynamically, the
//! `interrupt_after` breakpoints of the tasks that finished beside it are
//! recorded on the same checkpoint.
//!
//! When a node raises a dynamic interrupt and is also listed in
//! `interrupt_after`, only the dynamic interrupt is recorded.

use crate::error::GraphError;
use crate::graph::NodeId;

/// Static interrupt points of a compiled graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptConfig {
    pub interrupt_before: Vec<NodeId>,
    pub interrupt_after: Vec<NodeId>,
    pub interrupt_before_all: bool,
    pub interrupt_after_all: bool,
}

impl InterruptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_before = nodes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_after = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Pause before every superstep
    pub fn with_interrupt_before_all(mut self) -> Self {
        self.interrupt_before_all = true;
        self
    }

    /// Pause after every superstep
    pub fn with_interrupt_after_all(mut self) -> Self {
        self.interrupt_after_all = true;
        self
    }

    pub fn should_interrupt_before(&self, node: &str) -> bool {
        self.interrupt_before_all || self.interrupt_before.iter().any(|n| n == node)
    }

    pub fn should_interrupt_after(&self, node: &str) -> bool {
        self.interrupt_after_all || self.interrupt_after.iter().any(|n| n == node)
    }

    pub fn is_empty(&self) -> bool {
        self.interrupt_before.is_empty()
            && self.interrupt_after.is_empty()
            && !self.interrupt_before_all
            && !self.interrupt_after_all
    }

    /// Every node named by a static interrupt
    pub(crate) fn named_nodes(&self) -> impl Iterator<Item = &str> {
        self.interrupt_before
            .iter()
            .chain(self.interrupt_after.iter())
            .map(String::as_str)
    }
}

/// Pause the current node. Return it as the node's error:
///
/// ```rust
/// use stepgraph_core::interrupt::interrupt;
/// use stepgraph_core::StateGraph;
/// use stepgraph_core::StateSchema;
/// use serde_json::json;
///
/// let mut graph = StateGraph::new(StateSchema::new());
/// graph.add_node("step_2", |state| {
///     Box::pin(async move {
///         let input = state["input"].as_str().unwrap_or_default().to_string();
///         if input.len() > 5 {
///             return Err(interrupt(format!("Received input that is longer than 5 characters: {}", input)));
///         }
///         Ok(json!({}))
///     })
/// });
/// ```
pub fn interrupt(reason: impl Into<String>) -> GraphError {
    GraphError::interrupt(reason)
}
