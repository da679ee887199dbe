//! Compiled graphs used as nodes
//!
//! [`StateGraph::add_subgraph`](crate::StateGraph::add_subgraph) embeds a
//! compiled graph as a single node of a parent graph:
//!
//! ```text
//! Parent state ──(child input keys)──► child graph ──(child output keys)──► update
//! ```
//!
//! - The child receives the parent's input for the node, reduced to the
//!   child schema's input keys when it declares any.
//! - The child runs to completion in one parent superstep, without a
//!   checkpointer of its own. It shares the parent's store and sees the
//!   caller-defined keys of the parent's run config, but no thread id.
//! - The child's final state, reduced to its output keys, becomes the node's
//!   update and is folded with the *parent's* reducers. Declare output keys
//!   when parent and child share an append field, or the parent sees the
//!   child's copy of the list appended again.
//! - An interrupt inside the child pauses the parent node. On resume the
//!   child runs again from its start. For that reason a child compiled with
//!   static breakpoints is rejected when the parent compiles.

use crate::compiled::CompiledGraph;
use crate::error::GraphError;
use crate::graph::NodeFuture;
use crate::pregel::RunContext;
use crate::runtime::NodeContext;
use serde_json::Value;
use std::sync::Arc;
use stepgraph_checkpoint::CheckpointConfig;

/// Run `graph` as the node described by `ctx`
pub(crate) fn run_subgraph(graph: Arc<CompiledGraph>, input: Value, ctx: NodeContext) -> NodeFuture {
    Box::pin(async move {
        let child = graph.detached(ctx.store().cloned());
        let input = child.schema.filter_input(&input);

        let mut config = CheckpointConfig::new();
        config.extra = ctx.config().extra.clone();

        tracing::debug!(node = ctx.node(), "entering subgraph");
        let outcome = child.run_with(Some(input), &config, RunContext::new()).await?;

        if outcome.is_interrupted() {
            let reason = outcome
                .interrupts
                .iter()
                .map(|interrupt| {
                    if interrupt.reason.is_empty() {
                        format!("{:?} {}", interrupt.when, interrupt.node).to_lowercase()
                    } else {
                        interrupt.reason.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GraphError::interrupt(format!("subgraph interrupted: {}", reason)));
        }

        Ok(outcome.values)
    })
}
