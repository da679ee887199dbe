//! StateGraph builder API
//!
//! [`StateGraph`] is the way graphs are built: declare the state schema,
//! register nodes, wire edges, then `compile` into an immutable
//! [`CompiledGraph`].
//!
//! ```text
//! StateSchema ──► StateGraph ──(add_node / add_edge / ...)──► compile()
//!                                                               │
//!                         CompileOptions (checkpointer, store,  │
//!                         interrupts, settings) ────────────────┤
//!                                                               ▼
//!                                                        CompiledGraph
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use stepgraph_core::{StateGraph, StateSchema, Reducer, START, END};
//! use serde_json::json;
//!
//! # async fn example() -> stepgraph_core::Result<()> {
//! let schema = StateSchema::new().field("state", Reducer::Append);
//! let mut graph = StateGraph::new(schema);
//!
//! for label in ["a", "b", "c", "d"] {
//!     graph.add_node(label, move |_state| {
//!         Box::pin(async move { Ok(json!({"state": [label]})) })
//!     });
//! }
//! graph
//!     .add_edge(START, "a")
//!     .add_edge("a", "b")
//!     .add_edge("a", "c")
//!     .add_edge("b", "d")
//!     .add_edge("c", "d")
//!     .add_edge("d", END);
//!
//! let app = graph.compile()?;
//! let outcome = app.invoke(json!({"state": []})).await?;
//! let labels = outcome.values["state"].as_array().unwrap();
//! assert_eq!(labels.len(), 4);
//! assert_eq!(labels[0], "a");
//! assert_eq!(labels[3], "d");
//! # Ok(())
//! # }
//! ```
//!
//! # Caller risks
//!
//! `compile` checks structure only. A node nothing routes to is accepted, and
//! so is a cycle whose router never answers `END`. The second one runs until
//! the recursion limit stops it.

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Branch, Graph, NodeFuture, NodeId, NodeKind, NodeSpec, END, START};
use crate::interrupt::InterruptConfig;
use crate::runtime::NodeContext;
use crate::send::ConditionalEdgeResult;
use crate::settings::EngineSettings;
use crate::state::StateSchema;
use crate::store::Store;
use crate::tool::ToolNode;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use stepgraph_checkpoint::CheckpointSaver;

/// Everything `compile_with` can attach to a graph
#[derive(Clone, Default)]
pub struct CompileOptions {
    pub checkpointer: Option<Arc<dyn CheckpointSaver>>,
    pub store: Option<Arc<dyn Store>>,
    pub interrupts: InterruptConfig,
    pub settings: EngineSettings,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupts = self.interrupts.with_interrupt_before(nodes);
        self
    }

    pub fn with_interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupts = self.interrupts.with_interrupt_after(nodes);
        self
    }

    pub fn with_interrupts(mut self, interrupts: InterruptConfig) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Builder for state graphs
pub struct StateGraph {
    schema: StateSchema,
    graph: Graph,
}

impl StateGraph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            graph: Graph::new(),
        }
    }

    /// Graph whose state is a `messages` log
    pub fn with_messages() -> Self {
        Self::new(StateSchema::messages())
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Add a node that only needs its input.
    ///
    /// The node receives the state committed before the current superstep
    /// (or its private `Send` input) and returns a partial update. Returning
    /// `null` means "no update".
    pub fn add_node<F>(&mut self, name: impl Into<NodeId>, node: F) -> &mut Self
    where
        F: Fn(Value) -> NodeFuture + Send + Sync + 'static,
    {
        self.graph
            .add_node(NodeSpec::from_fn(name, move |input, _ctx| node(input)));
        self
    }

    /// Add a node that also reads the run context (config, store, stream
    /// writer)
    pub fn add_node_with_context<F>(&mut self, name: impl Into<NodeId>, node: F) -> &mut Self
    where
        F: Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.graph.add_node(NodeSpec::from_fn(name, node));
        self
    }

    pub fn add_node_with_spec(&mut self, spec: NodeSpec) -> &mut Self {
        self.graph.add_node(spec);
        self
    }

    /// Use a compiled graph as a node. It runs without a checkpointer of its
    /// own and shares the parent's store.
    ///
    /// A subgraph re-runs from its start whenever the parent resumes the
    /// node, so it may only pause through [`interrupt`](crate::interrupt::interrupt).
    /// Compiling the parent fails when the subgraph has `interrupt_before` or
    /// `interrupt_after` breakpoints.
    pub fn add_subgraph(&mut self, name: impl Into<NodeId>, subgraph: CompiledGraph) -> &mut Self {
        self.graph
            .add_node(NodeSpec::new(name, NodeKind::Subgraph(Arc::new(subgraph))));
        self
    }

    pub fn add_tool_node(&mut self, name: impl Into<NodeId>, tools: ToolNode) -> &mut Self {
        self.graph
            .add_node(NodeSpec::new(name, NodeKind::Tools(Arc::new(tools))));
        self
    }

    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.graph.add_edge(from, to);
        self
    }

    /// Fan-in: `target` runs once every node of `sources` has completed
    pub fn add_join_edge<I, S>(&mut self, sources: I, target: impl Into<NodeId>) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let sources: BTreeSet<NodeId> = sources.into_iter().map(Into::into).collect();
        self.graph.add_join(sources, target);
        self
    }

    /// Route from `from` with `router`. With a `path_map`, the router answers
    /// with keys of the map instead of node names.
    pub fn add_conditional_edges<F>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        path_map: Option<HashMap<String, NodeId>>,
    ) -> &mut Self
    where
        F: Fn(&Value) -> Result<ConditionalEdgeResult> + Send + Sync + 'static,
    {
        self.graph
            .add_branch(from, Branch::new(Arc::new(router), path_map));
        self
    }

    /// Shorthand for `add_edge(START, node)`
    pub fn set_entry_point(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(START, node)
    }

    /// Shorthand for `add_edge(node, END)`
    pub fn set_finish_point(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(node, END)
    }

    pub fn compile(self) -> Result<CompiledGraph> {
        self.compile_with(CompileOptions::default())
    }

    pub fn compile_with(self, options: CompileOptions) -> Result<CompiledGraph> {
        self.graph.validate()?;
        options.settings.validate()?;

        if let Some(unknown) = options
            .interrupts
            .named_nodes()
            .find(|node| !self.graph.has_node(node))
        {
            return Err(GraphError::Validation(format!(
                "interrupt target '{}' is not a node of this graph",
                unknown
            )));
        }

        // Subgraphs restart on every resume, so a static breakpoint inside
        // one could never be passed
        if let Some(name) = self.graph.nodes.values().find_map(|spec| match &spec.kind {
            NodeKind::Subgraph(child) if !child.interrupts.is_empty() => Some(spec.name.clone()),
            _ => None,
        }) {
            return Err(GraphError::Validation(format!(
                "subgraph '{}' has static interrupts; pause it with a dynamic interrupt instead",
                name
            )));
        }

        tracing::debug!(
            nodes = self.graph.nodes.len(),
            checkpointer = options.checkpointer.is_some(),
            store = options.store.is_some(),
            "compiled graph"
        );

        Ok(CompiledGraph::new(self.graph, self.schema, options))
    }
}
