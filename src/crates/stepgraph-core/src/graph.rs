//! Graph structure: nodes, edges and join barriers
//!
//! [`Graph`] is the validated topology behind a
//! [`StateGraph`](crate::StateGraph). It is built incrementally by the builder
//! and frozen into a [`CompiledGraph`](crate::CompiledGraph) by `compile`.
//!
//! ```text
//!            START
//!              │
//!              ▼
//!          ┌───────┐
//!          │   a   │
//!          └───┬───┘
//!       ┌──────┴──────┐        Direct edges a → b, a → c
//!       ▼             ▼
//!   ┌───────┐     ┌───────┐
//!   │   b   │     │   c   │
//!   └───┬───┘     └───┬───┘
//!       └──────┬──────┘        Join edge [b, c] → d
//!              ▼
//!          ┌───────┐
//!          │   d   │──(router)──► END | a
//!          └───────┘             Conditional edge
//! ```
//!
//! Nodes are a closed set of kinds ([`NodeKind`]): a user function, a compiled
//! sub-graph or a tool executor. The executor dispatches on the kind.
//!
//! Edges come in three flavours:
//!
//! - [`Edge::Direct`]: the target runs in the superstep after the source.
//! - [`Edge::Conditional`]: a [`Branch`] router picks the targets from the
//!   state committed after the source ran.
//! - [`JoinEdge`]: the target runs once every listed source has completed,
//!   even when the sources finish in different supersteps.
//!
//! Validation rejects dangling endpoints, a missing entry edge, more than one
//! router per source and duplicate or reserved node names. It does not reject
//! unreachable nodes or cycles that never reach [`END`]; those are bounded at
//! run time by the recursion limit.

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::runtime::NodeContext;
use crate::send::ConditionalEdgeResult;
use crate::tool::ToolNode;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Node identifier, unique within a graph
pub type NodeId = String;

/// Virtual entry node
pub const START: &str = "__start__";

/// Virtual terminal node
pub const END: &str = "__end__";

/// Future returned by a node
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Node function: `(input, context) -> partial update`
pub type NodeFn = Arc<dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync>;

/// Router of a conditional edge
pub type RouterFn = Arc<dyn Fn(&Value) -> Result<ConditionalEdgeResult> + Send + Sync>;

/// The handler behind a node
#[derive(Clone)]
pub enum NodeKind {
    /// Plain async function
    Function(NodeFn),
    /// A compiled graph run as one node
    Subgraph(Arc<CompiledGraph>),
    /// Executes the tool calls of the last message
    Tools(Arc<ToolNode>),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Function(_) => "function",
            NodeKind::Subgraph(_) => "subgraph",
            NodeKind::Tools(_) => "tools",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A node registered in the graph
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub name: NodeId,
    pub kind: NodeKind,

    /// Fields the node reads (informative)
    pub reads: Vec<String>,

    /// Fields the node writes (informative)
    pub writes: Vec<String>,
}

impl NodeSpec {
    pub fn new(name: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn from_fn<F>(name: impl Into<NodeId>, f: F) -> Self
    where
        F: Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        Self::new(name, NodeKind::Function(Arc::new(f)))
    }

    pub fn with_reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_writes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Run the node on `input`
    pub async fn run(&self, input: Value, ctx: NodeContext) -> Result<Value> {
        match &self.kind {
            NodeKind::Function(f) => f(input, ctx).await,
            NodeKind::Subgraph(graph) => crate::subgraph::run_subgraph(graph.clone(), input, ctx).await,
            NodeKind::Tools(tools) => tools.invoke(&input, Some(&ctx)).await,
        }
    }
}

/// A destination chosen by a router
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Run the node on the shared state
    Node(NodeId),
    /// Run the node on a private input
    Send(NodeId, Value),
}

impl Route {
    pub fn node(&self) -> &str {
        match self {
            Route::Node(node) | Route::Send(node, _) => node,
        }
    }
}

/// Router plus optional mapping from router answers to node names
#[derive(Clone)]
pub struct Branch {
    router: RouterFn,
    path_map: Option<HashMap<String, NodeId>>,
}

impl Branch {
    pub fn new(router: RouterFn, path_map: Option<HashMap<String, NodeId>>) -> Self {
        Self { router, path_map }
    }

    pub fn path_map(&self) -> Option<&HashMap<String, NodeId>> {
        self.path_map.as_ref()
    }

    /// Evaluate the router against `state`. `Send` targets bypass the path
    /// map; every other answer must be a key of it when one is set.
    pub fn route(&self, state: &Value) -> Result<Vec<Route>> {
        let routes = match (self.router)(state)? {
            ConditionalEdgeResult::Node(key) => vec![Route::Node(self.resolve(&key)?)],
            ConditionalEdgeResult::Nodes(keys) => keys
                .iter()
                .map(|key| self.resolve(key).map(Route::Node))
                .collect::<Result<_>>()?,
            ConditionalEdgeResult::Sends(sends) => sends
                .into_iter()
                .map(|send| {
                    let (node, arg) = send.into_parts();
                    Route::Send(node, arg)
                })
                .collect(),
        };
        Ok(routes)
    }

    fn resolve(&self, key: &str) -> Result<NodeId> {
        match &self.path_map {
            None => Ok(key.to_string()),
            Some(map) => map.get(key).cloned().ok_or_else(|| {
                GraphError::Validation(format!("router returned '{}', which is not in its path map", key))
            }),
        }
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("router", &"<function>")
            .field("path_map", &self.path_map)
            .finish()
    }
}

/// Outgoing edge of a node
#[derive(Clone, Debug)]
pub enum Edge {
    Direct(NodeId),
    Conditional(Branch),
}

/// Fan-in edge: `target` runs once every source has completed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinEdge {
    pub sources: BTreeSet<NodeId>,
    pub target: NodeId,
}

#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub nodes: HashMap<NodeId, NodeSpec>,

    /// Registration order of `nodes`
    pub order: Vec<NodeId>,

    /// Outgoing edges per source, in registration order
    pub edges: HashMap<NodeId, Vec<Edge>>,

    pub joins: Vec<JoinEdge>,

    /// Problems found while building, reported by `validate`
    errors: Vec<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, spec: NodeSpec) {
        let name = spec.name.clone();
        if name == START || name == END {
            self.errors.push(format!("node name '{}' is reserved", name));
            return;
        }
        if self.nodes.contains_key(&name) {
            self.errors.push(format!("node '{}' is already present", name));
            return;
        }
        self.order.push(name.clone());
        self.nodes.insert(name, spec);
    }

    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
    }

    pub fn add_branch(&mut self, from: impl Into<NodeId>, branch: Branch) {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::Conditional(branch));
    }

    pub fn add_join(&mut self, sources: BTreeSet<NodeId>, target: impl Into<NodeId>) {
        self.joins.push(JoinEdge {
            sources,
            target: target.into(),
        });
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    pub fn outgoing(&self, name: &str) -> &[Edge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Joins listing `name` as a source
    pub fn joins_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a JoinEdge> + 'a {
        self.joins.iter().filter(move |join| join.sources.contains(name))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(problem) = self.errors.first() {
            return Err(GraphError::Validation(problem.clone()));
        }

        if self.outgoing(START).is_empty() {
            return Err(GraphError::Validation(
                "graph has no entry point: add an edge from START".to_string(),
            ));
        }

        let is_target = |name: &str| name == END || self.has_node(name);

        for (from, edges) in &self.edges {
            if from == END {
                return Err(GraphError::Validation("END cannot have outgoing edges".to_string()));
            }
            if from != START && !self.has_node(from) {
                return Err(GraphError::Validation(format!("edge source '{}' does not exist", from)));
            }

            let mut branches = 0;
            for edge in edges {
                match edge {
                    Edge::Direct(to) => {
                        if !is_target(to) {
                            return Err(GraphError::Validation(format!(
                                "edge target '{}' (from '{}') does not exist",
                                to, from
                            )));
                        }
                    }
                    Edge::Conditional(branch) => {
                        branches += 1;
                        for to in branch.path_map().into_iter().flat_map(HashMap::values) {
                            if !is_target(to) {
                                return Err(GraphError::Validation(format!(
                                    "branch target '{}' (from '{}') does not exist",
                                    to, from
                                )));
                            }
                        }
                    }
                }
            }
            if branches > 1 {
                return Err(GraphError::Validation(format!(
                    "node '{}' has {} conditional edges; combine them into one router",
                    from, branches
                )));
            }
        }

        for join in &self.joins {
            if join.sources.is_empty() {
                return Err(GraphError::Validation(format!(
                    "join into '{}' has no sources",
                    join.target
                )));
            }
            if let Some(missing) = join.sources.iter().find(|source| !self.has_node(source)) {
                return Err(GraphError::Validation(format!(
                    "join source '{}' does not exist",
                    missing
                )));
            }
            if !is_target(&join.target) {
                return Err(GraphError::Validation(format!(
                    "join target '{}' does not exist",
                    join.target
                )));
            }
        }

        Ok(())
    }
}
