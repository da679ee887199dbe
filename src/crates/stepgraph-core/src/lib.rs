//! # stepgraph-core - Checkpointed State-Machine Graphs
//!
//! `stepgraph-core` runs graphs of async nodes over a shared JSON state, in
//! Pregel-style supersteps, and persists the state after every superstep so
//! a thread can be paused, inspected, edited, resumed, replayed or forked.
//!
//! ## Core Concepts
//!
//! ### 1. State and reducers
//!
//! The state is a JSON object. A [`StateSchema`] names a [`Reducer`] per
//! field; nodes return *partial* updates which are folded in with those
//! reducers. A field a node does not return keeps its value.
//!
//! ### 2. Graphs
//!
//! [`StateGraph`] collects nodes, direct edges, conditional edges (routers)
//! and join edges, and compiles them into an immutable [`CompiledGraph`].
//! Routers may return [`Send`] tasks to fan out over a list (map-reduce).
//!
//! ### 3. Supersteps
//!
//! Every superstep runs all pending tasks concurrently against the state
//! committed before the step. Their updates are applied together, atomically,
//! and the next tasks are planned from the completed nodes' edges.
//!
//! ### 4. Checkpoints, interrupts and time travel
//!
//! With a [`CheckpointSaver`](stepgraph_checkpoint::CheckpointSaver) each
//! superstep produces a checkpoint on the run's thread. Static breakpoints
//! (`interrupt_before` / `interrupt_after`) and dynamic ones
//! ([`interrupt::interrupt`]) stop the run with status
//! [`RunStatus::Interrupted`]; invoking again with no input resumes it.
//! [`CompiledGraph::get_state_history`] lists past checkpoints and
//! [`CompiledGraph::update_state`] edits or forks them.
//!
//! ### 5. Threads and double-texting
//!
//! [`RunManager`] executes one run at a time per thread and applies a
//! [`MultitaskStrategy`] to runs submitted while the thread is busy.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use stepgraph_core::{CompileOptions, Reducer, StateGraph, StateSchema, END, START};
//! use stepgraph_checkpoint::{CheckpointConfig, InMemoryCheckpointSaver};
//! use serde_json::json;
//!
//! # async fn example() -> stepgraph_core::Result<()> {
//! let schema = StateSchema::new().field("steps", Reducer::Append);
//! let mut graph = StateGraph::new(schema);
//! graph.add_node("draft", |_| Box::pin(async { Ok(json!({"steps": ["draft"]})) }));
//! graph.add_node("publish", |_| Box::pin(async { Ok(json!({"steps": ["publish"]})) }));
//! graph
//!     .add_edge(START, "draft")
//!     .add_edge("draft", "publish")
//!     .add_edge("publish", END);
//!
//! let app = graph.compile_with(
//!     CompileOptions::new()
//!         .with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()))
//!         .with_interrupt_before(["publish"]),
//! )?;
//!
//! let config = CheckpointConfig::for_thread("doc-1");
//! let paused = app.invoke_with_config(Some(json!({})), &config).await?;
//! assert!(paused.is_interrupted());
//! assert_eq!(paused.next, vec!["publish".to_string()]);
//!
//! let done = app.resume(&config).await?;
//! assert_eq!(done.values["steps"], json!(["draft", "publish"]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`state`] - schemas and reducers
//! - [`graph`], [`builder`] - graph definition and compilation
//! - [`compiled`] - execution, streaming and the state API
//! - [`interrupt`] - breakpoints
//! - [`store`] - long-term memory shared across threads
//! - [`runs`] - per-thread run queue
//! - [`messages`], [`tool`], [`llm`] - chat messages, tools and model calls
//! - [`stream`], [`runtime`] - stream modes and the node context
//! - [`settings`] - engine configuration

pub mod builder;
pub mod compiled;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod llm;
pub mod messages;
pub(crate) mod pregel;
pub mod runs;
pub mod runtime;
pub mod send;
pub mod settings;
pub mod state;
pub mod store;
pub mod stream;
mod subgraph;
pub mod tool;

pub use builder::{CompileOptions, StateGraph};
pub use compiled::{CompiledGraph, RunOutcome, RunStatus, StateSnapshot, StateSnapshotStream};
pub use error::{GraphError, Result};
pub use graph::{NodeFuture, NodeId, NodeKind, NodeSpec, END, START};
pub use interrupt::InterruptConfig;
pub use llm::{ChatModel, ScriptedChatModel};
pub use messages::{add_messages, Message, MessageRole, RemoveMessage, ToolCall};
pub use pregel::CancelFlag;
pub use runs::{MultitaskStrategy, RunHandle, RunManager, RunRecord};
pub use runtime::{NodeContext, StreamWriter};
pub use send::{ConditionalEdgeResult, Send};
pub use settings::EngineSettings;
pub use state::{CustomReducer, Reducer, StateError, StateSchema};
pub use store::{InMemoryStore, Item, Namespace, SearchQuery, Store, StoreError};
pub use stream::{ChunkStream, StreamChunk, StreamMode};
pub use tool::{tools_condition, Tool, ToolError, ToolNode, ToolRegistry};

pub use stepgraph_checkpoint::{
    CheckpointConfig, CheckpointSaver, FileCheckpointSaver, InMemoryCheckpointSaver, InterruptWhen,
    PendingInterrupt,
};
