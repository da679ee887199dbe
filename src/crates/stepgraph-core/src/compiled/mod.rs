//! Executable graphs
//!
//! A [`CompiledGraph`] is the immutable result of
//! [`StateGraph::compile`](crate::StateGraph::compile). It can be invoked any
//! number of times, concurrently, on different threads of the same
//! checkpointer.
//!
//! # Execution
//!
//! - [`invoke`](CompiledGraph::invoke) runs a graph without a thread
//! - [`invoke_with_config`](CompiledGraph::invoke_with_config) runs it on a
//!   thread: `Some(input)` starts a new turn, `None` continues from the
//!   addressed checkpoint (continue after an interrupt, or replay from a past
//!   checkpoint when `checkpoint_id` is set)
//! - [`stream`](CompiledGraph::stream) runs in the background and yields
//!   [`StreamChunk`](crate::stream::StreamChunk)s
//!
//! Every run ends with a [`RunOutcome`]: either `Completed` or `Interrupted`
//! (static breakpoint, dynamic interrupt, cancellation). Node failures, invalid
//! concurrent writes and the recursion limit are errors.
//!
//! # State API
//!
//! [`get_state`](CompiledGraph::get_state),
//! [`get_state_history`](CompiledGraph::get_state_history) and
//! [`update_state`](CompiledGraph::update_state) read and edit a thread's
//! checkpoints. Editing a checkpoint that is not the head forks the thread.

mod execution;
mod graph;
mod state;
mod streaming;
mod types;

pub use graph::CompiledGraph;
pub use types::{RunOutcome, RunStatus, StateSnapshot, StateSnapshotStream};
