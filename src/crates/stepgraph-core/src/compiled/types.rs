//! Types returned by compiled graph execution and the state API.

use crate::error::Result;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use stepgraph_checkpoint::{
    CheckpointConfig, CheckpointMetadata, CheckpointTuple, PendingInterrupt, PendingTask,
};

/// Lifecycle of a run.
///
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       ├──► Interrupted ──(resume)──► Running
///                       └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Accepted, not started (queued behind another run)
    Pending,
    Running,
    /// Stopped at a breakpoint, by a node, or by cancellation; resumable
    Interrupted,
    /// No tasks left
    Completed,
    /// A node or the engine raised an error
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Interrupted)
    }
}

/// Result of a run that did not fail
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,

    /// `Completed` or `Interrupted`
    pub status: RunStatus,

    /// Final state, filtered by the schema's output keys
    pub values: Value,

    /// Interrupts recorded where the run stopped
    pub interrupts: Vec<PendingInterrupt>,

    /// Nodes that run next when the thread is resumed
    pub next: Vec<String>,

    /// Address of the last checkpoint the run wrote
    pub config: CheckpointConfig,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_interrupted(&self) -> bool {
        self.status == RunStatus::Interrupted
    }

    /// First interrupt, if the run was interrupted
    pub fn interrupt(&self) -> Option<&PendingInterrupt> {
        self.interrupts.first()
    }
}

/// A checkpoint as seen through the state API
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub values: Value,

    /// Node names scheduled next; empty once the thread has completed
    pub next: Vec<String>,

    /// Pending tasks behind `next`, including `Send` inputs
    pub tasks: Vec<PendingTask>,

    /// Interrupts that stopped execution at this checkpoint
    pub interrupts: Vec<PendingInterrupt>,

    pub config: CheckpointConfig,

    pub metadata: CheckpointMetadata,

    /// RFC 3339 creation time
    pub created_at: String,

    pub parent_config: Option<CheckpointConfig>,
}

impl From<CheckpointTuple> for StateSnapshot {
    fn from(tuple: CheckpointTuple) -> Self {
        Self {
            next: tuple.checkpoint.next(),
            created_at: tuple.checkpoint.ts.to_rfc3339(),
            values: tuple.checkpoint.values,
            tasks: tuple.checkpoint.tasks,
            interrupts: tuple.checkpoint.interrupts,
            config: tuple.config,
            metadata: tuple.metadata,
            parent_config: tuple.parent_config,
        }
    }
}

/// History of a thread, newest first
pub type StateSnapshotStream = Pin<Box<dyn Stream<Item = Result<StateSnapshot>> + Send>>;
