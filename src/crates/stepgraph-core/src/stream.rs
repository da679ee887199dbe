//! Streaming surface of a graph run
//!
//! [`CompiledGraph::stream`](crate::CompiledGraph::stream) runs a graph in the
//! background and yields [`StreamChunk`]s as the run progresses. Callers pick
//! the kinds of chunks they want with [`StreamMode`]:
//!
//! | Mode | Emitted | `data` |
//! |------|---------|--------|
//! | `Values` | after the input is applied and after every superstep | full state |
//! | `Updates` | once per finished task, plus `__interrupt__` on a pause | `{node: update}` |
//! | `Messages` | whenever a node writes a model token | message chunk |
//! | `Custom` | whenever a node writes custom data | node-defined |
//! | `Checkpoints` | after every persisted checkpoint | config, values, next, metadata |
//!
//! Nodes write `Messages` and `Custom` chunks through the
//! [`StreamWriter`](crate::runtime::StreamWriter) of their
//! [`NodeContext`](crate::runtime::NodeContext). Chunks for modes nobody
//! asked for are never built.

use crate::error::{GraphError, Result};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Kind of data a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Full state after each superstep
    Values,
    /// Per-node updates after each superstep
    Updates,
    /// Model token chunks tagged with the emitting node
    Messages,
    /// Arbitrary data written by nodes
    Custom,
    /// Checkpoint events
    Checkpoints,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Values => "values",
            StreamMode::Updates => "updates",
            StreamMode::Messages => "messages",
            StreamMode::Custom => "custom",
            StreamMode::Checkpoints => "checkpoints",
        }
    }
}

impl FromStr for StreamMode {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "values" => Ok(StreamMode::Values),
            "updates" => Ok(StreamMode::Updates),
            "messages" => Ok(StreamMode::Messages),
            "custom" => Ok(StreamMode::Custom),
            "checkpoints" => Ok(StreamMode::Checkpoints),
            other => Err(GraphError::Configuration(format!("unknown stream mode '{}'", other))),
        }
    }
}

/// One item of a run's stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamChunk {
    pub mode: StreamMode,

    /// Node that produced the chunk, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Superstep the chunk belongs to; `-1` for the input step
    pub step: i64,

    pub data: Value,
}

/// Stream returned by [`CompiledGraph::stream`](crate::CompiledGraph::stream)
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Fan-in point for every chunk of one run
#[derive(Clone, Default)]
pub(crate) struct Emitter {
    tx: Option<mpsc::UnboundedSender<Result<StreamChunk>>>,
    modes: Arc<Vec<StreamMode>>,
}

impl Emitter {
    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn new(tx: mpsc::UnboundedSender<Result<StreamChunk>>, modes: Vec<StreamMode>) -> Self {
        Self {
            tx: Some(tx),
            modes: Arc::new(modes),
        }
    }

    pub(crate) fn wants(&self, mode: StreamMode) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed()) && self.modes.contains(&mode)
    }

    /// Send a chunk if `mode` was requested. `data` is only built when it is.
    pub(crate) fn emit<F>(&self, mode: StreamMode, node: Option<&str>, step: i64, data: F)
    where
        F: FnOnce() -> Value,
    {
        if !self.wants(mode) {
            return;
        }
        if let Some(tx) = &self.tx {
            let chunk = StreamChunk {
                mode,
                node: node.map(str::to_string),
                step,
                data: data(),
            };
            // The receiver may have been dropped; the run continues regardless.
            let _ = tx.send(Ok(chunk));
        }
    }

    pub(crate) fn fail(&self, error: GraphError) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(error));
        }
    }
}
