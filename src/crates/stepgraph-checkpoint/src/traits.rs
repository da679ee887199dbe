//! The [`CheckpointSaver`] trait implemented by persistence backends

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple},
    error::Result,
};
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// Stream of checkpoint tuples, newest first
pub type CheckpointStream =
    Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Persistence backend for thread checkpoints.
///
/// Implementations must accept concurrent `put`s for distinct threads. The
/// executor never writes the same thread from two runs at once; that is the
/// run manager's job.
///
/// # Contract
///
/// - `put` stores an immutable snapshot, assigns it the next sequence number
///   of its thread and moves the thread head to it. The snapshot's
///   `parent_id`, when set, must name a checkpoint of the same thread.
/// - `get_tuple` returns the checkpoint named by `config.checkpoint_id`, or
///   the thread head when no id is given.
/// - `list` yields every checkpoint of the thread (all branches) ordered by
///   sequence number, newest first.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch a checkpoint without its metadata
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Fetch a checkpoint with metadata and parent config
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List the history of a thread.
    ///
    /// * `filter` - metadata fields that must match exactly
    /// * `before` - only checkpoints older than this one
    /// * `limit` - maximum number of results
    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    /// Store a checkpoint and return the config that addresses it
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Current head of a thread
    async fn head(&self, thread_id: &str) -> Result<Option<CheckpointId>> {
        let config = CheckpointConfig::for_thread(thread_id);
        Ok(self.get_tuple(&config).await?.map(|tuple| tuple.checkpoint.id))
    }

    /// Remove every checkpoint written by `run_id` and move the head back to
    /// the checkpoint the run started from. Returns the number removed.
    async fn delete_run(&self, thread_id: &str, run_id: &str) -> Result<usize>;

    /// Remove a whole thread, its head included
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
