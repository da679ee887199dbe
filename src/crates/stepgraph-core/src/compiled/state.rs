//! State management methods (get_state, get_state_history, update_state)

use super::{CompiledGraph, StateSnapshot, StateSnapshotStream};
use crate::error::{GraphError, Result};
use crate::graph::START;
use crate::pregel::{carried_pauses, merge_tasks, plan_next};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use stepgraph_checkpoint::{
    CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
};

impl CompiledGraph {
    fn require_checkpointer(&self) -> Result<&Arc<dyn CheckpointSaver>> {
        self.checkpointer.as_ref().ok_or_else(|| {
            GraphError::Configuration("this operation needs a graph compiled with a checkpointer".to_string())
        })
    }

    /// Snapshot of the checkpoint addressed by `config` (the head when no
    /// `checkpoint_id` is set). `None` for a thread without checkpoints.
    pub async fn get_state(&self, config: &CheckpointConfig) -> Result<Option<StateSnapshot>> {
        let saver = self.require_checkpointer()?;
        let tuple = saver.get_tuple(config).await?;
        Ok(tuple.map(StateSnapshot::from))
    }

    /// Every checkpoint of the thread, all branches, newest first.
    ///
    /// * `filter` - metadata fields that must match, e.g. `{"source": "loop"}`
    /// * `before` - only checkpoints older than this one
    /// * `limit` - maximum number of snapshots
    pub async fn get_state_history(
        &self,
        config: &CheckpointConfig,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<StateSnapshotStream> {
        let saver = self.require_checkpointer()?;
        let history = saver.list(config, filter, before, limit).await?;
        Ok(Box::pin(history.map(|result| {
            result.map(StateSnapshot::from).map_err(GraphError::from)
        })))
    }

    /// Write `values` into a new checkpoint without running any node.
    ///
    /// The new checkpoint is a child of the addressed checkpoint (the head
    /// when `config` has no `checkpoint_id`). `values` is folded in with the
    /// schema's reducers. With `as_node`, the pending tasks are recomputed as
    /// if that node had just returned `values`; without it, the parent's
    /// pending tasks are kept.
    ///
    /// Pauses recorded on the parent carry over for the tasks that are still
    /// pending, so resuming does not stop on them again. A breakpoint node
    /// that only became pending through this update stops the next resume
    /// before it runs.
    ///
    /// Updating a checkpoint other than the head starts a new branch; the
    /// thread head moves to it and the old branch stays readable.
    ///
    /// Returns the config of the new checkpoint.
    pub async fn update_state(
        &self,
        config: &CheckpointConfig,
        values: Value,
        as_node: Option<&str>,
    ) -> Result<CheckpointConfig> {
        let saver = self.require_checkpointer()?;
        let thread_id = config.require_thread_id()?;

        let parent = saver.get_tuple(config).await?.ok_or_else(|| {
            GraphError::Validation(format!(
                "thread '{}' has no checkpoint {} to update",
                thread_id,
                config.checkpoint_id.as_deref().unwrap_or("head")
            ))
        })?;

        if let Some(node) = as_node {
            if node != START && !self.graph.has_node(node) {
                return Err(GraphError::Validation(format!(
                    "cannot update state as '{}': no such node",
                    node
                )));
            }
        }

        let head = saver.head(thread_id).await?;
        let source = if head.as_deref() == Some(parent.checkpoint.id.as_str()) {
            CheckpointSource::Update
        } else {
            CheckpointSource::Fork
        };

        let mut checkpoint = parent.checkpoint.child();
        let update = if values.is_null() { json!({}) } else { values };
        self.schema.apply(&mut checkpoint.values, &update)?;

        if let Some(node) = as_node {
            let remaining = checkpoint
                .tasks
                .drain(..)
                .filter(|task| task.node != node)
                .collect::<Vec<_>>();
            let planned = plan_next(&self.graph, &[node], &checkpoint.values, &mut checkpoint.barriers)?;
            checkpoint.tasks = merge_tasks(remaining, planned);
            if checkpoint.tasks.is_empty() {
                checkpoint.tasks = std::mem::take(&mut checkpoint.deferred);
            }
        }
        // A task the parent paused on stays let through on resume; newly
        // planned breakpoints stop the resumed run before it does anything
        checkpoint.interrupts = carried_pauses(&parent.checkpoint, &checkpoint.tasks);

        let writes = json!({ as_node.unwrap_or("__update__"): update });
        let step = parent.metadata.step.map_or(0, |step| step + 1);
        let metadata = CheckpointMetadata::new()
            .with_source(source)
            .with_step(step)
            .with_writes(writes);

        tracing::debug!(
            thread_id,
            parent = %parent.checkpoint.id,
            checkpoint_id = %checkpoint.id,
            ?source,
            "state updated"
        );

        Ok(saver.put(&config.head(), checkpoint, metadata).await?)
    }

    /// Apply several updates in order. Each update addresses the checkpoint
    /// named by its own config.
    pub async fn bulk_update_state(
        &self,
        updates: Vec<(CheckpointConfig, Value, Option<String>)>,
    ) -> Result<Vec<CheckpointConfig>> {
        let mut results = Vec::with_capacity(updates.len());
        for (config, values, as_node) in updates {
            results.push(self.update_state(&config, values, as_node.as_deref()).await?);
        }
        Ok(results)
    }
}
