//! The superstep loop of one invocation.

use super::algo::{merge_tasks, plan_next, step_writes, unrecorded_breakpoints};
use super::RunContext;
use crate::compiled::{CompiledGraph, RunOutcome, RunStatus};
use crate::error::{GraphError, Result};
use crate::graph::{NodeSpec, START};
use crate::runtime::NodeContext;
use crate::state::json_type;
use crate::stream::StreamMode;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use stepgraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, InterruptWhen,
    PendingInterrupt, PendingTask,
};
use tracing::{debug, error, info, warn};

/// Drives one invocation from its first checkpoint to an outcome
pub(crate) struct PregelLoop<'g> {
    graph: &'g CompiledGraph,
    run: RunContext,

    /// Address of the last persisted checkpoint
    config: CheckpointConfig,

    /// Config nodes see; never carries a checkpoint id
    node_config: Arc<CheckpointConfig>,

    checkpoint: Checkpoint,
    step: i64,
    supersteps: usize,
    recursion_limit: usize,

    /// Set once this invocation has recorded an interrupt
    interrupted: bool,
}

impl<'g> PregelLoop<'g> {
    /// Prepare an invocation. With `input`, the input is folded into the
    /// thread's state and a new turn starts from `START`. Without it, the
    /// pending tasks of the addressed checkpoint are resumed.
    pub(crate) async fn start(
        graph: &'g CompiledGraph,
        input: Option<Value>,
        config: &CheckpointConfig,
        run: RunContext,
    ) -> Result<PregelLoop<'g>> {
        let mut config = config.clone();
        if config.checkpoint_ns.is_none() {
            config.checkpoint_ns = graph.settings.checkpoint_ns.clone();
        }

        let recursion_limit = match config.get("recursion_limit") {
            Some(value) => value
                .as_u64()
                .filter(|limit| *limit > 0)
                .map(|limit| limit as usize)
                .ok_or_else(|| {
                    GraphError::Configuration(format!(
                        "recursion_limit must be a positive integer, got {}",
                        value
                    ))
                })?,
            None => graph.settings.recursion_limit,
        };

        let base = match &graph.checkpointer {
            Some(saver) => {
                if config.thread_id.is_none() {
                    return Err(GraphError::Configuration(
                        "a thread_id is required when the graph has a checkpointer".to_string(),
                    ));
                }
                let tuple = saver.get_tuple(&config).await?;
                if tuple.is_none() {
                    if let Some(id) = &config.checkpoint_id {
                        return Err(stepgraph_checkpoint::CheckpointError::NotFound(id.clone()).into());
                    }
                }
                tuple
            }
            None => None,
        };

        let node_config = Arc::new(config.head());
        let mut pregel = PregelLoop {
            graph,
            run,
            config,
            node_config,
            checkpoint: Checkpoint::empty(),
            step: -1,
            supersteps: 0,
            recursion_limit,
            interrupted: false,
        };

        match input {
            Some(input) => {
                let input = match input {
                    Value::Null => Value::Object(Map::new()),
                    Value::Object(_) => graph.schema.filter_input(&input),
                    other => {
                        return Err(GraphError::Validation(format!(
                            "graph input must be an object, got {}",
                            json_type(&other)
                        )))
                    }
                };

                let mut checkpoint = match &base {
                    Some(tuple) => {
                        pregel.step = tuple.metadata.step.map_or(-1, |step| step + 1);
                        let mut child = tuple.checkpoint.child();
                        child.tasks.clear();
                        child.deferred.clear();
                        child.barriers.clear();
                        child
                    }
                    None => Checkpoint::new(graph.schema.defaults()),
                };
                graph.schema.apply(&mut checkpoint.values, &input)?;
                checkpoint.tasks = plan_next(
                    &graph.graph,
                    &[START],
                    &checkpoint.values,
                    &mut checkpoint.barriers,
                )?;

                pregel.checkpoint = checkpoint;
                pregel.record_before_interrupts();
                pregel.persist(CheckpointSource::Input, input).await?;
                pregel.emit_values();
            }
            None => {
                let Some(tuple) = base else {
                    return Err(GraphError::Configuration(
                        "nothing to resume: the thread has no checkpoint (is a checkpointer configured?)"
                            .to_string(),
                    ));
                };
                pregel.step = tuple.metadata.step.unwrap_or(-1);
                pregel.config.checkpoint_id = Some(tuple.checkpoint.id.clone());
                pregel.checkpoint = tuple.checkpoint;
                if pregel.checkpoint.tasks.is_empty() {
                    pregel.checkpoint.tasks = std::mem::take(&mut pregel.checkpoint.deferred);
                }
                debug!(
                    checkpoint_id = %pregel.checkpoint.id,
                    next = ?pregel.checkpoint.next(),
                    "resuming"
                );

                // Tasks planned outside a run (by update_state, or released
                // from deferred) still stop on their breakpoints
                let breakpoints = unrecorded_breakpoints(&graph.interrupts, &pregel.checkpoint);
                if breakpoints.is_empty() {
                    pregel.checkpoint.interrupts.clear();
                } else {
                    let mut paused = pregel.checkpoint.child();
                    paused.interrupts = breakpoints;
                    pregel.checkpoint = paused;
                    pregel.interrupted = true;
                    pregel.persist(CheckpointSource::Loop, json!({})).await?;
                }
            }
        }

        Ok(pregel)
    }

    /// Run supersteps until the graph completes, pauses or fails
    pub(crate) async fn run(mut self) -> Result<RunOutcome> {
        loop {
            if self.interrupted {
                return Ok(self.outcome(RunStatus::Interrupted));
            }

            if self.checkpoint.tasks.is_empty() {
                info!(run_id = %self.run.run_id, step = self.step, "run completed");
                return Ok(self.outcome(RunStatus::Completed));
            }

            if self.run.cancel.is_cancelled() {
                info!(run_id = %self.run.run_id, step = self.step, "run cancelled");
                self.checkpoint.interrupts = vec![PendingInterrupt::new(
                    "",
                    InterruptWhen::Cancelled,
                    "run cancelled",
                )];
                return Ok(self.outcome(RunStatus::Interrupted));
            }

            if self.supersteps >= self.recursion_limit {
                error!(limit = self.recursion_limit, "recursion limit reached");
                return Err(GraphError::RecursionLimit {
                    limit: self.recursion_limit,
                });
            }

            self.tick().await?;
            self.supersteps += 1;
        }
    }

    /// Execute one superstep and commit it
    async fn tick(&mut self) -> Result<()> {
        let step = self.step + 1;
        let state = self.checkpoint.values.clone();
        let tasks = self.checkpoint.tasks.clone();
        debug!(step, tasks = ?self.checkpoint.next(), "running superstep");

        let specs: Vec<&NodeSpec> = tasks
            .iter()
            .map(|task| {
                self.graph.graph.node(&task.node).ok_or_else(|| {
                    GraphError::Validation(format!("pending task names unknown node '{}'", task.node))
                })
            })
            .collect::<Result<_>>()?;

        let runs = tasks.iter().zip(specs).map(|(task, spec)| {
            let input = task.input.clone().unwrap_or_else(|| state.clone());
            let ctx = NodeContext::for_task(
                &task.node,
                step,
                self.node_config.clone(),
                self.graph.store.clone(),
                self.run.emitter.clone(),
            );
            spec.run(input, ctx)
        });
        let results = join_all(runs).await;

        let mut updates: Vec<(String, Value)> = Vec::new();
        let mut paused: Vec<(PendingTask, String)> = Vec::new();
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(Value::Null) => updates.push((task.node.clone(), Value::Object(Map::new()))),
                Ok(update @ Value::Object(_)) => updates.push((task.node.clone(), update)),
                Ok(other) => {
                    let err = GraphError::Validation(format!(
                        "node must return an object or null, got {}",
                        json_type(&other)
                    ));
                    error!(node = %task.node, step, error = %err, "node failed");
                    return Err(GraphError::node_failed(&task.node, err));
                }
                Err(GraphError::NodeInterrupt { reason, .. }) => {
                    warn!(node = %task.node, step, %reason, "node interrupted");
                    paused.push((task.clone(), reason));
                }
                Err(err) => {
                    error!(node = %task.node, step, error = %err, "node failed");
                    return Err(GraphError::node_failed(&task.node, err));
                }
            }
        }

        let mut values = state;
        self.graph.schema.apply_step(&mut values, &updates)?;

        let mut next = self.checkpoint.child();
        let completed: Vec<&str> = updates.iter().map(|(node, _)| node.as_str()).collect();
        let planned = plan_next(&self.graph.graph, &completed, &values, &mut next.barriers)?;
        next.values = values;

        if paused.is_empty() {
            let deferred = std::mem::take(&mut next.deferred);
            next.tasks = merge_tasks(planned, deferred);
        } else {
            next.tasks = paused.iter().map(|(task, _)| task.clone()).collect();
            next.deferred = merge_tasks(std::mem::take(&mut next.deferred), planned);
            next.interrupts = paused
                .iter()
                .map(|(task, reason)| PendingInterrupt::new(&task.node, InterruptWhen::Dynamic, reason))
                .collect();
        }

        self.step = step;
        self.checkpoint = next;
        let paused_nodes: BTreeSet<&str> = paused.iter().map(|(task, _)| task.node.as_str()).collect();
        let finished: Vec<&str> = completed
            .iter()
            .copied()
            .filter(|node| !paused_nodes.contains(node))
            .collect();
        self.record_after_interrupts(&finished);
        if paused.is_empty() {
            self.record_before_interrupts();
        } else {
            self.interrupted = true;
        }

        self.persist(CheckpointSource::Loop, step_writes(&updates)).await?;

        for (node, update) in &updates {
            self.run.emitter.emit(StreamMode::Updates, Some(node), step, || {
                json!({ node.as_str(): update })
            });
        }
        if self.interrupted {
            let interrupts = &self.checkpoint.interrupts;
            self.run.emitter.emit(StreamMode::Updates, None, step, || {
                json!({ "__interrupt__": interrupts })
            });
        }
        self.emit_values();
        Ok(())
    }

    fn record_after_interrupts(&mut self, completed: &[&str]) {
        let interrupts = &self.graph.interrupts;
        let mut seen = BTreeSet::new();
        for node in completed {
            if seen.insert(*node) && interrupts.should_interrupt_after(node) {
                self.checkpoint
                    .interrupts
                    .push(PendingInterrupt::new(*node, InterruptWhen::After, ""));
            }
        }
        if !self.checkpoint.interrupts.is_empty() {
            self.interrupted = true;
        }
    }

    /// Stop before the pending tasks when one of them is a breakpoint
    fn record_before_interrupts(&mut self) {
        let breakpoints = unrecorded_breakpoints(&self.graph.interrupts, &self.checkpoint);
        if !breakpoints.is_empty() {
            self.checkpoint.interrupts.extend(breakpoints);
            self.interrupted = true;
        }
    }

    async fn persist(&mut self, source: CheckpointSource, writes: Value) -> Result<()> {
        let Some(saver) = &self.graph.checkpointer else {
            self.emit_checkpoint(None);
            return Ok(());
        };

        let metadata = CheckpointMetadata::new()
            .with_source(source)
            .with_step(self.step)
            .with_writes(writes)
            .with_run_id(self.run.run_id.clone());

        self.config = saver
            .put(&self.config.head(), self.checkpoint.clone(), metadata.clone())
            .await?;
        debug!(
            checkpoint_id = %self.checkpoint.id,
            step = self.step,
            interrupts = self.checkpoint.interrupts.len(),
            "checkpoint saved"
        );
        self.emit_checkpoint(Some(&metadata));
        Ok(())
    }

    fn emit_values(&self) {
        let values = &self.checkpoint.values;
        self.run
            .emitter
            .emit(StreamMode::Values, None, self.step, || values.clone());
    }

    fn emit_checkpoint(&self, metadata: Option<&CheckpointMetadata>) {
        let checkpoint = &self.checkpoint;
        let config = &self.config;
        self.run.emitter.emit(StreamMode::Checkpoints, None, self.step, || {
            json!({
                "config": config,
                "values": checkpoint.values,
                "next": checkpoint.next(),
                "metadata": metadata,
            })
        });
    }

    fn outcome(self, status: RunStatus) -> RunOutcome {
        let values = self.graph.schema.filter_output(&self.checkpoint.values);
        RunOutcome {
            run_id: self.run.run_id,
            status,
            values,
            next: self.checkpoint.next(),
            interrupts: self.checkpoint.interrupts,
            config: self.config,
        }
    }
}
