//! Task planning between supersteps.

use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, Route, END};
use crate::interrupt::InterruptConfig;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use stepgraph_checkpoint::{Checkpoint, InterruptWhen, PendingInterrupt, PendingTask};

/// Barrier state per join target: sources completed so far
pub(crate) type Barriers = BTreeMap<String, BTreeSet<String>>;

/// Compute the tasks triggered by `completed` nodes.
///
/// Routers see `state`, the state committed after the nodes ran. Plain
/// targets are de-duplicated across all sources; `Send` tasks are kept one per
/// send. `END` is dropped. A join target is released once every one of its
/// sources has been recorded in `barriers`, in this step or an earlier one.
pub(crate) fn plan_next(
    graph: &Graph,
    completed: &[&str],
    state: &Value,
    barriers: &mut Barriers,
) -> Result<Vec<PendingTask>> {
    let mut planner = Planner::default();
    let mut seen_sources = HashSet::new();

    for &source in completed {
        if !seen_sources.insert(source) {
            continue;
        }

        for edge in graph.outgoing(source) {
            match edge {
                Edge::Direct(target) => planner.push_node(target),
                Edge::Conditional(branch) => {
                    let routes = branch
                        .route(state)
                        .map_err(|err| GraphError::node_failed(source, err))?;
                    for route in routes {
                        let target = route.node();
                        if target != END && !graph.has_node(target) {
                            return Err(GraphError::node_failed(
                                source,
                                GraphError::Validation(format!(
                                    "router chose '{}', which is not a node of this graph",
                                    target
                                )),
                            ));
                        }
                        match route {
                            Route::Node(target) => planner.push_node(&target),
                            Route::Send(target, arg) => {
                                if target == END {
                                    return Err(GraphError::node_failed(
                                        source,
                                        GraphError::Validation("cannot send to END".to_string()),
                                    ));
                                }
                                planner.tasks.push(PendingTask::with_input(target, arg));
                            }
                        }
                    }
                }
            }
        }

        for join in graph.joins_from(source) {
            let done = barriers.entry(join.target.clone()).or_default();
            done.insert(source.to_string());
            if join.sources.is_subset(done) {
                barriers.remove(&join.target);
                planner.push_node(&join.target);
            }
        }
    }

    Ok(planner.tasks)
}

#[derive(Default)]
struct Planner {
    tasks: Vec<PendingTask>,
    planned: HashSet<String>,
}

impl Planner {
    fn push_node(&mut self, node: &str) {
        if node != END && self.planned.insert(node.to_string()) {
            self.tasks.push(PendingTask::new(node));
        }
    }
}

/// Append `extra` to `tasks`, skipping plain tasks whose node is already
/// planned
pub(crate) fn merge_tasks(mut tasks: Vec<PendingTask>, extra: Vec<PendingTask>) -> Vec<PendingTask> {
    let mut planned: HashSet<String> = tasks
        .iter()
        .filter(|task| !task.is_send())
        .map(|task| task.node.clone())
        .collect();

    for task in extra {
        if task.is_send() || planned.insert(task.node.clone()) {
            tasks.push(task);
        }
    }
    tasks
}

/// `interrupt_before` breakpoints among the pending tasks of `checkpoint`
/// that have not stopped a run yet. A node the checkpoint already records as
/// paused on, before it or from inside it, is let through.
pub(crate) fn unrecorded_breakpoints(
    interrupts: &InterruptConfig,
    checkpoint: &Checkpoint,
) -> Vec<PendingInterrupt> {
    let paused: HashSet<&str> = paused_nodes(&checkpoint.interrupts).collect();
    checkpoint
        .next()
        .into_iter()
        .filter(|node| !paused.contains(node.as_str()) && interrupts.should_interrupt_before(node))
        .map(|node| PendingInterrupt::new(node, InterruptWhen::Before, ""))
        .collect()
}

/// Pauses recorded on `parent` whose node is still among `tasks`
pub(crate) fn carried_pauses(parent: &Checkpoint, tasks: &[PendingTask]) -> Vec<PendingInterrupt> {
    let pending: HashSet<&str> = tasks.iter().map(|task| task.node.as_str()).collect();
    parent
        .interrupts
        .iter()
        .filter(|interrupt| is_pause(interrupt) && pending.contains(interrupt.node.as_str()))
        .cloned()
        .collect()
}

fn is_pause(interrupt: &PendingInterrupt) -> bool {
    matches!(interrupt.when, InterruptWhen::Before | InterruptWhen::Dynamic)
}

fn paused_nodes(interrupts: &[PendingInterrupt]) -> impl Iterator<Item = &str> {
    interrupts
        .iter()
        .filter(|interrupt| is_pause(interrupt))
        .map(|interrupt| interrupt.node.as_str())
}

/// Writes of one superstep for checkpoint metadata: `{node: update}`, or
/// `{node: [update, ...]}` when a node ran more than once
pub(crate) fn step_writes(updates: &[(String, Value)]) -> Value {
    let mut grouped: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    for (node, update) in updates {
        grouped.entry(node.as_str()).or_default().push(update);
    }

    let writes: Map<String, Value> = grouped
        .into_iter()
        .map(|(node, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0).clone()
            } else {
                Value::Array(values.into_iter().cloned().collect())
            };
            (node.to_string(), value)
        })
        .collect();
    Value::Object(writes)
}
