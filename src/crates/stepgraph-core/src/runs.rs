//! Runs on shared threads
//!
//! A thread executes one run at a time. [`RunManager`] owns a worker task per
//! thread and a FIFO queue in front of it; what happens when a run is
//! submitted while another one is active (a "double text") is decided by the
//! submission's [`MultitaskStrategy`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepgraph_core::runs::{MultitaskStrategy, RunManager};
//! use stepgraph_core::CompiledGraph;
//! use stepgraph_checkpoint::CheckpointConfig;
//! use serde_json::json;
//!
//! # async fn example(app: CompiledGraph) -> stepgraph_core::Result<()> {
//! let runs = RunManager::new(Arc::new(app));
//! let config = CheckpointConfig::for_thread("chat-1");
//!
//! let first = runs.submit(&config, Some(json!({"text": "hello"})), MultitaskStrategy::Enqueue)?;
//! let second = runs.submit(&config, Some(json!({"text": "again"})), MultitaskStrategy::Interrupt)?;
//!
//! let first = first.wait().await?; // stopped at its next superstep boundary
//! let second = second.wait().await?;
//! # Ok(())
//! # }
//! ```

use crate::compiled::{CompiledGraph, RunOutcome, RunStatus};
use crate::error::{GraphError, Result};
use crate::pregel::CancelFlag;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use stepgraph_checkpoint::CheckpointConfig;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What to do with a new run while the thread is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultitaskStrategy {
    /// Refuse the new run
    Reject,
    /// Run it after everything already queued
    #[default]
    Enqueue,
    /// Stop the active run at its next superstep boundary, keeping what it
    /// committed, then run the new one
    Interrupt,
    /// Stop the active run and delete every checkpoint it wrote
    Rollback,
}

/// Bookkeeping for one submitted run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub thread_id: String,
    pub status: RunStatus,
    pub strategy: MultitaskStrategy,
    pub created_at: DateTime<Utc>,
}

/// Awaitable result of a submitted run
pub struct RunHandle {
    run_id: String,
    rx: oneshot::Receiver<Result<RunOutcome>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wait for the run to finish. A rolled-back run resolves to
    /// [`GraphError::RunRolledBack`].
    pub async fn wait(self) -> Result<RunOutcome> {
        self.rx
            .await
            .map_err(|_| GraphError::custom(format!("run '{}' was dropped before it finished", self.run_id)))?
    }
}

struct Job {
    run_id: String,
    input: Option<Value>,
    config: CheckpointConfig,
    cancel: CancelFlag,
    reply: oneshot::Sender<Result<RunOutcome>>,
}

#[derive(Default)]
struct ThreadState {
    active: Option<RunSlot>,
    queued: VecDeque<RunSlot>,
}

impl ThreadState {
    fn is_busy(&self) -> bool {
        self.active.is_some() || !self.queued.is_empty()
    }

    fn slots_mut(&mut self) -> impl Iterator<Item = &mut RunSlot> + '_ {
        self.active.iter_mut().chain(self.queued.iter_mut())
    }
}

struct RunSlot {
    run_id: String,
    cancel: CancelFlag,
    rollback: bool,
}

struct ThreadWorker {
    tx: mpsc::UnboundedSender<Job>,
    state: Arc<Mutex<ThreadState>>,
}

type Threads = Arc<Mutex<HashMap<String, ThreadWorker>>>;
type Records = Arc<Mutex<HashMap<String, RunRecord>>>;

/// Serializes runs per thread and applies the multitask policy.
///
/// A thread's worker stops as soon as nothing is active or queued on it and
/// is spawned again by the next submission. Run records are kept after the
/// run finishes so [`get_run`](Self::get_run) and
/// [`list_runs`](Self::list_runs) can report them; drop them with
/// [`clear_finished`](Self::clear_finished).
pub struct RunManager {
    graph: Arc<CompiledGraph>,
    threads: Threads,
    records: Records,
}

impl RunManager {
    /// Create a manager. Must be used inside a tokio runtime: workers are
    /// spawned on first submission to a thread.
    pub fn new(graph: Arc<CompiledGraph>) -> Self {
        Self {
            graph,
            threads: Arc::new(Mutex::new(HashMap::new())),
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    /// Submit a run on the thread named by `config`.
    ///
    /// `input` follows [`CompiledGraph::invoke_with_config`]: `Some` starts a
    /// new turn, `None` resumes the thread. The input is applied when the run
    /// starts, on top of whatever the previous run left.
    pub fn submit(
        &self,
        config: &CheckpointConfig,
        input: Option<Value>,
        strategy: MultitaskStrategy,
    ) -> Result<RunHandle> {
        let thread_id = config.require_thread_id()?.to_string();
        let run_id = Uuid::new_v4().to_string();
        let (reply, rx) = oneshot::channel();

        let mut threads = self.threads.lock();
        let worker = threads
            .entry(thread_id.clone())
            .or_insert_with(|| self.spawn_worker(&thread_id));

        let cancel = CancelFlag::new();
        {
            let mut state = worker.state.lock();

            match strategy {
                MultitaskStrategy::Reject if state.is_busy() => {
                    debug!(thread_id = %thread_id, "rejecting run on busy thread");
                    return Err(GraphError::ThreadBusy { thread_id });
                }
                MultitaskStrategy::Interrupt | MultitaskStrategy::Rollback => {
                    // Everything ahead of the new run gives way, started or not
                    for slot in state.slots_mut() {
                        info!(
                            thread_id = %thread_id,
                            run_id = %slot.run_id,
                            ?strategy,
                            "cancelling run"
                        );
                        slot.cancel.cancel();
                        slot.rollback |= strategy == MultitaskStrategy::Rollback;
                    }
                }
                _ => {}
            }

            state.queued.push_back(RunSlot {
                run_id: run_id.clone(),
                cancel: cancel.clone(),
                rollback: false,
            });
        }

        self.records.lock().insert(
            run_id.clone(),
            RunRecord {
                run_id: run_id.clone(),
                thread_id: thread_id.clone(),
                status: RunStatus::Pending,
                strategy,
                created_at: Utc::now(),
            },
        );

        let job = Job {
            run_id: run_id.clone(),
            input,
            config: config.clone(),
            cancel,
            reply,
        };
        if worker.tx.send(job).is_err() {
            self.records.lock().remove(&run_id);
            return Err(GraphError::custom(format!("worker for thread '{}' stopped", thread_id)));
        }

        Ok(RunHandle { run_id, rx })
    }

    /// Cancel a run. It stops at its next superstep boundary; a queued run
    /// records its input and stops before the first superstep. Returns false
    /// when the run is unknown or already finished.
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(thread_id) = self.records.lock().get(run_id).map(|r| r.thread_id.clone()) else {
            return false;
        };
        let threads = self.threads.lock();
        let Some(worker) = threads.get(&thread_id) else {
            return false;
        };
        let mut state = worker.state.lock();
        let slot = state.slots_mut().find(|slot| slot.run_id == run_id);
        match slot {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.records.lock().get(run_id).cloned()
    }

    /// Runs of a thread, oldest first
    pub fn list_runs(&self, thread_id: &str) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .records
            .lock()
            .values()
            .filter(|record| record.thread_id == thread_id)
            .cloned()
            .collect();
        runs.sort_by_key(|record| record.created_at);
        runs
    }

    /// Forget the finished runs of a thread. Returns how many were dropped.
    pub fn clear_finished(&self, thread_id: &str) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| {
            record.thread_id != thread_id
                || matches!(record.status, RunStatus::Pending | RunStatus::Running)
        });
        before - records.len()
    }

    /// Threads that currently have a worker
    pub fn worker_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// True while a run is active or queued on the thread
    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.threads
            .lock()
            .get(thread_id)
            .is_some_and(|worker| worker.state.lock().is_busy())
    }

    fn spawn_worker(&self, thread_id: &str) -> ThreadWorker {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ThreadState::default()));

        tokio::spawn(worker_loop(
            thread_id.to_string(),
            self.graph.clone(),
            rx,
            state.clone(),
            self.threads.clone(),
            self.records.clone(),
        ));

        ThreadWorker { tx, state }
    }
}

async fn worker_loop(
    thread_id: String,
    graph: Arc<CompiledGraph>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    state: Arc<Mutex<ThreadState>>,
    threads: Threads,
    records: Records,
) {
    while let Some(job) = rx.recv().await {
        {
            let mut state = state.lock();
            let slot = match state.queued.iter().position(|slot| slot.run_id == job.run_id) {
                Some(index) => state.queued.remove(index),
                None => None,
            };
            state.active = Some(slot.unwrap_or(RunSlot {
                run_id: job.run_id.clone(),
                cancel: job.cancel.clone(),
                rollback: false,
            }));
        }
        set_status(&records, &job.run_id, RunStatus::Running);
        debug!(thread_id = %thread_id, run_id = %job.run_id, "run started");

        let result = graph
            .invoke_cancellable(job.input, &job.config, &job.run_id, job.cancel)
            .await;

        let rollback = state
            .lock()
            .active
            .take()
            .is_some_and(|slot| slot.rollback);

        let result = if rollback {
            rollback_run(&graph, &thread_id, &job.run_id, &records).await
        } else {
            let status = match &result {
                Ok(outcome) => outcome.status,
                Err(_) => RunStatus::Failed,
            };
            set_status(&records, &job.run_id, status);
            result
        };

        let idle = retire_if_idle(&threads, &thread_id, &state);

        // The submitter may have stopped waiting.
        let _ = job.reply.send(result);
        if idle {
            debug!(thread_id = %thread_id, "thread idle, worker stopped");
            break;
        }
    }
}

/// Unregister the worker when nothing is active or queued on its thread.
/// Submissions hold the threads lock while they queue, so an idle worker
/// has no job left in its channel.
fn retire_if_idle(threads: &Threads, thread_id: &str, state: &Arc<Mutex<ThreadState>>) -> bool {
    let mut threads = threads.lock();
    if state.lock().is_busy() {
        return false;
    }
    if threads
        .get(thread_id)
        .is_some_and(|worker| Arc::ptr_eq(&worker.state, state))
    {
        threads.remove(thread_id);
    }
    true
}

async fn rollback_run(
    graph: &CompiledGraph,
    thread_id: &str,
    run_id: &str,
    records: &Records,
) -> Result<RunOutcome> {
    if let Some(saver) = graph.checkpointer() {
        let removed = saver.delete_run(thread_id, run_id).await?;
        info!(thread_id, run_id, removed, "run rolled back");
    } else {
        warn!(thread_id, run_id, "rollback without a checkpointer; nothing to delete");
    }
    records.lock().remove(run_id);
    Err(GraphError::RunRolledBack {
        run_id: run_id.to_string(),
    })
}

fn set_status(records: &Records, run_id: &str, status: RunStatus) {
    if let Some(record) = records.lock().get_mut(run_id) {
        record.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Reducer, StateSchema};
    use crate::{CompileOptions, StateGraph, END, START};
    use serde_json::json;
    use stepgraph_checkpoint::InMemoryCheckpointSaver;
    use tokio::sync::Notify;

    /// `slow` signals `started`, then waits for `release` before finishing;
    /// `after` runs in the next superstep
    fn gated_graph(started: Arc<Notify>, release: Arc<Notify>) -> Arc<CompiledGraph> {
        let schema = StateSchema::new().field("log", Reducer::Append);
        let mut graph = StateGraph::new(schema);
        graph.add_node("slow", move |input| {
            let started = started.clone();
            let release = release.clone();
            Box::pin(async move {
                if input.get("gate").and_then(Value::as_bool).unwrap_or(false) {
                    started.notify_one();
                    release.notified().await;
                }
                Ok(json!({"log": ["slow"]}))
            })
        });
        graph.add_node("after", |_| Box::pin(async { Ok(json!({"log": ["after"]})) }));
        graph
            .add_edge(START, "slow")
            .add_edge("slow", "after")
            .add_edge("after", END);

        let options = CompileOptions::default().with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()));
        Arc::new(graph.compile_with(options).unwrap())
    }

    #[tokio::test]
    async fn test_enqueue_runs_in_order() {
        let runs = RunManager::new(gated_graph(Arc::new(Notify::new()), Arc::new(Notify::new())));
        let config = CheckpointConfig::for_thread("t");

        let first = runs.submit(&config, Some(json!({})), MultitaskStrategy::Enqueue).unwrap();
        let second = runs.submit(&config, Some(json!({})), MultitaskStrategy::Enqueue).unwrap();

        let first = first.wait().await.unwrap();
        let second = second.wait().await.unwrap();
        assert_eq!(first.values["log"], json!(["slow", "after"]));
        assert_eq!(second.values["log"], json!(["slow", "after", "slow", "after"]));
        assert_eq!(runs.get_run(&second.run_id).unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_reject_while_busy() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let runs = RunManager::new(gated_graph(started.clone(), release.clone()));
        let config = CheckpointConfig::for_thread("t");

        let first = runs
            .submit(&config, Some(json!({"gate": true})), MultitaskStrategy::Reject)
            .unwrap();
        started.notified().await;

        let err = runs
            .submit(&config, Some(json!({})), MultitaskStrategy::Reject)
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::ThreadBusy { ref thread_id } if thread_id == "t"));

        release.notify_one();
        assert!(first.wait().await.unwrap().is_completed());
        assert!(!runs.is_busy("t"));
    }

    #[tokio::test]
    async fn test_interrupt_keeps_committed_work() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let graph = gated_graph(started.clone(), release.clone());
        let runs = RunManager::new(graph.clone());
        let config = CheckpointConfig::for_thread("t");

        let first = runs
            .submit(&config, Some(json!({"gate": true})), MultitaskStrategy::Enqueue)
            .unwrap();
        started.notified().await;
        let second = runs
            .submit(&config, Some(json!({"gate": false})), MultitaskStrategy::Interrupt)
            .unwrap();
        release.notify_one();

        let first = first.wait().await.unwrap();
        assert_eq!(first.status, RunStatus::Interrupted);
        assert_eq!(first.next, vec!["after".to_string()]);

        // The second run starts a new turn on top of the interrupted one
        let second = second.wait().await.unwrap();
        assert!(second.is_completed());
        assert_eq!(second.values["log"], json!(["slow", "slow", "after"]));
    }

    #[tokio::test]
    async fn test_rollback_deletes_cancelled_run() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let graph = gated_graph(started.clone(), release.clone());
        let runs = RunManager::new(graph.clone());
        let config = CheckpointConfig::for_thread("t");

        let first = runs
            .submit(&config, Some(json!({"gate": true})), MultitaskStrategy::Enqueue)
            .unwrap();
        let first_id = first.run_id().to_string();
        started.notified().await;
        let second = runs
            .submit(&config, Some(json!({})), MultitaskStrategy::Rollback)
            .unwrap();
        release.notify_one();

        let err = first.wait().await.unwrap_err();
        assert!(matches!(err, GraphError::RunRolledBack { ref run_id } if *run_id == first_id));
        assert!(runs.get_run(&first_id).is_none());

        // Nothing of the first run survives
        let second = second.wait().await.unwrap();
        assert_eq!(second.values["log"], json!(["slow", "after"]));
        assert_eq!(runs.list_runs("t").len(), 1);
    }

    #[tokio::test]
    async fn test_idle_worker_stops_and_records_can_be_cleared() {
        let runs = RunManager::new(gated_graph(Arc::new(Notify::new()), Arc::new(Notify::new())));
        let config = CheckpointConfig::for_thread("t");

        let first = runs.submit(&config, Some(json!({})), MultitaskStrategy::Enqueue).unwrap();
        first.wait().await.unwrap();
        assert_eq!(runs.worker_count(), 0);

        // The next submission brings a worker back
        let second = runs.submit(&config, None, MultitaskStrategy::Enqueue).unwrap();
        assert!(second.wait().await.unwrap().is_completed());
        assert_eq!(runs.worker_count(), 0);

        assert_eq!(runs.list_runs("t").len(), 2);
        assert_eq!(runs.clear_finished("t"), 2);
        assert!(runs.list_runs("t").is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_thread() {
        let runs = RunManager::new(gated_graph(Arc::new(Notify::new()), Arc::new(Notify::new())));
        let result = runs.submit(&CheckpointConfig::new(), None, MultitaskStrategy::Enqueue);
        assert!(result.is_err());
    }
}
