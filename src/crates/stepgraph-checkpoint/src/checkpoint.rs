//! Core checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of a thread's state taken after
//! an input is applied, after every superstep, and after every manual state
//! update. Checkpoints of one thread form a tree through [`Checkpoint::parent_id`];
//! the saver owns the tree and a head pointer per thread.
//!
//! ```text
//!  input(seq 1) ── loop(seq 2) ── loop(seq 3) ── loop(seq 4)
//!                       │
//!                       └── fork(seq 5) ── loop(seq 6)      <- head
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::error::{CheckpointError, Result};

/// Checkpoint identifier
pub type CheckpointId = String;

/// A unit of work waiting to run in the next superstep.
///
/// Tasks created by ordinary edges carry no input and read the shared state.
/// Tasks created by a map-reduce `Send` carry a private payload that replaces
/// the shared state as the node's input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTask {
    /// Unique task identifier
    pub id: String,

    /// Name of the node to execute
    pub node: String,

    /// Private input supplied by a `Send`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl PendingTask {
    /// Task that reads the shared state
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node: node.into(),
            input: None,
        }
    }

    /// Task with a private input payload
    pub fn with_input(node: impl Into<String>, input: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node: node.into(),
            input: Some(input),
        }
    }

    /// True for tasks created by a `Send`
    pub fn is_send(&self) -> bool {
        self.input.is_some()
    }
}

/// When an interrupt fired relative to the node it names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InterruptWhen {
    /// Static breakpoint before the node ran
    Before,
    /// Static breakpoint after the node ran
    After,
    /// Raised by the node itself while running
    Dynamic,
    /// The run was stopped between supersteps by its owner
    Cancelled,
}

/// An interrupt recorded on the checkpoint where execution stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInterrupt {
    pub node: String,
    pub when: InterruptWhen,
    pub reason: String,
}

impl PendingInterrupt {
    pub fn new(node: impl Into<String>, when: InterruptWhen, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            when,
            reason: reason.into(),
        }
    }
}

/// Origin of a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Created from caller input at the start of an invocation
    Input,
    /// Created by the executor after a superstep
    Loop,
    /// Created by a manual state update on the head
    Update,
    /// Created by a manual state update on a non-head checkpoint
    Fork,
}

/// Metadata stored next to a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Superstep number; `-1` for the input checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Updates written during the step, keyed by node name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writes: Option<Value>,

    /// Run that produced this checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_writes(mut self, writes: Value) -> Self {
        self.writes = Some(writes);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Checks every filter entry against the serialized metadata.
    pub fn matches(&self, filter: &HashMap<String, Value>) -> bool {
        let Ok(Value::Object(fields)) = serde_json::to_value(self) else {
            return filter.is_empty();
        };
        filter
            .iter()
            .all(|(key, expected)| fields.get(key) == Some(expected))
    }
}

/// Immutable snapshot of a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Format version
    pub v: i32,

    pub id: CheckpointId,

    /// Per-thread sequence number, assigned by the saver on `put`
    #[serde(default)]
    pub seq: u64,

    /// Checkpoint this one was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CheckpointId>,

    pub ts: DateTime<Utc>,

    /// Full state object
    pub values: Value,

    /// Tasks to run in the next superstep
    #[serde(default)]
    pub tasks: Vec<PendingTask>,

    /// Tasks released once `tasks` have run (successors of siblings of an
    /// interrupted node)
    #[serde(default)]
    pub deferred: Vec<PendingTask>,

    /// Completed sources per fan-in join, keyed by join target
    #[serde(default)]
    pub barriers: BTreeMap<String, BTreeSet<String>>,

    /// Interrupts that stopped execution at this checkpoint
    #[serde(default)]
    pub interrupts: Vec<PendingInterrupt>,
}

impl Checkpoint {
    pub const CURRENT_VERSION: i32 = 1;

    /// Fresh checkpoint holding `values` with no pending work
    pub fn new(values: Value) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            seq: 0,
            parent_id: None,
            ts: Utc::now(),
            values,
            tasks: Vec::new(),
            deferred: Vec::new(),
            barriers: BTreeMap::new(),
            interrupts: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }

    /// Derive a new checkpoint from this one. The child gets a fresh id, a
    /// fresh timestamp and points back at `self`.
    pub fn child(&self) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            seq: 0,
            parent_id: Some(self.id.clone()),
            ts: Utc::now(),
            values: self.values.clone(),
            tasks: self.tasks.clone(),
            deferred: self.deferred.clone(),
            barriers: self.barriers.clone(),
            interrupts: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: Option<CheckpointId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<PendingTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Names of the nodes scheduled next, de-duplicated, in task order
    pub fn next(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.tasks
            .iter()
            .filter(|task| seen.insert(task.node.clone()))
            .map(|task| task.node.clone())
            .collect()
    }

    /// True when nothing is left to run
    pub fn is_terminal(&self) -> bool {
        self.tasks.is_empty() && self.deferred.is_empty()
    }
}

/// Run-scoped configuration identifying a thread and optionally one of its
/// checkpoints. Extra keys (`user_id`, ...) are passed through to nodes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for the head of `thread_id`
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self::new().with_thread_id(thread_id)
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(checkpoint_ns.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Caller-defined configuration value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn require_thread_id(&self) -> Result<&str> {
        self.thread_id
            .as_deref()
            .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))
    }

    /// Same thread and extras, pointing at the head instead of a checkpoint
    pub fn head(&self) -> Self {
        Self {
            checkpoint_id: None,
            ..self.clone()
        }
    }
}

/// A checkpoint together with its config, metadata and parent reference.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,

    pub checkpoint: Checkpoint,

    pub metadata: CheckpointMetadata,

    pub parent_config: Option<CheckpointConfig>,
}

impl CheckpointTuple {
    pub fn new(
        config: CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
        }
    }

    pub fn with_parent_config(mut self, parent_config: CheckpointConfig) -> Self {
        self.parent_config = Some(parent_config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_creation() {
        let checkpoint = Checkpoint::empty();
        assert_eq!(checkpoint.v, Checkpoint::CURRENT_VERSION);
        assert_eq!(checkpoint.values, json!({}));
        assert!(checkpoint.parent_id.is_none());
        assert!(checkpoint.is_terminal());
    }

    #[test]
    fn test_child_points_at_parent() {
        let parent = Checkpoint::new(json!({"foo": 1}))
            .with_tasks(vec![PendingTask::new("node_a")]);
        let child = parent.child();

        assert_ne!(child.id, parent.id);
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.values, parent.values);
        assert_eq!(child.next(), vec!["node_a".to_string()]);
    }

    #[test]
    fn test_next_deduplicates_send_tasks() {
        let checkpoint = Checkpoint::empty().with_tasks(vec![
            PendingTask::with_input("joke", json!({"subject": "cats"})),
            PendingTask::with_input("joke", json!({"subject": "dogs"})),
            PendingTask::new("summary"),
        ]);

        assert_eq!(checkpoint.next(), vec!["joke".to_string(), "summary".to_string()]);
        assert_eq!(checkpoint.tasks.len(), 3);
        assert!(checkpoint.tasks[0].is_send());
    }

    #[test]
    fn test_checkpoint_metadata() {
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_step(-1)
            .with_extra("key", json!("value"));

        assert_eq!(metadata.source, Some(CheckpointSource::Input));
        assert_eq!(metadata.step, Some(-1));
        assert_eq!(metadata.extra.get("key"), Some(&json!("value")));
    }

    #[test]
    fn test_metadata_filter_matches_known_and_extra_fields() {
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Update)
            .with_extra("user", json!("ana"));

        let mut filter = HashMap::new();
        filter.insert("source".to_string(), json!("update"));
        assert!(metadata.matches(&filter));

        filter.insert("user".to_string(), json!("bo"));
        assert!(!metadata.matches(&filter));
    }

    #[test]
    fn test_checkpoint_config() {
        let config = CheckpointConfig::for_thread("thread-1")
            .with_checkpoint_id("checkpoint-1")
            .with_extra("user_id", json!("u-1"));

        assert_eq!(config.thread_id, Some("thread-1".to_string()));
        assert_eq!(config.checkpoint_id, Some("checkpoint-1".to_string()));
        assert_eq!(config.get("user_id"), Some(&json!("u-1")));
        assert!(config.head().checkpoint_id.is_none());
        assert!(CheckpointConfig::new().require_thread_id().is_err());
    }
}
