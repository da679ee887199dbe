//! In-memory checkpoint saver with branching history
//!
//! Each thread owns an arena of serialized snapshots plus a head pointer.
//! Snapshots reference their parent by id, so a thread's history is a tree:
//! writing a child of a non-head checkpoint starts a new branch and moves the
//! head to it while the old branch stays addressable by id.
//!
//! Only use this saver for tests, demos and single-process deployments; state
//! is lost when the process exits.

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple},
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredEntry {
    id: CheckpointId,
    seq: u64,
    parent_id: Option<CheckpointId>,
    run_id: Option<String>,
    checkpoint_ns: Option<String>,
    extra: HashMap<String, Value>,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct ThreadLog {
    entries: Vec<StoredEntry>,
    head: Option<CheckpointId>,
    last_seq: u64,
}

impl ThreadLog {
    fn find(&self, id: &str) -> Option<&StoredEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

type CheckpointStorage = Arc<RwLock<HashMap<String, ThreadLog>>>;

/// Thread-safe in-memory [`CheckpointSaver`].
///
/// # Example
///
/// ```rust
/// use stepgraph_checkpoint::{
///     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, InMemoryCheckpointSaver,
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let saver = InMemoryCheckpointSaver::new();
/// let config = CheckpointConfig::for_thread("thread-1");
///
/// let first = saver.put(&config, Checkpoint::empty(), CheckpointMetadata::new()).await?;
/// let latest = saver.get_tuple(&config).await?.expect("head exists");
/// assert_eq!(latest.config.checkpoint_id, first.checkpoint_id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver<S = JsonSerializer> {
    storage: CheckpointStorage,
    serializer: S,
}

impl InMemoryCheckpointSaver<JsonSerializer> {
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer::new())
    }
}

impl<S: SerializerProtocol> InMemoryCheckpointSaver<S> {
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            serializer,
        }
    }

    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|log| log.entries.len())
            .sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    fn to_tuple(&self, thread_id: &str, entry: &StoredEntry) -> Result<CheckpointTuple> {
        let (checkpoint, metadata): (Checkpoint, CheckpointMetadata) =
            self.serializer.loads(&entry.data)?;

        let config = CheckpointConfig {
            thread_id: Some(thread_id.to_string()),
            checkpoint_id: Some(entry.id.clone()),
            checkpoint_ns: entry.checkpoint_ns.clone(),
            extra: entry.extra.clone(),
        };

        let mut tuple = CheckpointTuple::new(config.clone(), checkpoint, metadata);
        if let Some(parent_id) = &entry.parent_id {
            tuple = tuple.with_parent_config(config.with_checkpoint_id(parent_id.clone()));
        }
        Ok(tuple)
    }
}

impl Default for InMemoryCheckpointSaver<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: SerializerProtocol + 'static> CheckpointSaver for InMemoryCheckpointSaver<S> {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = config.require_thread_id()?;
        let storage = self.storage.read().await;

        let Some(log) = storage.get(thread_id) else {
            return Ok(None);
        };

        let target = match (&config.checkpoint_id, &log.head) {
            (Some(id), _) => id,
            (None, Some(head)) => head,
            (None, None) => return Ok(None),
        };

        log.find(target)
            .map(|entry| self.to_tuple(thread_id, entry))
            .transpose()
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let thread_id = config.require_thread_id()?;
        let storage = self.storage.read().await;
        let mut results = Vec::new();

        if let Some(log) = storage.get(thread_id) {
            let before_seq = before
                .and_then(|cfg| cfg.checkpoint_id.as_deref())
                .and_then(|id| log.find(id))
                .map(|entry| entry.seq);

            let mut entries: Vec<&StoredEntry> = log.entries.iter().collect();
            entries.sort_by(|a, b| b.seq.cmp(&a.seq));

            for entry in entries {
                if let Some(limit) = limit {
                    if results.len() >= limit {
                        break;
                    }
                }
                if before_seq.is_some_and(|seq| entry.seq >= seq) {
                    continue;
                }

                let tuple = self.to_tuple(thread_id, entry)?;
                if let Some(filter) = &filter {
                    if !tuple.metadata.matches(filter) {
                        continue;
                    }
                }
                results.push(Ok(tuple));
            }
        }

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        mut checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.require_thread_id()?.to_string();

        let mut storage = self.storage.write().await;
        let log = storage.entry(thread_id.clone()).or_default();

        if let Some(parent_id) = &checkpoint.parent_id {
            if log.find(parent_id).is_none() {
                return Err(CheckpointError::Invalid(format!(
                    "parent checkpoint {} does not belong to thread {}",
                    parent_id, thread_id
                )));
            }
        }

        log.last_seq += 1;
        checkpoint.seq = log.last_seq;

        let data = self.serializer.dumps(&(&checkpoint, &metadata))?;
        let entry = StoredEntry {
            id: checkpoint.id.clone(),
            seq: checkpoint.seq,
            parent_id: checkpoint.parent_id.clone(),
            run_id: metadata.run_id.clone(),
            checkpoint_ns: config.checkpoint_ns.clone(),
            extra: config.extra.clone(),
            data,
        };

        log.entries.push(entry);
        log.head = Some(checkpoint.id.clone());

        Ok(CheckpointConfig {
            thread_id: Some(thread_id),
            checkpoint_id: Some(checkpoint.id),
            checkpoint_ns: config.checkpoint_ns.clone(),
            extra: config.extra.clone(),
        })
    }

    async fn head(&self, thread_id: &str) -> Result<Option<CheckpointId>> {
        Ok(self
            .storage
            .read()
            .await
            .get(thread_id)
            .and_then(|log| log.head.clone()))
    }

    async fn delete_run(&self, thread_id: &str, run_id: &str) -> Result<usize> {
        let mut storage = self.storage.write().await;
        let Some(log) = storage.get_mut(thread_id) else {
            return Ok(0);
        };

        let (removed, kept): (Vec<StoredEntry>, Vec<StoredEntry>) = log
            .entries
            .drain(..)
            .partition(|entry| entry.run_id.as_deref() == Some(run_id));
        log.entries = kept;

        if removed.is_empty() {
            return Ok(0);
        }

        let removed_ids: HashSet<&str> = removed.iter().map(|entry| entry.id.as_str()).collect();
        let head_removed = log
            .head
            .as_deref()
            .is_some_and(|head| removed_ids.contains(head));

        if head_removed {
            // Walk back to the checkpoint the run started from.
            let mut candidate = removed
                .iter()
                .min_by_key(|entry| entry.seq)
                .and_then(|entry| entry.parent_id.clone());
            while let Some(id) = candidate.clone() {
                if !removed_ids.contains(id.as_str()) {
                    break;
                }
                candidate = removed
                    .iter()
                    .find(|entry| entry.id == id)
                    .and_then(|entry| entry.parent_id.clone());
            }
            log.head = candidate;
        }

        Ok(removed.len())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}
