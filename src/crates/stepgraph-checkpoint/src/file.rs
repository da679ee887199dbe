//! File-backed checkpoint saver
//!
//! Every thread gets an append-only journal file in the saver's directory.
//! A journal is a sequence of length-prefixed records, each one a `put` or a
//! `delete_run`, serialized with the saver's [`SerializerProtocol`]:
//!
//! ```text
//! ┌──────────┬───────────────┬──────────┬───────────────┬─────
//! │ len (u32)│ record bytes  │ len (u32)│ record bytes  │ ...
//! └──────────┴───────────────┴──────────┴───────────────┴─────
//! ```
//!
//! The first access to a thread replays its journal into an
//! [`InMemoryCheckpointSaver`], which then answers reads. Replaying the same
//! records in the same order rebuilds the same tree, sequence numbers and
//! head, so forks and rolled-back runs survive a restart.
//!
//! A record cut short by a crash is dropped on replay and the file is
//! truncated back to the last complete record.

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple},
    error::{CheckpointError, Result},
    memory::InMemoryCheckpointSaver,
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const LEN_PREFIX: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JournalRecord {
    Put {
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        #[serde(default)]
        checkpoint_ns: Option<String>,
        #[serde(default)]
        extra: HashMap<String, Value>,
    },
    DeleteRun {
        run_id: String,
    },
}

/// [`CheckpointSaver`] whose threads outlive the process.
///
/// # Example
///
/// ```rust,no_run
/// use stepgraph_checkpoint::{
///     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, FileCheckpointSaver,
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = CheckpointConfig::for_thread("chat-5");
/// {
///     let saver = FileCheckpointSaver::open("./checkpoints").await?;
///     saver.put(&config, Checkpoint::empty(), CheckpointMetadata::new()).await?;
/// }
///
/// // Later, in another process
/// let saver = FileCheckpointSaver::open("./checkpoints").await?;
/// assert!(saver.get_tuple(&config).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileCheckpointSaver<S = JsonSerializer> {
    dir: PathBuf,
    cache: InMemoryCheckpointSaver<S>,
    serializer: S,

    /// Threads whose journal has been replayed into `cache`. The lock also
    /// serializes journal writes.
    loaded: Arc<Mutex<HashSet<String>>>,
}

impl FileCheckpointSaver<JsonSerializer> {
    /// Open (or create) a saver rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_serializer(dir, JsonSerializer::new()).await
    }
}

impl<S: SerializerProtocol + Clone + 'static> FileCheckpointSaver<S> {
    pub async fn open_with_serializer(dir: impl Into<PathBuf>, serializer: S) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            cache: InMemoryCheckpointSaver::with_serializer(serializer.clone()),
            serializer,
            loaded: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn journal_path(&self, thread_id: &str) -> PathBuf {
        // Thread ids are caller-defined; hex keeps them valid file names
        let mut name: String = thread_id.bytes().map(|byte| format!("{:02x}", byte)).collect();
        name.push_str(".journal");
        self.dir.join(name)
    }

    async fn ensure_loaded(&self, thread_id: &str) -> Result<()> {
        let mut loaded = self.loaded.lock().await;
        self.load_locked(&mut loaded, thread_id).await
    }

    async fn load_locked(&self, loaded: &mut HashSet<String>, thread_id: &str) -> Result<()> {
        if loaded.contains(thread_id) {
            return Ok(());
        }

        let path = self.journal_path(thread_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let (frames, intact) = split_frames(&bytes);
        if intact < bytes.len() {
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(intact as u64).await?;
        }

        for frame in frames {
            let record: JournalRecord = self.serializer.loads(frame)?;
            self.replay(thread_id, record).await?;
        }

        loaded.insert(thread_id.to_string());
        Ok(())
    }

    async fn replay(&self, thread_id: &str, record: JournalRecord) -> Result<()> {
        match record {
            JournalRecord::Put {
                checkpoint,
                metadata,
                checkpoint_ns,
                extra,
            } => {
                let config = CheckpointConfig {
                    thread_id: Some(thread_id.to_string()),
                    checkpoint_id: None,
                    checkpoint_ns,
                    extra,
                };
                self.cache.put(&config, checkpoint, metadata).await?;
            }
            JournalRecord::DeleteRun { run_id } => {
                self.cache.delete_run(thread_id, &run_id).await?;
            }
        }
        Ok(())
    }

    async fn append(&self, thread_id: &str, record: &JournalRecord) -> Result<()> {
        let payload = self.serializer.dumps(record)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            CheckpointError::Storage(format!("journal record of {} bytes is too large", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path(thread_id))
            .await?;
        file.write_all(&frame).await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// Complete frames of a journal and the length of the bytes they cover
fn split_frames(bytes: &[u8]) -> (Vec<&[u8]>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;
    while bytes.len() - offset >= LEN_PREFIX {
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&bytes[offset..offset + LEN_PREFIX]);
        let len = u32::from_le_bytes(prefix) as usize;

        let start = offset + LEN_PREFIX;
        if bytes.len() - start < len {
            break;
        }
        frames.push(&bytes[start..start + len]);
        offset = start + len;
    }
    (frames, offset)
}

#[async_trait]
impl<S: SerializerProtocol + Clone + 'static> CheckpointSaver for FileCheckpointSaver<S> {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        self.ensure_loaded(config.require_thread_id()?).await?;
        self.cache.get_tuple(config).await
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: Option<HashMap<String, Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        self.ensure_loaded(config.require_thread_id()?).await?;
        self.cache.list(config, filter, before, limit).await
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.require_thread_id()?;
        let mut loaded = self.loaded.lock().await;
        self.load_locked(&mut loaded, thread_id).await?;

        // Validate before journaling so replay never meets a rejected record
        if let Some(parent_id) = &checkpoint.parent_id {
            let parent = config.clone().with_checkpoint_id(parent_id.clone());
            if self.cache.get_tuple(&parent).await?.is_none() {
                return Err(CheckpointError::Invalid(format!(
                    "parent checkpoint {} does not belong to thread {}",
                    parent_id, thread_id
                )));
            }
        }

        let record = JournalRecord::Put {
            checkpoint: checkpoint.clone(),
            metadata: metadata.clone(),
            checkpoint_ns: config.checkpoint_ns.clone(),
            extra: config.extra.clone(),
        };
        self.append(thread_id, &record).await?;
        self.cache.put(config, checkpoint, metadata).await
    }

    async fn head(&self, thread_id: &str) -> Result<Option<CheckpointId>> {
        self.ensure_loaded(thread_id).await?;
        self.cache.head(thread_id).await
    }

    async fn delete_run(&self, thread_id: &str, run_id: &str) -> Result<usize> {
        let mut loaded = self.loaded.lock().await;
        self.load_locked(&mut loaded, thread_id).await?;

        let removed = self.cache.delete_run(thread_id, run_id).await?;
        if removed > 0 {
            let record = JournalRecord::DeleteRun {
                run_id: run_id.to_string(),
            };
            if let Err(err) = self.append(thread_id, &record).await {
                // Reload from disk on next access; the journal is the truth
                self.cache.delete_thread(thread_id).await?;
                loaded.remove(thread_id);
                return Err(err);
            }
        }
        Ok(removed)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut loaded = self.loaded.lock().await;
        match fs::remove_file(self.journal_path(thread_id)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.cache.delete_thread(thread_id).await?;
        loaded.insert(thread_id.to_string());
        Ok(())
    }
}
