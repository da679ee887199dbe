//! # stepgraph-checkpoint - State Persistence for Graph Execution
//!
//! Checkpoint data model and persistence trait for the stepgraph engine.
//! Checkpoints are immutable snapshots of a thread's state, written after the
//! input of an invocation is applied, after every superstep and after every
//! manual state update. They make it possible to:
//!
//! - **Resume** an interrupted thread exactly where it stopped
//! - **Replay** a thread from any prior checkpoint
//! - **Fork** a thread by editing an older checkpoint
//! - **Roll back** every checkpoint written by a cancelled run
//!
//! ## Core Concepts
//!
//! ### Checkpoint tree
//!
//! Every [`Checkpoint`] names its parent, so the checkpoints of one thread form
//! a tree. The saver keeps a head pointer per thread: the checkpoint that a
//! new invocation resumes from. Writing a child of a checkpoint that is not
//! the head starts a new branch and moves the head onto it; the old branch
//! stays retrievable by id.
//!
//! ### CheckpointSaver
//!
//! [`CheckpointSaver`] is the persistence backend trait:
//!
//! - **`put()`** - store a snapshot, assign its sequence number, move the head
//! - **`get_tuple()`** - fetch the head or a specific checkpoint
//! - **`list()`** - history of a thread, newest first
//! - **`delete_run()`** - drop everything a run wrote (rollback)
//!
//! Two implementations are bundled: [`InMemoryCheckpointSaver`] for tests and
//! single-process use, and [`FileCheckpointSaver`], which journals every
//! thread to a file so threads survive a restart. Other backends only need to
//! implement the trait.
//!
//! ## Quick Start
//!
//! ```rust
//! use stepgraph_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
//!     InMemoryCheckpointSaver,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//! let config = CheckpointConfig::for_thread("thread-123");
//!
//! let root = Checkpoint::new(json!({"count": 1}));
//! let saved = saver
//!     .put(&config, root.clone(), CheckpointMetadata::new().with_source(CheckpointSource::Input))
//!     .await?;
//!
//! let mut next = root.child();
//! next.values = json!({"count": 2});
//! saver
//!     .put(&config, next, CheckpointMetadata::new().with_source(CheckpointSource::Loop))
//!     .await?;
//!
//! // The head moved, the first checkpoint is still addressable.
//! let head = saver.get_tuple(&config).await?.expect("head");
//! assert_eq!(head.checkpoint.values, json!({"count": 2}));
//! let first = saver.get_tuple(&saved).await?.expect("root");
//! assert_eq!(first.checkpoint.values, json!({"count": 1}));
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple, InterruptWhen, PendingInterrupt, PendingTask,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointSaver;
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::{CheckpointSaver, CheckpointStream};
