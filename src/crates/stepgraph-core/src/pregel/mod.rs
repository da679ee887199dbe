//! Superstep execution engine
//!
//! Execution is divided into **supersteps**:
//!
//! 1. **Plan**: the pending tasks of the current checkpoint are the runnable set
//! 2. **Compute**: every task runs concurrently against the state committed
//!    before the step (or against its private `Send` input)
//! 3. **Barrier**: wait for all tasks of the step
//! 4. **Fold**: updates are folded into the state in task order by the
//!    schema's reducers, atomically
//! 5. **Route**: direct, conditional and join edges of the finished nodes
//!    produce the next runnable set
//! 6. **Checkpoint**: the new state and runnable set are persisted
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Superstep N                                             │
//! │                                                          │
//! │  tasks ──► join_all(node A, node B, ...) ──► apply_step  │
//! │                                                 │        │
//! │                        plan_next(edges, joins) ◄┘        │
//! │                                 │                        │
//! │                          put(checkpoint)                 │
//! └─────────────────────────────────┼────────────────────────┘
//!                                   ▼
//!                 interrupt? ── yes ──► Interrupted
//!                     │ no
//!                 tasks left? ── no ──► Completed
//!                     │ yes
//!                 Superstep N + 1
//! ```
//!
//! A node error aborts the step before anything is committed, so the last
//! checkpoint stays the resume point. A dynamic interrupt commits the
//! siblings' updates and keeps the interrupted tasks pending. Cancellation is
//! only observed between supersteps.

mod algo;
mod loop_impl;

pub(crate) use algo::{carried_pauses, merge_tasks, plan_next, step_writes, unrecorded_breakpoints};
pub(crate) use loop_impl::PregelLoop;

use crate::stream::Emitter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Cooperative stop signal for a running invocation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at its next superstep boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-invocation settings that are not part of the run config
#[derive(Clone)]
pub(crate) struct RunContext {
    pub run_id: String,
    pub cancel: CancelFlag,
    pub emitter: Emitter,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            cancel: CancelFlag::new(),
            emitter: Emitter::disabled(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = emitter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
