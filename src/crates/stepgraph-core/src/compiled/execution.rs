//! Graph execution methods (invoke, resume)

use super::{CompiledGraph, RunOutcome};
use crate::error::Result;
use crate::pregel::{CancelFlag, PregelLoop, RunContext};
use serde_json::Value;
use stepgraph_checkpoint::CheckpointConfig;
use tracing::Instrument;

impl CompiledGraph {
    /// Run the graph once, without a thread.
    ///
    /// Graphs compiled with a checkpointer need a thread; use
    /// [`invoke_with_config`](Self::invoke_with_config) for them.
    ///
    /// ```rust
    /// use stepgraph_core::{StateGraph, StateSchema, Reducer, START, END};
    /// use serde_json::json;
    ///
    /// # async fn example() -> stepgraph_core::Result<()> {
    /// let mut graph = StateGraph::new(StateSchema::new().field("total", Reducer::Sum));
    /// graph.add_node("add_one", |_| Box::pin(async { Ok(json!({"total": 1})) }));
    /// graph.add_edge(START, "add_one").add_edge("add_one", END);
    ///
    /// let outcome = graph.compile()?.invoke(json!({"total": 41})).await?;
    /// assert_eq!(outcome.values["total"], 42);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn invoke(&self, input: Value) -> Result<RunOutcome> {
        self.invoke_with_config(Some(input), &CheckpointConfig::new())
            .await
    }

    /// Run the graph on the thread addressed by `config`.
    ///
    /// - `Some(input)`: fold the input into the thread's latest state (or
    ///   the checkpoint named by `checkpoint_id`, which forks) and start from
    ///   `START`.
    /// - `None`: continue the pending tasks of the addressed checkpoint. This
    ///   is how an interrupted thread is resumed, and how a past checkpoint
    ///   is replayed.
    pub async fn invoke_with_config(
        &self,
        input: Option<Value>,
        config: &CheckpointConfig,
    ) -> Result<RunOutcome> {
        self.run_with(input, config, RunContext::new()).await
    }

    /// Continue an interrupted thread; same as `invoke_with_config(None, config)`
    pub async fn resume(&self, config: &CheckpointConfig) -> Result<RunOutcome> {
        self.invoke_with_config(None, config).await
    }

    /// Run with a caller-owned cancellation flag. The run stops at the next
    /// superstep boundary after the flag is set.
    pub async fn invoke_cancellable(
        &self,
        input: Option<Value>,
        config: &CheckpointConfig,
        run_id: &str,
        cancel: CancelFlag,
    ) -> Result<RunOutcome> {
        let run = RunContext::new().with_run_id(run_id).with_cancel(cancel);
        self.run_with(input, config, run).await
    }

    pub(crate) async fn run_with(
        &self,
        input: Option<Value>,
        config: &CheckpointConfig,
        run: RunContext,
    ) -> Result<RunOutcome> {
        let span = tracing::info_span!(
            "graph_run",
            run_id = %run.run_id,
            thread_id = config.thread_id.as_deref().unwrap_or("-"),
            resume = input.is_none(),
        );

        async move {
            let pregel = PregelLoop::start(self, input, config, run).await?;
            pregel.run().await
        }
        .instrument(span)
        .await
    }
}
