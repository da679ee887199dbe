//! Streaming execution

use super::CompiledGraph;
use crate::error::GraphError;
use crate::pregel::RunContext;
use crate::stream::{ChunkStream, Emitter, StreamMode};
use serde_json::Value;
use stepgraph_checkpoint::CheckpointConfig;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

impl CompiledGraph {
    /// Run the graph in the background and stream its progress.
    ///
    /// `modes` selects the chunks to produce; an empty list uses the
    /// configured default (`values`). The stream ends when the run completes
    /// or is interrupted. A failing run yields its error as the last item.
    ///
    /// ```rust,no_run
    /// use futures::StreamExt;
    /// use stepgraph_core::{StreamMode, StateGraph, StateSchema, START, END};
    /// use stepgraph_checkpoint::CheckpointConfig;
    /// use serde_json::json;
    ///
    /// # async fn example() -> stepgraph_core::Result<()> {
    /// let mut graph = StateGraph::new(StateSchema::new());
    /// graph.add_node("a", |_| Box::pin(async { Ok(json!({"x": 1})) }));
    /// graph.add_edge(START, "a").add_edge("a", END);
    /// let app = graph.compile()?;
    ///
    /// let mut stream = app.stream(Some(json!({})), &CheckpointConfig::new(), vec![StreamMode::Updates]);
    /// while let Some(chunk) = stream.next().await {
    ///     println!("{:?}", chunk?);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn stream(
        &self,
        input: Option<Value>,
        config: &CheckpointConfig,
        modes: Vec<StreamMode>,
    ) -> ChunkStream {
        let modes = if modes.is_empty() {
            self.settings.stream_mode.clone()
        } else {
            modes
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new(tx, modes);
        let run = RunContext::new().with_emitter(emitter.clone());

        let graph = self.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(err) = graph.run_with(input, &config, run).await {
                tracing::debug!(error = %err, "streamed run failed");
                emitter.fail(err);
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// Stream of full-state values after every superstep
    pub fn stream_values(&self, input: Option<Value>, config: &CheckpointConfig) -> ChunkStream {
        self.stream(input, config, vec![StreamMode::Values])
    }

    /// Collect a whole stream; convenience for tests and demos
    pub async fn stream_collect(
        &self,
        input: Option<Value>,
        config: &CheckpointConfig,
        modes: Vec<StreamMode>,
    ) -> Result<Vec<crate::stream::StreamChunk>, GraphError> {
        use futures::StreamExt;

        let mut stream = self.stream(input, config, modes);
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }
}
