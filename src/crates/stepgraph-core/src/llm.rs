//! Model calls
//!
//! The engine does not talk to any model provider. A node that needs a model
//! holds an `Arc<dyn ChatModel>` and calls it; providers implement the trait.
//!
//! [`ScriptedChatModel`] answers from a fixed script and is what the tests
//! and the demo binary use.
//!
//! ```rust
//! use stepgraph_core::llm::{ChatModel, ScriptedChatModel};
//! use stepgraph_core::messages::Message;
//!
//! # async fn example() -> stepgraph_core::Result<()> {
//! let model = ScriptedChatModel::new(vec![Message::ai("hello there")]);
//! let reply = model.invoke(&[Message::human("hi")]).await?;
//! assert_eq!(reply.content, "hello there");
//! # Ok(())
//! # }
//! ```

use crate::error::{GraphError, Result};
use crate::graph::NodeFuture;
use crate::messages::{messages_from_value, Message};
use crate::runtime::{NodeContext, StreamWriter};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Answer the conversation with one message
    async fn invoke(&self, messages: &[Message]) -> Result<Message>;

    /// Answer while emitting token chunks through `writer`.
    ///
    /// The default calls [`invoke`](Self::invoke) and emits the reply
    /// word by word.
    async fn stream(&self, messages: &[Message], writer: &StreamWriter) -> Result<Message> {
        let reply = self.invoke(messages).await?;
        for token in reply.content.split_inclusive(' ') {
            writer.write_message(json!({
                "id": reply.id,
                "content": token,
            }));
        }
        Ok(reply)
    }
}

/// Replays a fixed list of replies, one per call
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<Message>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedChatModel {
    pub fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Conversations seen so far, in call order
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn invoke(&self, messages: &[Message]) -> Result<Message> {
        self.calls.lock().push(messages.to_vec());
        let mut reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| GraphError::custom("scripted model has no replies left"))?;
        reply.ensure_id();
        Ok(reply)
    }
}

/// Node that sends the conversation under `messages_key` to `model` and
/// appends the reply. Token chunks are streamed when `Messages` mode is on.
pub fn model_node(
    model: Arc<dyn ChatModel>,
    messages_key: impl Into<String>,
) -> impl Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static {
    let key = messages_key.into();
    move |state: Value, ctx: NodeContext| -> NodeFuture {
        let model = model.clone();
        let key = key.clone();
        Box::pin(async move {
            let history = messages_from_value(state.get(&key).unwrap_or(&Value::Null))?;
            let reply = model.stream(&history, ctx.writer()).await?;
            Ok(json!({ key: [reply.to_value()] }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageRole, ToolCall};
    use crate::state::StateSchema;
    use crate::stream::StreamMode;
    use crate::{StateGraph, END, START};
    use stepgraph_checkpoint::CheckpointConfig;

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedChatModel::new(vec![Message::ai("one"), Message::ai("two")]);
        assert_eq!(model.invoke(&[]).await.unwrap().content, "one");
        assert_eq!(model.invoke(&[Message::human("again")]).await.unwrap().content, "two");
        assert!(model.invoke(&[]).await.is_err());

        let calls = model.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1][0].content, "again");
    }

    #[tokio::test]
    async fn test_replies_get_ids() {
        let call = ToolCall::new("call_1", "search", json!({"q": "rust"}));
        let model = ScriptedChatModel::new(vec![Message::ai("").with_tool_calls(vec![call])]);
        let reply = model.invoke(&[]).await.unwrap();
        assert!(reply.id.is_some());
        assert!(reply.has_tool_calls());
    }

    #[tokio::test]
    async fn test_model_node_streams_tokens() {
        let model: Arc<dyn ChatModel> =
            Arc::new(ScriptedChatModel::new(vec![Message::ai("hi from the model")]));
        let mut graph = StateGraph::new(StateSchema::messages());
        graph.add_node_with_context("agent", model_node(model, "messages"));
        graph.add_edge(START, "agent").add_edge("agent", END);
        let app = graph.compile().unwrap();

        let chunks = app
            .stream_collect(
                Some(json!({"messages": [Message::human("hello").to_value()]})),
                &CheckpointConfig::new(),
                vec![StreamMode::Messages, StreamMode::Values],
            )
            .await
            .unwrap();

        let tokens: String = chunks
            .iter()
            .filter(|chunk| chunk.mode == StreamMode::Messages)
            .map(|chunk| chunk.data["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tokens, "hi from the model");
        assert!(chunks
            .iter()
            .filter(|chunk| chunk.mode == StreamMode::Messages)
            .all(|chunk| chunk.node.as_deref() == Some("agent")));

        let last = chunks.iter().rev().find(|c| c.mode == StreamMode::Values).unwrap();
        let messages = messages_from_value(&last.data["messages"]).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Ai);
    }
}
