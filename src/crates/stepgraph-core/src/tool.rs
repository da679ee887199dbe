//! Tools and the tool-execution node
//!
//! A [`Tool`] is a named async function with a JSON input schema. Tools are
//! collected in a [`ToolRegistry`] and run by a [`ToolNode`], the node kind
//! that answers the tool calls of the last AI message in the log:
//!
//! ```text
//! agent ──(tools_condition)──► tools ──► agent
//!   │
//!   └──► END   (last message has no tool calls)
//! ```
//!
//! For every call the node looks up the tool, checks the arguments against
//! the schema's `required` list, runs it and appends a tool message whose
//! `tool_call_id` is the call's id. Calls of one message run concurrently;
//! results are appended in call order.
//!
//! ```rust
//! use stepgraph_core::tool::{Tool, ToolRegistry};
//! use serde_json::json;
//!
//! let multiply = Tool::new(
//!     "multiply",
//!     "Multiply a and b",
//!     json!({
//!         "type": "object",
//!         "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
//!         "required": ["a", "b"]
//!     }),
//!     |args, _runtime| {
//!         Box::pin(async move {
//!             let a = args["a"].as_i64().unwrap_or_default();
//!             let b = args["b"].as_i64().unwrap_or_default();
//!             Ok(json!(a * b))
//!         })
//!     },
//! );
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(multiply);
//! assert!(registry.has_tool("multiply"));
//! ```

use crate::error::{GraphError, Result};
use crate::graph::END;
use crate::messages::{last_message, Message, ToolCall};
use crate::runtime::NodeContext;
use crate::send::ConditionalEdgeResult;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while resolving or running a tool
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Tool '{tool}' not found. Available tools: {available}")]
    NotFound { tool: String, available: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool '{tool}' execution failed: {message}")]
    Execution { tool: String, message: String },
}

pub type ToolResult = std::result::Result<Value, ToolError>;

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// Tool handler: `(arguments, runtime) -> result`
pub type ToolHandler = Arc<dyn Fn(Value, ToolRuntime) -> ToolFuture + Send + Sync>;

/// What a tool can see while it runs
#[derive(Clone)]
pub struct ToolRuntime {
    /// Graph state at the start of the superstep
    pub state: Value,

    pub tool_call_id: String,

    /// Context of the tool node, when run inside a graph
    pub context: Option<NodeContext>,
}

impl ToolRuntime {
    pub fn new(state: Value, tool_call_id: impl Into<String>) -> Self {
        Self {
            state,
            tool_call_id: tool_call_id.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: NodeContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("state", &self.state)
            .field("tool_call_id", &self.tool_call_id)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// Tool specification
#[derive(Clone)]
pub struct Tool {
    pub name: String,

    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: Value,

    handler: ToolHandler,
}

impl Tool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, ToolRuntime) -> ToolFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
        }
    }

    /// Arguments must be an object holding every `required` property
    pub fn validate_args(&self, args: &Value) -> std::result::Result<(), ToolError> {
        let Some(fields) = args.as_object() else {
            return Err(ToolError::InvalidArguments {
                tool: self.name.clone(),
                message: "arguments must be an object".to_string(),
            });
        };

        let missing: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|required| !fields.contains_key(*required))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ToolError::InvalidArguments {
                tool: self.name.clone(),
                message: format!("missing required field(s): {}", missing.join(", ")),
            })
        }
    }

    pub async fn call(&self, args: Value, runtime: ToolRuntime) -> ToolResult {
        self.validate_args(&args)?;
        (self.handler)(args, runtime).await
    }

    /// Definition handed to a model so it can request this tool
    pub fn schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.input_schema,
        })
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("handler", &"<function>")
            .finish()
    }
}

/// Outcome of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub output: ToolResult,
}

impl ToolCallResult {
    /// Tool message answering the call. Errors are reported as content.
    pub fn to_message(&self) -> Message {
        let content = match &self.output {
            Ok(Value::String(text)) => text.clone(),
            Ok(value) => value.to_string(),
            Err(err) => format!("Error: {}", err),
        };
        Message::tool(content, self.id.clone()).with_name(self.name.clone())
    }
}

/// Tools available to a tool node, by name
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Tool>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool, replacing any tool of the same name
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<Value> {
        self.tools.values().map(Tool::schema).collect()
    }

    pub async fn execute(&self, call: &ToolCall, runtime: ToolRuntime) -> ToolCallResult {
        let output = match self.get(&call.name) {
            Some(tool) => tool.call(call.args.clone(), runtime).await,
            None => Err(ToolError::NotFound {
                tool: call.name.clone(),
                available: self.tool_names().join(", "),
            }),
        };
        ToolCallResult {
            id: call.id.clone(),
            name: call.name.clone(),
            output,
        }
    }

    /// Run every call concurrently; results keep call order
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        state: &Value,
        context: Option<&NodeContext>,
    ) -> Vec<ToolCallResult> {
        let runs = calls.iter().map(|call| {
            let mut runtime = ToolRuntime::new(state.clone(), call.id.clone());
            if let Some(context) = context {
                runtime = runtime.with_context(context.clone());
            }
            self.execute(call, runtime)
        });
        join_all(runs).await
    }
}

/// Node that answers the tool calls of the last message
#[derive(Debug, Clone)]
pub struct ToolNode {
    registry: Arc<ToolRegistry>,
    messages_key: String,
    handle_errors: bool,
}

impl ToolNode {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            messages_key: "messages".to_string(),
            handle_errors: true,
        }
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Tool>) -> Self {
        Self::new(ToolRegistry::from_tools(tools))
    }

    /// State field holding the message log (default `messages`)
    pub fn with_messages_key(mut self, key: impl Into<String>) -> Self {
        self.messages_key = key.into();
        self
    }

    /// When false, the first failing call fails the node instead of being
    /// reported back to the model as an error message
    pub fn with_handle_errors(mut self, handle_errors: bool) -> Self {
        self.handle_errors = handle_errors;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the pending tool calls and return the update appending their
    /// results
    pub async fn invoke(&self, state: &Value, context: Option<&NodeContext>) -> Result<Value> {
        let calls = match last_message(state, &self.messages_key)? {
            Some(message) if message.has_tool_calls() => message.tool_calls,
            _ => {
                return Err(GraphError::Validation(format!(
                    "tool node expects the last message in '{}' to request tool calls",
                    self.messages_key
                )))
            }
        };

        tracing::debug!(calls = calls.len(), "executing tool calls");
        let results = self.registry.execute_all(&calls, state, context).await;

        if !self.handle_errors {
            if let Some(err) = results.iter().find_map(|result| result.output.clone().err()) {
                return Err(err.into());
            }
        }
        for result in &results {
            if let Err(err) = &result.output {
                tracing::warn!(tool = %result.name, error = %err, "tool call failed");
            }
        }

        let messages: Vec<Value> = results
            .iter()
            .map(|result| result.to_message().to_value())
            .collect();
        let mut update = Map::new();
        update.insert(self.messages_key.clone(), Value::Array(messages));
        Ok(Value::Object(update))
    }
}

/// Router for agent loops: `"tools"` when the last message of `messages`
/// requests tool calls, [`END`] otherwise
pub fn tools_condition(state: &Value) -> Result<ConditionalEdgeResult> {
    let wants_tools = last_message(state, "messages")?.is_some_and(|message| message.has_tool_calls());
    Ok(if wants_tools {
        ConditionalEdgeResult::from("tools")
    } else {
        ConditionalEdgeResult::Node(END.to_string())
    })
}
