//! Chat messages and the message-log reducer
//!
//! Conversational graphs keep their history in a `messages` field declared
//! with [`Reducer::Messages`](crate::state::Reducer::Messages). That reducer is
//! implemented by [`add_messages`], which works directly on the JSON stored in
//! the state:
//!
//! - new messages are appended, in order
//! - a message whose `id` matches an existing message replaces it in place
//! - a [`RemoveMessage`] tombstone deletes the message with that id
//! - [`RemoveMessage::remove_all`] clears the log; later items in the same
//!   update are appended to the empty log
//!
//! Messages without an id are given a fresh UUID when they are added, so
//! every stored message can later be replaced or removed.
//!
//! ```rust
//! use stepgraph_core::messages::{add_messages, Message, RemoveMessage};
//! use serde_json::json;
//!
//! let log = add_messages(&json!([]), &json!([
//!     Message::human("hi").with_id("1").to_value(),
//!     Message::ai("hello").with_id("2").to_value(),
//! ])).unwrap();
//!
//! // Replace message 2, drop message 1
//! let log = add_messages(&log, &json!([
//!     Message::ai("hello there").with_id("2").to_value(),
//!     RemoveMessage::new("1").to_value(),
//! ])).unwrap();
//!
//! assert_eq!(log.as_array().unwrap().len(), 1);
//! assert_eq!(log[0]["content"], "hello there");
//! ```

use crate::state::{json_type, StateError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    #[serde(alias = "user")]
    Human,
    #[serde(alias = "assistant")]
    Ai,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub role: MessageRole,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Calls requested by an AI message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call answered by a tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Ai, content)
    }

    /// Result of the tool call `tool_call_id`
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::new(MessageRole::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn ensure_id(&mut self) {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Map::new();
        if let Some(id) = &self.id {
            fields.insert("id".into(), json!(id));
        }
        fields.insert("role".into(), json!(self.role));
        fields.insert("content".into(), json!(self.content));
        if let Some(name) = &self.name {
            fields.insert("name".into(), json!(name));
        }
        if !self.tool_calls.is_empty() {
            fields.insert("tool_calls".into(), json!(self.tool_calls));
        }
        if let Some(call_id) = &self.tool_call_id {
            fields.insert("tool_call_id".into(), json!(call_id));
        }
        Value::Object(fields)
    }
}

/// Tombstone that deletes a message from the log when passed to
/// [`add_messages`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveMessage {
    pub id: String,
}

impl RemoveMessage {
    /// Id that clears the whole log
    pub const REMOVE_ALL: &'static str = "__remove_all__";

    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn remove_all() -> Self {
        Self::new(Self::REMOVE_ALL)
    }

    pub fn to_value(&self) -> Value {
        json!({"type": "remove", "id": self.id})
    }

    /// Recognize a tombstone in raw JSON
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("type").and_then(Value::as_str) != Some("remove") {
            return None;
        }
        value.get("id").and_then(Value::as_str).map(Self::new)
    }
}

fn as_items(value: &Value, what: &str) -> Result<Vec<Value>, StateError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.clone()),
        Value::Object(_) => Ok(vec![value.clone()]),
        Value::String(text) => Ok(vec![Message::human(text.as_str()).to_value()]),
        other => Err(StateError::Messages(format!(
            "{} must be a message or a list of messages, got {}",
            what,
            json_type(other)
        ))),
    }
}

fn message_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

fn with_id(mut value: Value) -> Value {
    if let Value::Object(fields) = &mut value {
        if !fields.get("id").is_some_and(Value::is_string) {
            fields.insert("id".into(), json!(Uuid::new_v4().to_string()));
        }
    }
    value
}

/// Message-log reducer.
///
/// `current` is the stored log (or `null`), `update` is a message, a list of
/// messages and tombstones, or a plain string taken as a human message.
/// Removing an id that is not in the log is an error.
pub fn add_messages(current: &Value, update: &Value) -> Result<Value, StateError> {
    let mut merged: Vec<Value> = as_items(current, "current value")?
        .into_iter()
        .map(with_id)
        .collect();

    for item in as_items(update, "update")? {
        if let Some(remove) = RemoveMessage::from_value(&item) {
            if remove.id == RemoveMessage::REMOVE_ALL {
                merged.clear();
                continue;
            }
            let position = merged
                .iter()
                .position(|existing| message_id(existing) == Some(remove.id.as_str()))
                .ok_or_else(|| {
                    StateError::Messages(format!(
                        "cannot remove message '{}': no message with that id",
                        remove.id
                    ))
                })?;
            merged.remove(position);
            continue;
        }

        let item = with_id(item);
        let existing = message_id(&item).and_then(|id| {
            merged
                .iter()
                .position(|existing| message_id(existing) == Some(id))
        });
        match existing {
            Some(position) => merged[position] = item,
            None => merged.push(item),
        }
    }

    Ok(Value::Array(merged))
}

/// Parse a stored message log
pub fn messages_from_value(value: &Value) -> Result<Vec<Message>, StateError> {
    as_items(value, "messages")?
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| StateError::Messages(format!("malformed message: {}", e)))
        })
        .collect()
}

/// Last message of the log stored under `key`, if any
pub fn last_message(state: &Value, key: &str) -> Result<Option<Message>, StateError> {
    let messages = state.get(key).map(messages_from_value).transpose()?;
    Ok(messages.and_then(|mut messages| messages.pop()))
}

/// Selection criteria for [`filter_messages`]. Empty lists select everything.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub include_roles: Vec<MessageRole>,
    pub exclude_roles: Vec<MessageRole>,
    pub include_names: Vec<String>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_roles(mut self, roles: impl IntoIterator<Item = MessageRole>) -> Self {
        self.include_roles.extend(roles);
        self
    }

    pub fn exclude_roles(mut self, roles: impl IntoIterator<Item = MessageRole>) -> Self {
        self.exclude_roles.extend(roles);
        self
    }

    pub fn include_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.include_names.extend(names.into_iter().map(Into::into));
        self
    }

    fn accepts(&self, message: &Message) -> bool {
        let role_ok = self.include_roles.is_empty() || self.include_roles.contains(&message.role);
        let name_ok = self.include_names.is_empty()
            || message
                .name
                .as_ref()
                .is_some_and(|name| self.include_names.contains(name));
        role_ok && name_ok && !self.exclude_roles.contains(&message.role)
    }
}

pub fn filter_messages(messages: &[Message], filter: &MessageFilter) -> Vec<Message> {
    messages
        .iter()
        .filter(|message| filter.accepts(message))
        .cloned()
        .collect()
}

/// Which end of the history [`trim_messages`] keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimStrategy {
    First,
    Last,
}

#[derive(Debug, Clone)]
pub struct TrimOptions {
    pub max_messages: usize,
    pub strategy: TrimStrategy,
    /// Keep a leading system message on top of `max_messages`
    pub include_system: bool,
    /// Drop leading non-human messages after trimming
    pub start_on_human: bool,
}

impl TrimOptions {
    pub fn last(max_messages: usize) -> Self {
        Self {
            max_messages,
            strategy: TrimStrategy::Last,
            include_system: true,
            start_on_human: true,
        }
    }

    pub fn first(max_messages: usize) -> Self {
        Self {
            strategy: TrimStrategy::First,
            ..Self::last(max_messages)
        }
    }

    pub fn with_include_system(mut self, include: bool) -> Self {
        self.include_system = include;
        self
    }

    pub fn with_start_on_human(mut self, start_on_human: bool) -> Self {
        self.start_on_human = start_on_human;
        self
    }
}

/// Shrink a history to fit a context window
pub fn trim_messages(messages: &[Message], options: &TrimOptions) -> Vec<Message> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if options.include_system && first.role == MessageRole::System => {
            (Some(first.clone()), rest)
        }
        _ => (None, messages),
    };

    let kept = match options.strategy {
        TrimStrategy::Last => &rest[rest.len().saturating_sub(options.max_messages)..],
        TrimStrategy::First => &rest[..rest.len().min(options.max_messages)],
    };

    let kept = if options.start_on_human {
        let start = kept
            .iter()
            .position(|message| message.role == MessageRole::Human)
            .unwrap_or(kept.len());
        &kept[start..]
    } else {
        kept
    };

    system.into_iter().chain(kept.iter().cloned()).collect()
}
