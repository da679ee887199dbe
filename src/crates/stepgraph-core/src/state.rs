//! State schema and per-field reducers
//!
//! Graph state is a JSON object. Nodes never return a whole new state; they
//! return a *partial update* holding only the fields they want to change, and
//! the schema folds that update into the state field by field using the
//! field's [`Reducer`].
//!
//! # Reducers
//!
//! The set of reducers is closed and chosen when the schema is declared:
//!
//! | Reducer | Behavior | Concurrent writers |
//! |---------|----------|--------------------|
//! | [`Reducer::Overwrite`] | last write wins (default) | rejected |
//! | [`Reducer::Append`] | list concatenation | folded |
//! | [`Reducer::Messages`] | append, replace by id, remove by tombstone | folded |
//! | [`Reducer::Sum`] | numeric addition | folded |
//! | [`Reducer::Merge`] | shallow object merge | folded |
//! | [`Reducer::Custom`] | named user fold | folded |
//!
//! Because the reducer kind is known up front, the executor can reject a
//! superstep in which two tasks overwrite the same field instead of silently
//! picking one of them (see [`StateSchema::apply_step`]).
//!
//! # Example
//!
//! ```rust
//! use stepgraph_core::state::{Reducer, StateSchema};
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .field("aggregate", Reducer::Append)
//!     .field("total", Reducer::Sum)
//!     .with_default("total", json!(0));
//!
//! let mut state = schema.defaults();
//! schema.apply(&mut state, &json!({"aggregate": ["a"], "total": 2})).unwrap();
//! schema.apply(&mut state, &json!({"aggregate": ["b"]})).unwrap();
//!
//! assert_eq!(state, json!({"aggregate": ["a", "b"], "total": 2}));
//! ```

use crate::error::GraphError;
use crate::messages::add_messages;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while folding updates into state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// State and updates must be JSON objects
    #[error("{what} must be a JSON object, got {found}")]
    NotAnObject { what: String, found: String },

    #[error("reducer '{reducer}' cannot merge field '{field}': {message}")]
    Reducer {
        reducer: String,
        field: String,
        message: String,
    },

    #[error("messages: {0}")]
    Messages(String),
}

impl StateError {
    pub(crate) fn not_an_object(what: impl Into<String>, found: &Value) -> Self {
        Self::NotAnObject {
            what: what.into(),
            found: json_type(found).to_string(),
        }
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

type FoldFn = dyn Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync;

/// A named, user-supplied associative fold.
///
/// The engine folds every write of a superstep through this function in task
/// order. It must be associative; the engine cannot check that.
#[derive(Clone)]
pub struct CustomReducer {
    name: String,
    fold: Arc<FoldFn>,
}

impl CustomReducer {
    pub fn new<F>(name: impl Into<String>, fold: F) -> Self
    where
        F: Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            fold: Arc::new(fold),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomReducer").field("name", &self.name).finish()
    }
}

/// How writes to one field are combined
#[derive(Debug, Clone, Default)]
pub enum Reducer {
    /// The new value replaces the old one
    #[default]
    Overwrite,
    /// Lists are concatenated, scalars are pushed
    Append,
    /// Message log semantics, see [`add_messages`]
    Messages,
    /// Numeric addition
    Sum,
    /// Shallow object merge
    Merge,
    Custom(CustomReducer),
}

static OVERWRITE: Reducer = Reducer::Overwrite;

impl Reducer {
    pub fn name(&self) -> &str {
        match self {
            Reducer::Overwrite => "overwrite",
            Reducer::Append => "append",
            Reducer::Messages => "messages",
            Reducer::Sum => "sum",
            Reducer::Merge => "merge",
            Reducer::Custom(custom) => custom.name(),
        }
    }

    /// Whether several writes in one superstep may be folded together
    pub fn is_associative(&self) -> bool {
        !matches!(self, Reducer::Overwrite)
    }

    /// Combine the current value of `field` with one update
    pub fn reduce(&self, field: &str, current: &Value, update: &Value) -> Result<Value, StateError> {
        let merged = match self {
            Reducer::Overwrite => Ok(update.clone()),
            Reducer::Append => append(current, update),
            Reducer::Messages => return add_messages(current, update),
            Reducer::Sum => sum(current, update),
            Reducer::Merge => merge(current, update),
            Reducer::Custom(custom) => (custom.fold)(current, update),
        };

        merged.map_err(|message| StateError::Reducer {
            reducer: self.name().to_string(),
            field: field.to_string(),
            message,
        })
    }
}

fn append(current: &Value, update: &Value) -> std::result::Result<Value, String> {
    let mut items = match current {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => return Err(format!("current value is a {}, expected a list", json_type(other))),
    };

    match update {
        Value::Null => return Err("cannot append null".to_string()),
        Value::Array(new_items) => items.extend(new_items.iter().cloned()),
        scalar => items.push(scalar.clone()),
    }

    Ok(Value::Array(items))
}

fn sum(current: &Value, update: &Value) -> std::result::Result<Value, String> {
    if current.is_null() {
        return match update {
            Value::Number(_) => Ok(update.clone()),
            other => Err(format!("cannot add a {}", json_type(other))),
        };
    }

    match (current, update) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                if let Some(total) = a.checked_add(b) {
                    return Ok(Value::from(total));
                }
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => serde_json::Number::from_f64(a + b)
                    .map(Value::Number)
                    .ok_or_else(|| "sum is not a finite number".to_string()),
                _ => Err("operands are not representable as numbers".to_string()),
            }
        }
        (a, b) => Err(format!("cannot add a {} to a {}", json_type(b), json_type(a))),
    }
}

fn merge(current: &Value, update: &Value) -> std::result::Result<Value, String> {
    let mut merged = match current {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => return Err(format!("current value is a {}, expected an object", json_type(other))),
    };

    match update {
        Value::Object(fields) => {
            for (key, value) in fields {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::Object(merged))
        }
        other => Err(format!("cannot merge a {}", json_type(other))),
    }
}

#[derive(Debug, Clone, Default)]
struct FieldSpec {
    reducer: Reducer,
    default: Option<Value>,
}

/// Declares the fields of a graph state and the reducer of each field.
///
/// Fields that are not declared use [`Reducer::Overwrite`].
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    fields: BTreeMap<String, FieldSpec>,
    input_keys: Option<Vec<String>>,
    output_keys: Option<Vec<String>>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema with a single `messages` field using [`Reducer::Messages`]
    pub fn messages() -> Self {
        Self::new()
            .field("messages", Reducer::Messages)
            .with_default("messages", Value::Array(Vec::new()))
    }

    /// Declare a field with its reducer
    pub fn field(mut self, name: impl Into<String>, reducer: Reducer) -> Self {
        self.fields.entry(name.into()).or_default().reducer = reducer;
        self
    }

    /// Value a field takes on a fresh thread
    pub fn with_default(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.entry(name.into()).or_default().default = Some(value);
        self
    }

    /// Restrict which input fields are accepted; other keys are dropped
    pub fn with_input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict which fields are returned to the caller
    pub fn with_output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn reducer(&self, field: &str) -> &Reducer {
        self.fields
            .get(field)
            .map(|spec| &spec.reducer)
            .unwrap_or(&OVERWRITE)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Initial state of a fresh thread
    pub fn defaults(&self) -> Value {
        let fields = self
            .fields
            .iter()
            .filter_map(|(name, spec)| spec.default.clone().map(|value| (name.clone(), value)))
            .collect();
        Value::Object(fields)
    }

    /// Fold one update into `state`.
    ///
    /// Only the fields present in `update` are touched. A `null` update is a
    /// no-op.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<(), StateError> {
        if update.is_null() {
            return Ok(());
        }

        let update_fields = update
            .as_object()
            .ok_or_else(|| StateError::not_an_object("update", update))?;
        let found = json_type(state);
        let Some(state_fields) = state.as_object_mut() else {
            return Err(StateError::NotAnObject {
                what: "state".to_string(),
                found: found.to_string(),
            });
        };

        for (field, value) in update_fields {
            let current = state_fields.get(field).unwrap_or(&Value::Null);
            let merged = self.reducer(field).reduce(field, current, value)?;
            state_fields.insert(field.clone(), merged);
        }

        Ok(())
    }

    /// Fold every update produced by one superstep, in order.
    ///
    /// `updates` pairs each update with the name of the task that wrote it.
    /// When a field with a non-associative reducer is written by more than one
    /// update the whole step is rejected with [`GraphError::InvalidUpdate`] and
    /// `state` is left untouched. Reducer errors leave `state` untouched too.
    pub fn apply_step(&self, state: &mut Value, updates: &[(String, Value)]) -> crate::error::Result<()> {
        let mut writers: HashMap<&str, Vec<String>> = HashMap::new();
        for (writer, update) in updates {
            match update {
                Value::Null => {}
                Value::Object(fields) => {
                    for field in fields.keys() {
                        writers.entry(field.as_str()).or_default().push(writer.clone());
                    }
                }
                other => return Err(StateError::not_an_object("update", other).into()),
            }
        }

        let mut conflicts: Vec<(&str, Vec<String>)> = writers
            .into_iter()
            .filter(|(field, writers)| writers.len() > 1 && !self.reducer(field).is_associative())
            .collect();
        conflicts.sort_by(|a, b| a.0.cmp(b.0));
        if let Some((field, writers)) = conflicts.into_iter().next() {
            return Err(GraphError::InvalidUpdate {
                field: field.to_string(),
                writers,
            });
        }

        let mut next = state.clone();
        for (_, update) in updates {
            self.apply(&mut next, update)?;
        }
        *state = next;
        Ok(())
    }

    /// Keep only the accepted input keys
    pub fn filter_input(&self, input: &Value) -> Value {
        filter_keys(input, self.input_keys.as_deref())
    }

    /// Keep only the declared output keys
    pub fn filter_output(&self, values: &Value) -> Value {
        filter_keys(values, self.output_keys.as_deref())
    }
}

fn filter_keys(value: &Value, keys: Option<&[String]>) -> Value {
    match (value, keys) {
        (Value::Object(fields), Some(keys)) => Value::Object(
            fields
                .iter()
                .filter(|(key, _)| keys.iter().any(|allowed| allowed == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overwrite_is_default() {
        let schema = StateSchema::new();
        let mut state = json!({"foo": 1});
        schema.apply(&mut state, &json!({"foo": 2})).unwrap();
        assert_eq!(state, json!({"foo": 2}));
        assert!(!schema.reducer("foo").is_associative());
    }

    #[test]
    fn test_omitted_fields_are_untouched() {
        let schema = StateSchema::new().field("bar", Reducer::Append);
        let mut state = json!({"foo": 1, "bar": ["a"]});
        schema.apply(&mut state, &json!({"foo": 2})).unwrap();
        assert_eq!(state, json!({"foo": 2, "bar": ["a"]}));
    }

    #[test]
    fn test_append_lists_and_scalars() {
        let schema = StateSchema::new().field("bar", Reducer::Append);
        let mut state = json!({});
        schema.apply(&mut state, &json!({"bar": ["a"]})).unwrap();
        schema.apply(&mut state, &json!({"bar": "b"})).unwrap();
        schema.apply(&mut state, &json!({"bar": ["c", "d"]})).unwrap();
        assert_eq!(state["bar"], json!(["a", "b", "c", "d"]));
    }

    #[test]
    fn test_append_rejects_null_update() {
        let err = Reducer::Append.reduce("bar", &json!([]), &Value::Null).unwrap_err();
        assert!(matches!(err, StateError::Reducer { ref field, .. } if field == "bar"));
    }

    #[test]
    fn test_sum_integers_and_floats() {
        assert_eq!(Reducer::Sum.reduce("n", &json!(2), &json!(3)).unwrap(), json!(5));
        assert_eq!(Reducer::Sum.reduce("n", &Value::Null, &json!(3)).unwrap(), json!(3));
        assert_eq!(Reducer::Sum.reduce("n", &json!(1.5), &json!(1)).unwrap(), json!(2.5));
        assert!(Reducer::Sum.reduce("n", &json!(1), &json!("x")).is_err());
    }

    #[test]
    fn test_merge_objects() {
        let merged = Reducer::Merge
            .reduce("m", &json!({"a": 1, "b": 1}), &json!({"b": 2, "c": 3}))
            .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_custom_reducer() {
        let max = CustomReducer::new("max", |current, update| {
            let a = current.as_i64().unwrap_or(i64::MIN);
            let b = update.as_i64().ok_or("expected an integer")?;
            Ok(json!(a.max(b)))
        });
        let schema = StateSchema::new().field("best", Reducer::Custom(max));
        let mut state = json!({});
        schema
            .apply_step(
                &mut state,
                &[("a".into(), json!({"best": 3})), ("b".into(), json!({"best": 7}))],
            )
            .unwrap();
        assert_eq!(state["best"], json!(7));
        assert_eq!(schema.reducer("best").name(), "max");
    }

    #[test]
    fn test_apply_step_rejects_concurrent_overwrite() {
        let schema = StateSchema::new();
        let mut state = json!({"foo": 0});
        let err = schema
            .apply_step(
                &mut state,
                &[("b".into(), json!({"foo": 1})), ("c".into(), json!({"foo": 2}))],
            )
            .unwrap_err();

        match err {
            GraphError::InvalidUpdate { field, writers } => {
                assert_eq!(field, "foo");
                assert_eq!(writers, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state, json!({"foo": 0}));
    }

    #[test]
    fn test_apply_step_folds_associative_writes_in_order() {
        let schema = StateSchema::new().field("log", Reducer::Append);
        let mut state = json!({"log": ["a"]});
        schema
            .apply_step(
                &mut state,
                &[("b".into(), json!({"log": ["b"]})), ("c".into(), json!({"log": ["c"]}))],
            )
            .unwrap();
        assert_eq!(state["log"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_apply_step_is_atomic_on_reducer_error() {
        let schema = StateSchema::new()
            .field("log", Reducer::Append)
            .field("n", Reducer::Sum);
        let mut state = json!({"log": [], "n": 1});
        let result = schema.apply_step(
            &mut state,
            &[("a".into(), json!({"log": ["a"]})), ("b".into(), json!({"n": "oops"}))],
        );
        assert!(result.is_err());
        assert_eq!(state, json!({"log": [], "n": 1}));
    }

    #[test]
    fn test_defaults_and_key_filters() {
        let schema = StateSchema::new()
            .field("question", Reducer::Overwrite)
            .with_default("answer", json!(""))
            .with_input_keys(["question"])
            .with_output_keys(["answer"]);

        assert_eq!(schema.defaults(), json!({"answer": ""}));
        assert_eq!(
            schema.filter_input(&json!({"question": "q", "answer": "a"})),
            json!({"question": "q"})
        );
        assert_eq!(
            schema.filter_output(&json!({"question": "q", "answer": "a"})),
            json!({"answer": "a"})
        );
    }

    #[test]
    fn test_update_must_be_object() {
        let schema = StateSchema::new();
        let mut state = json!({});
        assert!(matches!(
            schema.apply(&mut state, &json!([1, 2])),
            Err(StateError::NotAnObject { .. })
        ));
    }
}
