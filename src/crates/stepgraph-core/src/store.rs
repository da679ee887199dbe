//! Long-term, cross-thread key-value store
//!
//! Checkpoints belong to one thread. Data that must outlive a thread (user
//! preferences, learned facts) goes into a [`Store`] instead. Items are
//! addressed by a hierarchical namespace plus a key:
//!
//! ```text
//! ("user-123", "memories") / "favorite-food" -> {"food": "pizza"}
//! ("user-123", "memories") / "hometown"      -> {"city": "Lisbon"}
//! ("user-456", "memories") / "favorite-food" -> {"food": "ramen"}
//! ```
//!
//! Writes overwrite (last write wins per key); there are no reducers and no
//! cross-key transactions. [`Store::search`] scans every item whose namespace
//! starts with a prefix.
//!
//! Nodes reach the store through
//! [`NodeContext::store`](crate::runtime::NodeContext::store) when the graph
//! was compiled with one.
//!
//! ```rust
//! use stepgraph_core::store::{namespace, InMemoryStore, SearchQuery, Store};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStore::new();
//! let ns = namespace(["user-123", "memories"]);
//!
//! store.put(&ns, "food", json!({"food": "pizza"})).await?;
//! store.put(&ns, "city", json!({"city": "Lisbon"})).await?;
//!
//! let hits = store.search(&namespace(["user-123"]), &SearchQuery::new().with_query("pizza")).await?;
//! assert_eq!(hits.len(), 1);
//! assert_eq!(hits[0].key, "food");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Hierarchical namespace, outermost label first
pub type Namespace = Vec<String>;

/// Build a namespace from labels
pub fn namespace<I, S>(labels: I) -> Namespace
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    labels.into_iter().map(Into::into).collect()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("invalid namespace {0:?}: namespaces need at least one label and no empty labels")]
    InvalidNamespace(Namespace),

    #[error("invalid key: keys must not be empty")]
    InvalidKey,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A stored value with its address and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Namespace,
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters of [`Store::search`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Case-insensitive substring matched against the serialized value
    pub query: Option<String>,
    /// Top-level value fields that must be equal
    pub filter: HashMap<String, Value>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: None,
            filter: HashMap::new(),
            limit: 10,
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter.insert(field.into(), value);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn matches(&self, item: &Item) -> bool {
        let filter_ok = self
            .filter
            .iter()
            .all(|(field, expected)| item.value.get(field) == Some(expected));
        let query_ok = self.query.as_ref().map_or(true, |query| {
            item.value
                .to_string()
                .to_lowercase()
                .contains(&query.to_lowercase())
        });
        filter_ok && query_ok
    }
}

/// Namespaced key-value store shared by all threads
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite a value
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<(), StoreError>;

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Item>, StoreError>;

    /// Returns whether the item existed
    async fn delete(&self, namespace: &[String], key: &str) -> Result<bool, StoreError>;

    /// Items under `prefix`, ordered by namespace then key
    async fn search(&self, prefix: &[String], query: &SearchQuery) -> Result<Vec<Item>, StoreError>;

    /// Distinct namespaces under `prefix`, truncated to `max_depth` labels
    async fn list_namespaces(
        &self,
        prefix: &[String],
        max_depth: Option<usize>,
    ) -> Result<Vec<Namespace>, StoreError>;
}

fn validate(namespace: &[String], key: &str) -> Result<(), StoreError> {
    if namespace.is_empty() || namespace.iter().any(String::is_empty) {
        return Err(StoreError::InvalidNamespace(namespace.to_vec()));
    }
    if key.is_empty() {
        return Err(StoreError::InvalidKey);
    }
    Ok(())
}

type ItemMap = BTreeMap<(Namespace, String), Item>;

/// Thread-safe in-memory [`Store`]
#[derive(Clone, Default)]
pub struct InMemoryStore {
    items: Arc<RwLock<ItemMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<(), StoreError> {
        validate(namespace, key)?;
        let now = Utc::now();
        let mut items = self.items.write();

        let address = (namespace.to_vec(), key.to_string());
        match items.get_mut(&address) {
            Some(item) => {
                item.value = value;
                item.updated_at = now;
            }
            None => {
                let item = Item {
                    namespace: address.0.clone(),
                    key: address.1.clone(),
                    value,
                    created_at: now,
                    updated_at: now,
                };
                items.insert(address, item);
            }
        }
        Ok(())
    }

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Item>, StoreError> {
        validate(namespace, key)?;
        Ok(self
            .items
            .read()
            .get(&(namespace.to_vec(), key.to_string()))
            .cloned())
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<bool, StoreError> {
        validate(namespace, key)?;
        Ok(self
            .items
            .write()
            .remove(&(namespace.to_vec(), key.to_string()))
            .is_some())
    }

    async fn search(&self, prefix: &[String], query: &SearchQuery) -> Result<Vec<Item>, StoreError> {
        let items = self.items.read();
        Ok(items
            .values()
            .filter(|item| item.namespace.starts_with(prefix))
            .filter(|item| query.matches(item))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn list_namespaces(
        &self,
        prefix: &[String],
        max_depth: Option<usize>,
    ) -> Result<Vec<Namespace>, StoreError> {
        let items = self.items.read();
        let namespaces: BTreeSet<Namespace> = items
            .keys()
            .filter(|(namespace, _)| namespace.starts_with(prefix))
            .map(|(namespace, _)| match max_depth {
                Some(depth) => namespace.iter().take(depth).cloned().collect(),
                None => namespace.clone(),
            })
            .collect();
        Ok(namespaces.into_iter().collect())
    }
}
