//! Relation cache: preloaded models indexed by a key field.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::value::{key_fragment, RowDict};

#[derive(Debug, Clone, Default)]
struct CachedModel {
    key: String,
    rows: HashMap<String, RowDict>,
}

/// Rows of preloaded models, looked up by key in O(1).
#[derive(Debug, Clone, Default)]
pub struct RelationCache {
    models: HashMap<String, CachedModel>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index rows of a model by `key_field`. Rows without the key are
    /// ignored; later rows win on duplicate keys.
    pub fn insert_rows<I>(&mut self, model: &str, key_field: &str, rows: I)
    where
        I: IntoIterator<Item = RowDict>,
    {
        let cached = self
            .models
            .entry(model.to_string())
            .or_insert_with(|| CachedModel {
                key: key_field.to_string(),
                rows: HashMap::new(),
            });
        for row in rows {
            if let Some(key) = row.get(key_field).filter(|v| !v.is_null()) {
                cached.rows.insert(key_fragment(key), row);
            }
        }
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Key field a model was indexed by.
    pub fn key_field(&self, model: &str) -> Option<&str> {
        self.models.get(model).map(|m| m.key.as_str())
    }

    /// Number of cached rows for a model.
    pub fn len(&self, model: &str) -> usize {
        self.models.get(model).map_or(0, |m| m.rows.len())
    }

    pub fn is_empty(&self) -> bool {
        self.models.values().all(|m| m.rows.is_empty())
    }

    pub fn get(&self, model: &str, key: &Value) -> Option<&RowDict> {
        self.models.get(model)?.rows.get(&key_fragment(key))
    }

    pub fn contains(&self, model: &str, key: &Value) -> bool {
        self.get(model, key).is_some()
    }

    /// An attribute of the related row.
    pub fn attribute(&self, model: &str, key: &Value, attribute: &str) -> Option<&Value> {
        self.get(model, key)?.get(attribute)
    }
}
