use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Value → alternate literal forms (`"thing" → ["thing", "object"]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Synonyms(BTreeMap<String, Vec<String>>);

impl Synonyms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn insert(&mut self, value: impl Into<String>, alternatives: Vec<String>) {
        self.0.insert(value.into(), alternatives);
    }

    /// Registered alternatives for `value`; `None` when the value has none.
    pub fn alternatives(&self, value: &str) -> Option<&[String]> {
        self.0
            .get(value)
            .map(Vec::as_slice)
            .filter(|alts| !alts.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<String>)> for Synonyms {
    fn from_iter<T: IntoIterator<Item = (K, Vec<String>)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
