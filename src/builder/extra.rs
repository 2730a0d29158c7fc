//! Opaque extra parameters merged into a request body

use crate::api::QianfanError;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraParameterBuilder {
    params: Map<String, Value>,
    /// First value that failed to serialize, reported by `build`
    error: Option<String>,
}

impl ExtraParameterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one parameter; a later value for the same key replaces the earlier.
    ///
    /// A value that does not serialize makes [`build`](Self::build) fail.
    pub fn add(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.params.insert(key, value);
            }
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(format!("extra parameter {} is not serializable: {}", key, e));
                }
            }
        }
        self
    }

    /// Merge a whole mapping
    pub fn extend<I, K>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn build(self) -> Result<Map<String, Value>, QianfanError> {
        match self.error {
            Some(message) => Err(QianfanError::validation(message)),
            None => Ok(self.params),
        }
    }
}
