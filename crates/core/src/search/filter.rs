//! Metadata filtering engine for search queries.
//!
//! A filter is a set of key/value pairs combined with AND: a record passes only
//! when its metadata holds every filter key with exactly the filter's value.
//! An empty filter accepts everything.

use crate::error::ValidationError;
use crate::storage::vector_store::Metadata;

/// Validated exact-match filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, String)>,
}

impl MetadataFilter {
    /// Builds a filter, rejecting empty keys.
    pub fn new(filter: &Metadata) -> Result<Self, ValidationError> {
        let mut conditions = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            if key.is_empty() {
                return Err(ValidationError::InvalidFilter(
                    "filter keys must be non-empty".into(),
                ));
            }
            conditions.push((key.clone(), value.clone()));
        }
        conditions.sort_unstable();
        Ok(Self { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    #[inline]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v))
    }
}
