//! Label matching for containers.

use std::collections::HashMap;

use thiserror::Error;

use crate::container::Container;

#[derive(Debug, Error)]
#[error("invalid filter pattern: {0}")]
pub struct FilterError(String);

/// Matches containers carrying a required set of label values. An empty
/// filter matches every container.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    labels: HashMap<String, String>,
}

impl Filter {
    /// A filter requiring all of `labels` to be present and equal.
    pub fn new(labels: HashMap<String, String>) -> Self {
        Filter { labels }
    }

    /// Parse a filter from a `label1=value1,label2=value2,...` pattern.
    /// The empty pattern matches everything.
    pub fn parse(pattern: &str) -> Result<Self, FilterError> {
        if pattern.is_empty() {
            return Ok(Filter::default());
        }
        let mut labels = HashMap::new();
        for pair in pattern.split(',') {
            match pair.split_once('=') {
                Some((label, value)) => {
                    labels.insert(label.to_string(), value.to_string());
                }
                None => return Err(FilterError(pattern.to_string())),
            }
        }
        Ok(Filter { labels })
    }

    pub fn matches(&self, container: &Container) -> bool {
        self.labels
            .iter()
            .all(|(label, value)| container.labels.get(label) == Some(value))
    }
}
