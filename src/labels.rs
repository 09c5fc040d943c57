//! Custom label overlay.
//!
//! The overlay is the fixed label set given on the command line and injected
//! into every pushed sample. It always wins over labels of the same name that
//! come from the scrape, the target or the job.

use std::collections::{BTreeMap, HashSet};

use crate::config::{ConfigError, validate_label_name};

/// A set of label name/value pairs with unique names.
pub type LabelSet = BTreeMap<String, String>;

/// Ordered parallel sequences of custom label names and values.
///
/// Invariant: `names.len() == values.len()`, names are valid and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelOverlay {
    names: Vec<String>,
    values: Vec<String>,
}

impl LabelOverlay {
    /// Build an overlay from parallel name and value lists.
    ///
    /// # Errors
    /// Returns `ConfigError::LabelMismatch` when the lists differ in length and
    /// `ConfigError::ValidationError` for invalid or duplicate names.
    pub fn new(names: Vec<String>, values: Vec<String>) -> Result<Self, ConfigError> {
        if names.len() != values.len() {
            return Err(ConfigError::LabelMismatch {
                names: names.len(),
                values: values.len(),
            });
        }

        let mut seen = HashSet::new();
        for name in &names {
            validate_label_name(name)
                .map_err(|e| ConfigError::ValidationError(format!("custom labels: {}", e)))?;
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "custom labels: duplicate label name '{}'",
                    name
                )));
            }
        }

        Ok(Self { names, values })
    }

    /// Parse the comma-separated name and value lists from the command line.
    ///
    /// An empty name list means no overlay, whatever the values say.
    /// Otherwise both lists are split on `,` and items are trimmed, so an
    /// empty value list is one empty value.
    pub fn parse(names: &str, values: &str) -> Result<Self, ConfigError> {
        if names.trim().is_empty() {
            return Ok(Self::default());
        }
        let split = |s: &str| -> Vec<String> {
            s.split(',').map(|item| item.trim().to_string()).collect()
        };
        Self::new(split(names), split(values))
    }

    /// Number of labels in the overlay.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no custom labels are configured.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Label names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Label values in configuration order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Overlay names that already exist in `labels`.
    pub fn collisions<'a>(&'a self, labels: &LabelSet) -> Vec<&'a str> {
        self.names
            .iter()
            .filter(|name| labels.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Write the overlay into `labels`, replacing existing values.
    pub fn apply(&self, labels: &mut LabelSet) {
        for (name, value) in self.iter() {
            labels.insert(name.to_string(), value.to_string());
        }
    }
}

impl std::fmt::Display for LabelOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        write!(f, "{{{}}}", pairs.join(","))
    }
}
