// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Equality-based label selectors.
//!
//! Every list the operator issues is scoped by labels (the sentinel label for pods,
//! the back-reference labels for cleanup). [`LabelQuery`] renders the `labelSelector`
//! string sent to the API server and evaluates the same selector in memory, so
//! test doubles and watch filters agree with the server on what matches.
//!
//! # Example
//!
//! ```rust
//! use sidetor::selector::LabelQuery;
//! use std::collections::BTreeMap;
//!
//! let query = LabelQuery::parse("tor=hide-me").unwrap();
//! let mut labels = BTreeMap::new();
//! labels.insert("tor".to_string(), "hide-me".to_string());
//! assert!(query.matches(&labels));
//! assert_eq!(query.to_string(), "tor=hide-me");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing a `key=value[,key=value]` selector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorParseError {
    /// A term was not of the form `key=value`.
    #[error("invalid selector term '{term}': expected key=value")]
    InvalidTerm {
        /// The offending term.
        term: String,
    },

    /// The selector contained no terms.
    #[error("label selector must not be empty")]
    Empty,
}

/// Conjunction of `key=value` label requirements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelQuery {
    match_labels: BTreeMap<String, String>,
}

impl LabelQuery {
    /// Empty selector, matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key=value` requirement.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Parse a comma-separated list of `key=value` terms.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorParseError`] when the input is empty or a term lacks `=`,
    /// a key or a value.
    pub fn parse(selector: &str) -> Result<Self, SelectorParseError> {
        let mut query = Self::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty() && !v.contains('='))
                .ok_or_else(|| SelectorParseError::InvalidTerm {
                    term: term.to_string(),
                })?;
            query = query.with(key, value);
        }
        if query.is_empty() {
            return Err(SelectorParseError::Empty);
        }
        Ok(query)
    }

    /// True when the selector has no requirements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    /// The `key=value` requirements, sorted by key.
    #[must_use]
    pub fn requirements(&self) -> &BTreeMap<String, String> {
        &self.match_labels
    }

    /// Evaluate the selector against a label set.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl fmt::Display for LabelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&terms.join(","))
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
