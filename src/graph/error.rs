// SPDX-License-Identifier: MIT

//! Errors raised by the graph adapter

use thiserror::Error;

/// Graph-level errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// The template could not be understood
    #[error("Invalid template: {0}")]
    Template(String),

    /// A parameter is missing or cannot be coerced to its declared type
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// Circular dependency between stages
    #[error("Circular dependency detected: {0:?}")]
    CircularDependency(Vec<String>),

    /// Rule id is not in the pending set
    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    /// Rule exists but its predicate does not hold
    #[error("Rule '{0}' is not applicable")]
    NotApplicable(String),

    /// Node id is not part of the graph
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Node has left the DEFINED state already
    #[error("Node '{0}' has already been submitted")]
    AlreadySubmitted(String),

    /// Serialized graph snapshot could not be read or written
    #[error("Corrupt graph snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl GraphError {
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template(message.into())
    }

    pub fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter(message.into())
    }
}
