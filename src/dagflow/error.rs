// SPDX-License-Identifier: MIT

//! Typed error handling for the orchestration engine

use thiserror::Error;

use crate::graph::GraphError;

/// Top-level error type for dagflow operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown workflow id
    #[error("Workflow '{0}' not found")]
    NotFound(String),

    /// Missing or ill-typed template parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rule batch contains an ineligible or duplicate id
    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// Node batch contains an ineligible or duplicate id
    #[error("Invalid node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },

    /// Template could not be retrieved or parsed
    #[error("Failed to fetch template: {0}")]
    TemplateFetch(String),

    /// Identifier collision on insert
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Configuration errors (invalid env vars or flags)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph adapter failures that are not caller mistakes
    #[error("Graph error: {0}")]
    Graph(GraphError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_node(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNode {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn template_fetch(message: impl Into<String>) -> Self {
        Self::TemplateFetch(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Parameter(message) => Self::Validation(message),
            GraphError::Template(_) | GraphError::CircularDependency(_) => {
                Self::TemplateFetch(err.to_string())
            }
            other => Self::Graph(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_mapping() {
        let err: EngineError = GraphError::parameter("missing value").into();
        assert!(matches!(err, EngineError::Validation(_)));

        let err: EngineError = GraphError::template("bad").into();
        assert!(matches!(err, EngineError::TemplateFetch(_)));

        let err: EngineError = GraphError::CircularDependency(vec!["a".into()]).into();
        assert!(matches!(err, EngineError::TemplateFetch(_)));

        let err: EngineError = GraphError::UnknownNode("n".into()).into();
        assert!(matches!(err, EngineError::Graph(_)));
    }

    #[test]
    fn test_display() {
        let err = EngineError::invalid_rule("prepare", "not applicable");
        assert_eq!(err.to_string(), "Invalid rule 'prepare': not applicable");
        assert_eq!(
            EngineError::not_found("abc").to_string(),
            "Workflow 'abc' not found"
        );
    }
}
