//! Error types for questionnaire population

use std::time::Duration;

use thiserror::Error;

/// Result type for population operations
pub type PopulateResult<T> = Result<T, PopulateError>;

/// Errors that abort a whole population run.
///
/// Per-item failures never show up here; they are recovered locally and
/// reported as [`PopulationIssue`](crate::PopulationIssue)s.
#[derive(Debug, Error)]
pub enum PopulateError {
    /// The run exceeded the caller-supplied time budget
    #[error("Population timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The Questionnaire JSON is invalid or not a Questionnaire
    #[error("Invalid Questionnaire: {0}")]
    InvalidQuestionnaire(String),

    /// Unexpected failure (including a panicking collaborator)
    #[error("Population failed: {0}")]
    Internal(String),
}

impl PopulateError {
    /// Create a new InvalidQuestionnaire error
    pub fn invalid_questionnaire(message: impl Into<String>) -> Self {
        Self::InvalidQuestionnaire(message.into())
    }

    /// Create a new Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Timeouts are worth retrying with a larger budget; nothing else is.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors reported by an [`ExpressionEvaluator`](crate::ExpressionEvaluator).
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    /// The evaluator cannot handle this expression
    #[error("Unsupported expression: {0}")]
    Unsupported(String),

    /// The expression references a variable with no binding
    #[error("Unknown variable: %{0}")]
    UnknownVariable(String),

    /// Evaluation started but failed
    #[error("Expression evaluation failed: {0}")]
    Failed(String),
}

impl From<String> for EvaluationError {
    fn from(err: String) -> Self {
        EvaluationError::Failed(err)
    }
}

impl From<&str> for EvaluationError {
    fn from(err: &str) -> Self {
        EvaluationError::Failed(err.to_string())
    }
}

/// Errors from value set expansion.
#[derive(Debug, Clone, Error)]
pub enum TerminologyError {
    #[error("Terminology service is disabled")]
    Disabled,

    #[error("Failed to create HTTP client: {0}")]
    HttpClientError(String),

    #[error("Remote terminology error: {0}")]
    RemoteError(String),

    #[error("ValueSet not found: {0}")]
    ValueSetNotFound(String),

    #[error("Invalid expansion for {url}: {message}")]
    InvalidExpansion { url: String, message: String },
}

impl TerminologyError {
    /// Create a new InvalidExpansion error
    pub fn invalid_expansion(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpansion {
            url: url.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = PopulateError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Population timed out after 250ms");
        assert!(err.is_timeout());
        assert!(!PopulateError::internal("boom").is_timeout());
    }

    #[test]
    fn test_evaluation_error_from_str() {
        let err: EvaluationError = "bad path".into();
        assert!(matches!(err, EvaluationError::Failed(ref m) if m == "bad path"));
        assert_eq!(
            EvaluationError::UnknownVariable("patient".into()).to_string(),
            "Unknown variable: %patient"
        );
    }
}
