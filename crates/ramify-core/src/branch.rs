use crate::{Id, Json};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value handed to every branch of one attempt
///
/// Produced by the operation's before-hook (or taken from the retry carrier
/// on a retry attempt) and immutable for the attempt's duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchInput {
    /// Opaque input value
    pub value: Json,
}

impl BranchInput {
    /// Create a new branch input
    pub fn new(value: Json) -> Self {
        Self { value }
    }
}

/// Error record carried by a failed branch output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct BranchError {
    /// Human-readable failure description
    pub error_message: String,
    /// Optional detail trace (source chain, panic payload)
    pub error_trace: Option<String>,
    /// Whether the branch should be re-executed on the next attempt
    pub can_retry: bool,
}

impl BranchError {
    /// Create an error that marks the branch for re-execution
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            error_trace: None,
            can_retry: true,
        }
    }

    /// Create an error that must not trigger another attempt
    pub fn non_recoverable(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            error_trace: None,
            can_retry: false,
        }
    }
}

impl From<&BranchFailure> for BranchError {
    fn from(failure: &BranchFailure) -> Self {
        Self {
            error_message: failure.message().to_string(),
            error_trace: failure.trace().map(str::to_string),
            can_retry: !failure.is_non_recoverable(),
        }
    }
}

/// A branch's verdict for one attempt (or one loop iteration)
///
/// A completed output may carry a result, an error, or neither;
/// `is_error()` holds exactly when an error record is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct BranchOutput {
    /// Branch that produced this output
    pub branch_id: Id,
    /// Iteration index for loop branches, 0 otherwise
    pub index: usize,
    /// Error record if the branch failed
    pub error: Option<BranchError>,
    /// Opaque result value
    pub result: Option<Json>,
}

impl BranchOutput {
    /// Create an empty output for a branch
    pub fn new(branch_id: impl Into<Id>, index: usize) -> Self {
        Self {
            branch_id: branch_id.into(),
            index,
            error: None,
            result: None,
        }
    }

    /// Create a successful output with a result value
    pub fn success(branch_id: impl Into<Id>, index: usize, result: Json) -> Self {
        Self::new(branch_id, index).result(result)
    }

    /// Create a failed output
    pub fn failure(branch_id: impl Into<Id>, index: usize, error: BranchError) -> Self {
        Self::new(branch_id, index).error(error)
    }

    /// Check whether this output carries an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Check whether this output marks the branch for re-execution
    pub fn is_retry(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.can_retry)
    }

    /// Composite key identifying one loop iteration's slot
    pub fn indexed_key(&self) -> String {
        format!("{}.{}", self.branch_id, self.index)
    }
}

/// Failure returned by a user branch body
///
/// The engine folds this into a [`BranchOutput`] error record; a
/// non-recoverable failure produces a non-retryable output, everything else
/// is retried on the next attempt.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct BranchFailure {
    message: String,
    trace: Option<String>,
    non_recoverable: bool,
}

impl BranchFailure {
    /// Create a failure that will be retried on the next attempt
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
            non_recoverable: false,
        }
    }

    /// Create a failure that must not be retried
    pub fn non_recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
            non_recoverable: true,
        }
    }

    /// Create a retryable failure from a source error, capturing its debug
    /// representation as the trace
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            message: error.to_string(),
            trace: Some(format!("{error:?}")),
            non_recoverable: false,
        }
    }

    /// Attach a detail trace
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Failure description
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Optional detail trace
    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    /// Whether this failure must not trigger another attempt
    pub fn is_non_recoverable(&self) -> bool {
        self.non_recoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_branch_input_creation() {
        let actual = BranchInput::new(json!({"key": "value"}));
        assert_eq!(actual.value, json!({"key": "value"}));
    }

    #[test]
    fn test_branch_output_success() {
        let actual = BranchOutput::success("branch1", 0, json!("done"));

        assert_eq!(actual.branch_id, "branch1");
        assert_eq!(actual.index, 0);
        assert!(!actual.is_error());
        assert!(!actual.is_retry());
        assert_eq!(actual.result, Some(json!("done")));
    }

    #[test]
    fn test_branch_output_retryable_failure() {
        let actual = BranchOutput::failure("branch1", 0, BranchError::retryable("transient"));

        assert!(actual.is_error());
        assert!(actual.is_retry());
    }

    #[test]
    fn test_branch_output_non_recoverable_failure() {
        let actual = BranchOutput::failure("branch1", 0, BranchError::non_recoverable("fatal"));

        assert!(actual.is_error());
        assert!(!actual.is_retry());
    }

    #[test]
    fn test_branch_output_without_result_or_error() {
        let actual = BranchOutput::new("branch1", 0);

        assert!(!actual.is_error());
        assert!(!actual.is_retry());
        assert_eq!(actual.result, None);
    }

    #[test]
    fn test_indexed_key() {
        let fixture = BranchOutput::new("iter", 7);
        let actual = fixture.indexed_key();
        let expected = "iter.7";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_branch_failure_classification() {
        let fixture_retryable = BranchFailure::retryable("transient");
        let fixture_fatal = BranchFailure::non_recoverable("fatal");

        assert!(!fixture_retryable.is_non_recoverable());
        assert!(fixture_fatal.is_non_recoverable());
    }

    #[test]
    fn test_branch_error_from_failure() {
        let fixture = BranchFailure::non_recoverable("fatal").with_trace("at line 1");
        let actual = BranchError::from(&fixture);

        assert_eq!(actual.error_message, "fatal");
        assert_eq!(actual.error_trace, Some("at line 1".to_string()));
        assert!(!actual.can_retry);
    }

    #[test]
    fn test_branch_failure_from_error() {
        let source = serde_json::from_str::<u32>("oops").unwrap_err();
        let actual = BranchFailure::from_error(&source);

        assert!(!actual.is_non_recoverable());
        assert!(actual.trace().is_some());
    }

    #[test]
    fn test_branch_output_serialization() {
        let fixture = BranchOutput::success("branch1", 2, json!({"n": 1}));
        let actual: BranchOutput =
            serde_json::from_str(&serde_json::to_string(&fixture).unwrap()).unwrap();
        assert_eq!(actual, fixture);
    }
}
