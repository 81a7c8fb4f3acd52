use crate::{BranchInput, BranchOutput, Id, Json};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// State persisted between retry attempts
///
/// Embeds the branch input and every output of the failed attempt so the
/// next attempt can skip completed work without any engine-held state. The
/// caller may also persist the carrier and resume later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retry {
    /// Branch input seen by the failed attempt
    pub branch_input: BranchInput,
    /// Every output of the failed attempt
    pub outputs: Vec<BranchOutput>,
}

impl Retry {
    /// Create a new retry carrier
    pub fn new(branch_input: BranchInput, outputs: Vec<BranchOutput>) -> Self {
        Self {
            branch_input,
            outputs,
        }
    }
}

/// Output of an operation attempt
///
/// The retry carrier is present exactly when at least one branch of the
/// attempt produced a retryable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct Response {
    /// Trace identifier of the originating request
    pub trace_id: Id,
    /// Operation that produced this response
    pub operation_id: Id,
    /// State for the next attempt, if one is needed
    pub retry: Option<Retry>,
    /// Opaque payload built by the after-hook
    pub payload: Option<Json>,
}

impl Response {
    /// Create a new response for an operation
    pub fn new(trace_id: impl Into<Id>, operation_id: impl Into<Id>) -> Self {
        Self {
            trace_id: trace_id.into(),
            operation_id: operation_id.into(),
            retry: None,
            payload: None,
        }
    }

    /// Check whether this response requires another attempt
    pub fn is_retry(&self) -> bool {
        self.retry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_response_creation() {
        let actual = Response::new("trace-1", "op");

        assert_eq!(actual.trace_id, "trace-1");
        assert_eq!(actual.operation_id, "op");
        assert!(!actual.is_retry());
        assert_eq!(actual.payload, None);
    }

    #[test]
    fn test_response_with_retry() {
        let fixture_retry = Retry::new(BranchInput::new(json!("in")), vec![]);
        let actual = Response::new("trace-1", "op").retry(fixture_retry.clone());

        assert!(actual.is_retry());
        assert_eq!(actual.retry, Some(fixture_retry));
    }

    #[test]
    fn test_retry_carries_outputs() {
        let fixture_outputs = vec![
            BranchOutput::success("branch1", 0, json!(1)),
            BranchOutput::new("branch2", 0),
        ];
        let actual = Retry::new(BranchInput::new(json!("in")), fixture_outputs.clone());

        assert_eq!(actual.outputs, fixture_outputs);
        assert_eq!(actual.branch_input.value, json!("in"));
    }

    #[test]
    fn test_response_serialization() {
        let fixture = Response::new("trace-1", "op").payload(json!([1, 2]));
        let actual: Response =
            serde_json::from_str(&serde_json::to_string(&fixture).unwrap()).unwrap();
        assert_eq!(actual, fixture);
    }
}
