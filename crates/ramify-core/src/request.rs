use crate::{Id, Json, Retry, generate_id_with_prefix};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// Input to the service's `process` entry point
///
/// The retry carrier is only ever present on requests the engine rebuilds
/// between attempts; when it is, `retry_count` is at least 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(strip_option, into)]
pub struct Request {
    /// Trace identifier propagated through all branches
    pub trace_id: Id,
    /// Operation to invoke
    pub operation_id: Id,
    /// Number of completed attempts before this one
    pub retry_count: u32,
    /// State of the previous attempt, if this is a retry
    pub retry: Option<Retry>,
    /// Opaque payload handed to the before-hook
    pub payload: Json,
}

impl Request {
    /// Create a new request with a generated trace id
    pub fn new(operation_id: impl Into<Id>, payload: Json) -> Self {
        Self {
            trace_id: generate_id_with_prefix("trace"),
            operation_id: operation_id.into(),
            retry_count: 0,
            retry: None,
            payload,
        }
    }

    /// Rebuild this request for the next attempt
    pub fn for_retry(&self, retry: Retry, retry_count: u32) -> Self {
        self.clone().retry(retry).retry_count(retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BranchInput;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_creation() {
        let actual = Request::new("op", json!("payload"));

        assert_eq!(actual.operation_id, "op");
        assert!(actual.trace_id.as_str().starts_with("trace_"));
        assert_eq!(actual.retry_count, 0);
        assert!(actual.retry.is_none());
        assert_eq!(actual.payload, json!("payload"));
    }

    #[test]
    fn test_request_trace_id_override() {
        let actual = Request::new("op", json!(null)).trace_id("trace-42");
        assert_eq!(actual.trace_id, "trace-42");
    }

    #[test]
    fn test_request_for_retry() {
        let fixture = Request::new("op", json!("payload"));
        let fixture_retry = Retry::new(BranchInput::new(json!("payload")), vec![]);

        let actual = fixture.for_retry(fixture_retry.clone(), 1);

        assert_eq!(actual.retry, Some(fixture_retry));
        assert_eq!(actual.retry_count, 1);
        assert_eq!(actual.trace_id, fixture.trace_id);
        assert_eq!(actual.payload, fixture.payload);
    }
}
