use ramify_core::{BranchOutput, Id, Retry};
use std::collections::HashMap;

/// Composite slot key for one loop iteration
pub(crate) fn indexed_key(branch_id: &Id, index: usize) -> String {
    format!("{branch_id}.{index}")
}

/// Outputs of a prior attempt that must not be re-executed, keyed by branch
/// id
///
/// Retryable outputs are excluded: the branches that produced them are the
/// ones the next attempt re-runs. Whether a preserved output is actually
/// reused is then gated on the branch's determinism flag.
pub fn completed_outputs(retry: &Retry) -> HashMap<Id, BranchOutput> {
    retry
        .outputs
        .iter()
        .filter(|output| !output.is_retry())
        .map(|output| (output.branch_id.clone(), output.clone()))
        .collect()
}

/// Same as [`completed_outputs`], keyed by the composite
/// `"<branchId>.<index>"` iteration key
pub fn completed_loop_outputs(retry: &Retry) -> HashMap<String, BranchOutput> {
    retry
        .outputs
        .iter()
        .filter(|output| !output.is_retry())
        .map(|output| (output.indexed_key(), output.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ramify_core::{BranchError, BranchInput};
    use serde_json::json;

    fn fixture_retry() -> Retry {
        Retry::new(
            BranchInput::new(json!("in")),
            vec![
                BranchOutput::success("done", 0, json!(1)),
                BranchOutput::failure("fatal", 0, BranchError::non_recoverable("fatal")),
                BranchOutput::failure("flaky", 0, BranchError::retryable("transient")),
            ],
        )
    }

    #[test]
    fn test_completed_outputs_excludes_retryable() {
        let actual = completed_outputs(&fixture_retry());

        assert_eq!(actual.len(), 2);
        assert!(actual.contains_key(&Id::new("done")));
        assert!(actual.contains_key(&Id::new("fatal")));
        assert!(!actual.contains_key(&Id::new("flaky")));
    }

    #[test]
    fn test_completed_loop_outputs_uses_indexed_keys() {
        let fixture = Retry::new(
            BranchInput::new(json!("in")),
            vec![
                BranchOutput::success("iter", 0, json!(0)),
                BranchOutput::failure("iter", 1, BranchError::retryable("transient")),
                BranchOutput::success("iter", 2, json!(2)),
            ],
        );

        let actual = completed_loop_outputs(&fixture);

        assert_eq!(actual.len(), 2);
        assert!(actual.contains_key("iter.0"));
        assert!(actual.contains_key("iter.2"));
        assert!(!actual.contains_key("iter.1"));
    }

    #[test]
    fn test_indexed_key_format() {
        let actual = indexed_key(&Id::new("iter"), 4);
        let expected = "iter.4";
        assert_eq!(actual, expected);
    }
}
