use crate::context::{BranchContext, OperationContext};
use crate::error::{ExecutionError, Result};
use derive_setters::Setters;
use futures::future::BoxFuture;
use ramify_core::{BranchFailure, BranchInput, BranchOutput, Id, Json, Response, Retry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hard ceiling on per-loop concurrency; also the default for a requested
/// concurrency of 0
pub const MAX_LOOP_CONCURRENCY: usize = 10;

/// Resolve a requested loop concurrency against the cap
pub fn effective_concurrency(requested: usize) -> usize {
    if requested == 0 || requested > MAX_LOOP_CONCURRENCY {
        MAX_LOOP_CONCURRENCY
    } else {
        requested
    }
}

/// Verdict returned by user branch bodies
pub type BranchResult = std::result::Result<BranchOutput, BranchFailure>;

/// Body of a regular branch
pub type BranchBody =
    Arc<dyn Fn(BranchContext) -> BoxFuture<'static, BranchResult> + Send + Sync>;

/// Body of a loop branch, invoked once per element with its index
pub type LoopBody =
    Arc<dyn Fn(BranchContext, Json, usize) -> BoxFuture<'static, BranchResult> + Send + Sync>;

/// Hook producing the attempt's branch input from the operation context
pub type BeforeHook = Arc<dyn Fn(&OperationContext) -> Result<BranchInput> + Send + Sync>;

/// Hook producing the final response from a completed attempt
pub type AfterHook = Arc<dyn Fn(&OperationContext) -> Result<Response> + Send + Sync>;

/// Execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[setters(into)]
pub struct ExecutionConfig {
    /// Maximum attempts per `process` call and per nested loop invocation
    pub max_tries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { max_tries: 3 }
    }
}

impl ExecutionConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_tries == 0 {
            return Err(ExecutionError::configuration("max_tries must be positive"));
        }
        Ok(())
    }
}

/// One loop-branch invocation
///
/// Built by the operation context and threaded through the service's retry
/// loop; the context is replaced with a fresh one on every attempt.
#[derive(Clone)]
pub(crate) struct Loop {
    pub(crate) operation_id: Id,
    pub(crate) branch_id: Id,
    pub(crate) collection: Vec<Json>,
    pub(crate) concurrency: usize,
    pub(crate) context: Arc<OperationContext>,
    pub(crate) retry: Option<Retry>,
    pub(crate) input: BranchInput,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_execution_config_default() {
        let actual = ExecutionConfig::default();
        assert_eq!(actual.max_tries, 3);
    }

    #[test]
    fn test_execution_config_validate() {
        let fixture = ExecutionConfig::default().max_tries(2u32);
        assert!(fixture.validate().is_ok());

        let fixture_invalid = ExecutionConfig::default().max_tries(0u32);
        assert!(fixture_invalid.validate().is_err());
    }

    #[test]
    fn test_effective_concurrency_passthrough() {
        let actual = effective_concurrency(5);
        let expected = 5;
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_effective_concurrency_zero_becomes_cap() {
        let actual = effective_concurrency(0);
        let expected = MAX_LOOP_CONCURRENCY;
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_effective_concurrency_clamped_to_cap() {
        let actual = effective_concurrency(100);
        let expected = MAX_LOOP_CONCURRENCY;
        assert_eq!(actual, expected);
    }
}
