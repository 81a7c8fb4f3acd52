use crate::concurrency::{ThrottledExecutor, WorkerPool};
use crate::context::OperationContext;
use crate::error::{ExecutionError, Result};
use crate::operation::Operation;
use crate::types::{ExecutionConfig, Loop};
use async_trait::async_trait;
use ramify_core::{Id, Request, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Observer invoked when an operation still requires a retry after the
/// configured number of attempts
#[async_trait]
pub trait RetryObserver: Send + Sync {
    /// Record that the operation failed to complete within `tries` attempts
    async fn on_error_after_retries(&self, request: &Request, response: &Response, tries: u32);
}

/// Default observer that records an error report via `tracing`
pub struct LoggingRetryObserver;

#[async_trait]
impl RetryObserver for LoggingRetryObserver {
    async fn on_error_after_retries(&self, request: &Request, _response: &Response, tries: u32) {
        error!(
            "Operation [{}] failed to complete after [{}] tries (trace [{}])",
            request.operation_id, tries, request.trace_id
        );
    }
}

/// Top-level entry point of the execution engine
///
/// Holds the operation registry, the worker pool, and the retry
/// configuration. Operations are registered before the service is shared;
/// processing happens through an `Arc<Service>` so branch contexts can
/// dispatch nested loops back into the engine.
pub struct Service {
    worker_pool: WorkerPool,
    throttled: ThrottledExecutor,
    config: ExecutionConfig,
    operations: HashMap<Id, Operation>,
    observer: Arc<dyn RetryObserver>,
}

impl Service {
    /// Create a new service over the given worker pool
    pub fn new(worker_pool: WorkerPool, config: ExecutionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            throttled: ThrottledExecutor::new(worker_pool.clone()),
            worker_pool,
            config,
            operations: HashMap::new(),
            observer: Arc::new(LoggingRetryObserver),
        })
    }

    /// Replace the exhausted-retries observer
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register an operation; duplicate ids are rejected
    pub fn add_operation(&mut self, operation: Operation) -> Result<()> {
        if self.operations.contains_key(operation.id()) {
            return Err(ExecutionError::duplicate_operation(operation.id().clone()));
        }
        self.operations.insert(operation.id().clone(), operation);
        Ok(())
    }

    /// The worker pool branches run on
    pub fn worker_pool(&self) -> &WorkerPool {
        &self.worker_pool
    }

    pub(crate) fn throttled(&self) -> &ThrottledExecutor {
        &self.throttled
    }

    /// The service configuration
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Process a request, retrying failed branches up to the configured
    /// number of attempts
    ///
    /// Returns once the operation completes without a retry carrier or the
    /// attempts are exhausted; in the latter case the last response is
    /// returned as-is, retry carrier included, after notifying the observer.
    pub async fn process(self: &Arc<Self>, request: Request) -> Result<Response> {
        let operation = self
            .operations
            .get(&request.operation_id)
            .ok_or_else(|| ExecutionError::operation_not_found(request.operation_id.clone()))?;

        let mut request = request;
        let mut response: Option<Response> = None;
        for attempt in 0..self.config.max_tries {
            debug!(
                "Executing operation [{}] attempt [{}]",
                request.operation_id, attempt
            );
            let context = Arc::new(OperationContext::new(self.clone(), request.clone()));
            let attempt_response = operation.execute(context).await?;
            match attempt_response.retry.clone() {
                None => return Ok(attempt_response),
                Some(retry) => {
                    warn!(
                        "Operation [{}] attempt [{}] requires retry",
                        request.operation_id, attempt
                    );
                    request = request.for_retry(retry, attempt + 1);
                    response = Some(attempt_response);
                }
            }
        }

        let response = response.ok_or_else(|| {
            ExecutionError::internal("retry loop completed without producing a response")
        })?;
        self.observer
            .on_error_after_retries(&request, &response, self.config.max_tries)
            .await;
        Ok(response)
    }

    /// Run a loop branch with its own retry loop, threading the carrier
    /// through the loop record
    pub(crate) async fn loop_branch(self: &Arc<Self>, invocation: Loop) -> Result<Response> {
        let operation = self
            .operations
            .get(&invocation.operation_id)
            .ok_or_else(|| ExecutionError::operation_not_found(invocation.operation_id.clone()))?;

        let request = invocation.context.request().clone();
        let mut current = invocation;
        let mut response: Option<Response> = None;
        for attempt in 0..self.config.max_tries {
            debug!(
                "Executing loop branch [{}.{}] attempt [{}]",
                current.operation_id, current.branch_id, attempt
            );
            let attempt_response = operation.loop_branch(&current).await?;
            match attempt_response.retry.clone() {
                None => return Ok(attempt_response),
                Some(retry) => {
                    warn!(
                        "Loop branch [{}.{}] attempt [{}] requires retry",
                        current.operation_id, current.branch_id, attempt
                    );
                    // Fresh context per attempt; outputs never accumulate
                    // across attempts.
                    current = Loop {
                        context: Arc::new(OperationContext::new(self.clone(), request.clone())),
                        retry: Some(retry),
                        ..current
                    };
                    response = Some(attempt_response);
                }
            }
        }

        let response = response.ok_or_else(|| {
            ExecutionError::internal("retry loop completed without producing a response")
        })?;
        self.observer
            .on_error_after_retries(&request, &response, self.config.max_tries)
            .await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Branch;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixture_operation(id: &str) -> Operation {
        Operation::builder(id)
            .branch(Branch::new("branch1", |ctx| async move {
                Ok(ctx.output_builder().result(json!("ok")))
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_service_rejects_duplicate_operation() {
        let mut fixture =
            Service::new(WorkerPool::current(), ExecutionConfig::default()).unwrap();

        fixture.add_operation(fixture_operation("op")).unwrap();
        let actual = fixture.add_operation(fixture_operation("op"));

        assert!(matches!(
            actual,
            Err(ExecutionError::DuplicateOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_service_rejects_unknown_operation() {
        let fixture = Arc::new(
            Service::new(WorkerPool::current(), ExecutionConfig::default()).unwrap(),
        );

        let actual = fixture.process(Request::new("missing", json!(null))).await;

        assert!(matches!(
            actual,
            Err(ExecutionError::OperationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_service_rejects_zero_max_tries() {
        let fixture = Service::new(
            WorkerPool::current(),
            ExecutionConfig::default().max_tries(0u32),
        );

        assert!(matches!(
            fixture,
            Err(ExecutionError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_returns_response_without_retry() {
        let mut service =
            Service::new(WorkerPool::current(), ExecutionConfig::default()).unwrap();
        service.add_operation(fixture_operation("op")).unwrap();
        let fixture = Arc::new(service);

        let actual = fixture
            .process(Request::new("op", json!("payload")).trace_id("trace-1"))
            .await
            .unwrap();

        assert_eq!(actual.trace_id, "trace-1");
        assert_eq!(actual.operation_id, "op");
        assert!(!actual.is_retry());
        assert!(actual.payload.is_some());
    }

    #[tokio::test]
    async fn test_observer_invoked_once_after_exhausted_retries() {
        struct CountingObserver {
            calls: AtomicU32,
        }

        #[async_trait]
        impl RetryObserver for CountingObserver {
            async fn on_error_after_retries(
                &self,
                _request: &Request,
                response: &Response,
                tries: u32,
            ) {
                assert!(response.is_retry());
                assert_eq!(tries, 2);
                self.calls.fetch_add(1, Ordering::SeqCst);
            }
        }

        let observer = Arc::new(CountingObserver {
            calls: AtomicU32::new(0),
        });
        let operation = Operation::builder("op")
            .branch(Branch::new("always_fail", |_ctx| async move {
                Err(ramify_core::BranchFailure::retryable("transient"))
            }))
            .build()
            .unwrap();

        let mut service = Service::new(
            WorkerPool::current(),
            ExecutionConfig::default().max_tries(2u32),
        )
        .unwrap();
        service.add_operation(operation).unwrap();
        let fixture = Arc::new(service.with_observer(observer.clone()));

        let actual = fixture
            .process(Request::new("op", json!(null)))
            .await
            .unwrap();

        assert!(actual.is_retry());
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
    }
}
