//! # ramify-execution
//!
//! Concurrent branch-execution engine for named operations.
//!
//! An operation is a declarative graph of branches that fan out in parallel
//! on a worker pool, express dependencies on each other, may iterate over a
//! collection with bounded concurrency, and are restartable through a
//! deterministic retry protocol that re-executes only the branches that
//! failed with a retryable error.
//!
//! ## Key Components
//!
//! - **Service**: Operation registry and retry-driving entry point
//! - **Operation**: Descriptor plus the branch and loop executors
//! - **OperationContext / BranchContext**: Per-attempt and per-branch state
//! - **WorkerPool / Runner**: Unbounded pool and its throttled adapter
//! - **Retry reconstruction**: Skipping work completed by prior attempts
//!
//! ## Usage
//!
//! ```rust
//! use ramify_execution::{Branch, ExecutionConfig, Operation, Request, Service, WorkerPool};
//! use std::sync::Arc;
//!
//! # async fn example() -> ramify_execution::Result<()> {
//! let operation = Operation::builder("greet")
//!     .branch(Branch::new("hello", |ctx| async move {
//!         Ok(ctx.output_builder().result(serde_json::json!("hello")))
//!     }))
//!     .build()?;
//!
//! let mut service = Service::new(WorkerPool::current(), ExecutionConfig::default())?;
//! service.add_operation(operation)?;
//! let service = Arc::new(service);
//!
//! let response = service
//!     .process(Request::new("greet", serde_json::json!("world")))
//!     .await?;
//! assert!(!response.is_retry());
//! # Ok(())
//! # }
//! ```

pub mod concurrency;
pub mod context;
pub mod error;
pub mod operation;
pub mod retry;
pub mod service;
pub mod types;

// Re-export public API
pub use concurrency::{Runner, Slot, ThrottledExecutor, WorkerPool, join_outputs};
pub use context::{BranchContext, BranchOutputs, OperationContext};
pub use error::{ExecutionError, Result};
pub use operation::{Branch, BranchWrapper, LoopBranch, Operation, OperationBuilder};
pub use retry::{completed_loop_outputs, completed_outputs};
pub use service::{LoggingRetryObserver, RetryObserver, Service};
pub use types::{
    AfterHook, BeforeHook, BranchBody, BranchResult, ExecutionConfig, LoopBody,
    MAX_LOOP_CONCURRENCY, effective_concurrency,
};

// Re-export commonly used types from the core crate
pub use ramify_core::{
    BranchError, BranchFailure, BranchInput, BranchOutput, Id, Json, Request, Response, Retry,
};
