use ramify_core::Id;
use thiserror::Error;

/// Result type for execution operations
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Execution engine error types
///
/// User failures never surface here; they are folded into branch outputs.
/// These errors cover misuse of the engine itself.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// An operation with the same id is already registered
    #[error("Duplicate operation id [{operation_id}]")]
    DuplicateOperation { operation_id: Id },

    /// No operation registered under the requested id
    #[error("Operation not found: {operation_id}")]
    OperationNotFound { operation_id: Id },

    /// No loop branch registered under the requested id
    #[error("Branch not found: {branch_id}")]
    BranchNotFound { branch_id: Id },

    /// An operation descriptor failed validation
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The throttled runner was closed or cancelled mid-submit
    #[error("Throttled runner stopped")]
    RunnerStopped,

    /// Core domain error
    #[error("Core error: {0}")]
    Core(#[from] ramify_core::Error),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ExecutionError {
    /// Create a duplicate operation error
    pub fn duplicate_operation(operation_id: Id) -> Self {
        Self::DuplicateOperation { operation_id }
    }

    /// Create an operation not found error
    pub fn operation_not_found(operation_id: Id) -> Self {
        Self::OperationNotFound { operation_id }
    }

    /// Create a branch not found error
    pub fn branch_not_found(branch_id: Id) -> Self {
        Self::BranchNotFound { branch_id }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Non-retryable errors
            ExecutionError::DuplicateOperation { .. }
            | ExecutionError::OperationNotFound { .. }
            | ExecutionError::BranchNotFound { .. }
            | ExecutionError::Validation { .. }
            | ExecutionError::Configuration { .. }
            | ExecutionError::Core(_) => false,

            // Retryable errors
            ExecutionError::RunnerStopped | ExecutionError::Internal { .. } => true,
        }
    }

    /// Get error category for logging and monitoring
    pub fn category(&self) -> &'static str {
        match self {
            ExecutionError::DuplicateOperation { .. } => "duplicate_operation",
            ExecutionError::OperationNotFound { .. } => "operation_not_found",
            ExecutionError::BranchNotFound { .. } => "branch_not_found",
            ExecutionError::Validation { .. } => "validation",
            ExecutionError::Configuration { .. } => "configuration",
            ExecutionError::RunnerStopped => "runner_stopped",
            ExecutionError::Core(_) => "core",
            ExecutionError::Internal { .. } => "internal",
        }
    }
}
