//! # Ramify Core
//!
//! This crate provides the domain types for the ramify branch-execution
//! engine: requests and responses, branch inputs and outputs, the retry
//! carrier, and failure classification. The execution engine itself lives in
//! the `ramify-execution` crate and builds on these types.
//!
//! ## Key Components
//!
//! - **Requests/Responses**: The messages exchanged with the service
//! - **Branch records**: Inputs, outputs and error verdicts of branches
//! - **Retry carrier**: The state threaded between retry attempts
//! - **Identifiers**: Unique ID generation and management
//! - **Errors**: Common error types and handling

pub mod branch;
pub mod error;
pub mod id;
pub mod request;
pub mod response;

// Re-export commonly used types
pub use branch::{BranchError, BranchFailure, BranchInput, BranchOutput};
pub use error::{Error, Result};
pub use id::{Id, generate_id, generate_id_with_prefix};
pub use request::Request;
pub use response::{Response, Retry};

/// Opaque payload type; the engine never inspects payloads
pub type Json = serde_json::Value;
