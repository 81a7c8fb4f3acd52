use crate::concurrency::{Slot, join_outputs};
use crate::error::{ExecutionError, Result};
use crate::service::Service;
use crate::types::Loop;
use ramify_core::{BranchError, BranchFailure, BranchInput, BranchOutput, Id, Json, Request, Response};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

/// Outputs collected for one branch id, in insertion order
///
/// A loop branch produces one output per iteration, hence the grouping.
#[derive(Debug, Clone, Default)]
pub struct BranchOutputs {
    outputs: Vec<BranchOutput>,
}

impl BranchOutputs {
    fn add(&mut self, output: BranchOutput) {
        self.outputs.push(output);
    }

    /// Check whether any collected output is retryable
    pub fn is_retry(&self) -> bool {
        self.outputs.iter().any(BranchOutput::is_retry)
    }

    /// All outputs of this group
    pub fn all(&self) -> &[BranchOutput] {
        &self.outputs
    }
}

/// Per-attempt mutable state of one operation execution
///
/// Created fresh for every attempt and shared by that attempt's branches.
/// Outputs are appended only by the collecting task after the wait-all;
/// branch tasks complete their own slots and never touch the context's
/// output map.
pub struct OperationContext {
    service: Arc<Service>,
    request: Request,
    branch_input: RwLock<BranchInput>,
    branch_outputs: Mutex<BTreeMap<Id, BranchOutputs>>,
}

impl OperationContext {
    pub(crate) fn new(service: Arc<Service>, request: Request) -> Self {
        Self {
            service,
            request,
            branch_input: RwLock::new(BranchInput::default()),
            branch_outputs: Mutex::new(BTreeMap::new()),
        }
    }

    /// The request driving this attempt
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The service executing this attempt
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Trace identifier of the request
    pub fn trace_id(&self) -> Id {
        self.request.trace_id.clone()
    }

    /// Operation identifier of the request
    pub fn operation_id(&self) -> Id {
        self.request.operation_id.clone()
    }

    /// Number of completed attempts before this one
    pub fn retry_count(&self) -> u32 {
        self.request.retry_count
    }

    pub(crate) fn set_branch_input(&self, input: BranchInput) {
        let mut guard = match self.branch_input.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = input;
    }

    /// The attempt's branch input
    pub fn branch_input(&self) -> BranchInput {
        match self.branch_input.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn add_branch_output(&self, output: BranchOutput) {
        let mut guard = match self.branch_outputs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(output.branch_id.clone()).or_default().add(output);
    }

    /// Every collected output, grouped per branch id
    pub fn branch_outputs(&self) -> Vec<BranchOutput> {
        let guard = match self.branch_outputs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .values()
            .flat_map(|group| group.all().iter().cloned())
            .collect()
    }

    /// Check whether any collected output requires another attempt
    pub fn has_retry(&self) -> bool {
        let guard = match self.branch_outputs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.values().any(BranchOutputs::is_retry)
    }

    /// Response with the request's trace and operation ids pre-filled
    pub fn response_builder(&self) -> Response {
        Response::new(self.request.trace_id.clone(), self.request.operation_id.clone())
    }

    /// Execute a loop branch over a collection with the given concurrency
    ///
    /// Runs on a fresh context sharing this attempt's service and request,
    /// with its own retry loop capped by the service's configuration.
    pub async fn loop_branch(
        self: &Arc<Self>,
        branch_id: impl Into<Id>,
        collection: Vec<Json>,
        concurrency: usize,
    ) -> Result<Response> {
        let nested = Arc::new(OperationContext::new(
            self.service.clone(),
            self.request.clone(),
        ));
        let invocation = Loop {
            operation_id: self.operation_id(),
            branch_id: branch_id.into(),
            collection,
            concurrency,
            context: nested,
            retry: None,
            input: self.branch_input(),
        };
        self.service.loop_branch(invocation).await
    }
}

/// Per-branch handle passed into user branch bodies
///
/// Exposes the attempt's input, output builders, and the resolved outputs of
/// the branch's dependencies. Dependencies are awaited by the engine before
/// the body runs.
pub struct BranchContext {
    branch_id: Id,
    operation_context: Arc<OperationContext>,
    index: usize,
    dependency_slots: Vec<Arc<Slot>>,
    dependencies: HashMap<Id, BranchOutput>,
}

impl BranchContext {
    pub(crate) fn new(
        branch_id: Id,
        operation_context: Arc<OperationContext>,
        index: usize,
        dependency_slots: Vec<Arc<Slot>>,
    ) -> Self {
        Self {
            branch_id,
            operation_context,
            index,
            dependency_slots,
            dependencies: HashMap::new(),
        }
    }

    /// Identifier of the branch this context belongs to
    pub fn branch_id(&self) -> &Id {
        &self.branch_id
    }

    /// Iteration index for loop branches, 0 otherwise
    pub fn index(&self) -> usize {
        self.index
    }

    /// Trace identifier of the request
    pub fn trace_id(&self) -> Id {
        self.operation_context.trace_id()
    }

    /// Operation identifier of the request
    pub fn operation_id(&self) -> Id {
        self.operation_context.operation_id()
    }

    /// Number of completed attempts before this one
    pub fn retry_count(&self) -> u32 {
        self.operation_context.retry_count()
    }

    /// The attempt's branch input
    pub fn input(&self) -> BranchInput {
        self.operation_context.branch_input()
    }

    /// Fresh output pre-filled with this branch's id and index
    pub fn output_builder(&self) -> BranchOutput {
        BranchOutput::new(self.branch_id.clone(), self.index)
    }

    /// Error output pre-filled with this branch's id and index
    pub fn error_output(&self, error: BranchError) -> BranchOutput {
        BranchOutput::failure(self.branch_id.clone(), self.index, error)
    }

    /// Error output built from a body failure
    pub fn failure_output(&self, failure: &BranchFailure) -> BranchOutput {
        self.error_output(BranchError::from(failure))
    }

    /// Error output propagating a failed dependency's error, preserving its
    /// retry classification
    ///
    /// Fails when the given output does not carry an error.
    pub fn output_for_dependency_error(&self, output: &BranchOutput) -> Result<BranchOutput> {
        let error = output.error.as_ref().ok_or_else(|| {
            ExecutionError::validation(format!(
                "Output of branch [{}] does not contain an error",
                output.branch_id
            ))
        })?;
        Ok(self.error_output(BranchError {
            error_message: format!(
                "A branch this branch depends on [{}] did not complete because of [{}]",
                output.branch_id, error.error_message
            ),
            error_trace: None,
            can_retry: error.can_retry,
        }))
    }

    pub(crate) async fn wait_for_dependencies(mut self) -> Self {
        if !self.dependency_slots.is_empty() {
            let outputs = join_outputs(&self.dependency_slots).await;
            for output in outputs {
                self.dependencies.insert(output.branch_id.clone(), output);
            }
        }
        self
    }

    /// Output of a dependency, or `None` for unknown branch ids
    pub fn dependency_output(&self, branch_id: &str) -> Option<&BranchOutput> {
        self.dependencies.get(&Id::from(branch_id))
    }

    /// Dependency outputs that carry an error
    pub fn dependency_errors(&self) -> Vec<&BranchOutput> {
        self.dependencies
            .values()
            .filter(|output| output.is_error())
            .collect()
    }

    /// Dependency outputs that are retryable
    pub fn dependency_retries(&self) -> Vec<&BranchOutput> {
        self.dependencies
            .values()
            .filter(|output| output.is_retry())
            .collect()
    }

    /// Check whether any dependency failed
    pub fn has_dependency_error(&self) -> bool {
        self.dependencies.values().any(BranchOutput::is_error)
    }

    /// Check whether any dependency is retryable
    pub fn has_dependency_retry(&self) -> bool {
        self.dependencies.values().any(BranchOutput::is_retry)
    }

    /// Execute a loop branch over a collection with the given concurrency
    pub async fn loop_branch(
        &self,
        branch_id: impl Into<Id>,
        collection: Vec<Json>,
        concurrency: usize,
    ) -> Result<Response> {
        self.operation_context
            .loop_branch(branch_id, collection, concurrency)
            .await
    }
}
