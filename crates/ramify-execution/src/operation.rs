use crate::concurrency::{Runner, Slot, WorkerPool, join_outputs};
use crate::context::{BranchContext, OperationContext};
use crate::error::{ExecutionError, Result};
use crate::retry;
use crate::types::{
    AfterHook, BeforeHook, BranchBody, BranchResult, Loop, LoopBody, effective_concurrency,
};
use futures::FutureExt;
use ramify_core::{BranchError, BranchInput, BranchOutput, Id, Json, Response, Retry};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "branch body panicked".to_string()
    }
}

/// One node in an operation's dependency graph
///
/// Branches are deterministic by default: on a retry attempt the engine
/// reuses their prior non-retryable output instead of re-running the body.
#[derive(Clone)]
pub struct Branch {
    id: Id,
    dependencies: Vec<Id>,
    deterministic: bool,
    body: BranchBody,
}

impl Branch {
    /// Create a deterministic branch with no dependencies
    pub fn new<F, Fut>(id: impl Into<Id>, body: F) -> Self
    where
        F: Fn(BranchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BranchResult> + Send + 'static,
    {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            deterministic: true,
            body: Arc::new(move |ctx| body(ctx).boxed()),
        }
    }

    /// Declare the branches this branch depends on, in order
    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Id>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Mark whether prior outputs of this branch can be reused on retry
    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Branch identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub(crate) async fn run(&self, ctx: BranchContext) -> BranchOutput {
        let index = ctx.index();
        match AssertUnwindSafe((self.body)(ctx)).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(failure)) => {
                warn!("Branch [{}] failed: {}", self.id, failure);
                BranchOutput::failure(self.id.clone(), index, BranchError::from(&failure))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Branch [{}] panicked: {}", self.id, message);
                BranchOutput::failure(self.id.clone(), index, BranchError::retryable(message))
            }
        }
    }
}

/// A branch body iterated over a collection with bounded concurrency
///
/// Loop branches cannot declare dependencies; every iteration receives one
/// element of the collection together with its index.
#[derive(Clone)]
pub struct LoopBranch {
    id: Id,
    deterministic: bool,
    body: LoopBody,
}

impl LoopBranch {
    /// Create a deterministic loop branch
    pub fn new<F, Fut>(id: impl Into<Id>, body: F) -> Self
    where
        F: Fn(BranchContext, Json, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BranchResult> + Send + 'static,
    {
        Self {
            id: id.into(),
            deterministic: true,
            body: Arc::new(move |ctx, element, index| body(ctx, element, index).boxed()),
        }
    }

    /// Mark whether prior iteration outputs can be reused on retry
    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Branch identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub(crate) async fn run(&self, ctx: BranchContext, element: Json, index: usize) -> BranchOutput {
        match AssertUnwindSafe((self.body)(ctx, element, index))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(failure)) => {
                warn!("Branch [{}.{}] failed: {}", self.id, index, failure);
                BranchOutput::failure(self.id.clone(), index, BranchError::from(&failure))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Branch [{}.{}] panicked: {}", self.id, index, message);
                BranchOutput::failure(self.id.clone(), index, BranchError::retryable(message))
            }
        }
    }
}

/// Wrapper capability applied to every branch body at registration
///
/// Lets external layers substitute an intercepting body (for example a
/// transactional proxy). The engine never inspects bodies beyond invoking
/// them; the default implementation is the identity.
pub trait BranchWrapper: Send + Sync {
    /// Wrap a regular branch body
    fn wrap_branch(&self, body: BranchBody) -> BranchBody {
        body
    }

    /// Wrap a loop branch body
    fn wrap_loop_branch(&self, body: LoopBody) -> LoopBody {
        body
    }
}

/// Immutable descriptor of one registered operation
pub struct Operation {
    id: Id,
    branches: Vec<Branch>,
    loop_branches: HashMap<Id, LoopBranch>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
}

impl Operation {
    /// Start building an operation descriptor
    pub fn builder(id: impl Into<Id>) -> OperationBuilder {
        OperationBuilder::new(id)
    }

    /// Operation identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Execute one attempt of this operation's regular branches
    pub(crate) async fn execute(&self, context: Arc<OperationContext>) -> Result<Response> {
        let (input, preserved) = match context.request().retry.clone() {
            Some(carrier) => {
                let preserved = retry::completed_outputs(&carrier);
                (carrier.branch_input, preserved)
            }
            None => {
                let input = match &self.before {
                    Some(hook) => hook(context.as_ref())?,
                    None => BranchInput::new(context.request().payload.clone()),
                };
                (input, HashMap::new())
            }
        };
        context.set_branch_input(input);

        let slots: HashMap<Id, Arc<Slot>> = self
            .branches
            .iter()
            .map(|branch| (branch.id.clone(), Slot::new()))
            .collect();

        let pool = context.service().worker_pool().clone();
        for branch in &self.branches {
            let prior = preserved.get(&branch.id).cloned();
            Self::execute_branch(&pool, &context, branch, &slots, prior);
        }

        let ordered: Vec<Arc<Slot>> = self
            .branches
            .iter()
            .filter_map(|branch| slots.get(&branch.id).cloned())
            .collect();
        for output in join_outputs(&ordered).await {
            context.add_branch_output(output);
        }

        self.response(context.as_ref())
    }

    /// Execute one attempt of a single loop branch over a collection
    pub(crate) async fn loop_branch(&self, invocation: &Loop) -> Result<Response> {
        let context = invocation.context.clone();

        let (input, preserved) = match invocation.retry.as_ref() {
            Some(carrier) => (
                carrier.branch_input.clone(),
                retry::completed_loop_outputs(carrier),
            ),
            None => (invocation.input.clone(), HashMap::new()),
        };
        context.set_branch_input(input);

        let branch = self
            .loop_branches
            .get(&invocation.branch_id)
            .ok_or_else(|| ExecutionError::branch_not_found(invocation.branch_id.clone()))?;

        let slots: Vec<Arc<Slot>> = (0..invocation.collection.len()).map(|_| Slot::new()).collect();
        let runner = context
            .service()
            .throttled()
            .runner(effective_concurrency(invocation.concurrency));

        for (index, element) in invocation.collection.iter().enumerate() {
            let prior = preserved
                .get(&retry::indexed_key(&invocation.branch_id, index))
                .cloned();
            Self::execute_branch_iteration(
                &runner,
                &context,
                branch,
                element.clone(),
                index,
                &slots[index],
                prior,
            )
            .await;
        }
        runner.close().await;

        for output in join_outputs(&slots).await {
            context.add_branch_output(output);
        }

        self.response(context.as_ref())
    }

    fn execute_branch(
        pool: &WorkerPool,
        context: &Arc<OperationContext>,
        branch: &Branch,
        slots: &HashMap<Id, Arc<Slot>>,
        prior: Option<BranchOutput>,
    ) {
        let Some(slot) = slots.get(&branch.id).cloned() else {
            return;
        };
        match prior {
            Some(output) if branch.deterministic => {
                debug!("Reusing prior output for branch [{}]", branch.id);
                slot.complete(output);
            }
            _ => {
                let dependency_slots = branch
                    .dependencies
                    .iter()
                    .filter_map(|id| slots.get(id).cloned())
                    .collect();
                let ctx =
                    BranchContext::new(branch.id.clone(), context.clone(), 0, dependency_slots);
                let branch = branch.clone();
                pool.spawn(async move {
                    let ctx = ctx.wait_for_dependencies().await;
                    let output = branch.run(ctx).await;
                    slot.complete(output);
                });
            }
        }
    }

    async fn execute_branch_iteration(
        runner: &Runner,
        context: &Arc<OperationContext>,
        branch: &LoopBranch,
        element: Json,
        index: usize,
        slot: &Arc<Slot>,
        prior: Option<BranchOutput>,
    ) {
        match prior {
            Some(output) if branch.deterministic => {
                debug!("Reusing prior output for branch [{}.{}]", branch.id, index);
                slot.complete(output);
            }
            _ => {
                let ctx = BranchContext::new(branch.id.clone(), context.clone(), index, Vec::new());
                let branch_id = branch.id.clone();
                let task_slot = slot.clone();
                let branch = branch.clone();
                let submitted = runner
                    .run(async move {
                        let output = branch.run(ctx, element, index).await;
                        task_slot.complete(output);
                    })
                    .await;
                if let Err(error) = submitted {
                    warn!("Submit failed for branch [{}.{}]: {}", branch_id, index, error);
                    slot.complete(BranchOutput::failure(
                        branch_id,
                        index,
                        BranchError::retryable(error.to_string()),
                    ));
                }
            }
        }
    }

    fn response(&self, context: &OperationContext) -> Result<Response> {
        if context.has_retry() {
            return Ok(context
                .response_builder()
                .retry(Retry::new(context.branch_input(), context.branch_outputs())));
        }
        match &self.after {
            Some(hook) => hook(context),
            None => {
                let payload = serde_json::to_value(context.branch_outputs())
                    .map_err(ramify_core::Error::from)?;
                Ok(context.response_builder().payload(payload))
            }
        }
    }
}

/// Builder for [`Operation`] descriptors
///
/// The explicit registration surface: callers hand the engine branch
/// callables directly; validation happens in [`OperationBuilder::build`].
pub struct OperationBuilder {
    id: Id,
    branches: Vec<Branch>,
    loop_branches: Vec<LoopBranch>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
    wrapper: Option<Arc<dyn BranchWrapper>>,
}

impl OperationBuilder {
    /// Create a builder for the given operation id
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            branches: Vec::new(),
            loop_branches: Vec::new(),
            before: None,
            after: None,
            wrapper: None,
        }
    }

    /// Add a regular branch
    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    /// Add a loop branch
    pub fn loop_branch(mut self, branch: LoopBranch) -> Self {
        self.loop_branches.push(branch);
        self
    }

    /// Set the hook producing the attempt's branch input
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&OperationContext) -> Result<BranchInput> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }

    /// Set the hook producing the final response
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&OperationContext) -> Result<Response> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(hook));
        self
    }

    /// Install a wrapper applied to every branch body
    pub fn wrapper(mut self, wrapper: Arc<dyn BranchWrapper>) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    /// Validate the descriptor and build the operation
    pub fn build(self) -> Result<Operation> {
        let mut branch_ids: HashSet<Id> = HashSet::new();
        for branch in &self.branches {
            if !branch_ids.insert(branch.id.clone()) {
                return Err(ExecutionError::validation(format!(
                    "Duplicate branch id [{}] in operation [{}]",
                    branch.id, self.id
                )));
            }
        }
        for branch in &self.branches {
            for dependency in &branch.dependencies {
                if !branch_ids.contains(dependency) {
                    return Err(ExecutionError::validation(format!(
                        "Branch [{}] depends on unknown branch [{}]",
                        branch.id, dependency
                    )));
                }
            }
        }

        let mut loop_branches = HashMap::new();
        for branch in &self.loop_branches {
            if loop_branches.contains_key(&branch.id) {
                return Err(ExecutionError::validation(format!(
                    "Duplicate loop branch id [{}] in operation [{}]",
                    branch.id, self.id
                )));
            }
            loop_branches.insert(branch.id.clone(), branch.clone());
        }

        let mut branches = self.branches;
        if let Some(wrapper) = &self.wrapper {
            for branch in &mut branches {
                branch.body = wrapper.wrap_branch(branch.body.clone());
            }
            for branch in loop_branches.values_mut() {
                branch.body = wrapper.wrap_loop_branch(branch.body.clone());
            }
        }

        Ok(Operation {
            id: self.id,
            branches,
            loop_branches,
            before: self.before,
            after: self.after,
        })
    }
}
