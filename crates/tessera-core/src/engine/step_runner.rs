//! Step executor seam for the five step kinds.
//!
//! The engine never performs side effects itself. A `StepExecutor`
//! implementation (supplied by the embedding application) does the work for
//! each `StepAction` variant; `dispatch` routes a step to the right method
//! with an exhaustive match, and `BoxStepExecutor` erases the concrete type
//! so the executor can be shared across spawned unit tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tessera_types::unit::{FileOperation, StepAction, StepDefinition};

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// What a step executor reports for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Duration as measured by the executor itself.
    pub duration_ms: u64,
    /// The step had nothing to do. Counts as success.
    pub skipped: bool,
}

impl StepOutcome {
    pub fn succeeded(output: Option<Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            duration_ms: 0,
            skipped: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            success: true,
            output: None,
            error: None,
            duration_ms: 0,
            skipped: true,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// A single failed attempt. Recoverable through the retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    #[error("step timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("execution cancelled")]
    Cancelled,

    #[error("unsupported step: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Per-kind requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct FileRequest<'a> {
    pub path: &'a str,
    pub operation: FileOperation,
    pub content: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub working_dir: Option<&'a str>,
    pub env: &'a HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateRequest<'a> {
    pub template: &'a str,
    pub destination: &'a str,
    pub variables: &'a HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct ApiCallRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub headers: &'a HashMap<String, String>,
    pub body: Option<&'a Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct TestRequest<'a> {
    pub target: &'a str,
    pub filter: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// StepExecutor trait
// ---------------------------------------------------------------------------

/// Performs the side effects of steps, one method per step kind.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods.
/// Implementations may return `Ok` with `success = false` or `Err`; both
/// count as a failed attempt.
pub trait StepExecutor: Send + Sync {
    fn execute_file(
        &self,
        step: &StepDefinition,
        request: FileRequest<'_>,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<StepOutcome, StepError>> + Send;

    fn execute_command(
        &self,
        step: &StepDefinition,
        request: CommandRequest<'_>,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<StepOutcome, StepError>> + Send;

    fn execute_template(
        &self,
        step: &StepDefinition,
        request: TemplateRequest<'_>,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<StepOutcome, StepError>> + Send;

    fn execute_api_call(
        &self,
        step: &StepDefinition,
        request: ApiCallRequest<'_>,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<StepOutcome, StepError>> + Send;

    fn execute_test(
        &self,
        step: &StepDefinition,
        request: TestRequest<'_>,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<StepOutcome, StepError>> + Send;

    /// Idempotency hook: `true` means the step's effect is already in place
    /// (e.g. from an attempt that crashed after applying it). The engine then
    /// records the step as a skipped success without executing it.
    fn is_already_applied(
        &self,
        _step: &StepDefinition,
        _ctx: &ExecutionContext,
    ) -> impl Future<Output = bool> + Send {
        async { false }
    }
}

/// Route a step to the executor method for its kind.
pub async fn dispatch<E>(
    executor: &E,
    step: &StepDefinition,
    ctx: &ExecutionContext,
) -> Result<StepOutcome, StepError>
where
    E: StepExecutor + ?Sized,
{
    match &step.action {
        StepAction::File {
            path,
            operation,
            content,
        } => {
            let request = FileRequest {
                path,
                operation: *operation,
                content: content.as_deref(),
            };
            executor.execute_file(step, request, ctx).await
        }
        StepAction::Command {
            program,
            args,
            working_dir,
            env,
        } => {
            let request = CommandRequest {
                program,
                args,
                working_dir: working_dir.as_deref(),
                env,
            };
            executor.execute_command(step, request, ctx).await
        }
        StepAction::Template {
            template,
            destination,
            variables,
        } => {
            let request = TemplateRequest {
                template,
                destination,
                variables,
            };
            executor.execute_template(step, request, ctx).await
        }
        StepAction::ApiCall {
            method,
            url,
            headers,
            body,
        } => {
            let request = ApiCallRequest {
                method,
                url,
                headers,
                body: body.as_ref(),
            };
            executor.execute_api_call(step, request, ctx).await
        }
        StepAction::Test { target, filter } => {
            let request = TestRequest {
                target,
                filter: filter.as_deref(),
            };
            executor.execute_test(step, request, ctx).await
        }
    }
}

// ---------------------------------------------------------------------------
// Dynamic dispatch
// ---------------------------------------------------------------------------

/// Object-safe version of [`StepExecutor`] with boxed futures.
pub trait StepExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a StepDefinition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>>;

    fn is_already_applied_boxed<'a>(
        &'a self,
        step: &'a StepDefinition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a StepDefinition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>> {
        Box::pin(dispatch(self, step, ctx))
    }

    fn is_already_applied_boxed<'a>(
        &'a self,
        step: &'a StepDefinition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.is_already_applied(step, ctx))
    }
}

/// Type-erased, cheaply cloneable step executor.
#[derive(Clone)]
pub struct BoxStepExecutor {
    inner: Arc<dyn StepExecutorDyn>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub async fn execute(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        self.inner.execute_boxed(step, ctx).await
    }

    pub async fn is_already_applied(&self, step: &StepDefinition, ctx: &ExecutionContext) -> bool {
        self.inner.is_already_applied_boxed(step, ctx).await
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxStepExecutor")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
