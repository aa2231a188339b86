//! Postcondition checking after every step of a unit succeeded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tessera_types::execution::PostconditionResult;
use tessera_types::unit::{Postcondition, PostconditionKind};

use super::context::ExecutionContext;

/// Evaluates declared postconditions. Supplied by the embedding application.
pub trait PostconditionChecker: Send + Sync {
    /// Check one postcondition. Errors are reported as a failed result.
    fn check(
        &self,
        postcondition: &Postcondition,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<PostconditionResult, String>> + Send;
}

/// Checker that only understands `OutputContains`, evaluated against the
/// step outputs recorded in the context. Every other kind fails with an
/// explanatory message, so a spec relying on them without a real checker
/// never passes silently.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputChecker;

impl PostconditionChecker for OutputChecker {
    async fn check(
        &self,
        postcondition: &Postcondition,
        ctx: &ExecutionContext,
    ) -> Result<PostconditionResult, String> {
        let (passed, message) = match &postcondition.check {
            PostconditionKind::OutputContains { step_id, needle } => match ctx.step_output(step_id) {
                Some(output) => {
                    let text = match output {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if text.contains(needle.as_str()) {
                        (true, format!("output of '{step_id}' contains '{needle}'"))
                    } else {
                        (false, format!("output of '{step_id}' does not contain '{needle}'"))
                    }
                }
                None => (false, format!("no output recorded for step '{step_id}'")),
            },
            PostconditionKind::FileExists { .. }
            | PostconditionKind::CommandSucceeds { .. }
            | PostconditionKind::Custom { .. } => (
                false,
                format!("no checker configured for postcondition '{}'", postcondition.id),
            ),
        };
        Ok(PostconditionResult {
            postcondition_id: postcondition.id.clone(),
            passed,
            message,
            checked_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Dynamic dispatch
// ---------------------------------------------------------------------------

/// Object-safe version of [`PostconditionChecker`] with boxed futures.
pub trait PostconditionCheckerDyn: Send + Sync {
    fn check_boxed<'a>(
        &'a self,
        postcondition: &'a Postcondition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<PostconditionResult, String>> + Send + 'a>>;
}

impl<T: PostconditionChecker> PostconditionCheckerDyn for T {
    fn check_boxed<'a>(
        &'a self,
        postcondition: &'a Postcondition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<PostconditionResult, String>> + Send + 'a>> {
        Box::pin(self.check(postcondition, ctx))
    }
}

#[derive(Clone)]
pub struct BoxPostconditionChecker {
    inner: Arc<dyn PostconditionCheckerDyn>,
}

impl BoxPostconditionChecker {
    pub fn new<T: PostconditionChecker + 'static>(checker: T) -> Self {
        Self {
            inner: Arc::new(checker),
        }
    }

    /// Check one postcondition, turning a checker error into a failed result.
    pub async fn check(&self, postcondition: &Postcondition, ctx: &ExecutionContext) -> PostconditionResult {
        match self.inner.check_boxed(postcondition, ctx).await {
            Ok(result) => result,
            Err(message) => PostconditionResult {
                postcondition_id: postcondition.id.clone(),
                passed: false,
                message,
                checked_at: Utc::now(),
            },
        }
    }
}

impl Default for BoxPostconditionChecker {
    fn default() -> Self {
        Self::new(OutputChecker)
    }
}

impl std::fmt::Debug for BoxPostconditionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxPostconditionChecker")
    }
}
