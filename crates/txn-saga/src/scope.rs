use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BoxError, TxnError};
use crate::step::TxnStep;

/// Label of a tracked step, used by the audit log and compensation errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLabel {
    name: Option<String>,
    description: Option<String>,
}

impl StepLabel {
    /// A step named after its registration order (`step-<n>`).
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl From<&str> for StepLabel {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for StepLabel {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

/// The interface a transaction body programs against.
///
/// Every tracked step goes through [`TxnScope::saga_step`]: the action runs
/// first and its compensation is registered only once it has completed.
/// Hooks and uncompensable side effects are recorded on the same scope.
pub trait TxnScope<E> {
    /// Globally unique id of this run.
    fn id(&self) -> Uuid;

    /// Process-local, monotonically increasing run number.
    fn local_runtime_id(&self) -> u64;

    /// Queue `f` to run after a successful run.
    ///
    /// The outcome is already fixed when success hooks run, so they should
    /// only hold non-critical side effects.
    fn on_success(&self, f: impl Fn() + Send + Sync + 'static);

    /// Queue `f` to run after a failed run, once compensation has finished.
    fn on_rollback(&self, f: impl Fn() + Send + Sync + 'static);

    /// Queue `f` to run exactly once after the run, whatever the outcome.
    fn on_completed(&self, f: impl Fn() + Send + Sync + 'static);

    /// Run a side effect that has no compensation, recording it under `name`.
    ///
    /// A later failure leaves the effect applied. With more than one such
    /// effect in a run, a failure between them leaves the earlier ones in
    /// place while the later ones never happen.
    fn register_uncompensable<T>(&self, name: &str, f: impl FnOnce() -> T) -> T;

    /// Run a side effect that has no compensation.
    fn register_uncompensable_side_effect<T>(&self, f: impl FnOnce() -> T) -> T {
        self.register_uncompensable("uncompensable", f)
    }

    /// Cooperative cancellation point.
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Cancelled` once cancellation of the run was
    /// requested or its compensation has started.
    fn checkpoint(&self) -> Result<(), TxnError<E>>;

    /// Run `action` and, once it completes, register `compensation` bound to
    /// its result.
    ///
    /// A failing action registers nothing; earlier steps keep their
    /// compensations and the error is handed back to the caller. A step on
    /// another task that completes after compensation started is undone
    /// right away and returns `TxnError::Cancelled`.
    fn saga_step<A, F, Fut, C, CFut>(
        &self,
        label: StepLabel,
        action: F,
        compensation: C,
    ) -> impl Future<Output = Result<A, TxnError<E>>> + Send
    where
        A: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<A, TxnError<E>>> + Send,
        C: FnOnce(A) -> CFut + Send + 'static,
        CFut: Future<Output = Result<(), BoxError>> + Send + 'static;

    /// [`TxnScope::saga_step`] with an anonymous label.
    fn saga<A, F, Fut, C, CFut>(
        &self,
        action: F,
        compensation: C,
    ) -> impl Future<Output = Result<A, TxnError<E>>> + Send
    where
        A: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<A, TxnError<E>>> + Send,
        C: FnOnce(A) -> CFut + Send + 'static,
        CFut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.saga_step(StepLabel::anonymous(), action, compensation)
    }

    /// [`TxnScope::saga_step`] labelled `name`.
    fn named_saga<A, F, Fut, C, CFut>(
        &self,
        name: &str,
        action: F,
        compensation: C,
    ) -> impl Future<Output = Result<A, TxnError<E>>> + Send
    where
        A: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<A, TxnError<E>>> + Send,
        C: FnOnce(A) -> CFut + Send + 'static,
        CFut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.saga_step(StepLabel::named(name), action, compensation)
    }

    /// Run a [`TxnStep`] as a tracked step.
    fn run_step<S>(
        &self,
        step: Arc<S>,
        input: S::Input,
    ) -> impl Future<Output = Result<S::Output, TxnError<E>>> + Send
    where
        S: TxnStep<E>,
    {
        let label = StepLabel::named(step.name()).with_description(step.compensation_description());
        let undo = Arc::clone(&step);
        self.saga_step(
            label,
            move || async move { step.execute(input).await },
            move |output| async move { undo.compensate(output).await },
        )
    }
}
