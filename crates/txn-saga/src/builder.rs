use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audit::TxnAuditLog;
use crate::error::{BoxError, CompensationError, HookError, HookPhase, TxnError, panic_message};
use crate::scope::{StepLabel, TxnScope};
use crate::stack::AtomicStack;

static LOCAL_RUNTIME_ID: AtomicU64 = AtomicU64::new(0);

type CompensationFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;
type UndoWith<A> = Box<dyn FnOnce(A) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

struct Compensation {
    step: String,
    description: String,
    audit_index: usize,
    undo: Mutex<Option<CompensationFn>>,
}

impl Compensation {
    fn take(&self) -> Option<CompensationFn> {
        self.undo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct Hook {
    f: Box<dyn Fn() + Send + Sync>,
}

impl Hook {
    fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

/// State owned by exactly one transaction run.
pub(crate) struct TxnState {
    id: Uuid,
    local_runtime_id: u64,
    compensations: AtomicStack<Compensation>,
    success_hooks: AtomicStack<Hook>,
    rollback_hooks: AtomicStack<Hook>,
    uncompensable: AtomicUsize,
    steps: AtomicUsize,
    sealed: AtomicBool,
    audit: Mutex<TxnAuditLog>,
}

impl TxnState {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            local_runtime_id: LOCAL_RUNTIME_ID.fetch_add(1, Ordering::SeqCst) + 1,
            compensations: AtomicStack::new(),
            success_hooks: AtomicStack::new(),
            rollback_hooks: AtomicStack::new(),
            uncompensable: AtomicUsize::new(0),
            steps: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            audit: Mutex::new(TxnAuditLog::new()),
        }
    }

    fn audit(&self) -> MutexGuard<'_, TxnAuditLog> {
        self.audit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn audit_snapshot(&self) -> TxnAuditLog {
        self.audit().clone()
    }

    pub(crate) fn uncompensable_actions(&self) -> usize {
        self.uncompensable.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_compensations(&self) -> usize {
        self.compensations.len()
    }

    /// Whether the stack has started draining. No step may start after that.
    fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Seal the run, then drain the compensation stack, most recent step first.
    ///
    /// Every entry is attempted. The first failure becomes the primary
    /// error and later ones are attached to it as suppressed.
    pub(crate) async fn total_compensation(&self) -> Result<(), CompensationError> {
        self.sealed.store(true, Ordering::SeqCst);
        self.compensate(self.compensations.drain()).await
    }

    async fn compensate(&self, entries: Vec<Arc<Compensation>>) -> Result<(), CompensationError> {
        let mut primary: Option<CompensationError> = None;

        for entry in entries {
            let Some(undo) = entry.take() else {
                continue;
            };
            debug!(step = %entry.step, "running compensation");

            let outcome = AssertUnwindSafe(async move { undo().await })
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(source),
                Err(payload) => Some(BoxError::from(format!(
                    "compensation panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            };

            let Some(source) = failure else {
                self.audit().record_compensated(entry.audit_index);
                continue;
            };
            self.audit().record_compensation_failed(entry.audit_index);
            error!(step = %entry.step, error = %source, "compensation failed");

            let failure =
                CompensationError::new(entry.step.clone(), entry.description.clone(), source);
            if let Some(primary) = primary.as_mut() {
                primary.suppress(failure);
            } else {
                primary = Some(failure);
            }
        }

        primary.map_or(Ok(()), Err)
    }

    pub(crate) fn run_success_hooks(&self) -> Vec<HookError> {
        run_hooks(&self.success_hooks, HookPhase::Success)
    }

    pub(crate) fn run_rollback_hooks(&self) -> Vec<HookError> {
        run_hooks(&self.rollback_hooks, HookPhase::Rollback)
    }
}

fn run_hooks(hooks: &AtomicStack<Hook>, phase: HookPhase) -> Vec<HookError> {
    let mut entries = hooks.drain();
    entries.reverse();

    let mut failures = Vec::new();
    for (index, hook) in entries.iter().enumerate() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (hook.f)())) {
            let failure = HookError {
                phase,
                index,
                message: panic_message(payload.as_ref()),
            };
            warn!(error = %failure, "hook failed");
            failures.push(failure);
        }
    }
    failures
}

/// Concrete scope of one transaction run.
///
/// Owns the compensation stack, both hook lists, the uncompensable-action
/// counter and the run identity. Cloning yields another handle to the same
/// run, which lets concurrent sub-steps and nested units of work share it.
pub struct TxnBuilder<E> {
    state: Arc<TxnState>,
    cancel: CancellationToken,
    _failure: PhantomData<fn() -> E>,
}

impl<E> Clone for TxnBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            _failure: PhantomData,
        }
    }
}

impl<E> fmt::Debug for TxnBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnBuilder")
            .field("id", &self.state.id)
            .field("local_runtime_id", &self.state.local_runtime_id)
            .field("pending_compensations", &self.pending_compensations())
            .field("uncompensable_actions", &self.uncompensable_actions())
            .finish_non_exhaustive()
    }
}

impl<E> TxnBuilder<E> {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            state: Arc::new(TxnState::new()),
            cancel,
            _failure: PhantomData,
        }
    }

    /// Another handle to the same run with a different typed failure.
    ///
    /// Lets a nested unit of work written against its own error type share
    /// the run; translate its failures back with [`TxnError::map_raised`].
    #[must_use]
    pub fn rebind<F>(&self) -> TxnBuilder<F> {
        TxnBuilder {
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            _failure: PhantomData,
        }
    }

    pub(crate) fn state(&self) -> Arc<TxnState> {
        Arc::clone(&self.state)
    }

    /// Number of side effects registered without compensation.
    #[must_use]
    pub fn uncompensable_actions(&self) -> usize {
        self.state.uncompensable_actions()
    }

    /// Number of compensations registered and not yet drained.
    #[must_use]
    pub fn pending_compensations(&self) -> usize {
        self.state.pending_compensations()
    }

    /// Token that cancels this run when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Snapshot of the run's audit log.
    #[must_use]
    pub fn audit_log(&self) -> TxnAuditLog {
        self.state.audit_snapshot()
    }

    pub(crate) async fn total_compensation(&self) -> Result<(), CompensationError> {
        self.state.total_compensation().await
    }

    pub(crate) fn run_success_hooks(&self) -> Vec<HookError> {
        self.state.run_success_hooks()
    }

    pub(crate) fn run_rollback_hooks(&self) -> Vec<HookError> {
        self.state.run_rollback_hooks()
    }
}

impl<E> TxnScope<E> for TxnBuilder<E> {
    fn id(&self) -> Uuid {
        self.state.id
    }

    fn local_runtime_id(&self) -> u64 {
        self.state.local_runtime_id
    }

    fn on_success(&self, f: impl Fn() + Send + Sync + 'static) {
        self.state.success_hooks.push(Hook::new(f));
    }

    fn on_rollback(&self, f: impl Fn() + Send + Sync + 'static) {
        self.state.rollback_hooks.push(Hook::new(f));
    }

    fn on_completed(&self, f: impl Fn() + Send + Sync + 'static) {
        let hook = Arc::new(Hook::new(f));
        self.state.success_hooks.push_shared(Arc::clone(&hook));
        self.state.rollback_hooks.push_shared(hook);
    }

    fn register_uncompensable<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let count = self.state.uncompensable.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.audit().record_uncompensable(name);
        debug!(step = name, count, "running uncompensable side effect");
        f()
    }

    fn checkpoint(&self) -> Result<(), TxnError<E>> {
        if self.cancel.is_cancelled() || self.state.is_sealed() {
            Err(TxnError::cancelled())
        } else {
            Ok(())
        }
    }

    async fn saga_step<A, F, Fut, C, CFut>(
        &self,
        label: StepLabel,
        action: F,
        compensation: C,
    ) -> Result<A, TxnError<E>>
    where
        A: Clone + Send + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<A, TxnError<E>>> + Send,
        C: FnOnce(A) -> CFut + Send + 'static,
        CFut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let undo_with: UndoWith<A> = Box::new(move |value| compensation(value).boxed());
        self.checkpoint()?;

        let ordinal = self.state.steps.fetch_add(1, Ordering::SeqCst) + 1;
        let name = label
            .name()
            .map_or_else(|| format!("step-{ordinal}"), str::to_string);
        let description = label
            .description()
            .map_or_else(|| format!("undo {name}"), str::to_string);
        let audit_index = self.state.audit().record_start(&name);

        let value = match action().await {
            Ok(value) => value,
            Err(err) => {
                self.state.audit().record_failure(audit_index);
                debug!(step = %name, "step failed, nothing registered");
                return Err(err);
            }
        };

        let kept = value.clone();
        let undo: CompensationFn = Box::new(move || undo_with(kept));
        self.state
            .audit()
            .record_success(audit_index, description.clone());
        self.state.compensations.push(Compensation {
            step: name.clone(),
            description,
            audit_index,
            undo: Mutex::new(Some(undo)),
        });
        debug!(step = %name, "compensation registered");

        // A branch on another task can finish after the drain took the stack.
        if self.state.is_sealed() {
            warn!(step = %name, "step completed after compensation started, undoing it now");
            let late = self.state.compensations.drain();
            if let Err(failure) = self.state.compensate(late).await {
                error!(step = %name, failed = failure.count(), "late compensation failed");
            }
            return Err(TxnError::cancelled());
        }

        Ok(value)
    }
}
