use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::audit::TxnAuditLog;
use crate::builder::{TxnBuilder, TxnState};
use crate::config::TxnConfig;
use crate::error::{BoxError, CompensationError, HookError, TxnError, panic_message};
use crate::scope::TxnScope;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TxnOutcome {
    /// The body returned a value; success hooks ran.
    Committed,
    /// The body raised a typed failure; the run was compensated.
    RolledBack,
    /// Cancellation was requested; the run was compensated.
    Cancelled,
    /// The body returned a fault; the run was compensated.
    Faulted,
}

/// Everything known about a finished run besides its result.
#[derive(Debug, Clone)]
pub struct TxnReport {
    id: Uuid,
    local_runtime_id: u64,
    label: Option<String>,
    outcome: TxnOutcome,
    audit: TxnAuditLog,
    uncompensable_actions: usize,
    hook_failures: Vec<HookError>,
}

impl TxnReport {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn local_runtime_id(&self) -> u64 {
        self.local_runtime_id
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn outcome(&self) -> TxnOutcome {
        self.outcome
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.outcome == TxnOutcome::Committed
    }

    #[must_use]
    pub fn audit_log(&self) -> &TxnAuditLog {
        &self.audit
    }

    #[must_use]
    pub fn uncompensable_actions(&self) -> usize {
        self.uncompensable_actions
    }

    /// Hooks that panicked. They never change the outcome.
    #[must_use]
    pub fn hook_failures(&self) -> &[HookError] {
        &self.hook_failures
    }
}

/// A transaction body waiting to be run.
///
/// The body receives a fresh [`TxnBuilder`] per run and returns the run's
/// value or a [`TxnError`]. Build one with [`txn`].
pub struct Txn<F> {
    body: F,
    config: TxnConfig,
    cancel: CancellationToken,
}

/// Describe a transaction. Nothing runs until [`Txn::transact`].
pub fn txn<F>(body: F) -> Txn<F> {
    Txn {
        body,
        config: TxnConfig::default(),
        cancel: CancellationToken::new(),
    }
}

/// Run `body` as a transaction with default settings.
///
/// # Errors
///
/// See [`Txn::transact`].
pub async fn run_txn<E, A, F, Fut>(body: F) -> Result<A, TxnError<E>>
where
    F: FnOnce(TxnBuilder<E>) -> Fut,
    Fut: Future<Output = Result<A, TxnError<E>>>,
{
    txn(body).transact().await
}

enum Finish<A, E> {
    Value(A),
    Failed(TxnError<E>),
    Panicked(Box<dyn Any + Send>),
}

impl<F> Txn<F> {
    #[must_use]
    pub fn with_config(mut self, config: TxnConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancel the run when `token` is triggered.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the transaction.
    ///
    /// On success the success hooks run and the value is returned. On any
    /// failure the compensation stack is drained (most recent step first),
    /// the rollback hooks run and the error is returned with compensation
    /// failures attached. A panic in the body is resumed after the same
    /// unwind.
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Raised` for a typed failure of the body,
    /// `TxnError::Cancelled` when the run was cancelled and
    /// `TxnError::Fault` when the body faulted.
    pub async fn transact<E, A, Fut>(self) -> Result<A, TxnError<E>>
    where
        F: FnOnce(TxnBuilder<E>) -> Fut,
        Fut: Future<Output = Result<A, TxnError<E>>>,
    {
        self.transact_with_report().await.0
    }

    /// [`Txn::transact`], also returning the run's [`TxnReport`].
    pub async fn transact_with_report<E, A, Fut>(self) -> (Result<A, TxnError<E>>, TxnReport)
    where
        F: FnOnce(TxnBuilder<E>) -> Fut,
        Fut: Future<Output = Result<A, TxnError<E>>>,
    {
        let Self {
            body,
            config,
            cancel,
        } = self;
        let builder = TxnBuilder::new(cancel.clone());
        let span = info_span!(
            "txn",
            id = %builder.id(),
            local_runtime_id = builder.local_runtime_id(),
            label = config.label().unwrap_or_default()
        );

        drive(body, builder, config, cancel).instrument(span).await
    }
}

/// Compensates a run whose future is dropped before it settled.
///
/// Armed while the body runs and while it is being unwound; the drain and
/// the rollback hooks then run on a spawned task.
struct AbandonGuard {
    state: Option<Arc<TxnState>>,
}

impl AbandonGuard {
    fn disarm(&mut self) {
        self.state = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let pending = state.pending_compensations();
        let Ok(runtime) = Handle::try_current() else {
            error!(pending, "run abandoned outside a runtime, compensation skipped");
            return;
        };

        warn!(pending, "run abandoned, compensating");
        runtime.spawn(
            async move {
                if let Err(failure) = state.total_compensation().await {
                    error!(
                        failed = failure.count(),
                        "compensation incomplete after the run was abandoned"
                    );
                }
                state.run_rollback_hooks();
            }
            .in_current_span(),
        );
    }
}

async fn drive<E, A, F, Fut>(
    body: F,
    builder: TxnBuilder<E>,
    config: TxnConfig,
    cancel: CancellationToken,
) -> (Result<A, TxnError<E>>, TxnReport)
where
    F: FnOnce(TxnBuilder<E>) -> Fut,
    Fut: Future<Output = Result<A, TxnError<E>>>,
{
    debug!("transaction started");
    let mut guard = AbandonGuard {
        state: Some(builder.state()),
    };
    let scope = builder.clone();
    let run = AssertUnwindSafe(async move { body(scope).await }).catch_unwind();

    let finish = tokio::select! {
        biased;
        () = cancel.cancelled() => Finish::Failed(TxnError::cancelled()),
        result = run => match result {
            Ok(Ok(value)) => Finish::Value(value),
            Ok(Err(err)) => Finish::Failed(err),
            Err(payload) => Finish::Panicked(payload),
        },
    };

    match finish {
        Finish::Value(value) => {
            guard.disarm();
            let hook_failures = builder.run_success_hooks();
            info!("transaction committed");
            let report = report(&builder, &config, TxnOutcome::Committed, hook_failures);
            (Ok(value), report)
        }
        Finish::Failed(err) => {
            let outcome = match &err {
                TxnError::Raised { .. } => TxnOutcome::RolledBack,
                TxnError::Cancelled { .. } => TxnOutcome::Cancelled,
                TxnError::Fault { .. } => TxnOutcome::Faulted,
            };
            info!(
                ?outcome,
                pending = builder.pending_compensations(),
                "transaction failed, compensating"
            );
            let compensation = unwind(&builder, &config).await.err();
            guard.disarm();
            let hook_failures = builder.run_rollback_hooks();
            let report = report(&builder, &config, outcome, hook_failures);
            (Err(err.with_compensation(compensation)), report)
        }
        Finish::Panicked(payload) => {
            warn!(
                panic = %panic_message(payload.as_ref()),
                pending = builder.pending_compensations(),
                "transaction panicked, compensating"
            );
            if let Err(failure) = unwind(&builder, &config).await {
                error!(
                    failed = failure.count(),
                    "compensation incomplete while unwinding a panic"
                );
            }
            guard.disarm();
            // No report leaves this path; hook failures were logged by `run_hooks`.
            builder.run_rollback_hooks();
            panic::resume_unwind(payload)
        }
    }
}

/// Drain the compensation stack where cancellation cannot reach it.
///
/// With a Tokio runtime the drain runs as its own task, so it completes even
/// if the caller drops the run future mid-drain.
async fn unwind<E>(
    builder: &TxnBuilder<E>,
    config: &TxnConfig,
) -> Result<(), CompensationError> {
    if !config.shielded_drain() || builder.pending_compensations() == 0 {
        return builder.total_compensation().await;
    }
    let Ok(runtime) = Handle::try_current() else {
        return builder.total_compensation().await;
    };

    let state = builder.state();
    let drain = runtime.spawn(async move { state.total_compensation().await }.in_current_span());
    match drain.await {
        Ok(result) => result,
        Err(join) if join.is_panic() => panic::resume_unwind(join.into_panic()),
        Err(join) => Err(CompensationError::new(
            "<drain>",
            "drain the compensation stack",
            BoxError::from(join),
        )),
    }
}

fn report<E>(
    builder: &TxnBuilder<E>,
    config: &TxnConfig,
    outcome: TxnOutcome,
    hook_failures: Vec<HookError>,
) -> TxnReport {
    TxnReport {
        id: builder.id(),
        local_runtime_id: builder.local_runtime_id(),
        label: config.label().map(str::to_string),
        outcome,
        audit: builder.audit_log(),
        uncompensable_actions: builder.uncompensable_actions(),
        hook_failures,
    }
}
