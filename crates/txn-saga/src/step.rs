use std::future::Future;

use crate::error::{BoxError, TxnError};

/// A reusable step that can be executed and compensated.
///
/// The struct form of a saga step: implementors own whatever dependencies
/// they need and are run through [`crate::TxnScope::run_step`], which
/// registers the compensation once `execute` succeeds.
///
/// # Type Parameters
///
/// - `E`: the typed failure of the enclosing transaction
pub trait TxnStep<E>: Send + Sync + 'static {
    /// Data received from the caller.
    type Input: Send + 'static;

    /// Data produced by the step and handed to its compensation.
    type Output: Clone + Send + 'static;

    /// Human-readable name for logging and error messages.
    fn name(&self) -> &'static str;

    /// Execute the step.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails to complete; no compensation is
    /// registered in that case.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, TxnError<E>>> + Send;

    /// Compensate (undo) the step's effects.
    ///
    /// Called during rollback with the output `execute` produced. The
    /// default implementation is a no-op, suitable for read-only steps.
    ///
    /// # Errors
    ///
    /// Returns an error if compensation fails. The drain continues with the
    /// remaining compensations regardless.
    fn compensate(
        &self,
        output: Self::Output,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        let _ = output;
        async { Ok(()) }
    }

    /// Human-readable description of what compensation will do.
    fn compensation_description(&self) -> String {
        format!("undo {}", self.name())
    }
}
