use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error produced by compensations and faulting steps.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error from a failed compensation.
///
/// The first compensation that fails during a drain becomes the primary
/// error; every later failure of the same drain is kept in `suppressed`.
#[derive(Debug, Error)]
#[error("compensation failed for step '{step}': {description}")]
pub struct CompensationError {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The underlying error.
    #[source]
    pub source: BoxError,
    /// Later compensation failures of the same drain.
    pub suppressed: Vec<CompensationError>,
}

impl CompensationError {
    pub(crate) fn new(
        step: impl Into<String>,
        description: impl Into<String>,
        source: BoxError,
    ) -> Self {
        Self {
            step: step.into(),
            description: description.into(),
            source,
            suppressed: Vec::new(),
        }
    }

    /// Attach `other` (and anything it suppressed) as secondary detail.
    pub(crate) fn suppress(&mut self, mut other: CompensationError) {
        let nested = std::mem::take(&mut other.suppressed);
        self.suppressed.push(other);
        self.suppressed.extend(nested);
    }

    /// The primary failure followed by every suppressed one, in drain order.
    pub fn failures(&self) -> impl Iterator<Item = &CompensationError> {
        std::iter::once(self).chain(self.suppressed.iter())
    }

    /// Number of compensations that failed, primary included.
    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.suppressed.len()
    }
}

/// Failure of a transaction body, step or run.
///
/// `Raised` is the typed, expected failure channel. `Cancelled` and `Fault`
/// are signals: they trigger the same unwind but are never confused with a
/// business error. Errors created inside the body carry no compensation
/// detail; the orchestrator attaches it after draining.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TxnError<E> {
    /// A step or the body raised a typed failure.
    #[error("transaction raised {error:?}")]
    Raised {
        /// The typed failure.
        error: E,
        /// Compensation failures observed while unwinding.
        #[source]
        compensation: Option<CompensationError>,
    },

    /// Cancellation was requested while the run was in flight.
    #[error("transaction cancelled")]
    Cancelled {
        /// Compensation failures observed while unwinding.
        #[source]
        compensation: Option<CompensationError>,
    },

    /// An unexpected failure that is not part of the typed channel.
    #[error("transaction faulted")]
    Fault {
        /// The underlying fault.
        #[source]
        source: BoxError,
        /// Compensation failures observed while unwinding.
        compensation: Option<CompensationError>,
    },
}

impl<E> TxnError<E> {
    /// Raise a typed failure.
    pub fn raise(error: E) -> Self {
        Self::Raised {
            error,
            compensation: None,
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::Cancelled { compensation: None }
    }

    pub fn fault(source: impl Into<BoxError>) -> Self {
        Self::Fault {
            source: source.into(),
            compensation: None,
        }
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        matches!(self, Self::Raised { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }

    /// The typed failure, if this is one.
    #[must_use]
    pub fn raised(&self) -> Option<&E> {
        match self {
            Self::Raised { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Unwrap the typed failure, handing signals back unchanged.
    ///
    /// # Errors
    ///
    /// Returns `self` when this is a cancellation or a fault.
    pub fn into_raised(self) -> Result<E, Self> {
        match self {
            Self::Raised { error, .. } => Ok(error),
            other => Err(other),
        }
    }

    /// Translate the typed failure, e.g. when binding a nested unit of work
    /// with its own error type. Signals pass through untouched.
    pub fn map_raised<F>(self, f: impl FnOnce(E) -> F) -> TxnError<F> {
        match self {
            Self::Raised {
                error,
                compensation,
            } => TxnError::Raised {
                error: f(error),
                compensation,
            },
            Self::Cancelled { compensation } => TxnError::Cancelled { compensation },
            Self::Fault {
                source,
                compensation,
            } => TxnError::Fault {
                source,
                compensation,
            },
        }
    }

    /// Primary compensation failure of the unwind, if any.
    #[must_use]
    pub fn compensation(&self) -> Option<&CompensationError> {
        match self {
            Self::Raised { compensation, .. }
            | Self::Cancelled { compensation }
            | Self::Fault { compensation, .. } => compensation.as_ref(),
        }
    }

    /// Every compensation failure of the unwind, primary first.
    pub fn compensation_failures(&self) -> impl Iterator<Item = &CompensationError> {
        self.compensation()
            .into_iter()
            .flat_map(CompensationError::failures)
    }

    pub(crate) fn with_compensation(mut self, failure: Option<CompensationError>) -> Self {
        let Some(failure) = failure else {
            return self;
        };
        let slot = match &mut self {
            Self::Raised { compensation, .. }
            | Self::Cancelled { compensation }
            | Self::Fault { compensation, .. } => compensation,
        };
        if let Some(primary) = slot.as_mut() {
            primary.suppress(failure);
        } else {
            *slot = Some(failure);
        }
        self
    }
}

/// Raise `error` unless `condition` holds.
///
/// # Errors
///
/// Returns `TxnError::Raised` when `condition` is false.
pub fn ensure<E>(condition: bool, error: impl FnOnce() -> E) -> Result<(), TxnError<E>> {
    if condition {
        Ok(())
    } else {
        Err(TxnError::raise(error()))
    }
}

/// Lift a plain `Result` into the typed failure channel.
pub trait RaiseExt<T, E> {
    /// # Errors
    ///
    /// Returns `TxnError::Raised` carrying the wrapped error.
    fn or_raise(self) -> Result<T, TxnError<E>>;
}

impl<T, E> RaiseExt<T, E> for Result<T, E> {
    fn or_raise(self) -> Result<T, TxnError<E>> {
        self.map_err(TxnError::raise)
    }
}

/// Lift a missing value into the typed failure channel.
pub trait OptionRaiseExt<T> {
    /// # Errors
    ///
    /// Returns `TxnError::Raised` with the error built by `error` when the
    /// value is absent.
    fn or_raise_with<E>(self, error: impl FnOnce() -> E) -> Result<T, TxnError<E>>;
}

impl<T> OptionRaiseExt<T> for Option<T> {
    fn or_raise_with<E>(self, error: impl FnOnce() -> E) -> Result<T, TxnError<E>> {
        self.ok_or_else(|| TxnError::raise(error()))
    }
}

/// Which hook list a failing hook belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Success,
    Rollback,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Rollback => f.write_str("rollback"),
        }
    }
}

/// A hook that panicked. Hooks never alter the outcome of a run; their
/// failures are collected and reported next to it.
#[derive(Debug, Clone, Error)]
#[error("{phase} hook #{index} panicked: {message}")]
pub struct HookError {
    pub phase: HookPhase,
    /// Position of the hook in registration order.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
