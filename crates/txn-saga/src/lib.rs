//! In-process transaction coordinator built on the saga pattern.
//!
//! A transaction body composes fallible steps, each pairing a forward action
//! with a compensating action. When the body fails, faults or is cancelled,
//! every completed step is compensated in reverse order (LIFO) before the
//! outcome is reported.

mod audit;
mod builder;
mod config;
mod error;
mod scope;
mod stack;
mod step;
mod transact;

pub use audit::{StepRecord, StepStatus, TxnAuditLog};
pub use builder::TxnBuilder;
pub use config::{TxnConfig, load_toml};
pub use error::{
    BoxError, CompensationError, ConfigError, HookError, HookPhase, OptionRaiseExt, RaiseExt,
    TxnError, ensure,
};
pub use scope::{StepLabel, TxnScope};
pub use step::TxnStep;
pub use transact::{Txn, TxnOutcome, TxnReport, run_txn, txn};

pub use tokio_util::sync::CancellationToken;
pub use uuid::Uuid;
