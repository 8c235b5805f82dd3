//! The example transaction the demo runs over and over.
//!
//! Every decision point flips a coin, so repeated runs walk every path of
//! the transaction: each early exit, a failing tracked step, a failure
//! after both tracked steps and the committed run.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};
use txn_saga::{
    CancellationToken, OptionRaiseExt, RaiseExt, TxnBuilder, TxnError, TxnScope, ensure, txn,
};

use crate::config::Settings;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DomainError {
    message: String,
}

impl DomainError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CustomServiceError {
    #[error("COOKIE")]
    Cookie,
}

#[derive(Debug, Clone)]
struct Entity {
    id: i64,
    data: String,
}

/// Shared state of the demo: the coin and a counter of applied side effects.
pub struct Demo {
    rng: Mutex<StdRng>,
    side_effects: AtomicI64,
}

impl Demo {
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            rng: Mutex::new(rng),
            side_effects: AtomicI64::new(0),
        }
    }

    /// Side effects currently applied; compensations take theirs back.
    #[must_use]
    pub fn side_effects(&self) -> i64 {
        self.side_effects.load(Ordering::SeqCst)
    }

    fn some_check(&self) -> bool {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_bool(0.5)
    }

    fn side_effect<T>(&self, value: T) -> T {
        self.side_effects.fetch_add(1, Ordering::SeqCst);
        value
    }

    fn undo_side_effect(&self) {
        self.side_effects.fetch_sub(1, Ordering::SeqCst);
    }

    fn find_some_entity(&self, id: i64) -> Option<Entity> {
        if self.some_check() {
            None
        } else {
            Some(Entity {
                id,
                data: String::from("data"),
            })
        }
    }

    fn example_with_custom_service_error(&self, param: i64) -> Result<i64, CustomServiceError> {
        if self.some_check() {
            Ok(47 + param)
        } else {
            Err(CustomServiceError::Cookie)
        }
    }

    /// The example transaction body.
    ///
    /// # Errors
    ///
    /// Raises a [`DomainError`] on any of the randomized failure paths.
    pub async fn example(
        self: &Arc<Self>,
        txn: &TxnBuilder<DomainError>,
        id: i64,
    ) -> Result<usize, TxnError<DomainError>> {
        ensure(self.some_check(), || DomainError::new("internal pre check failed"))?;

        let result0 = other_service_call(txn, id).await?;
        let wrap = |inner: CustomServiceError| {
            DomainError::new(format!("inner service call failed: {inner}"))
        };
        other_service_call(&txn.rebind(), id)
            .await
            .map_err(|err| err.map_raised(wrap))?;

        let result1 = self
            .example_with_custom_service_error(result0)
            .map_err(|err| DomainError::new(format!("inner service failed: {err}")))
            .or_raise()?;

        txn.on_success(|| info!("log example"));

        let entity = self
            .find_some_entity(result1)
            .or_raise_with(|| DomainError::new("entity not found"))?;
        debug!(entity = entity.id, "entity found");

        let forward = Arc::clone(self);
        let undo = Arc::clone(self);
        let result2 = txn
            .named_saga(
                "a1",
                move || async move {
                    info!("a1");
                    Ok(forward.side_effect(entity.data).len())
                },
                move |_| async move {
                    info!("c1");
                    undo.undo_side_effect();
                    Ok(())
                },
            )
            .await?;

        let forward = Arc::clone(self);
        let undo = Arc::clone(self);
        let result3 = txn
            .named_saga(
                "a2",
                move || async move {
                    info!("a2");
                    ensure(forward.some_check(), || {
                        DomainError::new("simulated a2 failure by raise")
                    })?;
                    Ok(forward.side_effect(result2) + 47)
                },
                move |_| async move {
                    info!("c2");
                    undo.undo_side_effect();
                    Ok(())
                },
            )
            .await?;

        ensure(!self.some_check(), || DomainError::new("simulated failure of normal code in txn"))?;

        txn.register_uncompensable("send_mail", || info!("mail sent"));

        Ok(result3 * 2)
    }
}

/// A nested unit of work, reusable against any scope.
async fn other_service_call<E>(txn: &impl TxnScope<E>, param: i64) -> Result<i64, TxnError<E>> {
    tokio::task::yield_now().await;
    txn.checkpoint()?;
    Ok(param + 1)
}

/// Outcome of a demo invocation.
#[derive(Debug, Default)]
pub struct Summary {
    pub results: BTreeSet<String>,
    pub committed: usize,
    pub side_effects: i64,
}

fn describe(result: &Result<usize, TxnError<DomainError>>) -> String {
    match result {
        Ok(value) => format!("Ok({value})"),
        Err(err) => match err.raised() {
            Some(error) => format!("Err({error})"),
            None => format!("Err({err})"),
        },
    }
}

fn cancellation(settings: &Settings) -> CancellationToken {
    let token = CancellationToken::new();
    match settings.cancel_after {
        Some(delay) if delay.is_zero() => token.cancel(),
        Some(delay) => {
            let trigger = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                trigger.cancel();
            });
        }
        None => {}
    }
    token
}

/// Run the example `settings.iterations` times, collecting distinct results.
pub async fn run(settings: &Settings) -> Summary {
    let demo = Arc::new(Demo::new(settings.seed));
    let committed = Arc::new(AtomicUsize::new(0));
    let mut results = BTreeSet::new();

    for _ in 0..settings.iterations {
        let body_demo = Arc::clone(&demo);
        let entity_id = settings.entity_id;
        let counter = Arc::clone(&committed);

        let result = txn(move |txn: TxnBuilder<DomainError>| async move {
            let value = body_demo.example(&txn, entity_id).await?;
            txn.on_success(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            Ok(value)
        })
        .with_config(settings.txn.clone())
        .with_cancellation(cancellation(settings))
        .transact()
        .await;

        results.insert(describe(&result));
    }

    let summary = Summary {
        results,
        committed: committed.load(Ordering::SeqCst),
        side_effects: demo.side_effects(),
    };
    info!(
        runs = settings.iterations,
        committed = summary.committed,
        side_effects = summary.side_effects,
        "demo finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn settings(iterations: usize, seed: u64) -> Settings {
        Settings {
            iterations,
            seed: Some(seed),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn committed_runs_keep_exactly_their_side_effects() {
        let summary = run(&settings(400, 11)).await;

        assert!(summary.committed > 0);
        assert_eq!(summary.side_effects, 2 * i64::try_from(summary.committed).expect("fits"));
    }

    #[tokio::test]
    async fn every_path_shows_up_eventually() {
        let summary = run(&settings(2000, 3)).await;

        let expected = [
            "Err(entity not found)",
            "Err(inner service failed: COOKIE)",
            "Err(internal pre check failed)",
            "Err(simulated a2 failure by raise)",
            "Err(simulated failure of normal code in txn)",
            "Ok(102)",
        ];
        assert_eq!(
            summary.results.iter().map(String::as_str).collect::<Vec<_>>(),
            expected
        );
    }

    #[tokio::test]
    async fn same_seed_gives_same_results() {
        let first = run(&settings(64, 5)).await;
        let second = run(&settings(64, 5)).await;

        assert_eq!(first.results, second.results);
        assert_eq!(first.committed, second.committed);
    }

    #[tokio::test]
    async fn cancelled_runs_leave_no_side_effects() {
        let settings = Settings {
            cancel_after: Some(Duration::ZERO),
            ..settings(20, 1)
        };

        let summary = run(&settings).await;

        assert_eq!(
            summary.results.into_iter().collect::<Vec<_>>(),
            ["Err(transaction cancelled)"]
        );
        assert_eq!(summary.committed, 0);
        assert_eq!(summary.side_effects, 0);
    }

    #[tokio::test]
    async fn nested_unit_of_work_adds_one() -> anyhow::Result<()> {
        let value = txn_saga::run_txn(|txn: TxnBuilder<DomainError>| async move {
            other_service_call(&txn, 41).await
        })
        .await
        .map_err(|err| anyhow::anyhow!("{err}"))?;

        assert_eq!(value, 42);
        Ok(())
    }
}
