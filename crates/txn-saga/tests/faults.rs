//! Integration tests for faults and panics inside a transaction.

use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use txn_saga::{TxnBuilder, TxnError, TxnOutcome, TxnScope, run_txn, txn};

#[derive(Debug, PartialEq)]
struct Never;

#[derive(Debug, thiserror::Error)]
#[error("ledger offline")]
struct LedgerOffline;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &Log, entry: &'static str) {
    log.lock().expect("log lock").push(entry);
}

fn entries(log: &Log) -> Vec<&'static str> {
    log.lock().expect("log lock").clone()
}

async fn step(
    txn: &TxnBuilder<Never>,
    log: &Log,
    name: &'static str,
) -> Result<(), TxnError<Never>> {
    let log = Arc::clone(log);
    txn.named_saga(
        name,
        || async { Ok(()) },
        move |()| async move {
            record(&log, name);
            Ok(())
        },
    )
    .await
}

#[tokio::test]
async fn panic_in_body_compensates_then_resumes() {
    let log = Log::default();
    let body_log = Arc::clone(&log);

    let run = run_txn(move |txn: TxnBuilder<Never>| async move {
        step(&txn, &body_log, "first").await?;
        step(&txn, &body_log, "second").await?;
        let rollback = Arc::clone(&body_log);
        txn.on_rollback(move || record(&rollback, "rollback"));
        if txn.pending_compensations() == 2 {
            panic!("invariant violated");
        }
        Ok(())
    });

    let payload = AssertUnwindSafe(run)
        .catch_unwind()
        .await
        .expect_err("panic is resumed");

    assert_eq!(
        payload.downcast_ref::<&str>().copied(),
        Some("invariant violated")
    );
    assert_eq!(entries(&log), ["second", "first", "rollback"]);
}

#[tokio::test]
async fn panic_surfaces_as_a_panicked_task() {
    let log = Log::default();
    let body_log = Arc::clone(&log);

    let handle = tokio::spawn(run_txn(move |txn: TxnBuilder<Never>| async move {
        step(&txn, &body_log, "only").await?;
        if txn.pending_compensations() > 0 {
            panic!("worker crashed");
        }
        Ok(())
    }));

    let join = handle.await.expect_err("task panicked");
    assert!(join.is_panic());
    assert_eq!(entries(&log), ["only"]);
}

async fn exploding_action() -> Result<(), TxnError<Never>> {
    panic!("action exploded")
}

#[tokio::test]
async fn panicking_action_registers_nothing() {
    let log = Log::default();
    let body_log = Arc::clone(&log);

    let ran = Arc::new(AtomicBool::new(false));
    let ran_flag = Arc::clone(&ran);
    let run = run_txn(move |txn: TxnBuilder<Never>| async move {
        step(&txn, &body_log, "kept").await?;
        txn.named_saga("exploding", exploding_action, move |()| async move {
            ran_flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await?;
        Ok(())
    });

    assert!(AssertUnwindSafe(run).catch_unwind().await.is_err());
    assert_eq!(entries(&log), ["kept"]);
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn fault_unwinds_without_touching_the_typed_channel() {
    let log = Log::default();
    let body_log = Arc::clone(&log);

    let (result, report) = txn(move |txn: TxnBuilder<Never>| async move {
        step(&txn, &body_log, "a").await?;
        step(&txn, &body_log, "b").await?;
        Err::<(), _>(TxnError::fault(LedgerOffline))
    })
    .transact_with_report()
    .await;

    let err = result.expect_err("run faults");
    assert!(err.is_fault());
    assert!(err.raised().is_none());
    assert_eq!(
        err.source().map(ToString::to_string).as_deref(),
        Some("ledger offline")
    );
    assert_eq!(report.outcome(), TxnOutcome::Faulted);
    assert_eq!(entries(&log), ["b", "a"]);
}

#[tokio::test]
async fn fault_is_not_recoverable_as_typed_failure() {
    let result: Result<(), _> = run_txn(|_: TxnBuilder<Never>| async {
        Err(TxnError::fault(LedgerOffline))
    })
    .await;

    let err = result.expect_err("run faults");
    let back = err.into_raised().expect_err("faults stay signals");
    assert!(back.is_fault());
}
