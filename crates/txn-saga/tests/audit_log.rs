//! Integration tests for the per-run audit log.

use txn_saga::{BoxError, StepStatus, TxnBuilder, TxnError, TxnScope, txn};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TestError(String);

async fn ok_step(txn: &TxnBuilder<TestError>, name: &str) -> Result<(), TxnError<TestError>> {
    txn.named_saga(name, || async { Ok(()) }, |()| async { Ok(()) })
        .await
}

#[tokio::test]
async fn committed_run_logs_every_step_as_executed() {
    let (result, report) = txn(|txn: TxnBuilder<TestError>| async move {
        ok_step(&txn, "step_a").await?;
        ok_step(&txn, "step_b").await?;
        ok_step(&txn, "step_c").await?;
        Ok(())
    })
    .transact_with_report()
    .await;

    assert!(result.is_ok());
    let records = report.audit_log().records();
    assert_eq!(records.len(), 3);
    for (record, name) in records.iter().zip(["step_a", "step_b", "step_c"]) {
        assert_eq!(record.name, name);
        assert_eq!(record.status, StepStatus::Executed);
        assert!(record.completed_at.is_some());
    }
}

#[tokio::test]
async fn rolled_back_run_logs_compensations() {
    let (result, report) = txn(|txn: TxnBuilder<TestError>| async move {
        ok_step(&txn, "step_a").await?;
        ok_step(&txn, "step_b").await?;
        txn.named_saga(
            "failing",
            || async { Err::<(), _>(TxnError::raise(TestError("intentional".to_string()))) },
            |()| async { Ok(()) },
        )
        .await
    })
    .transact_with_report()
    .await;

    assert!(result.is_err());
    let statuses: Vec<_> = report
        .audit_log()
        .records()
        .iter()
        .map(|record| (record.name.as_str(), record.status))
        .collect();
    assert_eq!(
        statuses,
        [
            ("step_a", StepStatus::Compensated),
            ("step_b", StepStatus::Compensated),
            ("failing", StepStatus::Failed),
        ]
    );
}

async fn broken_undo((): ()) -> Result<(), BoxError> {
    Err(BoxError::from("undo refused"))
}

#[tokio::test]
async fn summary_marks_every_status() {
    let (_, report) = txn(|txn: TxnBuilder<TestError>| async move {
        ok_step(&txn, "reserved").await?;
        txn.named_saga("charged", || async { Ok(()) }, broken_undo)
            .await?;
        txn.register_uncompensable("emailed", || ());
        Err::<(), _>(TxnError::raise(TestError("declined".to_string())))
    })
    .transact_with_report()
    .await;

    assert_eq!(report.audit_log().summary(), "↩ reserved\n⚠ charged\n! emailed");
}

#[tokio::test]
async fn cancelled_step_stays_running() {
    let (result, report) = txn(|txn: TxnBuilder<TestError>| async move {
        ok_step(&txn, "done").await?;
        let token = txn.cancellation_token().clone();
        txn.named_saga(
            "in_flight",
            move || async move {
                token.cancel();
                std::future::pending::<Result<(), TxnError<TestError>>>().await
            },
            |()| async { Ok(()) },
        )
        .await
    })
    .transact_with_report()
    .await;

    assert!(result.expect_err("run cancelled").is_cancelled());
    let records = report.audit_log().records();
    assert_eq!(records[0].status, StepStatus::Compensated);
    assert_eq!(records[1].name, "in_flight");
    assert_eq!(records[1].status, StepStatus::Running);
}
