//! Integration tests for side effects registered without compensation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use txn_saga::{StepStatus, TxnBuilder, TxnError, TxnScope, txn};

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("shipment rejected")]
struct ShipmentRejected;

#[tokio::test]
async fn irreversible_effect_survives_a_later_failure() {
    let compensated = Arc::new(Mutex::new(Vec::new()));
    let notifications = Arc::new(AtomicUsize::new(0));
    let body_compensated = Arc::clone(&compensated);
    let body_notifications = Arc::clone(&notifications);

    let (result, report) = txn(move |txn: TxnBuilder<ShipmentRejected>| async move {
        let log = Arc::clone(&body_compensated);
        txn.named_saga(
            "reserve_stock",
            || async { Ok(3_u32) },
            move |units| async move {
                log.lock()
                    .expect("log lock")
                    .push(format!("released {units}"));
                Ok(())
            },
        )
        .await?;

        let sent = txn.register_uncompensable("notify_customer", || {
            body_notifications.fetch_add(1, Ordering::SeqCst) + 1
        });
        assert_eq!(sent, 1);

        txn.named_saga(
            "book_courier",
            || async { Err::<(), _>(TxnError::raise(ShipmentRejected)) },
            |()| async { Ok(()) },
        )
        .await?;
        Ok(())
    })
    .transact_with_report()
    .await;

    assert_eq!(
        result.expect_err("shipment rejected").raised(),
        Some(&ShipmentRejected)
    );
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(report.uncompensable_actions(), 1);
    assert_eq!(
        *compensated.lock().expect("log lock"),
        ["released 3".to_string()]
    );

    let irreversible: Vec<_> = report
        .audit_log()
        .with_status(StepStatus::Uncompensable)
        .map(|record| record.name.as_str())
        .collect();
    assert_eq!(irreversible, ["notify_customer"]);
}

#[tokio::test]
async fn counter_only_grows_within_a_run() {
    let (result, report) = txn(|txn: TxnBuilder<ShipmentRejected>| async move {
        let mut seen = Vec::new();
        for _ in 0..3 {
            txn.register_uncompensable_side_effect(|| ());
            seen.push(txn.uncompensable_actions());
        }
        Ok(seen)
    })
    .transact_with_report()
    .await;

    assert_eq!(result.expect("run commits"), [1, 2, 3]);
    assert_eq!(report.uncompensable_actions(), 3);
    assert!(report.is_committed());
}

#[tokio::test]
async fn identity_is_visible_to_the_body() {
    let (result, report) = txn(|txn: TxnBuilder<ShipmentRejected>| async move {
        Ok((txn.id(), txn.local_runtime_id()))
    })
    .transact_with_report()
    .await;

    let (id, local_runtime_id) = result.expect("run commits");
    assert_eq!(id, report.id());
    assert_eq!(local_runtime_id, report.local_runtime_id());
    assert!(local_runtime_id >= 1);
}
