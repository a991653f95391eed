//! Store-level invariants: CAS legality, idempotent inserts, the
//! monotone settlement sink, cursor monotonicity and allocation sums.

mod common;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use liquidot::prelude::*;
use liquidot_orchestrator::db::{Db, SettleOutcome, TransitionOutcome};
use proptest::prelude::*;

use common::{memory_db, test_preferences};

const BASE: Address = Address::repeat_byte(0xaa);
const POOL: Address = Address::repeat_byte(0x42);
const USER: Address = Address::repeat_byte(0x11);

fn intent(amount: u64, nonce: u64) -> InvestmentIntent {
    InvestmentIntent::new(
        USER,
        ChainId::new(200),
        POOL,
        BASE,
        U256::from(amount),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        nonce,
        &test_preferences(BASE),
    )
    .unwrap()
}

/// Walk a position to `Liquidated` so settlement can be exercised.
async fn liquidated_position(db: &Db, amount: u64, nonce: u64) -> Fingerprint {
    let intent = intent(amount, nonce);
    let fingerprint = intent.fingerprint;
    assert!(db.insert_position(&intent).await.unwrap());
    assert!(db
        .transition(
            fingerprint,
            PositionStatus::PendingDispatch,
            PositionStatus::PendingExecution,
        )
        .await
        .unwrap()
        .changed());
    assert!(db
        .mark_executed(fingerprint, 7, 10_000, 0)
        .await
        .unwrap()
        .changed());
    assert!(db
        .commit_liquidation(
            fingerprint,
            BASE,
            U256::from(1980u64),
            U256::from(2079u64),
            U256::from(4059u64),
            Utc::now() + chrono::Duration::minutes(5),
        )
        .await
        .unwrap()
        .changed());
    assert!(db
        .mark_liquidated(fingerprint, U256::from(2000u64), U256::from(2100u64))
        .await
        .unwrap()
        .changed());
    fingerprint
}

#[tokio::test]
async fn duplicate_insert_is_noop() {
    let db = memory_db().await;
    let intent = intent(4000, 0);
    assert!(db.insert_position(&intent).await.unwrap());
    assert!(!db.insert_position(&intent).await.unwrap());
    let position = db.get_position(intent.fingerprint).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::PendingDispatch);
    assert_eq!(db.position_count(USER, POOL).await.unwrap(), 1);
}

#[tokio::test]
async fn illegal_transition_is_protocol_error() {
    let db = memory_db().await;
    let intent = intent(4000, 0);
    db.insert_position(&intent).await.unwrap();
    // PendingDispatch -> Settled skips the whole lifecycle.
    let err = db
        .transition(
            intent.fingerprint,
            PositionStatus::PendingDispatch,
            PositionStatus::Settled,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Illegal position transition"));
    // And the row was not touched.
    let position = db.get_position(intent.fingerprint).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::PendingDispatch);
}

#[tokio::test]
async fn cas_refuses_wrong_source_status() {
    let db = memory_db().await;
    let intent = intent(4000, 0);
    db.insert_position(&intent).await.unwrap();
    let outcome = db
        .transition(
            intent.fingerprint,
            PositionStatus::PendingExecution,
            PositionStatus::Active,
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::Refused {
            actual: PositionStatus::PendingDispatch
        }
    );
}

#[tokio::test]
async fn redelivered_transition_is_already_there() {
    let db = memory_db().await;
    let intent = intent(4000, 0);
    db.insert_position(&intent).await.unwrap();
    db.transition(
        intent.fingerprint,
        PositionStatus::PendingDispatch,
        PositionStatus::PendingExecution,
    )
    .await
    .unwrap();
    let again = db
        .transition(
            intent.fingerprint,
            PositionStatus::PendingDispatch,
            PositionStatus::PendingExecution,
        )
        .await
        .unwrap();
    assert_eq!(again, TransitionOutcome::AlreadyThere);
}

#[tokio::test]
async fn settle_is_monotone() {
    let db = memory_db().await;
    let fingerprint = liquidated_position(&db, 4000, 0).await;

    let first = db
        .record_settlement(fingerprint, U256::from(4100u64))
        .await
        .unwrap();
    assert_eq!(
        first,
        SettleOutcome::Settled {
            amount: U256::from(4100u64)
        }
    );
    // The pending settlement row died with the transition.
    assert!(db.pending_settlement(fingerprint).await.unwrap().is_none());

    // A re-delivery, even with a different amount, changes nothing.
    let second = db
        .record_settlement(fingerprint, U256::from(9999u64))
        .await
        .unwrap();
    assert_eq!(
        second,
        SettleOutcome::AlreadySettled {
            amount: U256::from(4100u64)
        }
    );
    let position = db.get_position(fingerprint).await.unwrap().unwrap();
    assert_eq!(position.settled_amount, Some(U256::from(4100u64)));
    assert_eq!(position.status, PositionStatus::Settled);
}

#[tokio::test]
async fn settle_refused_before_liquidated() {
    let db = memory_db().await;
    let intent = intent(4000, 0);
    db.insert_position(&intent).await.unwrap();
    let outcome = db
        .record_settlement(intent.fingerprint, U256::from(4100u64))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SettleOutcome::Refused {
            actual: PositionStatus::PendingDispatch
        }
    );
}

#[tokio::test]
async fn recommit_bumps_settlement_sequence() {
    let db = memory_db().await;
    let intent = intent(4000, 0);
    let fingerprint = intent.fingerprint;
    db.insert_position(&intent).await.unwrap();
    db.transition(
        fingerprint,
        PositionStatus::PendingDispatch,
        PositionStatus::PendingExecution,
    )
    .await
    .unwrap();
    db.mark_executed(fingerprint, 7, 10_000, 0).await.unwrap();
    let deadline = Utc::now() + chrono::Duration::minutes(5);
    db.commit_liquidation(
        fingerprint,
        BASE,
        U256::from(100u64),
        U256::from(100u64),
        U256::from(200u64),
        deadline,
    )
    .await
    .unwrap();
    // A re-quote after a failed phase re-commits with fresh minimums.
    db.commit_liquidation(
        fingerprint,
        BASE,
        U256::from(90u64),
        U256::from(95u64),
        U256::from(185u64),
        deadline,
    )
    .await
    .unwrap();
    let record = db.pending_settlement(fingerprint).await.unwrap().unwrap();
    assert_eq!(record.seq, 2);
    assert_eq!(record.min_total, U256::from(185u64));
}

#[tokio::test]
async fn failed_is_terminal_and_reachable_from_any_live_state() {
    let db = memory_db().await;
    let fingerprint = liquidated_position(&db, 4000, 0).await;
    assert!(db.fail_position(fingerprint, "test halt").await.unwrap());
    // Settle after Failed must refuse.
    let outcome = db
        .record_settlement(fingerprint, U256::from(1u64))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SettleOutcome::Refused {
            actual: PositionStatus::Failed
        }
    );
    // And failing again is a no-op.
    assert!(!db.fail_position(fingerprint, "again").await.unwrap());
}

#[tokio::test]
async fn cursors_never_move_backwards() {
    let db = memory_db().await;
    let chain = ChainId::new(200);
    let contract = Address::repeat_byte(0x77);
    db.advance_cursor(chain, contract, 50).await.unwrap();
    db.advance_cursor(chain, contract, 40).await.unwrap();
    assert_eq!(db.cursor(chain, contract).await.unwrap(), Some(50));
    db.advance_cursor(chain, contract, 60).await.unwrap();
    assert_eq!(db.cursor(chain, contract).await.unwrap(), Some(60));
}

#[tokio::test]
async fn allocation_counts_only_live_positions() {
    let db = memory_db().await;
    let first = liquidated_position(&db, 4000, 0).await;
    assert_eq!(
        db.allocated_amount(USER, POOL).await.unwrap(),
        U256::from(4000u64)
    );
    // Settling releases the allocation.
    db.record_settlement(first, U256::from(4100u64))
        .await
        .unwrap();
    assert_eq!(db.allocated_amount(USER, POOL).await.unwrap(), U256::ZERO);
    assert!(!db.has_open_position(USER, POOL).await.unwrap());

    // A second position in the same pool holds allocation again.
    let second = intent(1500, 1);
    db.insert_position(&second).await.unwrap();
    assert_eq!(
        db.allocated_amount(USER, POOL).await.unwrap(),
        U256::from(1500u64)
    );
    assert!(db.has_open_position(USER, POOL).await.unwrap());
}

#[tokio::test]
async fn status_counts_cover_all_rows() {
    let db = memory_db().await;
    liquidated_position(&db, 4000, 0).await;
    db.insert_position(&intent(1000, 1)).await.unwrap();
    let counts = db.status_counts().await.unwrap();
    assert_eq!(
        counts,
        vec![
            (PositionStatus::PendingDispatch, 1),
            (PositionStatus::Liquidated, 1),
        ]
    );
}

// No double credit, under any interleaving of re-deliveries: arbitrary
// sequences of AssetsReturned hints and Settled deliveries (duplicated,
// reordered, with conflicting amounts) end with exactly the first
// accepted settlement amount.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn settlement_is_exactly_once(
        deliveries in prop::collection::vec(
            prop_oneof![
                (1u64..10_000).prop_map(|amount| ("settle", amount)),
                (1u64..10_000).prop_map(|amount| ("hint", amount)),
            ],
            1..12,
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let db = memory_db().await;
            let fingerprint = liquidated_position(&db, 4000, 0).await;
            let mut first_settled: Option<u64> = None;
            for (kind, amount) in deliveries {
                match kind {
                    "hint" => {
                        // Hints may arrive before or after settlement;
                        // they never alter credited amounts.
                        let _ = db
                            .observe_returned_assets(fingerprint, BASE, U256::from(amount))
                            .await
                            .unwrap();
                    }
                    _ => {
                        let outcome = db
                            .record_settlement(fingerprint, U256::from(amount))
                            .await
                            .unwrap();
                        match (first_settled, outcome) {
                            (None, SettleOutcome::Settled { amount: credited }) => {
                                assert_eq!(credited, U256::from(amount));
                                first_settled = Some(amount);
                            }
                            (Some(first), SettleOutcome::AlreadySettled { amount: credited }) => {
                                assert_eq!(credited, U256::from(first));
                            }
                            (expected, outcome) => {
                                panic!("unexpected settle outcome {outcome:?} (first: {expected:?})")
                            }
                        }
                    }
                }
            }
            let position = db.get_position(fingerprint).await.unwrap().unwrap();
            if let Some(first) = first_settled {
                assert_eq!(position.status, PositionStatus::Settled);
                assert_eq!(position.settled_amount, Some(U256::from(first)));
                assert!(db.pending_settlement(fingerprint).await.unwrap().is_none());
            } else {
                assert_eq!(position.status, PositionStatus::Liquidated);
            }
        });
    }
}
