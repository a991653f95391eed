//! End-to-end lifecycle scenarios against the mock chain backend:
//! dispatch through settlement, duplicate deliveries, quote halts,
//! mid-phase failures, stop-loss triggers and restart recovery.

mod common;

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use bigdecimal::BigDecimal;
use chrono::Utc;
use liquidot::prelude::*;
use liquidot_orchestrator::chain::EventTail;
use liquidot_orchestrator::contracts::{
    spoke_event_topics, IAssetHubVault, ILiquidityProxy, ProxyContract, VaultContract,
};
use liquidot_orchestrator::config::DecisionConfig;
use liquidot_orchestrator::db::{Db, UserRecord};
use liquidot_orchestrator::engine::{
    self, DispatchOutcome, HubEffect, LiquidationOutcome, LiquidationReason,
    LiquidationSettings, SpokeEffect,
};

use common::{memory_db, raw_log, submitter_for, test_preferences, MockChain, TxScript};

const HUB_CHAIN: u64 = 100;
const SPOKE_CHAIN: u64 = 200;
const BASE: Address = Address::repeat_byte(0xaa);
const OTHER_TOKEN: Address = Address::repeat_byte(0xbb);
const POOL: Address = Address::repeat_byte(0x42);
const USER: Address = Address::repeat_byte(0x11);
const VAULT: Address = Address::repeat_byte(0xfa);
const PROXY: Address = Address::repeat_byte(0xfb);

struct Harness {
    db: Db,
    hub: Arc<MockChain>,
    spoke: Arc<MockChain>,
    vault: VaultContract,
    proxy: ProxyContract,
}

async fn harness() -> Harness {
    let db = memory_db().await;
    let hub = MockChain::new(HUB_CHAIN);
    let spoke = MockChain::new(SPOKE_CHAIN);
    let vault = VaultContract::new(hub.clone(), submitter_for(&hub), VAULT);
    let proxy = ProxyContract::new(spoke.clone(), submitter_for(&spoke), PROXY);
    Harness {
        db,
        hub,
        spoke,
        vault,
        proxy,
    }
}

fn snapshot(tick: i32) -> PoolSnapshot {
    PoolSnapshot {
        id: PoolId {
            chain: ChainId::new(SPOKE_CHAIN),
            address: POOL,
        },
        token0: TokenInfo {
            address: BASE,
            decimals: 18,
        },
        token1: TokenInfo {
            address: OTHER_TOKEN,
            decimals: 6,
        },
        tick_spacing: 60,
        fee_tier: 3000,
        tvl_usd: BigDecimal::from(1_000_000u64),
        volume_24h_usd: BigDecimal::from(50_000u64),
        apr_bps: 1200,
        sqrt_price: U256::from(1u64) << 96,
        tick,
        observed_at: Utc::now(),
    }
}

fn settings(slippage_bps: i32) -> LiquidationSettings {
    LiquidationSettings {
        slippage: BasisPoints::new(slippage_bps),
        absolute_minimum: U256::from(100u64),
        retry_bound: 3,
        phase_deadline: std::time::Duration::from_secs(5),
        destination: alloy::primitives::Bytes::from(vec![0x01, 0x01]),
    }
}

/// Script the spoke views for a position holding (amount0, amount1),
/// with amount1 quoting to `quote1` of the base asset.
fn script_spoke_views(harness: &Harness, fp: Fingerprint, amount0: u64, amount1: u64, quote1: u64) {
    harness.spoke.set_view(
        ILiquidityProxy::positionsCall::SELECTOR,
        ILiquidityProxy::positionsCall::abi_encode_returns(&(
            fp.word(),
            2u8,
            10_000u128,
            100i32,
            U256::from(amount0),
            U256::from(amount1),
        )),
    );
    harness.spoke.set_view(
        ILiquidityProxy::quoteExactInputSingleCall::SELECTOR,
        (U256::from(quote1),).abi_encode(),
    );
}

fn script_full_liquidation(harness: &Harness, fp: Fingerprint, a0: u64, a1: u64, returned: u64) {
    harness.spoke.push_tx(
        ILiquidityProxy::executeFullLiquidationCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                PROXY,
                ILiquidityProxy::PositionLiquidated {
                    positionId: U256::from(7u64),
                    amount0: U256::from(a0),
                    amount1: U256::from(a1),
                }
                .encode_log_data(),
            )],
        },
    );
    harness.spoke.push_tx(
        ILiquidityProxy::swapAndReturnCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                PROXY,
                ILiquidityProxy::AssetsReturned {
                    token: BASE,
                    amount: U256::from(returned),
                    fingerprint: fp.word(),
                }
                .encode_log_data(),
            )],
        },
    );
    harness.hub.push_tx(
        IAssetHubVault::settleLiquidationCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                VAULT,
                IAssetHubVault::Settled {
                    fingerprint: fp.word(),
                    amount: U256::from(returned),
                }
                .encode_log_data(),
            )],
        },
    );
}

/// Drive a freshly decided intent through dispatch and execution so the
/// position lands in `Active`.
async fn dispatch_and_execute(harness: &Harness, intent: &InvestmentIntent) {
    let fp = intent.fingerprint;
    harness.hub.push_tx(
        IAssetHubVault::dispatchInvestmentCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                VAULT,
                IAssetHubVault::InvestmentInitiated {
                    fingerprint: fp.word(),
                    user: intent.user,
                    amount: intent.amount,
                }
                .encode_log_data(),
            )],
        },
    );
    let outcome = engine::dispatch_intent(
        &harness.db,
        &harness.vault,
        intent,
        &vec![0x01u8].into(),
        &ProxyContract::execute_calldata(fp).into(),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Dispatched));
    assert_eq!(
        harness.db.get_position(fp).await.unwrap().unwrap().status,
        PositionStatus::PendingExecution
    );

    // The monitor reads the entry tick back through the positions view
    // when it observes the mint.
    harness.spoke.set_view(
        ILiquidityProxy::positionsCall::SELECTOR,
        ILiquidityProxy::positionsCall::abi_encode_returns(&(
            fp.word(),
            1u8,
            10_000u128,
            100i32,
            U256::from(2_000u64),
            U256::from(2_100u64),
        )),
    );

    // The spoke mints and the monitor observes PositionExecuted.
    let executed = raw_log(
        PROXY,
        ILiquidityProxy::PositionExecuted {
            fingerprint: fp.word(),
            nftId: U256::from(7u64),
            liquidity: 10_000u128,
        }
        .encode_log_data(),
    );
    let effect = engine::handle_spoke_log(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        ChainId::new(SPOKE_CHAIN),
        &executed,
    )
    .await
    .unwrap();
    assert_eq!(effect, SpokeEffect::Executed { fingerprint: fp });

    let position = harness.db.get_position(fp).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Active);
    assert_eq!(position.nft_id, Some(7));
    assert_eq!(position.liquidity, Some(U256::from(10_000u64)));
    assert_eq!(position.entry_tick, Some(100));
    // Execution was acknowledged back to the hub exactly once.
    assert_eq!(
        harness
            .hub
            .submission_count(IAssetHubVault::confirmExecutionCall::SELECTOR),
        1
    );
}

// S1: the happy path. 100.00 units of balance, 40% allocation cap, the
// decision engine picks the pool, a range exit liquidates, and the user
// ends up with 101.00.
#[tokio::test]
async fn happy_path_invest_to_settled() {
    let harness = harness().await;
    let mut preferences = test_preferences(BASE);
    preferences.max_allocation_bps = BasisPoints::new(4000);
    let user = UserRecord {
        address: USER,
        preferences,
    };
    harness.db.upsert_user(&user).await.unwrap();
    harness.db.upsert_pool(&snapshot(100)).await.unwrap();
    harness.hub.set_view(
        IAssetHubVault::getUserBalanceCall::SELECTOR,
        (U256::from(10_000u64),).abi_encode(),
    );
    harness.hub.set_view(
        IAssetHubVault::supportedChainsCall::SELECTOR,
        (true,).abi_encode(),
    );

    // Decision: one intent, 40% of 100.00.
    let evaluation = engine::evaluate_user(
        &harness.db,
        &harness.vault,
        &DecisionConfig::default(),
        chrono::Duration::seconds(900),
        &user,
    )
    .await
    .unwrap();
    assert_eq!(evaluation.intents.len(), 1);
    let intent = evaluation.intents[0].clone();
    assert_eq!(intent.amount, U256::from(4_000u64));
    assert_eq!(intent.pool, POOL);
    let fp = intent.fingerprint;

    assert!(harness.vault.supported_chains(SPOKE_CHAIN).await.unwrap());

    dispatch_and_execute(&harness, &intent).await;

    harness.hub.set_view(
        IAssetHubVault::getPositionCall::SELECTOR,
        IAssetHubVault::getPositionCall::abi_encode_returns(&(1u8, U256::from(4_000u64), USER)),
    );
    let on_chain = harness.vault.get_position(fp).await.unwrap();
    assert_eq!(on_chain.amount, U256::from(4_000u64));

    // Tick breaks the lower bound; quote expects 41.00 out, slippage
    // 100bps gives a 40.59 floor.
    script_spoke_views(&harness, fp, 2_000, 2_100, 2_100);
    script_full_liquidation(&harness, fp, 2_000, 2_100, 4_100);

    let outcome = engine::run_liquidation(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        fp,
        &settings(100),
        LiquidationReason::RangeExit,
    )
    .await
    .unwrap();
    assert!(matches!(
        outcome,
        LiquidationOutcome::Settled { amount } if amount == U256::from(4_100u64)
    ));

    let position = harness.db.get_position(fp).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Settled);
    assert_eq!(position.settled_amount, Some(U256::from(4_100u64)));
    // The committed floor was honored.
    let record = harness.db.pending_settlement(fp).await.unwrap();
    assert!(record.is_none());
    assert!(U256::from(4_100u64) >= U256::from(4_059u64));

    // Final balance: 100.00 - 40.00 + 41.00 = 101.00.
    let balance = U256::from(10_000u64) - position.amount
        + position.settled_amount.unwrap();
    assert_eq!(balance, U256::from(10_100u64));

    // One settle transaction, ever.
    assert_eq!(
        harness
            .hub
            .submission_count(IAssetHubVault::settleLiquidationCall::SELECTOR),
        1
    );
}

// S2: the hub's Settled event is delivered twice; the store records one
// transition and the credited amount never changes.
#[tokio::test]
async fn duplicate_settle_event_is_noop() {
    let harness = harness().await;
    let user = UserRecord {
        address: USER,
        preferences: test_preferences(BASE),
    };
    harness.db.upsert_user(&user).await.unwrap();
    harness.db.upsert_pool(&snapshot(100)).await.unwrap();

    let intent = InvestmentIntent::new(
        USER,
        ChainId::new(SPOKE_CHAIN),
        POOL,
        BASE,
        U256::from(4_000u64),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        0,
        &user.preferences,
    )
    .unwrap();
    let fp = intent.fingerprint;
    dispatch_and_execute(&harness, &intent).await;
    script_spoke_views(&harness, fp, 2_000, 2_100, 2_100);
    script_full_liquidation(&harness, fp, 2_000, 2_100, 4_100);
    engine::run_liquidation(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        fp,
        &settings(100),
        LiquidationReason::Manual,
    )
    .await
    .unwrap();

    // The monitor re-delivers Settled twice.
    let settled = raw_log(
        VAULT,
        IAssetHubVault::Settled {
            fingerprint: fp.word(),
            amount: U256::from(4_100u64),
        }
        .encode_log_data(),
    );
    for _ in 0..2 {
        let effect = engine::handle_hub_log(&harness.db, &settled).await.unwrap();
        assert_eq!(
            effect,
            HubEffect::Settled {
                fingerprint: fp,
                applied: false,
            }
        );
    }
    let position = harness.db.get_position(fp).await.unwrap().unwrap();
    assert_eq!(position.settled_amount, Some(U256::from(4_100u64)));
    assert_eq!(
        harness
            .hub
            .submission_count(IAssetHubVault::settleLiquidationCall::SELECTOR),
        1
    );
}

// S3: a reverting quote halts phase 0. The position stays Active and
// nothing is submitted anywhere.
#[tokio::test]
async fn quote_failure_halts_phase_zero() {
    let harness = harness().await;
    let user = UserRecord {
        address: USER,
        preferences: test_preferences(BASE),
    };
    harness.db.upsert_user(&user).await.unwrap();
    harness.db.upsert_pool(&snapshot(100)).await.unwrap();
    let intent = InvestmentIntent::new(
        USER,
        ChainId::new(SPOKE_CHAIN),
        POOL,
        BASE,
        U256::from(4_000u64),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        0,
        &user.preferences,
    )
    .unwrap();
    let fp = intent.fingerprint;
    dispatch_and_execute(&harness, &intent).await;

    harness.spoke.set_view(
        ILiquidityProxy::positionsCall::SELECTOR,
        ILiquidityProxy::positionsCall::abi_encode_returns(&(
            fp.word(),
            2u8,
            10_000u128,
            100i32,
            U256::from(2_000u64),
            U256::from(2_100u64),
        )),
    );
    harness.spoke.push_view(
        ILiquidityProxy::quoteExactInputSingleCall::SELECTOR,
        Err("stale oracle"),
    );

    let outcome = engine::run_liquidation(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        fp,
        &settings(100),
        LiquidationReason::RangeExit,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, LiquidationOutcome::QuoteHalted { .. }));
    assert_eq!(
        harness.db.get_position(fp).await.unwrap().unwrap().status,
        PositionStatus::Active
    );
    assert_eq!(
        harness
            .spoke
            .submission_count(ILiquidityProxy::executeFullLiquidationCall::SELECTOR),
        0
    );
    assert_eq!(
        harness
            .hub
            .submission_count(IAssetHubVault::settleLiquidationCall::SELECTOR),
        0
    );
}

// S4: phase 1 fails on the first attempt; the controller re-quotes with
// fresh minimums on the next cycle and completes. No credit happens
// until settlement.
#[tokio::test]
async fn phase_one_failure_requotes_and_retries() {
    let harness = harness().await;
    let user = UserRecord {
        address: USER,
        preferences: test_preferences(BASE),
    };
    harness.db.upsert_user(&user).await.unwrap();
    harness.db.upsert_pool(&snapshot(100)).await.unwrap();
    let intent = InvestmentIntent::new(
        USER,
        ChainId::new(SPOKE_CHAIN),
        POOL,
        BASE,
        U256::from(4_000u64),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        0,
        &user.preferences,
    )
    .unwrap();
    let fp = intent.fingerprint;
    dispatch_and_execute(&harness, &intent).await;

    script_spoke_views(&harness, fp, 2_000, 2_100, 2_100);
    harness.spoke.push_sim_revert(
        ILiquidityProxy::executeFullLiquidationCall::SELECTOR,
        "price moved",
    );

    let first = engine::run_liquidation(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        fp,
        &settings(100),
        LiquidationReason::RangeExit,
    )
    .await
    .unwrap();
    assert!(matches!(
        first,
        LiquidationOutcome::PhaseFailed { phase: "burn", .. }
    ));
    assert_eq!(
        harness.db.get_position(fp).await.unwrap().unwrap().status,
        PositionStatus::LiquidationPending
    );
    assert_eq!(
        harness
            .hub
            .submission_count(IAssetHubVault::settleLiquidationCall::SELECTOR),
        0
    );

    // Next cycle: prices re-quoted, burn succeeds, settlement lands.
    script_full_liquidation(&harness, fp, 2_000, 2_100, 4_100);
    let second = engine::run_liquidation(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        fp,
        &settings(100),
        LiquidationReason::Recovery,
    )
    .await
    .unwrap();
    assert!(matches!(second, LiquidationOutcome::Settled { .. }));
    // The failed attempt and the successful one are both in the log.
    assert_eq!(
        harness
            .db
            .oplog_attempts(fp, liquidot_orchestrator::db::OperationPhase::Liquidate)
            .await
            .unwrap(),
        2
    );
    // The re-quote bumped the committed record before it was consumed.
    let position = harness.db.get_position(fp).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Settled);
}

// S5: stop-loss. Entry at tick 100; pool tick drops 1278 ticks
// (about -12%), crossing the -10% stop. The decision engine invokes the
// controller and the settled amount respects the committed floor.
#[tokio::test]
async fn stop_loss_triggers_liquidation() {
    let harness = harness().await;
    let user = UserRecord {
        address: USER,
        preferences: test_preferences(BASE),
    };
    harness.db.upsert_user(&user).await.unwrap();
    harness.db.upsert_pool(&snapshot(100)).await.unwrap();
    let intent = InvestmentIntent::new(
        USER,
        ChainId::new(SPOKE_CHAIN),
        POOL,
        BASE,
        U256::from(5_000u64),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        0,
        &user.preferences,
    )
    .unwrap();
    let fp = intent.fingerprint;
    dispatch_and_execute(&harness, &intent).await;

    // Entry tick is 100; drop the pool 1278 ticks below it.
    harness.db.upsert_pool(&snapshot(100 - 1278)).await.unwrap();
    harness.hub.set_view(
        IAssetHubVault::getUserBalanceCall::SELECTOR,
        (U256::ZERO,).abi_encode(),
    );
    let evaluation = engine::evaluate_user(
        &harness.db,
        &harness.vault,
        &DecisionConfig::default(),
        chrono::Duration::seconds(900),
        &user,
    )
    .await
    .unwrap();
    assert_eq!(evaluation.liquidations.len(), 1);
    assert_eq!(evaluation.liquidations[0].fingerprint, fp);
    assert_eq!(
        evaluation.liquidations[0].reason,
        LiquidationReason::StopLoss
    );

    // Quote: 43.56 expected, floor 43.12; the swap returns 43.20.
    script_spoke_views(&harness, fp, 4_356, 0, 0);
    script_full_liquidation(&harness, fp, 4_356, 0, 4_320);
    let outcome = engine::run_liquidation(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        fp,
        &settings(100),
        evaluation.liquidations[0].reason,
    )
    .await
    .unwrap();
    assert!(matches!(
        outcome,
        LiquidationOutcome::Settled { amount } if amount == U256::from(4_320u64)
    ));
    // 43.20 respects the committed floor of 43.12 (4356 less 100bps).
    assert!(U256::from(4_320u64) >= U256::from(4_312u64));
    let position = harness.db.get_position(fp).await.unwrap().unwrap();
    assert_eq!(position.settled_amount, Some(U256::from(4_320u64)));
}

// S6: restart recovery. The process dies after phase 1 lands on chain
// but before observing the event; on restart the monitor resumes from
// the persisted cursor, applies the Liquidated CAS, and the controller
// finishes phase 2 without a second burn.
#[tokio::test]
async fn restart_recovers_mid_liquidation() {
    let harness = harness().await;
    let user = UserRecord {
        address: USER,
        preferences: test_preferences(BASE),
    };
    harness.db.upsert_user(&user).await.unwrap();
    harness.db.upsert_pool(&snapshot(100)).await.unwrap();
    let intent = InvestmentIntent::new(
        USER,
        ChainId::new(SPOKE_CHAIN),
        POOL,
        BASE,
        U256::from(4_000u64),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        0,
        &user.preferences,
    )
    .unwrap();
    let fp = intent.fingerprint;
    dispatch_and_execute(&harness, &intent).await;

    // Phase 0 committed, phase 1 broadcast and included on chain, then
    // the process dies before seeing the receipt or the event.
    harness
        .db
        .commit_liquidation(
            fp,
            BASE,
            U256::from(1_980u64),
            U256::from(2_079u64),
            U256::from(4_059u64),
            Utc::now() + chrono::Duration::minutes(5),
        )
        .await
        .unwrap();
    harness.spoke.push_tx(
        ILiquidityProxy::executeFullLiquidationCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                PROXY,
                ILiquidityProxy::PositionLiquidated {
                    positionId: U256::from(7u64),
                    amount0: U256::from(2_000u64),
                    amount1: U256::from(2_100u64),
                }
                .encode_log_data(),
            )],
        },
    );
    harness
        .proxy
        .execute_full_liquidation(fp, U256::from(7u64), 1)
        .await
        .unwrap();

    // Restart: the monitor tails the spoke from the persisted cursor.
    let chain = ChainId::new(SPOKE_CHAIN);
    let contract = harness.proxy.address();
    let tail = EventTail::new(
        harness.spoke.clone(),
        contract,
        spoke_event_topics(),
        1_000,
        0,
    );
    let cursor = harness.db.cursor(chain, contract).await.unwrap().unwrap_or(0);
    let page = tail.next_page(cursor).await.unwrap();
    assert!(!page.logs.is_empty());
    for log in &page.logs {
        engine::handle_spoke_log(&harness.db, &harness.proxy, &harness.vault, chain, log)
            .await
            .unwrap();
    }
    harness
        .db
        .advance_cursor(chain, contract, page.next_cursor)
        .await
        .unwrap();
    assert_eq!(
        harness.db.get_position(fp).await.unwrap().unwrap().status,
        PositionStatus::Liquidated
    );

    // The controller resumes at phase 2; no second burn is sent.
    script_spoke_views(&harness, fp, 2_000, 2_100, 2_100);
    harness.spoke.push_tx(
        ILiquidityProxy::swapAndReturnCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                PROXY,
                ILiquidityProxy::AssetsReturned {
                    token: BASE,
                    amount: U256::from(4_100u64),
                    fingerprint: fp.word(),
                }
                .encode_log_data(),
            )],
        },
    );
    harness.hub.push_tx(
        IAssetHubVault::settleLiquidationCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                VAULT,
                IAssetHubVault::Settled {
                    fingerprint: fp.word(),
                    amount: U256::from(4_100u64),
                }
                .encode_log_data(),
            )],
        },
    );
    let outcome = engine::run_liquidation(
        &harness.db,
        &harness.proxy,
        &harness.vault,
        fp,
        &settings(100),
        LiquidationReason::Recovery,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, LiquidationOutcome::Settled { .. }));
    assert_eq!(
        harness
            .spoke
            .submission_count(ILiquidityProxy::executeFullLiquidationCall::SELECTOR),
        1
    );
    // Replaying the same page after the "restart" changes nothing.
    let replay = tail.next_page(0).await.unwrap();
    for log in &replay.logs {
        engine::handle_spoke_log(&harness.db, &harness.proxy, &harness.vault, chain, log)
            .await
            .unwrap();
    }
    let position = harness.db.get_position(fp).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Settled);
    assert_eq!(position.settled_amount, Some(U256::from(4_100u64)));
}

// Dispatch idempotence: the same intent dispatched twice produces one
// position and one hub transaction.
#[tokio::test]
async fn dispatch_is_idempotent() {
    let harness = harness().await;
    let user = UserRecord {
        address: USER,
        preferences: test_preferences(BASE),
    };
    harness.db.upsert_user(&user).await.unwrap();
    let intent = InvestmentIntent::new(
        USER,
        ChainId::new(SPOKE_CHAIN),
        POOL,
        BASE,
        U256::from(4_000u64),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        0,
        &user.preferences,
    )
    .unwrap();
    let fp = intent.fingerprint;
    harness.hub.push_tx(
        IAssetHubVault::dispatchInvestmentCall::SELECTOR,
        TxScript {
            revert_on_chain: false,
            logs: vec![(
                VAULT,
                IAssetHubVault::InvestmentInitiated {
                    fingerprint: fp.word(),
                    user: USER,
                    amount: intent.amount,
                }
                .encode_log_data(),
            )],
        },
    );
    let destination: alloy::primitives::Bytes = vec![0x01u8].into();
    let message: alloy::primitives::Bytes = ProxyContract::execute_calldata(fp).into();
    let first = engine::dispatch_intent(&harness.db, &harness.vault, &intent, &destination, &message)
        .await
        .unwrap();
    assert!(matches!(first, DispatchOutcome::Dispatched));
    let second =
        engine::dispatch_intent(&harness.db, &harness.vault, &intent, &destination, &message)
            .await
            .unwrap();
    assert!(matches!(second, DispatchOutcome::AlreadyInFlight { .. }));
    assert_eq!(
        harness
            .hub
            .submission_count(IAssetHubVault::dispatchInvestmentCall::SELECTOR),
        1
    );
    assert_eq!(harness.db.position_count(USER, POOL).await.unwrap(), 1);
}

// A dispatch that reverts in simulation cancels the position with no
// on-chain effect.
#[tokio::test]
async fn reverted_dispatch_cancels() {
    let harness = harness().await;
    let user = UserRecord {
        address: USER,
        preferences: test_preferences(BASE),
    };
    harness.db.upsert_user(&user).await.unwrap();
    let intent = InvestmentIntent::new(
        USER,
        ChainId::new(SPOKE_CHAIN),
        POOL,
        BASE,
        U256::from(4_000u64),
        BasisPoints::new(-500),
        BasisPoints::new(1000),
        0,
        &user.preferences,
    )
    .unwrap();
    harness.hub.push_sim_revert(
        IAssetHubVault::dispatchInvestmentCall::SELECTOR,
        "insufficient balance",
    );
    let outcome = engine::dispatch_intent(
        &harness.db,
        &harness.vault,
        &intent,
        &vec![0x01u8].into(),
        &vec![].into(),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Cancelled { .. }));
    assert_eq!(
        harness
            .db
            .get_position(intent.fingerprint)
            .await
            .unwrap()
            .unwrap()
            .status,
        PositionStatus::Cancelled
    );
    assert_eq!(
        harness
            .hub
            .submission_count(IAssetHubVault::dispatchInvestmentCall::SELECTOR),
        0
    );
}
