//! Per-user policy evaluation.
//!
//! Ranks the fresh pool universe against the user's preferences and
//! produces at most K investment intents, plus stop-loss / take-profit
//! liquidation requests for positions already open. Never touches the
//! chain except to read the user's hub balance.

use alloy::primitives::{Address, U256};
use anyhow::Result;
use bigdecimal::{BigDecimal, One, Zero};
use chrono::Utc;
use liquidot::{InvestmentIntent, PoolSnapshot, PositionStatus};

use crate::config::DecisionConfig;
use crate::contracts::VaultContract;
use crate::db::{Db, UserRecord};

use super::{LiquidationReason, LiquidationRequest};

/// Everything one evaluation produced.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub intents: Vec<InvestmentIntent>,
    pub liquidations: Vec<LiquidationRequest>,
    /// Human-readable notes for the task status line.
    pub notes: Vec<String>,
}

struct RankedPool {
    snapshot: PoolSnapshot,
    base_asset: Address,
    score: BigDecimal,
}

/// Evaluate one user against the current pool universe.
pub async fn evaluate_user(
    db: &Db,
    vault: &VaultContract,
    config: &DecisionConfig,
    pool_freshness: chrono::Duration,
    user: &UserRecord,
) -> Result<Evaluation> {
    let mut evaluation = Evaluation::default();
    let balance = vault.get_user_balance(user.address).await?;

    threshold_checks(db, user, &mut evaluation).await?;

    if balance.is_zero() {
        evaluation.notes.push("no hub balance".to_owned());
        return Ok(evaluation);
    }

    let pools = db.fresh_pools(Utc::now(), pool_freshness).await?;
    let mut ranked = Vec::new();
    for snapshot in pools {
        let Some(base_asset) = eligible_base_asset(&snapshot, user) else {
            continue;
        };
        if snapshot.apr_bps < user.preferences.min_apr_bps {
            continue;
        }
        if !tvl_floor_met(&snapshot, config, user.preferences.risk_level) {
            continue;
        }
        if db.has_open_position(user.address, snapshot.id.address).await? {
            continue;
        }
        let score = risk_adjusted_score(&snapshot);
        ranked.push(RankedPool {
            snapshot,
            base_asset,
            score,
        });
    }

    // Rank by risk-adjusted yield; break ties by higher TVL, then lower
    // volatility (turnover).
    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.snapshot.tvl_usd.cmp(&a.snapshot.tvl_usd))
            .then_with(|| a.snapshot.turnover().cmp(&b.snapshot.turnover()))
    });

    let per_pool_cap = user.preferences.max_allocation_bps.of_amount(balance);
    let mut remaining = balance;
    for pool in ranked.into_iter().take(usize::try_from(config.max_intents)?) {
        if remaining.is_zero() {
            break;
        }
        let already = db
            .allocated_amount(user.address, pool.snapshot.id.address)
            .await?;
        let headroom = per_pool_cap.saturating_sub(already);
        let amount = headroom.min(remaining);
        if amount.is_zero() {
            continue;
        }
        let nonce = db
            .position_count(user.address, pool.snapshot.id.address)
            .await?;
        match InvestmentIntent::new(
            user.address,
            pool.snapshot.id.chain,
            pool.snapshot.id.address,
            pool.base_asset,
            amount,
            config.lower_bound_bps,
            config.upper_bound_bps,
            nonce,
            &user.preferences,
        ) {
            Ok(intent) => {
                remaining = remaining.saturating_sub(amount);
                evaluation.intents.push(intent);
            }
            // Rejected at construction: no store or chain effect.
            Err(err) => evaluation
                .notes
                .push(format!("rejected {}: {err}", pool.snapshot.id)),
        }
    }
    Ok(evaluation)
}

/// Stop-loss / take-profit checks over the user's Active positions.
///
/// The estimate is tick-based: one tick is one hundredth of a percent of
/// price, so the delta to the entry tick approximates the position's
/// value change in basis points. The liquidation controller's quote gate
/// is the authoritative check; this only decides whether to invoke it.
async fn threshold_checks(db: &Db, user: &UserRecord, evaluation: &mut Evaluation) -> Result<()> {
    for position in db.positions_with_status(PositionStatus::Active).await? {
        if position.user != user.address {
            continue;
        }
        let Some(entry_tick) = position.entry_tick else {
            continue;
        };
        let Some(pool) = db
            .get_pool(liquidot::PoolId {
                chain: position.chain,
                address: position.pool,
            })
            .await?
        else {
            continue;
        };
        let pnl_bps = pool.tick.saturating_sub(entry_tick);
        if pnl_bps <= user.preferences.stop_loss_bps.raw() {
            evaluation.liquidations.push(LiquidationRequest {
                fingerprint: position.fingerprint,
                reason: LiquidationReason::StopLoss,
            });
            evaluation.notes.push(format!(
                "stop-loss hit for {} at {pnl_bps}bps",
                position.fingerprint
            ));
        } else if pnl_bps >= user.preferences.take_profit_bps.raw() {
            evaluation.liquidations.push(LiquidationRequest {
                fingerprint: position.fingerprint,
                reason: LiquidationReason::TakeProfit,
            });
            evaluation.notes.push(format!(
                "take-profit hit for {} at {pnl_bps}bps",
                position.fingerprint
            ));
        }
    }
    Ok(())
}

/// First preferred base asset the pool can pay out in, if any.
fn eligible_base_asset(snapshot: &PoolSnapshot, user: &UserRecord) -> Option<Address> {
    user.preferences
        .base_assets
        .iter()
        .copied()
        .find(|asset| *asset == snapshot.token0.address || *asset == snapshot.token1.address)
}

fn tvl_floor_met(snapshot: &PoolSnapshot, config: &DecisionConfig, risk_level: u8) -> bool {
    // Higher risk appetite accepts proportionally smaller pools.
    let floor = BigDecimal::from(config.min_tvl_usd) / BigDecimal::from(u32::from(risk_level));
    snapshot.tvl_usd >= floor
}

/// Expected yield discounted by volatility: `apr / (1 + turnover)`.
fn risk_adjusted_score(snapshot: &PoolSnapshot) -> BigDecimal {
    BigDecimal::from(snapshot.apr_bps) / (BigDecimal::one() + snapshot.turnover())
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidot::{BasisPoints, ChainId, PoolId, TokenInfo};

    fn snapshot(tvl: u64, volume: u64, apr_bps: u32) -> PoolSnapshot {
        PoolSnapshot {
            id: PoolId {
                chain: ChainId::new(420421),
                address: Address::repeat_byte(0x42),
            },
            token0: TokenInfo {
                address: Address::repeat_byte(0xaa),
                decimals: 18,
            },
            token1: TokenInfo {
                address: Address::repeat_byte(0xbb),
                decimals: 6,
            },
            tick_spacing: 60,
            fee_tier: 3000,
            tvl_usd: BigDecimal::from(tvl),
            volume_24h_usd: BigDecimal::from(volume),
            apr_bps,
            sqrt_price: U256::from(1u64) << 96,
            tick: 0,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn volatile_pool_scores_lower() {
        let calm = snapshot(1_000_000, 10_000, 1000);
        let churny = snapshot(1_000_000, 5_000_000, 1000);
        assert!(risk_adjusted_score(&calm) > risk_adjusted_score(&churny));
    }

    #[test]
    fn risk_level_scales_tvl_floor() {
        let config = DecisionConfig {
            min_tvl_usd: 100_000,
            ..Default::default()
        };
        let small = snapshot(30_000, 0, 1000);
        assert!(!tvl_floor_met(&small, &config, 1));
        assert!(tvl_floor_met(&small, &config, 5));
    }

    #[test]
    fn base_asset_must_be_in_pool() {
        let user = UserRecord {
            address: Address::repeat_byte(1),
            preferences: liquidot::Preferences {
                min_apr_bps: 0,
                max_allocation_bps: BasisPoints::new(5000),
                base_assets: vec![Address::repeat_byte(0xcc), Address::repeat_byte(0xbb)],
                risk_level: 3,
                stop_loss_bps: BasisPoints::new(-1000),
                take_profit_bps: BasisPoints::new(1000),
                slippage_bps: BasisPoints::new(100),
            },
        };
        let pool = snapshot(1_000_000, 0, 1000);
        // 0xcc is preferred but absent; 0xbb is in the pool.
        assert_eq!(
            eligible_base_asset(&pool, &user),
            Some(Address::repeat_byte(0xbb))
        );
    }
}
