use std::collections::HashSet;

use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use liquidot::prelude::*;
use sha2::{Digest, Sha256};
use sqlx::Row;

use super::models::{
    addr_text, amount_text, OperationPhase, OperationRecord, OperationStatus, PendingSettlement,
    PendingSettlementRow, PoolRow, PositionRow, UserRecord,
};
use super::Db;

/// Result of a compare-and-set status transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied,
    /// The position already carries the target status; a re-delivered
    /// event lands here and changes nothing.
    AlreadyThere,
    /// The position is in neither the expected nor the target status.
    Refused { actual: PositionStatus },
    /// No such position.
    Missing,
}

impl TransitionOutcome {
    pub fn changed(self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Result of a settlement attempt. `AlreadySettled` is the anti-double-
/// credit answer: the first settlement wins and every later one is a
/// no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled { amount: U256 },
    AlreadySettled { amount: U256 },
    Refused { actual: PositionStatus },
    Missing,
}

impl Db {
    // ----- users & preferences -------------------------------------------

    /// Insert or replace a user and their preferences. Preferences are
    /// validated before they touch the store.
    pub async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        user.preferences.validate()?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO users (address, created_at) VALUES (?1, ?2)")
            .bind(addr_text(user.address))
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        let base_assets = serde_json::to_string(
            &user
                .preferences
                .base_assets
                .iter()
                .map(|a| addr_text(*a))
                .collect::<Vec<_>>(),
        )?;
        sqlx::query(
            "INSERT INTO preferences (user_address, min_apr_bps, max_allocation_bps, base_assets, \
             risk_level, stop_loss_bps, take_profit_bps, slippage_bps) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT (user_address) DO UPDATE SET \
             min_apr_bps = excluded.min_apr_bps, \
             max_allocation_bps = excluded.max_allocation_bps, \
             base_assets = excluded.base_assets, \
             risk_level = excluded.risk_level, \
             stop_loss_bps = excluded.stop_loss_bps, \
             take_profit_bps = excluded.take_profit_bps, \
             slippage_bps = excluded.slippage_bps",
        )
        .bind(addr_text(user.address))
        .bind(i64::from(user.preferences.min_apr_bps))
        .bind(user.preferences.max_allocation_bps.raw())
        .bind(base_assets)
        .bind(i64::from(user.preferences.risk_level))
        .bind(user.preferences.stop_loss_bps.raw())
        .bind(user.preferences.take_profit_bps.raw())
        .bind(user.preferences.slippage_bps.raw())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query(
            "SELECT user_address, min_apr_bps, max_allocation_bps, base_assets, risk_level, \
             stop_loss_bps, take_profit_bps, slippage_bps FROM preferences",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let address: String = row.try_get("user_address")?;
            let base_assets: String = row.try_get("base_assets")?;
            let base_assets: Vec<String> = serde_json::from_str(&base_assets)?;
            let preferences = Preferences {
                min_apr_bps: u32::try_from(row.try_get::<i64, _>("min_apr_bps")?)
                    .context("min_apr_bps")?,
                max_allocation_bps: BasisPoints::new(row.try_get("max_allocation_bps")?),
                base_assets: base_assets
                    .iter()
                    .map(|s| s.parse().context("Corrupt base asset"))
                    .collect::<Result<_>>()?,
                risk_level: u8::try_from(row.try_get::<i64, _>("risk_level")?)
                    .context("risk_level")?,
                stop_loss_bps: BasisPoints::new(row.try_get("stop_loss_bps")?),
                take_profit_bps: BasisPoints::new(row.try_get("take_profit_bps")?),
                slippage_bps: BasisPoints::new(row.try_get("slippage_bps")?),
            };
            preferences
                .validate()
                .with_context(|| format!("Stored preferences for {address} are invalid"))?;
            users.push(UserRecord {
                address: address.parse().context("Corrupt user address")?,
                preferences,
            });
        }
        Ok(users)
    }

    // ----- positions ------------------------------------------------------

    /// Idempotent insert: a second intent with the same fingerprint is a
    /// no-op. Returns whether a row was created.
    pub async fn insert_position(&self, intent: &InvestmentIntent) -> Result<bool> {
        let now = Utc::now();
        let res = sqlx::query(
            "INSERT OR IGNORE INTO positions (fingerprint, user_address, chain_id, pool, \
             base_asset, amount, lower_bound_bps, upper_bound_bps, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(intent.fingerprint.to_string())
        .bind(addr_text(intent.user))
        .bind(i64::try_from(intent.chain.u64()).context("chain id")?)
        .bind(addr_text(intent.pool))
        .bind(addr_text(intent.base_asset))
        .bind(amount_text(intent.amount))
        .bind(intent.lower_bound_bps.raw())
        .bind(intent.upper_bound_bps.raw())
        .bind(PositionStatus::PendingDispatch.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn get_position(&self, fingerprint: Fingerprint) -> Result<Option<Position>> {
        let row = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE fingerprint = ?1",
        )
        .bind(fingerprint.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PositionRow::into_position).transpose()
    }

    pub async fn find_by_nft(&self, chain: ChainId, nft_id: u64) -> Result<Option<Position>> {
        let row = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE chain_id = ?1 AND nft_id = ?2",
        )
        .bind(i64::try_from(chain.u64()).context("chain id")?)
        .bind(i64::try_from(nft_id).context("nft id")?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PositionRow::into_position).transpose()
    }

    pub async fn positions_with_status(&self, status: PositionStatus) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE status = ?1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    /// Compare-and-set on status. The expected source status is asserted
    /// inside the transaction; an illegal (expected -> to) pair is a
    /// protocol error before the row is touched.
    pub async fn transition(
        &self,
        fingerprint: Fingerprint,
        expected: PositionStatus,
        to: PositionStatus,
    ) -> Result<TransitionOutcome> {
        expected.check_transition(to)?;
        let mut tx = self.pool.begin().await?;
        let outcome = Self::cas_locked(&mut tx, fingerprint, expected, to).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn cas_locked(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        fingerprint: Fingerprint,
        expected: PositionStatus,
        to: PositionStatus,
    ) -> Result<TransitionOutcome> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM positions WHERE fingerprint = ?1")
                .bind(fingerprint.to_string())
                .fetch_optional(&mut **tx)
                .await?;
        let Some(current) = current else {
            return Ok(TransitionOutcome::Missing);
        };
        let current: PositionStatus = current.parse().context("Corrupt status column")?;
        if current == to {
            return Ok(TransitionOutcome::AlreadyThere);
        }
        if current != expected {
            return Ok(TransitionOutcome::Refused { actual: current });
        }
        let res = sqlx::query(
            "UPDATE positions SET status = ?2, updated_at = ?3 \
             WHERE fingerprint = ?1 AND status = ?4",
        )
        .bind(fingerprint.to_string())
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(expected.as_str())
        .execute(&mut **tx)
        .await?;
        anyhow::ensure!(
            res.rows_affected() == 1,
            "CAS update raced inside a transaction for {fingerprint}"
        );
        Ok(TransitionOutcome::Applied)
    }

    /// `PendingExecution -> Active`, recording what the spoke minted.
    pub async fn mark_executed(
        &self,
        fingerprint: Fingerprint,
        nft_id: u64,
        liquidity: u128,
        entry_tick: i32,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::cas_locked(
            &mut tx,
            fingerprint,
            PositionStatus::PendingExecution,
            PositionStatus::Active,
        )
        .await?;
        if outcome.changed() {
            sqlx::query(
                "UPDATE positions SET nft_id = ?2, liquidity = ?3, entry_tick = ?4 \
                 WHERE fingerprint = ?1",
            )
            .bind(fingerprint.to_string())
            .bind(i64::try_from(nft_id).context("nft id")?)
            .bind(U256::from(liquidity).to_string())
            .bind(entry_tick)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    /// Phase 0 commit: `Active -> LiquidationPending` plus the pending
    /// settlement record, atomically. The record's sequence number grows
    /// by one on every commit for the same fingerprint.
    pub async fn commit_liquidation(
        &self,
        fingerprint: Fingerprint,
        expected_token: Address,
        min_out0: U256,
        min_out1: U256,
        min_total: U256,
        deadline: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::cas_locked(
            &mut tx,
            fingerprint,
            PositionStatus::Active,
            PositionStatus::LiquidationPending,
        )
        .await?;
        // Re-quoting after a failed phase re-commits the record even
        // though the status CAS reports AlreadyThere.
        if matches!(
            outcome,
            TransitionOutcome::Applied | TransitionOutcome::AlreadyThere
        ) {
            sqlx::query(
                "INSERT INTO pending_settlements (fingerprint, expected_token, min_out0, \
                 min_out1, min_total, deadline, seq) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1) \
                 ON CONFLICT (fingerprint) DO UPDATE SET \
                 expected_token = excluded.expected_token, \
                 min_out0 = excluded.min_out0, \
                 min_out1 = excluded.min_out1, \
                 min_total = excluded.min_total, \
                 deadline = excluded.deadline, \
                 seq = pending_settlements.seq + 1",
            )
            .bind(fingerprint.to_string())
            .bind(addr_text(expected_token))
            .bind(amount_text(min_out0))
            .bind(amount_text(min_out1))
            .bind(amount_text(min_total))
            .bind(deadline)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    /// `LiquidationPending -> Liquidated`, recording collected amounts.
    pub async fn mark_liquidated(
        &self,
        fingerprint: Fingerprint,
        amount0: U256,
        amount1: U256,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::cas_locked(
            &mut tx,
            fingerprint,
            PositionStatus::LiquidationPending,
            PositionStatus::Liquidated,
        )
        .await?;
        if outcome.changed() {
            sqlx::query(
                "UPDATE positions SET collected0 = ?2, collected1 = ?3 WHERE fingerprint = ?1",
            )
            .bind(fingerprint.to_string())
            .bind(amount_text(amount0))
            .bind(amount_text(amount1))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    /// Monotone settlement: the first call credits, every later call for
    /// the same fingerprint reports `AlreadySettled` without touching
    /// anything. Removes the pending settlement row in the same
    /// transaction.
    pub async fn record_settlement(
        &self,
        fingerprint: Fingerprint,
        amount: U256,
    ) -> Result<SettleOutcome> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT status, settled_amount FROM positions WHERE fingerprint = ?1",
        )
        .bind(fingerprint.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((status, settled_amount)) = row else {
            return Ok(SettleOutcome::Missing);
        };
        let status: PositionStatus = status.parse().context("Corrupt status column")?;
        if status == PositionStatus::Settled {
            let amount = settled_amount
                .as_deref()
                .map(super::models::parse_amount)
                .transpose()?
                .unwrap_or_default();
            return Ok(SettleOutcome::AlreadySettled { amount });
        }
        if status != PositionStatus::Liquidated {
            return Ok(SettleOutcome::Refused { actual: status });
        }
        sqlx::query(
            "UPDATE positions SET status = ?2, settled_amount = ?3, updated_at = ?4 \
             WHERE fingerprint = ?1 AND status = ?5",
        )
        .bind(fingerprint.to_string())
        .bind(PositionStatus::Settled.as_str())
        .bind(amount_text(amount))
        .bind(Utc::now())
        .bind(PositionStatus::Liquidated.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM pending_settlements WHERE fingerprint = ?1")
            .bind(fingerprint.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(SettleOutcome::Settled { amount })
    }

    /// Halt automation for a position: any non-terminal status moves to
    /// `Failed` for operator inspection.
    pub async fn fail_position(&self, fingerprint: Fingerprint, reason: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM positions WHERE fingerprint = ?1")
                .bind(fingerprint.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(false);
        };
        let current: PositionStatus = current.parse().context("Corrupt status column")?;
        if current.is_terminal() {
            return Ok(false);
        }
        tracing::error!("Halting automation for position {fingerprint}: {reason}");
        sqlx::query(
            "UPDATE positions SET status = ?2, updated_at = ?3 WHERE fingerprint = ?1",
        )
        .bind(fingerprint.to_string())
        .bind(PositionStatus::Failed.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Sum of amounts currently committed by (user, pool), over statuses
    /// that hold allocation.
    pub async fn allocated_amount(&self, user: Address, pool: Address) -> Result<U256> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT amount, status FROM positions WHERE user_address = ?1 AND pool = ?2",
        )
        .bind(addr_text(user))
        .bind(addr_text(pool))
        .fetch_all(&self.pool)
        .await?;
        let mut total = U256::ZERO;
        for (amount, status) in rows {
            let status: PositionStatus = status.parse().context("Corrupt status column")?;
            if status.holds_allocation() {
                total = total
                    .checked_add(super::models::parse_amount(&amount)?)
                    .context("Allocation sum overflow")?;
            }
        }
        Ok(total)
    }

    /// Number of positions ever created for (user, pool), regardless of
    /// status. Doubles as the intent nonce: stable across decision
    /// cycles, bumped once a position reaches the store.
    pub async fn position_count(&self, user: Address, pool: Address) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM positions WHERE user_address = ?1 AND pool = ?2",
        )
        .bind(addr_text(user))
        .bind(addr_text(pool))
        .fetch_one(&self.pool)
        .await?;
        u64::try_from(count).context("position count")
    }

    /// Whether (user, pool) already has a position in a non-terminal
    /// status.
    pub async fn has_open_position(&self, user: Address, pool: Address) -> Result<bool> {
        let statuses: Vec<String> = sqlx::query_scalar(
            "SELECT status FROM positions WHERE user_address = ?1 AND pool = ?2",
        )
        .bind(addr_text(user))
        .bind(addr_text(pool))
        .fetch_all(&self.pool)
        .await?;
        for status in statuses {
            let status: PositionStatus = status.parse().context("Corrupt status column")?;
            if !status.is_terminal() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn status_counts(&self) -> Result<Vec<(PositionStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM positions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = Vec::with_capacity(rows.len());
        for (status, count) in rows {
            counts.push((
                status
                    .parse::<PositionStatus>()
                    .context("Corrupt status column")?,
                count,
            ));
        }
        counts.sort_by_key(|(status, _)| *status);
        Ok(counts)
    }

    // ----- pending settlements -------------------------------------------

    pub async fn pending_settlement(
        &self,
        fingerprint: Fingerprint,
    ) -> Result<Option<PendingSettlement>> {
        let row = sqlx::query_as::<_, PendingSettlementRow>(
            "SELECT * FROM pending_settlements WHERE fingerprint = ?1",
        )
        .bind(fingerprint.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PendingSettlementRow::into_record).transpose()
    }

    /// Record the amount seen in an `AssetsReturned` event. A hint only:
    /// settlement authority stays with the hub's `Settled` event, and a
    /// hint re-delivered after settlement must not resurrect the record.
    pub async fn observe_returned_assets(
        &self,
        fingerprint: Fingerprint,
        token: Address,
        amount: U256,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM positions WHERE fingerprint = ?1")
                .bind(fingerprint.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(status) = status else {
            tracing::warn!("AssetsReturned hint for unknown position {fingerprint}");
            return Ok(());
        };
        let status: PositionStatus = status.parse().context("Corrupt status column")?;
        if status.is_terminal() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO pending_settlements (fingerprint, expected_token, min_out0, min_out1, \
             min_total, observed_amount, deadline, seq) \
             VALUES (?1, ?2, '0', '0', '0', ?3, ?4, 1) \
             ON CONFLICT (fingerprint) DO UPDATE SET \
             observed_amount = excluded.observed_amount",
        )
        .bind(fingerprint.to_string())
        .bind(addr_text(token))
        .bind(amount_text(amount))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    // ----- operation log --------------------------------------------------

    /// Append an operation-log row before a submission goes out. The
    /// digest commits to the exact payload; the unique idempotency key
    /// makes duplicate appends no-ops.
    pub async fn oplog_append(&self, record: &OperationRecord) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO operation_log (fingerprint, phase, attempt, idempotency_key, \
             payload_digest, chain_id, tx_hash, receipt_status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(record.fingerprint.to_string())
        .bind(record.phase.as_str())
        .bind(i64::from(record.attempt))
        .bind(&record.idempotency_key)
        .bind(&record.payload_digest)
        .bind(i64::try_from(record.chain.u64()).context("chain id")?)
        .bind(record.tx_hash.map(|h| format!("{h:#x}")))
        .bind(record.status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn oplog_update(
        &self,
        idempotency_key: &str,
        tx_hash: Option<B256>,
        status: OperationStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE operation_log SET tx_hash = COALESCE(?2, tx_hash), receipt_status = ?3, \
             updated_at = ?4 WHERE idempotency_key = ?1",
        )
        .bind(idempotency_key)
        .bind(tx_hash.map(|h| format!("{h:#x}")))
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Highest attempt number recorded for (fingerprint, phase); zero if
    /// none.
    pub async fn oplog_attempts(
        &self,
        fingerprint: Fingerprint,
        phase: OperationPhase,
    ) -> Result<u32> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(attempt) FROM operation_log WHERE fingerprint = ?1 AND phase = ?2",
        )
        .bind(fingerprint.to_string())
        .bind(phase.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(max.unwrap_or(0)).context("attempt counter")?)
    }

    /// Broadcast operations for one chain, used to seed the writer's
    /// idempotency map after a restart.
    pub async fn oplog_broadcast_for_chain(
        &self,
        chain: ChainId,
    ) -> Result<Vec<(String, B256)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT idempotency_key, tx_hash FROM operation_log \
             WHERE chain_id = ?1 AND tx_hash IS NOT NULL",
        )
        .bind(i64::try_from(chain.u64()).context("chain id")?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(key, hash)| {
                Ok((
                    key,
                    hash.parse::<B256>().context("Corrupt tx hash column")?,
                ))
            })
            .collect()
    }

    // ----- pools ----------------------------------------------------------

    pub async fn upsert_pool(&self, snapshot: &PoolSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO pools (chain_id, address, token0, token0_decimals, token1, \
             token1_decimals, tick_spacing, fee_tier, tvl_usd, volume_24h_usd, apr_bps, \
             sqrt_price, tick, observed_at, missed_cycles, deleted) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, 0) \
             ON CONFLICT (chain_id, address) DO UPDATE SET \
             token0 = excluded.token0, token0_decimals = excluded.token0_decimals, \
             token1 = excluded.token1, token1_decimals = excluded.token1_decimals, \
             tick_spacing = excluded.tick_spacing, fee_tier = excluded.fee_tier, \
             tvl_usd = excluded.tvl_usd, volume_24h_usd = excluded.volume_24h_usd, \
             apr_bps = excluded.apr_bps, sqrt_price = excluded.sqrt_price, \
             tick = excluded.tick, observed_at = excluded.observed_at, \
             missed_cycles = 0, deleted = 0",
        )
        .bind(i64::try_from(snapshot.id.chain.u64()).context("chain id")?)
        .bind(addr_text(snapshot.id.address))
        .bind(addr_text(snapshot.token0.address))
        .bind(i64::from(snapshot.token0.decimals))
        .bind(addr_text(snapshot.token1.address))
        .bind(i64::from(snapshot.token1.decimals))
        .bind(snapshot.tick_spacing)
        .bind(i64::from(snapshot.fee_tier))
        .bind(snapshot.tvl_usd.to_string())
        .bind(snapshot.volume_24h_usd.to_string())
        .bind(i64::from(snapshot.apr_bps))
        .bind(amount_text(snapshot.sqrt_price))
        .bind(snapshot.tick)
        .bind(snapshot.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump the missed-cycle counter for pools of `chain` absent from
    /// the latest snapshot and soft-delete those missing for
    /// `max_missed` consecutive cycles. Returns how many were deleted.
    pub async fn age_missing_pools(
        &self,
        chain: ChainId,
        seen: &HashSet<Address>,
        max_missed: i64,
    ) -> Result<u64> {
        let chain_id = i64::try_from(chain.u64()).context("chain id")?;
        let mut tx = self.pool.begin().await?;
        let addresses: Vec<String> = sqlx::query_scalar(
            "SELECT address FROM pools WHERE chain_id = ?1 AND deleted = 0",
        )
        .bind(chain_id)
        .fetch_all(&mut *tx)
        .await?;
        let mut deleted = 0;
        for address in addresses {
            let parsed: Address = address.parse().context("Corrupt pool address")?;
            if seen.contains(&parsed) {
                continue;
            }
            let res = sqlx::query(
                "UPDATE pools SET missed_cycles = missed_cycles + 1, \
                 deleted = CASE WHEN missed_cycles + 1 >= ?3 THEN 1 ELSE 0 END \
                 WHERE chain_id = ?1 AND address = ?2",
            )
            .bind(chain_id)
            .bind(&address)
            .execute(&mut *tx)
            .await?;
            if res.rows_affected() == 1 {
                let now_deleted: i64 = sqlx::query_scalar(
                    "SELECT deleted FROM pools WHERE chain_id = ?1 AND address = ?2",
                )
                .bind(chain_id)
                .bind(&address)
                .fetch_one(&mut *tx)
                .await?;
                if now_deleted == 1 {
                    deleted += 1;
                }
            }
        }
        tx.commit().await?;
        Ok(deleted)
    }

    /// Pools eligible for new investment: not soft-deleted and observed
    /// within the freshness bound.
    pub async fn fresh_pools(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Result<Vec<PoolSnapshot>> {
        let cutoff = now - max_age;
        let rows = sqlx::query_as::<_, PoolRow>(
            "SELECT * FROM pools WHERE deleted = 0 AND observed_at >= ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PoolRow::into_snapshot).collect()
    }

    pub async fn get_pool(&self, id: PoolId) -> Result<Option<PoolSnapshot>> {
        let row = sqlx::query_as::<_, PoolRow>(
            "SELECT * FROM pools WHERE chain_id = ?1 AND address = ?2 AND deleted = 0",
        )
        .bind(i64::try_from(id.chain.u64()).context("chain id")?)
        .bind(addr_text(id.address))
        .fetch_optional(&self.pool)
        .await?;
        row.map(PoolRow::into_snapshot).transpose()
    }

    // ----- event cursors --------------------------------------------------

    pub async fn cursor(&self, chain: ChainId, contract: Address) -> Result<Option<u64>> {
        let next: Option<i64> = sqlx::query_scalar(
            "SELECT next_block FROM event_cursors WHERE chain_id = ?1 AND contract = ?2",
        )
        .bind(i64::try_from(chain.u64()).context("chain id")?)
        .bind(addr_text(contract))
        .fetch_optional(&self.pool)
        .await?;
        next.map(|n| u64::try_from(n).context("Negative cursor"))
            .transpose()
    }

    /// Persist a cursor. Cursors are monotone: an attempt to move one
    /// backwards is ignored.
    pub async fn advance_cursor(
        &self,
        chain: ChainId,
        contract: Address,
        next_block: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO event_cursors (chain_id, contract, next_block, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (chain_id, contract) DO UPDATE SET \
             next_block = MAX(event_cursors.next_block, excluded.next_block), \
             updated_at = excluded.updated_at",
        )
        .bind(i64::try_from(chain.u64()).context("chain id")?)
        .bind(addr_text(contract))
        .bind(i64::try_from(next_block).context("cursor")?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_cursors(&self) -> Result<Vec<(ChainId, Address, u64, DateTime<Utc>)>> {
        let rows: Vec<(i64, String, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT chain_id, contract, next_block, updated_at FROM event_cursors",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(chain, contract, next, updated)| {
                Ok((
                    ChainId::new(u64::try_from(chain).context("chain id")?),
                    contract.parse().context("Corrupt contract column")?,
                    u64::try_from(next).context("cursor")?,
                    updated,
                ))
            })
            .collect()
    }
}

/// Digest of a submission payload, recorded in the operation log.
pub fn payload_digest(calldata: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(calldata);
    hex::encode(hasher.finalize())
}
