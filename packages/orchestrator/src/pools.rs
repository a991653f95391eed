//! Client for the external pool analytics source.
//!
//! One GraphQL endpoint per spoke chain returns the raw pool universe;
//! this module normalizes it into [`PoolSnapshot`]s. The yield estimate
//! is derived during normalization from fee tier and trade volume, since
//! the source only reports raw figures.

use std::str::FromStr;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::Utc;
use liquidot::{ChainId, PoolId, PoolSnapshot, TokenInfo};
use serde::Deserialize;

const POOLS_QUERY: &str = r#"
query Pools($first: Int!) {
  pools(first: $first, orderBy: totalValueLockedUSD, orderDirection: desc) {
    id
    feeTier
    tickSpacing
    tick
    sqrtPrice
    totalValueLockedUSD
    volumeUSD24h
    token0 { id decimals }
    token1 { id decimals }
  }
}
"#;

pub struct PoolSource {
    client: reqwest::Client,
    url: String,
    credential: Option<String>,
    chain: ChainId,
    page_size: u32,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<PoolsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct PoolsData {
    pools: Vec<RawPool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPool {
    id: String,
    fee_tier: String,
    tick_spacing: String,
    tick: String,
    sqrt_price: String,
    #[serde(rename = "totalValueLockedUSD")]
    total_value_locked_usd: String,
    #[serde(rename = "volumeUSD24h")]
    volume_usd_24h: String,
    token0: RawToken,
    token1: RawToken,
}

#[derive(Deserialize)]
struct RawToken {
    id: String,
    decimals: String,
}

impl PoolSource {
    pub fn new(
        client: reqwest::Client,
        url: String,
        credential: Option<String>,
        chain: ChainId,
        page_size: u32,
    ) -> Self {
        PoolSource {
            client,
            url,
            credential,
            chain,
            page_size,
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Pull and normalize the current pool universe. A failure here
    /// leaves the previous snapshot authoritative; the caller only logs
    /// it.
    pub async fn fetch(&self) -> Result<Vec<PoolSnapshot>> {
        let body = serde_json::json!({
            "query": POOLS_QUERY,
            "variables": { "first": self.page_size },
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential);
        }
        let response: GraphQlResponse = request
            .send()
            .await
            .context("Pool source request failed")?
            .error_for_status()
            .context("Pool source returned an error status")?
            .json()
            .await
            .context("Pool source returned malformed JSON")?;
        if let Some(first) = response.errors.first() {
            anyhow::bail!(
                "Pool source returned {} GraphQL error(s), first: {}",
                response.errors.len(),
                first.message
            );
        }
        let data = response
            .data
            .context("Pool source returned neither data nor errors")?;
        let mut snapshots = Vec::with_capacity(data.pools.len());
        for raw in data.pools {
            match self.normalize(raw) {
                Ok(snapshot) => snapshots.push(snapshot),
                // A single malformed pool must not poison the cycle.
                Err(err) => tracing::warn!("Skipping malformed pool from source: {err:?}"),
            }
        }
        Ok(snapshots)
    }

    fn normalize(&self, raw: RawPool) -> Result<PoolSnapshot> {
        let address =
            Address::from_str(&raw.id).with_context(|| format!("Bad pool address {}", raw.id))?;
        let fee_tier: u32 = raw.fee_tier.parse().context("Bad fee tier")?;
        let tvl_usd: BigDecimal = raw
            .total_value_locked_usd
            .parse()
            .context("Bad TVL figure")?;
        let volume_24h_usd: BigDecimal =
            raw.volume_usd_24h.parse().context("Bad volume figure")?;
        Ok(PoolSnapshot {
            id: PoolId {
                chain: self.chain,
                address,
            },
            token0: normalize_token(&raw.token0)?,
            token1: normalize_token(&raw.token1)?,
            tick_spacing: raw.tick_spacing.parse().context("Bad tick spacing")?,
            fee_tier,
            apr_bps: estimate_apr_bps(&tvl_usd, &volume_24h_usd, fee_tier),
            tvl_usd,
            volume_24h_usd,
            sqrt_price: U256::from_str(&raw.sqrt_price).context("Bad sqrt price")?,
            tick: raw.tick.parse().context("Bad tick")?,
            observed_at: Utc::now(),
        })
    }
}

fn normalize_token(raw: &RawToken) -> Result<TokenInfo> {
    Ok(TokenInfo {
        address: Address::from_str(&raw.id)
            .with_context(|| format!("Bad token address {}", raw.id))?,
        decimals: raw.decimals.parse().context("Bad token decimals")?,
    })
}

/// Annualize fee income against locked value: `volume * fee * 365 / tvl`,
/// in basis points. Fee tiers are in hundredths of a basis point.
fn estimate_apr_bps(tvl_usd: &BigDecimal, volume_24h_usd: &BigDecimal, fee_tier: u32) -> u32 {
    if tvl_usd.is_zero() {
        return 0;
    }
    let fee_rate = BigDecimal::from(fee_tier) / BigDecimal::from(1_000_000u32);
    let apr = volume_24h_usd * fee_rate * BigDecimal::from(365u32) / tvl_usd
        * BigDecimal::from(10_000u32);
    apr.to_u64()
        .and_then(|bps| u32::try_from(bps).ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apr_estimate_from_fees() {
        // $1m volume/day at 0.3% fee against $10m TVL:
        // 1_000_000 * 0.003 * 365 / 10_000_000 = 10.95% -> 1095bps.
        let apr = estimate_apr_bps(
            &BigDecimal::from(10_000_000u64),
            &BigDecimal::from(1_000_000u64),
            3000,
        );
        assert_eq!(apr, 1095);
    }

    #[test]
    fn zero_tvl_is_zero_apr() {
        assert_eq!(
            estimate_apr_bps(&BigDecimal::zero(), &BigDecimal::from(100u32), 3000),
            0
        );
    }
}
