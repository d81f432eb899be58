//! Pyth Hermes price service client.

use alloy::primitives::{Bytes, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::oracle::PriceOracle;

/// Decimals of the normalized price returned by `current_price`.
pub const PRICE_DECIMALS: i32 = 18;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Hermes client for a single price feed.
#[derive(Clone)]
pub struct PythClient {
    client: reqwest::Client,
    base_url: String,
    feed_id: String,
}

impl std::fmt::Debug for PythClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythClient")
            .field("base_url", &self.base_url)
            .field("feed_id", &self.feed_id)
            .finish()
    }
}

impl PythClient {
    pub fn new(base_url: impl Into<String>, feed_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("building Hermes HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            feed_id: feed_id.into(),
        })
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    /// Fetch the latest update for the configured feed.
    #[instrument(skip(self), fields(feed_id = %self.feed_id))]
    pub async fn latest_update(&self) -> Result<HermesUpdate> {
        let url = format!("{}/v2/updates/price/latest", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("ids[]", self.feed_id.as_str()), ("encoding", "hex")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Hermes API error: {} - {}", status, body);
        }

        let update: HermesUpdate = response.json().await?;
        debug!(
            blobs = update.binary.data.len(),
            feeds = update.parsed.len(),
            "Got Hermes update"
        );
        Ok(update)
    }
}

#[async_trait]
impl PriceOracle for PythClient {
    async fn current_price(&self) -> Result<U256> {
        let update = self.latest_update().await?;
        let feed = update
            .parsed
            .first()
            .ok_or_else(|| anyhow::anyhow!("Hermes returned no parsed feed for {}", self.feed_id))?;
        normalize_price(&feed.price.price, feed.price.expo)
    }

    async fn price_update_payload(&self) -> Result<Vec<Bytes>> {
        let update = self.latest_update().await?;
        decode_update_blobs(&update.binary)
    }
}

/// Scale a Pyth `price * 10^expo` value to 18 decimals.
pub fn normalize_price(raw: &str, expo: i32) -> Result<U256> {
    if raw.starts_with('-') {
        anyhow::bail!("negative oracle price: {raw}");
    }
    let price: U256 = raw
        .parse()
        .with_context(|| format!("invalid oracle price: {raw}"))?;

    let shift = PRICE_DECIMALS + expo;
    let ten = U256::from(10u64);
    let normalized = if shift >= 0 {
        price
            .checked_mul(ten.pow(U256::from(shift as u64)))
            .ok_or_else(|| anyhow::anyhow!("oracle price overflow: {raw}e{expo}"))?
    } else {
        price / ten.pow(U256::from(shift.unsigned_abs() as u64))
    };
    Ok(normalized)
}

fn decode_update_blobs(binary: &HermesBinary) -> Result<Vec<Bytes>> {
    if binary.encoding != "hex" {
        anyhow::bail!("unexpected Hermes encoding: {}", binary.encoding);
    }
    binary
        .data
        .iter()
        .map(|blob| {
            let raw = hex::decode(blob.trim_start_matches("0x")).context("invalid Hermes update blob")?;
            Ok(Bytes::from(raw))
        })
        .collect()
}

/// `GET /v2/updates/price/latest` response.
#[derive(Debug, Clone, Deserialize)]
pub struct HermesUpdate {
    pub binary: HermesBinary,
    #[serde(default)]
    pub parsed: Vec<HermesParsedFeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HermesBinary {
    pub encoding: String,
    pub data: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HermesParsedFeed {
    pub id: String,
    pub price: HermesPrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HermesPrice {
    pub price: String,
    pub conf: String,
    pub expo: i32,
    pub publish_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "binary": {"encoding": "hex", "data": ["504e4155", "0x0102"]},
        "parsed": [{
            "id": "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace",
            "price": {"price": "250012345678", "conf": "1000", "expo": -8, "publish_time": 1700000000},
            "ema_price": {"price": "250000000000", "conf": "1000", "expo": -8, "publish_time": 1700000000},
            "metadata": {"slot": 1}
        }]
    }"#;

    #[test]
    fn test_normalize_expo_minus_eight() {
        // 2500.12345678 USD -> 18 decimals
        let price = normalize_price("250012345678", -8).unwrap();
        assert_eq!(price, U256::from(250012345678u64) * U256::from(10u64).pow(U256::from(10u64)));
    }

    #[test]
    fn test_normalize_small_expo_truncates() {
        let price = normalize_price("123456789", -20).unwrap();
        assert_eq!(price, U256::from(1234567u64));
    }

    #[test]
    fn test_negative_price_rejected() {
        assert!(normalize_price("-1", -8).is_err());
        assert!(normalize_price("abc", -8).is_err());
    }

    #[test]
    fn test_parse_hermes_response() {
        let update: HermesUpdate = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(update.parsed.len(), 1);
        assert_eq!(update.parsed[0].price.expo, -8);

        let blobs = decode_update_blobs(&update.binary).unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].as_ref(), &[0x50, 0x4e, 0x41, 0x55]);
        assert_eq!(blobs[1].as_ref(), &[0x01, 0x02]);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = PythClient::new("https://hermes.pyth.network/", "abc").unwrap();
        assert_eq!(client.base_url, "https://hermes.pyth.network");
        assert_eq!(client.feed_id(), "abc");
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_live_eth_usd() {
        let client = PythClient::new(
            "https://hermes.pyth.network",
            "0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace",
        )
        .unwrap();

        let price = client.current_price().await.unwrap();
        assert!(price > U256::ZERO);
        assert!(!client.price_update_payload().await.unwrap().is_empty());
    }
}
