//! Durable mirror of tracked positions.
//!
//! Written through on every mutation, read only at bootstrap. The JSON file
//! store rewrites the whole file per write, which suits the few thousand
//! positions a single market holds; bulk paths go through `save_batch` so a
//! refresh chunk costs one rewrite.

use alloy::primitives::U256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keeper_chain::TokenId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::position::Position;

/// Persistence for `(token_id, liquidation_price)` pairs.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn save_or_update(&self, token_id: TokenId, liquidation_price: Option<U256>) -> Result<()>;

    /// Save several entries at once.
    async fn save_batch(&self, entries: &[(TokenId, Option<U256>)]) -> Result<()> {
        for &(token_id, liquidation_price) in entries {
            self.save_or_update(token_id, liquidation_price).await?;
        }
        Ok(())
    }

    /// Deleting an unknown token id is not an error.
    async fn delete(&self, token_id: TokenId) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<Position>>;
}

/// On-disk record. Prices are decimal strings to keep the file readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPosition {
    token_id: TokenId,
    liquidation_price: Option<String>,
    updated_at: DateTime<Utc>,
}

impl StoredPosition {
    fn to_position(&self) -> Result<Position> {
        let liquidation_price = match &self.liquidation_price {
            Some(raw) => Some(
                raw.parse::<U256>()
                    .with_context(|| format!("bad stored price for token {}: {raw}", self.token_id))?,
            ),
            None => None,
        };
        Ok(Position {
            token_id: self.token_id,
            liquidation_price,
        })
    }
}

/// JSON file store. The whole map is rewritten atomically on each change.
pub struct JsonFileStore {
    path: PathBuf,
    records: tokio::sync::Mutex<BTreeMap<TokenId, StoredPosition>>,
}

impl JsonFileStore {
    /// Open `path`, creating parent directories; a missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => {
                let list: Vec<StoredPosition> =
                    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
                list.into_iter().map(|r| (r.token_id, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        info!(path = %path.display(), positions = records.len(), "Position store opened");
        Ok(Self {
            path,
            records: tokio::sync::Mutex::new(records),
        })
    }

    async fn flush(&self, records: &BTreeMap<TokenId, StoredPosition>) -> Result<()> {
        let list: Vec<&StoredPosition> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

fn record(token_id: TokenId, liquidation_price: Option<U256>) -> StoredPosition {
    StoredPosition {
        token_id,
        liquidation_price: liquidation_price.map(|p| p.to_string()),
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl PositionStore for JsonFileStore {
    async fn save_or_update(&self, token_id: TokenId, liquidation_price: Option<U256>) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(token_id, record(token_id, liquidation_price));
        self.flush(&records).await?;
        debug!(token_id, "Position saved");
        Ok(())
    }

    async fn save_batch(&self, entries: &[(TokenId, Option<U256>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut records = self.records.lock().await;
        for &(token_id, liquidation_price) in entries {
            records.insert(token_id, record(token_id, liquidation_price));
        }
        self.flush(&records).await?;
        debug!(count = entries.len(), "Positions saved");
        Ok(())
    }

    async fn delete(&self, token_id: TokenId) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.remove(&token_id).is_some() {
            self.flush(&records).await?;
            debug!(token_id, "Position deleted");
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Position>> {
        let records = self.records.lock().await;
        records.values().map(StoredPosition::to_position).collect()
    }
}

impl std::fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStore").field("path", &self.path).finish_non_exhaustive()
    }
}

/// Volatile store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<TokenId, Option<U256>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token_id: TokenId) -> Option<Option<U256>> {
        self.records.lock().get(&token_id).copied()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn save_or_update(&self, token_id: TokenId, liquidation_price: Option<U256>) -> Result<()> {
        self.records.lock().insert(token_id, liquidation_price);
        Ok(())
    }

    async fn delete(&self, token_id: TokenId) -> Result<()> {
        self.records.lock().remove(&token_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Position>> {
        Ok(self
            .records
            .lock()
            .iter()
            .map(|(&token_id, &liquidation_price)| Position {
                token_id,
                liquidation_price,
            })
            .collect())
    }
}
