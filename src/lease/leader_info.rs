//! Leader-info record
//!
//! A small side record published by the elected leader so other nodes can
//! forward writes. Absence means no leader is currently elected.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::errors::{LeaseError, LeaseResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub node_id: String,
    /// Externally reachable address of the leader
    pub address: String,
    pub elected_at: DateTime<Utc>,
}

impl LeaderInfo {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            elected_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait LeaderInfoStore: Send + Sync + fmt::Debug {
    async fn publish(&self, info: &LeaderInfo) -> LeaseResult<()>;

    /// Removes the record if it was published by `node_id`.
    async fn clear(&self, node_id: &str) -> LeaseResult<()>;

    async fn current(&self) -> LeaseResult<Option<LeaderInfo>>;
}

/// Leader-info record held in process memory as its serialized payload.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaderInfoStore {
    payload: Arc<RwLock<Option<String>>>,
}

impl MemoryLeaderInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(payload: &str) -> LeaseResult<LeaderInfo> {
        serde_json::from_str(payload).map_err(|e| LeaseError::InvalidLeaderInfo(e.to_string()))
    }
}

#[async_trait]
impl LeaderInfoStore for MemoryLeaderInfoStore {
    async fn publish(&self, info: &LeaderInfo) -> LeaseResult<()> {
        let payload =
            serde_json::to_string(info).map_err(|e| LeaseError::InvalidLeaderInfo(e.to_string()))?;
        *self.payload.write().await = Some(payload);
        Ok(())
    }

    async fn clear(&self, node_id: &str) -> LeaseResult<()> {
        let mut payload = self.payload.write().await;
        let owned = match payload.as_deref() {
            Some(current) => Self::decode(current)?.node_id == node_id,
            None => false,
        };
        if owned {
            *payload = None;
        }
        Ok(())
    }

    async fn current(&self) -> LeaseResult<Option<LeaderInfo>> {
        self.payload
            .read()
            .await
            .as_deref()
            .map(Self::decode)
            .transpose()
    }
}
