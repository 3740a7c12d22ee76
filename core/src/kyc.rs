//! KYC status gate consumed from the identity collaborator.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    NotSubmitted,
    Pending,
    Approved,
    Rejected,
}

/// Read-only view of user verification status
#[async_trait]
pub trait KycDirectory: Send + Sync {
    async fn kyc_status(&self, user_id: &str) -> KycStatus;
}

/// In-process directory fed by the identity service
#[derive(Debug, Default)]
pub struct InMemoryKycDirectory {
    statuses: DashMap<UserId, KycStatus>,
}

impl InMemoryKycDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, user_id: impl Into<UserId>, status: KycStatus) {
        self.statuses.insert(user_id.into(), status);
    }
}

#[async_trait]
impl KycDirectory for InMemoryKycDirectory {
    async fn kyc_status(&self, user_id: &str) -> KycStatus {
        self.statuses
            .get(user_id)
            .map(|entry| *entry.value())
            .unwrap_or(KycStatus::NotSubmitted)
    }
}
