use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::size::Size;

pub type SizeCounts = BTreeMap<Size, u64>;

#[derive(Debug, Error)]
pub enum UsageRepositoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt usage file: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}

#[async_trait]
pub trait UsageRepository: Send + Sync + 'static {
    /// Returns an empty map when nothing has been saved yet.
    async fn load(&self) -> Result<SizeCounts, UsageRepositoryError>;

    /// Replaces whatever was saved before with `counts`.
    async fn save(&self, counts: &SizeCounts) -> Result<(), UsageRepositoryError>;
}
