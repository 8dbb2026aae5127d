use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Candidate;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Alert serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives the candidates that passed a cycle's filters.
///
/// Formatting and delivery (Telegram, sheets, ...) live behind this port.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, profile: &str, candidates: &[Candidate]) -> Result<(), AlertError>;
}
