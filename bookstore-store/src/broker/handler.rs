use async_trait::async_trait;
use bookstore_core::StoreError;
use bookstore_shared::{DecodeError, Queue};

use super::{BrokerError, Publisher};

/// Why a delivery could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    /// The payload will never decode; retrying is pointless.
    #[error("poison message: {0}")]
    Poison(#[from] DecodeError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("broker failure: {0}")]
    Broker(#[from] BrokerError),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl ConsumeError {
    pub fn is_poison(&self) -> bool {
        matches!(self, ConsumeError::Poison(_))
    }
}

/// Processes the messages of one queue.
///
/// Returning `Ok` means every side effect of the message is durable and it
/// may be acked.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn queue(&self) -> Queue;

    async fn handle(&self, payload: &[u8], publisher: &Publisher) -> Result<(), ConsumeError>;
}
