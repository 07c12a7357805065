use relay_core::errors::BackendError;
use relay_store::StoreError;

use crate::channel::ChannelError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("event channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Internal(String),
}
