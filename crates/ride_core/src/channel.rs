//! Outbound message channel implemented by the transport layer.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("recipient rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Deliver `text` to `recipient`, optionally with choice buttons.
    ///
    /// `Ok(false)` means the transport accepted the call but did not deliver.
    async fn send(
        &self,
        recipient: &str,
        text: &str,
        choices: Option<&[String]>,
    ) -> Result<bool, ChannelError>;
}
