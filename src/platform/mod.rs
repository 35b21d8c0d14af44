pub mod imessage;

use async_trait::async_trait;

use crate::error::DeliveryError;

/// Sends reply text back out through the messaging channel.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// Deliver `text` to `target`, or to the self-conversation when `None`.
    async fn deliver(&self, text: &str, target: Option<&str>) -> Result<(), DeliveryError>;
}
