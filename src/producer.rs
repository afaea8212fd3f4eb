//! NATS reply publishing

use anyhow::Result;
use async_nats::{Client, Message};
use tracing::{debug, warn};

/// Publishes handler replies to NATS
#[derive(Clone)]
pub struct ReplyPublisher {
    client: Client,
}

impl ReplyPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Send `payload` to the message's reply subject, if it has one
    pub async fn reply(&self, message: &Message, payload: Vec<u8>) -> Result<()> {
        let Some(reply) = message.reply.clone() else {
            warn!(subject = %message.subject, "Request without reply subject, dropping reply");
            return Ok(());
        };

        let size = payload.len();
        self.client.publish(reply, payload.into()).await?;
        debug!(subject = %message.subject, bytes = size, "Reply published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running NATS server
}
