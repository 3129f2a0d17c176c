use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

use crate::events::BackendEvent;
use crate::types::AgentId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: Uuid,
    pub from: AgentId,
    pub to: AgentId,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn new(
        from: impl Into<AgentId>,
        to: impl Into<AgentId>,
        payload: serde_json::Value,
        ttl: std::time::Duration,
    ) -> Self {
        let sent_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52));
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            payload,
            sent_at,
            expires_at: sent_at + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Messages addressed to one agent, read off the shared event bus.
///
/// Only messages sent after the mailbox was opened are seen. Envelopes past
/// their expiry are dropped on receipt.
pub struct Mailbox {
    agent_id: AgentId,
    receiver: broadcast::Receiver<BackendEvent>,
}

impl Mailbox {
    pub(crate) fn new(agent_id: AgentId, receiver: broadcast::Receiver<BackendEvent>) -> Self {
        Self { agent_id, receiver }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn accept(&self, event: BackendEvent) -> Option<MessageEnvelope> {
        let BackendEvent::AgentMessage { envelope } = event else {
            return None;
        };
        if envelope.to != self.agent_id {
            return None;
        }
        if envelope.is_expired() {
            log::debug!(
                "Dropping expired message {} from {} to {}",
                envelope.id,
                envelope.from,
                envelope.to
            );
            return None;
        }
        Some(envelope)
    }

    /// Waits for the next message. Returns `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if let Some(envelope) = self.accept(event) {
                        return Some(envelope);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Mailbox for {} lagged, {} event(s) lost",
                        self.agent_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<MessageEnvelope> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if let Some(envelope) = self.accept(event) {
                        return Some(envelope);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Mailbox for {} lagged, {} event(s) lost",
                        self.agent_id,
                        skipped
                    );
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
