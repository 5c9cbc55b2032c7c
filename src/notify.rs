//! Real-time notification delivery.
//!
//! The pipeline never touches transport internals: it holds a
//! [`NotificationChannel`] capability and treats every push as best-effort.
//! The production implementation fans out over per-account broadcast
//! channels that WebSocket clients subscribe to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::NotifyError;
use crate::model::NotificationPayload;

/// Per-account broadcast capacity. Clients that lag past this drop events;
/// they re-read from the notifications table on reconnect.
const BROADCAST_CAPACITY: usize = 64;

/// Best-effort push channel to a live client.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(
        &self,
        account_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError>;
}

/// Fan-out hub keyed by account id.
pub struct WsNotifierHub {
    senders: RwLock<HashMap<String, broadcast::Sender<NotificationPayload>>>,
}

impl WsNotifierHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: RwLock::new(HashMap::new()),
        })
    }

    /// Subscribe to an account's notification stream. Each WS client calls
    /// this on connect.
    pub async fn subscribe(&self, account_id: &str) -> broadcast::Receiver<NotificationPayload> {
        let mut senders = self.senders.write().await;
        senders
            .entry(account_id.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe()
    }
}

#[async_trait]
impl NotificationChannel for WsNotifierHub {
    async fn notify(
        &self,
        account_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        let mut senders = self.senders.write().await;
        match senders.get(account_id) {
            Some(tx) if tx.receiver_count() > 0 => {
                tx.send(payload.clone())
                    .map_err(|e| NotifyError::Channel(e.to_string()))?;
                debug!(account_id, "Notification pushed to live subscribers");
                Ok(())
            }
            Some(_) => {
                // All subscribers gone; drop the stale sender.
                senders.remove(account_id);
                Err(NotifyError::NoSubscriber {
                    account_id: account_id.to_string(),
                })
            }
            None => Err(NotifyError::NoSubscriber {
                account_id: account_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::NotificationKind;

    fn payload(message: &str) -> NotificationPayload {
        NotificationPayload {
            message: message.into(),
            link: None,
            kind: NotificationKind::Job,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_push() {
        let hub = WsNotifierHub::new();
        let mut rx = hub.subscribe("acct-1").await;

        hub.notify("acct-1", &payload("job created")).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "job created");
    }

    #[tokio::test]
    async fn notify_without_subscriber_is_error() {
        let hub = WsNotifierHub::new();
        let err = hub.notify("acct-1", &payload("x")).await.unwrap_err();
        assert!(matches!(err, NotifyError::NoSubscriber { .. }));
    }

    #[tokio::test]
    async fn dropped_subscriber_detected() {
        let hub = WsNotifierHub::new();
        let rx = hub.subscribe("acct-1").await;
        drop(rx);

        let err = hub.notify("acct-1", &payload("x")).await.unwrap_err();
        assert!(matches!(err, NotifyError::NoSubscriber { .. }));
    }

    #[tokio::test]
    async fn accounts_are_isolated() {
        let hub = WsNotifierHub::new();
        let mut rx_a = hub.subscribe("acct-a").await;
        let _rx_b = hub.subscribe("acct-b").await;

        hub.notify("acct-a", &payload("only for a")).await.unwrap();

        let received = rx_a.recv().await.unwrap();
        assert_eq!(received.message, "only for a");
    }
}
