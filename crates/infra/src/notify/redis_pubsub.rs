//! Redis pub/sub-backed notify bus (optional).
//!
//! Note: Redis pub/sub is not durable (identifiers published while a
//! subscriber is offline are dropped). That is exactly the notify-bus
//! contract; the poller re-derives anything lost from the task store.

use std::thread;

use redis::Commands;
use tokio::sync::mpsc;

use torque_bus::{BusError, NotifyBus, Subscription};
use torque_core::TaskId;

/// Redis pub/sub bus carrying task identifiers as strings.
#[derive(Debug, Clone)]
pub struct RedisNotifyBus {
    client: redis::Client,
    channel: String,
}

impl RedisNotifyBus {
    pub fn new(
        redis_url: impl AsRef<str>,
        channel: impl Into<String>,
    ) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

impl NotifyBus for RedisNotifyBus {
    fn publish(&self, id: TaskId) -> Result<(), BusError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let _: i64 = conn
            .publish(&self.channel, id.to_string())
            .map_err(|e| BusError::Transport(e.to_string()))?;

        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Background thread that receives pub/sub messages and forwards them.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(_) => return,
            };

            let mut pubsub = conn.as_pubsub();
            if pubsub.subscribe(channel).is_err() {
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(_) => return,
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let id: TaskId = match payload.parse() {
                    Ok(id) => id,
                    Err(_) => continue,
                };

                if tx.send(id).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}
