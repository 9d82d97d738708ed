//! Broadcast Hub (C6): fans typed events out to connected display
//! clients, generalizing the teacher's per-topic `broadcast::Sender`
//! map (`AppState::topic_channels`) from "topic -> subscribers" to
//! "display role -> registered clients," plus delivery-with-ack for the
//! handful of event kinds whose loss is visible to an operator.

use crate::models::{DisplayRole, ServerEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Delays between successive retries of an ack-required event, per §4.6.
const RETRY_SCHEDULE_SECS: [u64; 3] = [1, 3, 9];
const ACK_SWEEP_PERIOD: Duration = Duration::from_millis(500);

struct ClientHandle {
    #[allow(dead_code)]
    role: DisplayRole,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

struct PendingAck {
    event: ServerEvent,
    client_id: Uuid,
    retry_count: u32,
    next_retry_at: Instant,
}

#[derive(Default)]
pub struct BroadcastHub {
    displays: RwLock<HashMap<Uuid, ClientHandle>>,
    admin_clients: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>,
    last_match_update: RwLock<Option<serde_json::Value>>,
    pending_acks: RwLock<HashMap<(u64, Uuid), PendingAck>>,
    next_message_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a display client of the given role. Warm-starts it with
    /// the last known `matches:update` payload, queued on its own channel
    /// before it is added to the fan-out map so ordering is preserved.
    pub async fn register(&self, role: DisplayRole) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(payload) = self.last_match_update.read().await.clone() {
            let _ = tx.send(ServerEvent::MatchesUpdate(payload));
        }

        self.displays.write().await.insert(id, ClientHandle { role, sender: tx });
        (id, rx)
    }

    pub async fn unregister(&self, id: Uuid) {
        self.displays.write().await.remove(&id);
        let mut pending = self.pending_acks.write().await;
        pending.retain(|(_, client_id), _| *client_id != id);
    }

    pub async fn register_admin(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.admin_clients.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister_admin(&self, id: Uuid) {
        self.admin_clients.write().await.remove(&id);
    }

    /// Emits one event to every registered client. Ack-required events
    /// are tracked per-client for retry; everything else is
    /// fire-and-forget, per §4.6.
    pub async fn broadcast(&self, event: ServerEvent) {
        if let ServerEvent::MatchesUpdate(ref payload) = event {
            *self.last_match_update.write().await = Some(payload.clone());
        }

        if event.requires_ack() {
            self.broadcast_with_ack(event).await;
        } else {
            self.fanout(&event).await;
        }
    }

    async fn fanout(&self, event: &ServerEvent) {
        let displays = self.displays.read().await;
        for client in displays.values() {
            let _ = client.sender.send(event.clone());
        }
        drop(displays);

        let admins = self.admin_clients.read().await;
        for tx in admins.values() {
            let _ = tx.send(event.clone());
        }
    }

    async fn broadcast_with_ack(&self, event: ServerEvent) {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let displays = self.displays.read().await;
        let mut pending = self.pending_acks.write().await;

        for (client_id, client) in displays.iter() {
            let _ = client.sender.send(event.clone());
            pending.insert(
                (message_id, *client_id),
                PendingAck {
                    event: event.clone(),
                    client_id: *client_id,
                    retry_count: 0,
                    next_retry_at: now + Duration::from_secs(RETRY_SCHEDULE_SECS[0]),
                },
            );
        }
    }

    /// Records an ack from a client, cancelling further retries for it.
    pub async fn ack(&self, message_id: u64, client_id: Uuid) {
        self.pending_acks.write().await.remove(&(message_id, client_id));
    }

    async fn sweep_acks(&self) {
        let now = Instant::now();
        let displays = self.displays.read().await;
        let mut pending = self.pending_acks.write().await;
        let mut expired = Vec::new();

        for (key, ack) in pending.iter_mut() {
            if now < ack.next_retry_at {
                continue;
            }
            if ack.retry_count as usize >= RETRY_SCHEDULE_SECS.len() {
                expired.push(*key);
                continue;
            }

            if let Some(client) = displays.get(&ack.client_id) {
                let _ = client.sender.send(ack.event.clone());
            }
            ack.retry_count += 1;
            ack.next_retry_at = match RETRY_SCHEDULE_SECS.get(ack.retry_count as usize) {
                Some(delay) => now + Duration::from_secs(*delay),
                None => now,
            };
        }

        for key in expired {
            pending.remove(&key);
            warn!("ack-required event exhausted its retry schedule without acknowledgement");
        }
    }

    /// Spawns the background sweeper that drives ack retries, the same
    /// periodic-`tokio::time::interval` shape as the rate controller's ticker.
    pub fn spawn_ack_sweeper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ACK_SWEEP_PERIOD);
            loop {
                interval.tick().await;
                self.sweep_acks().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registration_replays_last_match_update() {
        let hub = BroadcastHub::new();
        hub.broadcast(ServerEvent::MatchesUpdate(json!({"a": 1}))).await;

        let (_, mut rx) = hub.register(DisplayRole::Match).await;
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerEvent::MatchesUpdate(v) if v == json!({"a": 1})));
    }

    #[tokio::test]
    async fn fresh_registration_without_history_gets_nothing_immediately() {
        let hub = BroadcastHub::new();
        let (_, mut rx) = hub.register(DisplayRole::Bracket).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ack_required_event_is_tracked_until_acked() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.register(DisplayRole::Match).await;
        hub.broadcast(ServerEvent::TimerDqWarning).await;
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ServerEvent::TimerDqWarning));

        assert_eq!(hub.pending_acks.read().await.len(), 1);
        hub.ack(0, id).await;
        assert!(hub.pending_acks.read().await.is_empty());
    }

    #[tokio::test]
    async fn fire_and_forget_event_is_not_tracked() {
        let hub = BroadcastHub::new();
        let (_, mut rx) = hub.register(DisplayRole::Match).await;
        hub.broadcast(ServerEvent::TickerMessage { text: "hi".into(), duration_s: 5 }).await;
        let _ = rx.recv().await.unwrap();
        assert!(hub.pending_acks.read().await.is_empty());
    }
}
