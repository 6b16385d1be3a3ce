//! Channel-scoped message sequencing and realtime fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use collab_shared::{ChannelEvent, Message, MessageType, NewMessage};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::channels::ChannelRegistry;
use crate::clock::Clock;
use crate::error::AppError;
use crate::locks::KeyedLocks;
use crate::store::Store;

const MAX_MESSAGE_LEN: usize = 4000;
const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 200;

/// Live feed of one channel.
pub struct ChannelSubscription {
    channel_id: Uuid,
    workspace_id: Uuid,
    rx: broadcast::Receiver<ChannelEvent>,
}

impl ChannelSubscription {
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn workspace_id(&self) -> Uuid {
        self.workspace_id
    }

    /// Next event, or `None` once the bus drops the channel.
    ///
    /// A subscriber that fell behind gets a single `Lagged` event and then
    /// continues with the oldest event still buffered.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(channel_id = %self.channel_id, missed, "subscriber lagged");
                Some(ChannelEvent::Lagged { missed })
            }
            Err(RecvError::Closed) => None,
        }
    }
}

pub struct MessageBus {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    channels: ChannelRegistry,
    locks: KeyedLocks<Uuid>,
    senders: Mutex<HashMap<Uuid, broadcast::Sender<ChannelEvent>>>,
    capacity: usize,
}

impl MessageBus {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        channels: ChannelRegistry,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            clock,
            channels,
            locks: KeyedLocks::new(),
            senders: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a message with the channel's next sequence number, then fan it out.
    pub async fn send_message(
        &self,
        actor_id: Uuid,
        channel_id: Uuid,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("Message content is required".to_string()));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(AppError::Validation(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        self.channels.get_visible(actor_id, channel_id).await?;

        let _guard = self.locks.lock(&channel_id).await;

        let message = self
            .store
            .append_message(NewMessage {
                channel_id,
                sender_id: actor_id,
                content: content.to_string(),
                message_type,
                timestamp: self.clock.now(),
            })
            .await?;

        // Publishing under the channel lock keeps delivery in sequence order.
        let delivered = self.publish(channel_id, ChannelEvent::Message(message.clone()));
        tracing::debug!(
            %channel_id,
            sequence = message.sequence,
            delivered,
            "message sent"
        );

        Ok(message)
    }

    /// Messages with `sequence > after`, oldest first.
    pub async fn history(
        &self,
        actor_id: Uuid,
        channel_id: Uuid,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, AppError> {
        self.channels.get_visible(actor_id, channel_id).await?;

        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        self.store
            .list_messages(channel_id, after.unwrap_or(0).max(0), limit as usize)
            .await
    }

    pub async fn subscribe(
        &self,
        actor_id: Uuid,
        channel_id: Uuid,
    ) -> Result<ChannelSubscription, AppError> {
        let (channel, _) = self.channels.get_visible(actor_id, channel_id).await?;

        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|id, tx| *id == channel_id || tx.receiver_count() > 0);
        let rx = senders
            .entry(channel_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        tracing::debug!(%channel_id, %actor_id, "channel subscribed");
        Ok(ChannelSubscription {
            channel_id,
            workspace_id: channel.workspace_id,
            rx,
        })
    }

    /// Ephemeral typing indicator; never persisted.
    pub async fn typing(
        &self,
        actor_id: Uuid,
        channel_id: Uuid,
        is_typing: bool,
    ) -> Result<(), AppError> {
        self.channels.get_visible(actor_id, channel_id).await?;
        self.publish(
            channel_id,
            ChannelEvent::Typing {
                channel_id,
                user_id: actor_id,
                is_typing,
            },
        );
        Ok(())
    }

    /// Best-effort fan-out. Returns how many subscribers were handed the event.
    fn publish(&self, channel_id: Uuid, event: ChannelEvent) -> usize {
        let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders
            .get(&channel_id)
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::membership::MembershipRegistry;
    use crate::store::MemoryStore;
    use collab_shared::ChannelType;

    struct Fixture {
        bus: MessageBus,
        channels: ChannelRegistry,
        owner: Uuid,
        channel_id: Uuid,
    }

    async fn fixture(capacity: usize) -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let members = MembershipRegistry::new(store.clone(), clock.clone(), &Config::default());
        let owner = Uuid::new_v4();
        let ws = members.create_workspace(owner, "team", None).await.unwrap();
        let channels = ChannelRegistry::new(store.clone(), clock.clone(), members);
        let channel = channels
            .create_channel(owner, ws.id, "c1", None, ChannelType::Public)
            .await
            .unwrap();
        let bus = MessageBus::new(store, clock, channels.clone(), capacity);

        Fixture {
            bus,
            channels,
            owner,
            channel_id: channel.id,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_messages_in_sequence() {
        let f = fixture(16).await;
        let mut sub = f.bus.subscribe(f.owner, f.channel_id).await.unwrap();

        for text in ["one", "two", "three"] {
            f.bus
                .send_message(f.owner, f.channel_id, text, MessageType::Text)
                .await
                .unwrap();
        }

        for expected in 1..=3 {
            match sub.next().await {
                Some(ChannelEvent::Message(m)) => assert_eq!(m.sequence, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_and_can_resync() {
        let f = fixture(2).await;
        let mut sub = f.bus.subscribe(f.owner, f.channel_id).await.unwrap();

        for i in 0..5 {
            f.bus
                .send_message(f.owner, f.channel_id, &format!("m{i}"), MessageType::Text)
                .await
                .unwrap();
        }

        assert_eq!(sub.next().await, Some(ChannelEvent::Lagged { missed: 3 }));

        let replay = f
            .bus
            .history(f.owner, f.channel_id, Some(0), None)
            .await
            .unwrap();
        assert_eq!(replay.len(), 5);
        assert_eq!(replay.last().map(|m| m.sequence), Some(5));
    }

    #[tokio::test]
    async fn history_respects_cursor_and_limit() {
        let f = fixture(16).await;
        for i in 0..10 {
            f.bus
                .send_message(f.owner, f.channel_id, &format!("m{i}"), MessageType::Text)
                .await
                .unwrap();
        }

        let page = f
            .bus
            .history(f.owner, f.channel_id, Some(4), Some(3))
            .await
            .unwrap();
        let seqs: Vec<_> = page.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, [5, 6, 7]);
    }

    #[tokio::test]
    async fn typing_is_fanned_out_but_not_stored() {
        let f = fixture(16).await;
        let mut sub = f.bus.subscribe(f.owner, f.channel_id).await.unwrap();

        f.bus.typing(f.owner, f.channel_id, true).await.unwrap();

        assert_eq!(
            sub.next().await,
            Some(ChannelEvent::Typing {
                channel_id: f.channel_id,
                user_id: f.owner,
                is_typing: true,
            })
        );
        assert!(f
            .bus
            .history(f.owner, f.channel_id, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn empty_and_foreign_sends_are_rejected() {
        let f = fixture(16).await;

        let err = f
            .bus
            .send_message(f.owner, f.channel_id, "   ", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = f
            .bus
            .send_message(Uuid::new_v4(), f.channel_id, "hi", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let err = f
            .bus
            .send_message(f.owner, Uuid::new_v4(), "hi", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Nothing was recorded by the failed attempts.
        let (channel, _) = f.channels.get_visible(f.owner, f.channel_id).await.unwrap();
        assert!(f
            .bus
            .history(f.owner, channel.id, None, None)
            .await
            .unwrap()
            .is_empty());
    }
}
