//! Subscription registry
//!
//! Tracks which delivery channels are open for which conversation so the
//! append path can fan new messages out to them.
//!
//! # Data Structures
//!
//! - **conversations**: HashMap<conversation id, Vec<Subscriber>>
//!
//! Channels register explicitly on connect and are removed when their
//! [`Subscription`] is dropped or when [`SubscriptionRegistry::close_all`]
//! runs at shutdown. After `close_all` the registry stays closed: late
//! subscribers get a subscription that is already ended.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use helpdesk_store::visibility::can_see_message;
use helpdesk_store::{Message, Role};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

struct Subscriber {
    id: u64,
    role: Role,
    sender: mpsc::UnboundedSender<Message>,
}

/// Registry of open delivery channels, keyed by conversation ID
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    closed: AtomicBool,
    conversations: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for `conversation_id`
    ///
    /// The returned subscription receives every message published for the
    /// conversation that `role` is allowed to see, in publish order.
    pub fn subscribe(self: &Arc<Self>, conversation_id: &str, role: Role) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut conversations = self.conversations.lock();
        // Checked under the lock so a concurrent close_all cannot be missed
        if self.closed.load(Ordering::Acquire) {
            debug!(
                "Registry closed, subscriber {} for conversation {} ends immediately",
                id, conversation_id
            );
            drop(sender);
        } else {
            let subscribers = conversations
                .entry(conversation_id.to_string())
                .or_default();
            subscribers.push(Subscriber { id, role, sender });
            debug!(
                "Subscriber {} joined conversation {} ({} open)",
                id,
                conversation_id,
                subscribers.len()
            );
        }
        drop(conversations);

        Subscription {
            id,
            conversation_id: conversation_id.to_string(),
            receiver,
            registry: Arc::clone(self),
        }
    }

    /// Remove one channel; removing an unknown subscriber is a no-op
    pub fn unsubscribe(&self, conversation_id: &str, subscriber_id: u64) {
        let mut conversations = self.conversations.lock();
        if let Some(subscribers) = conversations.get_mut(conversation_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            debug!(
                "Subscriber {} left conversation {} ({} open)",
                subscriber_id,
                conversation_id,
                subscribers.len()
            );
            if subscribers.is_empty() {
                conversations.remove(conversation_id);
            }
        }
    }

    /// Push a newly appended message to every channel allowed to see it
    ///
    /// Never blocks: each channel has an unbounded queue. Returns the number
    /// of channels the message was queued for.
    pub fn publish(&self, message: &Message) -> usize {
        let Some(conversation_id) = message.conversation_id.as_deref() else {
            return 0;
        };

        let mut conversations = self.conversations.lock();
        let Some(subscribers) = conversations.get_mut(conversation_id) else {
            return 0;
        };

        // Channels whose receiving side is gone are pruned here
        subscribers.retain(|s| !s.sender.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if can_see_message(message, subscriber.role)
                && subscriber.sender.send(message.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        debug!(
            "Published message {} to {} channel(s) of conversation {}",
            message.id, delivered, conversation_id
        );
        delivered
    }

    /// Number of open channels for one conversation
    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .lock()
            .get(conversation_id)
            .map_or(0, Vec::len)
    }

    /// Number of open channels across all conversations
    pub fn total_subscribers(&self) -> usize {
        self.conversations.lock().values().map(Vec::len).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop every registration, ending all open channels
    ///
    /// Channels that subscribe afterwards end right away.
    pub fn close_all(&self) {
        let mut conversations = self.conversations.lock();
        self.closed.store(true, Ordering::Release);
        let closed: usize = conversations.values().map(Vec::len).sum();
        conversations.clear();
        info!("Closed {} delivery channel(s)", closed);
    }
}

/// One channel's registration; deregisters itself when dropped
pub struct Subscription {
    id: u64,
    conversation_id: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    registry: Arc<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Next published message; `None` once the registry closed this channel
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.conversation_id, self.id);
    }
}
