//! Delivery channel - the per-connection push protocol
//!
//! A channel moves through `Connecting → Authorizing → Streaming → Closed`:
//!
//! 1. No caller identity: fail with `Unauthorized`
//! 2. Malformed conversation ID: fail with `InvalidIdentifier`, before any lookup
//! 3. Unknown conversation: fail with `NotFound`
//! 4. Client caller that does not own the conversation: fail with `Forbidden`
//! 5. Otherwise register with the [`SubscriptionRegistry`], replay the
//!    visible history window and stream `new-message` / `heartbeat` events
//!    until the caller disconnects or the registry is closed.
//!
//! Registration happens before the history is read, so no message appended
//! during the handshake can be missed; live copies of replayed messages are
//! skipped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use helpdesk_store::events::{InitialMessagesPayload, NewMessagePayload, ERROR};
use helpdesk_store::visibility::{can_access_conversation, can_see_message, visible_messages};
use helpdesk_store::{StreamEvent, SupportStore};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DeliveryConfig;
use crate::error::ApiError;
use crate::identity::Caller;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::service::parse_id;

/// Connection phase of a delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Connecting,
    Authorizing,
    Streaming,
    Closed,
}

/// One open, authorized delivery channel
pub struct DeliveryChannel {
    conversation_id: String,
    caller: Caller,
    phase: ChannelPhase,
    pending: VecDeque<StreamEvent>,
    replayed: HashSet<String>,
    subscription: Subscription,
    heartbeat: Interval,
}

impl DeliveryChannel {
    /// Run the handshake for `raw_conversation_id`
    pub async fn open(
        store: &SupportStore,
        registry: &Arc<SubscriptionRegistry>,
        config: &DeliveryConfig,
        caller: Option<Caller>,
        raw_conversation_id: &str,
    ) -> Result<Self, ApiError> {
        debug!(
            "Delivery channel {:?} for {}",
            ChannelPhase::Connecting,
            raw_conversation_id
        );
        let result = Self::authorize(store, registry, config, caller, raw_conversation_id).await;
        if let Err(e) = &result {
            info!(
                "Delivery channel for {} {:?}: {}",
                raw_conversation_id,
                ChannelPhase::Closed,
                e
            );
        }
        result
    }

    async fn authorize(
        store: &SupportStore,
        registry: &Arc<SubscriptionRegistry>,
        config: &DeliveryConfig,
        caller: Option<Caller>,
        raw_conversation_id: &str,
    ) -> Result<Self, ApiError> {
        let caller = caller.ok_or(ApiError::Unauthorized)?;
        debug!(
            "Delivery channel {:?} {} ({})",
            ChannelPhase::Authorizing,
            caller.id,
            caller.role
        );

        let conversation_id = parse_id(raw_conversation_id, "conversation")?;
        let conversation = store.get_conversation(&conversation_id).await?;
        if !can_access_conversation(&conversation, &caller.id, caller.role) {
            return Err(ApiError::Forbidden);
        }

        let subscription = registry.subscribe(&conversation.id, caller.role);

        let history = store
            .list_recent_messages(&conversation.id, config.history_window, caller.is_staff())
            .await?;
        let history = visible_messages(history, caller.role);
        let replayed = history.iter().map(|m| m.id.clone()).collect();

        let mut pending = VecDeque::with_capacity(2);
        pending.push_back(StreamEvent::connected(conversation.id.clone()));
        pending.push_back(StreamEvent::InitialMessages(InitialMessagesPayload {
            messages: history,
        }));

        let period = config.heartbeat_interval;
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Delivery channel {:?} conversation {} for {} ({})",
            ChannelPhase::Streaming,
            conversation.id,
            caller.id,
            caller.role
        );

        Ok(Self {
            conversation_id: conversation.id,
            caller,
            phase: ChannelPhase::Streaming,
            pending,
            replayed,
            subscription,
            heartbeat,
        })
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Next event for this connection; `None` once the channel is closed
    ///
    /// Suspends until a message is published for the conversation or the
    /// heartbeat timer fires. Messages arrive in publish order; a due
    /// heartbeat is emitted ahead of any queued backlog.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.phase == ChannelPhase::Closed {
            return None;
        }

        loop {
            tokio::select! {
                biased;
                // A due heartbeat goes out even while messages are queued
                _ = self.heartbeat.tick() => {
                    return Some(StreamEvent::heartbeat());
                }
                message = self.subscription.recv() => {
                    let Some(message) = message else {
                        self.phase = ChannelPhase::Closed;
                        return None;
                    };
                    if self.replayed.remove(&message.id) {
                        continue;
                    }
                    if !can_see_message(&message, self.caller.role) {
                        continue;
                    }
                    return Some(StreamEvent::NewMessage(NewMessagePayload { message }));
                }
            }
        }
    }

    /// Turn the channel into a stream of events
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        stream::unfold(self, |mut channel| async move {
            let event = channel.next_event().await?;
            Some((event, channel))
        })
    }
}

impl Drop for DeliveryChannel {
    fn drop(&mut self) {
        info!(
            "Delivery channel {:?} conversation {} for {}",
            ChannelPhase::Closed,
            self.conversation_id,
            self.caller.id
        );
    }
}

/// Frame an event for the event-stream response
///
/// A payload that fails to serialize is replaced by a generic `error` event
/// instead of ending the stream.
pub fn to_sse_event(event: StreamEvent) -> Event {
    match event.data_json() {
        Ok(data) => Event::default().event(event.name()).data(data),
        Err(e) => {
            warn!("Failed to format {} event: {}", event.name(), e);
            Event::default()
                .event(ERROR)
                .data(r#"{"message":"Failed to format event"}"#)
        }
    }
}
