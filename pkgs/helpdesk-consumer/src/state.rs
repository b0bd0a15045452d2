//! Reconnection state machine
//!
//! [`StreamConsumer`] performs no I/O. Every input returns the [`Command`]s
//! the caller has to execute (open or close the stream, arm or cancel the
//! reconnect timer). Connections and timers are tagged with a generation and
//! a token so late events from an abandoned connection or a cancelled timer
//! are ignored.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected -> Connecting -> ...
//!                                          \-> Failed (attempts exhausted)
//! ```

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use helpdesk_store::{Message, StreamEvent};
use tracing::{debug, info, warn};

use crate::config::ConsumerConfig;

/// Shown once reconnection has been given up
pub const FAILED_MESSAGE: &str = "Connection lost. Please refresh the page.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected and not trying to (initial, disconnected or disabled)
    Idle,
    Connecting,
    Connected,
    /// Connection lost, a reconnect is scheduled
    Disconnected,
    /// Terminal until an explicit reconnect; carries the user-facing reason
    Failed(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionStatus::Failed(_))
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "idle"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a new stream; its events must be reported with `generation`
    Open { generation: u64 },
    /// Close the current stream, if any
    Close,
    /// Call [`StreamConsumer::on_timer`] with `token` after `delay`
    ScheduleReconnect { delay: Duration, token: u64 },
    /// Drop the pending reconnect timer, if any
    CancelReconnect,
}

pub struct StreamConsumer {
    config: ConsumerConfig,
    status: ConnectionStatus,
    enabled: bool,
    attempts: u32,
    next_delay: Duration,
    generation: u64,
    stream_open: bool,
    timer_token: u64,
    timer_pending: bool,
    messages: Vec<Message>,
    message_ids: HashSet<String>,
    revision: u64,
    last_activity: Option<Instant>,
    last_heartbeat: Option<DateTime<Utc>>,
    last_server_error: Option<String>,
}

impl StreamConsumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            next_delay: config.base_delay,
            config,
            status: ConnectionStatus::Idle,
            enabled: true,
            attempts: 0,
            generation: 0,
            stream_open: false,
            timer_token: 0,
            timer_pending: false,
            messages: Vec::new(),
            message_ids: HashSet::new(),
            revision: 0,
            last_activity: None,
            last_heartbeat: None,
            last_server_error: None,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reconnects scheduled since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Local message list, ordered by `created_at`
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Bumped whenever the message list changes
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Server time carried by the last heartbeat
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
    }

    /// Message of the last `error` event sent by the server
    pub fn last_server_error(&self) -> Option<&str> {
        self.last_server_error.as_deref()
    }

    /// Open the stream unless already connected, connecting or disabled
    pub fn connect(&mut self, now: Instant) -> Vec<Command> {
        if !self.enabled
            || matches!(
                self.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            )
        {
            return Vec::new();
        }

        let mut commands = Vec::new();
        self.cancel_timer(&mut commands);
        if self.stream_open {
            commands.push(Command::Close);
        }

        self.generation += 1;
        self.stream_open = true;
        self.last_activity = Some(now);
        self.status = ConnectionStatus::Connecting;
        debug!("Opening stream (generation {})", self.generation);
        commands.push(Command::Open {
            generation: self.generation,
        });
        commands
    }

    /// Close the stream and cancel any pending reconnect
    pub fn disconnect(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        self.cancel_timer(&mut commands);
        if self.stream_open {
            commands.push(Command::Close);
            self.stream_open = false;
        }
        // Events still in flight from the closed stream become stale
        self.generation += 1;
        self.status = ConnectionStatus::Idle;
        commands
    }

    /// Explicit reset: disconnect, clear the backoff, connect again shortly
    pub fn reconnect(&mut self) -> Vec<Command> {
        let mut commands = self.disconnect();
        self.attempts = 0;
        self.next_delay = self.config.base_delay;
        if self.enabled {
            commands.push(self.arm_timer(self.config.reconnect_delay));
        }
        commands
    }

    /// Enable or disable the consumer; disabling also disconnects
    pub fn set_enabled(&mut self, enabled: bool, now: Instant) -> Vec<Command> {
        if self.enabled == enabled {
            return Vec::new();
        }
        self.enabled = enabled;
        if enabled {
            self.connect(now)
        } else {
            self.disconnect()
        }
    }

    /// Foreground visibility changed
    ///
    /// Regaining visibility while enabled but not connected triggers an
    /// explicit reconnect.
    pub fn on_visibility_change(&mut self, visible: bool) -> Vec<Command> {
        if !visible
            || !self.enabled
            || matches!(
                self.status,
                ConnectionStatus::Connected | ConnectionStatus::Connecting
            )
        {
            return Vec::new();
        }
        info!("Visible again while {}, reconnecting", self.status);
        self.reconnect()
    }

    /// Event received on the stream opened as `generation`
    pub fn on_event(&mut self, generation: u64, event: StreamEvent, now: Instant) {
        if !self.is_current(generation) {
            debug!("Ignoring {} event from stale stream", event.name());
            return;
        }
        self.last_activity = Some(now);

        match event {
            StreamEvent::Connected(payload) => {
                info!("Connected to conversation {}", payload.conversation_id);
                self.status = ConnectionStatus::Connected;
                self.attempts = 0;
                self.next_delay = self.config.base_delay;
                self.last_server_error = None;
            }
            StreamEvent::InitialMessages(payload) => {
                self.message_ids = payload.messages.iter().map(|m| m.id.clone()).collect();
                self.messages = payload.messages;
                self.revision += 1;
            }
            StreamEvent::NewMessage(payload) => {
                if !self.message_ids.insert(payload.message.id.clone()) {
                    debug!("Duplicate message {} ignored", payload.message.id);
                    return;
                }
                self.messages.push(payload.message);
                // Stable, so equal timestamps keep arrival order
                self.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                self.revision += 1;
            }
            StreamEvent::Heartbeat(payload) => {
                self.last_heartbeat = Some(payload.timestamp);
            }
            StreamEvent::Error(payload) => {
                warn!("Server reported: {}", payload.message);
                self.last_server_error = Some(payload.message);
            }
        }
    }

    /// The stream opened as `generation` failed or ended
    pub fn on_transport_error(&mut self, generation: u64, reason: &str) -> Vec<Command> {
        if !self.is_current(generation) {
            return Vec::new();
        }
        warn!("Stream lost: {}", reason);
        self.stream_open = false;
        self.status = ConnectionStatus::Disconnected;

        let mut commands = vec![Command::Close];
        if self.attempts < self.config.max_attempts {
            let delay = self.next_delay;
            self.attempts += 1;
            self.next_delay = (self.next_delay * 2).min(self.config.max_delay);
            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay, self.attempts, self.config.max_attempts
            );
            commands.push(self.arm_timer(delay));
        } else {
            warn!(
                "Giving up after {} reconnect attempts",
                self.config.max_attempts
            );
            self.status = ConnectionStatus::Failed(FAILED_MESSAGE.to_string());
        }
        commands
    }

    /// The server refused the stream opened as `generation`
    ///
    /// Refusals are not retried.
    pub fn on_rejected(&mut self, generation: u64, reason: &str) -> Vec<Command> {
        if !self.is_current(generation) {
            return Vec::new();
        }
        warn!("Stream refused: {}", reason);
        self.stream_open = false;
        self.status = ConnectionStatus::Failed(reason.to_string());
        vec![Command::Close]
    }

    /// Reconnect timer `token` fired
    pub fn on_timer(&mut self, token: u64, now: Instant) -> Vec<Command> {
        if !self.timer_pending || token != self.timer_token {
            debug!("Ignoring stale timer {}", token);
            return Vec::new();
        }
        self.timer_pending = false;
        if matches!(
            self.status,
            ConnectionStatus::Disconnected | ConnectionStatus::Idle
        ) {
            self.connect(now)
        } else {
            Vec::new()
        }
    }

    /// Treat an open stream that has been silent too long as lost
    pub fn check_liveness(&mut self, now: Instant) -> Vec<Command> {
        if !self.stream_open {
            return Vec::new();
        }
        let Some(last_activity) = self.last_activity else {
            return Vec::new();
        };
        if now.saturating_duration_since(last_activity) <= self.config.heartbeat_timeout {
            return Vec::new();
        }
        let generation = self.generation;
        self.on_transport_error(generation, "no heartbeat within timeout")
    }

    fn is_current(&self, generation: u64) -> bool {
        self.stream_open && generation == self.generation
    }

    fn arm_timer(&mut self, delay: Duration) -> Command {
        self.timer_token += 1;
        self.timer_pending = true;
        Command::ScheduleReconnect {
            delay,
            token: self.timer_token,
        }
    }

    fn cancel_timer(&mut self, commands: &mut Vec<Command>) {
        if self.timer_pending {
            self.timer_pending = false;
            commands.push(Command::CancelReconnect);
        }
    }
}
