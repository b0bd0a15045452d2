//! Helpdesk Consumer - client side of the conversation delivery channel
//!
//! # Architecture
//!
//! - **StreamConsumer**: I/O-free reconnection state machine (backoff, dedup,
//!   liveness)
//! - **driver**: Task that executes the state machine's commands and publishes
//!   status and messages through `watch` channels
//! - **EventTransport / Timer**: Seams for the stream connection and reconnect
//!   delays
//! - **HttpTransport**: `text/event-stream` transport built on reqwest
//!
//! # Reconnection
//!
//! A lost stream is retried after 1, 2, 4, 8 and 16 seconds (capped at 30).
//! Once the attempts are used up the consumer stops in
//! [`ConnectionStatus::Failed`] until an explicit reconnect. A successful
//! `connected` event resets the backoff.

pub mod config;
pub mod driver;
pub mod error;
pub mod http;
pub mod sse;
pub mod state;
pub mod transport;

pub use config::ConsumerConfig;
pub use driver::{spawn_consumer, ConsumerHandle};
pub use error::ConsumerError;
pub use http::HttpTransport;
pub use sse::{EventStreamDecoder, Frame};
pub use state::{Command, ConnectionStatus, StreamConsumer, FAILED_MESSAGE};
pub use transport::{EventStream, EventTransport, Timer, TokioTimer};
