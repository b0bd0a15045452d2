//! Helpdesk Delivery - live push and HTTP surface for support conversations
//!
//! # Architecture
//!
//! - **SubscriptionRegistry**: Open delivery channels keyed by conversation ID
//! - **channel**: Per-connection handshake and event stream (connected, replay,
//!   live messages, heartbeats)
//! - **SupportService**: Role-gated operations shared by REST and live paths
//! - **routes**: Axum router exposing the conversation API and the stream endpoint
//!
//! Appending a message never waits on subscribers: each open channel owns an
//! unbounded queue that the append path pushes into after the store commits.

pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod registry;
pub mod routes;
pub mod server;
pub mod service;

pub use channel::{ChannelPhase, DeliveryChannel};
pub use config::DeliveryConfig;
pub use error::ApiError;
pub use identity::{Caller, MaybeCaller};
pub use registry::{Subscription, SubscriptionRegistry};
pub use routes::router;
pub use server::serve;
pub use service::{MessagePage, Pagination, SupportService};
