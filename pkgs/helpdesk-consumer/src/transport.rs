//! Seams between the state machine driver and the outside world

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use helpdesk_store::StreamEvent;

use crate::error::ConsumerError;

/// Decoded events of one open stream; ends or yields an error when the
/// connection is lost
pub type EventStream = BoxStream<'static, Result<StreamEvent, ConsumerError>>;

/// Opens delivery channel streams
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self) -> Result<EventStream, ConsumerError>;
}

/// Sleeps for reconnect delays
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// [`Timer`] backed by the tokio clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
