//! Event-stream transport over HTTP

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use helpdesk_store::{Role, StreamEvent};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ConsumerError;
use crate::sse::EventStreamDecoder;
use crate::transport::{EventStream, EventTransport};

const USER_ID_HEADER: &str = "x-user-id";
const USER_ROLE_HEADER: &str = "x-user-role";

/// Connects to `GET {base}/api/conversations/{id}/stream` as one caller
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    user_id: String,
    role: Role,
}

impl HttpTransport {
    pub fn new(base_url: &str, conversation_id: &str, user_id: &str, role: Role) -> Self {
        Self::with_client(Client::new(), base_url, conversation_id, user_id, role)
    }

    pub fn with_client(
        client: Client,
        base_url: &str,
        conversation_id: &str,
        user_id: &str,
        role: Role,
    ) -> Self {
        Self {
            client,
            url: format!(
                "{}/api/conversations/{}/stream",
                base_url.trim_end_matches('/'),
                conversation_id
            ),
            user_id: user_id.to_string(),
            role,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn open(&self) -> Result<EventStream, ConsumerError> {
        debug!("Opening event stream {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(USER_ID_HEADER, &self.user_id)
            .header(USER_ROLE_HEADER, self.role.as_str())
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ConsumerError::Transport(format!("server returned {}", status)));
        }
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("error")?.as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(ConsumerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let mut decoder = EventStreamDecoder::new();
        let events = response
            .bytes_stream()
            .map_err(ConsumerError::from)
            .map_ok(move |chunk: Bytes| stream::iter(decode(&mut decoder, &chunk)))
            .try_flatten();
        Ok(events.boxed())
    }
}

fn decode(
    decoder: &mut EventStreamDecoder,
    chunk: &[u8],
) -> Vec<Result<StreamEvent, ConsumerError>> {
    decoder
        .push(chunk)
        .into_iter()
        .filter_map(|frame| match frame.into_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(e) => {
                warn!("{}", e);
                None
            }
        })
        .collect()
}
