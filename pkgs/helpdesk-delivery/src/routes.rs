//! HTTP routes
//!
//! All JSON errors use the `{ "error": "<message>" }` body produced by
//! [`ApiError`]. Body rejections are reported only after the caller has been
//! authenticated.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use helpdesk_store::{Conversation, ConversationSummary, Message, NewMessage};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::channel::to_sse_event;
use crate::error::ApiError;
use crate::identity::{Caller, MaybeCaller};
use crate::service::{MessagePage, SupportService, UpdateConversationRequest};

type AppState = Arc<SupportService>;

#[derive(Debug, Default, Deserialize)]
pub struct ConversationFilter {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

pub fn router(service: Arc<SupportService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/conversations",
            get(list_conversations).post(start_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation).patch(update_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(list_messages).post(post_message),
        )
        .route("/api/conversations/{id}/read", post(mark_conversation_read))
        .route("/api/conversations/{id}/stream", get(stream_conversation))
        .route("/api/messages/{id}/read", post(mark_message_read))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health(State(service): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "channels": service.registry().total_subscribers(),
    }))
}

async fn list_conversations(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Query(filter): Query<ConversationFilter>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let conversations = service
        .list_conversations(caller, filter.status.as_deref())
        .await?;
    Ok(Json(conversations))
}

async fn start_conversation(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(service.start_conversation(caller).await?))
}

async fn get_conversation(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> Result<Json<ConversationSummary>, ApiError> {
    Ok(Json(service.get_conversation(caller, &id).await?))
}

async fn update_conversation(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
    body: Result<Json<UpdateConversationRequest>, JsonRejection>,
) -> Result<Json<Conversation>, ApiError> {
    let caller = authenticated(caller)?;
    let Json(request) = body.map_err(invalid_body)?;
    Ok(Json(
        service
            .update_conversation(Some(caller), &id, request)
            .await?,
    ))
}

async fn list_messages(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let page = service
        .list_messages(
            caller,
            &id,
            query.page.as_deref(),
            query.limit.as_deref(),
        )
        .await?;
    Ok(Json(page))
}

async fn post_message(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
    body: Result<Json<NewMessage>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = authenticated(caller)?;
    let Json(message) = body.map_err(invalid_body)?;
    let stored: Message = service.post_message(Some(caller), &id, message).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn mark_conversation_read(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let updated = service.mark_conversation_read(caller, &id).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn mark_message_read(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.mark_message_read(caller, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_conversation(
    State(service): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let channel = service.open_channel(caller, &id).await?;
    let events = channel
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse_event(event)));
    Ok(Sse::new(events))
}

fn authenticated(caller: Option<Caller>) -> Result<Caller, ApiError> {
    caller.ok_or(ApiError::Unauthorized)
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    ApiError::Validation(format!("Invalid request body: {}", rejection.body_text()))
}
