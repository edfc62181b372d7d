//! HTTP surface: REST endpoints, the WebSocket upgrade, and server startup.
//!
//! Caller identity comes from the upstream authentication layer in the
//! `x-user-id` header. Every route except `/api/health` and `/ws` requires it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use linkroom_proto::event::{DeliveredMessage, SendMessage, UserProfile};
use linkroom_proto::message::{Envelope, MediaRecord, MediaRef, MessageId, Timestamp, UserId};
use linkroom_proto::room::RoomKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::directory::profile_or_placeholder;
use crate::error::RelayError;
use crate::rooms::GroupRoom;
use crate::session::handle_socket;
use crate::state::RelayState;
use crate::validate::validate;

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

type ApiResult<T> = Result<T, RelayError>;

/// The caller, as identified by [`USER_HEADER`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = RelayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(UserId::new(value)))
            .ok_or(RelayError::Unauthenticated)
    }
}

/// [`Json`] body whose rejections use the relay's error body.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = RelayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection| RelayError::InvalidArgument(rejection.body_text()))
    }
}

/// [`Query`] string whose rejections use the relay's error body.
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = RelayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection| RelayError::InvalidArgument(rejection.body_text()))
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    room_id: RoomKey,
    page: usize,
    page_size: usize,
    messages: Vec<DeliveredMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SentResponse {
    message: Envelope,
    delivered: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DeleteSelectedRequest {
    message_ids: Vec<MessageId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateGroupRequest {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AddMembersRequest {
    member_ids: Vec<UserId>,
}

#[derive(Debug, Serialize)]
struct AddMembersResponse {
    added: Vec<UserId>,
    members: Vec<UserId>,
}

/// Builds the relay's router over `state`.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .route(
            "/api/rooms/{room_id}/messages",
            get(list_messages)
                .post(send_message)
                .delete(delete_all_messages),
        )
        .route(
            "/api/rooms/{room_id}/messages/delete-selected",
            post(delete_selected_messages),
        )
        .route("/api/groups", get(my_groups).post(create_group))
        .route("/api/groups/{group_id}", get(get_group))
        .route(
            "/api/groups/{group_id}/members",
            get(list_members).post(add_members),
        )
        .route(
            "/api/groups/{group_id}/members/{member_id}",
            delete(remove_member),
        )
        .route(
            "/api/groups/{group_id}/media",
            get(list_media).post(upload_media),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Resolves and authorizes a room named in a path.
async fn accessible_room(state: &RelayState, user: &UserId, raw: &str) -> ApiResult<RoomKey> {
    let room = state.parse_room(raw)?;
    state.authorize_room(user, &room).await?;
    Ok(room)
}

async fn list_messages(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let room = accessible_room(&state, &user, &room_id).await?;
    let page = state
        .history
        .list_messages(&room, query.page, query.limit)
        .await?;

    let mut profiles: HashMap<UserId, UserProfile> = HashMap::new();
    let mut messages = Vec::with_capacity(page.messages.len());
    for envelope in page.messages {
        let sender = match profiles.get(&envelope.sender_id) {
            Some(profile) => profile.clone(),
            None => {
                let profile =
                    profile_or_placeholder(state.directory.as_ref(), &envelope.sender_id).await;
                profiles.insert(envelope.sender_id.clone(), profile.clone());
                profile
            }
        };
        messages.push(DeliveredMessage { envelope, sender });
    }

    Ok(Json(HistoryResponse {
        room_id: page.room_id,
        page: page.page,
        page_size: page.page_size,
        messages,
    }))
}

/// Non-realtime send: same validation and dispatch as the WebSocket path.
async fn send_message(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
    ApiJson(mut payload): ApiJson<SendMessage>,
) -> ApiResult<impl IntoResponse> {
    payload.room_id = Some(room_id);
    let draft = validate(&user, payload, state.self_chat_policy())?;
    state.authorize_room(&user, draft.room()).await?;
    let report = state.dispatcher.dispatch(draft, None).await?;
    let delivered = report.delivered_count();
    Ok((
        StatusCode::CREATED,
        Json(SentResponse {
            message: report.envelope,
            delivered,
        }),
    ))
}

async fn delete_all_messages(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let room = accessible_room(&state, &user, &room_id).await?;
    let deleted = state.history.delete_all_messages(&room).await?;
    Ok(Json(serde_json::json!({"deleted": deleted})))
}

async fn delete_selected_messages(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<String>,
    ApiJson(request): ApiJson<DeleteSelectedRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let room = accessible_room(&state, &user, &room_id).await?;
    let deleted = state
        .history
        .delete_selected_messages(&room, &request.message_ids)
        .await?;
    Ok(Json(serde_json::json!({"deleted": deleted})))
}

async fn create_group(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    ApiJson(request): ApiJson<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let group = state
        .groups
        .create(&request.name, request.description, &user)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn my_groups(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
) -> Json<Vec<GroupRoom>> {
    Json(state.groups.groups_of(&user).await)
}

async fn get_group(
    State(state): State<Arc<RelayState>>,
    AuthUser(_user): AuthUser,
    Path(group_id): Path<String>,
) -> ApiResult<Json<GroupRoom>> {
    Ok(Json(state.groups.get(&group_id).await?))
}

async fn list_members(
    State(state): State<Arc<RelayState>>,
    AuthUser(_user): AuthUser,
    Path(group_id): Path<String>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    let members = state.groups.members(&group_id).await?;
    let mut profiles = Vec::with_capacity(members.len());
    for member in &members {
        profiles.push(profile_or_placeholder(state.directory.as_ref(), member).await);
    }
    Ok(Json(profiles))
}

async fn add_members(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
    ApiJson(request): ApiJson<AddMembersRequest>,
) -> ApiResult<Json<AddMembersResponse>> {
    let added = state
        .groups
        .add_members(&group_id, &user, &request.member_ids)
        .await?;
    let members = state.groups.members(&group_id).await?;
    Ok(Json(AddMembersResponse { added, members }))
}

async fn remove_member(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path((group_id, member_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state
        .remove_group_member(&group_id, &user, &UserId::new(member_id))
        .await?;
    Ok(Json(serde_json::json!({"removed": removed})))
}

/// Accepts either a raw blob (kind taken from `Content-Type`) or a JSON
/// `{url, kind}` reference to media stored elsewhere.
async fn upload_media(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let room = RoomKey::group(&group_id)?;
    state.authorize_room(&user, &room).await?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");

    let media = if content_type.starts_with("application/json") {
        let media: MediaRef = serde_json::from_slice(&body)
            .map_err(|e| RelayError::InvalidArgument(format!("invalid media reference: {e}")))?;
        if media.url.trim().is_empty() {
            return Err(RelayError::InvalidArgument("media url must not be empty".into()));
        }
        media
    } else {
        state.media.store(&body, content_type).await?
    };

    let record = MediaRecord {
        url: media.url,
        kind: media.kind,
        uploaded_by: user,
        uploaded_at: Timestamp::now(),
    };
    state.sink.record_media(&room, record.clone()).await?;
    tracing::info!(room_id = %room, url = %record.url, kind = %record.kind, "media recorded");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_media(
    State(state): State<Arc<RelayState>>,
    AuthUser(user): AuthUser,
    Path(group_id): Path<String>,
) -> ApiResult<Json<Vec<MediaRecord>>> {
    let room = RoomKey::group(&group_id)?;
    state.authorize_room(&user, &room).await?;
    Ok(Json(state.sink.list_media(&room).await?))
}

/// Starts the relay server on the given address with in-memory state and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}
