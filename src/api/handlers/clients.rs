//! Client endpoints: listing, liveness, unicast and broadcast calls.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{CallRequest, CallResponse, ClientListResponse, ClientStatusResponse};
use crate::app_state::AppState;
use crate::domain::ClientId;
use crate::error::{ApiError, ErrorResponse};

/// `GET /clients` — List connected execution clients.
#[utoipa::path(
    get,
    path = "/api/v1/clients",
    tag = "Clients",
    summary = "List connected clients",
    description = "Returns every registered execution client with its connection time and probe state.",
    responses(
        (status = 200, description = "Registered clients", body = ClientListResponse),
    )
)]
pub async fn list_clients(State(state): State<AppState>) -> impl IntoResponse {
    let clients = state.bridge.registry().list();
    let total = clients.len();
    (StatusCode::OK, Json(ClientListResponse { clients, total }))
}

/// `GET /clients/{id}` — Report whether a client is live.
///
/// # Errors
///
/// Returns [`ApiError`] if the identifier is blank.
#[utoipa::path(
    get,
    path = "/api/v1/clients/{id}",
    tag = "Clients",
    summary = "Client liveness",
    params(("id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Liveness of the client", body = ClientStatusResponse),
        (status = 400, description = "Blank identifier", body = ErrorResponse),
    )
)]
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let client_id = ClientId::parse(&id)?;
    let live = state.bridge.is_live(&client_id);
    Ok((
        StatusCode::OK,
        Json(ClientStatusResponse {
            id: client_id.to_string(),
            live,
        }),
    ))
}

/// `POST /clients/{id}/call` — Call one client and return its response.
///
/// # Errors
///
/// Returns [`ApiError`] on validation failure or any bridge-level failure.
#[utoipa::path(
    post,
    path = "/api/v1/clients/{id}/call",
    tag = "Clients",
    summary = "Unicast call",
    description = "Sends one request to the named client and waits for its correlated response. A non-success status reported by the client is returned as a normal 200 body.",
    params(("id" = String, Path, description = "Client identifier")),
    request_body = CallRequest,
    responses(
        (status = 200, description = "Client response", body = CallResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 502, description = "Write failed or connection closed", body = ErrorResponse),
        (status = 503, description = "Client not connected", body = ErrorResponse),
        (status = 504, description = "Client did not answer in time", body = ErrorResponse),
    )
)]
pub async fn call_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let client_id = ClientId::parse(&id)?;
    let timeout = req.timeout();
    let response = state
        .bridge
        .call(&client_id, &req.method, &req.path, req.body, timeout)
        .await?;
    Ok((StatusCode::OK, Json(CallResponse::from(response))))
}

/// `POST /broadcast` — Call every client and return the first success.
///
/// # Errors
///
/// Returns [`ApiError`] on validation failure or any bridge-level failure.
#[utoipa::path(
    post,
    path = "/api/v1/broadcast",
    tag = "Clients",
    summary = "Broadcast call",
    description = "Sends the same request to every connected client and returns the first successful response.",
    request_body = CallRequest,
    responses(
        (status = 200, description = "First successful response", body = CallResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 502, description = "Every client answered unsuccessfully", body = ErrorResponse),
        (status = 503, description = "No connected clients", body = ErrorResponse),
        (status = 504, description = "No success in time", body = ErrorResponse),
    )
)]
pub async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<CallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let timeout = req.timeout();
    let response = state
        .bridge
        .call_all(&req.method, &req.path, req.body, timeout)
        .await?;
    Ok((StatusCode::OK, Json(CallResponse::from(response))))
}

/// Client routes, nested under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/clients", get(list_clients))
        .route("/clients/{id}", get(get_client))
        .route("/clients/{id}/call", post(call_client))
        .route("/broadcast", post(broadcast))
}
