//! REST API layer: route handlers, DTOs, OpenAPI document, and router
//! composition.
//!
//! Resource endpoints are mounted under `/api/v1`; the WebSocket upgrade
//! lives at `/ws` and the health check at `/health`.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI description of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(
        handlers::system::health_handler,
        handlers::clients::list_clients,
        handlers::clients::get_client,
        handlers::clients::call_client,
        handlers::clients::broadcast,
    ),
    tags(
        (name = "System", description = "Service health"),
        (name = "Clients", description = "Connected execution clients and RPC calls"),
    )
)]
pub struct ApiDoc;

/// Builds the complete router: REST endpoints plus the WebSocket upgrade.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
        .route("/ws", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
