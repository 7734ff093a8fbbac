//! API Routes
//!
//! Configures the Axum router with the client and peer endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    delete_handler, get_handler, health_handler, peer_announcement_handler,
    peer_elements_handler, peer_keys_handler, receive_events_handler, set_handler,
    stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /set` - Store a value
/// - `GET /get/:key` - Retrieve a value by key
/// - `DELETE /del/:key` - Delete a key
/// - `GET /stats` - Store, guard and replication statistics
/// - `GET /health` - Health check endpoint
/// - `POST /peer/:cache/events` - Apply events replicated by another node
/// - `GET /peer/:cache/keys` - Key set for bootstrapping nodes
/// - `POST /peer/:cache/elements` - Elements for a chunk of keys
/// - `GET /peer/:cache/announcement` - Compressed peer URL payloads
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/peer/:cache/events", post(receive_events_handler))
        .route("/peer/:cache/keys", get(peer_keys_handler))
        .route("/peer/:cache/elements", post(peer_elements_handler))
        .route("/peer/:cache/announcement", get(peer_announcement_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
