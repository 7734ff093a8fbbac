//! API Module
//!
//! HTTP handlers and routing for a cache node.
//!
//! # Endpoints
//! - `PUT /set` - Store a value
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint
//! - `/peer/:cache/...` - Replication and bootstrap endpoints used by other nodes

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
