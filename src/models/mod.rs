//! Request and Response models for the cache node API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies. Peer endpoints
//! exchange [`ReplicationEvent`](crate::replication::ReplicationEvent),
//! [`CacheKey`](crate::cache::CacheKey) and [`Element`](crate::cache::Element)
//! directly.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::SetRequest;
pub use responses::{
    AnnouncementResponse, ApplyEventsResponse, DeleteResponse, ErrorResponse, GetResponse, HealthResponse,
    SetResponse, StatsResponse, StoreStatsBody,
};
