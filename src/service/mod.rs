//! District Atlas REST Service
//!
//! Exposes an [`AtlasService`](crate::atlas::AtlasService) over HTTP.
//!
//! ## Endpoints
//!
//! - `POST /api/atlas/build` - Build and commit a generation from a complete batch of layers
//! - `GET /api/atlas/current` - Manifest of the committed snapshot
//! - `GET /api/atlas/:generation` - Manifest of a stored generation
//! - `POST /api/lookup` - Districts containing a point, with inclusion proofs
//! - `GET /api/diff?from=&to=` - District-level diff between two generations
//! - `GET /health` - Service health and committed generation

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{
    metrics_middleware, record_build_metrics, record_lookup, request_id, request_span, REQUEST_ID_HEADER,
};
pub use routes::{create_router, ErrorResponse};
pub use state::ServiceState;
