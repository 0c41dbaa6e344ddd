//! Phonon Infrastructure Library
//!
//! Shared infrastructure used by the API server and the background workers:
//! - Telemetry initialization (tracing subscriber)
//! - Middleware (request ID)

#[cfg(feature = "middleware")]
pub mod middleware;

pub mod telemetry;

#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, RequestId, REQUEST_ID_HEADER};

pub use telemetry::init_telemetry;
