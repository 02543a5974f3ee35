//! # Seismonet HTTP API
//!
//! Public surface of the pipeline:
//!
//! | Path                | Method | Auth      | Purpose                      |
//! |---------------------|--------|-----------|------------------------------|
//! | `/health`           | GET    | none      | liveness                     |
//! | `/ready`            | GET    | none      | readiness (503 until wired)  |
//! | `/events`           | GET    | viewer+   | query classified events      |
//! | `/events/{id}`      | GET    | viewer+   | fetch one                    |
//! | `/events/stream`    | GET    | viewer+   | live tail (SSE)              |
//! | `/metrics`          | GET    | none      | Prometheus exposition        |
//! | `/model/reload`     | POST   | operator+ | hot-swap the model artifact  |
//! | `/caches/purge`     | POST   | admin     | drop client response caches  |
//! | `/store/compact`    | POST   | admin     | retention sweep before a cutoff |
//!
//! The tail uses SSE rather than WebSocket: the stream is strictly
//! server-to-client and `Last-Event-ID` gives cursor resume for free.

pub mod auth;
pub mod error;
pub mod routes;

pub use auth::{Claims, Role};
pub use error::ApiError;
pub use routes::{build_router, serve, ServerState};
