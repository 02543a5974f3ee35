//! # Seismonet Core
//!
//! Process-level plumbing shared by the runner and the HTTP server:
//! - the configuration surface (TOML + environment overrides)
//! - observability initialization (bounded stdout logs, rotated file logs,
//!   Prometheus recorder)
//! - the `Runtime` context: configuration, store, clients, and the model
//!   artifact assembled once at startup and passed downward. No component
//!   reaches back up for globals.

pub mod config;
pub mod observability;
pub mod runtime;

pub use config::AppConfig;
pub use observability::{init_metrics, init_tracing, TracingGuards};
pub use runtime::Runtime;
