//! Certkeeper - certificate lifecycle manager
//!
//! Issues TLS certificates through ACME DNS-01 validation. Issuance requests
//! are persisted as domain records and advanced by a background scheduler;
//! an admin HTTP interface registers accounts and manages requests.
//!
//! # Components
//!
//! - [`acme`] - Record stores, protocol adapter, state machine and scheduler
//! - [`admin`] - axum router for the admin interface
//! - [`app`] - Shared state wired at startup
//! - [`metrics`] - Prometheus counters

pub mod acme;
pub mod admin;
pub mod app;
pub mod error;
pub mod metrics;

pub use admin::router;
pub use app::AppState;
pub use error::ManagerError;
