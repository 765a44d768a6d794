//! HTTP endpoints for probes and metrics
//!
//! Serves the liveness/readiness probes and the Prometheus scrape endpoint
//! of the operator process itself.

mod server;

pub use server::run_server;
