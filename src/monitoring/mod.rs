//! Monitoring: logging and metrics for the control plane
//!
//! - **logging**: structured tracing output, pretty for development and
//!   JSON-ready for aggregation
//! - **metrics**: the Prometheus registry the controller reports each
//!   generation into

pub mod logging;
pub mod metrics;

pub use logging::{init_default, init_logging, LogConfig, LogFormat};
pub use metrics::export_metrics;
