//! Prometheus metrics for pipeline runs
//!
//! Metric names follow `etl_{phase}_{name}` (histograms) and
//! `etl_{phase}_{name}_total` (counters). Recording is a no-op until
//! [`init_metrics`] installs the exporter.

pub mod executor;

pub use executor::ExecutorMetrics;

use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing::{info, warn};

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Build a metric name with the crate-wide prefix
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

/// Install the Prometheus exporter listening on `addr`.
///
/// Idempotent: only the first call installs; later calls report whether that
/// install succeeded.
pub fn init_metrics(addr: SocketAddr) -> bool {
    *INSTALLED.get_or_init(|| match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            ExecutorMetrics::describe();
            info!("Prometheus exporter listening on http://{}/metrics", addr);
            true
        }
        Err(e) => {
            warn!("Failed to install Prometheus exporter on {}: {}", addr, e);
            false
        }
    })
}

/// Exporter address from `ETL_METRICS_ADDR`, if set and valid
pub fn metrics_addr_from_env() -> Option<SocketAddr> {
    let raw = std::env::var("ETL_METRICS_ADDR").ok()?;
    match raw.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            warn!("Ignoring invalid ETL_METRICS_ADDR '{}'", raw);
            None
        }
    }
}
