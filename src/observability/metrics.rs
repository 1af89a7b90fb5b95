//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mesh_link_handshakes_total` (counter): handshake outcomes by transport
//! - `mesh_link_dial_failures_total` (counter): outbound dials that never produced a socket
//! - `mesh_link_established` (gauge): links currently past the handshake
//! - `mesh_link_listeners` (gauge): active listeners by transport
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_handshake(transport: &'static str, outcome: &'static str) {
    counter!("mesh_link_handshakes_total", "transport" => transport, "outcome" => outcome).increment(1);
}

pub fn record_dial_failure(transport: &'static str) {
    counter!("mesh_link_dial_failures_total", "transport" => transport).increment(1);
}

pub fn link_established() {
    gauge!("mesh_link_established").increment(1.0);
}

pub fn link_closed() {
    gauge!("mesh_link_established").decrement(1.0);
}

pub fn set_listeners(transport: &'static str, count: usize) {
    gauge!("mesh_link_listeners", "transport" => transport).set(count as f64);
}
