//! Observability subsystem for wsmux
//!
//! Process-wide counters rendered in Prometheus text format.

pub mod metrics;

pub use metrics::{GaugeSnapshot, Metrics};
