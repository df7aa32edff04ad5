//! Prometheus metrics for the mock CSMS

use crate::{config::MetricsConfig, CsmsError, CsmsResult};
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::info;

/// Metrics registry for the mock CSMS
pub struct MetricsRegistry {
    /// Prometheus registry
    registry: Registry,
    /// Configuration
    config: MetricsConfig,
    /// Protocol traffic metrics
    ocpp_metrics: OcppMetrics,
    /// System metrics
    system_metrics: SystemMetrics,
}

impl MetricsRegistry {
    /// Create new metrics registry
    pub fn new(config: &MetricsConfig) -> CsmsResult<Self> {
        if !config.enabled {
            info!("Metrics collection disabled");
        } else {
            info!("Initializing metrics with namespace: {}", config.namespace);
        }

        let registry = Registry::new();
        let ocpp_metrics = OcppMetrics::new(&config.namespace, &config.latency_buckets)?;
        let system_metrics = SystemMetrics::new(&config.namespace)?;

        if config.enabled {
            registry.register(Box::new(ocpp_metrics.frames_received.clone()))?;
            registry.register(Box::new(ocpp_metrics.frames_sent.clone()))?;
            registry.register(Box::new(ocpp_metrics.protocol_errors.clone()))?;
            registry.register(Box::new(ocpp_metrics.outbound_calls.clone()))?;
            registry.register(Box::new(ocpp_metrics.active_connections.clone()))?;
            registry.register(Box::new(ocpp_metrics.pending_calls.clone()))?;
            registry.register(Box::new(ocpp_metrics.call_handling_duration.clone()))?;
            registry.register(Box::new(system_metrics.uptime_seconds.clone()))?;
        }

        Ok(Self {
            registry,
            config: config.clone(),
            ocpp_metrics,
            system_metrics,
        })
    }

    /// Record a text frame read from a charge point
    pub fn record_frame_received(&self) {
        if self.config.enabled {
            self.ocpp_metrics.frames_received.inc();
        }
    }

    /// Record a text frame written to a charge point
    pub fn record_frame_sent(&self) {
        if self.config.enabled {
            self.ocpp_metrics.frames_sent.inc();
        }
    }

    /// Record a frame answered with a ProtocolError
    pub fn record_protocol_error(&self) {
        if self.config.enabled {
            self.ocpp_metrics.protocol_errors.inc();
        }
    }

    /// Record how an outbound call settled
    pub fn record_outbound_outcome(&self, outcome: &str) {
        if self.config.enabled {
            self.ocpp_metrics
                .outbound_calls
                .with_label_values(&[outcome])
                .inc();
        }
    }

    pub fn set_active_connections(&self, count: i64) {
        if self.config.enabled {
            self.ocpp_metrics.active_connections.set(count);
        }
    }

    pub fn inc_pending_calls(&self) {
        if self.config.enabled {
            self.ocpp_metrics.pending_calls.inc();
        }
    }

    pub fn dec_pending_calls(&self) {
        if self.config.enabled {
            self.ocpp_metrics.pending_calls.dec();
        }
    }

    /// Record time spent answering an inbound Call
    pub fn record_call_handling_duration(&self, duration_seconds: f64) {
        if self.config.enabled {
            self.ocpp_metrics
                .call_handling_duration
                .observe(duration_seconds);
        }
    }

    pub fn update_uptime(&self, uptime_seconds: f64) {
        if self.config.enabled {
            self.system_metrics.uptime_seconds.set(uptime_seconds);
        }
    }

    /// Get metrics in Prometheus format
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        if self.config.enabled {
            self.registry.gather()
        } else {
            Vec::new()
        }
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> CsmsResult<String> {
        let encoder = prometheus::TextEncoder::new();
        Ok(encoder.encode_to_string(&self.gather())?)
    }

    pub fn get_stats(&self) -> MetricsStats {
        MetricsStats {
            enabled: self.config.enabled,
            metrics_count: self.gather().len(),
            namespace: self.config.namespace.clone(),
        }
    }
}

/// Protocol traffic metrics
struct OcppMetrics {
    frames_received: IntCounter,
    frames_sent: IntCounter,
    protocol_errors: IntCounter,
    /// Outbound calls by outcome (accepted, error, timeout, closed)
    outbound_calls: IntCounterVec,
    active_connections: IntGauge,
    pending_calls: IntGauge,
    call_handling_duration: Histogram,
}

impl OcppMetrics {
    fn new(namespace: &str, latency_buckets: &[f64]) -> CsmsResult<Self> {
        Ok(Self {
            frames_received: IntCounter::new(
                format!("{}_frames_received_total", namespace),
                "Total number of OCPP frames received",
            )?,
            frames_sent: IntCounter::new(
                format!("{}_frames_sent_total", namespace),
                "Total number of OCPP frames sent",
            )?,
            protocol_errors: IntCounter::new(
                format!("{}_protocol_errors_total", namespace),
                "Total number of frames rejected as malformed",
            )?,
            outbound_calls: IntCounterVec::new(
                Opts::new(
                    format!("{}_outbound_calls_total", namespace),
                    "Total number of server-initiated calls by outcome",
                ),
                &["outcome"],
            )?,
            active_connections: IntGauge::new(
                format!("{}_active_connections", namespace),
                "Number of active charge point connections",
            )?,
            pending_calls: IntGauge::new(
                format!("{}_pending_calls", namespace),
                "Number of server-initiated calls awaiting a reply",
            )?,
            call_handling_duration: Histogram::with_opts(
                HistogramOpts::new(
                    format!("{}_call_handling_duration_seconds", namespace),
                    "Time spent answering inbound calls",
                )
                .buckets(latency_buckets.to_vec()),
            )?,
        })
    }
}

/// System-level metrics
struct SystemMetrics {
    uptime_seconds: Gauge,
}

impl SystemMetrics {
    fn new(namespace: &str) -> CsmsResult<Self> {
        Ok(Self {
            uptime_seconds: Gauge::new(
                format!("{}_uptime_seconds", namespace),
                "Process uptime in seconds",
            )?,
        })
    }
}

/// Metrics statistics
#[derive(Debug, Clone)]
pub struct MetricsStats {
    pub enabled: bool,
    /// Number of metric families being exported
    pub metrics_count: usize,
    pub namespace: String,
}

impl From<prometheus::Error> for CsmsError {
    fn from(err: prometheus::Error) -> Self {
        CsmsError::Internal {
            message: format!("Metrics error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new(&MetricsConfig::default()).unwrap();
        let stats = registry.get_stats();
        assert!(stats.enabled);
        assert_eq!(stats.namespace, "ocpp_mock_csms");
    }

    #[test]
    fn test_metrics_registry_disabled() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let registry = MetricsRegistry::new(&config).unwrap();
        registry.record_frame_received();

        assert!(registry.gather().is_empty());
        assert!(!registry.get_stats().enabled);
        assert_eq!(registry.encode_text().unwrap(), "");
    }

    #[test]
    fn test_metrics_operations() {
        let registry = MetricsRegistry::new(&MetricsConfig::default()).unwrap();

        registry.record_frame_received();
        registry.record_frame_sent();
        registry.record_protocol_error();
        registry.record_outbound_outcome("accepted");
        registry.record_outbound_outcome("timeout");
        registry.set_active_connections(5);
        registry.inc_pending_calls();
        registry.record_call_handling_duration(0.002);
        registry.update_uptime(3600.0);

        let text = registry.encode_text().unwrap();
        assert!(text.contains("ocpp_mock_csms_frames_received_total 1"));
        assert!(text.contains("ocpp_mock_csms_active_connections 5"));
        assert!(text.contains("ocpp_mock_csms_pending_calls 1"));
        assert!(text.contains(r#"ocpp_mock_csms_outbound_calls_total{outcome="timeout"} 1"#));
    }
}
