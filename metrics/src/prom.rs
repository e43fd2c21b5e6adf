use crate::TrafficMetrics;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::ConstCounter, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Debug)]
struct Instrumented(Arc<TrafficMetrics>);

pub fn register(reg: &mut Registry, metrics: Arc<TrafficMetrics>) {
    reg.register_collector(Box::new(Instrumented(metrics)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let snapshot = self.0.snapshot();

        let mut requests_encoder = encoder.encode_descriptor(
            "requests",
            "Total requests served per resource",
            None,
            MetricType::Counter,
        )?;
        for (key, record) in &snapshot {
            let labels = [
                ("kind", key.kind.as_str()),
                ("namespace", key.namespace.as_str()),
                ("name", key.name.as_str()),
            ];
            ConstCounter::new(record.requests).encode(requests_encoder.encode_family(&labels)?)?;
        }

        let mut errors_encoder = encoder.encode_descriptor(
            "errors",
            "Total error responses per resource",
            None,
            MetricType::Counter,
        )?;
        for (key, record) in &snapshot {
            let labels = [
                ("kind", key.kind.as_str()),
                ("namespace", key.namespace.as_str()),
                ("name", key.name.as_str()),
            ];
            ConstCounter::new(record.errors).encode(errors_encoder.encode_family(&labels)?)?;
        }

        let mut rpm_encoder = encoder.encode_descriptor(
            "requests_per_minute",
            "Windowed request rate per resource",
            None,
            MetricType::Gauge,
        )?;
        for (key, record) in &snapshot {
            for &(window, _, stats) in &record.windows {
                let labels = [
                    ("kind", key.kind.as_str()),
                    ("namespace", key.namespace.as_str()),
                    ("name", key.name.as_str()),
                    ("window", window),
                ];
                ConstGauge::new(stats.requests_per_minute)
                    .encode(rpm_encoder.encode_family(&labels)?)?;
            }
        }

        let mut epm_encoder = encoder.encode_descriptor(
            "errors_per_minute",
            "Windowed error rate per resource",
            None,
            MetricType::Gauge,
        )?;
        for (key, record) in &snapshot {
            for &(window, _, stats) in &record.windows {
                let labels = [
                    ("kind", key.kind.as_str()),
                    ("namespace", key.namespace.as_str()),
                    ("name", key.name.as_str()),
                    ("window", window),
                ];
                ConstGauge::new(stats.errors_per_minute)
                    .encode(epm_encoder.encode_family(&labels)?)?;
            }
        }

        let mut error_percent_encoder = encoder.encode_descriptor(
            "error_percent",
            "Windowed error percentage per resource",
            None,
            MetricType::Gauge,
        )?;
        for (key, record) in &snapshot {
            for &(window, _, stats) in &record.windows {
                let labels = [
                    ("kind", key.kind.as_str()),
                    ("namespace", key.namespace.as_str()),
                    ("name", key.name.as_str()),
                    ("window", window),
                ];
                ConstGauge::new(stats.error_percent)
                    .encode(error_percent_encoder.encode_family(&labels)?)?;
            }
        }

        let mut quantile_encoder = encoder.encode_descriptor(
            "latency_quantile_ms",
            "Latency quantiles per resource, derived from a log2 histogram",
            None,
            MetricType::Gauge,
        )?;
        for (key, record) in &snapshot {
            for (quantile, value) in record.percentiles.iter() {
                let labels = [
                    ("kind", key.kind.as_str()),
                    ("namespace", key.namespace.as_str()),
                    ("name", key.name.as_str()),
                    ("quantile", quantile),
                ];
                ConstGauge::new(value).encode(quantile_encoder.encode_family(&labels)?)?;
            }
        }

        type Lifetime = fn(&crate::RecordSnapshot) -> f64;
        let lifetimes: [(&str, &str, Lifetime); 3] = [
            (
                "latency_min_ms",
                "Minimum observed latency over the process lifetime",
                |r| r.min_ms as f64,
            ),
            (
                "latency_mean_ms",
                "Mean latency over the process lifetime",
                |r| r.mean_ms,
            ),
            (
                "latency_max_ms",
                "Maximum observed latency over the process lifetime",
                |r| r.max_ms as f64,
            ),
        ];
        for (metric, help, value) in lifetimes {
            let mut lifetime_encoder =
                encoder.encode_descriptor(metric, help, None, MetricType::Gauge)?;
            for (key, record) in &snapshot {
                let labels = [
                    ("kind", key.kind.as_str()),
                    ("namespace", key.namespace.as_str()),
                    ("name", key.name.as_str()),
                ];
                ConstGauge::new(value(record)).encode(lifetime_encoder.encode_family(&labels)?)?;
            }
        }

        Ok(())
    }
}
