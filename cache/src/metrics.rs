use crate::SharedCache;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedCache);

pub fn register(reg: &mut Registry, cache: SharedCache) {
    reg.register_collector(Box::new(Instrumented(cache)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let status = self.0.read().status();
        let labels: [(&str, &str); 0] = [];

        let mut ready_encoder = encoder.encode_descriptor(
            "cache_ready",
            "Whether the routing cache has completed its initial synchronization",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(status.ready as i64).encode(ready_encoder.encode_family(&labels)?)?;

        let mut routes_encoder = encoder.encode_descriptor(
            "cache_routes",
            "The number of routes in the cache",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(status.route_count as i64).encode(routes_encoder.encode_family(&labels)?)?;

        let mut upstreams_encoder = encoder.encode_descriptor(
            "cache_upstreams",
            "The number of upstreams in the cache",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(status.upstream_count as i64)
            .encode(upstreams_encoder.encode_family(&labels)?)?;

        let mut secrets_encoder = encoder.encode_descriptor(
            "cache_secrets",
            "The number of secrets in the cache",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(status.secret_count as i64)
            .encode(secrets_encoder.encode_family(&labels)?)?;

        let mut last_sync_encoder = encoder.encode_descriptor(
            "cache_last_sync_timestamp_seconds",
            "When the cache last ingested an update",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(status.last_sync_epoch.unwrap_or(0) as i64)
            .encode(last_sync_encoder.encode_family(&labels)?)?;

        Ok(())
    }
}
