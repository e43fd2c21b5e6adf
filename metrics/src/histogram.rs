/// Logarithmically bucketed latency histogram: bucket index is
/// `floor(10 * log2(max(ms, 1)))`, capped, giving ~7% resolution across six
/// orders of magnitude in a couple hundred slots.
const MAX_BUCKETS: usize = 200;

#[derive(Debug)]
pub struct LatencyHistogram {
    counts: Vec<u64>,
    total: u64,
}

/// Quantiles derived by cumulative counting, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Percentiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p98: f64,
    pub p99: f64,
}

impl Percentiles {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("p25", self.p25),
            ("p50", self.p50),
            ("p75", self.p75),
            ("p95", self.p95),
            ("p98", self.p98),
            ("p99", self.p99),
        ]
        .into_iter()
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            counts: vec![0; MAX_BUCKETS],
            total: 0,
        }
    }

    pub fn record(&mut self, ms: u64) {
        self.counts[bucket_index(ms)] += 1;
        self.total += 1;
    }

    pub fn percentiles(&self) -> Percentiles {
        Percentiles {
            p25: self.quantile(0.25),
            p50: self.quantile(0.50),
            p75: self.quantile(0.75),
            p95: self.quantile(0.95),
            p98: self.quantile(0.98),
            p99: self.quantile(0.99),
        }
    }

    fn quantile(&self, q: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rank = ((q * self.total as f64).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (index, count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= rank {
                return bucket_value(index);
            }
        }
        bucket_value(MAX_BUCKETS - 1)
    }
}

fn bucket_index(ms: u64) -> usize {
    let ms = ms.max(1) as f64;
    ((10.0 * ms.log2()).floor() as usize).min(MAX_BUCKETS - 1)
}

/// Geometric midpoint of the bucket's latency range.
fn bucket_value(index: usize) -> f64 {
    2f64.powf((index as f64 + 0.5) / 10.0)
}
