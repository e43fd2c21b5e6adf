/// Fixed-window request/error ring. 5-second buckets covering 15 minutes;
/// stale slots are lazily reclaimed when written or skipped when read.
const BUCKET_SECS: u64 = 5;
const BUCKETS: usize = 180;

#[derive(Debug)]
pub struct WindowRing {
    slots: Vec<Slot>,
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    stamp: u64,
    requests: u64,
    errors: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowStats {
    pub requests: u64,
    pub errors: u64,
    pub requests_per_minute: f64,
    pub errors_per_minute: f64,
    pub error_percent: f64,
}

impl Default for WindowRing {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowRing {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::default(); BUCKETS],
        }
    }

    pub fn record(&mut self, now_secs: u64, error: bool) {
        let stamp = now_secs / BUCKET_SECS;
        let slot = &mut self.slots[(stamp as usize) % BUCKETS];
        if slot.stamp != stamp {
            *slot = Slot {
                stamp,
                requests: 0,
                errors: 0,
            };
        }
        slot.requests += 1;
        if error {
            slot.errors += 1;
        }
    }

    /// Aggregates the trailing `window_secs` (must be a multiple of the bucket
    /// size and no larger than the ring).
    pub fn aggregate(&self, now_secs: u64, window_secs: u64) -> WindowStats {
        let newest = now_secs / BUCKET_SECS;
        let span = window_secs / BUCKET_SECS;
        let oldest = newest.saturating_sub(span.saturating_sub(1));

        let (mut requests, mut errors) = (0u64, 0u64);
        for slot in &self.slots {
            if slot.stamp >= oldest && slot.stamp <= newest {
                requests += slot.requests;
                errors += slot.errors;
            }
        }

        let minutes = window_secs as f64 / 60.0;
        WindowStats {
            requests,
            errors,
            requests_per_minute: requests as f64 / minutes,
            errors_per_minute: errors as f64 / minutes,
            error_percent: if requests == 0 {
                0.0
            } else {
                errors as f64 * 100.0 / requests as f64
            },
        }
    }
}
