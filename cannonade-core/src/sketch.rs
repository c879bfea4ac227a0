use pdatastructs::tdigest::{TDigest, K1};
use std::time::Duration;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Streaming latency accumulator.
///
/// Quantiles come from a t-digest, so memory stays bounded no matter how
/// many samples a run produces; quantile answers are approximate within the
/// digest's compression error (on the order of 1% relative error at the
/// chosen scale). Min/max/mean/stddev are tracked exactly alongside via
/// streaming moments, since the digest only answers quantile queries.
#[derive(Debug, Clone)]
pub struct LatencySketch {
    digest: TDigest<K1>,
    count: u64,
    min: Duration,
    max: Duration,
    mean: f64,
    m2: f64,
}

impl LatencySketch {
    pub fn new() -> Self {
        Self {
            digest: default_tdigest(),
            count: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
            mean: 0.,
            m2: 0.,
        }
    }

    pub fn insert(&mut self, latency: Duration) {
        let secs = latency.as_secs_f64();
        // Long runs of identical samples trip an internal assertion in the
        // digest's compression, so digest inserts get a picosecond of dither.
        // Exact moments below use the undithered value.
        self.digest.insert(secs + self.count as f64 * 1e-12);

        self.count += 1;
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);

        // Welford's online mean/variance update.
        let delta = secs - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (secs - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn quantile(&self, quantile: f64) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        // Single-valued distribution; answer exactly without touching the
        // digest.
        if self.min == self.max {
            return self.min;
        }
        let secs = self.digest.quantile(quantile);

        // The t-digest can return NaN on degenerate inputs; clamp to zero
        // rather than poisoning the result.
        if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.))
        } else {
            Duration::ZERO
        }
    }

    pub fn min(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.min
        }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn mean(&self) -> Duration {
        Duration::from_secs_f64(self.mean.max(0.))
    }

    pub fn stddev(&self) -> Duration {
        if self.count < 2 {
            return Duration::ZERO;
        }
        let var = self.m2 / self.count as f64;
        Duration::from_secs_f64(var.max(0.).sqrt())
    }
}

impl Default for LatencySketch {
    fn default() -> Self {
        Self::new()
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sketch_is_all_zero() {
        let sketch = LatencySketch::new();
        assert_eq!(sketch.count(), 0);
        assert_eq!(sketch.quantile(0.5), Duration::ZERO);
        assert_eq!(sketch.min(), Duration::ZERO);
        assert_eq!(sketch.max(), Duration::ZERO);
        assert_eq!(sketch.stddev(), Duration::ZERO);
    }

    #[test]
    fn exact_moments() {
        let mut sketch = LatencySketch::new();
        for ms in [10u64, 20, 30, 40] {
            sketch.insert(Duration::from_millis(ms));
        }
        assert_eq!(sketch.count(), 4);
        assert_eq!(sketch.min(), Duration::from_millis(10));
        assert_eq!(sketch.max(), Duration::from_millis(40));
        assert_eq!(sketch.mean(), Duration::from_millis(25));

        // Population stddev of {10,20,30,40}ms is sqrt(125)ms.
        let expected = 125f64.sqrt() / 1_000.;
        let got = sketch.stddev().as_secs_f64();
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn constant_samples_answer_exactly() {
        let mut sketch = LatencySketch::new();
        for _ in 0..10 {
            sketch.insert(Duration::from_millis(3));
        }
        assert_eq!(sketch.quantile(0.5), Duration::from_millis(3));
        assert_eq!(sketch.quantile(0.99), Duration::from_millis(3));
        assert_eq!(sketch.mean(), Duration::from_millis(3));
        assert_eq!(sketch.stddev(), Duration::ZERO);
    }

    #[test]
    fn bulk_constant_samples_survive_compression() {
        // Enough identical inserts to force the digest through several
        // compression rounds.
        let mut sketch = LatencySketch::new();
        for _ in 0..500 {
            sketch.insert(Duration::from_millis(3));
        }
        assert_eq!(sketch.count(), 500);
        assert_eq!(sketch.quantile(0.9), Duration::from_millis(3));
    }

    #[test]
    fn quantiles_track_distribution() {
        let mut sketch = LatencySketch::new();
        for ms in 1..=1_000u64 {
            sketch.insert(Duration::from_millis(ms));
        }

        let p50 = sketch.quantile(0.5).as_secs_f64();
        let p99 = sketch.quantile(0.99).as_secs_f64();
        assert!((p50 - 0.5).abs() < 0.05, "p50={p50}");
        assert!((p99 - 0.99).abs() < 0.05, "p99={p99}");
        assert!(p50 < p99);
    }
}
