use std::time::Duration;

/// Smoothed round-trip-time estimator in the style of TCP's SRTT/RTTVAR.
///
/// Samples are only ever fed from datagrams that were transmitted exactly once
///  (Karn's algorithm) - the caller enforces that. Until the first sample arrives,
///  derived timeouts fall back to their configured defaults.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt_ms: f64,
    rttvar_ms: f64,
    has_sample: bool,
}

impl RttEstimator {
    pub fn new() -> RttEstimator {
        RttEstimator {
            srtt_ms: 0.0,
            rttvar_ms: 0.0,
            has_sample: false,
        }
    }

    pub fn on_sample(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;

        if !self.has_sample {
            self.srtt_ms = sample_ms;
            self.rttvar_ms = sample_ms / 2.0;
            self.has_sample = true;
            return;
        }

        self.srtt_ms = 0.875 * self.srtt_ms + 0.125 * sample_ms;
        self.rttvar_ms = 0.75 * self.rttvar_ms + 0.25 * (sample_ms - self.srtt_ms).abs();
    }

    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    pub fn srtt_ms(&self) -> f64 {
        self.srtt_ms
    }

    pub fn rttvar_ms(&self) -> f64 {
        self.rttvar_ms
    }

    /// `max(floor, srtt + 4*rttvar)`, additionally capped so the exponential backoff
    ///  starts below its own ceiling
    pub fn resend_timeout(&self, floor: Duration, cap: Duration) -> Duration {
        if !self.has_sample {
            return floor;
        }
        let raw = Duration::from_secs_f64((self.srtt_ms + 4.0 * self.rttvar_ms) / 1000.0);
        raw.clamp(floor, cap)
    }

    /// `clamp(srtt * 3, min, max)`; the default until a sample exists
    pub fn keep_alive_interval(&self, default: Duration, min: Duration, max: Duration) -> Duration {
        if !self.has_sample {
            return default;
        }
        Duration::from_secs_f64(self.srtt_ms * 3.0 / 1000.0).clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_first_sample_initializes() {
        let mut rtt = RttEstimator::new();
        assert!(!rtt.has_sample());

        rtt.on_sample(Duration::from_millis(80));

        assert!(rtt.has_sample());
        assert_eq!(rtt.srtt_ms(), 80.0);
        assert_eq!(rtt.rttvar_ms(), 40.0);
    }

    #[test]
    fn test_smoothing_formulas() {
        let mut rtt = RttEstimator::new();
        rtt.on_sample(Duration::from_millis(100));
        rtt.on_sample(Duration::from_millis(60));

        // srtt = 0.875*100 + 0.125*60 = 95; rttvar = 0.75*50 + 0.25*|60-95| = 46.25
        assert!((rtt.srtt_ms() - 95.0).abs() < 1e-9);
        assert!((rtt.rttvar_ms() - 46.25).abs() < 1e-9);
    }

    #[test]
    fn test_converges_on_stable_channel() {
        let mut rtt = RttEstimator::new();
        for _ in 0..50 {
            rtt.on_sample(Duration::from_millis(40));
        }

        assert!((rtt.srtt_ms() - 40.0).abs() < 0.1);
        assert!(rtt.rttvar_ms() < 0.1);
    }

    #[rstest]
    #[case::no_sample(None, Duration::from_millis(100))]
    #[case::floored(Some(Duration::from_millis(10)), Duration::from_millis(100))]
    #[case::capped(Some(Duration::from_millis(5000)), Duration::from_millis(1000))]
    fn test_resend_timeout_bounds(
        #[case] sample: Option<Duration>,
        #[case] expected: Duration,
    ) {
        let mut rtt = RttEstimator::new();
        if let Some(sample) = sample {
            // repeat until variance settles near zero so the bound is what is tested
            for _ in 0..100 {
                rtt.on_sample(sample);
            }
        }
        assert_eq!(
            rtt.resend_timeout(Duration::from_millis(100), Duration::from_millis(1000)),
            expected
        );
    }

    #[test]
    fn test_resend_timeout_from_estimate() {
        let mut rtt = RttEstimator::new();
        rtt.on_sample(Duration::from_millis(200));

        // srtt 200, rttvar 100 -> 200 + 400 = 600ms
        assert_eq!(
            rtt.resend_timeout(Duration::from_millis(100), Duration::from_millis(1000)),
            Duration::from_millis(600)
        );
    }

    #[rstest]
    #[case::no_sample(None, Duration::from_millis(1500))]
    #[case::adapts(Some(Duration::from_millis(200)), Duration::from_millis(600))]
    #[case::clamped_low(Some(Duration::from_millis(10)), Duration::from_millis(100))]
    #[case::clamped_high(Some(Duration::from_millis(10_000)), Duration::from_millis(15_000))]
    fn test_keep_alive_interval(#[case] sample: Option<Duration>, #[case] expected: Duration) {
        let mut rtt = RttEstimator::new();
        if let Some(sample) = sample {
            for _ in 0..100 {
                rtt.on_sample(sample);
            }
        }
        assert_eq!(
            rtt.keep_alive_interval(
                Duration::from_millis(1500),
                Duration::from_millis(100),
                Duration::from_millis(15_000)
            ),
            expected
        );
    }
}
