use std::time::Duration;

/// Exponential backoff between delivery retries.
///
/// The delay for the attempt that just failed is
/// `initial_delay * multiplier^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        // Clamp in f64 seconds first: the exponential overflows both f64
        // and Duration long before u32::MAX attempts.
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }
}

impl Default for BackoffPolicy {
    /// 2^attempt x 100ms, capped at 30s.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_doubles_and_caps() {
        let p = BackoffPolicy::default();

        let cases = vec![
            (1, 200),
            (2, 400),
            (3, 800),
            (4, 1600),
            (10, 30_000), // 102400 capped to 30s
        ];
        for (attempt, expected_ms) in cases {
            assert_eq!(
                p.next_delay(attempt).as_millis(),
                expected_ms,
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn custom_policy_progression() {
        let p = BackoffPolicy::new(Duration::from_secs(5), 3.0, Duration::from_secs(70));
        assert_eq!(p.next_delay(1).as_secs(), 15);
        assert_eq!(p.next_delay(2).as_secs(), 45);
        assert_eq!(p.next_delay(3).as_secs(), 70); // 135 capped
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let p = BackoffPolicy::default();
        assert_eq!(p.next_delay(u32::MAX), p.max_delay);
    }

    #[test]
    fn overflowing_growth_caps_instead_of_panicking() {
        let p = BackoffPolicy::default();
        // Finite but far past the cap, and past f64's range entirely.
        assert_eq!(p.next_delay(100), p.max_delay);
        assert_eq!(p.next_delay(2_000), p.max_delay);
    }
}
