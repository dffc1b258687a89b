use std::time::Duration;

/// Longest delay any strategy will ever produce.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Backoff curve applied between delivery attempts.
///
/// Every transport that retries (HTTP dispatcher, broker publishers, push
/// notifications, broker reconnects) draws its delays from one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// `base * multiplier^attempt`, clamped to `max`.
    Exponential {
        base: Duration,
        max: Duration,
        multiplier: f64,
        /// Stretch each delay by up to +40% depending on the attempt number
        /// so concurrent callers spread out.
        jitter: bool,
    },
    /// `delay * (attempt + 1)`, clamped to `max`.
    Linear { delay: Duration, max: Duration },
    /// Same delay before every retry.
    Constant { delay: Duration },
}

impl RetryStrategy {
    /// Exponential backoff without jitter, capped at [`MAX_BACKOFF`].
    pub fn exponential(base: Duration, multiplier: f64) -> Self {
        Self::Exponential {
            base,
            max: MAX_BACKOFF,
            multiplier,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use courier_core::RetryStrategy;
    ///
    /// let strategy = RetryStrategy::exponential(Duration::from_millis(100), 2.0);
    /// assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
    /// assert_eq!(strategy.delay_for(3), Duration::from_millis(800));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                // Retry counts are small; anything above i32::MAX saturates
                // to the cap anyway.
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let mut raw = base.as_secs_f64() * multiplier.powi(exponent);
                if *jitter {
                    raw *= 1.0 + 0.1 * f64::from(attempt % 5);
                }
                clamp_secs(raw, *max)
            }
            Self::Linear { delay, max } => {
                clamp_secs(delay.as_secs_f64() * f64::from(attempt.saturating_add(1)), *max)
            }
            Self::Constant { delay } => *delay,
        }
    }
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if secs.is_finite() && secs >= 0.0 {
        Duration::from_secs_f64(secs.min(max.as_secs_f64()))
    } else {
        max
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_from_base() {
        let strategy = RetryStrategy::exponential(Duration::from_millis(1000), 2.0);
        assert_eq!(strategy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn exponential_is_clamped() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            multiplier: 3.0,
            jitter: false,
        };
        assert_eq!(strategy.delay_for(1), Duration::from_secs(3));
        assert_eq!(strategy.delay_for(2), Duration::from_secs(5));
        assert_eq!(strategy.delay_for(500), Duration::from_secs(5));
        assert_eq!(
            RetryStrategy::exponential(Duration::from_secs(1), 2.0).delay_for(u32::MAX),
            MAX_BACKOFF
        );
    }

    #[test]
    fn jitter_stretches_by_attempt() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        };
        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(220));
    }

    #[test]
    fn linear_and_constant() {
        let linear = RetryStrategy::Linear {
            delay: Duration::from_millis(250),
            max: Duration::from_secs(1),
        };
        assert_eq!(linear.delay_for(0), Duration::from_millis(250));
        assert_eq!(linear.delay_for(1), Duration::from_millis(500));
        assert_eq!(linear.delay_for(9), Duration::from_secs(1));

        let constant = RetryStrategy::Constant {
            delay: Duration::from_millis(40),
        };
        assert_eq!(constant.delay_for(7), Duration::from_millis(40));
    }
}
