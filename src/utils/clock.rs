use chrono::{DateTime, Utc};

/// Represents an entity responsible for providing dates across application. This can allow it to
/// be used for testing
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    /// Current time as epoch milliseconds, the unit intervals are stored in.
    fn now_ms(&self) -> i64 {
        self.time().timestamp_millis()
    }
}

pub struct DefaultClock;

impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that follows tokio time from a fixed starting point. With a paused runtime the whole
/// timeline becomes deterministic.
#[cfg(test)]
#[derive(Clone)]
pub struct TestClock {
    pub start_time: DateTime<Utc>,
    pub reference: tokio::time::Instant,
}

#[cfg(test)]
impl TestClock {
    pub fn from_epoch_ms(start_ms: i64) -> Self {
        Self {
            start_time: DateTime::from_timestamp_millis(start_ms).expect("valid test timestamp"),
            reference: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl Clock for TestClock {
    fn time(&self) -> DateTime<Utc> {
        self.start_time + self.reference.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Clock, TestClock};

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_paused_time() {
        let clock = TestClock::from_epoch_ms(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_ms(), 3_500);
    }
}
