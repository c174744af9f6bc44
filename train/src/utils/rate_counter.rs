use crate::common::*;

/// Measures the number of processed items per second over an interval.
#[derive(Debug)]
pub struct RateCounter {
    count: f64,
    instant: Instant,
    interval: Duration,
}

impl RateCounter {
    pub fn new(interval: Duration) -> Self {
        Self {
            count: 0.0,
            instant: Instant::now(),
            interval,
        }
    }

    pub fn with_second_interval() -> Self {
        Self::new(Duration::from_secs(1))
    }

    pub fn add(&mut self, addition: f64) {
        self.count += addition;
    }

    /// Return the rate and restart counting once the interval has passed.
    pub fn rate(&mut self) -> Option<f64> {
        let elapsed = self.instant.elapsed();
        (elapsed >= self.interval).then(|| {
            let rate = self.count / elapsed.as_secs_f64();
            self.count = 0.0;
            self.instant = Instant::now();
            rate
        })
    }
}
