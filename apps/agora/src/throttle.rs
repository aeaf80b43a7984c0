use std::time::Duration;

use tokio::time::Instant;

/// Admits at most one call per interval; the first call always passes.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_leading_call_then_waits_for_interval() {
        let mut throttle = Throttle::new(Duration::from_millis(300));
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());

        tokio::time::advance(Duration::from_millis(299)).await;
        assert!(!throttle.try_acquire());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(throttle.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_readmits_immediately() {
        let mut throttle = Throttle::new(Duration::from_secs(5));
        assert!(throttle.try_acquire());
        throttle.reset();
        assert!(throttle.try_acquire());
    }
}
