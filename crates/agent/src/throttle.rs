use std::time::Duration;

use tokio::time::Instant;

/// Lets through at most one error per window and counts the rest.
#[derive(Debug)]
pub struct ErrorThrottle {
    window: Duration,
    last: Option<Instant>,
    suppressed: u32,
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns the number of errors suppressed since the last admitted one
    /// if this error should be logged, `None` if it should be dropped.
    pub fn admit(&mut self, now: Instant) -> Option<u32> {
        match self.last {
            Some(last) if now.duration_since(last) < self.window => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last = Some(now);
                Some(std::mem::take(&mut self.suppressed))
            }
        }
    }

    /// Forgets history; the next error is logged immediately.
    pub fn reset(&mut self) {
        self.last = None;
        self.suppressed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_error_per_window() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(throttle.admit(start), Some(0));
        for i in 1..5 {
            assert_eq!(throttle.admit(start + Duration::from_secs(i)), None);
        }
        assert_eq!(throttle.admit(start + Duration::from_secs(61)), Some(4));
        assert_eq!(throttle.admit(start + Duration::from_secs(62)), None);
    }

    #[test]
    fn reset_reopens_the_window() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(60));
        let start = Instant::now();
        throttle.admit(start);
        throttle.admit(start);
        throttle.reset();
        assert_eq!(throttle.admit(start + Duration::from_secs(1)), Some(0));
    }
}
