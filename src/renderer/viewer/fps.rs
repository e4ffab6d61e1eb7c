use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Frames completed since the last report, reported roughly once per second.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    start: Instant,
    frames: u64,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self { start: now, frames: 0 }
    }

    /// Counts a frame finished at `now`. Once at least a second has elapsed
    /// returns the frame rate over that window and starts a new one.
    pub fn frame_completed(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.start);
        if elapsed < REPORT_INTERVAL {
            return None;
        }

        let fps = self.frames as f64 / elapsed.as_micros() as f64 * 1_000_000.0;
        self.frames = 0;
        self.start = now;

        Some(fps)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_a_second_has_elapsed() {
        let base = Instant::now();
        let mut fps = FpsCounter::new(base);

        for i in 1..60 {
            assert_eq!(fps.frame_completed(base + Duration::from_millis(i * 16)), None);
        }
        let reported = fps.frame_completed(base + Duration::from_secs(1)).unwrap();

        assert!((reported - 60.0).abs() < 1e-9);
        assert_eq!(fps.frames(), 0);
    }

    #[test]
    fn counters_reset_after_report() {
        let base = Instant::now();
        let mut fps = FpsCounter::new(base);

        assert!(fps.frame_completed(base + Duration::from_millis(1500)).is_some());

        // New window starts at the reporting instant.
        assert_eq!(fps.frame_completed(base + Duration::from_millis(2000)), None);
        let reported = fps.frame_completed(base + Duration::from_millis(2500)).unwrap();
        assert!((reported - 2.0).abs() < 1e-9);
    }

    #[test]
    fn rate_uses_elapsed_microseconds() {
        let base = Instant::now();
        let mut fps = FpsCounter::new(base);

        for _ in 0..9 {
            fps.frame_completed(base + Duration::from_millis(100));
        }
        let reported = fps.frame_completed(base + Duration::from_micros(2_000_000)).unwrap();

        assert!((reported - 5.0).abs() < 1e-9);
    }
}
