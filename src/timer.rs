//! Wall-clock measurement for command runs and whole sessions.

use std::time::{Duration, Instant};

/// Time elapsed since `since`.
pub fn elapsed(since: Instant) -> Duration {
    since.elapsed()
}

/// Render a duration the way execution times appear in logs and
/// performance data, e.g. `11.123s`.
pub fn format_elapsed(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed_millisecond_precision() {
        assert_eq!(format_elapsed(Duration::from_millis(11_123)), "11.123s");
        assert_eq!(format_elapsed(Duration::ZERO), "0.000s");
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        let first = elapsed(start);
        let second = elapsed(start);
        assert!(first >= Duration::from_millis(5));
        assert!(second >= first);
    }
}
