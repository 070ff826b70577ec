//! Progress reporting of the per-segment loop (feature `progress`).
//!
//! [`SegmentProgress`] is an `indicatif` bar over the segments of one outer iteration. Workers
//! share it by reference; the message shows the mean wall time per finished segment.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over the segments of one outer iteration.
pub struct SegmentProgress {
    bar: ProgressBar,
    started: Instant,
    done: AtomicU64,
}

impl SegmentProgress {
    pub fn new(total: usize, iteration: usize) -> Self {
        let bar = ProgressBar::new(total.max(1) as u64);
        let style = ProgressStyle::with_template(
            "iter {prefix} {bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) \
             | {per_sec} | ETA {eta_precise} | {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(iteration.to_string());
        bar.enable_steady_tick(Duration::from_millis(200));
        SegmentProgress {
            bar,
            started: Instant::now(),
            done: AtomicU64::new(0),
        }
    }

    /// Mark one segment as done.
    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let per_segment = mean_duration(self.started.elapsed(), done);
        self.bar.set_message(format!("{per_segment:.2?}/segment"));
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// `elapsed / count`, zero before the first segment.
fn mean_duration(elapsed: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => elapsed / n,
        Err(_) => Duration::from_secs_f64(elapsed.as_secs_f64() / count as f64),
    }
}

#[cfg(test)]
mod progress_bar_tests {
    use super::*;

    #[test]
    fn test_mean_duration() {
        assert_eq!(mean_duration(Duration::from_secs(3), 0), Duration::ZERO);
        assert_eq!(
            mean_duration(Duration::from_millis(900), 3),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn test_ticks_advance_the_bar() {
        let progress = SegmentProgress::new(4, 1);
        progress.tick();
        progress.tick();
        assert_eq!(progress.bar.position(), 2);
        assert_eq!(progress.done.load(Ordering::Relaxed), 2);
        progress.finish();
    }
}
