//! Progress reporting and cooperative cancellation for long-running passes.
//!
//! Material mapping and quality analysis process elements in batches. After
//! each batch the pass reports a [`Progress`] snapshot to the caller's
//! [`ProgressCallback`]; returning `false` cancels the pass before the next
//! batch starts. A cancelled pass returns [`crate::FemError::Cancelled`] and no
//! partial field.
//!
//! # Example
//!
//! ```
//! use spine_fem::progress::{Progress, ProgressCallback};
//!
//! let callback: ProgressCallback = Box::new(|progress: &Progress| {
//!     println!("{}% complete: {}", progress.percent(), progress.message);
//!     true // Continue processing (return false to cancel)
//! });
//! # let _ = callback;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::debug;

use crate::error::{FemError, FemResult};
use crate::tracing_ext::log_progress;

/// Progress information passed to callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Elements processed so far.
    pub current: u64,

    /// Total number of elements.
    pub total: u64,

    /// Human-readable message describing current operation.
    pub message: String,

    /// Elapsed time since operation started.
    pub elapsed: Duration,

    /// Estimated time remaining (if available).
    pub estimated_remaining: Option<Duration>,
}

impl Progress {
    /// Create a new progress report.
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
            elapsed: Duration::ZERO,
            estimated_remaining: None,
        }
    }

    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64) / (self.total as f64)
        }
    }

    /// Get progress as a percentage (0 to 100).
    #[inline]
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }

    /// Check if the operation is complete.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Callback function for progress reporting.
///
/// Returns `true` to continue, `false` to request cancellation.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// A thread-safe progress tracker for batched passes.
///
/// Counters are atomic. Once a callback asks to stop, the tracker stays
/// cancelled and no further callbacks run.
#[derive(Debug)]
pub struct ProgressTracker {
    current: AtomicU64,
    total: u64,
    cancelled: AtomicBool,
    start_time: Instant,
    last_callback_time: Mutex<Option<Instant>>,
    callback_interval: Duration,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new(total: u64) -> Self {
        Self::with_interval(total, Duration::from_millis(100))
    }

    /// Create a tracker with custom callback interval.
    ///
    /// An interval of zero invokes the callback on every report.
    pub fn with_interval(total: u64, interval: Duration) -> Self {
        Self {
            current: AtomicU64::new(0),
            total,
            cancelled: AtomicBool::new(false),
            start_time: Instant::now(),
            last_callback_time: Mutex::new(None),
            callback_interval: interval,
        }
    }

    /// Set the current progress value.
    #[inline]
    pub fn set(&self, value: u64) {
        self.current.store(value, Ordering::Relaxed);
    }

    /// Get the current progress value.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Get the total count.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Check if cancellation was requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current() as f64) / (self.total as f64)
        }
    }

    /// Get elapsed time.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Estimate remaining time based on current progress.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let current = self.current();
        if current == 0 {
            return None;
        }

        let rate = current as f64 / self.elapsed().as_secs_f64();
        if rate > 0.0 && rate.is_finite() {
            let remaining = self.total.saturating_sub(current) as f64 / rate;
            Some(Duration::from_secs_f64(remaining))
        } else {
            None
        }
    }

    /// Create a Progress snapshot.
    pub fn snapshot(&self, message: impl Into<String>) -> Progress {
        Progress {
            current: self.current(),
            total: self.total,
            message: message.into(),
            elapsed: self.elapsed(),
            estimated_remaining: self.estimated_remaining(),
        }
    }

    /// Call the callback if enough time has passed since last call.
    ///
    /// Returns `false` if the tracker is cancelled or the callback requested
    /// cancellation.
    pub fn maybe_callback(
        &self,
        callback: Option<&ProgressCallback>,
        message: impl Into<String>,
    ) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let Some(callback) = callback else {
            return true;
        };

        let now = Instant::now();
        {
            let mut last = self
                .last_callback_time
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if last.is_some_and(|prev| now.duration_since(prev) < self.callback_interval) {
                return true;
            }
            *last = Some(now);
        }

        let should_continue = callback(&self.snapshot(message));
        if !should_continue {
            self.cancel();
        }

        should_continue
    }
}

/// Map `f` over `0..total` in batches, in parallel within each batch.
///
/// Results are returned in index order. The callback sees every batch
/// boundary; if it asks to stop while elements remain, the whole pass fails
/// with `Cancelled` and the computed prefix is dropped.
pub(crate) fn process_in_batches<T, F>(
    operation: &'static str,
    total: usize,
    batch_size: usize,
    callback: Option<&ProgressCallback>,
    f: F,
) -> FemResult<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> FemResult<T> + Sync,
{
    let batch_size = batch_size.max(1);
    let tracker = ProgressTracker::with_interval(total as u64, Duration::ZERO);
    let mut out = Vec::with_capacity(total);

    let mut start = 0;
    while start < total {
        let end = (start + batch_size).min(total);
        let batch = (start..end)
            .into_par_iter()
            .map(&f)
            .collect::<FemResult<Vec<T>>>()?;
        out.extend(batch);

        tracker.set(end as u64);
        log_progress(operation, end, total);
        if !tracker.maybe_callback(callback, operation) && end < total {
            debug!(operation, completed = end, total, "Pass cancelled");
            return Err(FemError::cancelled(operation, end, total));
        }
        start = end;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_progress_fraction() {
        let p = Progress::new(50, 100, "test");
        assert!((p.fraction() - 0.5).abs() < 1e-10);
        assert_eq!(p.percent(), 50);
    }

    #[test]
    fn test_progress_zero_total() {
        let p = Progress::new(0, 0, "empty");
        assert!((p.fraction() - 0.0).abs() < 1e-10);
        assert_eq!(p.percent(), 0);
        assert!(p.is_complete());
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(100);

        assert_eq!(tracker.current(), 0);
        assert_eq!(tracker.total(), 100);
        assert!(!tracker.is_cancelled());

        tracker.set(10);
        assert_eq!(tracker.current(), 10);

        tracker.set(50);
        assert!((tracker.fraction() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_cancelled_tracker_skips_callback() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let callback: ProgressCallback = Box::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        let tracker = ProgressTracker::new(10);
        tracker.cancel();

        assert!(!tracker.maybe_callback(Some(&callback), "batch"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_report_always_reaches_callback() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let callback: ProgressCallback = Box::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        let tracker = ProgressTracker::with_interval(10, Duration::from_secs(3600));
        assert!(tracker.maybe_callback(Some(&callback), "first"));
        assert!(tracker.maybe_callback(Some(&callback), "throttled"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_progress_callback_cancels() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let callback: ProgressCallback = Box::new(move |p| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            p.current < 5
        });

        let tracker = ProgressTracker::with_interval(10, Duration::ZERO);
        let mut stopped_at = None;
        for i in 0..10 {
            tracker.set(i);
            if !tracker.maybe_callback(Some(&callback), "test") {
                stopped_at = Some(i);
                break;
            }
        }

        assert_eq!(stopped_at, Some(5));
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert!(tracker.is_cancelled());
    }

    #[test]
    fn test_batches_preserve_order() {
        let out = process_in_batches("squares", 10, 3, None, |i| Ok(i * i)).unwrap();
        assert_eq!(out, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_batches_report_each_boundary() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback: ProgressCallback = Box::new(move |p| {
            seen_clone.lock().unwrap().push(p.current);
            true
        });

        process_in_batches("count", 10, 4, Some(&callback), Ok).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![4, 8, 10]);
    }

    #[test]
    fn test_batches_cancel_between_batches() {
        let callback: ProgressCallback = Box::new(|p| p.current < 4);
        let err = process_in_batches("count", 10, 4, Some(&callback), Ok).unwrap_err();
        match err {
            FemError::Cancelled {
                completed, total, ..
            } => {
                assert_eq!(completed, 4);
                assert_eq!(total, 10);
            }
            other => panic!("Expected Cancelled, got {:?}", other),
        }
    }

    #[test]
    fn test_batches_propagate_element_error() {
        let err = process_in_batches("fail", 10, 4, None, |i| {
            if i == 6 {
                Err(FemError::invalid_node_index(i, 99, 4))
            } else {
                Ok(i)
            }
        })
        .unwrap_err();
        assert!(err.is_mesh_geometry());
    }
}
