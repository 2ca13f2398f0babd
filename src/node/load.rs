//! Sliding-window accounting of time spent processing requests

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSample {
    pub start_time: Instant,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct LoadLog {
    samples: VecDeque<RequestSample>,
    total_busy: Duration,
    first_request: Option<Instant>,
    request_count: u64,
}

/// Point-in-time view of the accountant, as served by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct LoadSnapshot {
    pub request_count: u64,
    pub total_busy_secs: f64,
    pub percent_busy_since_start: f64,
    pub percent_busy_last_window: f64,
    pub current_load: f64,
}

/// Converts request timings into a "percent busy" figure over two horizons:
/// since the first request, and the trailing window.
///
/// Only samples that can still fall inside the trailing window are kept.
pub struct LoadAccountant {
    window: Duration,
    recent_threshold: Duration,
    log: Mutex<LoadLog>,
}

impl LoadAccountant {
    pub fn new(window: Duration, recent_threshold: Duration) -> Self {
        Self {
            window,
            recent_threshold,
            log: Mutex::new(LoadLog::default()),
        }
    }

    /// Record one finished request
    pub fn record_completion(&self, start: Instant, duration: Duration) {
        let mut log = self.log.lock();

        log.total_busy += duration;
        log.request_count += 1;
        if log.first_request.is_none() {
            log.first_request = Some(start);
        }
        log.samples.push_back(RequestSample {
            start_time: start,
            duration,
        });

        let newest = start + duration;
        let window = self.window;
        log.samples
            .retain(|s| newest.saturating_duration_since(s.start_time) <= window);
    }

    pub fn request_count(&self) -> u64 {
        self.log.lock().request_count
    }

    pub fn first_request(&self) -> Option<Instant> {
        self.log.lock().first_request
    }

    pub fn retained_samples(&self) -> usize {
        self.log.lock().samples.len()
    }

    pub fn percent_busy_since_start(&self) -> f64 {
        self.percent_busy_since_start_at(Instant::now())
    }

    /// Accumulated busy time over the time elapsed since the first request
    pub fn percent_busy_since_start_at(&self, now: Instant) -> f64 {
        self.log.lock().busy_since_start(now)
    }

    pub fn percent_busy_last_window(&self) -> f64 {
        self.percent_busy_last_window_at(Instant::now())
    }

    /// Busy time of requests started within the window, as a share of the window
    pub fn percent_busy_last_window_at(&self, now: Instant) -> f64 {
        self.log.lock().busy_in_window(now, self.window)
    }

    pub fn current_load(&self) -> f64 {
        self.current_load_at(Instant::now())
    }

    /// Since-start figure while the process is young, trailing window afterwards.
    ///
    /// The young/old threshold and the window length are configured separately
    /// (120s and 60s by default).
    pub fn current_load_at(&self, now: Instant) -> f64 {
        let log = self.log.lock();
        self.current_load_of(&log, now)
    }

    /// All figures taken under a single lock
    pub fn snapshot(&self) -> LoadSnapshot {
        let now = Instant::now();
        let log = self.log.lock();

        LoadSnapshot {
            request_count: log.request_count,
            total_busy_secs: log.total_busy.as_secs_f64(),
            percent_busy_since_start: log.busy_since_start(now),
            percent_busy_last_window: log.busy_in_window(now, self.window),
            current_load: self.current_load_of(&log, now),
        }
    }

    fn current_load_of(&self, log: &LoadLog, now: Instant) -> f64 {
        let Some(first) = log.first_request else {
            return 0.0;
        };

        if now.saturating_duration_since(first) < self.recent_threshold {
            log.busy_since_start(now)
        } else {
            log.busy_in_window(now, self.window)
        }
    }
}

impl LoadLog {
    fn busy_since_start(&self, now: Instant) -> f64 {
        let Some(first) = self.first_request else {
            return 0.0;
        };

        let elapsed = now.saturating_duration_since(first);
        if elapsed.is_zero() {
            return 0.0;
        }
        self.total_busy.as_secs_f64() / elapsed.as_secs_f64() * 100.0
    }

    fn busy_in_window(&self, now: Instant, window: Duration) -> f64 {
        let busy: Duration = self
            .samples
            .iter()
            .filter(|s| now.saturating_duration_since(s.start_time) <= window)
            .map(|s| s.duration)
            .sum();

        busy.as_secs_f64() / window.as_secs_f64() * 100.0
    }
}
