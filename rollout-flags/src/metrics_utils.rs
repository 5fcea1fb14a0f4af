use std::time::Instant;

use crate::errors::FlagError;

// Shorthand for common metric types
pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

pub fn histogram(name: &'static str, labels: &[(String, String)], value: f64) {
    metrics::histogram!(name, labels).record(value);
}

/// Counts an error under `name`, labelled with its error code.
pub fn inc_error(name: &'static str, err: &FlagError) {
    inc(name, &[("reason".to_string(), err.error_code().to_string())], 1);
}

/// Records the milliseconds between creation and drop as a histogram entry.
pub struct TimingGuard {
    name: &'static str,
    labels: Vec<(String, String)>,
    start: Instant,
}

pub fn timing_guard(name: &'static str, labels: &[(String, String)]) -> TimingGuard {
    TimingGuard {
        name,
        labels: labels.to_vec(),
        start: Instant::now(),
    }
}

impl TimingGuard {
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    /// Consumes the guard, reporting the timing now.
    pub fn fin(self) {}
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        histogram(
            self.name,
            &self.labels,
            self.start.elapsed().as_secs_f64() * 1000.0,
        );
    }
}
