//! Named wall-clock intervals.
//!
//! A [`TimeProfile`] is handed down through nested solves. Inner solvers
//! that keep a private profile fold it into the outer one with
//! [`TimeProfile::merge_nested`].

use std::fmt;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

/// Standard interval names.
pub mod interval {
    pub const INIT: &str = "init";
    pub const PREAMBLE: &str = "preamble";
    pub const COMPUTE: &str = "compute";
    pub const EPILOGUE: &str = "epilogue";
}

#[derive(Debug, Clone, Default)]
struct Interval {
    elapsed: Duration,
    count: usize,
    running: Option<Instant>,
}

/// Accumulator of named time intervals, in first-use order.
#[derive(Debug, Clone, Default)]
pub struct TimeProfile {
    name: String,
    intervals: IndexMap<String, Interval>,
}

impl TimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intervals: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start timing `name`. Starting a running interval is ignored.
    pub fn start(&mut self, name: &str) {
        let entry = self.intervals.entry(name.to_string()).or_default();
        if entry.running.is_some() {
            log::warn!("{}: interval '{}' already running", self.name, name);
            return;
        }
        entry.running = Some(Instant::now());
    }

    /// Stop timing `name`. Stopping an interval that is not running is ignored.
    pub fn stop(&mut self, name: &str) {
        if let Some(entry) = self.intervals.get_mut(name) {
            if let Some(t0) = entry.running.take() {
                entry.elapsed += t0.elapsed();
                entry.count += 1;
                return;
            }
        }
        log::warn!("{}: interval '{}' stopped but not running", self.name, name);
    }

    /// Time a closure under `name`.
    pub fn time<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        self.start(name);
        let out = f();
        self.stop(name);
        out
    }

    /// Whether `name` is currently running.
    pub fn is_running(&self, name: &str) -> bool {
        self.intervals
            .get(name)
            .is_some_and(|e| e.running.is_some())
    }

    /// Accumulated time in `name` (completed spans only).
    pub fn elapsed(&self, name: &str) -> Duration {
        self.intervals
            .get(name)
            .map(|e| e.elapsed)
            .unwrap_or_default()
    }

    /// Number of completed spans of `name`.
    pub fn count(&self, name: &str) -> usize {
        self.intervals.get(name).map(|e| e.count).unwrap_or(0)
    }

    /// Total time over all intervals.
    pub fn total(&self) -> Duration {
        self.intervals.values().map(|e| e.elapsed).sum()
    }

    /// Interval names and accumulated times, in first-use order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Duration, usize)> {
        self.intervals
            .iter()
            .map(|(k, e)| (k.as_str(), e.elapsed, e.count))
    }

    /// Fold `other`'s completed spans into this profile as `prefix/name`.
    pub fn merge_nested(&mut self, prefix: &str, other: &TimeProfile) {
        for (name, interval) in &other.intervals {
            if interval.count == 0 {
                continue;
            }
            let entry = self
                .intervals
                .entry(format!("{}/{}", prefix, name))
                .or_default();
            entry.elapsed += interval.elapsed;
            entry.count += interval.count;
        }
    }

    /// Drop every interval.
    pub fn reset(&mut self) {
        self.intervals.clear();
    }
}

impl fmt::Display for TimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} profile:", self.name)?;
        for (name, elapsed, count) in self.entries() {
            writeln!(
                f,
                "  {:<24} {:>12.6} s  ({} calls)",
                name,
                elapsed.as_secs_f64(),
                count
            )?;
        }
        write!(f, "  {:<24} {:>12.6} s", "total", self.total().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_counts() {
        let mut profile = TimeProfile::new("test");
        profile.start(interval::COMPUTE);
        assert!(profile.is_running(interval::COMPUTE));
        profile.stop(interval::COMPUTE);
        profile.time(interval::COMPUTE, || ());
        assert_eq!(profile.count(interval::COMPUTE), 2);
        assert!(!profile.is_running(interval::COMPUTE));
    }

    #[test]
    fn unbalanced_calls_are_ignored() {
        let mut profile = TimeProfile::new("test");
        profile.stop(interval::INIT);
        assert_eq!(profile.count(interval::INIT), 0);

        profile.start(interval::INIT);
        profile.start(interval::INIT);
        profile.stop(interval::INIT);
        profile.stop(interval::INIT);
        assert_eq!(profile.count(interval::INIT), 1);
    }

    #[test]
    fn preserves_first_use_order() {
        let mut profile = TimeProfile::new("test");
        for name in [interval::INIT, interval::PREAMBLE, interval::COMPUTE] {
            profile.time(name, || ());
        }
        profile.time(interval::INIT, || ());
        let names: Vec<_> = profile.entries().map(|(n, _, _)| n).collect();
        assert_eq!(names, vec!["init", "preamble", "compute"]);
    }

    #[test]
    fn merge_nested_prefixes_names() {
        let mut outer = TimeProfile::new("outer");
        let mut inner = TimeProfile::new("inner");
        inner.time(interval::COMPUTE, || ());
        inner.time(interval::COMPUTE, || ());
        inner.start(interval::EPILOGUE);

        outer.merge_nested("precon", &inner);
        outer.merge_nested("precon", &inner);
        assert_eq!(outer.count("precon/compute"), 4);
        assert_eq!(outer.count("precon/epilogue"), 0);
        assert!(outer.total() >= inner.elapsed(interval::COMPUTE));
    }
}
