//! Rate limiting for hot-path log lines.

/// Lets a log line through at most once per `every` events.
///
/// Built with [`LogThrottle::new`], the first event always logs and after that
/// only events `every`, `2·every`, ... past it do. Built with
/// [`LogThrottle::every_nth`], only the `every`th, `2·every`th, ... event logs.
/// Counting is explicit so callers and tests drive it directly.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    every: u64,
    seen: u64,
    phase: u64,
}

impl LogThrottle {
    /// `every` of 0 is treated as 1 (log everything).
    pub fn new(every: u64) -> Self {
        Self { every: every.max(1), seen: 0, phase: 0 }
    }

    /// Stay quiet until the `every`th event.
    pub fn every_nth(every: u64) -> Self {
        Self { every: every.max(1), seen: 0, phase: 1 }
    }

    /// Record one event; returns true if it should be logged.
    pub fn should_log(&mut self) -> bool {
        let log = (self.seen + self.phase) % self.every == 0;
        self.seen = self.seen.wrapping_add(1);
        log
    }

    /// Number of events recorded so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Number of events suppressed since the last one that logged.
    pub fn suppressed(&self) -> u64 {
        match self.seen {
            0 => 0,
            n => (n + self.phase - 1) % self.every,
        }
    }

    /// Forget history, as if no event had been seen.
    pub fn reset(&mut self) {
        self.seen = 0;
    }
}
