//! Wall-clock timing of stage executions.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Measures one stage execution.
///
/// Records both the UTC start time, for the execution trace, and a
/// monotonic instant, for the duration.
#[derive(Debug)]
pub struct SpanTimer {
    name: String,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    /// Returns the timed span's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns when the timer was started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let before = Utc::now();
        let timer = SpanTimer::start("load");
        assert_eq!(timer.name(), "load");
        assert!(timer.started_at() >= before);
        assert!(timer.elapsed_ms() >= 0.0);
    }
}
