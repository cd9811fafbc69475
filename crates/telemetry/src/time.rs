use crate::sinks::SearchMetricsSink;
use std::time::Instant;

/// RAII timer that reports the duration of a search scope on drop.
pub struct SearchTimer<'a> {
    sink: &'a dyn SearchMetricsSink,
    arm: &'static str,
    start: Instant,
}

impl<'a> SearchTimer<'a> {
    /// Starts a timer for the given arm label.
    pub fn new(sink: &'a dyn SearchMetricsSink, arm: &'static str) -> Self {
        Self {
            sink,
            arm,
            start: Instant::now(),
        }
    }
}

impl Drop for SearchTimer<'_> {
    fn drop(&mut self) {
        self.sink
            .observe_search_duration(self.arm, self.start.elapsed().as_secs_f64());
    }
}
