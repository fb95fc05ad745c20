use std::time::Duration;

/// Execution counters for one event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookMetrics {
    /// Handler runs that finished (successfully or not)
    pub executions: u64,
    pub errors: u64,
    /// Async runs that outlived their timeout
    pub timeouts: u64,
    pub total_time: Duration,
}

impl HookMetrics {
    pub fn average_time(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        self.total_time / self.executions.min(u64::from(u32::MAX)) as u32
    }

    pub(crate) fn record(&mut self, elapsed: Duration, failed: bool) {
        self.executions += 1;
        self.total_time += elapsed;
        if failed {
            self.errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_time() {
        let mut metrics = HookMetrics::default();
        assert_eq!(metrics.average_time(), Duration::ZERO);

        metrics.record(Duration::from_millis(10), false);
        metrics.record(Duration::from_millis(30), true);
        assert_eq!(metrics.executions, 2);
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.average_time(), Duration::from_millis(20));
    }
}
