//! Run summary returned by the event loop.

use avalanche_core::{CoreError, CoreResult, JobId};
use indexmap::IndexMap;
use serde::Serialize;

use crate::event::EventOutcome;
use crate::monitor::{AlgorithmStats, Metrics, RunMonitor};

/// Totals of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Identifier of the run, assigned when it starts
    pub job: Option<JobId>,
    /// Events committed
    pub events: u64,
    /// Events accepted
    pub accepted: u64,
    /// Events rejected
    pub rejected: u64,
    /// Events failed
    pub failed: u64,
    /// The run ended on a stop request
    pub stopped_by_signal: bool,
    /// Wall time in milliseconds
    pub elapsed_ms: u64,
    /// Task metrics
    pub metrics: Metrics,
    /// Per-algorithm execution statistics
    pub algorithms: IndexMap<String, AlgorithmStats>,
    /// First error that failed an event
    pub first_failure: Option<String>,
}

impl RunSummary {
    /// Count one committed event
    pub fn record(&mut self, outcome: EventOutcome) {
        self.events += 1;
        match outcome {
            EventOutcome::Accepted => self.accepted += 1,
            EventOutcome::Rejected => self.rejected += 1,
            EventOutcome::Failed => self.failed += 1,
        }
    }

    /// Take the metrics and timings from the monitor
    pub fn absorb(&mut self, monitor: &RunMonitor) {
        self.elapsed_ms = u64::try_from(monitor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics = monitor.metrics();
        self.algorithms = monitor.algorithm_stats();
    }

    /// Log the totals
    pub fn log(&self) {
        tracing::info!(
            job = %self.job.map(|j| j.to_string()).unwrap_or_default(),
            events = self.events,
            accepted = self.accepted,
            rejected = self.rejected,
            failed = self.failed,
            tasks = self.metrics.tasks_executed,
            skipped = self.metrics.algorithms_skipped,
            elapsed_ms = self.elapsed_ms,
            stopped_by_signal = self.stopped_by_signal,
            "run finished"
        );
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self).map_err(CoreError::internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let mut summary = RunSummary::default();
        summary.record(EventOutcome::Accepted);
        summary.record(EventOutcome::Rejected);
        summary.record(EventOutcome::Accepted);
        assert_eq!((summary.events, summary.accepted, summary.rejected), (3, 2, 1));

        let json = summary.to_json().unwrap();
        assert!(json.contains("\"accepted\": 2"));
        assert!(json.contains("\"job\": null"));
    }
}
