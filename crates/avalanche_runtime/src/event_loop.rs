//! Event loop manager.
//!
//! Feeds events from a source into free slots, commits finished events to
//! a sink and applies the stop and error policies at event boundaries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use avalanche_core::{CoreError, CoreResult, JobId, SlotIndex};
use avalanche_plan::{ErrorPolicy, EventLoopSettings, PrecedenceGraph, SchedulerSettings};

use crate::algorithm::AlgorithmRegistry;
use crate::dispatcher::Scheduler;
use crate::dump::ReportWriter;
use crate::event::{EventOutcome, FinishedEvent};
use crate::monitor::RunMonitor;
use crate::source::{EventSink, EventSource, SinkOrdering};
use crate::summary::RunSummary;
use crate::watchdog::Watchdog;

/// Upper bound on how long the loop waits before re-checking stop requests
const POLL: Duration = Duration::from_millis(50);

/// Cooperative stop flag, safe to set from a signal handler task
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Create an unset flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop at the next event boundary
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Commits finished events in the order the sink asks for
struct Committer<'a> {
    sink: &'a mut dyn EventSink,
    ordering: SinkOrdering,
    waiting: BTreeMap<u64, FinishedEvent>,
    next: u64,
}

impl<'a> Committer<'a> {
    fn new(sink: &'a mut dyn EventSink) -> Self {
        let ordering = sink.ordering();
        Self {
            sink,
            ordering,
            waiting: BTreeMap::new(),
            next: 0,
        }
    }

    /// Commit what can be committed and return the slots to release
    fn offer(&mut self, event: FinishedEvent, summary: &mut RunSummary) -> CoreResult<Vec<SlotIndex>> {
        if self.ordering == SinkOrdering::AnyOrder {
            summary.record(event.outcome);
            self.sink.commit(&event)?;
            return Ok(vec![event.slot]);
        }
        self.waiting.insert(event.seq, event);
        let mut slots = Vec::new();
        while let Some(event) = self.waiting.remove(&self.next) {
            summary.record(event.outcome);
            self.sink.commit(&event)?;
            slots.push(event.slot);
            self.next += 1;
        }
        Ok(slots)
    }

    fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

/// Drives a source through the scheduler into a sink
pub struct EventLoopManager {
    graph: Arc<PrecedenceGraph>,
    registry: AlgorithmRegistry,
    scheduler: SchedulerSettings,
    settings: EventLoopSettings,
    monitor: Arc<RunMonitor>,
    stop: StopHandle,
    reports: ReportWriter,
    summary: RunSummary,
}

impl EventLoopManager {
    /// Create a manager
    #[must_use]
    pub fn new(
        graph: Arc<PrecedenceGraph>,
        registry: AlgorithmRegistry,
        scheduler: SchedulerSettings,
        settings: EventLoopSettings,
    ) -> Self {
        let monitor = Arc::new(RunMonitor::new(scheduler.timeline));
        Self {
            graph,
            registry,
            scheduler,
            settings,
            monitor,
            stop: StopHandle::new(),
            reports: ReportWriter::stderr(),
            summary: RunSummary::default(),
        }
    }

    /// Share an externally owned stop flag
    #[must_use]
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Send stall dumps and timeout reports somewhere other than stderr
    #[must_use]
    pub fn with_report_writer(mut self, reports: ReportWriter) -> Self {
        self.reports = reports;
        self
    }

    /// Stop flag of this loop
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run monitor, including the timeline when enabled
    #[must_use]
    pub fn monitor(&self) -> &Arc<RunMonitor> {
        &self.monitor
    }

    /// Summary of the last run, also filled in when the run failed
    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Process events until the source is drained, `max_events` were
    /// submitted, a stop is requested or a failure ends the job
    ///
    /// # Errors
    ///
    /// - `ExternalSignal` after a stop request, once in-flight events drained
    /// - the first event failure under stop-on-error, once drained
    /// - `TimeoutExceeded` when the watchdog aborts; in-flight work is abandoned
    /// - `SchedulerStall`, `Source` and `Sink` errors immediately
    pub fn run(&mut self, source: &mut dyn EventSource, sink: &mut dyn EventSink) -> CoreResult<RunSummary> {
        let job = JobId::new();
        tracing::debug!(job = %job, "run starting");
        self.summary = RunSummary {
            job: Some(job),
            ..RunSummary::default()
        };
        let mut scheduler = Scheduler::start(
            Arc::clone(&self.graph),
            self.registry.clone(),
            &self.scheduler,
            Arc::clone(&self.monitor),
            self.reports.clone(),
        )?;
        let watchdog = Watchdog::spawn(Arc::clone(&self.monitor), &self.settings, self.reports.clone())?;

        let driven = self.drive(&mut scheduler, watchdog.as_ref(), source, sink);
        if let Some(watchdog) = watchdog {
            watchdog.stop();
        }
        let result = match driven {
            Err(err @ CoreError::TimeoutExceeded { .. }) => {
                // tasks cannot be interrupted; leave them to the detached dispatcher
                drop(scheduler);
                Err(err)
            }
            driven => {
                let finalized = scheduler.shutdown()?;
                for (alg, status) in finalized.iter().filter(|(_, s)| !s.is_success()) {
                    tracing::warn!(alg = %alg, status = ?status, "finalize did not succeed");
                }
                driven
            }
        };

        self.summary.absorb(&self.monitor);
        self.summary.log();
        result.map(|()| self.summary.clone())
    }

    fn drive(
        &mut self,
        scheduler: &mut Scheduler,
        watchdog: Option<&Watchdog>,
        source: &mut dyn EventSource,
        sink: &mut dyn EventSink,
    ) -> CoreResult<()> {
        let mut committer = Committer::new(sink);
        let mut submitted = 0_u64;
        let mut exhausted = false;
        let mut stop_reason: Option<CoreError> = None;
        let poll = self.settings.watchdog_interval().min(POLL);

        loop {
            if let Some(incident) = watchdog.and_then(Watchdog::tripped) {
                return Err(incident);
            }
            if stop_reason.is_none() && self.stop.is_stop_requested() {
                tracing::info!(submitted, "stop requested; draining in-flight events");
                self.summary.stopped_by_signal = true;
                stop_reason = Some(CoreError::ExternalSignal);
            }

            while stop_reason.is_none()
                && !exhausted
                && scheduler.has_free_slot()
                && self.settings.max_events.is_none_or(|max| submitted < max)
            {
                match source.next_event()? {
                    Some(record) => {
                        scheduler.push_new_event(record)?;
                        submitted += 1;
                    }
                    None => {
                        tracing::debug!(submitted, "source exhausted");
                        exhausted = true;
                    }
                }
            }

            if scheduler.in_progress() == 0 && committer.is_empty() {
                let feeding = stop_reason.is_none()
                    && !exhausted
                    && self.settings.max_events.is_none_or(|max| submitted < max);
                if !feeding {
                    break;
                }
            }

            let Some(event) = scheduler.pop_finished_event(poll)? else {
                continue;
            };
            if event.outcome == EventOutcome::Failed {
                let first = event.failures.first().cloned();
                tracing::warn!(
                    slot = %event.slot,
                    event = %event.event,
                    failures = event.failures.len(),
                    "event failed"
                );
                if let Some(err) = &first {
                    self.summary.first_failure.get_or_insert_with(|| err.to_string());
                }
                if event.fatal && self.scheduler.error_policy == ErrorPolicy::StopOnError && stop_reason.is_none() {
                    tracing::error!(event = %event.event, "stopping on error; draining in-flight events");
                    stop_reason = Some(first.unwrap_or_else(|| CoreError::internal("event failed")));
                }
            }
            for slot in committer.offer(event, &mut self.summary)? {
                scheduler.release_slot(slot)?;
            }
        }

        match stop_reason {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for EventLoopManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopManager")
            .field("scheduler", &self.scheduler)
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_handle_is_shared() {
        let stop = StopHandle::new();
        let other = stop.clone();
        assert!(!other.is_stop_requested());
        stop.request_stop();
        assert!(other.is_stop_requested());
    }
}
