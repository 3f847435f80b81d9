//! Run monitor for metrics, in-flight tracking and the task timeline.
//!
//! Shared between the dispatcher, the worker threads and the watchdog, so
//! every table sits behind its own lock.

use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use avalanche_core::{AlgState, EventId, SlotIndex};
use indexmap::IndexMap;
use serde::Serialize;

/// Execution metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Tasks executed
    pub tasks_executed: u64,
    /// Tasks that finished accepted
    pub tasks_accepted: u64,
    /// Tasks that finished rejected by their filter
    pub tasks_rejected: u64,
    /// Tasks that failed
    pub tasks_failed: u64,
    /// Algorithms skipped by control flow
    pub algorithms_skipped: u64,
    /// Events started
    pub events_started: u64,
    /// Events finished
    pub events_finished: u64,
}

impl Metrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal state of an executed task
    pub fn record_task(&mut self, state: AlgState) {
        self.tasks_executed += 1;
        match state {
            AlgState::EvtAccepted => self.tasks_accepted += 1,
            AlgState::EvtRejected => self.tasks_rejected += 1,
            _ => self.tasks_failed += 1,
        }
    }

    /// Record a skipped algorithm
    pub fn record_skip(&mut self) {
        self.algorithms_skipped += 1;
    }

    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.tasks_executed == 0 {
            return 1.0;
        }
        (self.tasks_accepted + self.tasks_rejected) as f64 / self.tasks_executed as f64
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.tasks_executed == 0 {
            return 0.0;
        }
        self.tasks_failed as f64 / self.tasks_executed as f64
    }
}

/// Accumulated execution time of one algorithm
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlgorithmStats {
    /// Executions
    pub executions: u64,
    /// Failed executions
    pub failures: u64,
    /// Total wall time in microseconds
    pub total_us: u64,
    /// Longest single execution in microseconds
    pub max_us: u64,
}

/// A task currently running on a worker
#[derive(Debug, Clone)]
pub struct TaskInfo {
    /// Algorithm name
    pub alg: String,
    /// Slot
    pub slot: SlotIndex,
    /// Event
    pub event: EventId,
    /// View position, if inside a view
    pub view: Option<usize>,
    /// Worker thread name
    pub thread: String,
    /// Start time
    pub started: Instant,
}

/// One executed task
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    /// Algorithm name
    pub alg: String,
    /// Slot
    pub slot: u32,
    /// Event
    pub event: EventId,
    /// View position, if inside a view
    pub view: Option<usize>,
    /// Worker thread name
    pub thread: String,
    /// Start offset from the monitor start, in microseconds
    pub start_us: u64,
    /// End offset from the monitor start, in microseconds
    pub end_us: u64,
    /// Terminal state
    pub state: AlgState,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Run monitor
pub struct RunMonitor {
    start_time: Instant,
    metrics: Mutex<Metrics>,
    per_alg: Mutex<IndexMap<String, AlgorithmStats>>,
    tasks: Mutex<IndexMap<u64, TaskInfo>>,
    slots: Mutex<IndexMap<SlotIndex, (EventId, Instant)>>,
    timeline: Option<Mutex<Vec<TimelineEntry>>>,
    max_timeline: usize,
}

impl RunMonitor {
    /// Create a monitor; the timeline is kept only when enabled
    #[must_use]
    pub fn new(timeline: bool) -> Self {
        Self {
            start_time: Instant::now(),
            metrics: Mutex::new(Metrics::new()),
            per_alg: Mutex::new(IndexMap::new()),
            tasks: Mutex::new(IndexMap::new()),
            slots: Mutex::new(IndexMap::new()),
            timeline: timeline.then(|| Mutex::new(Vec::new())),
            max_timeline: 1_000_000,
        }
    }

    /// Cap the number of timeline entries kept
    #[must_use]
    pub fn with_max_timeline(mut self, max: usize) -> Self {
        self.max_timeline = max;
        self
    }

    /// Time since the monitor was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Snapshot of the metrics
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        lock(&self.metrics).clone()
    }

    /// Snapshot of per-algorithm statistics
    #[must_use]
    pub fn algorithm_stats(&self) -> IndexMap<String, AlgorithmStats> {
        lock(&self.per_alg).clone()
    }

    /// Record a task start on the current thread
    pub fn task_started(&self, id: u64, alg: &str, slot: SlotIndex, event: EventId, view: Option<usize>) {
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        lock(&self.tasks).insert(
            id,
            TaskInfo {
                alg: alg.to_string(),
                slot,
                event,
                view,
                thread,
                started: Instant::now(),
            },
        );
    }

    /// Record a task end with its final state
    ///
    /// Called by the dispatcher once output checks are done, with the time
    /// the worker returned.
    pub fn task_finished(&self, id: u64, state: AlgState, end: Instant) {
        let Some(info) = lock(&self.tasks).swap_remove(&id) else {
            return;
        };
        let took = micros(end.duration_since(info.started));
        lock(&self.metrics).record_task(state);
        {
            let mut per_alg = lock(&self.per_alg);
            let stats = per_alg.entry(info.alg.clone()).or_default();
            stats.executions += 1;
            stats.total_us += took;
            stats.max_us = stats.max_us.max(took);
            if state == AlgState::Error {
                stats.failures += 1;
            }
        }
        if let Some(timeline) = &self.timeline {
            let mut timeline = lock(timeline);
            if timeline.len() < self.max_timeline {
                timeline.push(TimelineEntry {
                    start_us: micros(info.started.duration_since(self.start_time)),
                    end_us: micros(end.duration_since(self.start_time)),
                    alg: info.alg,
                    slot: info.slot.as_u32(),
                    event: info.event,
                    view: info.view,
                    thread: info.thread,
                    state,
                });
            }
        }
    }

    /// Record an algorithm skipped by control flow
    pub fn algorithm_skipped(&self) {
        lock(&self.metrics).record_skip();
    }

    /// Tasks currently running, oldest first
    #[must_use]
    pub fn in_flight(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = lock(&self.tasks).values().cloned().collect();
        tasks.sort_by_key(|t| t.started);
        tasks
    }

    /// Record an event entering a slot
    pub fn slot_started(&self, slot: SlotIndex, event: EventId) {
        lock(&self.metrics).events_started += 1;
        lock(&self.slots).insert(slot, (event, Instant::now()));
    }

    /// Record an event leaving a slot
    pub fn slot_finished(&self, slot: SlotIndex) {
        lock(&self.metrics).events_finished += 1;
        lock(&self.slots).swap_remove(&slot);
    }

    /// Slots currently holding an event
    #[must_use]
    pub fn active_slots(&self) -> Vec<(SlotIndex, EventId)> {
        lock(&self.slots).iter().map(|(slot, (event, _))| (*slot, *event)).collect()
    }

    /// Events running longer than `timeout`
    #[must_use]
    pub fn overdue(&self, timeout: Duration) -> Vec<(SlotIndex, EventId, Duration)> {
        let now = Instant::now();
        let mut overdue: Vec<_> = lock(&self.slots)
            .iter()
            .filter_map(|(slot, (event, started))| {
                let elapsed = now.duration_since(*started);
                (elapsed > timeout).then_some((*slot, *event, elapsed))
            })
            .collect();
        overdue.sort_by_key(|(slot, _, _)| *slot);
        overdue
    }

    /// Recorded timeline, empty when disabled
    #[must_use]
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.timeline.as_ref().map(|t| lock(t).clone()).unwrap_or_default()
    }

    /// Write the timeline as CSV
    ///
    /// # Errors
    ///
    /// Returns the writer's I/O error
    pub fn write_timeline_csv(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "alg,slot,run,event,view,thread,start_us,end_us,state")?;
        for e in self.timeline() {
            writeln!(
                out,
                "{},{},{},{},{},{},{},{},{}",
                e.alg,
                e.slot,
                e.event.run,
                e.event.event,
                e.view.map(|v| v.to_string()).unwrap_or_default(),
                e.thread,
                e.start_us,
                e.end_us,
                e.state
            )?;
        }
        Ok(())
    }
}

impl Default for RunMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for RunMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunMonitor")
            .field("metrics", &self.metrics())
            .field("timeline", &self.timeline.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_rates() {
        let mut metrics = Metrics::new();
        assert_eq!(metrics.success_rate(), 1.0);
        metrics.record_task(AlgState::EvtAccepted);
        metrics.record_task(AlgState::EvtRejected);
        metrics.record_task(AlgState::Error);
        metrics.record_task(AlgState::EvtAccepted);
        assert_eq!(metrics.tasks_executed, 4);
        assert_eq!(metrics.success_rate(), 0.75);
        assert_eq!(metrics.failure_rate(), 0.25);
    }

    #[test]
    fn test_task_tracking() {
        let monitor = RunMonitor::new(true);
        let event = EventId::new(1, 5);
        monitor.task_started(7, "Fit", SlotIndex::new(1), event, None);
        let running = monitor.in_flight();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].alg, "Fit");

        monitor.task_finished(7, AlgState::EvtAccepted, Instant::now());
        assert!(monitor.in_flight().is_empty());
        assert_eq!(monitor.metrics().tasks_accepted, 1);
        assert_eq!(monitor.algorithm_stats()["Fit"].executions, 1);

        let timeline = monitor.timeline();
        assert_eq!(timeline.len(), 1);
        assert!(timeline[0].end_us >= timeline[0].start_us);

        let mut csv = Vec::new();
        monitor.write_timeline_csv(&mut csv).unwrap();
        let text = String::from_utf8(csv).unwrap();
        assert!(text.starts_with("alg,slot,run,event"));
        assert!(text.contains("Fit,1,1,5,,"));
        assert!(text.trim_end().ends_with("EVTACCEPTED"));
    }

    #[test]
    fn test_timeline_disabled() {
        let monitor = RunMonitor::new(false);
        monitor.task_started(1, "A", SlotIndex::new(0), EventId::new(1, 1), None);
        monitor.task_finished(1, AlgState::Error, Instant::now());
        assert!(monitor.timeline().is_empty());
        assert_eq!(monitor.algorithm_stats()["A"].failures, 1);
    }

    #[test]
    fn test_overdue_slots() {
        let monitor = RunMonitor::new(false);
        monitor.slot_started(SlotIndex::new(0), EventId::new(1, 1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(monitor.overdue(Duration::from_millis(1)).len(), 1);
        assert!(monitor.overdue(Duration::from_secs(60)).is_empty());
        monitor.slot_finished(SlotIndex::new(0));
        assert!(monitor.overdue(Duration::ZERO).is_empty());
        assert_eq!(monitor.metrics().events_finished, 1);
    }
}
