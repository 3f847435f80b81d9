//! Event timeout watchdog.
//!
//! A background thread polls the run monitor for events running past the
//! configured timeout. Every overdue event is reported once, with the list
//! of tasks still on the workers. Entries are forgotten once their slot is
//! released, so the set stays bounded by the slot count. Tasks are never interrupted; with abort
//! enabled the watchdog only records the incident for the event loop.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use avalanche_core::{CoreError, CoreResult, EventId, SlotIndex};
use avalanche_plan::EventLoopSettings;
use indexmap::IndexSet;

use crate::dump::ReportWriter;
use crate::monitor::RunMonitor;

/// Running watchdog thread
pub struct Watchdog {
    stop: Arc<AtomicBool>,
    tripped: Arc<Mutex<Option<CoreError>>>,
    handle: Option<JoinHandle<()>>,
}

struct Sweep {
    monitor: Arc<RunMonitor>,
    timeout: Duration,
    abort: bool,
    dump_in_flight: bool,
    reports: ReportWriter,
    reported: IndexSet<(SlotIndex, EventId)>,
}

impl Sweep {
    fn check(&mut self) -> Option<CoreError> {
        let active: IndexSet<(SlotIndex, EventId)> = self.monitor.active_slots().into_iter().collect();
        self.reported.retain(|key| active.contains(key));

        let mut incident = None;
        for (slot, event, elapsed) in self.monitor.overdue(self.timeout) {
            if !self.reported.insert((slot, event)) {
                continue;
            }
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(slot = %slot, event = %event, elapsed_ms, "event timeout");
            if self.dump_in_flight {
                self.reports.write_report(&self.in_flight_report(slot, event, elapsed_ms));
            }
            if self.abort && incident.is_none() {
                incident = Some(CoreError::TimeoutExceeded { event, slot, elapsed_ms });
            }
        }
        incident
    }

    fn in_flight_report(&self, slot: SlotIndex, event: EventId, elapsed_ms: u64) -> String {
        let mut out = format!("=== event timeout: {} in {} running {} ms ===\n", event, slot, elapsed_ms);
        for task in self.monitor.in_flight().iter().filter(|t| t.slot == slot) {
            let _ = writeln!(
                out,
                "  {} on {} for {} ms{}",
                task.alg,
                task.thread,
                task.started.elapsed().as_millis(),
                task.view.map(|v| format!(" (view {})", v)).unwrap_or_default()
            );
        }
        out
    }
}

impl Watchdog {
    /// Start watching, or `None` when no timeout is configured
    ///
    /// # Errors
    ///
    /// Internal error if the thread cannot be spawned
    pub fn spawn(
        monitor: Arc<RunMonitor>,
        settings: &EventLoopSettings,
        reports: ReportWriter,
    ) -> CoreResult<Option<Self>> {
        let Some(timeout) = settings.timeout() else {
            return Ok(None);
        };
        let stop = Arc::new(AtomicBool::new(false));
        let tripped = Arc::new(Mutex::new(None));
        let interval = settings.watchdog_interval();
        let mut sweep = Sweep {
            monitor,
            timeout,
            abort: settings.abort_on_timeout,
            dump_in_flight: settings.dump_in_flight,
            reports,
            reported: IndexSet::new(),
        };

        let handle = {
            let stop = Arc::clone(&stop);
            let tripped = Arc::clone(&tripped);
            std::thread::Builder::new()
                .name("avalanche-watchdog".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        std::thread::park_timeout(interval);
                        if let Some(incident) = sweep.check() {
                            tracing::error!(error = %incident, "aborting on event timeout");
                            tripped
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(incident);
                        }
                    }
                })
                .map_err(|e| CoreError::internal(format!("cannot spawn watchdog: {}", e)))?
        };
        tracing::debug!(timeout_ms = settings.timeout_ms, "watchdog started");
        Ok(Some(Self {
            stop,
            tripped,
            handle: Some(handle),
        }))
    }

    /// The timeout that must abort the job, if one occurred
    #[must_use]
    pub fn tripped(&self) -> Option<CoreError> {
        self.tripped.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stop the thread and wait for it
    pub fn stop(mut self) {
        self.halt(true);
    }

    fn halt(&mut self, join: bool) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if join {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.halt(false);
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog").field("tripped", &self.tripped()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(abort: bool) -> EventLoopSettings {
        EventLoopSettings {
            timeout_ms: 20,
            abort_on_timeout: abort,
            watchdog_interval_ms: 5,
            ..EventLoopSettings::default()
        }
    }

    #[test]
    fn test_disabled_without_timeout() {
        let watchdog = Watchdog::spawn(
            Arc::new(RunMonitor::new(false)),
            &EventLoopSettings::default(),
            ReportWriter::sink(),
        )
        .unwrap();
        assert!(watchdog.is_none());
    }

    #[test]
    fn test_overdue_event_reported_once() {
        let monitor = Arc::new(RunMonitor::new(false));
        monitor.slot_started(SlotIndex::new(0), EventId::new(1, 9));
        monitor.task_started(1, "Sleeper", SlotIndex::new(0), EventId::new(1, 9), None);
        let (reports, buffer) = ReportWriter::capture();
        let watchdog = Watchdog::spawn(Arc::clone(&monitor), &settings(false), reports)
            .unwrap()
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        watchdog.stop();

        let text = buffer.contents();
        assert_eq!(text.matches("event timeout").count(), 1);
        assert!(text.contains("Sleeper"));
    }

    #[test]
    fn test_reported_set_pruned_on_slot_release() {
        let monitor = Arc::new(RunMonitor::new(false));
        let (reports, buffer) = ReportWriter::capture();
        let mut sweep = Sweep {
            monitor: Arc::clone(&monitor),
            timeout: Duration::ZERO,
            abort: false,
            dump_in_flight: true,
            reports,
            reported: IndexSet::new(),
        };

        for event in 1..=50 {
            monitor.slot_started(SlotIndex::new(0), EventId::new(1, event));
            std::thread::sleep(Duration::from_millis(1));
            assert!(sweep.check().is_none());
            assert_eq!(sweep.reported.len(), 1);
            monitor.slot_finished(SlotIndex::new(0));
        }
        sweep.check();
        assert!(sweep.reported.is_empty());
        assert_eq!(buffer.contents().matches("event timeout").count(), 50);
    }

    #[test]
    fn test_abort_trips() {
        let monitor = Arc::new(RunMonitor::new(false));
        monitor.slot_started(SlotIndex::new(1), EventId::new(2, 3));
        let watchdog = Watchdog::spawn(monitor, &settings(true), ReportWriter::sink())
            .unwrap()
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(matches!(
            watchdog.tripped(),
            Some(CoreError::TimeoutExceeded { slot, .. }) if slot == SlotIndex::new(1)
        ));
    }
}
