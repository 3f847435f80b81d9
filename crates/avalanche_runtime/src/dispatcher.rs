//! Dispatcher thread and the handle the event loop talks to.
//!
//! All state transitions happen on one thread. Workers run on a rayon pool
//! and hand their completions back through the same inbound channel the
//! event loop uses for commands, so the dispatcher only ever blocks on a
//! single receiver.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use avalanche_core::{CoreError, CoreResult, SlotIndex, StatusCode};
use avalanche_plan::{PrecedenceGraph, SchedulerSettings};

use crate::algorithm::AlgorithmRegistry;
use crate::dump::ReportWriter;
use crate::event::{EventRecord, FinishedEvent};
use crate::executor::{Completion, Task};
use crate::monitor::RunMonitor;
use crate::scheduler::SchedulerCore;

enum Inbound {
    Start { slot: SlotIndex, seq: u64, record: EventRecord },
    Release(SlotIndex),
    Completed(Completion),
    Shutdown,
}

enum Outbound {
    Finished(FinishedEvent),
    Fatal(CoreError),
    Stopped(Vec<(String, StatusCode)>),
}

fn build_pool(threads: usize, prefix: &'static str) -> CoreResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{}-{}", prefix, i))
        .build()
        .map_err(|e| CoreError::internal(format!("cannot build {} pool: {}", prefix, e)))
}

struct Dispatcher {
    core: SchedulerCore,
    inbound: Receiver<Inbound>,
    completions: Sender<Inbound>,
    outbound: Sender<Outbound>,
    workers: rayon::ThreadPool,
    blocking: Option<rayon::ThreadPool>,
    stall_dump: bool,
    reports: ReportWriter,
}

impl Dispatcher {
    fn run(mut self) {
        tracing::debug!(slots = self.core.slot_count(), "dispatcher started");
        let mut stopping = false;
        loop {
            if stopping && self.core.in_flight() == 0 {
                break;
            }
            if !stopping {
                if let Err(err) = self.step() {
                    self.fail(err);
                    stopping = true;
                    continue;
                }
            }
            let Ok(message) = self.inbound.recv() else {
                break;
            };
            let handled = match message {
                Inbound::Completed(done) => self.core.complete(done),
                Inbound::Start { .. } | Inbound::Release(_) if stopping => Ok(()),
                Inbound::Start { slot, seq, record } => self.core.start_event(slot, seq, record),
                Inbound::Release(slot) => self.core.release_slot(slot),
                Inbound::Shutdown => {
                    stopping = true;
                    Ok(())
                }
            };
            if let Err(err) = handled {
                if !stopping {
                    self.fail(err);
                    stopping = true;
                }
            }
        }

        let finalized = self.core.finalize();
        tracing::debug!(clones = finalized.len(), "dispatcher stopped");
        let _ = self.outbound.send(Outbound::Stopped(finalized));
    }

    /// Promote, hand out finished events and submit ready tasks
    fn step(&mut self) -> CoreResult<()> {
        let tasks = self.core.pump()?;
        for event in self.core.take_finished() {
            let _ = self.outbound.send(Outbound::Finished(event));
        }
        if tasks.is_empty() && self.core.is_stalled() {
            let report = self.core.stall_report();
            tracing::error!(detail = %report.detail, "scheduler stalled");
            if self.stall_dump {
                self.reports.write_report(&report.dump);
            }
            return Err(CoreError::SchedulerStall { detail: report.detail });
        }
        for task in tasks {
            self.submit(task);
        }
        Ok(())
    }

    fn submit(&self, task: Task) {
        let pool = match &self.blocking {
            Some(blocking) if self.core.is_blocking(task.alg) => blocking,
            _ => &self.workers,
        };
        let graph = Arc::clone(self.core.graph());
        let conditions = Arc::clone(self.core.conditions());
        let monitor = Arc::clone(self.core.monitor());
        let completions = self.completions.clone();
        tracing::trace!(alg = %graph.name(task.alg), slot = %task.slot, event = %task.event, "task submitted");
        pool.spawn(move || {
            let done = task.run(&graph, &conditions, &monitor);
            let _ = completions.send(Inbound::Completed(done));
        });
    }

    fn fail(&self, err: CoreError) {
        tracing::error!(error = %err, "dispatcher failed");
        let _ = self.outbound.send(Outbound::Fatal(err));
    }
}

/// Handle on a running dispatcher
///
/// Tracks free slots and submission order on the caller's side; every
/// state change goes through the dispatcher thread.
pub struct Scheduler {
    inbound: Sender<Inbound>,
    outbound: Receiver<Outbound>,
    monitor: Arc<RunMonitor>,
    free: Vec<SlotIndex>,
    next_seq: u64,
    in_progress: usize,
    fatal: Option<CoreError>,
    finalized: Option<Vec<(String, StatusCode)>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Initialize the algorithms and start the dispatcher thread
    ///
    /// # Errors
    ///
    /// `Configuration` if an algorithm cannot be created or initialized;
    /// internal error if a thread cannot be spawned
    pub fn start(
        graph: Arc<PrecedenceGraph>,
        registry: AlgorithmRegistry,
        settings: &SchedulerSettings,
        monitor: Arc<RunMonitor>,
        reports: ReportWriter,
    ) -> CoreResult<Self> {
        let core = SchedulerCore::new(graph, registry, settings, Arc::clone(&monitor))?;
        let slots = core.slot_count();
        let threads = settings.resolved_threads().max(1);
        let workers = build_pool(threads, "avalanche-worker")?;
        let blocking = if settings.blocking_threads > 0 {
            Some(build_pool(settings.blocking_threads, "avalanche-io")?)
        } else {
            None
        };

        let (in_tx, in_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::channel();
        let dispatcher = Dispatcher {
            core,
            inbound: in_rx,
            completions: in_tx.clone(),
            outbound: out_tx,
            workers,
            blocking,
            stall_dump: settings.stall_dump,
            reports,
        };
        let handle = std::thread::Builder::new()
            .name("avalanche-dispatcher".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|e| CoreError::internal(format!("cannot spawn dispatcher: {}", e)))?;
        tracing::info!(threads, slots, blocking_threads = settings.blocking_threads, "scheduler started");

        Ok(Self {
            inbound: in_tx,
            outbound: out_rx,
            monitor,
            free: (0..slots).rev().map(SlotIndex::from_usize).collect(),
            next_seq: 0,
            in_progress: 0,
            fatal: None,
            finalized: None,
            handle: Some(handle),
        })
    }

    /// Run monitor shared with the dispatcher
    #[must_use]
    pub fn monitor(&self) -> &Arc<RunMonitor> {
        &self.monitor
    }

    /// Whether an event can be pushed
    #[must_use]
    pub fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    /// Events pushed and not yet popped
    #[must_use]
    pub fn in_progress(&self) -> usize {
        self.in_progress
    }

    fn send(&self, message: Inbound) -> CoreResult<()> {
        self.inbound
            .send(message)
            .map_err(|_| self.fatal.clone().unwrap_or_else(|| CoreError::internal("dispatcher has exited")))
    }

    /// Hand an event to the scheduler in the lowest free slot
    ///
    /// Returns the slot and the event's position in submission order.
    ///
    /// # Errors
    ///
    /// Internal error when no slot is free or the dispatcher has exited
    pub fn push_new_event(&mut self, record: EventRecord) -> CoreResult<(SlotIndex, u64)> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        let slot = self
            .free
            .pop()
            .ok_or_else(|| CoreError::internal("no free slot"))?;
        let seq = self.next_seq;
        tracing::trace!(slot = %slot, event = %record.id, seq, "event pushed");
        self.send(Inbound::Start { slot, seq, record })?;
        self.next_seq += 1;
        self.in_progress += 1;
        Ok((slot, seq))
    }

    /// Wait up to `timeout` for a finished event
    ///
    /// # Errors
    ///
    /// The dispatcher's fatal error, such as `SchedulerStall`
    pub fn pop_finished_event(&mut self, timeout: Duration) -> CoreResult<Option<FinishedEvent>> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        match self.outbound.recv_timeout(timeout) {
            Ok(Outbound::Finished(event)) => {
                self.in_progress = self.in_progress.saturating_sub(1);
                Ok(Some(event))
            }
            Ok(Outbound::Fatal(err)) => {
                self.fatal = Some(err.clone());
                Err(err)
            }
            Ok(Outbound::Stopped(finalized)) => {
                self.finalized = Some(finalized);
                Err(CoreError::internal("dispatcher stopped"))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::internal("dispatcher has exited")),
        }
    }

    /// Return a committed event's slot
    ///
    /// # Errors
    ///
    /// Internal error if the dispatcher has exited
    pub fn release_slot(&mut self, slot: SlotIndex) -> CoreResult<()> {
        self.send(Inbound::Release(slot))?;
        self.free.push(slot);
        // lowest slot first
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        Ok(())
    }

    /// Wait for in-flight tasks, finalize every clone and stop the thread
    ///
    /// Returns the finalize status of every clone.
    ///
    /// # Errors
    ///
    /// Internal error if the dispatcher thread panicked
    pub fn shutdown(mut self) -> CoreResult<Vec<(String, StatusCode)>> {
        let _ = self.inbound.send(Inbound::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| CoreError::internal("dispatcher thread panicked"))?;
        }
        while let Ok(message) = self.outbound.try_recv() {
            if let Outbound::Stopped(finalized) = message {
                self.finalized = Some(finalized);
            }
        }
        Ok(self.finalized.take().unwrap_or_default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // a dropped handle detaches; the dispatcher still drains its tasks
        if self.handle.take().is_some() {
            let _ = self.inbound.send(Inbound::Shutdown);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("free", &self.free.len())
            .field("in_progress", &self.in_progress)
            .field("fatal", &self.fatal)
            .finish()
    }
}
