//! Diagnostic reports for stalls and timeouts.

use std::fmt::Write as _;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use avalanche_core::AlgState;

use crate::scheduler::{InputStatus, SchedulerCore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared destination for diagnostic reports
#[derive(Clone)]
pub struct ReportWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl ReportWriter {
    /// Write reports to any writer
    #[must_use]
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(out))))
    }

    /// Write reports to standard error
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    /// Discard reports
    #[must_use]
    pub fn sink() -> Self {
        Self::new(std::io::sink())
    }

    /// Write reports to an in-memory buffer
    #[must_use]
    pub fn capture() -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Write one report
    ///
    /// Reports are best effort; I/O errors are logged and dropped.
    pub fn write_report(&self, text: &str) {
        let mut out = lock(&self.0);
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            tracing::warn!(error = %e, "cannot write diagnostic report");
        }
    }
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self::stderr()
    }
}

impl std::fmt::Debug for ReportWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReportWriter")
    }
}

/// In-memory report buffer
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Why the scheduler stopped making progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StallReport {
    /// One line per stalled slot, naming what each waiting algorithm lacks
    pub detail: String,
    /// Full per-slot state dump
    pub dump: String,
}

pub(crate) fn stall_report(core: &SchedulerCore) -> StallReport {
    let graph = core.graph();
    let mut detail = Vec::new();
    let mut dump = String::from("=== scheduler stall ===\n");

    for slot in core.slots().iter().filter(|s| s.is_active()) {
        let Some(event) = slot.event else {
            continue;
        };
        let si = slot.index.as_usize();
        let mut waits = Vec::new();
        let _ = writeln!(
            dump,
            "{} {} (seq {}, running {} ms, failures {})",
            slot.index,
            event,
            slot.seq,
            slot.started.elapsed().as_millis(),
            slot.failures.len()
        );

        for (t, traversal) in slot.traversals.iter().enumerate() {
            if traversal.finished {
                continue;
            }
            let _ = writeln!(
                dump,
                "  traversal {} scope {}{}",
                t,
                graph.node(traversal.scope).name,
                traversal.view.map(|v| format!(" view {}", v)).unwrap_or_default()
            );
            let conditions = if t == 0 { graph.conditions_algorithms() } else { &[] };
            for alg in graph.scope_algorithms(traversal.scope).iter().chain(conditions) {
                let state = traversal.state(*alg);
                let name = graph.name(*alg);
                let note = match state {
                    AlgState::ControlReady => match core.input_status(si, t, *alg) {
                        Ok(InputStatus::Pending(path)) => {
                            waits.push(format!("{} waits for {}", name, path));
                            format!("missing {}", path)
                        }
                        _ => String::new(),
                    },
                    AlgState::Initial => {
                        waits.push(format!("{} waits on control flow", name));
                        String::new()
                    }
                    _ => String::new(),
                };
                let _ = writeln!(dump, "    {:<24} {:<14} {}", name, state, note);
            }
            let _ = writeln!(dump, "    control flow:");
            for node in graph
                .nodes()
                .iter()
                .filter(|n| n.index == traversal.scope || graph.scope_of(n.index) == traversal.scope)
                .filter(|n| n.alg().is_none())
            {
                let _ = writeln!(
                    dump,
                    "      {}{:<20} {}",
                    "  ".repeat(node.depth as usize),
                    node.name,
                    traversal.cf.decision(node.index)
                );
            }
        }
        if waits.is_empty() {
            waits.push("nothing runnable".to_string());
        }
        detail.push(format!("{} {}: {}", slot.index, event, waits.join(", ")));
    }

    StallReport {
        detail: detail.join("; "),
        dump,
    }
}
