//! Subcommand implementations.
//!
//! Each command returns the process exit code. Job failures are reported
//! and mapped through the job's exit code table; only I/O problems of the
//! launcher itself surface as errors.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use avalanche_core::{CoreError, ExitCodes};
use avalanche_plan::{render, ErrorPolicy, JobConfig};
use avalanche_runtime::{Application, EventSink, FinishedEvent, SinkOrdering, StopHandle};
use clap::{Args, ValueEnum};
use color_eyre::Result;

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Indented control-flow tree and data dependencies
    Text,
    /// Graphviz DOT of the joint precedence graph
    Dot,
}

/// Error policy as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Drain in-flight events and fail the job
    StopOnError,
    /// Mark the event failed and keep going
    ContinueOnError,
}

impl From<PolicyArg> for ErrorPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::StopOnError => Self::StopOnError,
            PolicyArg::ContinueOnError => Self::ContinueOnError,
        }
    }
}

/// Arguments of `avalanche run`
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to job file
    #[arg(short, long)]
    pub file: PathBuf,
    /// Worker threads (0 = available parallelism)
    #[arg(short, long)]
    pub threads: Option<usize>,
    /// Concurrent event slots
    #[arg(short, long)]
    pub slots: Option<usize>,
    /// Events generated by the source
    #[arg(short, long)]
    pub events: Option<u64>,
    /// Stop after this many events
    #[arg(long)]
    pub max_events: Option<u64>,
    /// Failure handling
    #[arg(long, value_enum)]
    pub error_policy: Option<PolicyArg>,
    /// Per-event timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Abort the job when an event times out
    #[arg(long)]
    pub abort_on_timeout: bool,
    /// Commit events in submission order
    #[arg(long)]
    pub in_order: bool,
    /// Write per-task timings as CSV
    #[arg(long)]
    pub timeline: Option<PathBuf>,
    /// Write the run summary as JSON here instead of stdout
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl RunArgs {
    /// Fold the command-line overrides into a job
    pub fn apply(&self, config: &mut JobConfig) {
        if let Some(threads) = self.threads {
            config.scheduler.threads = threads;
        }
        if let Some(slots) = self.slots {
            config.scheduler.slots = slots;
        }
        if let Some(events) = self.events {
            config.source.count = events;
        }
        if let Some(max) = self.max_events {
            config.event_loop.max_events = Some(max);
        }
        if let Some(policy) = self.error_policy {
            config.scheduler.error_policy = policy.into();
        }
        if let Some(timeout) = self.timeout_ms {
            config.event_loop.timeout_ms = timeout;
        }
        if self.abort_on_timeout {
            config.event_loop.abort_on_timeout = true;
        }
        if self.timeline.is_some() {
            config.scheduler.timeline = true;
        }
    }
}

/// Sink logging every committed event
struct LogSink {
    ordering: SinkOrdering,
}

impl EventSink for LogSink {
    fn ordering(&self) -> SinkOrdering {
        self.ordering
    }

    fn commit(&mut self, event: &FinishedEvent) -> avalanche_core::CoreResult<()> {
        tracing::debug!(
            slot = %event.slot,
            event = %event.event,
            outcome = %event.outcome,
            elapsed_us = u64::try_from(event.elapsed.as_micros()).unwrap_or(u64::MAX),
            "event committed"
        );
        Ok(())
    }
}

fn load(path: &Path) -> Result<JobConfig, CoreError> {
    JobConfig::from_path(path).map_err(CoreError::from)
}

/// Log a job failure and pick its exit code
fn report(err: &CoreError, codes: &ExitCodes) -> i32 {
    match err {
        CoreError::Configuration { errors } => {
            for error in errors {
                eprintln!("error: {}", error);
            }
        }
        other => eprintln!("error: {}", other),
    }
    tracing::error!(error = %err, fatal = err.is_fatal(), "job failed");
    err.exit_code(codes)
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn watch_signals(stop: StopHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::warn!("interrupt received; finishing in-flight events");
            stop.request_stop();
        }
        Err(e) => tracing::warn!(error = %e, "cannot listen for interrupts"),
    }
}

/// `avalanche run`
///
/// # Errors
///
/// Returns an error if the timeline or summary cannot be written
pub async fn run(args: RunArgs) -> Result<i32> {
    let mut config = match load(&args.file) {
        Ok(config) => config,
        Err(e) => return Ok(report(&e, &ExitCodes::default())),
    };
    args.apply(&mut config);
    let codes = config.exit_codes;
    let app = match Application::with_builtins(config) {
        Ok(app) => app,
        Err(e) => return Ok(report(&e, &codes)),
    };
    tracing::info!(
        file = %args.file.display(),
        threads = app.config().scheduler.resolved_threads(),
        slots = app.config().scheduler.slots,
        events = app.config().source.count,
        "starting job"
    );

    let stop = StopHandle::new();
    let signals = tokio::spawn(watch_signals(stop.clone()));
    let mut manager = app.event_loop().with_stop_handle(stop);
    let mut source = app.source();
    let mut sink = LogSink {
        ordering: if args.in_order { SinkOrdering::InOrder } else { SinkOrdering::AnyOrder },
    };
    let (manager, result) = tokio::task::spawn_blocking(move || {
        let result = manager.run(&mut source, &mut sink);
        (manager, result)
    })
    .await?;
    signals.abort();

    if let Some(path) = &args.timeline {
        let mut out = BufWriter::new(File::create(path)?);
        manager.monitor().write_timeline_csv(&mut out)?;
        out.flush()?;
        tracing::info!(path = %path.display(), "timeline written");
    }
    let mut summary = manager.summary().to_json()?;
    summary.push('\n');
    write_output(args.summary.as_deref(), &summary)?;

    Ok(match result {
        Ok(_) => codes.success,
        Err(e) => report(&e, &codes),
    })
}

/// `avalanche check`
///
/// # Errors
///
/// Never fails; configuration problems are reported through the exit code
pub fn check(path: &Path) -> Result<i32> {
    let config = match load(path) {
        Ok(config) => config,
        Err(e) => return Ok(report(&e, &ExitCodes::default())),
    };
    let codes = config.exit_codes;
    match Application::with_builtins(config) {
        Ok(app) => {
            let graph = app.graph();
            println!(
                "{}: ok ({} algorithms, {} control-flow nodes, {} conditions producers)",
                path.display(),
                graph.alg_count(),
                graph.node_count(),
                graph.conditions_algorithms().len()
            );
            Ok(codes.success)
        }
        Err(e) => Ok(report(&e, &codes)),
    }
}

/// `avalanche graph`
///
/// # Errors
///
/// Returns an error if the output cannot be written
pub fn graph(path: &Path, format: GraphFormat, output: Option<&Path>) -> Result<i32> {
    let config = match load(path) {
        Ok(config) => config,
        Err(e) => return Ok(report(&e, &ExitCodes::default())),
    };
    let graph = match config.precedence_graph() {
        Ok(graph) => graph,
        Err(e) => return Ok(report(&e, &config.exit_codes)),
    };
    let text = match format {
        GraphFormat::Text => render::text(&graph),
        GraphFormat::Dot => render::dot(&graph),
    };
    write_output(output, &text)?;
    Ok(config.exit_codes.success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CHAIN: &str = r#"{
        "scheduler": {"threads": 2, "slots": 2},
        "source": {"count": 4, "provides": ["/Event/raw"]},
        "algorithms": [
            {"name": "Unpack", "type": "CpuCruncher", "inputs": ["raw"], "outputs": ["hits"]},
            {"name": "Fit", "type": "CpuCruncher", "inputs": ["hits"], "outputs": ["tracks"],
             "properties": {"work_us": 50}}
        ],
        "control_flow": {"kind": "seq", "name": "reco", "children": ["Unpack", "Fit"]}
    }"#;

    const CYCLE: &str = r#"{
        "algorithms": [
            {"name": "A", "type": "CpuCruncher", "inputs": ["b"], "outputs": ["a"]},
            {"name": "B", "type": "CpuCruncher", "inputs": ["a"], "outputs": ["b"]}
        ],
        "control_flow": {"kind": "par", "children": ["A", "B"]}
    }"#;

    fn job_file(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn run_args(file: PathBuf) -> RunArgs {
        RunArgs {
            file,
            threads: None,
            slots: None,
            events: None,
            max_events: None,
            error_policy: None,
            timeout_ms: None,
            abort_on_timeout: false,
            in_order: false,
            timeline: None,
            summary: None,
        }
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = JobConfig::from_json(CHAIN).unwrap();
        let args = RunArgs {
            threads: Some(1),
            events: Some(7),
            error_policy: Some(PolicyArg::ContinueOnError),
            timeline: Some(PathBuf::from("t.csv")),
            ..run_args(PathBuf::from("job.json"))
        };
        args.apply(&mut config);
        assert_eq!(config.scheduler.threads, 1);
        assert_eq!(config.scheduler.slots, 2);
        assert_eq!(config.source.count, 7);
        assert_eq!(config.scheduler.error_policy, ErrorPolicy::ContinueOnError);
        assert!(config.scheduler.timeline);
    }

    #[test]
    fn test_check_reports_exit_codes() {
        let dir = TempDir::new().unwrap();
        assert_eq!(check(&job_file(&dir, "chain.json", CHAIN)).unwrap(), 0);
        assert_eq!(check(&job_file(&dir, "cycle.json", CYCLE)).unwrap(), 2);
        assert_eq!(check(&job_file(&dir, "broken.json", "{\"scheduler\": 3}")).unwrap(), 2);
        assert_eq!(check(&dir.path().join("missing.json")).unwrap(), 2);
    }

    #[test]
    fn test_graph_writes_dot() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("graph.dot");
        let code = graph(&job_file(&dir, "chain.json", CHAIN), GraphFormat::Dot, Some(&out)).unwrap();
        assert_eq!(code, 0);
        let dot = std::fs::read_to_string(out).unwrap();
        assert!(dot.starts_with("digraph avalanche"));
        assert!(dot.contains("Unpack"));
        assert!(dot.contains("/Event/hits"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_writes_summary_and_timeline() {
        let dir = TempDir::new().unwrap();
        let timeline = dir.path().join("timeline.csv");
        let summary = dir.path().join("summary.json");
        let args = RunArgs {
            timeline: Some(timeline.clone()),
            summary: Some(summary.clone()),
            in_order: true,
            ..run_args(job_file(&dir, "chain.json", CHAIN))
        };
        assert_eq!(run(args).await.unwrap(), 0);

        let summary: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(summary).unwrap()).unwrap();
        assert_eq!(summary["events"], 4);
        assert_eq!(summary["accepted"], 4);
        assert_eq!(summary["algorithms"]["Fit"]["executions"], 4);

        let csv = std::fs::read_to_string(timeline).unwrap();
        assert!(csv.starts_with("alg,slot,run,event"));
        assert_eq!(csv.lines().count(), 1 + 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_failure_maps_to_exit_code() {
        let dir = TempDir::new().unwrap();
        let failing = CHAIN.replace("{\"work_us\": 50}", "{\"fail_on\": [2]}");
        let args = RunArgs {
            summary: Some(dir.path().join("summary.json")),
            ..run_args(job_file(&dir, "fail.json", &failing))
        };
        assert_eq!(run(args).await.unwrap(), 3);
    }
}
