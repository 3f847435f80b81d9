//! End-to-end scheduling scenarios driven through the event loop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use avalanche_core::{AlgState, CoreError, CoreResult, EventId, ExitCodes, StatusCode};
use avalanche_plan::{
    AlgorithmDescriptor, CfSpec, DataPath, ErrorPolicy, EventLoopSettings, JobConfig, SchedulerSettings, ViewCombine,
    ViewSpec,
};
use avalanche_runtime::{
    AlgResult, Algorithm, AlgorithmRegistry, Application, EventContext, EventRecord, EventSink, EventSource,
    FinishedEvent, OutcomeLog, ReportWriter, RunSummary, SharedBuffer, StopHandle, VecSource,
};
use avalanche_store::{DataObject, ViewSeed, ViewSet};
use serde::Deserialize;

/// (event, algorithm, view) per invocation, in start order
type Trace = Arc<Mutex<Vec<(u64, String, Option<usize>)>>>;

/// Start and end tick of one invocation
#[derive(Debug, Clone)]
struct Span {
    event: u64,
    name: String,
    view: Option<usize>,
    start: usize,
    end: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Behavior {
    reject_even: bool,
    fail_on: Vec<u64>,
    sleep_ms: u64,
    slower_first: bool,
    views: usize,
    stop_on: Option<u64>,
    slow_view: Option<usize>,
    reject_view: Option<usize>,
}

/// Records every invocation, reads its inputs and writes its outputs
struct Traced {
    trace: Trace,
    behavior: Behavior,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    stop: StopHandle,
    clock: Arc<AtomicUsize>,
    spans: Arc<Mutex<Vec<Span>>>,
}

impl Algorithm for Traced {
    fn execute(&mut self, ctx: &EventContext<'_>) -> AlgResult {
        let event = ctx.event().event;
        let start = self.clock.fetch_add(1, Ordering::SeqCst);
        self.trace
            .lock()
            .unwrap()
            .push((event, ctx.name().to_string(), ctx.view_index()));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut sleep = self.behavior.sleep_ms;
        if self.behavior.slower_first {
            sleep = sleep.saturating_sub(event);
        }
        if self.behavior.slow_view.is_some() && self.behavior.slow_view == ctx.view_index() {
            sleep += 40;
        }
        std::thread::sleep(Duration::from_millis(sleep));
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.spans.lock().unwrap().push(Span {
            event,
            name: ctx.name().to_string(),
            view: ctx.view_index(),
            start,
            end: self.clock.fetch_add(1, Ordering::SeqCst),
        });

        for path in &ctx.descriptor().inputs {
            ctx.get_object(path)?;
        }
        if self.behavior.stop_on == Some(event) {
            self.stop.request_stop();
        }
        if self.behavior.fail_on.contains(&event) {
            return Ok(StatusCode::Failure);
        }
        for path in &ctx.descriptor().outputs {
            ctx.put(path, event)?;
        }
        if let Some(spec) = &ctx.descriptor().views {
            let set: ViewSet = (0..self.behavior.views)
                .map(|i| {
                    spec.outputs
                        .iter()
                        .fold(ViewSeed::new(), |seed, p| seed.with(p.clone(), DataObject::new(i as u64)))
                })
                .collect();
            ctx.put(&spec.collection, set)?;
        }
        let rejected_view = self.behavior.reject_view.is_some() && self.behavior.reject_view == ctx.view_index();
        if rejected_view || (self.behavior.reject_even && event % 2 == 0) {
            Ok(StatusCode::FilterFailed)
        } else {
            Ok(StatusCode::FilterPassed)
        }
    }
}

struct Harness {
    trace: Trace,
    peak: Arc<AtomicUsize>,
    stop: StopHandle,
    clock: Arc<AtomicUsize>,
    spans: Arc<Mutex<Vec<Span>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            trace: Arc::new(Mutex::new(Vec::new())),
            peak: Arc::new(AtomicUsize::new(0)),
            stop: StopHandle::new(),
            clock: Arc::new(AtomicUsize::new(0)),
            spans: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn registry(&self) -> AlgorithmRegistry {
        let mut registry = AlgorithmRegistry::new();
        let trace = Arc::clone(&self.trace);
        let peak = Arc::clone(&self.peak);
        let running = Arc::new(AtomicUsize::new(0));
        let stop = self.stop.clone();
        let clock = Arc::clone(&self.clock);
        let spans = Arc::clone(&self.spans);
        registry.register("Traced", move |desc| {
            let behavior = if desc.properties.is_null() {
                Behavior::default()
            } else {
                serde_json::from_value(desc.properties.clone()).map_err(CoreError::internal)?
            };
            Ok(Box::new(Traced {
                trace: Arc::clone(&trace),
                behavior,
                running: Arc::clone(&running),
                peak: Arc::clone(&peak),
                stop: stop.clone(),
                clock: Arc::clone(&clock),
                spans: Arc::clone(&spans),
            }) as Box<dyn Algorithm>)
        });
        registry
    }

    fn run(&self, config: JobConfig, source: &mut dyn EventSource, sink: &mut dyn EventSink) -> Outcome {
        let app = Application::new(config, self.registry()).unwrap();
        let (reports, buffer) = ReportWriter::capture();
        let mut manager = app
            .event_loop()
            .with_stop_handle(self.stop.clone())
            .with_report_writer(reports);
        let result = manager.run(source, sink);
        Outcome {
            summary: manager.summary().clone(),
            calib_runs: manager.monitor().algorithm_stats().get("Calib").map_or(0, |s| s.executions),
            result,
            reports: buffer,
        }
    }

    fn invocations(&self) -> Vec<(u64, String, Option<usize>)> {
        self.trace.lock().unwrap().clone()
    }

    fn spans_of(&self, event: u64, name: &str) -> Vec<Span> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.event == event && s.name == name)
            .cloned()
            .collect()
    }
}

struct Outcome {
    result: CoreResult<RunSummary>,
    summary: RunSummary,
    calib_runs: u64,
    reports: SharedBuffer,
}

/// What a sink saw of one event
#[derive(Debug, Clone)]
struct Committed {
    event: u64,
    states: Vec<(String, AlgState)>,
    paths: BTreeSet<String>,
    view_paths: Vec<BTreeSet<String>>,
}

/// Sink keeping the store contents of every event
#[derive(Default)]
struct Capture {
    events: Vec<Committed>,
}

fn local_paths(store: &avalanche_store::Partition) -> BTreeSet<String> {
    store.paths().unwrap().iter().map(|p| p.as_str().to_string()).collect()
}

impl EventSink for Capture {
    fn commit(&mut self, event: &FinishedEvent) -> CoreResult<()> {
        self.events.push(Committed {
            event: event.event.event,
            states: event.states.clone(),
            paths: local_paths(&event.store),
            view_paths: event.views.iter().map(|v| local_paths(v)).collect(),
        });
        Ok(())
    }
}

impl Capture {
    fn by_event(&self) -> BTreeMap<u64, Committed> {
        self.events.iter().map(|c| (c.event, c.clone())).collect()
    }
}

fn traced(name: &str) -> AlgorithmDescriptor {
    AlgorithmDescriptor::new(name).with_type("Traced")
}

fn job(algorithms: Vec<AlgorithmDescriptor>, cf: CfSpec, threads: usize, slots: usize) -> JobConfig {
    JobConfig {
        scheduler: SchedulerSettings {
            threads,
            slots,
            ..SchedulerSettings::default()
        },
        algorithms,
        control_flow: Some(cf),
        ..JobConfig::default()
    }
}

fn path(p: &str) -> DataPath {
    DataPath::parse(p).unwrap()
}

fn linear_chain() -> Vec<AlgorithmDescriptor> {
    vec![
        traced("A").writes("/x"),
        traced("B").reads("/x").writes("/y"),
        traced("C").reads("/y"),
    ]
}

fn chain_cf() -> CfSpec {
    CfSpec::seq(vec![CfSpec::alg("A"), CfSpec::alg("B"), CfSpec::alg("C")])
}

#[test]
fn test_linear_chain_runs_in_order() {
    let harness = Harness::new();
    let mut sink = Capture::default();
    let out = harness.run(job(linear_chain(), chain_cf(), 4, 2), &mut VecSource::range(1, 1, 10), &mut sink);

    let summary = out.result.unwrap();
    assert_eq!((summary.events, summary.accepted), (10, 10));
    assert_eq!(summary.metrics.tasks_executed, 30);

    let invocations = harness.invocations();
    for event in 1..=10 {
        let order: Vec<&str> = invocations
            .iter()
            .filter(|(e, _, _)| *e == event)
            .map(|(_, name, _)| name.as_str())
            .collect();
        assert_eq!(order, vec!["A", "B", "C"], "event {}", event);
    }
    for committed in &sink.events {
        assert!(committed.paths.contains("/Event/x"));
        assert!(committed.paths.contains("/Event/y"));
    }
    assert!(out.reports.contents().is_empty());
}

#[test]
fn test_short_circuit_skips_producer() {
    let harness = Harness::new();
    let algorithms = vec![
        traced("filter").with_properties(serde_json::json!({"reject_even": true})),
        traced("prod").writes("/p"),
    ];
    let cf = CfSpec::seq(vec![CfSpec::alg("filter"), CfSpec::alg("prod")]).short_circuit(true);
    let mut sink = Capture::default();
    let out = harness.run(job(algorithms, cf, 2, 2), &mut VecSource::range(1, 1, 6), &mut sink);

    let summary = out.result.unwrap();
    assert_eq!((summary.accepted, summary.rejected), (3, 3));

    let invocations = harness.invocations();
    for (event, committed) in sink.by_event() {
        let ran = invocations.iter().any(|(e, name, _)| *e == event && name == "prod");
        let prod = committed.states.iter().find(|(n, _)| n == "prod").map(|(_, s)| *s);
        if event % 2 == 0 {
            assert!(!ran, "prod submitted on rejected event {}", event);
            assert_eq!(prod, Some(AlgState::EvtRejected));
            assert!(!committed.paths.contains("/Event/p"));
        } else {
            assert!(ran);
            assert_eq!(prod, Some(AlgState::EvtAccepted));
            assert!(committed.paths.contains("/Event/p"));
        }
    }
}

#[test]
fn test_views_run_once_per_sub_slot() {
    let harness = Harness::new();
    let algorithms = vec![
        traced("A1")
            .with_properties(serde_json::json!({"views": 2}))
            .with_views(ViewSpec {
                node: "V".to_string(),
                collection: path("/tracks"),
                outputs: vec![path("/pt")],
                combine: ViewCombine::And,
            }),
        traced("A2").reads("/pt").writes("/match"),
    ];
    let cf = CfSpec::seq(vec![CfSpec::alg("A1"), CfSpec::and(vec![CfSpec::alg("A2")]).named("V")]);
    let mut sink = Capture::default();
    let out = harness.run(job(algorithms, cf, 4, 2), &mut VecSource::range(1, 1, 5), &mut sink);

    assert_eq!(out.result.unwrap().accepted, 5);
    let invocations = harness.invocations();
    for (event, committed) in sink.by_event() {
        let mut views: Vec<Option<usize>> = invocations
            .iter()
            .filter(|(e, name, _)| *e == event && name == "A2")
            .map(|(_, _, view)| *view)
            .collect();
        views.sort_unstable();
        assert_eq!(views, vec![Some(0), Some(1)], "event {}", event);

        assert!(!committed.paths.contains("/Event/match"));
        assert_eq!(committed.view_paths.len(), 2);
        for view in &committed.view_paths {
            assert!(view.contains("/Event/match"));
            assert!(view.contains("/Event/pt"));
        }
    }
}

/// `A1` opens `views` views of node `V`; `After` follows `V` in sequence
fn view_job(views: usize, combine: ViewCombine, inner: serde_json::Value) -> JobConfig {
    let algorithms = vec![
        traced("A1")
            .with_properties(serde_json::json!({ "views": views }))
            .with_views(ViewSpec {
                node: "V".to_string(),
                collection: path("/tracks"),
                outputs: vec![path("/pt")],
                combine,
            }),
        traced("A2").reads("/pt").writes("/match").with_properties(inner),
        traced("After"),
    ];
    let cf = CfSpec::seq(vec![
        CfSpec::alg("A1"),
        CfSpec::and(vec![CfSpec::alg("A2")]).named("V"),
        CfSpec::alg("After"),
    ]);
    job(algorithms, cf, 4, 2)
}

fn state_of(committed: &Committed, name: &str) -> Option<AlgState> {
    committed.states.iter().find(|(n, _)| n == name).map(|(_, s)| *s)
}

#[test]
fn test_view_node_decided_after_every_view() {
    let harness = Harness::new();
    let mut sink = Capture::default();
    let out = harness.run(
        view_job(2, ViewCombine::And, serde_json::json!({"slow_view": 0})),
        &mut VecSource::range(1, 1, 3),
        &mut sink,
    );

    assert_eq!(out.result.unwrap().accepted, 3);
    for event in 1..=3 {
        let views = harness.spans_of(event, "A2");
        assert_eq!(views.len(), 2, "event {}", event);
        let slow = views.iter().find(|s| s.view == Some(0)).unwrap();
        let fast = views.iter().find(|s| s.view == Some(1)).unwrap();
        assert!(fast.end < slow.end, "event {}", event);

        let after = harness.spans_of(event, "After");
        assert_eq!(after.len(), 1);
        assert!(after[0].start > slow.end, "After started before V was decided on event {}", event);
    }
}

#[test]
fn test_view_combine_decides_node() {
    for (combine, accepted) in [(ViewCombine::And, false), (ViewCombine::Or, true)] {
        let harness = Harness::new();
        let mut sink = Capture::default();
        let out = harness.run(
            view_job(2, combine, serde_json::json!({"reject_view": 0})),
            &mut VecSource::range(1, 1, 2),
            &mut sink,
        );

        let summary = out.result.unwrap();
        let expected = if accepted { (2, 0) } else { (0, 2) };
        assert_eq!((summary.accepted, summary.rejected), expected, "{:?}", combine);
        for (event, committed) in sink.by_event() {
            assert_eq!(harness.spans_of(event, "A2").len(), 2);
            let after = state_of(&committed, "After");
            if accepted {
                assert_eq!(after, Some(AlgState::EvtAccepted));
            } else {
                assert_eq!(after, Some(AlgState::EvtRejected));
                assert!(harness.spans_of(event, "After").is_empty());
            }
        }
    }
}

#[test]
fn test_zero_views_use_combine_identity() {
    for (combine, accepted) in [(ViewCombine::And, true), (ViewCombine::Or, false)] {
        let harness = Harness::new();
        let mut sink = Capture::default();
        let out = harness.run(
            view_job(0, combine, serde_json::Value::Null),
            &mut VecSource::range(1, 1, 2),
            &mut sink,
        );

        let summary = out.result.unwrap();
        assert_eq!(summary.accepted == 2, accepted, "{:?}", combine);
        assert_eq!(summary.rejected == 2, !accepted, "{:?}", combine);
        for (event, committed) in sink.by_event() {
            assert!(harness.spans_of(event, "A2").is_empty());
            assert!(committed.view_paths.is_empty());
            assert_eq!(harness.spans_of(event, "After").len(), usize::from(accepted));
        }
    }
}

#[test]
fn test_unproduced_input_stalls_with_dump() {
    let harness = Harness::new();
    let mut config = job(
        vec![traced("A").writes("/a"), traced("B").reads("/b")],
        CfSpec::par(vec![CfSpec::alg("A"), CfSpec::alg("B")]),
        2,
        2,
    );
    config.source.provides = vec![path("/b")];
    let out = harness.run(config, &mut VecSource::range(1, 1, 3), &mut Capture::default());

    let err = out.result.unwrap_err();
    assert!(matches!(err, CoreError::SchedulerStall { .. }));
    assert_eq!(err.exit_code(&ExitCodes::default()), 4);
    let dump = out.reports.contents();
    assert!(dump.contains("B"));
    assert!(dump.contains("/Event/b"));
}

fn skipped_producer_job(policy: ErrorPolicy) -> JobConfig {
    let mut config = job(
        vec![
            traced("F").with_properties(serde_json::json!({"reject_even": true})),
            traced("P").writes("/p"),
            traced("C").reads("/p"),
        ],
        CfSpec::par(vec![CfSpec::seq(vec![CfSpec::alg("F"), CfSpec::alg("P")]), CfSpec::alg("C")]),
        1,
        1,
    );
    config.scheduler.error_policy = policy;
    config
}

#[test]
fn test_skipped_producer_fails_event_under_continue() {
    let harness = Harness::new();
    let mut sink = Capture::default();
    let out = harness.run(
        skipped_producer_job(ErrorPolicy::ContinueOnError),
        &mut VecSource::range(1, 1, 4),
        &mut sink,
    );

    let summary = out.result.unwrap();
    assert_eq!((summary.events, summary.accepted, summary.failed), (4, 2, 2));
    assert!(summary.first_failure.unwrap().starts_with("DataFaultError"));
    for (event, committed) in sink.by_event() {
        let c = committed.states.iter().find(|(n, _)| n == "C").map(|(_, s)| *s);
        let expected = if event % 2 == 0 { AlgState::Error } else { AlgState::EvtAccepted };
        assert_eq!(c, Some(expected), "event {}", event);
    }
    let readers: Vec<u64> = harness
        .invocations()
        .iter()
        .filter(|(_, name, _)| name == "C")
        .map(|(e, _, _)| *e)
        .collect();
    assert_eq!(readers, vec![1, 3]);
    assert!(out.reports.contents().is_empty());
}

#[test]
fn test_skipped_producer_stops_job_under_stop_on_error() {
    let harness = Harness::new();
    let out = harness.run(
        skipped_producer_job(ErrorPolicy::StopOnError),
        &mut VecSource::range(1, 1, 4),
        &mut Capture::default(),
    );

    let err = out.result.unwrap_err();
    assert!(matches!(err, CoreError::DataFault { ref alg, .. } if alg == "C"));
    assert_eq!(err.exit_code(&ExitCodes::default()), 3);
    assert_eq!((out.summary.events, out.summary.failed), (2, 1));
}

#[test]
fn test_cycle_is_configuration_error() {
    let config = job(
        vec![
            traced("A").reads("/b").writes("/a"),
            traced("B").reads("/a").writes("/b"),
        ],
        CfSpec::par(vec![CfSpec::alg("A"), CfSpec::alg("B")]),
        1,
        1,
    );
    let err = Application::new(config, Harness::new().registry()).unwrap_err();
    assert!(matches!(err, CoreError::Configuration { .. }));
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_conditions_run_once_per_run() {
    let harness = Harness::new();
    let algorithms = vec![
        traced("Calib").conditions().writes("/Conditions/calib"),
        traced("Use").reads("/Conditions/calib").writes("/calibrated"),
    ];
    let events = (1..=6)
        .map(|e| EventRecord::new(EventId::new(1, e)))
        .chain((1..=4).map(|e| EventRecord::new(EventId::new(2, e))));
    let out = harness.run(
        job(algorithms, CfSpec::seq(vec![CfSpec::alg("Use")]), 4, 3),
        &mut VecSource::new(events),
        &mut Capture::default(),
    );

    assert_eq!(out.result.unwrap().accepted, 10);
    assert_eq!(out.calib_runs, 2);
}

fn failing_job(policy: ErrorPolicy) -> JobConfig {
    let mut config = job(
        vec![
            traced("Fragile").with_properties(serde_json::json!({"fail_on": [2]})),
            traced("Next"),
        ],
        CfSpec::seq(vec![CfSpec::alg("Fragile"), CfSpec::alg("Next")]),
        1,
        1,
    );
    config.scheduler.error_policy = policy;
    config
}

#[test]
fn test_stop_on_error_ends_the_job() {
    let harness = Harness::new();
    let out = harness.run(
        failing_job(ErrorPolicy::StopOnError),
        &mut VecSource::range(1, 1, 10),
        &mut Capture::default(),
    );
    let err = out.result.unwrap_err();
    assert!(matches!(err, CoreError::AlgorithmFailure { ref alg, .. } if alg == "Fragile"));
    assert_eq!((out.summary.events, out.summary.failed), (2, 1));
    assert!(out.summary.first_failure.unwrap().contains("Fragile"));
}

#[test]
fn test_continue_on_error_keeps_going() {
    let harness = Harness::new();
    let mut sink = Capture::default();
    let out = harness.run(
        failing_job(ErrorPolicy::ContinueOnError),
        &mut VecSource::range(1, 1, 10),
        &mut sink,
    );
    let summary = out.result.unwrap();
    assert_eq!((summary.events, summary.accepted, summary.failed), (10, 9, 1));
    let failed = &sink.by_event()[&2];
    assert!(failed.states.contains(&("Fragile".to_string(), AlgState::Error)));
}

#[test]
fn test_in_order_sink_commits_in_submission_order() {
    let harness = Harness::new();
    let algorithms = vec![traced("Slow").with_properties(serde_json::json!({"sleep_ms": 40, "slower_first": true}))];
    let mut sink = OutcomeLog::in_order();
    let out = harness.run(
        job(algorithms, CfSpec::seq(vec![CfSpec::alg("Slow")]), 4, 4),
        &mut VecSource::range(1, 1, 12),
        &mut sink,
    );
    out.result.unwrap();
    let seqs: Vec<u64> = sink.commits().iter().map(|c| c.seq).collect();
    assert_eq!(seqs, (0..12).collect::<Vec<_>>());
    let events: Vec<u64> = sink.commits().iter().map(|c| c.event.event).collect();
    assert_eq!(events, (1..=12).collect::<Vec<_>>());
}

#[test]
fn test_timeout_aborts_without_deadlock() {
    let harness = Harness::new();
    let mut config = job(
        vec![traced("Sleeper").with_properties(serde_json::json!({"sleep_ms": 3000}))],
        CfSpec::seq(vec![CfSpec::alg("Sleeper")]),
        1,
        1,
    );
    config.event_loop = EventLoopSettings {
        timeout_ms: 100,
        abort_on_timeout: true,
        watchdog_interval_ms: 10,
        ..EventLoopSettings::default()
    };
    let start = Instant::now();
    let out = harness.run(config, &mut VecSource::range(1, 1, 2), &mut Capture::default());

    assert!(matches!(out.result, Err(CoreError::TimeoutExceeded { .. })));
    assert!(start.elapsed() < Duration::from_millis(2500));
    let report = out.reports.contents();
    assert!(report.contains("event timeout"));
    assert!(report.contains("Sleeper"));
}

#[test]
fn test_single_thread_runs_are_deterministic() {
    let run = |threads: usize, slots: usize| {
        let harness = Harness::new();
        let mut sink = Capture::default();
        let algorithms = vec![
            traced("A").writes("/x"),
            traced("F").reads("/x").with_properties(serde_json::json!({"reject_even": true})),
            traced("B").reads("/x").writes("/y"),
            traced("C").reads("/x"),
        ];
        // B runs only on events F rejects
        let cf = CfSpec::and(vec![
            CfSpec::alg("A"),
            CfSpec::seq(vec![CfSpec::alg("F"), CfSpec::alg("B")]).mode_or(true),
            CfSpec::alg("C"),
        ]);
        harness
            .run(job(algorithms, cf, threads, slots), &mut VecSource::range(1, 1, 8), &mut sink)
            .result
            .unwrap();
        let stores: BTreeMap<u64, BTreeSet<String>> =
            sink.events.iter().map(|c| (c.event, c.paths.clone())).collect();
        (harness.invocations(), stores)
    };

    let (first, stores) = run(1, 1);
    let (second, again) = run(1, 1);
    assert_eq!(first, second);
    assert_eq!(stores, again);

    let (parallel, parallel_stores) = run(4, 3);
    let as_set = |v: &[(u64, String, Option<usize>)]| v.iter().cloned().collect::<BTreeSet<_>>();
    assert_eq!(as_set(&parallel), as_set(&first));
    assert_eq!(parallel_stores, stores);
}

#[test]
fn test_reentrant_cardinality_bounds_concurrency() {
    let harness = Harness::new();
    let mut worker = traced("Worker")
        .with_cardinality(2)
        .with_properties(serde_json::json!({"sleep_ms": 20}));
    worker.reentrant = true;
    let out = harness.run(
        job(vec![worker], CfSpec::seq(vec![CfSpec::alg("Worker")]), 4, 4),
        &mut VecSource::range(1, 1, 12),
        &mut Capture::default(),
    );
    assert_eq!(out.result.unwrap().events, 12);
    let peak = harness.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak {}", peak);
}

#[test]
fn test_stop_request_drains_at_event_boundary() {
    let harness = Harness::new();
    let algorithms = vec![traced("A").with_properties(serde_json::json!({"stop_on": 3}))];
    let out = harness.run(
        job(algorithms, CfSpec::seq(vec![CfSpec::alg("A")]), 1, 1),
        &mut VecSource::range(1, 1, 10),
        &mut Capture::default(),
    );
    assert!(matches!(out.result, Err(CoreError::ExternalSignal)));
    assert!(out.summary.stopped_by_signal);
    assert_eq!(out.summary.events, 3);
}

#[test]
fn test_empty_job_rejects_every_event() {
    let config = JobConfig::default();
    let app = Application::new(config, AlgorithmRegistry::new()).unwrap();
    let mut sink = OutcomeLog::new();
    let summary = app
        .event_loop()
        .with_report_writer(ReportWriter::sink())
        .run(&mut VecSource::range(1, 1, 3), &mut sink)
        .unwrap();
    assert_eq!((summary.events, summary.rejected), (3, 3));
}
