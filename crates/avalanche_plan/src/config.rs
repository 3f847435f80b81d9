//! Job configuration.
//!
//! A job is a single JSON document. Every section is optional and falls
//! back to defaults; unknown keys are rejected so typos surface at load
//! time instead of silently changing behavior.

use std::path::Path;
use std::time::Duration;

use avalanche_core::{CoreError, CoreResult, ExitCodes};
use serde::{Deserialize, Serialize};

use crate::control::CfSpec;
use crate::descriptor::AlgorithmDescriptor;
use crate::graph::PrecedenceGraph;
use crate::path::DataPath;
use crate::validate::Validator;

/// What happens to the job when an algorithm fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop feeding events, drain in-flight work and fail the job
    #[default]
    StopOnError,
    /// Mark the event failed and keep going
    ContinueOnError,
}

/// Error raised while loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// File is not a valid job document
    #[error("invalid job configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration {
            errors: vec![err.to_string()],
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    /// Worker threads. 0 = available parallelism.
    pub threads: usize,
    /// Concurrent event slots
    pub slots: usize,
    /// Failure handling
    pub error_policy: ErrorPolicy,
    /// Turn missing declared outputs into data faults
    pub check_outputs: bool,
    /// Algorithm made producer of otherwise unproduced inputs
    pub data_loader: Option<String>,
    /// Threads reserved for blocking algorithms. 0 = share the worker pool.
    pub blocking_threads: usize,
    /// Write the per-slot state dump when a stall is detected
    pub stall_dump: bool,
    /// Record per-task timings
    pub timeline: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            threads: 0,
            slots: 1,
            error_policy: ErrorPolicy::default(),
            check_outputs: false,
            data_loader: None,
            blocking_threads: 0,
            stall_dump: true,
            timeline: false,
        }
    }
}

impl SchedulerSettings {
    /// Resolve worker thread count (0 means use available parallelism)
    #[must_use]
    pub fn resolved_threads(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.threads
        }
    }
}

/// Event loop and watchdog settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventLoopSettings {
    /// Stop after this many events; `None` drains the source
    pub max_events: Option<u64>,
    /// Per-event wall-time limit in milliseconds; 0 disables the watchdog
    pub timeout_ms: u64,
    /// Abort the job when an event times out
    pub abort_on_timeout: bool,
    /// Watchdog polling period in milliseconds
    pub watchdog_interval_ms: u64,
    /// Include in-flight tasks in timeout reports
    pub dump_in_flight: bool,
}

impl Default for EventLoopSettings {
    fn default() -> Self {
        Self {
            max_events: None,
            timeout_ms: 0,
            abort_on_timeout: false,
            watchdog_interval_ms: 100,
            dump_in_flight: true,
        }
    }
}

impl EventLoopSettings {
    /// Event timeout, if enabled
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Watchdog polling period
    #[must_use]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}

/// Synthetic event source settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    /// Run number of every generated event
    pub run: u32,
    /// Number of the first event
    pub first_event: u64,
    /// Events to generate
    pub count: u64,
    /// Paths the source pre-loads into every slot
    pub provides: Vec<DataPath>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            run: 1,
            first_event: 1,
            count: 10,
            provides: Vec::new(),
        }
    }
}

/// Full job description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Scheduler settings
    pub scheduler: SchedulerSettings,
    /// Event loop settings
    pub event_loop: EventLoopSettings,
    /// Process exit codes
    pub exit_codes: ExitCodes,
    /// Event source
    pub source: SourceSettings,
    /// Algorithm descriptors
    pub algorithms: Vec<AlgorithmDescriptor>,
    /// Control-flow tree
    pub control_flow: Option<CfSpec>,
}

impl JobConfig {
    /// Parse a job from JSON text
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed JSON or unknown keys
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// Load a job from a file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Render as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self).map_err(CoreError::internal)
    }

    fn normalize(&mut self) {
        for desc in &mut self.algorithms {
            if desc.type_name.is_empty() {
                desc.type_name = desc.name.clone();
            }
        }
    }

    /// Validate the job and build its precedence graph
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Configuration` listing every problem found
    pub fn precedence_graph(&self) -> CoreResult<PrecedenceGraph> {
        let mut errors = Vec::new();
        if self.scheduler.slots == 0 {
            errors.push("scheduler.slots must be at least 1".to_string());
        }
        let built = Validator::new()
            .with_data_loader(self.scheduler.data_loader.clone())
            .build(
                self.algorithms.clone(),
                self.control_flow.as_ref(),
                &self.source.provides,
            );
        match built {
            Ok(graph) if errors.is_empty() => Ok(graph),
            Ok(_) => Err(CoreError::Configuration { errors }),
            Err(found) => {
                errors.extend(found.iter().map(ToString::to_string));
                Err(CoreError::Configuration { errors })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LINEAR: &str = r#"{
        "scheduler": {"threads": 4, "slots": 2},
        "source": {"count": 10},
        "algorithms": [
            {"name": "A", "outputs": ["/x"]},
            {"name": "B", "inputs": ["/x"], "outputs": ["/y"]},
            {"name": "C", "type": "Cruncher", "inputs": ["/y"]}
        ],
        "control_flow": {"kind": "seq", "children": ["A", "B", "C"]}
    }"#;

    #[test]
    fn test_parse_linear_job() {
        let job = JobConfig::from_json(LINEAR).unwrap();
        assert_eq!(job.scheduler.threads, 4);
        assert_eq!(job.scheduler.slots, 2);
        assert_eq!(job.scheduler.error_policy, ErrorPolicy::StopOnError);
        assert_eq!(job.source.count, 10);
        assert_eq!(job.algorithms[0].type_name, "A");
        assert_eq!(job.algorithms[2].type_name, "Cruncher");
        assert_eq!(job.event_loop.timeout(), None);

        let graph = job.precedence_graph().unwrap();
        assert_eq!(graph.alg_count(), 3);
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let job = JobConfig::from_json("{}").unwrap();
        assert_eq!(job.scheduler, SchedulerSettings::default());
        assert!(job.scheduler.resolved_threads() >= 1);
        assert!(job.control_flow.is_none());
        assert_eq!(job.exit_codes, ExitCodes::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = JobConfig::from_json(r#"{"scheduler": {"treads": 4}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let core: CoreError = err.into();
        assert!(core.to_string().starts_with("ConfigurationError"));
    }

    #[test]
    fn test_zero_slots_reported_with_graph_errors() {
        let job = JobConfig::from_json(
            r#"{"scheduler": {"slots": 0}, "algorithms": [{"name": "B", "inputs": ["/b"]}],
                "control_flow": {"kind": "par", "children": ["B"]}}"#,
        )
        .unwrap();
        let CoreError::Configuration { errors } = job.precedence_graph().unwrap_err() else {
            panic!("expected configuration error");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("slots"));
        assert!(errors[1].contains("missing producer"));
    }

    #[test]
    fn test_watchdog_settings() {
        let job = JobConfig::from_json(
            r#"{"event_loop": {"timeout_ms": 2000, "abort_on_timeout": true, "watchdog_interval_ms": 0}}"#,
        )
        .unwrap();
        assert_eq!(job.event_loop.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(job.event_loop.watchdog_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LINEAR.as_bytes()).unwrap();
        let job = JobConfig::from_path(file.path()).unwrap();
        assert_eq!(job.algorithms.len(), 3);

        let missing = JobConfig::from_path("/nonexistent/job.json").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn test_json_roundtrip_keeps_tree() {
        let job = JobConfig::from_json(LINEAR).unwrap();
        let again = JobConfig::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(again.control_flow, job.control_flow);
    }
}
