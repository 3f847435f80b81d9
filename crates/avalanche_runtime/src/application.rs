//! Application context: one job, its graph and its algorithm types.

use std::sync::Arc;

use avalanche_core::CoreResult;
use avalanche_plan::{JobConfig, PrecedenceGraph};

use crate::algorithm::AlgorithmRegistry;
use crate::crunch;
use crate::event_loop::EventLoopManager;
use crate::source::SyntheticSource;

/// A validated job ready to run
#[derive(Debug, Clone)]
pub struct Application {
    config: JobConfig,
    graph: Arc<PrecedenceGraph>,
    registry: AlgorithmRegistry,
}

impl Application {
    /// Validate the job against a registry
    ///
    /// # Errors
    ///
    /// `Configuration` listing every graph problem, or every algorithm
    /// whose type is not registered
    pub fn new(config: JobConfig, registry: AlgorithmRegistry) -> CoreResult<Self> {
        let graph = config.precedence_graph()?;
        registry.check(graph.algorithms())?;
        tracing::debug!(
            algorithms = graph.alg_count(),
            nodes = graph.node_count(),
            conditions = graph.conditions_algorithms().len(),
            "job validated"
        );
        Ok(Self {
            config,
            graph: Arc::new(graph),
            registry,
        })
    }

    /// Validate the job against the built-in algorithm types
    ///
    /// # Errors
    ///
    /// See [`Application::new`]
    pub fn with_builtins(config: JobConfig) -> CoreResult<Self> {
        let mut registry = AlgorithmRegistry::new();
        crunch::register_builtins(&mut registry);
        Self::new(config, registry)
    }

    /// Job configuration
    #[must_use]
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Precedence graph
    #[must_use]
    pub fn graph(&self) -> &Arc<PrecedenceGraph> {
        &self.graph
    }

    /// Event loop for this job
    #[must_use]
    pub fn event_loop(&self) -> EventLoopManager {
        EventLoopManager::new(
            Arc::clone(&self.graph),
            self.registry.clone(),
            self.config.scheduler.clone(),
            self.config.event_loop.clone(),
        )
    }

    /// Synthetic source described by the job
    #[must_use]
    pub fn source(&self) -> SyntheticSource {
        SyntheticSource::new(&self.config.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avalanche_core::CoreError;

    #[test]
    fn test_unknown_type_rejected() {
        let config = JobConfig::from_json(
            r#"{"algorithms": [{"name": "A", "type": "Mystery"}], "control_flow": {"kind": "seq", "children": ["A"]}}"#,
        )
        .unwrap();
        let err = Application::with_builtins(config).unwrap_err();
        match err {
            CoreError::Configuration { errors } => assert!(errors[0].contains("Mystery")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_builtin_job_validates() {
        let config = JobConfig::from_json(
            r#"{"algorithms": [{"name": "A", "type": "CpuCruncher"}], "control_flow": {"kind": "seq", "children": ["A"]}}"#,
        )
        .unwrap();
        let app = Application::with_builtins(config).unwrap();
        assert_eq!(app.graph().alg_count(), 1);
        assert_eq!(app.config().source.count, 10);
    }
}
