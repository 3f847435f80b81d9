//! Synthetic CPU-bound algorithms.
//!
//! `CpuCruncher` burns a configured amount of time, reads every declared
//! input and writes every declared output, so throughput and scheduling
//! behavior can be studied from a configuration file alone. The filter
//! decision is seeded from the event and the algorithm name, which keeps
//! runs reproducible regardless of thread interleaving.

use std::time::{Duration, Instant};

use avalanche_core::{CoreError, CoreResult, EventId, StatusCode};
use avalanche_plan::AlgorithmDescriptor;
use avalanche_store::{DataObject, ViewSeed, ViewSet};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::algorithm::{AlgResult, Algorithm, AlgorithmRegistry, EventContext};

/// Type name under which [`CpuCruncher`] is registered
pub const CPU_CRUNCHER: &str = "CpuCruncher";

/// Settings read from the descriptor's `properties`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrunchSettings {
    /// Busy time per invocation in microseconds
    pub work_us: u64,
    /// Probability of passing the filter
    pub pass_rate: f64,
    /// Event numbers on which the algorithm returns FAILURE
    pub fail_on: Vec<u64>,
    /// Sleep instead of spinning
    pub sleep: bool,
    /// Views created per event by a view maker
    pub views: usize,
}

impl Default for CrunchSettings {
    fn default() -> Self {
        Self {
            work_us: 0,
            pass_rate: 1.0,
            fail_on: Vec::new(),
            sleep: false,
            views: 0,
        }
    }
}

/// Configurable synthetic algorithm
#[derive(Debug, Clone)]
pub struct CpuCruncher {
    settings: CrunchSettings,
}

impl CpuCruncher {
    /// Create with explicit settings
    #[must_use]
    pub fn new(settings: CrunchSettings) -> Self {
        Self { settings }
    }

    /// Create from a descriptor's properties
    ///
    /// # Errors
    ///
    /// `Configuration` when the properties do not describe a cruncher
    pub fn from_descriptor(desc: &AlgorithmDescriptor) -> CoreResult<Self> {
        if desc.properties.is_null() {
            return Ok(Self::new(CrunchSettings::default()));
        }
        let settings = serde_json::from_value(desc.properties.clone()).map_err(|e| CoreError::Configuration {
            errors: vec![format!("algorithm '{}' has invalid properties: {}", desc.name, e)],
        })?;
        Ok(Self::new(settings))
    }

    fn burn(&self) {
        let budget = Duration::from_micros(self.settings.work_us);
        if budget.is_zero() {
            return;
        }
        if self.settings.sleep {
            std::thread::sleep(budget);
            return;
        }
        let start = Instant::now();
        let mut acc = 0_u64;
        while start.elapsed() < budget {
            for i in 0..256_u64 {
                acc = std::hint::black_box(acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i));
            }
        }
    }
}

/// Seed for the filter decision of one algorithm on one event
fn decision_seed(event: EventId, name: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0100_0000_01b3;
    u64::from(event.run)
        .to_le_bytes()
        .iter()
        .chain(event.event.to_le_bytes().iter())
        .chain(name.as_bytes())
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME))
}

impl Algorithm for CpuCruncher {
    fn execute(&mut self, ctx: &EventContext<'_>) -> AlgResult {
        let event = ctx.event();
        let mut checksum = event.event;
        for path in &ctx.descriptor().inputs {
            let object = ctx.get_object(path)?;
            checksum = checksum.wrapping_add(object.downcast::<u64>().map_or(1, |v| *v));
        }
        if self.settings.fail_on.contains(&event.event) {
            tracing::debug!(alg = %ctx.name(), event = %event, "configured to fail");
            return Ok(StatusCode::Failure);
        }

        self.burn();

        for path in &ctx.descriptor().outputs {
            ctx.put(path, checksum)?;
        }
        if let Some(spec) = &ctx.descriptor().views {
            let set: ViewSet = (0..self.settings.views)
                .map(|i| {
                    spec.outputs
                        .iter()
                        .fold(ViewSeed::new(), |seed, path| seed.with(path.clone(), DataObject::new(i as u64)))
                })
                .collect();
            ctx.put(&spec.collection, set)?;
        }

        let pass_rate = self.settings.pass_rate.clamp(0.0, 1.0);
        let mut rng = SmallRng::seed_from_u64(decision_seed(event, ctx.name()));
        if rng.gen_bool(pass_rate) {
            Ok(StatusCode::FilterPassed)
        } else {
            Ok(StatusCode::FilterFailed)
        }
    }
}

/// Register the built-in algorithm types
pub fn register_builtins(registry: &mut AlgorithmRegistry) {
    registry.register(CPU_CRUNCHER, |desc| {
        CpuCruncher::from_descriptor(desc).map(|c| Box::new(c) as Box<dyn Algorithm>)
    });
}
