//! The materialization engine: per-step unit selection and actuation.
//!
//! Each step the outer driver calls, in order:
//! 1. [`Kernel::prepare_step`]: offer units from every context, drop the
//!    inapplicable ones, stable-sort the rest by descending priority
//! 2. [`Kernel::actuate_step`]: resolve roles and actuate each unit in turn,
//!    then scan the label buffers
//!
//! Actuation is immediate, so a unit sees everything higher-priority units
//! did earlier in the same step. Between iterations the driver calls
//! [`Kernel::on_iteration_boundary`] to retrain and persist estimators.
//!
//! ## Usage
//!
//! ```ignore
//! let mut kernel = KernelBuilder::new(KernelConfig::default())
//!     .add_estimator(estimator)
//!     .add_estimate("time_to_failure", "time_to_failure", rule)
//!     .build()?;
//!
//! kernel.begin_simulation(&world, contexts)?;
//! for step in 0..steps {
//!     advance(&mut world, step);
//!     kernel.prepare_step(&world, step);
//!     let record = kernel.actuate_step(&mut world, step)?;
//! }
//! kernel.end_simulation(&world, steps);
//! kernel.on_iteration_boundary(0);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace, warn};

use crate::agent::{AgentId, ContextId, Step};
use crate::claims::{Claim, ClaimLedger};
use crate::config::KernelConfig;
use crate::context::{ContextSpec, Window};
use crate::ensemble::{resolve_role, Ensemble, PredictionSource, ResolvedRoles, RoleResolution};
use crate::error::{ConfigurationError, FeatureError, Result};
use crate::estimator::{Estimator, TrainingOutcome};
use crate::features::FeatureValue;
use crate::labels::{FeatureRecord, LabelBuffer, LabelRule, LabelSummary, RecordKey};
use crate::record::{
    ClaimSummary, RoleRecord, Shortfall, StepRecord, UnitOutcome, UnitRecord, UnitRef,
};
use crate::world::World;

/// An estimate: an estimator plus the label rule and buffer feeding it.
struct EstimateBinding<W: World> {
    estimator: String,
    rule: Box<dyn LabelRule<W>>,
    buffer: LabelBuffer,
}

/// Units that passed their situation this step, already priority-sorted.
struct PreparedStep<W: World> {
    step: Step,
    units: Vec<Box<dyn Ensemble<W>>>,
    inapplicable: Vec<UnitRef>,
}

/// Builder for a [`Kernel`]. Declaration errors surface in [`build`](Self::build).
pub struct KernelBuilder<W: World> {
    config: KernelConfig,
    estimators: BTreeMap<String, Estimator>,
    estimates: BTreeMap<String, EstimateBinding<W>>,
    error: Option<ConfigurationError>,
}

impl<W: World> KernelBuilder<W> {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            estimators: BTreeMap::new(),
            estimates: BTreeMap::new(),
            error: None,
        }
    }

    pub fn add_estimator(mut self, estimator: Estimator) -> Self {
        let name = estimator.name().to_string();
        if self.estimators.insert(name.clone(), estimator).is_some() {
            self.error.get_or_insert(ConfigurationError::DuplicateEstimator(name));
        }
        self
    }

    /// Declare an estimate served by `estimator` and labeled by `rule`,
    /// using the configured default horizon.
    pub fn add_estimate(
        self,
        name: &str,
        estimator: &str,
        rule: impl LabelRule<W> + 'static,
    ) -> Self {
        let horizon = self.config.label_horizon;
        self.add_estimate_with_horizon(name, estimator, rule, horizon)
    }

    pub fn add_estimate_with_horizon(
        mut self,
        name: &str,
        estimator: &str,
        rule: impl LabelRule<W> + 'static,
        horizon: Step,
    ) -> Self {
        let binding = EstimateBinding {
            estimator: estimator.to_string(),
            rule: Box::new(rule),
            buffer: LabelBuffer::new(horizon, self.config.max_buffered_records),
        };
        if self.estimates.insert(name.to_string(), binding).is_some() {
            self.error
                .get_or_insert(ConfigurationError::DuplicateEstimate(name.to_string()));
        }
        self
    }

    pub fn build(self) -> std::result::Result<Kernel<W>, ConfigurationError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        for (name, binding) in &self.estimates {
            if !self.estimators.contains_key(&binding.estimator) {
                return Err(ConfigurationError::UndeclaredEstimator {
                    estimate: name.clone(),
                    estimator: binding.estimator.clone(),
                });
            }
        }
        info!(
            estimators = self.estimators.len(),
            estimates = self.estimates.len(),
            label_horizon = self.config.label_horizon,
            "Kernel built"
        );
        Ok(Kernel {
            config: self.config,
            estimators: self.estimators,
            estimates: self.estimates,
            contexts: Vec::new(),
            windows: BTreeMap::new(),
            claims: ClaimLedger::new(),
            prepared: None,
        })
    }
}

/// Split borrow of the kernel used while resolving roles: estimators are
/// read-only, only label buffers are written.
struct Predictor<'a, W: World> {
    estimators: &'a BTreeMap<String, Estimator>,
    estimates: &'a mut BTreeMap<String, EstimateBinding<W>>,
}

impl<W: World> PredictionSource for Predictor<'_, W> {
    fn predict(
        &mut self,
        estimate: &str,
        context: ContextId,
        agent: AgentId,
        step: Step,
        values: Vec<FeatureValue>,
    ) -> Result<Option<f64>> {
        let binding = self.estimates.get_mut(estimate).ok_or_else(|| {
            ConfigurationError::UndeclaredEstimate {
                unit: format!("context {context}"),
                role: String::new(),
                estimate: estimate.to_string(),
            }
        })?;
        let estimator = self.estimators.get(&binding.estimator).ok_or_else(|| {
            ConfigurationError::UndeclaredEstimator {
                estimate: estimate.to_string(),
                estimator: binding.estimator.clone(),
            }
        })?;

        let features = match estimator.encode(&values) {
            Ok(features) => features,
            // Unavailable for this agent only
            Err(FeatureError::NonFinite { feature }) => {
                warn!(
                    estimate = estimate,
                    agent = agent,
                    step = step,
                    feature = %feature,
                    "Non-finite feature value, prediction unavailable"
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let prediction = estimator.predict(&features);
        binding.buffer.push(FeatureRecord {
            key: RecordKey {
                step,
                context,
                agent,
            },
            features,
            prediction,
        });
        Ok(prediction)
    }
}

pub struct Kernel<W: World> {
    config: KernelConfig,
    estimators: BTreeMap<String, Estimator>,
    estimates: BTreeMap<String, EstimateBinding<W>>,
    contexts: Vec<ContextSpec<W>>,
    windows: BTreeMap<ContextId, Window>,
    claims: ClaimLedger,
    prepared: Option<PreparedStep<W>>,
}

impl<W: World> Kernel<W> {
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn estimator(&self, name: &str) -> Option<&Estimator> {
        self.estimators.get(name)
    }

    /// Mutable access for loading saved parameters or switching modes
    /// between runs.
    pub fn estimator_mut(&mut self, name: &str) -> Option<&mut Estimator> {
        self.estimators.get_mut(name)
    }

    pub fn estimators(&self) -> impl Iterator<Item = &Estimator> {
        self.estimators.values()
    }

    pub fn label_buffer(&self, estimate: &str) -> Option<&LabelBuffer> {
        self.estimates.get(estimate).map(|b| &b.buffer)
    }

    pub fn claims(&self) -> &ClaimLedger {
        &self.claims
    }

    pub fn contexts(&self) -> impl Iterator<Item = (ContextId, Window)> + '_ {
        self.contexts.iter().map(|c| (c.id, c.window))
    }

    /// Install the contexts of a fresh simulation run.
    ///
    /// Rejects duplicate context ids and roles that reference undeclared
    /// estimates (checked on the units each context offers at its window
    /// start). Label buffers start empty.
    pub fn begin_simulation(
        &mut self,
        world: &W,
        contexts: Vec<ContextSpec<W>>,
    ) -> std::result::Result<(), ConfigurationError> {
        let mut seen = BTreeSet::new();
        for ctx in &contexts {
            if !seen.insert(ctx.id) {
                return Err(ConfigurationError::DuplicateContext(ctx.id));
            }
            for unit in ctx.offer(ctx.window.start) {
                for role in unit.roles(world, ctx.window.start) {
                    if let Some(est) = &role.estimate {
                        if !self.estimates.contains_key(est.estimate) {
                            return Err(ConfigurationError::UndeclaredEstimate {
                                unit: unit.name().to_string(),
                                role: role.name.to_string(),
                                estimate: est.estimate.to_string(),
                            });
                        }
                    }
                }
            }
        }

        for (name, binding) in &mut self.estimates {
            if !binding.buffer.is_empty() {
                warn!(
                    estimate = %name,
                    pending = binding.buffer.len(),
                    "Dropping records left over from a previous run"
                );
                binding.buffer.clear();
            }
        }

        self.windows = contexts.iter().map(|c| (c.id, c.window)).collect();
        self.contexts = contexts;
        self.claims.reset();
        self.prepared = None;
        debug!(contexts = self.contexts.len(), "Simulation started");
        Ok(())
    }

    /// Offer, filter and priority-sort the units for `step`. Returns the
    /// number of applicable units.
    pub fn prepare_step(&mut self, world: &W, step: Step) -> usize {
        self.claims.reset();
        let prepared = self.collect_units(world, step);
        let applicable = prepared.units.len();
        self.prepared = Some(prepared);
        applicable
    }

    fn collect_units(&self, world: &W, step: Step) -> PreparedStep<W> {
        let mut units: Vec<Box<dyn Ensemble<W>>> = Vec::new();
        let mut inapplicable = Vec::new();
        for ctx in &self.contexts {
            for unit in ctx.offer(step) {
                if unit.situation(world, step) {
                    units.push(unit);
                } else {
                    inapplicable.push(UnitRef {
                        unit: unit.name().to_string(),
                        context: unit.context(),
                    });
                }
            }
        }
        // Stable: equal priorities keep offer order
        units.sort_by_key(|u| std::cmp::Reverse(u.priority()));

        trace!(
            step = step,
            applicable = units.len(),
            inapplicable = inapplicable.len(),
            "Step prepared"
        );
        PreparedStep {
            step,
            units,
            inapplicable,
        }
    }

    /// Resolve and actuate the prepared units, then scan label buffers.
    ///
    /// Only configuration defects are returned as errors. Shortfalls are
    /// reported in the returned record.
    pub fn actuate_step(&mut self, world: &mut W, step: Step) -> Result<StepRecord> {
        let prepared = match self.prepared.take() {
            Some(p) if p.step == step => p,
            _ => {
                debug!(step = step, "actuate_step without prepare_step, preparing now");
                self.claims.reset();
                self.collect_units(world, step)
            }
        };

        let mut record = StepRecord::new(step);
        record.inapplicable = prepared.inapplicable;

        for unit in prepared.units {
            let name = unit.name();
            let context = unit.context();
            let roles = unit.roles(world, step);

            let mut resolved = ResolvedRoles::default();
            let mut role_records = Vec::with_capacity(roles.len());
            let mut shortfall = None;
            for role in &roles {
                if let Some(est) = &role.estimate {
                    if !self.estimates.contains_key(est.estimate) {
                        return Err(ConfigurationError::UndeclaredEstimate {
                            unit: name.to_string(),
                            role: role.name.to_string(),
                            estimate: est.estimate.to_string(),
                        }
                        .into());
                    }
                }
                let mut predictor = Predictor {
                    estimators: &self.estimators,
                    estimates: &mut self.estimates,
                };
                let denied_before = self.claims.denied();
                let resolution = resolve_role(
                    &*world,
                    name,
                    context,
                    role,
                    step,
                    &mut self.claims,
                    &mut predictor,
                )?;
                match resolution {
                    RoleResolution::Admitted { eligible, admitted } => {
                        role_records.push(RoleRecord {
                            role: role.name.to_string(),
                            eligible,
                            admitted: admitted.clone(),
                            exclusive: role.exclusive,
                            denied: self.claims.denied() - denied_before,
                        });
                        resolved.insert(role.name, admitted);
                    }
                    RoleResolution::Shortfall { eligible, min } => {
                        shortfall = Some(Shortfall {
                            role: role.name.to_string(),
                            eligible,
                            min,
                        });
                        break;
                    }
                }
            }

            let unit_ref = UnitRef {
                unit: name.to_string(),
                context,
            };
            if let Some(shortfall) = shortfall {
                info!(
                    step = step,
                    unit = name,
                    context = context,
                    role = %shortfall.role,
                    eligible = shortfall.eligible,
                    min = shortfall.min,
                    "Cardinality shortfall, unit skipped"
                );
                record.units.push(UnitRecord {
                    unit: unit_ref,
                    priority: unit.priority(),
                    outcome: UnitOutcome::Shortfall(shortfall),
                });
                continue;
            }

            for role in &roles {
                for &agent in resolved.get(role.name) {
                    self.claims.grant(
                        agent,
                        Claim {
                            unit: name.to_string(),
                            context,
                            role: role.name.to_string(),
                            exclusive: role.exclusive,
                        },
                    );
                }
            }
            if self.config.trace_admissions {
                debug!(step = step, unit = name, context = context, roles = ?resolved, "Unit actuated");
            } else {
                trace!(step = step, unit = name, context = context, roles = ?resolved, "Unit actuated");
            }

            unit.actuate(world, &resolved, step);
            record.units.push(UnitRecord {
                unit: unit_ref,
                priority: unit.priority(),
                outcome: UnitOutcome::Actuated {
                    roles: role_records,
                },
            });
        }

        record.claims = ClaimSummary {
            granted: self.claims.granted(),
            denied: self.claims.denied(),
        };
        record.labels = self.scan_labels(world, step, false);
        Ok(record)
    }

    /// Close every context window and resolve all pending records.
    /// No record survives a run.
    pub fn end_simulation(&mut self, world: &W, step: Step) -> BTreeMap<String, LabelSummary> {
        let summaries = self.scan_labels(world, step, true);
        self.contexts.clear();
        self.windows.clear();
        self.prepared = None;
        self.claims.reset();
        debug!(step = step, "Simulation ended");
        summaries
    }

    /// Retrain every estimator on its buffered examples and persist the
    /// parameters under the 1-based iteration tag.
    ///
    /// Training and persistence failures are logged and reported, never
    /// raised: the previous parameters stay in force.
    pub fn on_iteration_boundary(&mut self, iteration: usize) -> BTreeMap<String, TrainingOutcome> {
        let tag = (iteration + 1).to_string();
        let mut outcomes = BTreeMap::new();
        for (name, estimator) in &mut self.estimators {
            let outcome = estimator.retrain();
            if matches!(outcome, TrainingOutcome::Trained(_)) {
                if let Err(e) = estimator.save_parameters(&tag) {
                    warn!(estimator = %name, error = %e, "Failed to save parameters");
                }
            }
            outcomes.insert(name.clone(), outcome);
        }
        info!(iteration = iteration + 1, estimators = outcomes.len(), "Iteration boundary");
        outcomes
    }

    fn scan_labels(&mut self, world: &W, step: Step, force_close: bool) -> BTreeMap<String, LabelSummary> {
        let windows = &self.windows;
        let mut summaries = BTreeMap::new();
        for (name, binding) in &mut self.estimates {
            let (examples, summary) = binding.buffer.scan(
                world,
                binding.rule.as_ref(),
                step,
                |ctx| windows.get(&ctx).is_some_and(|w| w.closed_at(step)),
                force_close,
            );
            if let Some(estimator) = self.estimators.get_mut(&binding.estimator) {
                for (features, label) in examples {
                    estimator.accumulate(features, label);
                }
            }
            summaries.insert(name.clone(), summary);
        }
        summaries
    }
}
