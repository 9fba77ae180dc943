//! Delayed-label buffer: feature records waiting for their ground truth.
//!
//! Every prediction an estimate-aware role requests leaves a
//! [`FeatureRecord`] behind, keyed by `(step, context, agent)`. Each step
//! the kernel scans the buffer and every record reaches exactly one outcome:
//!
//! | condition (checked in order)     | outcome                        |
//! |----------------------------------|--------------------------------|
//! | agent no longer exists           | discard                        |
//! | [`LabelRule::invalidated`]       | discard                        |
//! | [`LabelRule::decidable`]         | label from [`LabelRule::label`]|
//! | context window closed            | [`LabelRule::on_window_closed`]|
//! | older than the horizon           | discard                        |
//!
//! Records still pending stay buffered. The buffer is also capped in size;
//! overflow drops the oldest record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::agent::{AgentId, ContextId, Step};
use crate::world::World;

/// Key of a buffered record. Orders oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub step: Step,
    pub context: ContextId,
    pub agent: AgentId,
}

/// Snapshot taken when a prediction was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub key: RecordKey,
    /// Encoded features
    pub features: Vec<f64>,
    /// What the estimator said at the time, if anything
    pub prediction: Option<f64>,
}

/// What happens to a record whose context window closed unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Closure {
    /// The label can never materialize
    Discard,
    /// Closure is itself an observation (e.g. "never arrived")
    Label(f64),
}

/// Decides when and how a buffered record becomes a supervised example.
pub trait LabelRule<W: World> {
    /// Whether the true outcome for `record` is observable now.
    fn decidable(&self, world: &W, agent: &W::Agent, record: &FeatureRecord, step: Step) -> bool;

    /// The observed label. Only called when `decidable` holds.
    fn label(&self, world: &W, agent: &W::Agent, record: &FeatureRecord, step: Step) -> f64;

    /// Whether the record can no longer be labeled truthfully, e.g. the
    /// agent was reset after the record was taken.
    fn invalidated(&self, _world: &W, _agent: &W::Agent, _record: &FeatureRecord, _step: Step) -> bool {
        false
    }

    fn on_window_closed(&self, _record: &FeatureRecord) -> Closure {
        Closure::Discard
    }
}

/// Time-to-event labels: the number of steps between the record and the
/// first step at which `event` holds for the agent.
pub struct TimeToEvent<W: World> {
    event: Box<dyn Fn(&W::Agent) -> bool>,
    invalidated: Option<Box<dyn Fn(&W::Agent, &FeatureRecord) -> bool>>,
}

impl<W: World> TimeToEvent<W> {
    pub fn new<F>(event: F) -> Self
    where
        F: Fn(&W::Agent) -> bool + 'static,
    {
        Self {
            event: Box::new(event),
            invalidated: None,
        }
    }

    pub fn invalidated_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&W::Agent, &FeatureRecord) -> bool + 'static,
    {
        self.invalidated = Some(Box::new(predicate));
        self
    }
}

impl<W: World> LabelRule<W> for TimeToEvent<W> {
    fn decidable(&self, _world: &W, agent: &W::Agent, _record: &FeatureRecord, _step: Step) -> bool {
        (self.event)(agent)
    }

    fn label(&self, _world: &W, _agent: &W::Agent, record: &FeatureRecord, step: Step) -> f64 {
        step.saturating_sub(record.key.step) as f64
    }

    fn invalidated(&self, _world: &W, agent: &W::Agent, record: &FeatureRecord, _step: Step) -> bool {
        self.invalidated.as_ref().is_some_and(|f| f(agent, record))
    }
}

/// Per-step counters of one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSummary {
    /// Records added this step
    pub buffered: usize,
    /// Resolved through the label rule
    pub labeled: usize,
    /// Resolved by window closure into a label
    pub closed: usize,
    pub discarded: usize,
    /// Still waiting after the scan
    pub pending: usize,
}

impl LabelSummary {
    pub fn is_quiet(&self) -> bool {
        self.buffered == 0 && self.labeled == 0 && self.closed == 0 && self.discarded == 0
    }
}

/// Bounded buffer of unresolved records for one estimate.
#[derive(Debug, Clone)]
pub struct LabelBuffer {
    records: BTreeMap<RecordKey, FeatureRecord>,
    horizon: Step,
    capacity: usize,
    step_summary: LabelSummary,
    totals: LabelSummary,
}

impl LabelBuffer {
    pub fn new(horizon: Step, capacity: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            horizon: horizon.max(1),
            capacity: capacity.max(1),
            step_summary: LabelSummary::default(),
            totals: LabelSummary::default(),
        }
    }

    pub fn horizon(&self) -> Step {
        self.horizon
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&FeatureRecord> {
        self.records.get(key)
    }

    /// Counters accumulated over the buffer's lifetime.
    pub fn totals(&self) -> LabelSummary {
        LabelSummary {
            pending: self.records.len(),
            ..self.totals
        }
    }

    /// Buffer a record. A record with the same key replaces the earlier one.
    pub fn push(&mut self, record: FeatureRecord) {
        if self.records.insert(record.key, record).is_none() {
            self.step_summary.buffered += 1;
            self.totals.buffered += 1;
        }
        while self.records.len() > self.capacity {
            if let Some((key, _)) = self.records.pop_first() {
                trace!(step = key.step, agent = key.agent, "Label buffer full, dropping oldest");
                self.step_summary.discarded += 1;
                self.totals.discarded += 1;
            }
        }
    }

    /// Resolve every record that can be resolved at `step`.
    ///
    /// `window_closed(context)` reports whether a context window has closed;
    /// `force_close` treats every window as closed (end of a run). Returns
    /// the examples produced plus this step's summary.
    pub fn scan<W, R, C>(
        &mut self,
        world: &W,
        rule: &R,
        step: Step,
        window_closed: C,
        force_close: bool,
    ) -> (Vec<(Vec<f64>, f64)>, LabelSummary)
    where
        W: World,
        R: LabelRule<W> + ?Sized,
        C: Fn(ContextId) -> bool,
    {
        let mut examples = Vec::new();
        // Starts with this step's pushes and capacity drops
        let mut summary = std::mem::take(&mut self.step_summary);
        let mut scan_discarded = 0;

        let horizon = self.horizon;
        self.records.retain(|key, record| {
            let Some(agent) = world.agent(key.agent) else {
                scan_discarded += 1;
                return false;
            };
            if rule.invalidated(world, agent, record, step) {
                scan_discarded += 1;
                return false;
            }
            if rule.decidable(world, agent, record, step) {
                let label = rule.label(world, agent, record, step);
                examples.push((record.features.clone(), label));
                summary.labeled += 1;
                return false;
            }
            if force_close || window_closed(key.context) {
                match rule.on_window_closed(record) {
                    Closure::Label(label) => {
                        examples.push((record.features.clone(), label));
                        summary.closed += 1;
                    }
                    Closure::Discard => scan_discarded += 1,
                }
                return false;
            }
            if step.saturating_sub(key.step) >= horizon {
                scan_discarded += 1;
                return false;
            }
            true
        });

        summary.discarded += scan_discarded;
        summary.pending = self.records.len();
        self.totals.labeled += summary.labeled;
        self.totals.closed += summary.closed;
        self.totals.discarded += scan_discarded;
        if !summary.is_quiet() {
            debug!(
                step = step,
                buffered = summary.buffered,
                labeled = summary.labeled,
                closed = summary.closed,
                discarded = summary.discarded,
                pending = summary.pending,
                "Label scan"
            );
        }
        (examples, summary)
    }

    /// Drop everything, e.g. before a new run.
    pub fn clear(&mut self) {
        self.records.clear();
        self.step_summary = LabelSummary::default();
    }
}
