// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The mutable state behind every gauge, counter and timer, plus the typed
//! handles application code records through.
//!
//! `Metric` holds the shared record-path machinery: tag set, current value,
//! exclusively-owned derived statistics, sampler, and a non-owning reference
//! back to the processor. The typed handles are thin `Arc` wrappers whose
//! operation enums ([`GaugeOp`], [`CounterOp`], [`TimerOp`]) lower to the two
//! primitive operations Set and Adjust; no dynamic dispatch is involved on
//! the record path.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use crate::derive::DerivedMetric;
use crate::error::MetricsError;
use crate::message::{MetricMessage, MetricOperation, MetricType};
use crate::processor::ProcessorCore;
use crate::sampler::Sampler;
use crate::tags;

/// Shared state of a single registered (or transient dimensional) metric.
pub struct Metric {
    key: String,
    metric_type: MetricType,
    sampler: Arc<dyn Sampler>,
    tags: RwLock<BTreeMap<String, String>>,
    value: RwLock<f64>,
    // One lock covers the whole derived list: the record path takes it once
    // per admitted sample, and flush holds it across emit+reset so a window
    // is never observed half-zeroed.
    derived: Mutex<Vec<DerivedMetric>>,
    processor: Weak<ProcessorCore>,
}

impl Metric {
    pub(crate) fn new(
        key: String,
        metric_type: MetricType,
        tags: BTreeMap<String, String>,
        sampler: Arc<dyn Sampler>,
        derived: Vec<DerivedMetric>,
        processor: Weak<ProcessorCore>,
    ) -> Self {
        Self {
            key,
            metric_type,
            sampler,
            tags: RwLock::new(tags),
            value: RwLock::new(0.0),
            derived: Mutex::new(derived),
            processor,
        }
    }

    /// The caller-chosen identifier. Never rewritten, even for dimensional
    /// variants.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The kind of this metric, immutable after construction.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// The folded result of all admitted Set/Adjust operations, in commit
    /// order.
    pub fn current_value(&self) -> f64 {
        *self.value.read().unwrap()
    }

    /// A defensive copy of the current tag set.
    pub fn tags(&self) -> BTreeMap<String, String> {
        self.tags.read().unwrap().clone()
    }

    /// Set one tag, validating key and value first. On a validation error
    /// the existing tag set is unchanged.
    pub fn set_tag(&self, key: &str, value: &str) -> Result<(), MetricsError> {
        tags::validate_tag(key, value)?;
        self.tags
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Set several tags at once. All pairs are validated before any is
    /// applied, so a single bad pair rejects the whole call.
    pub fn set_tags(&self, new_tags: &BTreeMap<String, String>) -> Result<(), MetricsError> {
        tags::validate_tags(new_tags)?;
        let mut guard = self.tags.write().unwrap();
        for (k, v) in new_tags {
            guard.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    /// Remove a tag if present.
    pub fn remove_tag(&self, key: &str) {
        self.tags.write().unwrap().remove(key);
    }

    /// The record path shared by every typed operation.
    ///
    /// Admission is decided once per observation: an unsampled operation
    /// leaves the current value unchanged, feeds no derived metric and
    /// enqueues nothing. The ingest send never blocks; with a full or absent
    /// pipeline the message is silently dropped.
    pub(crate) fn record(&self, operation: MetricOperation, value: f64) {
        if !self.sampler.should_sample() {
            return;
        }
        {
            let mut current = self.value.write().unwrap();
            match operation {
                MetricOperation::Set => *current = value,
                MetricOperation::Adjust => *current += value,
            }
        }
        let message = MetricMessage::new(
            self.key.clone(),
            self.metric_type,
            value,
            self.tags(),
            self.sampler.sample_rate(),
        );
        {
            let mut derived = self.derived.lock().unwrap();
            for d in derived.iter_mut() {
                d.handle_message(&message);
            }
        }
        if let Some(core) = self.processor.upgrade() {
            core.enqueue_metric(message);
        }
    }

    /// Emit every derived statistic for the window just ended and zero them.
    /// Returns an empty vector when this metric has no derived statistics or
    /// all windows are empty. Called by flush under the registry lock.
    pub(crate) fn emit_and_reset_derived(&self) -> Vec<MetricMessage> {
        let mut derived = self.derived.lock().unwrap();
        if derived.is_empty() {
            return Vec::new();
        }
        let tags = self.tags();
        let mut out = Vec::new();
        for d in derived.iter_mut() {
            out.extend(d.emit_metrics(&self.key, self.metric_type, &tags));
            d.reset();
        }
        out
    }

    pub(crate) fn has_derived(&self) -> bool {
        !self.derived.lock().unwrap().is_empty()
    }

    /// Whether the owning processor runs in dimensional mode. A metric that
    /// outlived its processor answers false.
    fn dimensional_enabled(&self) -> bool {
        self.processor
            .upgrade()
            .is_some_and(|core| core.dimensional_metrics_enabled())
    }

    /// Tag-variant construction behind `with_tags` on the typed handles.
    ///
    /// With dimensional mode off this applies the tags in place (last write
    /// wins) and returns the same instance. With it on, a new instance with
    /// the combined tags, a zeroed value and fresh derived clones is
    /// registered under its composite identity; the canonical registered
    /// instance is returned so repeated splits converge.
    pub(crate) fn with_tags(
        self: &Arc<Self>,
        new_tags: &BTreeMap<String, String>,
    ) -> Result<Arc<Metric>, MetricsError> {
        tags::validate_tags(new_tags)?;
        if !self.dimensional_enabled() {
            self.set_tags(new_tags)?;
            return Ok(Arc::clone(self));
        }
        let variant = Arc::new(self.dimensional_variant(new_tags));
        let core = self.processor.upgrade();
        match core {
            Some(core) => Ok(core.register_metric(variant)),
            None => Ok(variant),
        }
    }

    /// Like [`Metric::with_tags`] in dimensional mode, but the variant is
    /// transient: it can emit messages under the extra dimensions without
    /// ever entering the registry. With dimensional mode off this degrades
    /// to the in-place behavior.
    pub(crate) fn with_dimensional_tags(
        self: &Arc<Self>,
        new_tags: &BTreeMap<String, String>,
    ) -> Result<Arc<Metric>, MetricsError> {
        tags::validate_tags(new_tags)?;
        if !self.dimensional_enabled() {
            self.set_tags(new_tags)?;
            return Ok(Arc::clone(self));
        }
        Ok(Arc::new(self.dimensional_variant(new_tags)))
    }

    /// A fresh instance sharing only key, type, sampler and processor with
    /// `self`: combined tags (new overrides existing), value zeroed, every
    /// derived statistic cloned into its initial state.
    fn dimensional_variant(&self, new_tags: &BTreeMap<String, String>) -> Metric {
        let mut combined = self.tags();
        for (k, v) in new_tags {
            combined.insert(k.clone(), v.clone());
        }
        let derived = self
            .derived
            .lock()
            .unwrap()
            .iter()
            .map(DerivedMetric::clone_fresh)
            .collect();
        Metric::new(
            self.key.clone(),
            self.metric_type,
            combined,
            Arc::clone(&self.sampler),
            derived,
            Weak::clone(&self.processor),
        )
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric")
            .field("key", &self.key)
            .field("type", &self.metric_type)
            .field("value", &self.current_value())
            .finish()
    }
}

/// A gauge operation, lowered to Set or Adjust on the base metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GaugeOp {
    /// Replace the value.
    Set(f64),
    /// Add a delta.
    Add(f64),
    /// Subtract a delta.
    Subtract(f64),
    /// Add 1.
    Increment,
    /// Subtract 1.
    Decrement,
    /// Set back to 0.
    Reset,
}

impl GaugeOp {
    fn lower(self) -> (MetricOperation, f64) {
        match self {
            Self::Set(v) => (MetricOperation::Set, v),
            Self::Add(v) => (MetricOperation::Adjust, v),
            Self::Subtract(v) => (MetricOperation::Adjust, -v),
            Self::Increment => (MetricOperation::Adjust, 1.0),
            Self::Decrement => (MetricOperation::Adjust, -1.0),
            Self::Reset => (MetricOperation::Set, 0.0),
        }
    }
}

/// A counter operation. `Count(false)` lowers to nothing at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CounterOp {
    /// Add a delta. Zero and negative values are accepted.
    Add(f64),
    /// Add 1.
    Increment,
    /// Add 1 if true, nothing otherwise.
    Count(bool),
}

impl CounterOp {
    fn lower(self) -> Option<(MetricOperation, f64)> {
        match self {
            Self::Add(v) => Some((MetricOperation::Adjust, v)),
            Self::Increment => Some((MetricOperation::Adjust, 1.0)),
            Self::Count(true) => Some((MetricOperation::Adjust, 1.0)),
            Self::Count(false) => None,
        }
    }
}

/// A timer operation; the recorded value is always milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerOp {
    /// Set from a duration, truncated to whole milliseconds.
    Duration(Duration),
    /// Set milliseconds directly.
    Milliseconds(f64),
    /// Set from seconds (`s * 1000`).
    Seconds(f64),
}

impl TimerOp {
    fn lower(self) -> (MetricOperation, f64) {
        let ms = match self {
            Self::Duration(d) => d.as_millis() as f64,
            Self::Milliseconds(ms) => ms,
            Self::Seconds(s) => s * 1000.0,
        };
        (MetricOperation::Set, ms)
    }
}

macro_rules! metric_handle {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone)]
        pub struct $name {
            metric: Arc<Metric>,
        }

        impl $name {
            pub(crate) fn from_metric(metric: Arc<Metric>) -> Self {
                Self { metric }
            }

            /// The underlying shared metric state.
            pub fn metric(&self) -> &Arc<Metric> {
                &self.metric
            }

            /// See [`Metric::key`].
            pub fn key(&self) -> &str {
                self.metric.key()
            }

            /// See [`Metric::current_value`].
            pub fn current_value(&self) -> f64 {
                self.metric.current_value()
            }

            /// See [`Metric::tags`].
            pub fn tags(&self) -> BTreeMap<String, String> {
                self.metric.tags()
            }

            /// See [`Metric::set_tag`].
            pub fn set_tag(&self, key: &str, value: &str) -> Result<(), MetricsError> {
                self.metric.set_tag(key, value)
            }

            /// See [`Metric::set_tags`].
            pub fn set_tags(&self, tags: &BTreeMap<String, String>) -> Result<(), MetricsError> {
                self.metric.set_tags(tags)
            }

            /// See [`Metric::remove_tag`].
            pub fn remove_tag(&self, key: &str) {
                self.metric.remove_tag(key)
            }

            /// Split off (or, with dimensional mode off, retag) this metric
            /// with one extra tag. See [`Metric::with_tags`].
            pub fn with_tag(&self, key: &str, value: &str) -> Result<Self, MetricsError> {
                let tags = BTreeMap::from([(key.to_string(), value.to_string())]);
                self.with_tags(&tags)
            }

            /// Split off (or retag) this metric with extra tags. See
            /// [`Metric::with_tags`].
            pub fn with_tags(&self, tags: &BTreeMap<String, String>) -> Result<Self, MetricsError> {
                Ok(Self::from_metric(self.metric.with_tags(tags)?))
            }

            /// Transient dimensional variant carrying one extra tag; never
            /// registered. See [`Metric::with_dimensional_tags`].
            pub fn with_dimensional_tag(&self, key: &str, value: &str) -> Result<Self, MetricsError> {
                let tags = BTreeMap::from([(key.to_string(), value.to_string())]);
                self.with_dimensional_tags(&tags)
            }

            /// Transient dimensional variant carrying extra tags; never
            /// registered. See [`Metric::with_dimensional_tags`].
            pub fn with_dimensional_tags(
                &self,
                tags: &BTreeMap<String, String>,
            ) -> Result<Self, MetricsError> {
                Ok(Self::from_metric(self.metric.with_dimensional_tags(tags)?))
            }
        }
    };
}

metric_handle! {
    /// A point-in-time value supporting absolute sets and deltas.
    Gauge
}

metric_handle! {
    /// An event counter.
    Counter
}

metric_handle! {
    /// A duration recorder; values are milliseconds.
    Timer
}

impl Gauge {
    /// Apply a gauge operation.
    pub fn apply(&self, op: GaugeOp) {
        let (operation, value) = op.lower();
        self.metric.record(operation, value);
    }

    /// Replace the value.
    pub fn set(&self, value: f64) {
        self.apply(GaugeOp::Set(value));
    }

    /// Add to the value.
    pub fn add(&self, delta: f64) {
        self.apply(GaugeOp::Add(delta));
    }

    /// Subtract from the value.
    pub fn subtract(&self, delta: f64) {
        self.apply(GaugeOp::Subtract(delta));
    }

    /// Add 1.
    pub fn increment(&self) {
        self.apply(GaugeOp::Increment);
    }

    /// Subtract 1.
    pub fn decrement(&self) {
        self.apply(GaugeOp::Decrement);
    }

    /// Set back to 0.
    pub fn reset(&self) {
        self.apply(GaugeOp::Reset);
    }
}

impl Counter {
    /// Apply a counter operation.
    pub fn apply(&self, op: CounterOp) {
        if let Some((operation, value)) = op.lower() {
            self.metric.record(operation, value);
        }
    }

    /// Add to the count. Zero and negative values are accepted; the counter
    /// does not enforce monotonicity at record time.
    pub fn add(&self, value: f64) {
        self.apply(CounterOp::Add(value));
    }

    /// Add 1.
    pub fn increment(&self) {
        self.apply(CounterOp::Increment);
    }

    /// Add 1 if `hit`, otherwise record nothing.
    pub fn count(&self, hit: bool) {
        self.apply(CounterOp::Count(hit));
    }
}

impl Timer {
    /// Apply a timer operation.
    pub fn apply(&self, op: TimerOp) {
        let (operation, value) = op.lower();
        self.metric.record(operation, value);
    }

    /// Record a duration, truncated to whole milliseconds.
    pub fn set_duration(&self, duration: Duration) {
        self.apply(TimerOp::Duration(duration));
    }

    /// Record milliseconds directly.
    pub fn set_milliseconds(&self, ms: f64) {
        self.apply(TimerOp::Milliseconds(ms));
    }

    /// Record seconds, scaled to milliseconds.
    pub fn set_seconds(&self, seconds: f64) {
        self.apply(TimerOp::Seconds(seconds));
    }

    /// Record the wall-clock time elapsed since `start`.
    pub fn elapsed_since(&self, start: Instant) {
        self.set_duration(start.elapsed());
    }

    /// Time `f` wall-clock and record its duration, passing its result
    /// through. The duration is recorded whether or not `f` succeeded.
    pub fn time_fn<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let start = Instant::now();
        let result = f();
        self.elapsed_since(start);
        result
    }

    /// Capture a start instant. Each [`RunningTimer::stop`] call records the
    /// time elapsed since this same instant, so stopping twice re-measures
    /// from the original start.
    pub fn start(&self) -> RunningTimer {
        RunningTimer {
            timer: self.clone(),
            start: Instant::now(),
        }
    }
}

/// A captured start instant for a [`Timer`]. See [`Timer::start`].
#[derive(Debug, Clone)]
pub struct RunningTimer {
    timer: Timer,
    start: Instant,
}

impl RunningTimer {
    /// Record the time elapsed since the captured start.
    pub fn stop(&self) {
        self.timer.elapsed_since(self.start);
    }
}
