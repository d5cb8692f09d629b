// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Convenience construction of gauges, counters and timers with shared
//! defaults, plus the process lifecycle hooks that keep the out-of-band
//! crash reporter informed.
//!
//! The crash-reporter calls are best-effort by contract: the hooks log
//! failures and move on, so a dead reporter endpoint can never affect the
//! metrics pipeline or the host process.

use std::collections::BTreeMap;
use std::sync::Arc;

use gamelift_crash_reporter::CrashReporterClient;

use crate::derive::DerivedMetric;
use crate::error::MetricsError;
use crate::message::MetricType;
use crate::metric::{Counter, Gauge, Metric, Timer};
use crate::processor::Processor;
use crate::sampler::{AlwaysSample, Sampler};
use crate::transport::Transport;

/// Percentiles every timer tracks unless configured otherwise.
const DEFAULT_TIMER_PERCENTILES: [f64; 3] = [50.0, 90.0, 95.0];

/// Builder for [`MetricsFactory`].
///
/// The processor is resolved in order: one passed explicitly, then the
/// global singleton, then one built from a supplied transport; with none of
/// the three available, `build` fails with a configuration error.
#[derive(Default)]
pub struct FactoryBuilder {
    processor: Option<Processor>,
    transport: Option<Arc<dyn Transport>>,
    sampler: Option<Arc<dyn Sampler>>,
    default_tags: BTreeMap<String, String>,
    crash_reporter: Option<CrashReporterClient>,
}

impl FactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this processor for every built metric.
    pub fn processor(mut self, processor: Processor) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Fallback transport to build a default-configured processor from when
    /// neither an explicit processor nor the global singleton exists.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sampler shared by every built metric. Defaults to sampling
    /// everything.
    pub fn sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    /// A tag applied to every built metric. Validated when a metric is
    /// built.
    pub fn default_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.insert(key.into(), value.into());
        self
    }

    /// Crash reporter notified by the lifecycle hooks. Without one the
    /// hooks only touch the processor.
    pub fn crash_reporter(mut self, client: CrashReporterClient) -> Self {
        self.crash_reporter = Some(client);
        self
    }

    pub fn build(self) -> Result<MetricsFactory, MetricsError> {
        let processor = match self.processor {
            Some(processor) => processor,
            None => match crate::global::try_get() {
                Some(processor) => processor,
                None => {
                    let transport = self.transport.ok_or_else(|| {
                        MetricsError::configuration(
                            "no processor, global processor, or transport to build one from",
                        )
                    })?;
                    Processor::builder().transport(transport).build()?
                }
            },
        };
        Ok(MetricsFactory {
            processor,
            sampler: self.sampler.unwrap_or_else(|| Arc::new(AlwaysSample)),
            default_tags: self.default_tags,
            crash_reporter: self.crash_reporter,
        })
    }
}

/// Hands out metric builders sharing a processor, a sampler and a base tag
/// set, and relays process lifecycle events to the crash reporter.
pub struct MetricsFactory {
    processor: Processor,
    sampler: Arc<dyn Sampler>,
    default_tags: BTreeMap<String, String>,
    crash_reporter: Option<CrashReporterClient>,
}

impl std::fmt::Debug for MetricsFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsFactory")
            .field("default_tags", &self.default_tags)
            .field("crash_reporter", &self.crash_reporter)
            .finish_non_exhaustive()
    }
}

impl MetricsFactory {
    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::new()
    }

    /// The processor every built metric records through.
    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Start building a gauge.
    pub fn gauge(&self, key: impl Into<String>) -> GaugeBuilder {
        GaugeBuilder {
            parts: self.parts(key.into(), MetricType::Gauge),
        }
    }

    /// Start building a counter.
    pub fn counter(&self, key: impl Into<String>) -> CounterBuilder {
        CounterBuilder {
            parts: self.parts(key.into(), MetricType::Counter),
        }
    }

    /// Start building a timer, pre-configured to track p50, p90 and p95
    /// over each flush window.
    pub fn timer(&self, key: impl Into<String>) -> TimerBuilder {
        let mut parts = self.parts(key.into(), MetricType::Timer);
        parts
            .derived
            .push(DerivedMetric::percentiles(DEFAULT_TIMER_PERCENTILES));
        TimerBuilder { parts }
    }

    fn parts(&self, key: String, metric_type: MetricType) -> BuilderParts {
        BuilderParts {
            key,
            metric_type,
            tags: self.default_tags.clone(),
            sampler: Arc::clone(&self.sampler),
            derived: Vec::new(),
            processor: self.processor.clone(),
        }
    }

    /// Register the host process with the crash reporter. Best-effort.
    pub fn on_process_start(&self) {
        if let Some(reporter) = &self.crash_reporter {
            if let Err(err) = reporter.register_process() {
                tracing::debug!(?err, "crash reporter registration failed");
            }
        }
    }

    /// Tag the crash reporter and the processor with the session that just
    /// started. Best-effort.
    pub fn on_start_game_session(&self, session_id: &str) {
        if let Some(reporter) = &self.crash_reporter {
            if let Err(err) = reporter.tag_game_session(session_id) {
                tracing::debug!(?err, "crash reporter session update failed");
            }
        }
        if let Err(err) = self.processor.on_game_session_started(session_id) {
            tracing::debug!(?err, "rejected session id as global tag");
        }
    }

    /// Deregister the host process from the crash reporter. Best-effort.
    pub fn on_process_termination(&self) {
        if let Some(reporter) = &self.crash_reporter {
            if let Err(err) = reporter.deregister_process() {
                tracing::debug!(?err, "crash reporter deregistration failed");
            }
        }
    }
}

struct BuilderParts {
    key: String,
    metric_type: MetricType,
    tags: BTreeMap<String, String>,
    sampler: Arc<dyn Sampler>,
    derived: Vec<DerivedMetric>,
    processor: Processor,
}

impl BuilderParts {
    fn tag(&mut self, key: String, value: String) {
        self.tags.insert(key, value);
    }

    /// Construct and register, or re-use the existing registration for the
    /// same composite identity. Building twice is deliberately cheap so
    /// builders can be cloned around and re-built.
    fn build(self) -> Result<Arc<Metric>, MetricsError> {
        if self.key.trim().is_empty() {
            return Err(MetricsError::configuration("metric key must not be empty"));
        }
        crate::tags::validate_tags(&self.tags)?;
        let metric = Arc::new(Metric::new(
            self.key,
            self.metric_type,
            self.tags,
            self.sampler,
            self.derived,
            Arc::downgrade(self.processor.core()),
        ));
        let canonical = self.processor.core().register_metric(metric);
        if canonical.metric_type() != self.metric_type {
            return Err(MetricsError::configuration(format!(
                "metric `{}` already registered as a {}",
                canonical.key(),
                canonical.metric_type()
            )));
        }
        Ok(canonical)
    }
}

macro_rules! typed_builder {
    ($(#[$attr:meta])* $builder:ident => $handle:ident) => {
        $(#[$attr])*
        pub struct $builder {
            parts: BuilderParts,
        }

        impl $builder {
            /// Add a per-metric tag, validated at build.
            pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                self.parts.tag(key.into(), value.into());
                self
            }

            /// Replace the factory's sampler for this metric.
            pub fn sampler(mut self, sampler: impl Sampler + 'static) -> Self {
                self.parts.sampler = Arc::new(sampler);
                self
            }

            /// Attach a derived statistic, emitted and reset on every flush.
            pub fn derived(mut self, derived: DerivedMetric) -> Self {
                self.parts.derived.push(derived);
                self
            }

            /// Register (or re-use) the metric and return its handle.
            pub fn build(self) -> Result<$handle, MetricsError> {
                Ok($handle::from_metric(self.parts.build()?))
            }
        }
    };
}

typed_builder! {
    /// Builder for a [`Gauge`].
    GaugeBuilder => Gauge
}

typed_builder! {
    /// Builder for a [`Counter`].
    CounterBuilder => Counter
}

typed_builder! {
    /// Builder for a [`Timer`].
    TimerBuilder => Timer
}

impl TimerBuilder {
    /// Replace the default p50/p90/p95 set with these percentiles.
    pub fn percentiles(mut self, percentiles: impl Into<Vec<f64>>) -> Self {
        self.parts
            .derived
            .retain(|d| !matches!(d, DerivedMetric::Percentile { .. }));
        self.parts
            .derived
            .push(DerivedMetric::percentiles(percentiles));
        self
    }
}
