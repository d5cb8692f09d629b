// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Window-local summary statistics derived from a metric's admitted samples.
//!
//! Each derived metric is owned exclusively by one base metric instance. It
//! observes every admitted sample via [`DerivedMetric::handle_message`],
//! emits zero or more messages at flush time, and is fully zeroed by
//! [`DerivedMetric::reset`] so that every flush interval is an independent
//! window. An empty window emits nothing.
//!
//! The set of statistics is closed, so this is a sum type rather than a
//! trait object; cloning for dimensional variants must be variant-aware
//! (configuration is kept, window state is not).

use std::collections::BTreeMap;

use crate::message::{MetricMessage, MetricType};

/// A window statistic over one metric's admitted samples.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedMetric {
    /// The last sample of the window, emitted as `<key>.latest`.
    Latest {
        /// Last admitted value, if any.
        last: Option<f64>,
    },
    /// The smallest sample of the window, emitted as `<key>.min`.
    Min {
        /// Smallest admitted value, if any.
        min: Option<f64>,
    },
    /// The largest sample of the window, emitted as `<key>.max`.
    Max {
        /// Largest admitted value, if any.
        max: Option<f64>,
    },
    /// The arithmetic mean of the window, emitted as `<key>.mean`.
    Mean {
        /// Sum of admitted values.
        sum: f64,
        /// Number of admitted values.
        count: u64,
    },
    /// Linear-interpolation percentiles over the window, one message per
    /// requested percentile: `<key>.p50`, `<key>.p99.9`, ...
    Percentile {
        /// Requested percentiles in `[0.0, 100.0]`.
        percentiles: Vec<f64>,
        /// All admitted values of the current window.
        window: Vec<f64>,
    },
}

impl DerivedMetric {
    /// Track the last sample of each window.
    pub fn latest() -> Self {
        Self::Latest { last: None }
    }

    /// Track the window minimum.
    pub fn min() -> Self {
        Self::Min { min: None }
    }

    /// Track the window maximum.
    pub fn max() -> Self {
        Self::Max { max: None }
    }

    /// Track the window mean.
    pub fn mean() -> Self {
        Self::Mean { sum: 0.0, count: 0 }
    }

    /// Track the given percentiles over each window.
    pub fn percentiles(percentiles: impl Into<Vec<f64>>) -> Self {
        Self::Percentile {
            percentiles: percentiles.into(),
            window: Vec::new(),
        }
    }

    /// Observe one admitted sample. Called on the record path, after the
    /// sampler admitted the observation and before it is enqueued.
    pub fn handle_message(&mut self, message: &MetricMessage) {
        let value = message.value;
        match self {
            Self::Latest { last } => *last = Some(value),
            Self::Min { min } => {
                *min = Some(min.map_or(value, |m| m.min(value)));
            }
            Self::Max { max } => {
                *max = Some(max.map_or(value, |m| m.max(value)));
            }
            Self::Mean { sum, count } => {
                *sum += value;
                *count += 1;
            }
            Self::Percentile { window, .. } => window.push(value),
        }
    }

    /// Emit the window's messages for the source metric identified by `key`,
    /// `metric_type` and `tags`. Returns nothing for an empty window. All
    /// emitted messages carry a sample rate of 1.0 and the source tags at
    /// emission time.
    pub fn emit_metrics(
        &self,
        key: &str,
        metric_type: MetricType,
        tags: &BTreeMap<String, String>,
    ) -> Vec<MetricMessage> {
        let emit = |suffix: String, value: f64| {
            MetricMessage::new(
                format!("{key}.{suffix}"),
                metric_type,
                value,
                tags.clone(),
                1.0,
            )
        };
        match self {
            Self::Latest { last } => last.map(|v| emit("latest".into(), v)).into_iter().collect(),
            Self::Min { min } => min.map(|v| emit("min".into(), v)).into_iter().collect(),
            Self::Max { max } => max.map(|v| emit("max".into(), v)).into_iter().collect(),
            Self::Mean { sum, count } => {
                if *count == 0 {
                    Vec::new()
                } else {
                    vec![emit("mean".into(), sum / *count as f64)]
                }
            }
            Self::Percentile {
                percentiles,
                window,
            } => {
                if window.is_empty() {
                    return Vec::new();
                }
                let mut sorted = window.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                percentiles
                    .iter()
                    .map(|&p| emit(percentile_suffix(p), percentile_of(&sorted, p)))
                    .collect()
            }
        }
    }

    /// Zero the window state, keeping the configuration.
    pub fn reset(&mut self) {
        match self {
            Self::Latest { last } => *last = None,
            Self::Min { min } => *min = None,
            Self::Max { max } => *max = None,
            Self::Mean { sum, count } => {
                *sum = 0.0;
                *count = 0;
            }
            Self::Percentile { window, .. } => window.clear(),
        }
    }

    /// A fresh instance with the same configuration and an empty window.
    /// Used when a dimensional variant is split off its parent; the clone
    /// shares no mutable storage with the original.
    pub fn clone_fresh(&self) -> Self {
        match self {
            Self::Latest { .. } => Self::latest(),
            Self::Min { .. } => Self::min(),
            Self::Max { .. } => Self::max(),
            Self::Mean { .. } => Self::mean(),
            Self::Percentile { percentiles, .. } => Self::percentiles(percentiles.clone()),
        }
    }
}

/// Key suffix for percentile `p`: `p50` for integers, `p99.9` otherwise.
fn percentile_suffix(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("p{}", p as i64)
    } else {
        format!("p{p:.1}")
    }
}

/// Linear interpolation on an ascending-sorted, non-empty sample vector.
fn percentile_of(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let index = (p / 100.0) * (n - 1) as f64;
    let lower = index.floor() as usize;
    let upper = lower + 1;
    let weight = index - lower as f64;
    if upper >= n {
        sorted[n - 1]
    } else {
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}
