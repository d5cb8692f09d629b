// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The unit crossing the ingest channel and, eventually, the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// The kind of measurement a metric records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// A point-in-time value that can be set absolutely or adjusted.
    Gauge,
    /// A monotonically recorded count of events. Negative adjustments are
    /// accepted; monotonicity is not enforced at record time.
    Counter,
    /// A duration in milliseconds.
    Timer,
}

impl MetricType {
    /// The lowercase string form used by downstream statsd conversion.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two primitive operations every typed metric operation lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricOperation {
    /// Replace the current value.
    Set,
    /// Add to the current value. Negative deltas are allowed.
    Adjust,
}

/// A single observation flowing from a metric to the transport.
///
/// The `value` is absolute for Set operations and a delta for Adjust
/// operations; the transport decides how to encode the distinction. Tags are
/// a snapshot taken when the observation was admitted; global tags are merged
/// in (and win on collision) at flush time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricMessage {
    /// Stable identifier chosen by the caller, never rewritten.
    pub key: String,
    /// Kind of the source metric.
    pub metric_type: MetricType,
    /// Absolute value (Set) or delta (Adjust).
    pub value: f64,
    /// Dimensional tags attached to this observation.
    pub tags: BTreeMap<String, String>,
    /// Admission rate of the sampler that admitted this observation, in
    /// `[0.0, 1.0]`.
    pub sample_rate: f64,
    /// Wall-clock time the observation was admitted.
    pub timestamp: SystemTime,
}

impl MetricMessage {
    pub(crate) fn new(
        key: impl Into<String>,
        metric_type: MetricType,
        value: f64,
        tags: BTreeMap<String, String>,
        sample_rate: f64,
    ) -> Self {
        Self {
            key: key.into(),
            metric_type,
            value,
            tags,
            sample_rate,
            timestamp: SystemTime::now(),
        }
    }
}
