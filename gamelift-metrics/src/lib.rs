// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process metrics pipeline for long-lived game server processes.
//!
//! Application code records measurements through [`Gauge`], [`Counter`] and
//! [`Timer`] handles built by a [`MetricsFactory`]. Admitted observations
//! flow through a bounded ingest queue into a worker pool owned by the
//! [`Processor`], which batches them, appends derived window statistics,
//! merges process-wide tags and hands the result to a [`Transport`] on a
//! periodic tick. A liveness gauge (`up`) heartbeats every tick and says
//! goodbye exactly once on [`Processor::stop`].
//!
//! The record path never blocks: both internal queue boundaries drop the
//! incoming message when full. The only externally blocking call in the
//! flush path is [`Transport::send`].
//!
//! ```no_run
//! use gamelift_metrics::{MetricsFactory, Processor};
//! use tokio_util::sync::CancellationToken;
//! # struct Statsd;
//! # impl gamelift_metrics::Transport for Statsd {
//! #     fn send(&self, _: &[gamelift_metrics::MetricMessage]) -> Result<(), gamelift_metrics::BoxError> { Ok(()) }
//! #     fn close(&self) -> Result<(), gamelift_metrics::BoxError> { Ok(()) }
//! # }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let processor = Processor::builder().transport(Statsd).build()?;
//! processor.start(CancellationToken::new())?;
//!
//! let factory = MetricsFactory::builder().processor(processor.clone()).build()?;
//! let requests = factory.counter("requests").build()?;
//! requests.increment();
//!
//! let latency = factory.timer("request.latency").build()?;
//! latency.set_milliseconds(12.0);
//!
//! processor.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod derive;
mod error;
pub mod factory;
pub mod global;
mod message;
pub mod metric;
pub mod processor;
pub(crate) mod rate_limit;
pub mod sampler;
mod tags;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
mod transport;

mod registry;

pub use derive::DerivedMetric;
pub use error::{BoxError, MetricsError};
pub use factory::{CounterBuilder, FactoryBuilder, GaugeBuilder, MetricsFactory, TimerBuilder};
pub use message::{MetricMessage, MetricOperation, MetricType};
pub use metric::{Counter, CounterOp, Gauge, GaugeOp, Metric, RunningTimer, Timer, TimerOp};
pub use processor::{Processor, ProcessorBuilder};
pub use sampler::{AlwaysSample, FractionSampler, NeverSample, Sampler};
pub use tags::{validate_tag, validate_tag_key, validate_tag_value};
pub use transport::Transport;
