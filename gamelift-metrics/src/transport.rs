// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The external capability that consumes batches of metric messages.
//!
//! The pipeline does not define a wire format; a [`Transport`] is free to
//! split batches, convert them to statsd datagrams, or aggregate further.

use std::sync::Arc;

use crate::error::BoxError;
use crate::message::MetricMessage;

/// A downstream consumer of metric message batches.
///
/// `send` is the only call the flush path may block on; everything upstream
/// of it uses bounded non-blocking handoff. Implementations must be safe to
/// call from multiple worker threads concurrently.
pub trait Transport: Send + Sync {
    /// Deliver an ordered batch of messages. Messages within a batch stay in
    /// the order a single producer enqueued them.
    fn send(&self, batch: &[MetricMessage]) -> Result<(), BoxError>;

    /// Release the underlying resources. Must be idempotent; the processor
    /// calls this exactly once per stop.
    fn close(&self) -> Result<(), BoxError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, batch: &[MetricMessage]) -> Result<(), BoxError> {
        (**self).send(batch)
    }

    fn close(&self) -> Result<(), BoxError> {
        (**self).close()
    }
}
