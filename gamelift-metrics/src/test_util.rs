// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test fakes for downstream crates (and this crate's own tests).

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BoxError;
use crate::message::MetricMessage;
use crate::transport::Transport;

/// One observed transport call, in call order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A batch handed to `send`.
    Batch(Vec<MetricMessage>),
    /// A `close` call.
    Close,
}

/// A [`Transport`] that records every call for inspection.
///
/// Cloning shares the underlying event log, so a clone can be handed to a
/// processor while the test keeps the original for assertions. `send` can be
/// armed to fail, which the pipeline must log and survive.
#[derive(Clone, Default)]
pub struct TestTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    events: Mutex<Vec<TransportEvent>>,
    fail_sends: AtomicBool,
}

impl TestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` return an error.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Every call observed so far, in order.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Every delivered batch, in order.
    pub fn batches(&self) -> Vec<Vec<MetricMessage>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Batch(batch) => Some(batch),
                TransportEvent::Close => None,
            })
            .collect()
    }

    /// Every delivered message, flattened across batches in order.
    pub fn messages(&self) -> Vec<MetricMessage> {
        self.batches().into_iter().flatten().collect()
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, TransportEvent::Close))
            .count()
    }

    /// Index of the first `close` in the event log, if any.
    pub fn first_close_index(&self) -> Option<usize> {
        self.events()
            .iter()
            .position(|event| matches!(event, TransportEvent::Close))
    }

    /// Index of the first batch containing a message satisfying `pred`.
    pub fn first_batch_index(&self, pred: impl Fn(&MetricMessage) -> bool) -> Option<usize> {
        self.events().iter().position(|event| match event {
            TransportEvent::Batch(batch) => batch.iter().any(&pred),
            TransportEvent::Close => false,
        })
    }
}

impl Transport for TestTransport {
    fn send(&self, batch: &[MetricMessage]) -> Result<(), BoxError> {
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err("armed send failure".into());
        }
        self.inner
            .events
            .lock()
            .unwrap()
            .push(TransportEvent::Batch(batch.to_vec()));
        Ok(())
    }

    fn close(&self) -> Result<(), BoxError> {
        self.inner.events.lock().unwrap().push(TransportEvent::Close);
        Ok(())
    }
}
