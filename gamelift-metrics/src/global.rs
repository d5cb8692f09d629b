// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide processor accessor.
//!
//! Libraries that emit metrics on behalf of the host process need a
//! rendezvous point without being handed a processor explicitly. The global
//! cell installs at most one [`Processor`] per process: `set` on an occupied
//! cell is a silent no-op (the only install is expected to happen inside the
//! once-guarded bootstrap), while [`init`] surfaces the conflict as a
//! configuration error. A failed build does not occupy the cell, so a
//! corrected configuration can retry.

use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use crate::error::MetricsError;
use crate::processor::{Processor, ProcessorBuilder};

static GLOBAL: ProcessorCell = ProcessorCell::new();

/// Install `processor` as the process-wide singleton. No-op if one is
/// already installed.
pub fn set(processor: Processor) {
    GLOBAL.set(processor);
}

/// Whether a global processor is installed.
pub fn has() -> bool {
    GLOBAL.has()
}

/// A clone of the global processor, if any.
pub fn try_get() -> Option<Processor> {
    GLOBAL.try_get()
}

/// Build a processor from `builder` and install it as the singleton.
///
/// Fails with a configuration error when a global processor already exists;
/// the existing processor is never replaced or reconfigured. A failed build
/// leaves the cell empty.
pub fn init(builder: ProcessorBuilder) -> Result<Processor, MetricsError> {
    GLOBAL.init(builder)
}

/// Start the global processor. See [`Processor::start`].
pub fn start(shutdown: CancellationToken) -> Result<(), MetricsError> {
    GLOBAL.require()?.start(shutdown)
}

/// Stop the global processor. See [`Processor::stop`].
pub fn stop() -> Result<(), MetricsError> {
    GLOBAL.require()?.stop()
}

/// Tag all subsequent messages with the session that just started. See
/// [`Processor::on_game_session_started`].
pub fn on_game_session_started(session_id: &str) -> Result<(), MetricsError> {
    GLOBAL.require()?.on_game_session_started(session_id)
}

struct ProcessorCell {
    cell: RwLock<Option<Processor>>,
}

impl ProcessorCell {
    const fn new() -> Self {
        Self {
            cell: RwLock::new(None),
        }
    }

    fn set(&self, processor: Processor) {
        let mut cell = self.cell.write().unwrap();
        if cell.is_none() {
            *cell = Some(processor);
        }
    }

    fn has(&self) -> bool {
        self.cell.read().unwrap().is_some()
    }

    fn try_get(&self) -> Option<Processor> {
        self.cell.read().unwrap().clone()
    }

    fn require(&self) -> Result<Processor, MetricsError> {
        self.try_get()
            .ok_or_else(|| MetricsError::configuration("no global processor installed"))
    }

    fn init(&self, builder: ProcessorBuilder) -> Result<Processor, MetricsError> {
        // Hold the write lock across build so two racing inits cannot both
        // succeed.
        let mut cell = self.cell.write().unwrap();
        if cell.is_some() {
            return Err(MetricsError::configuration(
                "metrics processor already initialized",
            ));
        }
        let processor = builder.build()?;
        *cell = Some(processor.clone());
        Ok(processor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestTransport;

    fn builder() -> ProcessorBuilder {
        Processor::builder()
            .transport(TestTransport::new())
            .dimensional_metrics(false)
    }

    #[test]
    fn init_once_then_configuration_error() {
        let cell = ProcessorCell::new();
        cell.init(builder()).unwrap();
        assert!(cell.has());
        assert!(matches!(
            cell.init(builder()).unwrap_err(),
            MetricsError::Configuration(_)
        ));
    }

    #[test]
    fn failed_init_does_not_consume_the_guard() {
        let cell = ProcessorCell::new();
        // missing transport fails the build
        assert!(cell.init(ProcessorBuilder::new()).is_err());
        assert!(!cell.has());
        // a corrected configuration can retry
        cell.init(builder()).unwrap();
        assert!(cell.has());
    }

    #[test]
    fn set_is_first_writer_wins() {
        let cell = ProcessorCell::new();
        let first = builder().build().unwrap();
        first.set_global_tag("origin", "first").unwrap();
        cell.set(first);
        let second = builder().build().unwrap();
        cell.set(second);
        let installed = cell.try_get().unwrap();
        assert_eq!(installed.global_tags()["origin"], "first");
    }

    #[test]
    fn require_reports_missing_processor() {
        let cell = ProcessorCell::new();
        assert!(matches!(
            cell.require().unwrap_err(),
            MetricsError::Configuration(_)
        ));
    }
}
