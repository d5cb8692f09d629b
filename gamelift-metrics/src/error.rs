// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Boxed error type returned by [`Transport`](crate::Transport) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error surfaced by the metrics pipeline.
///
/// Only operations where the caller can act return errors synchronously:
/// construction, start/stop, and tag validation. Internal pipeline failures
/// are logged and swallowed so a downstream outage can never stall a record
/// path.
#[derive(Debug)]
pub enum MetricsError {
    /// A tag key or value violated the character or length rules. The
    /// existing state was left unchanged.
    Validation(String),
    /// A builder was missing a required field, a numeric bound was invalid,
    /// or a lifecycle operation was called in the wrong state.
    Configuration(String),
    /// The transport failed to send or close.
    Transport(BoxError),
}

impl MetricsError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(reason) => write!(f, "invalid tag: {reason}"),
            Self::Configuration(reason) => write!(f, "invalid configuration: {reason}"),
            Self::Transport(err) => write!(f, "transport failure: {err}"),
        }
    }
}

impl std::error::Error for MetricsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(&**err),
            _ => None,
        }
    }
}
