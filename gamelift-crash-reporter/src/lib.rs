// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the out-of-band crash reporter.
//!
//! The reporter is a separate process watching game server health. This
//! client covers its three lifecycle endpoints — register, session update,
//! deregister — as plain HTTP GETs with a bounded timeout. Callers treat
//! the calls as fire-and-forget: any 2xx is success, anything else is an
//! error the caller is free to (and usually should) ignore.

use std::fmt;
use std::time::Duration;

/// Crash reporter host, read at construction. Defaults to `localhost`.
pub const ENV_CRASH_REPORTER_HOST: &str = "GAMELIFT_CRASH_REPORTER_HOST";

/// Crash reporter port, read at construction. Defaults to `8126`.
pub const ENV_CRASH_REPORTER_PORT: &str = "GAMELIFT_CRASH_REPORTER_PORT";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8126;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// An error from the crash reporter client.
#[derive(Debug)]
pub enum CrashReporterError {
    /// Bad host/port configuration or an invalid argument such as an empty
    /// session id.
    Configuration(String),
    /// The reporter answered with a non-2xx status.
    Status(u16),
    /// The request never completed (connection refused, timeout, ...).
    Transport(Box<ureq::Error>),
}

impl fmt::Display for CrashReporterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(reason) => write!(f, "invalid configuration: {reason}"),
            Self::Status(code) => write!(f, "crash reporter answered {code}"),
            Self::Transport(err) => write!(f, "crash reporter unreachable: {err}"),
        }
    }
}

impl std::error::Error for CrashReporterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Client for the crash reporter's lifecycle endpoints.
#[derive(Clone)]
pub struct CrashReporterClient {
    agent: ureq::Agent,
    base: String,
    pid: u32,
}

impl fmt::Debug for CrashReporterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashReporterClient")
            .field("base", &self.base)
            .field("pid", &self.pid)
            .finish()
    }
}

impl CrashReporterClient {
    /// Client for a reporter at `host:port`. The port must be non-zero.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, CrashReporterError> {
        let host = host.into();
        if host.is_empty() {
            return Err(CrashReporterError::Configuration(
                "host must not be empty".into(),
            ));
        }
        if port == 0 {
            return Err(CrashReporterError::Configuration(
                "port must be non-zero".into(),
            ));
        }
        Ok(Self {
            agent: ureq::AgentBuilder::new()
                .timeout(REQUEST_TIMEOUT)
                .build(),
            base: format!("http://{host}:{port}"),
            pid: std::process::id(),
        })
    }

    /// Client configured from `GAMELIFT_CRASH_REPORTER_HOST` and
    /// `GAMELIFT_CRASH_REPORTER_PORT`, with `localhost:8126` defaults.
    pub fn from_env() -> Result<Self, CrashReporterError> {
        let host =
            std::env::var(ENV_CRASH_REPORTER_HOST).unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = match std::env::var(ENV_CRASH_REPORTER_PORT) {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                CrashReporterError::Configuration(format!(
                    "{ENV_CRASH_REPORTER_PORT} must be a port number, got `{raw}`"
                ))
            })?,
            Err(_) => DEFAULT_PORT,
        };
        Self::new(host, port)
    }

    /// `GET /register?process_pid={pid}` — announce this process.
    pub fn register_process(&self) -> Result<(), CrashReporterError> {
        self.get("register", &[])
    }

    /// `GET /update?process_pid={pid}&session_id={id}` — tag the current
    /// game session. An empty id is rejected client-side.
    pub fn tag_game_session(&self, session_id: &str) -> Result<(), CrashReporterError> {
        if session_id.is_empty() {
            return Err(CrashReporterError::Configuration(
                "session id must not be empty".into(),
            ));
        }
        self.get("update", &[("session_id", session_id)])
    }

    /// `GET /deregister?process_pid={pid}` — say goodbye.
    pub fn deregister_process(&self) -> Result<(), CrashReporterError> {
        self.get("deregister", &[])
    }

    fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<(), CrashReporterError> {
        let pid = self.pid.to_string();
        let mut request = self
            .agent
            .get(&format!("{}/{endpoint}", self.base))
            .query("process_pid", &pid);
        for (key, value) in query {
            request = request.query(key, value);
        }
        match request.call() {
            Ok(_response) => Ok(()),
            Err(ureq::Error::Status(code, _response)) => {
                tracing::debug!(code, endpoint, "crash reporter rejected request");
                Err(CrashReporterError::Status(code))
            }
            Err(err) => {
                tracing::debug!(?err, endpoint, "crash reporter request failed");
                Err(CrashReporterError::Transport(Box::new(err)))
            }
        }
    }
}
