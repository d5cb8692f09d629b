// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The scheduler at the center of the pipeline.
//!
//! Record paths push messages onto a bounded ingest ring buffer. A
//! supervisor thread forwards them to a bounded batching ring buffer drained
//! by a pool of workers, each holding a private buffer that is flushed on a
//! periodic tick. Both ring-buffer boundaries drop the incoming message when
//! full; a record call never blocks on a slow collector.
//!
//! Every worker tick also emits the `up=1` liveness heartbeat directly
//! through the transport. `stop()` emits `up=0` exactly once, before any
//! worker exits and before the transport is closed.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::sync::{Parker, Unparker};
use tokio_util::sync::CancellationToken;

use crate::error::MetricsError;
use crate::message::{MetricMessage, MetricType};
use crate::metric::Metric;
use crate::rate_limit::rate_limited;
use crate::registry::{MetricRegistry, composite_key};
use crate::sampler::AlwaysSample;
use crate::transport::Transport;

/// Boolean env switch for dimensional metrics; `true`/`1` (any case) turns
/// the mode on, everything else (including unset) leaves it off.
pub const ENV_DIMENSIONAL_METRICS: &str = "GAMELIFT_ENABLE_DIMENSIONAL_METRICS";

/// Host-process identifier, used as the `gamelift_process_id` global tag and
/// the logging span identifier.
pub const ENV_PROCESS_ID: &str = "GAMELIFT_SDK_PROCESS_ID";

/// Key of the liveness heartbeat gauge.
pub const UP_METRIC_KEY: &str = "up";

const TAG_PROCESS_PID: &str = "process_pid";
const TAG_GAMELIFT_PROCESS_ID: &str = "gamelift_process_id";
const TAG_SESSION_ID: &str = "session_id";

const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_INGEST_CAPACITY: usize = 4096;
const DEFAULT_BATCH_CAPACITY: usize = 10_000;
const DEFAULT_WORKERS: usize = 10;
const WORKER_BUFFER_CAPACITY: usize = 1024;

fn parse_bool_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw.eq_ignore_ascii_case("true") || raw == "1"
}

pub(crate) fn dimensional_mode_from_env() -> bool {
    std::env::var(ENV_DIMENSIONAL_METRICS)
        .map(|v| parse_bool_flag(&v))
        .unwrap_or(false)
}

pub(crate) fn process_identifier() -> String {
    std::env::var(ENV_PROCESS_ID)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "metrics_processor".to_string())
}

/// Builder for [`Processor`]. The transport is required; everything else has
/// defaults.
pub struct ProcessorBuilder {
    transport: Option<Arc<dyn Transport>>,
    process_interval: Duration,
    ingest_capacity: usize,
    batch_capacity: usize,
    workers: usize,
    enable_derived_metrics: bool,
    dimensional_metrics: Option<bool>,
    global_tags: BTreeMap<String, String>,
}

impl Default for ProcessorBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            process_interval: DEFAULT_PROCESS_INTERVAL,
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            workers: DEFAULT_WORKERS,
            enable_derived_metrics: true,
            dimensional_metrics: None,
            global_tags: BTreeMap::new(),
        }
    }
}

impl ProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The downstream consumer of metric batches. Required.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// How often each worker flushes its buffer and heartbeats. Defaults to
    /// 10 seconds.
    pub fn process_interval(mut self, interval: Duration) -> Self {
        self.process_interval = interval;
        self
    }

    /// Capacity of the ingest ring buffer between record paths and the
    /// supervisor. Defaults to 4096.
    pub fn ingest_capacity(mut self, capacity: usize) -> Self {
        self.ingest_capacity = capacity;
        self
    }

    /// Capacity of the batching ring buffer between the supervisor and the
    /// workers. Defaults to 10000.
    pub fn batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = capacity;
        self
    }

    /// Number of worker threads. Defaults to 10.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Whether flushes emit derived statistics. Defaults to true.
    pub fn enable_derived_metrics(mut self, enabled: bool) -> Self {
        self.enable_derived_metrics = enabled;
        self
    }

    /// Whether tag combinations register distinct metric instances. Defaults
    /// to the `GAMELIFT_ENABLE_DIMENSIONAL_METRICS` environment variable,
    /// read at build time. Read-only after construction.
    pub fn dimensional_metrics(mut self, enabled: bool) -> Self {
        self.dimensional_metrics = Some(enabled);
        self
    }

    /// Add a process-wide tag merged into every outgoing message at flush
    /// time. Validated at build.
    pub fn global_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_tags.insert(key.into(), value.into());
        self
    }

    /// Build the processor. Fails with a configuration error on a missing
    /// transport or a zero interval/capacity/worker count, and with a
    /// validation error on an invalid global tag.
    pub fn build(self) -> Result<Processor, MetricsError> {
        let transport = self
            .transport
            .ok_or_else(|| MetricsError::configuration("a transport is required"))?;
        if self.process_interval.is_zero() {
            return Err(MetricsError::configuration(
                "process interval must be non-zero",
            ));
        }
        if self.ingest_capacity == 0 {
            return Err(MetricsError::configuration(
                "ingest capacity must be non-zero",
            ));
        }
        if self.batch_capacity == 0 {
            return Err(MetricsError::configuration(
                "batch capacity must be non-zero",
            ));
        }
        if self.workers == 0 {
            return Err(MetricsError::configuration("worker count must be non-zero"));
        }
        crate::tags::validate_tags(&self.global_tags)?;

        let mut global_tags = BTreeMap::new();
        global_tags.insert(TAG_PROCESS_PID.to_string(), std::process::id().to_string());
        if let Ok(process_id) = std::env::var(ENV_PROCESS_ID) {
            if !process_id.is_empty() {
                match crate::tags::validate_tag_value(&process_id) {
                    Ok(()) => {
                        global_tags.insert(TAG_GAMELIFT_PROCESS_ID.to_string(), process_id);
                    }
                    Err(err) => {
                        tracing::warn!(?err, "ignoring invalid {ENV_PROCESS_ID} value");
                    }
                }
            }
        }
        global_tags.extend(self.global_tags);

        let dimensional = self
            .dimensional_metrics
            .unwrap_or_else(dimensional_mode_from_env);

        Ok(Processor {
            core: Arc::new(ProcessorCore {
                transport,
                process_interval: self.process_interval,
                ingest_capacity: self.ingest_capacity,
                batch_capacity: self.batch_capacity,
                workers: self.workers,
                enable_derived: self.enable_derived_metrics,
                dimensional,
                process_id: process_identifier(),
                state: Mutex::new(State {
                    global_tags,
                    registry: MetricRegistry::default(),
                    started: false,
                    up_gauge: None,
                }),
                pipeline: RwLock::new(None),
                threads: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(()),
                stopping: AtomicBool::new(false),
            }),
        })
    }
}

/// The process-wide metrics scheduler. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct Processor {
    core: Arc<ProcessorCore>,
}

struct State {
    global_tags: BTreeMap<String, String>,
    registry: MetricRegistry,
    started: bool,
    up_gauge: Option<Arc<Metric>>,
}

struct Pipeline {
    ingest: Arc<ArrayQueue<MetricMessage>>,
    supervisor_unparker: Unparker,
    worker_unparkers: Vec<Unparker>,
    shutdown: Arc<AtomicBool>,
}

pub(crate) struct ProcessorCore {
    transport: Arc<dyn Transport>,
    process_interval: Duration,
    ingest_capacity: usize,
    batch_capacity: usize,
    workers: usize,
    enable_derived: bool,
    dimensional: bool,
    process_id: String,
    // One mutex guards global tags, the registry, the started flag and the
    // up gauge. Held only briefly and never across Transport::send.
    state: Mutex<State>,
    // The live channel generation; None while stopped. Reallocated by every
    // start so old queues become garbage once their readers exit.
    pipeline: RwLock<Option<Pipeline>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    // Serializes start/stop so a stop can never tear down a pipeline that a
    // racing start is still wiring up.
    lifecycle: Mutex<()>,
    // Raised by stop() before the up=0 send so no heartbeat can trail it.
    stopping: AtomicBool,
}

impl Processor {
    /// Start building a processor.
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::new()
    }

    /// Spawn the supervisor and worker pool and register the `up` gauge.
    ///
    /// Cancelling `shutdown` drains and exits the workers without the `up=0`
    /// farewell; callers are still expected to call [`Processor::stop`].
    /// Starting an already-started processor is a configuration error.
    pub fn start(&self, shutdown: CancellationToken) -> Result<(), MetricsError> {
        let core = &self.core;
        let _lifecycle = core.lifecycle.lock().unwrap();
        let mut state = core.state.lock().unwrap();
        if state.started {
            return Err(MetricsError::configuration("processor already started"));
        }

        let ingest = Arc::new(ArrayQueue::new(core.ingest_capacity));
        let batching = Arc::new(ArrayQueue::new(core.batch_capacity));
        let shutdown_signal = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::with_capacity(core.workers + 1);
        let mut worker_unparkers = Vec::with_capacity(core.workers);

        for index in 0..core.workers {
            let parker = Parker::new();
            worker_unparkers.push(parker.unparker().clone());
            let worker = Worker {
                index,
                core: Arc::downgrade(core),
                batching: Arc::clone(&batching),
                shutdown: Arc::clone(&shutdown_signal),
                cancel: shutdown.clone(),
                parker,
                interval: core.process_interval,
                buffer: Vec::with_capacity(WORKER_BUFFER_CAPACITY),
                process_id: core.process_id.clone(),
            };
            threads.push(
                thread::Builder::new()
                    .name(format!("metrics-worker-{index}"))
                    .spawn(move || worker.run())
                    .unwrap(),
            );
        }

        let supervisor_parker = Parker::new();
        let supervisor_unparker = supervisor_parker.unparker().clone();
        let supervisor = Supervisor {
            ingest: Arc::clone(&ingest),
            batching,
            worker_unparkers: worker_unparkers.clone(),
            next_worker: 0,
            shutdown: Arc::clone(&shutdown_signal),
            cancel: shutdown,
            parker: supervisor_parker,
            interval: core.process_interval,
            process_id: core.process_id.clone(),
        };
        threads.push(
            thread::Builder::new()
                .name("metrics-supervisor".to_string())
                .spawn(move || supervisor.run())
                .unwrap(),
        );

        if state.up_gauge.is_none() {
            let up = Arc::new(Metric::new(
                UP_METRIC_KEY.to_string(),
                MetricType::Gauge,
                BTreeMap::new(),
                Arc::new(AlwaysSample),
                Vec::new(),
                Arc::downgrade(core),
            ));
            state.registry.register(UP_METRIC_KEY.to_string(), Arc::clone(&up));
            state.up_gauge = Some(up);
        }
        state.started = true;
        drop(state);

        *core.pipeline.write().unwrap() = Some(Pipeline {
            ingest,
            supervisor_unparker,
            worker_unparkers,
            shutdown: shutdown_signal,
        });
        core.threads.lock().unwrap().extend(threads);
        tracing::info!(workers = core.workers, "metrics processor started");
        Ok(())
    }

    /// Shut the pipeline down.
    ///
    /// Emits the `up=0` farewell synchronously before any other shutdown
    /// activity, then signals the threads, waits for them to drain and exit,
    /// and closes the transport. Stopping an already-stopped processor is a
    /// silent success; the processor can be started again afterwards.
    pub fn stop(&self) -> Result<(), MetricsError> {
        let core = &self.core;
        let _lifecycle = core.lifecycle.lock().unwrap();
        let global_tags = {
            let mut state = core.state.lock().unwrap();
            if !state.started {
                return Ok(());
            }
            state.started = false;
            state.global_tags.clone()
        };

        core.stopping.store(true, Ordering::SeqCst);
        let farewell = MetricMessage::new(UP_METRIC_KEY, MetricType::Gauge, 0.0, global_tags, 1.0);
        if let Err(err) = core.transport.send(std::slice::from_ref(&farewell)) {
            tracing::error!(?err, "failed to send shutdown heartbeat");
        }

        if let Some(pipeline) = core.pipeline.write().unwrap().take() {
            pipeline.shutdown.store(true, Ordering::SeqCst);
            pipeline.supervisor_unparker.unpark();
            for unparker in &pipeline.worker_unparkers {
                unparker.unpark();
            }
        }
        let threads = std::mem::take(&mut *core.threads.lock().unwrap());
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("metrics thread panicked before join");
            }
        }

        let closed = core.transport.close();
        core.stopping.store(false, Ordering::SeqCst);
        tracing::info!("metrics processor stopped");
        closed.map_err(MetricsError::Transport)
    }

    /// Whether [`Processor::start`] has run without a matching stop.
    pub fn is_started(&self) -> bool {
        self.core.state.lock().unwrap().started
    }

    /// Set a process-wide tag merged into every outgoing message at flush
    /// time, overriding per-metric tags on collision.
    pub fn set_global_tag(&self, key: &str, value: &str) -> Result<(), MetricsError> {
        crate::tags::validate_tag(key, value)?;
        self.core
            .state
            .lock()
            .unwrap()
            .global_tags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Remove a global tag if present.
    pub fn remove_global_tag(&self, key: &str) {
        self.core.state.lock().unwrap().global_tags.remove(key);
    }

    /// A snapshot of the current global tags.
    pub fn global_tags(&self) -> BTreeMap<String, String> {
        self.core.state.lock().unwrap().global_tags.clone()
    }

    /// Tag all subsequent messages with the session that just started.
    /// An empty id is ignored.
    pub fn on_game_session_started(&self, session_id: &str) -> Result<(), MetricsError> {
        if session_id.is_empty() {
            return Ok(());
        }
        self.set_global_tag(TAG_SESSION_ID, session_id)
    }

    /// Look a metric up by its registry identity.
    pub fn get_metric(&self, identity: &str) -> Option<Arc<Metric>> {
        self.core.state.lock().unwrap().registry.get(identity)
    }

    /// All currently registered metrics.
    pub fn list_metrics(&self) -> Vec<Arc<Metric>> {
        self.core.state.lock().unwrap().registry.list()
    }

    /// Drop a metric from the registry, returning it if it was present.
    pub fn unregister_metric(&self, identity: &str) -> Option<Arc<Metric>> {
        self.core.state.lock().unwrap().registry.remove(identity)
    }

    /// Whether tag combinations register distinct metric instances.
    pub fn dimensional_metrics_enabled(&self) -> bool {
        self.core.dimensional
    }

    pub(crate) fn core(&self) -> &Arc<ProcessorCore> {
        &self.core
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("started", &self.is_started())
            .field("dimensional", &self.core.dimensional)
            .finish()
    }
}

impl ProcessorCore {
    /// Non-blocking handoff from a record path. With a stopped processor or
    /// a full ingest buffer the message is dropped; observation cost must
    /// not exceed observation value, so drops are silent.
    pub(crate) fn enqueue_metric(&self, message: MetricMessage) {
        let pipeline = self.pipeline.read().unwrap();
        if let Some(pipeline) = pipeline.as_ref() {
            if pipeline.ingest.push(message).is_ok() {
                pipeline.supervisor_unparker.unpark();
            }
        }
    }

    /// Install `metric` under its composite identity iff absent, returning
    /// the canonical registered instance.
    pub(crate) fn register_metric(&self, metric: Arc<Metric>) -> Arc<Metric> {
        let identity = composite_key(metric.key(), &metric.tags(), self.dimensional);
        self.state
            .lock()
            .unwrap()
            .registry
            .register(identity, metric)
    }

    pub(crate) fn dimensional_metrics_enabled(&self) -> bool {
        self.dimensional
    }

    /// Append derived emissions (under the registry lock), merge global tags
    /// over every message, and hand the batch to the transport. Send errors
    /// are logged and the batch is dropped; the worker carries on.
    fn flush_batch(&self, buffer: &mut Vec<MetricMessage>) {
        let global_tags = {
            let state = self.state.lock().unwrap();
            if self.enable_derived {
                for metric in state.registry.iter() {
                    if metric.has_derived() {
                        buffer.extend(metric.emit_and_reset_derived());
                    }
                }
            }
            state.global_tags.clone()
        };
        for message in buffer.iter_mut() {
            for (key, value) in &global_tags {
                message.tags.insert(key.clone(), value.clone());
            }
        }
        if let Err(err) = self.transport.send(buffer) {
            rate_limited!(
                Duration::from_secs(1),
                tracing::error!(?err, "failed to send metrics batch")
            );
        }
    }

    /// Emit `up=1` straight through the transport, bypassing the worker
    /// buffer. Suppressed once stop() has begun so the farewell stays last.
    fn send_server_up_heartbeat(&self) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        let global_tags = self.state.lock().unwrap().global_tags.clone();
        let heartbeat = MetricMessage::new(UP_METRIC_KEY, MetricType::Gauge, 1.0, global_tags, 1.0);
        if let Err(err) = self.transport.send(std::slice::from_ref(&heartbeat)) {
            rate_limited!(
                Duration::from_secs(1),
                tracing::error!(?err, "failed to send heartbeat")
            );
        }
    }
}

/// Forwards ingest messages to the batching buffer.
struct Supervisor {
    ingest: Arc<ArrayQueue<MetricMessage>>,
    batching: Arc<ArrayQueue<MetricMessage>>,
    worker_unparkers: Vec<Unparker>,
    next_worker: usize,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
    parker: Parker,
    interval: Duration,
    process_id: String,
}

impl Supervisor {
    fn run(mut self) {
        let span =
            tracing::span!(tracing::Level::DEBUG, "metrics_supervisor", process_id = %self.process_id);
        let _enter = span.enter();
        loop {
            while let Some(message) = self.ingest.pop() {
                // push failure means the batching buffer is full; the
                // message is dropped
                if self.batching.push(message).is_ok() {
                    let unparker = &self.worker_unparkers[self.next_worker];
                    self.next_worker = (self.next_worker + 1) % self.worker_unparkers.len();
                    unparker.unpark();
                }
            }
            if self.shutdown.load(Ordering::Relaxed) || self.cancel.is_cancelled() {
                tracing::debug!("metrics supervisor exiting");
                return;
            }
            // woken early by enqueues; the timeout bounds how long a
            // cancellation can go unnoticed
            self.parker.park_timeout(self.interval);
        }
    }
}

/// Drains the batching buffer into a private buffer and flushes on tick.
struct Worker {
    index: usize,
    core: Weak<ProcessorCore>,
    batching: Arc<ArrayQueue<MetricMessage>>,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
    parker: Parker,
    interval: Duration,
    buffer: Vec<MetricMessage>,
    process_id: String,
}

impl Worker {
    fn run(mut self) {
        let span = tracing::span!(
            tracing::Level::DEBUG,
            "metrics_worker",
            worker = self.index,
            process_id = %self.process_id
        );
        let _enter = span.enter();
        let mut next_tick = Instant::now() + self.interval;
        loop {
            while let Some(message) = self.batching.pop() {
                if self.buffer.len() >= WORKER_BUFFER_CAPACITY {
                    self.flush();
                }
                self.buffer.push(message);
            }
            if Instant::now() >= next_tick {
                if let Some(core) = self.core.upgrade() {
                    core.send_server_up_heartbeat();
                }
                self.flush();
                next_tick = Instant::now() + self.interval;
            }
            if self.shutdown.load(Ordering::Relaxed) || self.cancel.is_cancelled() {
                break;
            }
            if self.core.strong_count() == 0 {
                tracing::debug!("processor dropped, metrics worker exiting");
                break;
            }
            self.parker.park_deadline(next_tick);
        }
        self.flush();
        tracing::debug!("metrics worker exiting");
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let Some(core) = self.core.upgrade() else {
            self.buffer.clear();
            return;
        };
        let flushed = std::panic::catch_unwind(AssertUnwindSafe(|| {
            core.flush_batch(&mut self.buffer);
        }));
        self.buffer.clear();
        if flushed.is_err() {
            rate_limited!(
                Duration::from_secs(1),
                tracing::error!("panic while flushing metrics batch")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestTransport;

    fn quick_builder(transport: &TestTransport) -> ProcessorBuilder {
        Processor::builder()
            .transport(transport.clone())
            .dimensional_metrics(false)
            .process_interval(Duration::from_millis(50))
            .workers(2)
    }

    #[test]
    fn builder_requires_a_transport() {
        let err = Processor::builder().build().unwrap_err();
        assert!(matches!(err, MetricsError::Configuration(_)));
    }

    #[test]
    fn builder_rejects_zero_bounds() {
        let transport = TestTransport::new();
        for builder in [
            quick_builder(&transport).process_interval(Duration::ZERO),
            quick_builder(&transport).ingest_capacity(0),
            quick_builder(&transport).batch_capacity(0),
            quick_builder(&transport).workers(0),
        ] {
            assert!(matches!(
                builder.build().unwrap_err(),
                MetricsError::Configuration(_)
            ));
        }
    }

    #[test]
    fn default_global_tags_carry_the_pid() {
        let transport = TestTransport::new();
        let processor = quick_builder(&transport).build().unwrap();
        let tags = processor.global_tags();
        assert_eq!(tags["process_pid"], std::process::id().to_string());
    }

    #[test]
    fn global_tag_validation_is_synchronous() {
        let transport = TestTransport::new();
        let processor = quick_builder(&transport).build().unwrap();
        assert!(processor.set_global_tag("service", "api").is_ok());
        assert!(processor.set_global_tag("bad key", "api").is_err());
        assert!(processor.set_global_tag("service", "a b").is_err());
        assert_eq!(processor.global_tags()["service"], "api");
        processor.remove_global_tag("service");
        assert!(!processor.global_tags().contains_key("service"));
    }

    #[test]
    fn second_start_fails_stop_is_idempotent() {
        let transport = TestTransport::new();
        let processor = quick_builder(&transport).build().unwrap();
        processor.start(CancellationToken::new()).unwrap();
        assert!(matches!(
            processor.start(CancellationToken::new()).unwrap_err(),
            MetricsError::Configuration(_)
        ));
        processor.stop().unwrap();
        processor.stop().unwrap();
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn restart_after_stop_works() {
        let transport = TestTransport::new();
        let processor = quick_builder(&transport).build().unwrap();
        processor.start(CancellationToken::new()).unwrap();
        processor.stop().unwrap();
        processor.start(CancellationToken::new()).unwrap();
        assert!(processor.is_started());
        processor.stop().unwrap();
        assert_eq!(transport.close_count(), 2);
    }

    #[test]
    fn up_gauge_registered_at_start() {
        let transport = TestTransport::new();
        let processor = quick_builder(&transport).build().unwrap();
        assert!(processor.get_metric(UP_METRIC_KEY).is_none());
        processor.start(CancellationToken::new()).unwrap();
        let up = processor.get_metric(UP_METRIC_KEY).unwrap();
        assert_eq!(up.metric_type(), MetricType::Gauge);
        processor.stop().unwrap();
        // registration survives the stop
        assert!(processor.get_metric(UP_METRIC_KEY).is_some());
    }

    #[test]
    fn stop_sends_the_farewell_before_close() {
        let transport = TestTransport::new();
        let processor = quick_builder(&transport).build().unwrap();
        processor.start(CancellationToken::new()).unwrap();
        processor.stop().unwrap();
        let farewell = transport
            .first_batch_index(|m| m.key == UP_METRIC_KEY && m.value == 0.0)
            .expect("no up=0 message");
        let close = transport.first_close_index().expect("transport never closed");
        assert!(farewell < close);
        assert_eq!(
            transport
                .messages()
                .iter()
                .filter(|m| m.key == UP_METRIC_KEY && m.value == 0.0)
                .count(),
            1
        );
    }

    #[test]
    fn cancellation_exits_workers_without_farewell() {
        let transport = TestTransport::new();
        let processor = quick_builder(&transport).build().unwrap();
        let token = CancellationToken::new();
        processor.start(token.clone()).unwrap();
        token.cancel();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let done = processor
                .core()
                .threads
                .lock()
                .unwrap()
                .iter()
                .all(|t| t.is_finished());
            if done {
                break;
            }
            assert!(Instant::now() < deadline, "threads never exited");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(
            !transport
                .messages()
                .iter()
                .any(|m| m.key == UP_METRIC_KEY && m.value == 0.0)
        );
        // stop still delivers the farewell and closes
        processor.stop().unwrap();
        assert!(
            transport
                .messages()
                .iter()
                .any(|m| m.key == UP_METRIC_KEY && m.value == 0.0)
        );
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn env_flag_parsing() {
        for (value, expected) in [
            ("true", true),
            ("TRUE", true),
            (" true ", true),
            ("1", true),
            ("false", false),
            ("0", false),
            ("yes", false),
            ("", false),
        ] {
            assert_eq!(parse_bool_flag(value), expected, "value `{value}`");
        }
    }
}
