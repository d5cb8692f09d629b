// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driven through a started processor with short flush
//! intervals and a recording fake transport.

use std::time::{Duration, Instant};

use assert_approx_eq::assert_approx_eq;
use gamelift_metrics::test_util::TestTransport;
use gamelift_metrics::{
    MetricMessage, MetricType, MetricsFactory, NeverSample, Processor,
};
use tokio_util::sync::CancellationToken;

const UP: &str = "up";

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > Duration::from_secs(10) {
            panic!("timed out waiting for {what}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Single-worker processor so message order through the pipeline is FIFO.
fn started_processor(transport: &TestTransport, interval: Duration) -> Processor {
    init_tracing();
    let processor = Processor::builder()
        .transport(transport.clone())
        .dimensional_metrics(false)
        .process_interval(interval)
        .workers(1)
        .build()
        .unwrap();
    processor.start(CancellationToken::new()).unwrap();
    processor
}

fn factory_for(processor: &Processor) -> MetricsFactory {
    MetricsFactory::builder()
        .processor(processor.clone())
        .build()
        .unwrap()
}

fn user_messages(transport: &TestTransport) -> Vec<MetricMessage> {
    transport
        .messages()
        .into_iter()
        .filter(|m| m.key != UP)
        .collect()
}

#[test]
fn counter_sums_and_delivers_in_order() {
    let transport = TestTransport::new();
    let processor = started_processor(&transport, Duration::from_millis(50));
    let factory = factory_for(&processor);

    let requests = factory.counter("req").build().unwrap();
    requests.add(3.0);
    requests.increment();
    requests.count(true);
    requests.count(false);

    wait_until("three counter messages", || user_messages(&transport).len() >= 3);
    let messages = user_messages(&transport);
    assert_eq!(messages.len(), 3);
    let values: Vec<f64> = messages.iter().map(|m| m.value).collect();
    assert_eq!(values, [3.0, 1.0, 1.0]);
    for message in &messages {
        assert_eq!(message.key, "req");
        assert_eq!(message.metric_type, MetricType::Counter);
        assert_eq!(message.sample_rate, 1.0);
    }
    assert_eq!(requests.current_value(), 5.0);

    processor.stop().unwrap();
}

#[test]
fn gauge_deltas_and_absolutes() {
    let transport = TestTransport::new();
    let processor = started_processor(&transport, Duration::from_millis(50));
    let factory = factory_for(&processor);

    let gauge = factory.gauge("g").build().unwrap();
    gauge.set(10.0);
    gauge.add(5.0);
    gauge.subtract(2.0);
    gauge.decrement();
    gauge.reset();

    wait_until("five gauge messages", || user_messages(&transport).len() >= 5);
    let values: Vec<f64> = user_messages(&transport).iter().map(|m| m.value).collect();
    assert_eq!(values, [10.0, 5.0, -2.0, -1.0, 0.0]);
    assert_eq!(gauge.current_value(), 0.0);

    processor.stop().unwrap();
}

#[test]
fn percentiles_emit_once_per_window() {
    let transport = TestTransport::new();
    let processor = started_processor(&transport, Duration::from_millis(100));
    let factory = factory_for(&processor);

    let timer = factory
        .timer("t")
        .percentiles([50.0, 90.0])
        .build()
        .unwrap();
    for value in 1..=10 {
        timer.set_milliseconds(value as f64);
    }

    wait_until("percentile emissions", || {
        user_messages(&transport)
            .iter()
            .any(|m| m.key == "t.p90")
    });
    let messages = user_messages(&transport);
    let p50 = messages.iter().find(|m| m.key == "t.p50").unwrap();
    let p90 = messages.iter().find(|m| m.key == "t.p90").unwrap();
    assert_approx_eq!(p50.value, 5.5);
    assert_approx_eq!(p90.value, 9.1);
    // the ten raw samples are in the same flush, ahead of the derived pair
    assert_eq!(
        messages.iter().filter(|m| m.key == "t").count(),
        10,
        "raw timer samples"
    );

    // a window with no new samples emits no derived messages
    let derived_so_far = messages.iter().filter(|m| m.key.starts_with("t.p")).count();
    std::thread::sleep(Duration::from_millis(300));
    let messages = user_messages(&transport);
    assert_eq!(
        messages.iter().filter(|m| m.key.starts_with("t.p")).count(),
        derived_so_far
    );

    processor.stop().unwrap();
}

#[test]
fn dimensional_mode_splits_tag_variants() {
    let transport = TestTransport::new();
    let processor = Processor::builder()
        .transport(transport.clone())
        .dimensional_metrics(true)
        .process_interval(Duration::from_millis(50))
        .workers(1)
        .build()
        .unwrap();
    processor.start(CancellationToken::new()).unwrap();
    let factory = factory_for(&processor);

    let cpu = factory.gauge("cpu").build().unwrap();
    cpu.with_tag("region", "us-east").unwrap().set(75.0);
    cpu.with_tag("region", "us-west").unwrap().set(50.0);

    assert!(processor.get_metric("cpu").is_some());
    assert!(processor.get_metric("cpu|region=us-east").is_some());
    assert!(processor.get_metric("cpu|region=us-west").is_some());
    // parent state is untouched by the variants
    assert_eq!(cpu.current_value(), 0.0);

    wait_until("both dimensional messages", || user_messages(&transport).len() >= 2);
    let messages = user_messages(&transport);
    let east = messages.iter().find(|m| m.value == 75.0).unwrap();
    let west = messages.iter().find(|m| m.value == 50.0).unwrap();
    assert_eq!(east.tags["region"], "us-east");
    assert_eq!(west.tags["region"], "us-west");
    assert_eq!(east.metric_type, MetricType::Gauge);

    processor.stop().unwrap();
}

#[test]
fn heartbeats_while_started_and_farewell_on_stop() {
    let transport = TestTransport::new();
    let processor = started_processor(&transport, Duration::from_millis(100));

    wait_until("two heartbeats", || {
        transport
            .messages()
            .iter()
            .filter(|m| m.key == UP && m.value == 1.0)
            .count()
            >= 2
    });
    processor.stop().unwrap();

    let messages = transport.messages();
    for up in messages.iter().filter(|m| m.key == UP) {
        assert_eq!(up.metric_type, MetricType::Gauge);
        assert_eq!(up.sample_rate, 1.0);
        assert!(up.tags.contains_key("process_pid"));
    }
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.key == UP && m.value == 0.0)
            .count(),
        1
    );
    let farewell = transport
        .first_batch_index(|m| m.key == UP && m.value == 0.0)
        .unwrap();
    let close = transport.first_close_index().unwrap();
    assert!(farewell < close, "up=0 must precede transport close");
}

#[test]
fn global_tags_override_metric_tags() {
    let transport = TestTransport::new();
    let processor = started_processor(&transport, Duration::from_millis(50));
    processor.set_global_tag("service", "api").unwrap();
    let factory = factory_for(&processor);

    let counter = factory
        .counter("hits")
        .tag("service", "local")
        .tag("zone", "a")
        .build()
        .unwrap();
    counter.increment();

    wait_until("the counter message", || !user_messages(&transport).is_empty());
    let message = &user_messages(&transport)[0];
    assert_eq!(message.tags["service"], "api");
    assert_eq!(message.tags["zone"], "a");

    processor.stop().unwrap();
}

#[test]
fn records_before_start_are_dropped_but_fold_state() {
    let transport = TestTransport::new();
    let processor = Processor::builder()
        .transport(transport.clone())
        .dimensional_metrics(false)
        .process_interval(Duration::from_millis(50))
        .workers(1)
        .build()
        .unwrap();
    let factory = factory_for(&processor);
    let counter = factory.counter("early").build().unwrap();
    counter.add(2.0);
    assert_eq!(counter.current_value(), 2.0);

    processor.start(CancellationToken::new()).unwrap();
    counter.add(1.0);
    wait_until("the post-start message", || !user_messages(&transport).is_empty());
    let messages = user_messages(&transport);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].value, 1.0);

    processor.stop().unwrap();
}

#[test]
fn never_sampled_metrics_stay_silent() {
    let transport = TestTransport::new();
    let processor = started_processor(&transport, Duration::from_millis(50));
    let factory = MetricsFactory::builder()
        .processor(processor.clone())
        .sampler(NeverSample)
        .build()
        .unwrap();

    let counter = factory.counter("quiet").build().unwrap();
    for _ in 0..50 {
        counter.increment();
    }
    assert_eq!(counter.current_value(), 0.0);

    // let a couple of ticks pass, then confirm nothing but heartbeats left
    std::thread::sleep(Duration::from_millis(200));
    assert!(user_messages(&transport).is_empty());

    processor.stop().unwrap();
}

#[test]
fn transport_failures_do_not_stall_the_pipeline() {
    let transport = TestTransport::new();
    let processor = started_processor(&transport, Duration::from_millis(50));
    let factory = factory_for(&processor);
    let counter = factory.counter("flaky").build().unwrap();

    transport.fail_sends(true);
    counter.increment();
    std::thread::sleep(Duration::from_millis(200));
    assert!(user_messages(&transport).is_empty());

    transport.fail_sends(false);
    counter.increment();
    wait_until("delivery after recovery", || !user_messages(&transport).is_empty());

    processor.stop().unwrap();
}
