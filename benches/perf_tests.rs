use async_logger::sink::NullSink;
use async_logger::{log_record, log_structured, ChannelId, LoggerBuilder, Severity};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use log::{info, LevelFilter};
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use std::sync::{Arc, Once};
use std::time::Instant;
use tempfile::tempdir;

const ITERATIONS: usize = 16 * 1024;

static LOG4RS_INIT: Once = Once::new();

#[derive(Debug)]
struct TestEvent {
    id: i32,
    active: bool,
    large_number: u64,
    description: String,
}

impl std::fmt::Display for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Event[id={}, active={}, large_number={}, desc={}]",
            self.id, self.active, self.large_number, self.description
        )
    }
}

fn setup_log4rs(log_file: &str) {
    LOG4RS_INIT.call_once(|| {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d} - {m}{n}")))
            .append(true)
            .build(log_file)
            .unwrap();

        let config = Config::builder()
            .appender(Appender::builder().build("logfile", Box::new(logfile)))
            .build(Root::builder().appender("logfile").build(LevelFilter::Info))
            .unwrap();

        log4rs::init_config(config).unwrap();
    });
}

fn event() -> TestEvent {
    TestEvent {
        id: 42,
        active: true,
        large_number: u64::MAX,
        description: "CPU: 95%, Memory: 2.5GB, Network: 1.2Gbps".to_string(),
    }
}

fn bench_producer_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("Producer Path");

    // Big enough that the dispatcher keeps up with the null sink.
    let logger = LoggerBuilder::new()
        .pool_capacity(64 * 1024)
        .queue_capacity(64 * 1024)
        .sink(Arc::new(NullSink))
        .start()
        .unwrap();
    let event = event();

    group.bench_function("format_args", |b| {
        b.iter(|| black_box(log_record!(logger, Severity::Info, ChannelId::DEFAULT, "event={}", event)))
    });
    group.bench_function("structured", |b| {
        b.iter(|| {
            black_box(log_structured!(
                logger,
                Severity::Info,
                ChannelId::DEFAULT,
                "iteration={} ok={}",
                7u32,
                true
            ))
        })
    });
    group.bench_function("filtered", |b| {
        b.iter(|| black_box(log_record!(logger, Severity::Debug, ChannelId::DEFAULT, "event={}", event)))
    });
    group.finish();

    let report = logger.shutdown();
    println!("\nproducer path: {:?}", report.stats);
}

fn bench_logging_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("Logging Comparison");
    group.sample_size(10);

    group.bench_function("async_vs_log4rs", |b| {
        b.iter(|| {
            let dir = tempdir().unwrap();
            let event = event();

            let logger = LoggerBuilder::new()
                .pool_capacity(ITERATIONS)
                .queue_capacity(ITERATIONS)
                .sink(Arc::new(NullSink))
                .start()
                .unwrap();
            let async_start = Instant::now();
            for i in 0..ITERATIONS {
                let _ = log_record!(logger, Severity::Info, ChannelId::DEFAULT, "iteration={}, event={}", i, event);
            }
            let async_duration = async_start.elapsed();
            let report = logger.shutdown();

            let log4rs_file = dir.path().join("log4rs.log").to_str().unwrap().to_string();
            setup_log4rs(&log4rs_file);
            let log4rs_start = Instant::now();
            for i in 0..ITERATIONS {
                info!("iteration={}, event={}", i, event);
            }
            let log4rs_duration = log4rs_start.elapsed();

            println!("\nPerformance comparison ({} iterations):", ITERATIONS);
            println!("Async logger (caller side): {:?}, dropped {}", async_duration, report.stats.dropped());
            println!("log4rs (with I/O): {:?}", log4rs_duration);
            println!(
                "Speedup: {:.2}x",
                log4rs_duration.as_secs_f64() / async_duration.as_secs_f64()
            );

            black_box((async_duration, log4rs_duration))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_producer_path, bench_logging_comparison);
criterion_main!(benches);
