use std::env;
use std::fs;
use std::process::ExitCode;
use std::thread;

use async_logger::{log_record, log_structured, log_tagged, LogBridge, LoggerConfig, SinkConfig, Severity};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = r#"{
    "channels": [{ "name": "nav" }, { "name": "power", "threshold": "warn" }],
    "tags": ["odometry"],
    "drain_on_termination": true,
    "sinks": [{ "kind": "console" }]
}"#;

fn load_config() -> Result<LoggerConfig, Box<dyn std::error::Error>> {
    let config = match env::args().nth(1) {
        Some(path) => LoggerConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => LoggerConfig::from_json_str(DEFAULT_CONFIG)?,
    };
    Ok(config)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config()?;
    if config.sinks.is_empty() {
        config.sinks.push(SinkConfig::Console {
            target: Default::default(),
            filter: Default::default(),
        });
    }
    let logger = config.start()?;
    LogBridge::new(logger.clone()).install(log::LevelFilter::Info)?;

    let nav = logger.channel("nav").unwrap_or_default();
    let power = logger.channel("power").unwrap_or_default();
    let odometry = logger.tags(&["odometry"]).unwrap_or_default();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let logger = logger.clone();
            thread::spawn(move || {
                for step in 0..8u32 {
                    let _ = log_tagged!(logger, Severity::Info, nav, odometry; "worker {} step {}", worker, step);
                }
                let _ = log_structured!(logger, Severity::Warn, power, "worker {} battery {}%", worker as u32, 18u8);
            })
        })
        .collect();
    for worker in workers {
        let _ = worker.join();
    }
    let _ = log_record!(logger, Severity::Debug, power, "not shown at the power threshold");
    log::info!(target: "nav", "routed through the log facade");

    let report = logger.shutdown();
    eprintln!(
        "delivered {} dropped {} (timed out: {})",
        report.delivered,
        report.stats.dropped(),
        report.timed_out
    );
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
