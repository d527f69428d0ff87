use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use spirolink_rs::util::hex::decode_capture_line;
use spirolink_rs::{
    init_logger, log_error, log_info, log_warn, DeviceEngine, EngineConfig, MockCommandSink,
    TestOutcome, TestType,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "spirolink-replay")]
#[command(about = "Replays a captured packet stream through the telemetry engine")]
struct Cli {
    /// Capture file: one hex packet per line, optionally prefixed with `@<ms>`
    capture: PathBuf,

    /// Test to arm before replaying
    #[arg(short, long, value_enum)]
    test: Option<TestArg>,

    /// JSON engine config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fire pending timeouts after the last packet
    #[arg(long)]
    flush: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum TestArg {
    Fvc,
    Vc,
    Mvv,
    Oximetry,
}

impl From<TestArg> for TestType {
    fn from(arg: TestArg) -> Self {
        match arg {
            TestArg::Fvc => TestType::Fvc,
            TestArg::Vc => TestType::Vc,
            TestArg::Mvv => TestType::Mvv,
            TestArg::Oximetry => TestType::Oximetry,
        }
    }
}

/// Splits an optional `@<ms>` timestamp off a capture line.
fn split_offset(line: &str) -> Result<(Option<u64>, &str)> {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix('@') {
        Some(rest) => {
            let (ms, packet) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let ms = ms
                .parse::<u64>()
                .with_context(|| format!("bad timestamp `@{ms}`"))?;
            Ok((Some(ms), packet))
        }
        None => Ok((None, trimmed)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.verbose {
        0 => init_logger(),
        1 => spirolink_rs::logging::init_logger_with_level(LevelFilter::Debug),
        _ => spirolink_rs::logging::init_logger_with_level(LevelFilter::Trace),
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let flush_after = config
        .end_of_test_timeout
        .max(config.command_timeout)
        .max(config.firmware_progress_timeout);

    let capture = std::fs::read_to_string(&cli.capture)
        .with_context(|| format!("reading capture {}", cli.capture.display()))?;

    let mut engine = DeviceEngine::new(config, MockCommandSink::new());
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let seen = outcomes.clone();
    engine.subscribe_to_results(move |outcome: &TestOutcome| {
        if let Ok(mut outcomes) = seen.lock() {
            outcomes.push(outcome.clone());
        }
    });
    engine.subscribe_to_housekeeping(|info| log_info(&format!("Housekeeping: {info:?}")));
    engine.subscribe_to_firmware_progress(|progress| {
        log_info(&format!("Firmware: {}% {:?}", progress.progress, progress.status))
    });

    let start = Instant::now();
    let mut now = start;
    if let Some(test) = cli.test {
        engine.arm_test_at(test.into(), now)?;
    }

    for (number, line) in capture.lines().enumerate() {
        let (offset, packet) =
            split_offset(line).with_context(|| format!("line {}", number + 1))?;
        if let Some(ms) = offset {
            let at = start + Duration::from_millis(ms);
            if at < now {
                bail!("line {}: timestamp goes backwards", number + 1);
            }
            now = at;
            engine.poll_timers(now);
        }
        let Some(bytes) =
            decode_capture_line(packet).with_context(|| format!("line {}", number + 1))?
        else {
            continue;
        };
        if let Err(err) = engine.on_packet_bytes_at(&bytes, now) {
            log_warn(&format!("line {}: dropped ({err})", number + 1));
        }
    }

    if cli.flush {
        engine.poll_timers(now + flush_after);
    }

    let outcomes = outcomes
        .lock()
        .map_err(|_| anyhow::anyhow!("outcome list poisoned"))?
        .clone();
    for outcome in &outcomes {
        match outcome {
            TestOutcome::Completed(result) => println!("{}", result.to_json()?),
            TestOutcome::Failed { test_type, reason } => {
                log_error(&format!("{test_type:?} test failed: {reason}"));
                println!("{test_type:?} test failed: {reason}")
            }
        }
    }

    let snapshot = engine.current_session_state();
    log_info(&format!("Final session state: {:?}", snapshot.state));
    eprintln!("{}", engine.stats().to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_offset() {
        assert_eq!(split_offset("@250 08 00 00 08").unwrap(), (Some(250), "08 00 00 08"));
        assert_eq!(split_offset("  51 01 00 4d").unwrap(), (None, "51 01 00 4d"));
        assert!(split_offset("@x 00").is_err());
    }
}
