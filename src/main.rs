//! ringtime - time-indexed audio ring buffer CLI

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ringtime::audio::simulate::run_offline;
use ringtime::audio::{EngineEvent, PlayThroughEngine};
use ringtime::config::{Args, Command, Overrides, RingtimeConfig};

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RingtimeConfig::load(path)?,
        None => RingtimeConfig::load_default()?,
    };

    // Initialize logging
    init_logging(&args, &config)?;

    // Execute command
    match args.command.unwrap_or_default() {
        Command::Run { seconds, overrides } => cmd_run(&config, &overrides, seconds),
        Command::Simulate { seconds, overrides } => cmd_simulate(&config, &overrides, seconds),
        Command::Config { write } => cmd_config(write),
    }
}

fn init_logging(args: &Args, config: &RingtimeConfig) -> Result<()> {
    // Command line flags win over the config file
    let level = if args.quiet || args.verbose > 0 {
        args.log_level().to_string()
    } else {
        config.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| (!config.log_file.is_empty()).then(|| config.log_file.clone()));

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)
            .with_context(|| format!("cannot create log file {}", log_file))?;
        subscriber.with_writer(file).with_ansi(false).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Play through in real time until Ctrl+C or the deadline
fn cmd_run(config: &RingtimeConfig, overrides: &Overrides, seconds: Option<f64>) -> Result<()> {
    println!("ringtime - time-indexed play-through\n");

    let mut engine_config = config.to_engine_config();
    overrides.apply(&mut engine_config);

    let deadline = seconds
        .map(|s| Duration::try_from_secs_f64(s).context("invalid --seconds"))
        .transpose()?
        .map(|d| Instant::now() + d);

    let (tx, rx) = crossbeam_channel::bounded(256);
    let mut engine = PlayThroughEngine::new(engine_config);
    engine.set_event_channel(tx);

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }

    // Start the engine
    match engine.start() {
        Ok(()) => {
            println!("Stream format: {}", engine.config().format);
            match deadline {
                Some(_) => println!("\nPlay-through running. Press Ctrl+C to stop early.\n"),
                None => println!("\nPlay-through running. Press Ctrl+C to stop.\n"),
            }
        }
        Err(e) => {
            error!("Failed to start engine: {}", e);
            return Err(e.into());
        }
    }

    while running.load(Ordering::SeqCst) && engine.is_running() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(EngineEvent::ClockAligned { offset }) => {
                info!("Clocks aligned: input = output + {}", offset)
            }
            Ok(EngineEvent::Underrun { output_time }) => {
                debug!("Underrun at output time {}", output_time)
            }
            Ok(EngineEvent::StoreFailed { input_time, result }) => {
                warn!("Store at input time {} failed: {:?}", input_time, result)
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Stop the engine
    engine.stop()?;

    let stats = engine.stats();
    println!("Stopped.\n");
    print!("{}", stats);
    if !stats.is_clean() {
        warn!("{} corrupt frames reached the output", stats.corrupt_frames);
    }

    Ok(())
}

/// Run the offline simulation and print its report
fn cmd_simulate(config: &RingtimeConfig, overrides: &Overrides, seconds: f64) -> Result<()> {
    let mut engine_config = config.to_engine_config();
    overrides.apply(&mut engine_config);

    let duration = Duration::try_from_secs_f64(seconds).context("invalid --seconds")?;
    let report = run_offline(&engine_config, duration)?;

    println!("Stream format: {}", engine_config.format);
    print!("{}", report);

    if !report.stats.is_clean() {
        anyhow::bail!(
            "{} corrupt frames reached the output",
            report.stats.corrupt_frames
        );
    }
    Ok(())
}

/// Print or write the sample configuration
fn cmd_config(write: Option<std::path::PathBuf>) -> Result<()> {
    let sample = RingtimeConfig::sample_config();

    match write {
        Some(path) => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, sample)
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => {
            print!("{}", sample);
            if let Some(path) = RingtimeConfig::default_path() {
                eprintln!("\n# Save as ./ringtime.toml or {}", path.display());
            }
        }
    }

    Ok(())
}
