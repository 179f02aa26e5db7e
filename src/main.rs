//! Stressloop CLI
//!
//! Biofeedback-driven adaptive game difficulty.

use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stressloop::{
    channel::SlotReader,
    config::Config,
    core::{calibrate_samples, Cadence, DifficultyController, StressLevel},
    session::{SessionOrchestrator, SessionState, TickOutcome},
    source::{
        load_recording, save_recording, synthetic, Channel, InlineFeed, OutageFeed, ReplaySource,
        SampleFeed, Scenario, SessionClock, SyntheticConfig, SyntheticSource, ThreadedFeed,
    },
    telemetry::{SessionStats, StressLog, STRESS_LOG_FILE},
    DifficultySetting, SessionError, DISCLAIMER, VERSION,
};

const STATS_FILE: &str = "stats.json";

#[derive(Parser)]
#[command(name = "stressloop")]
#[command(version = VERSION)]
#[command(about = "Biofeedback-driven adaptive game difficulty", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live session against the synthetic sensor
    Run {
        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(long)]
        seconds: Option<f64>,

        /// Skip calibration and publish the fallback setting
        #[arg(long)]
        no_sensor: bool,

        /// Constant simulated stress level
        #[arg(long, default_value = "0.1")]
        stress: f64,

        /// Ramp simulated stress FROM:TO after calibration
        #[arg(long, value_parser = parse_span)]
        ramp: Option<(f64, f64)>,

        /// Drop the ECG link during START:END (session seconds)
        #[arg(long, value_parser = parse_span)]
        outage: Vec<(f64, f64)>,

        /// Seed for the synthetic generator
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Run a session over a recorded sample file in virtual time
    Replay {
        /// NDJSON recording
        #[arg(long, short)]
        input: PathBuf,
    },

    /// Compute a baseline from a recorded sample file
    Calibrate {
        /// NDJSON recording
        #[arg(long, short)]
        input: PathBuf,
    },

    /// Write a synthetic recording
    Record {
        /// Output file (NDJSON)
        #[arg(long, short)]
        output: PathBuf,

        /// Length of the recording
        #[arg(long, default_value = "60")]
        seconds: f64,

        /// Constant simulated stress level
        #[arg(long, default_value = "0.1")]
        stress: f64,

        /// Ramp simulated stress FROM:TO after the calibration window
        #[arg(long, value_parser = parse_span)]
        ramp: Option<(f64, f64)>,

        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Print the stress-to-difficulty curves
    Curve {
        /// Number of stress steps between 0 and 1
        #[arg(long, default_value = "10")]
        steps: usize,
    },

    /// Show cumulative session statistics
    Status,

    /// Show configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the biofeedback notice
    Disclaimer,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            seconds,
            no_sensor,
            stress,
            ramp,
            outage,
            seed,
        } => {
            let scenario = scenario_for(&config, stress, ramp, seconds);
            cmd_run(config, seconds, no_sensor, scenario, outage, seed);
        }
        Commands::Replay { input } => {
            cmd_replay(config, &input);
        }
        Commands::Calibrate { input } => {
            cmd_calibrate(&config, &input);
        }
        Commands::Record {
            output,
            seconds,
            stress,
            ramp,
            seed,
        } => {
            let scenario = scenario_for(&config, stress, ramp, Some(seconds));
            cmd_record(&config, &output, seconds, scenario, seed);
        }
        Commands::Curve { steps } => {
            cmd_curve(&config, steps);
        }
        Commands::Status => {
            cmd_status(&config);
        }
        Commands::Config => {
            cmd_config(cli.config.as_deref(), &config);
        }
        Commands::InitConfig { force } => {
            cmd_init_config(cli.config.as_deref(), force);
        }
        Commands::Disclaimer => {
            println!("{DISCLAIMER}");
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn scenario_for(
    config: &Config,
    stress: f64,
    ramp: Option<(f64, f64)>,
    seconds: Option<f64>,
) -> Scenario {
    match ramp {
        Some((from, to)) => {
            let start_s = config.calibration_duration.as_secs_f64();
            let duration_s = seconds.map_or(120.0, |s| (s - start_s).max(1.0));
            Scenario::Ramp {
                from,
                to,
                start_s,
                duration_s,
            }
        }
        None => Scenario::Constant(stress),
    }
}

fn cmd_run(
    mut config: Config,
    seconds: Option<f64>,
    no_sensor: bool,
    scenario: Scenario,
    outages: Vec<(f64, f64)>,
    seed: u64,
) {
    if no_sensor {
        config.sensor_enabled = false;
    }

    println!("Stressloop v{VERSION}");
    println!();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let clock = SessionClock::start();
    let feeds = if config.sensor_enabled {
        let synthetic = SyntheticConfig {
            seed,
            sampling_rate_hz: config.sampling_rate_hz,
            scenario,
            ..SyntheticConfig::default()
        };
        live_feeds(&config, &synthetic, clock, outages)
    } else {
        Vec::new()
    };

    println!(
        "  Sensor: {}",
        if config.sensor_enabled {
            "synthetic"
        } else {
            "disabled (fallback setting)"
        }
    );
    println!("  Calibration: {}s", config.calibration_duration.as_secs());
    println!("  Tick rate: {} Hz", config.tick_rate_hz);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let Some((mut session, mut reader)) = new_session(&config, feeds) else {
        std::process::exit(1);
    };

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    if let Err(e) = session.start(clock.now()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let mut cadence = Cadence::new(config.tick_rate_hz);
    cadence.start_at(clock.now());
    let poll = (config.tick_interval() / 20).max(Duration::from_millis(5));
    while running.load(Ordering::SeqCst) {
        thread::sleep(poll);
        let now = clock.now();
        if seconds.is_some_and(|limit| now >= limit) {
            break;
        }
        if !cadence.poll(now) {
            continue;
        }
        if !print_tick(&config, &mut reader, session.tick(now)) {
            break;
        }
    }
    if cadence.skipped() > 0 {
        eprintln!("Warning: {} ticks ran late and were skipped", cadence.skipped());
    }

    finish_session(&config, &mut session);
}

fn live_feeds(
    config: &Config,
    synthetic: &SyntheticConfig,
    clock: SessionClock,
    outages: Vec<(f64, f64)>,
) -> Vec<Box<dyn SampleFeed>> {
    let read_timeout = Duration::from_millis(50);
    let (eda, ecg) = SyntheticSource::pair(synthetic);
    let eda = ThreadedFeed::spawn(eda.paced(clock), config.buffer_capacity, read_timeout);
    let ecg = ThreadedFeed::spawn(ecg.paced(clock), config.buffer_capacity, read_timeout);

    let ecg: Box<dyn SampleFeed> = if outages.is_empty() {
        Box::new(ecg)
    } else {
        for (start, end) in &outages {
            println!("  ECG outage: {start}s - {end}s");
        }
        Box::new(OutageFeed::new(ecg, outages))
    };
    vec![Box::new(eda), ecg]
}

type Session = (SessionOrchestrator, SlotReader<DifficultySetting>);

fn new_session(config: &Config, feeds: Vec<Box<dyn SampleFeed>>) -> Option<Session> {
    let (session, reader) = match SessionOrchestrator::new(config.clone(), feeds) {
        Ok(created) => created,
        Err(e) => {
            eprintln!("Error: {e}");
            return None;
        }
    };

    let stats = Arc::new(SessionStats::with_persistence(
        config.data_path.join(STATS_FILE),
    ));
    let mut session = session.with_stats(stats);

    if config.stress_log {
        let path = config.data_path.join(STRESS_LOG_FILE);
        match StressLog::open(&path) {
            Ok(log) => {
                println!("Stress log: {path:?}");
                session = session.with_stress_log(log);
            }
            Err(e) => eprintln!("Warning: Could not open stress log: {e}"),
        }
    }
    Some((session, reader))
}

/// Print one tick's outcome. Settings are read back from the slot the game
/// polls. Returns false once the session is over.
fn print_tick(
    config: &Config,
    reader: &mut SlotReader<DifficultySetting>,
    outcome: Result<TickOutcome, SessionError>,
) -> bool {
    let stamp = Local::now().format("%H:%M:%S");
    match outcome {
        Ok(TickOutcome::Calibrating { progress }) => {
            println!("[{stamp}] Calibrating... {:>3.0}%", progress * 100.0);
            true
        }
        Ok(TickOutcome::Calibrated) => {
            println!("[{stamp}] Calibration complete");
            true
        }
        Ok(TickOutcome::Published(setting)) => {
            let setting = reader.take_fresh().unwrap_or(setting);
            print_setting(config, &stamp.to_string(), &setting, "");
            true
        }
        Ok(TickOutcome::Held(setting)) => {
            let setting = reader.take_fresh().unwrap_or(setting);
            print_setting(config, &stamp.to_string(), &setting, " (held)");
            true
        }
        Ok(TickOutcome::Idle) | Ok(TickOutcome::Ended) => false,
        Err(SessionError::Calibration(e)) => {
            eprintln!("[{stamp}] Calibration failed: {e}");
            false
        }
        Err(e) => {
            eprintln!("[{stamp}] {e}");
            false
        }
    }
}

fn print_setting(config: &Config, stamp: &str, setting: &DifficultySetting, suffix: &str) {
    let level = StressLevel::from_score(setting.stress_score, &config.stress_levels);
    println!(
        "[{stamp}] {level:<8} stress {:.3} conf {:.2} | blur {:.2} speed {:.2} spawn {:.2}{suffix}",
        setting.stress_score,
        setting.confidence,
        setting.blur_radius,
        setting.speed_multiplier,
        setting.spawn_rate,
    );
}

fn finish_session(config: &Config, session: &mut SessionOrchestrator) {
    println!();
    println!("Stopping session...");
    if session.state() != SessionState::Ended {
        if let Err(e) = session.stop() {
            eprintln!("Warning: {e}");
        }
    }

    if let Err(e) = session.stats().save() {
        eprintln!("Warning: Could not save stats: {e}");
    }

    let report = session.report();
    if !report.history.is_empty() {
        match report.export(&config.export_path) {
            Ok(path) => println!(
                "Exported {} settings to {:?}",
                report.history.len(),
                path
            ),
            Err(e) => eprintln!("Error writing report: {e}"),
        }
    }

    println!();
    println!("{}", session.stats().summary());
}

fn cmd_replay(config: Config, input: &Path) {
    let samples = match load_recording(input) {
        Ok(samples) => samples,
        Err(e) => {
            eprintln!("Error reading {input:?}: {e}");
            std::process::exit(1);
        }
    };
    let Some(first) = samples.first().map(|s| s.timestamp) else {
        eprintln!("Recording {input:?} is empty");
        std::process::exit(1);
    };
    let end = samples.iter().map(|s| s.timestamp).fold(first, f64::max);
    println!(
        "Replaying {} samples ({:.1}s) from {input:?}",
        samples.len(),
        end - first
    );

    let feeds: Vec<Box<dyn SampleFeed>> = Channel::ALL
        .into_iter()
        .map(|channel| {
            Box::new(InlineFeed::new(ReplaySource::new(channel, &samples))) as Box<dyn SampleFeed>
        })
        .collect();
    let Some((mut session, mut reader)) = new_session(&config, feeds) else {
        std::process::exit(1);
    };

    if let Err(e) = session.start(first) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    let interval = config.tick_interval().as_secs_f64();
    let mut ticks = 1u64;
    loop {
        let now = first + ticks as f64 * interval;
        if now > end || !print_tick(&config, &mut reader, session.tick(now)) {
            break;
        }
        ticks += 1;
    }

    finish_session(&config, &mut session);
}

fn cmd_calibrate(config: &Config, input: &Path) {
    let samples = match load_recording(input) {
        Ok(samples) => samples,
        Err(e) => {
            eprintln!("Error reading {input:?}: {e}");
            std::process::exit(1);
        }
    };

    match calibrate_samples(&samples, config) {
        Ok(baseline) => {
            println!("Baseline");
            println!("========");
            println!();
            println!(
                "{}",
                serde_json::to_string_pretty(&baseline).unwrap_or_else(|_| "Error".to_string())
            );
        }
        Err(e) => {
            eprintln!("Calibration failed: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_record(config: &Config, output: &Path, seconds: f64, scenario: Scenario, seed: u64) {
    let synthetic = SyntheticConfig {
        seed,
        sampling_rate_hz: config.sampling_rate_hz,
        scenario,
        ..SyntheticConfig::default()
    };
    let samples = synthetic::record(&synthetic, seconds);
    match save_recording(output, &samples) {
        Ok(()) => println!("Wrote {} samples to {output:?}", samples.len()),
        Err(e) => {
            eprintln!("Error writing {output:?}: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_curve(config: &Config, steps: usize) {
    let controller = DifficultyController::from_config(config);
    let steps = steps.max(1);

    println!(
        "{:>6}  {:<8}  {:>6}  {:>6}  {:>6}",
        "stress", "level", "blur", "speed", "spawn"
    );
    for i in 0..=steps {
        let stress = i as f64 / steps as f64;
        let setting = controller.map(stress);
        println!(
            "{:>6.2}  {:<8}  {:>6.2}  {:>6.2}  {:>6.2}",
            stress,
            controller.classify(stress),
            setting.blur_radius,
            setting.speed_multiplier,
            setting.spawn_rate
        );
    }
}

fn cmd_status(config: &Config) {
    println!("Stressloop Status");
    println!("=================");
    println!();

    println!("Configuration:");
    println!("  Sensor: {}", if config.sensor_enabled { "enabled" } else { "disabled" });
    println!("  Calibration: {}s", config.calibration_duration.as_secs());
    println!("  Tick rate: {} Hz", config.tick_rate_hz);
    println!("  Stress log: {}", if config.stress_log { "enabled" } else { "disabled" });
    println!();

    match SessionStats::load_snapshot(&config.data_path.join(STATS_FILE)) {
        Ok(Some(stats)) => {
            println!("Cumulative Statistics:");
            println!("  Samples received: {}", stats.samples_received);
            println!("  Settings published: {}", stats.settings_published);
            println!("  Ticks held: {}", stats.ticks_held);
            println!("  Disconnects: {}", stats.disconnects);
            println!(
                "  Calibrations: {} completed, {} failed",
                stats.calibrations_completed, stats.calibrations_failed
            );
        }
        Ok(None) => println!("No previous session data found."),
        Err(e) => eprintln!("Warning: Could not read stats: {e}"),
    }
}

fn cmd_config(path: Option<&Path>, config: &Config) {
    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {:?}",
        path.map_or_else(Config::config_path, Path::to_path_buf)
    );
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_init_config(path: Option<&Path>, force: bool) {
    let path = path.map_or_else(Config::config_path, Path::to_path_buf);
    if path.exists() && !force {
        eprintln!("{path:?} already exists (use --force to overwrite)");
        std::process::exit(1);
    }
    match Config::default().save_to(&path) {
        Ok(()) => println!("Wrote default configuration to {path:?}"),
        Err(e) => {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
    }
}

fn parse_span(s: &str) -> Result<(f64, f64), String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {s:?}"))?;
    let start: f64 = start.trim().parse().map_err(|e| format!("{start:?}: {e}"))?;
    let end: f64 = end.trim().parse().map_err(|e| format!("{end:?}: {e}"))?;
    Ok((start, end))
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
