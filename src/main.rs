// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! noisefft - batch preprocessing of continuous seismic noise
//!
//! Reads day-long station recordings, cuts them into overlapping windows,
//! normalizes and whitens them, and stores the half spectra per station.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use noisefft::trace::write_demo_archives;
use noisefft::{build_info, prepare_run, ArchiveStore, Config, Engine, VERSION};

/// noisefft - windowed, normalized and whitened noise spectra
#[derive(Parser, Debug)]
#[command(name = "noisefft")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Preprocess continuous seismic noise into per-station FFT archives")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Synthesize a small station network and process it
    #[arg(long)]
    demo: bool,

    /// Raw data root
    #[arg(long)]
    input_root: Option<PathBuf>,

    /// Output directory for station archives
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let build = build_info();
    info!("noisefft v{} ({}-{}, {} threads)", VERSION, build.os, build.target, build.threads);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(root) = args.input_root {
        config.data.input_root = root;
    }
    if let Some(dir) = args.output_dir {
        config.data.output_dir = dir;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    if config.demo_mode {
        // demo network is always an archive set
        config.data.data_format = "archive".to_string();
        write_demo_archives(
            &config.data.input_root,
            4,
            2,
            6.0 * 3600.0,
            config.preprocessing.sampling_rate,
            42,
        )?;
    }

    // Setup: anything wrong here ends the run before a unit is touched
    let plan = prepare_run(&config)?;

    let sink = Arc::new(ArchiveStore::new(&config.data.output_dir)?);
    let engine = Engine::new(Arc::new(config), Arc::from(plan.reader), sink);
    let summary = engine.run(plan.units)?;
    summary.log();

    info!("noisefft finished");
    Ok(())
}
