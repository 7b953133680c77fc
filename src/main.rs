use std::{path::PathBuf, time::Duration};

use _model::{Coordinate, CoordinateRecord, CoordinateStore, JsonFile, Label};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::{
    capture::{Capture, CaptureParams},
    fetcher::{ImageFormat, ImageParams, Size, StaticMap},
};

mod capture;
mod collector;
mod fetcher;
mod logging;
mod utils;
mod variants;

/// Collect labeled coordinates and capture satellite imagery of them.
#[derive(Debug, Parser)]
struct Cli {
    /// Coordinate store
    #[arg(long, global = true, default_value = "coordinates.json")]
    store: PathBuf,

    /// -v: debug, -vv: trace (RUST_LOG overrides)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enter coordinates interactively
    Collect,
    /// Add a single record
    Add {
        label: Label,
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
        /// Defaults to coord_<lat>_<lon>
        #[arg(long)]
        name: Option<String>,
    },
    /// Print stored records
    List {
        #[arg(long)]
        label: Option<Label>,
    },
    /// Download images for every record not captured yet
    Capture(CaptureArgs),
}

#[derive(Debug, clap::Args)]
struct CaptureArgs {
    #[arg(long, env = "MAPS_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Images go to <output>/positive and <output>/negative
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// Jittered images per record besides the base image
    #[arg(long, default_value_t = 15)]
    variants: usize,

    /// Maximum jitter per axis, in degrees
    #[arg(long, default_value_t = 0.0002)]
    max_offset: f64,

    #[arg(long, default_value_t = 19)]
    zoom: u8,

    #[arg(long, default_value = "50x50")]
    size: Size,

    #[arg(long, value_enum, default_value_t = ImageFormat::Jpg)]
    format: ImageFormat,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 95, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Pause between requests, in milliseconds
    #[arg(long, default_value_t = 200)]
    delay_ms: u64,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Seed for reproducible jitter
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = StaticMap::DEFAULT_URL)]
    base_url: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let mut store = CoordinateStore::open(JsonFile::new(&cli.store))
        .with_context(|| format!("failed to open {}", cli.store.display()))?;
    debug!(records = store.len(), store = %cli.store.display(), "loaded store");

    let mut stdout = std::io::stdout();
    match cli.command {
        Command::Collect => collector::run(&mut store)?,
        Command::Add {
            label,
            latitude,
            longitude,
            name,
        } => {
            let coordinate = Coordinate::new(latitude, longitude)?;
            let name = name.unwrap_or_else(|| coordinate.default_name());
            let record = CoordinateRecord::new(label, name, coordinate)?;
            collector::dispatch(&mut store, collector::Command::Add(record), &mut stdout)?;
        }
        Command::List { label } => {
            collector::dispatch(&mut store, collector::Command::List(label), &mut stdout)?;
        }
        Command::Capture(args) => {
            let source = StaticMap::new(args.api_key)
                .with_base_url(args.base_url)
                .with_timeout(Duration::from_secs(args.timeout_secs));
            let params = CaptureParams {
                output: args.output,
                image: ImageParams {
                    size: args.size,
                    zoom: args.zoom,
                    format: args.format,
                },
                variants: args.variants,
                max_offset: args.max_offset,
                quality: args.quality,
                delay: Duration::from_millis(args.delay_ms),
            };
            let rng = match args.seed {
                Some(seed) => fastrand::Rng::with_seed(seed),
                None => fastrand::Rng::new(),
            };

            let summary = Capture::new(&source, params, rng).run(&mut store)?;
            println!("{summary}");
        }
    }

    Ok(())
}
