use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use dot11sentinel::Config;
use env_logger::Target;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "dot11sentinel")]
#[command(author = "spikehead")]
#[command(version = "0.1.0")]
#[command(about = "Passive 802.11 surveillance sensor")]
struct Cli {
    /// Wireless interface to capture on, already in monitor mode
    #[arg(short = 'i', long)]
    interface: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(interface) = cli.interface else {
        Cli::command().print_help()?;
        std::process::exit(0);
    };

    let config = if cli.config.exists() {
        Config::load(&cli.config).context("failed to load config")?
    } else {
        Config::default()
    };

    init_logging(&config, cli.verbose);
    if !cli.config.exists() {
        log::info!("config file not found, using defaults");
    }

    let supervisor = dot11sentinel::Supervisor::new(interface, config);
    supervisor.run().await
}

/// File handler + console handler, mirroring the original's `setup_logger`.
/// Level comes from `DEFAULT.log_level`; `--verbose` overrides it to debug
/// regardless of what the config says. A file that can't be opened falls
/// back to console-only rather than aborting startup.
fn init_logging(config: &Config, verbose: bool) {
    let configured = LevelFilter::from_str(&config.default.log_level).unwrap_or(LevelFilter::Info);
    let log_level = if verbose { LevelFilter::Debug } else { configured };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).format_timestamp_secs();

    match OpenOptions::new().create(true).append(true).open(&config.default.log_path) {
        Ok(file) => {
            builder.target(Target::Pipe(Box::new(TeeWriter { file })));
        }
        Err(e) => {
            eprintln!("could not open log file {}: {e}, logging to console only", config.default.log_path);
        }
    }

    builder.init();
}

/// Duplicates every write to stderr and the configured log file, the way
/// the original's `setup_logger` attaches both a `StreamHandler` and a
/// `FileHandler` to the same logger.
struct TeeWriter {
    file: std::fs::File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}
