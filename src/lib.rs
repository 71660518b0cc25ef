use std::env;
use std::path::PathBuf;
use clap::Parser;
use log::LevelFilter;

use crate::console::application::run_application;
use crate::error::AppRunError;

pub mod config;
pub mod console;
pub mod device;
pub mod error;

/// Drive an ESP32 car over Bluetooth Low Energy from the terminal.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Read the config from this file instead of the default locations
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose { LevelFilter::Debug } else { LevelFilter::Info }
    }
}

pub fn init_logging(level: LevelFilter) -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}

pub async fn run(args: Args) -> Result<(), AppRunError> {
    run_application(args.config.as_deref()).await
}
