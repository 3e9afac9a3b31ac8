//! mm - Metadata Multitool
//!
//! Strips, poisons and reverts image metadata in bulk.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mmt::cli::Cli;
use mmt::config::Config;
use mmt::logging::{effective_level, init_logging};
use mmt::processor::{Processor, Settings};
use mmt::terminal::print_error;
use mmt::transformer::{ExifTool, MetadataTransformer};
use tracing::{debug, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let loaded = Config::load(cli.config.as_deref(), &cwd);
    let config = loaded.config;

    let quiet = cli.quiet || (config.quiet && !cli.verbose);
    let verbose = !quiet && (cli.verbose || config.verbose);
    if let Err(e) = init_logging(&effective_level(&config.log_level, verbose, quiet)) {
        eprintln!("{e}");
    }
    for warning in &loaded.warnings {
        warn!("{warning}");
    }
    if let Some(source) = &loaded.source {
        debug!(path = %source.display(), "loaded configuration");
    }

    let transformer = ExifTool::locate(config.exiftool_path.as_deref())
        .map(|tool| Arc::new(tool) as Arc<dyn MetadataTransformer>);
    if transformer.is_none() {
        debug!("exiftool not available; metadata surfaces are disabled");
    }

    let settings = Settings {
        config,
        verbose,
        quiet,
        dry_run: cli.dry_run,
    };
    match Processor::new(settings, transformer).run(&cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            print_error(&e.to_string());
            ExitCode::from(1)
        }
    }
}
