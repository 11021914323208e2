// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod capture;
mod error;

use clap::{error::ErrorKind, Parser};
use error::result_to_exit_code;
use std::process::ExitCode;

const USAGE: &str = "Usage: cedarcam [width] [height] [FPS] [n_frames]
Supported formats: 640x480, 1280x720, 1920x1080
All formats support 30FPS; 640x480 also supports 60FPS.
n_frames: number of frames to capture; defaults to 450 if omitted.";

/// cedarcam - zero-copy camera capture to hardware H.264
#[derive(Parser, Debug)]
#[command(name = "cedarcam")]
#[command(version)]
#[command(about = "cedarcam - zero-copy camera capture to hardware H.264")]
#[command(after_help = USAGE)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=trace for per-frame detail)
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,

    /// Print the capture summary as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    capture: capture::Args,
}

/// Print the usage text to stderr, regardless of log level.
pub(crate) fn usage() {
    eprintln!("{}", USAGE);
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            // Wrong argument count or malformed numbers: show usage, not a failure.
            init_logging(false, false);
            log::debug!("{}", err);
            usage();
            return ExitCode::SUCCESS;
        }
    };

    // Initialize logging based on verbosity
    init_logging(cli.verbose, cli.quiet);

    result_to_exit_code(capture::execute(cli.capture, cli.json))
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("Logging initialized");
}
