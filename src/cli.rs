//! Command-line interface for Odaw
//!
//! Handles argument parsing and logging configuration.

use clap::{Args as ClapArgs, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// Odaw - beat grid transport with one-shot capture and playback
#[derive(Parser, Debug)]
#[command(name = "odaw")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug (per-tick), -vvv = trace, -vvvv = PipeWire internals
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List input devices with the index used to select them
    Devices,
    /// Remember an input device index for later runs
    Select {
        /// Index into the input device list
        index: usize,
    },
    /// Start the transport: capture once, then play it back (default)
    Run(RunArgs),
}

impl Default for Command {
    fn default() -> Self {
        Command::Run(RunArgs::default())
    }
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct RunArgs {
    /// Tempo in beats per minute
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub tempo: Option<u32>,

    /// Input device index (see `odaw devices`)
    #[arg(short, long)]
    pub device: Option<usize>,

    /// Capture duration in seconds
    #[arg(short, long)]
    pub seconds: Option<u64>,

    /// Container file written by the capture and read by playback
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print one JSON snapshot per tick
    #[arg(long)]
    pub json: bool,

    /// Store the tempo and device as defaults for later runs
    #[arg(long)]
    pub remember: bool,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("odaw", args.log_level());

    if args.verbose >= 4 {
        builder.filter_module("pipewire", args.log_level());
        builder.filter_module("libspa", args.log_level());
    }

    builder.format_timestamp_millis().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let args = Args::try_parse_from(["odaw"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.log_level(), LevelFilter::Warn);
        assert!(matches!(args.command.unwrap_or_default(), Command::Run(ref run) if run.tempo.is_none()));
    }

    #[test]
    fn test_run_options() {
        let args = Args::try_parse_from([
            "odaw", "-vv", "run", "--tempo", "90", "--device", "2", "--seconds", "4", "-o", "take.wav", "--json",
        ])
        .unwrap();
        assert_eq!(args.log_level(), LevelFilter::Debug);

        let Some(Command::Run(run)) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.tempo, Some(90));
        assert_eq!(run.device, Some(2));
        assert_eq!(run.seconds, Some(4));
        assert_eq!(run.output, Some(PathBuf::from("take.wav")));
        assert!(run.json);
        assert!(!run.remember);
    }

    #[test]
    fn test_rejects_zero_tempo() {
        assert!(Args::try_parse_from(["odaw", "run", "--tempo", "0"]).is_err());
    }

    #[test]
    fn test_quiet_wins() {
        let args = Args::try_parse_from(["odaw", "-q", "-vvv", "devices"]).unwrap();
        assert_eq!(args.log_level(), LevelFilter::Error);
        assert!(matches!(args.command, Some(Command::Devices)));
    }
}
