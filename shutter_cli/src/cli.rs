//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "shutterd", version, about = "Wireless switch to shutter-motor bridge")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/shutters.toml")]
    pub config: PathBuf,

    /// Log motor commands instead of driving the serial helper
    #[arg(long, action = ArgAction::SetTrue)]
    pub simulate: bool,

    /// Console log level (error|warn|info|debug|trace); overrides config
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the service: consume receiver events (JSON lines) from stdin
    Run,
    /// One-shot operation, waits for the movement to settle.
    ///
    /// Useful for tuning travel times: `drive <shutter> close`, adjust
    /// close_secs, repeat; `drive <shutter> 50` verifies the result.
    Drive {
        /// Shutter id from the config
        shutter: String,
        /// open | close | stop | a percent like "50"
        target: DriveTarget,
    },
    /// Print persisted shutter positions
    Status,
    /// Validate the configuration file
    CheckConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveTarget {
    Open,
    Close,
    Stop,
    Percent(f32),
}

impl FromStr for DriveTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(DriveTarget::Open),
            "close" => Ok(DriveTarget::Close),
            "stop" => Ok(DriveTarget::Stop),
            other => {
                let percent: f32 = other
                    .strip_suffix('%')
                    .unwrap_or(other)
                    .parse()
                    .map_err(|_| format!("expected open, close, stop, or a percent; got {s:?}"))?;
                if !(percent.is_finite() && (0.0..=100.0).contains(&percent)) {
                    return Err(format!("percent out of range [0, 100]: {s:?}"));
                }
                Ok(DriveTarget::Percent(percent))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("open", DriveTarget::Open)]
    #[case("CLOSE", DriveTarget::Close)]
    #[case("stop", DriveTarget::Stop)]
    #[case("50", DriveTarget::Percent(50.0))]
    #[case("37.5%", DriveTarget::Percent(37.5))]
    fn parses_targets(#[case] input: &str, #[case] expected: DriveTarget) {
        assert_eq!(input.parse::<DriveTarget>().unwrap(), expected);
    }

    #[rstest]
    #[case("halfway")]
    #[case("120")]
    #[case("-5")]
    fn rejects_invalid_targets(#[case] input: &str) {
        assert!(input.parse::<DriveTarget>().is_err());
    }
}
