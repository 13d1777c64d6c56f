use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Run collectors on their schedules and keep what they print.
///
/// Output lands in a fresh work directory under `--basedir`, which is packed
/// into a report archive in `--results-dir` on shutdown.
#[derive(Parser, Debug)]
#[command(name = "repeat", version, about = "Periodic collector scheduler")]
pub struct CliArgs {
    /// Collectors file (YAML)
    #[arg(short, long, env = "REPEAT_CONFIG")]
    pub config: PathBuf,

    /// Kill everything after this long, e.g. `90s` or `2h`. `0s` disables it
    #[arg(short, long, env = "REPEAT_TIMEOUT", default_value = "0s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Parent directory of the work directory
    #[arg(short, long, env = "REPEAT_BASEDIR", default_value = "/tmp")]
    pub basedir: PathBuf,

    /// Where the report archive is written
    #[arg(short, long, env = "REPEAT_RESULTS_DIR", default_value = ".")]
    pub results_dir: PathBuf,

    /// Log level when RUST_LOG is unset
    #[arg(short, long, env = "REPEAT_LOG", default_value = "info")]
    pub loglevel: String,
}

impl CliArgs {
    pub fn global_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}
