//! CLI argument parsing shared by collectors.

use std::path::PathBuf;

use clap::Args;

/// Common CLI arguments for all collectors.
///
/// Flatten into a collector's own parser with `#[command(flatten)]`.
#[derive(Args, Debug, Clone)]
pub struct CollectorArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, global = true, default_value = "minersight.json5")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}
