//! CLI surface for the `ladder-mm` binary (§10.6), in the style of the
//! lineage's `CommonArgs`: one flat struct, `clap` derive, sane defaults so
//! the binary runs with only a config file or environment variables.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Parametric ladder market maker")]
pub struct Args {
    /// Path to an optional TOML configuration file layered under environment
    /// variables (§10.2).
    #[arg(short = 'f', long)]
    pub config: Option<String>,

    /// Log level, overridden by `RUST_LOG` when set.
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit JSON-formatted logs instead of human-readable ones.
    #[arg(long)]
    pub json_logs: bool,
}
