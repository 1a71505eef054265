use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "portside",
    version,
    about = "A dashboard backend for Kubernetes preview environments."
)]
pub struct CliArgs {
    /// Port the HTTP API listens on
    #[arg(short, long, default_value_t = 3001)]
    pub port: u16,

    /// Path to the YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}
