//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Per-message JSON reshaping for streaming-connector pipelines
#[derive(Parser, Debug)]
#[command(name = "stream-remap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "REMAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mapping location override (local path or remote object key)
    #[arg(short, long, env = "REMAP_MAPPING")]
    pub mapping: Option<String>,

    /// Topic name attached to each stdin record
    #[arg(short, long, env = "REMAP_TOPIC", default_value = "")]
    pub topic: String,

    /// Connector name attached to each stdin record
    #[arg(long, env = "REMAP_CONNECTOR", default_value = "")]
    pub connector: String,

    /// Emit the projected object directly instead of wrapping it under
    /// the mapping root
    #[arg(long)]
    pub flat: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "REMAP_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "REMAP_LOG_FORMAT")]
    pub log_format: Option<String>,
}
