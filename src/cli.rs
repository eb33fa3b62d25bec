use clap::Parser;
use std::path::PathBuf;

use crate::agents::config::CoordinationMode;

/// Agora - multi-agent coordination engine
#[derive(Parser, Debug, Clone)]
#[command(name = "agora", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "AGORA_CONFIG", default_value = "agora.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "AGORA_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "AGORA_PORT")]
    pub port: Option<u16>,

    /// Coordination mode used when a request does not name one
    #[arg(long, env = "AGORA_MODE", value_parser = parse_mode)]
    pub mode: Option<CoordinationMode>,
}

fn parse_mode(value: &str) -> Result<CoordinationMode, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown mode '{}' (sequential, parallel, collaborative, debate)", value))
}
