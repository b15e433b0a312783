use std::path::PathBuf;

use clap::Parser;

/// Inspects configuration sources: prints each source's canonical key
/// mapping and the merged view the resolution engine would see.
#[derive(Debug, Parser)]
#[command(name = "typedconf", about = "Inspect typedconf configuration sources")]
pub struct Cli {
    /// Include the process environment as a source.
    #[arg(long)]
    pub env: bool,

    /// Prefix namespace for the environment source.
    #[arg(long)]
    pub env_namespace: Option<String>,

    /// Dotenv files to read, in precedence order.
    #[arg(long)]
    pub dotenv: Vec<PathBuf>,

    /// Prefix namespace applied to every dotenv file.
    #[arg(long)]
    pub dotenv_prefix: Option<String>,

    /// JSON files to read, in precedence order.
    #[arg(long)]
    pub json: Vec<PathBuf>,

    /// Dot-separated path descended in every JSON file (numbers index arrays).
    #[arg(long)]
    pub json_namespace: Option<String>,

    /// TOML files to read, in precedence order.
    #[arg(long)]
    pub toml: Vec<PathBuf>,

    /// Dot-separated path descended in every TOML file.
    #[arg(long)]
    pub toml_namespace: Option<String>,

    /// INI files to read, in precedence order.
    #[arg(long)]
    pub ini: Vec<PathBuf>,

    /// Section read from every INI file (defaults to the DEFAULT section).
    #[arg(long)]
    pub ini_section: Option<String>,

    /// Consul root URL, e.g. http://localhost:8500.
    #[arg(long)]
    pub consul: Option<String>,

    /// Consul KV namespace.
    #[arg(long)]
    pub consul_namespace: Option<String>,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
