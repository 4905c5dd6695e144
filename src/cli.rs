use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::telemetry::{LogConfig, LogLevel};

/// Attach an interactive terminal to a live project demo.
#[derive(Parser, Debug)]
#[command(name = "demoterm", version, about)]
pub struct Cli {
    /// Project slug to attach to (e.g. `minirt`).
    pub slug: String,

    /// Host serving the demo terminal service (optionally `host:port`).
    #[arg(long, env = "DEMOTERM_HOST")]
    pub host: Option<String>,

    /// Use plain ws:// even for non-local hosts.
    #[arg(long)]
    pub insecure: bool,

    /// Skip the health-endpoint wake-up ping before dialing.
    #[arg(long)]
    pub no_warmup: bool,

    /// Log verbosity.
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Write logs to this file instead of stderr. Recommended for
    /// anything above warn, since stderr shares the screen with the
    /// session.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(host) = &self.host {
            if !host.trim().is_empty() {
                config.host = host.trim().to_string();
            }
        }
        if self.insecure {
            config.secure = Some(false);
        }
        config.warmup = !self.no_warmup;
        config
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            file: self.log_file.clone(),
        }
    }
}
