//! `check-config` command: validate a configuration file.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use signalscan_core::config_loader::DEFAULT_CONFIG_PATH;
use signalscan_core::{ChannelId, ConfigLoader};

/// Arguments for the check-config command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, env = "SIGNALSCAN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Print the effective configuration (defaults and environment applied) as JSON
    #[arg(long)]
    pub print: bool,
}

pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;

    if args.print {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }

    let enabled: Vec<&str> = ChannelId::ALL
        .iter()
        .filter(|c| config.channels.common(**c).enabled)
        .map(|c| c.as_str())
        .collect();
    eprintln!("Configuration OK: {}", args.config.display());
    eprintln!("  Enabled channels: {}", enabled.join(", "));
    eprintln!(
        "  Dedup window: {}ms, cooldown: {}s, caps: {}/min {}/hour",
        config.dedup.window_ms,
        config.suppression.cooldown_secs,
        config.suppression.max_alerts_per_minute,
        config.suppression.max_alerts_per_hour,
    );
    eprintln!(
        "  Alert threshold: {:.1}, dry run: {}",
        config.scoring.alert_threshold, config.engine.dry_run
    );
    Ok(())
}
