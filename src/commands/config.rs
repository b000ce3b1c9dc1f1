use anyhow::Result;
use colored::Colorize;
use anti_truncation_proxy::config;

/// Displays the current configuration. Unlike the upstream dialects
/// this proxy talks to, its own config carries no API keys to mask.
pub fn show() -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let cfg = config::load_config()?;
    let toml_string = toml::to_string_pretty(&cfg)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", toml_string);

    Ok(())
}

/// Validates the configuration file.
pub fn validate() -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let cfg = config::load_config()?;

    println!("{}", "\u{2713} Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Listen: {}:{}", cfg.server.host, cfg.server.port);
    println!("  Activation prefix: {}", cfg.anti_truncation.model_prefix);
    println!("  Marker: {}", cfg.anti_truncation.marker);
    println!("  Max attempts: {}", cfg.anti_truncation.max_attempts);
    println!("  Trusted proxy CIDRs: {}", cfg.proxy.trusted_proxy_cidrs.len());

    Ok(())
}
