//! `switchboard config`: Configuration management commands.

use anyhow::Context;
use switchboard_config::AppConfig;

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("{toml_str}");
    Ok(())
}

pub fn init(force: bool) -> anyhow::Result<()> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub fn validate() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Configuration is invalid")?;
    println!("Configuration OK");
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Retries:   {} attempt(s)", config.retry.max_attempts);
    println!("  Max turns: {}", config.agent.max_turns);

    let missing: Vec<&str> = config
        .providers
        .iter()
        .filter(|(_, p)| p.api_key.is_none())
        .map(|(name, _)| name.as_str())
        .collect();
    if !missing.is_empty() {
        println!();
        println!("  No API key for: {}", missing.join(", "));
    }
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}
