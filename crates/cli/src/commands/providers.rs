//! `switchboard providers`: List configured providers.

use anyhow::Context;
use switchboard_config::AppConfig;

use super::build_client;

pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let client = build_client(&config)?;
    let default = client.router().default_provider().unwrap_or_default();

    println!("Configured providers");
    println!("====================");
    println!();
    println!(
        "  {:<2}{:<14} {:<14} {:<48} {:<5} {:<6} {:>9}  key",
        "", "name", "kind", "endpoint", "tools", "images", "context"
    );
    for provider in client.router().list() {
        let marker = if provider.name == default { "*" } else { "" };
        let key = if provider.api_key.is_some() { "set" } else { "missing" };
        println!(
            "  {:<2}{:<14} {:<14} {:<48} {:<5} {:<6} {:>9}  {key}",
            marker,
            provider.name,
            provider.kind.to_string(),
            provider.endpoint,
            yes_no(provider.capabilities.supports_tools),
            yes_no(provider.capabilities.supports_images),
            provider.capabilities.context_window,
        );
    }
    println!();
    println!("  * default provider; other providers are selected with a");
    println!("    \"<provider>/<model>\" prefix, e.g. \"anthropic/claude-sonnet-4\".");
    println!();
    println!("  Any OpenAI-compatible API works with kind = \"openai_compat\":");
    println!("    [providers.openrouter]");
    println!("    kind = \"openai_compat\"");
    println!("    api_url = \"https://openrouter.ai/api/v1\"");
    println!("    api_key_env = \"OPENROUTER_API_KEY\"");

    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_labels() {
        assert_eq!(yes_no(true), "yes");
        assert_eq!(yes_no(false), "no");
    }
}
