pub mod chat;
pub mod config_cmd;
pub mod providers;
pub mod tools;

use std::sync::Arc;

use anyhow::Context;
use switchboard_config::AppConfig;
use switchboard_providers::{HttpTransport, UnifiedClient};

/// Build the streaming client described by `config`.
pub fn build_client(config: &AppConfig) -> anyhow::Result<UnifiedClient> {
    let transport = HttpTransport::new().context("Failed to create HTTP transport")?;
    let client = UnifiedClient::from_configs(Arc::new(transport), config.provider_configs())
        .with_default_provider(&config.default_provider)?
        .with_retry_policy(config.retry.to_policy());
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_follows_config_default() {
        let mut config = AppConfig::default();
        config.default_provider = "anthropic".into();
        let client = build_client(&config).unwrap();
        assert_eq!(client.router().default_provider(), Some("anthropic"));
        assert_eq!(client.router().list().len(), config.providers.len());
        assert_eq!(client.retry_policy().max_attempts, config.retry.max_attempts);
    }
}
