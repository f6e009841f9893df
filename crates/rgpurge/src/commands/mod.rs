pub mod scan;
pub mod teardown;

use colored::Colorize;
use rgpurge_azure::AzureControlPlane;
use rgpurge_config::RgpurgeConfig;

/// Exit code for a missing or unusable az session
pub const EXIT_VALIDATION: i32 = 2;

/// Defaults file, with `--subscription`/env taking precedence
pub fn load_config(subscription: Option<String>) -> anyhow::Result<RgpurgeConfig> {
    let mut config = rgpurge_config::load()?;
    if let Some(path) = &config.source {
        tracing::debug!(path = %path.display(), "Loaded defaults");
    }
    if subscription.is_some() {
        config.subscription = subscription;
    }
    Ok(config)
}

/// Build the Azure client and make sure az can talk to the subscription
pub async fn connect(config: &RgpurgeConfig) -> Option<AzureControlPlane> {
    let client = AzureControlPlane::new(config.subscription.clone());
    let auth = client.check_auth().await;

    if !auth.authenticated {
        eprintln!(
            "{} {}",
            "Azure login required:".red().bold(),
            auth.error.unwrap_or_default()
        );
        eprintln!("  Run {} and try again", "az login".cyan());
        return None;
    }
    if let Some(account) = auth.account_info {
        println!("{} {}", "Subscription:".dimmed(), account);
    }
    Some(client)
}
