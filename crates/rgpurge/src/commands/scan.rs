use crate::commands::{self, EXIT_VALIDATION};
use crate::output;
use clap::Args;
use colored::Colorize;
use rgpurge_cloud::{ContainerId, ControlPlaneClient};
use rgpurge_core::{ResourceGraphScanner, ScanMode};

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Resource group to inspect
    pub resource_group: String,

    /// Subscription id or name
    #[arg(long, env = "RGPURGE_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Look for references across the whole subscription
    #[arg(long)]
    pub broad: bool,

    /// Print the inventory as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn handle(args: ScanArgs) -> anyhow::Result<i32> {
    let config = commands::load_config(args.subscription.clone())?;
    let Some(client) = commands::connect(&config).await else {
        return Ok(EXIT_VALIDATION);
    };

    let container = ContainerId::new(args.resource_group.clone());
    match client.get_container_state(&container).await? {
        Some(state) => println!(
            "{} {} ({})",
            "Resource group".bold(),
            container.name().cyan().bold(),
            state
        ),
        None => {
            eprintln!(
                "{} resource group {} not found",
                "Error:".red().bold(),
                container.name()
            );
            return Ok(EXIT_VALIDATION);
        }
    }

    let mode = if args.broad {
        ScanMode::Broad
    } else {
        ScanMode::Scoped
    };
    let inventory = ResourceGraphScanner::new(&client, &container)
        .survey(mode)
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
    } else {
        output::print_inventory(&inventory);
    }
    Ok(0)
}
