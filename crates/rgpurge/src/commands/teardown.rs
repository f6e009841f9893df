use crate::commands::{self, EXIT_VALIDATION};
use crate::output;
use clap::Args;
use colored::Colorize;
use rgpurge_cloud::{ContainerId, RetryConfig};
use rgpurge_config::RgpurgeConfig;
use rgpurge_core::{ContainerTeardownOrchestrator, RunContext, TeardownOptions, Timing};
use std::io::{BufRead, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug, Clone, Default)]
pub struct TeardownArgs {
    /// Resource group to delete
    pub resource_group: String,

    /// Subscription id or name
    #[arg(long, env = "RGPURGE_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Wait until the resource group is gone
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait for deletion with --wait
    #[arg(long, env = "RGPURGE_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Seconds between state polls with --wait
    #[arg(long, env = "RGPURGE_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Allow raw REST deletes of service association links
    #[arg(long)]
    pub allow_raw_delete: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Merge flags over the defaults file
pub fn options(args: &TeardownArgs, config: &RgpurgeConfig) -> TeardownOptions {
    let defaults = TeardownOptions::default();
    TeardownOptions {
        force_no_confirm: args.yes,
        synchronous_wait: args.wait || config.wait.unwrap_or(false),
        timeout: args
            .timeout
            .map(Duration::from_secs)
            .or(config.timeout())
            .unwrap_or(defaults.timeout),
        poll_interval: args
            .poll_interval
            .map(Duration::from_secs)
            .or(config.poll_interval())
            .unwrap_or(defaults.poll_interval),
        allow_protocol_level_fallback: args.allow_raw_delete
            || config.allow_raw_delete.unwrap_or(false),
    }
}

pub fn context(args: &TeardownArgs, config: &RgpurgeConfig, cancel: CancellationToken) -> RunContext {
    let timing = config
        .time_unit()
        .map(Timing::with_unit)
        .unwrap_or_default();
    let retry = RetryConfig {
        max_attempts: config.retry.max_attempts,
        initial_delay: config.retry.initial_delay(),
        max_delay: config.retry.max_delay(),
        backoff_multiplier: config.retry.multiplier,
    };

    RunContext::new(
        ContainerId::new(args.resource_group.clone()),
        options(args, config),
    )
    .with_timing(timing)
    .with_retry(retry)
    .with_cancellation(cancel)
}

/// Whether the operator typed the resource group name back
pub fn confirmed(container: &ContainerId, answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case(container.name())
}

fn ask(container: &ContainerId) -> bool {
    println!();
    println!(
        "{} every resource in {} will be deleted, including locks and network links.",
        "WARNING:".red().bold(),
        container.name().cyan()
    );
    print!("Type the resource group name to continue: ");
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => confirmed(container, &answer),
        Err(_) => false,
    }
}

pub async fn handle(args: TeardownArgs) -> anyhow::Result<i32> {
    let config = commands::load_config(args.subscription.clone())?;
    let Some(client) = commands::connect(&config).await else {
        return Ok(EXIT_VALIDATION);
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling after the current call...".yellow());
            on_signal.cancel();
        }
    });

    let ctx = context(&args, &config, cancel);
    println!(
        "{} {}",
        "Tearing down".bold(),
        ctx.container.name().cyan().bold()
    );

    let result = ContainerTeardownOrchestrator::new(&client, &ctx)
        .with_confirmation(ask)
        .run()
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.report)?);
    } else {
        output::print_report(&result.report);
    }
    output::print_outcome(result.outcome);
    Ok(result.outcome.exit_code())
}
