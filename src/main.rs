//! trafficd CLI entry point.
//!
//! Provides `start`, `dump`, and `firewall-type` subcommands.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use trafficd::config::{config_dir, load_config, Config};
use trafficd::controller::{ControllerMaps, TrafficController};
use trafficd::firewall::{firewall_type_for_id, ChildChain, PermissionGrant};
use trafficd::monitor::SocketDestroyMonitor;

/// trafficd: per-UID traffic firewall control plane.
#[derive(Parser)]
#[command(name = "trafficd", version, about)]
struct Cli {
    /// Config file (default: ~/.trafficd/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Apply the boot policy and run the socket monitor until Ctrl-C.
    Start,
    /// Apply the boot policy to fresh tables and print every table.
    Dump {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print whether a chain is an allowlist or a denylist.
    FirewallType {
        /// Chain name (`fw_dozable`) or numeric id.
        chain: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::FirewallType { chain } => handle_firewall_type(&chain),
        Command::Dump { json } => {
            let config = resolve_config(cli.config)?;
            trafficd::logging::init_cli(&config.logging.level);
            handle_dump(&config, json)
        }
        Command::Start => {
            let config = resolve_config(cli.config)?;
            handle_start(config).await
        }
    }
}

fn resolve_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p,
        None => config_dir()?.join("config.toml"),
    };
    load_config(&path)
}

fn handle_firewall_type(chain: &str) -> anyhow::Result<()> {
    let firewall_type = match chain.parse::<i32>() {
        Ok(id) => firewall_type_for_id(id),
        Err(_) => chain
            .parse::<ChildChain>()
            .with_context(|| format!("unknown chain {chain}"))?
            .firewall_type(),
    };
    println!("{firewall_type}");
    Ok(())
}

fn handle_dump(config: &Config, json: bool) -> anyhow::Result<()> {
    let controller = TrafficController::new(ControllerMaps::in_memory(&config.maps));
    apply_boot_policy(&controller, config)?;
    let report = controller.dump();
    if json {
        let out = serde_json::to_string_pretty(&report).context("failed to encode dump")?;
        println!("{out}");
    } else {
        for line in report.lines() {
            println!("{line}");
        }
    }
    Ok(())
}

/// Run the daemon: boot policy, then the socket monitor until Ctrl-C.
async fn handle_start(config: Config) -> anyhow::Result<()> {
    let logs_dir = match &config.logging.logs_dir {
        Some(dir) => dir.clone(),
        None => config_dir()?.join("logs"),
    };
    let _logging_guard = trafficd::logging::init_production(&logs_dir, &config.logging.level)?;

    let controller = TrafficController::new(ControllerMaps::in_memory(&config.maps));
    apply_boot_policy(&controller, &config)?;

    let monitor = SocketDestroyMonitor::new(controller.cookie_tag_map());
    monitor.register_error_handler(|e| warn!(error = %e, "socket monitor reported an error"));
    // In-memory tables have no kernel notification source attached to `events`.
    let (events, rx) = SocketDestroyMonitor::channel(config.monitor.event_capacity);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = monitor.spawn(rx, shutdown_rx);

    info!(
        event_capacity = config.monitor.event_capacity,
        "trafficd started, waiting for Ctrl-C"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("received shutdown signal");

    drop(events);
    if let Err(e) = shutdown_tx.send(true) {
        debug!(error = %e, "socket monitor already stopped");
    }
    let stats = handle.await.context("socket monitor task panicked")?;
    info!(
        events = stats.events,
        untagged = stats.untagged,
        overflows = stats.overflows,
        dropped = stats.dropped,
        "socket monitor finished"
    );

    for line in controller.dump().lines() {
        info!("{line}");
    }
    Ok(())
}

/// Apply the `[policy]` section to `controller`, stopping at the first failure.
fn apply_boot_policy(controller: &TrafficController, config: &Config) -> anyhow::Result<()> {
    let policy = &config.policy;

    for chain in &policy.chains {
        controller
            .replace_uid_owner_map(&chain.name, chain.allowlist, &chain.uids)
            .with_context(|| format!("failed to apply chain {}", chain.name))?;
    }
    for rule in &policy.interfaces {
        controller
            .add_uid_interface_rules(rule.iif, &rule.uids)
            .with_context(|| format!("failed to apply interface rule for iif {}", rule.iif))?;
    }
    for uid in &policy.lockdown_uids {
        controller
            .update_uid_lockdown_rule(*uid, true)
            .with_context(|| format!("failed to enable lockdown for uid {uid}"))?;
    }
    for entry in &policy.permissions {
        let grant = PermissionGrant::try_from(entry.permissions)?;
        controller
            .set_permission_for_uids(grant, &entry.uids)
            .with_context(|| format!("failed to apply permissions {}", entry.permissions))?;
    }

    info!(
        chains = policy.chains.len(),
        interfaces = policy.interfaces.len(),
        lockdown = policy.lockdown_uids.len(),
        permissions = policy.permissions.len(),
        "applied boot policy"
    );
    Ok(())
}
