//! # pvebridge
//!
//! Operator CLI for a Proxmox VE cluster. Each subcommand is routed to the
//! SSH or REST backend, executed once, and its result printed as JSON.
//!
//! ## Usage
//! ```bash
//! pvebridge vm list --node pve1
//! pvebridge --backend ssh snapshot create 100 pre-upgrade
//! pvebridge --confirm vm delete 100 --purge
//! ```

use anyhow::Result;
use clap::Parser;
use pvebridge_transport::{DestructivePolicy, Router};
use tracing::{error, info};

mod cli;
mod config;
mod dispatch;

use cli::Args;
use dispatch::Dispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so clap sees its variables
    let dotenv = config::load_dotenv();

    let args = Args::parse();

    if args.log_json {
        pvebridge_common::init_logging_json(&args.log_level)?;
    } else {
        pvebridge_common::init_logging(&args.log_level)?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pvebridge");
    if let Some(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let config = config::resolve(args.config.as_deref(), &args.overrides)?;
    let router = Router::new(&config)?;
    let dispatcher = Dispatcher::new(
        router,
        args.backend,
        DestructivePolicy::new(config.safe_mode),
        args.confirm,
    );

    dispatcher.router().connect().await?;
    let result = dispatcher.run(&args.command).await;
    if let Err(e) = dispatcher.router().disconnect().await {
        error!(error = %e, "Failed to disconnect cleanly");
    }

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report.value)?);

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}
