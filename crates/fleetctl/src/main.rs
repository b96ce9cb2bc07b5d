//! fleetctl: run one fleet lifecycle operation against a simulated world.
//!
//! ```text
//! fleetctl --world fixtures/world.toml wait-capacity web --update
//! fleetctl --world fixtures/world.toml reconcile web --kind target-group tg-1 tg-2
//! fleetctl --world fixtures/world.toml delete web --force
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod commands;

use commands::{KindArg, OutputFormat, Session};

#[derive(Parser)]
#[command(
    name = "fleetctl",
    about = "FleetGrid: fleet convergence dry runs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Simulated world fixture (TOML).
    #[arg(long, global = true, default_value = "fixtures/world.toml")]
    world: PathBuf,

    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for a fleet to reach its configured capacity.
    WaitCapacity {
        fleet: String,
        /// Use the exact (update) predicate instead of the lower-bound (create) one.
        #[arg(long)]
        update: bool,
        /// Members that must be healthy in every load balancer.
        #[arg(long, default_value = "0")]
        min_balanced: u32,
    },
    /// Converge one attachment kind to the given identifiers.
    Reconcile {
        fleet: String,
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Desired identifiers; empty detaches everything.
        ids: Vec<String>,
    },
    /// Start a refresh, replacing any active one.
    Refresh {
        fleet: String,
        /// Wait for the refresh to complete.
        #[arg(long)]
        wait: bool,
        /// Only cancel the active refresh.
        #[arg(long, conflicts_with = "wait")]
        cancel: bool,
    },
    /// Drain a fleet, or its warm pool, to zero members.
    Drain {
        fleet: String,
        #[arg(long)]
        warm_pool: bool,
    },
    /// Delete a fleet, draining it first unless forced.
    Delete {
        fleet: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        force_warm_pool: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,fleetctl=debug,fleetgrid=debug"))?;
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // ── Shutdown signal ────────────────────────────────────────

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, abandoning wait");
            on_signal.cancel();
        }
    });

    let session = Session::load(&cli.world, cli.config.as_deref(), cli.format, shutdown)?;

    match cli.command {
        Command::WaitCapacity {
            fleet,
            update,
            min_balanced,
        } => commands::capacity::wait(&session, &fleet, update, min_balanced).await,
        Command::Reconcile { fleet, kind, ids } => {
            commands::attach::reconcile(&session, &fleet, kind.into(), ids).await
        }
        Command::Refresh {
            fleet,
            wait,
            cancel,
        } => {
            if cancel {
                commands::refresh::cancel(&session, &fleet).await
            } else {
                commands::refresh::start(&session, &fleet, wait).await
            }
        }
        Command::Drain { fleet, warm_pool } => {
            commands::teardown::drain(&session, &fleet, warm_pool).await
        }
        Command::Delete {
            fleet,
            force,
            force_warm_pool,
        } => commands::teardown::delete(&session, &fleet, force, force_warm_pool).await,
    }
}
