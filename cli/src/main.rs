mod commands;
mod config;
mod identity;
mod remote_client;
mod server;

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    MaintenanceArgs, SyncAction, cmd_fuel_add, cmd_fuel_list, cmd_login, cmd_logout,
    cmd_maintenance_add, cmd_maintenance_done, cmd_maintenance_list, cmd_odometer_add,
    cmd_odometer_list, cmd_report, cmd_sync, cmd_theme, cmd_vehicle_add, cmd_vehicle_list,
    cmd_vehicle_rename, cmd_whoami,
};
use crate::config::Config;
use crate::identity::FileIdentity;
use crate::remote_client::HttpRemoteStore;
use fleetlog_core::FleetService;
use fleetlog_core::documents::DocumentStore;
use fleetlog_core::legacy::JsonLegacyStore;
use fleetlog_core::sync::SyncEngine;

const ENV_LOG: &str = "FLEETLOG_LOG";

#[derive(Parser)]
#[command(
    name = "fleetlog",
    version,
    about = "Track odometer readings, refuels and maintenance for your vehicles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage vehicles
    Vehicle {
        #[command(subcommand)]
        command: VehicleCommands,
    },
    /// Record and list odometer readings
    Odometer {
        #[command(subcommand)]
        command: OdometerCommands,
    },
    /// Record and list refuels
    Fuel {
        #[command(subcommand)]
        command: FuelCommands,
    },
    /// Plan and track maintenance
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },
    /// Show distance, consumption and cost for a vehicle over a date range
    Report {
        /// Vehicle ID
        #[arg(short, long, default_value = "1")]
        vehicle: i64,
        /// First day (YYYY-MM-DD, default: start of this month)
        #[arg(long)]
        from: Option<String>,
        /// Last day (YYYY-MM-DD, default: today)
        #[arg(long)]
        to: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set the theme preference (dark/light)
    Theme {
        /// dark or light; omit to show the current value
        mode: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign in with a user id (a new random id when omitted)
    Login {
        /// User id to sign in as
        #[arg(long)]
        user: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the signed-in user id
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Overwrite the remote backup with local data
    Upload {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace local data with the remote backup
    Download {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge local data with the remote backup in both directions
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Host remote replicas for other devices over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum VehicleCommands {
    /// List vehicles
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a vehicle
    Add {
        /// Vehicle name
        name: String,
        /// Vehicle type: car or motorcycle
        #[arg(short = 't', long = "type", default_value = "car")]
        kind: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a vehicle
    Rename {
        /// Vehicle ID
        id: i64,
        /// New name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum OdometerCommands {
    /// Record an odometer reading
    Add {
        /// Reading in km
        km: f64,
        /// Vehicle ID
        #[arg(short, long, default_value = "1")]
        vehicle: i64,
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List odometer readings, newest first
    List {
        /// Only this vehicle
        #[arg(short, long)]
        vehicle: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FuelCommands {
    /// Record a refuel
    Add {
        /// Odometer reading in km at the pump
        km: f64,
        /// Liters filled
        liters: f64,
        /// Price per liter
        price: f64,
        /// Vehicle ID
        #[arg(short, long, default_value = "1")]
        vehicle: i64,
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List refuels, newest first
    List {
        /// Only this vehicle
        #[arg(short, long)]
        vehicle: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MaintenanceCommands {
    /// Schedule a maintenance item
    Add {
        /// Type: oil-change, tire-rotation, brake-service, general-review, other
        kind: String,
        /// Vehicle ID
        #[arg(short, long, default_value = "1")]
        vehicle: i64,
        /// Title (default: the type's name)
        #[arg(long)]
        title: Option<String>,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
        /// Due at this odometer reading (km)
        #[arg(long)]
        due_km: Option<f64>,
        /// Estimated cost
        #[arg(long)]
        cost: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List maintenance items with their due status
    List {
        /// Only this vehicle
        #[arg(short, long)]
        vehicle: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a maintenance item as done
    Done {
        /// Maintenance ID
        id: i64,
        /// Reopen instead
        #[arg(long)]
        undo: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_filter = match cli.command {
        Commands::Serve { .. } => "fleetlog=info,fleetlog_core=info",
        _ => "warn",
    };
    init_tracing(default_filter);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Migrations and the legacy import block, so they run off the async workers.
async fn open_service(config: &Config) -> Result<FleetService> {
    let db_path = config.db_path.clone();
    let legacy = JsonLegacyStore::new(&config.legacy_path);
    tokio::task::spawn_blocking(move || FleetService::open(&db_path, &legacy)).await?
}

fn sync_engine(config: &Config, svc: &FleetService) -> Result<SyncEngine> {
    let remote =
        HttpRemoteStore::new(config.remote_url.as_deref(), config.remote_api_key.clone())?;
    Ok(SyncEngine::new(
        Arc::new(svc.clone()),
        Arc::new(remote),
        Arc::new(FileIdentity::new(&config.identity_path)),
    )
    .with_strategy(config.sync_strategy))
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let identity = FileIdentity::new(&config.identity_path);

    // Commands that never touch the local store.
    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let store = DocumentStore::open(&config.server_db_path)?;
            return server::start_server(store, port, &bind, api_key).await;
        }
        Commands::Login { user, json } => return cmd_login(&identity, user.as_deref(), json),
        Commands::Logout { json } => return cmd_logout(&identity, json),
        Commands::Whoami { json } => return cmd_whoami(&identity, json),
        _ => {}
    }

    let svc = open_service(&config).await?;

    match cli.command {
        Commands::Vehicle { command } => match command {
            VehicleCommands::List { json } => cmd_vehicle_list(&svc, json),
            VehicleCommands::Add { name, kind, json } => cmd_vehicle_add(&svc, &name, &kind, json),
            VehicleCommands::Rename { id, name, json } => {
                cmd_vehicle_rename(&svc, id, &name, json)
            }
        },
        Commands::Odometer { command } => match command {
            OdometerCommands::Add {
                km,
                vehicle,
                date,
                json,
            } => cmd_odometer_add(&svc, vehicle, km, date, json),
            OdometerCommands::List { vehicle, json } => cmd_odometer_list(&svc, vehicle, json),
        },
        Commands::Fuel { command } => match command {
            FuelCommands::Add {
                km,
                liters,
                price,
                vehicle,
                date,
                json,
            } => cmd_fuel_add(&svc, vehicle, km, liters, price, date, json),
            FuelCommands::List { vehicle, json } => cmd_fuel_list(&svc, vehicle, json),
        },
        Commands::Maintenance { command } => match command {
            MaintenanceCommands::Add {
                kind,
                vehicle,
                title,
                notes,
                due,
                due_km,
                cost,
                json,
            } => cmd_maintenance_add(
                &svc,
                MaintenanceArgs {
                    vehicle_id: vehicle,
                    kind,
                    title,
                    notes,
                    due_date: due,
                    due_km,
                    cost,
                },
                json,
            ),
            MaintenanceCommands::List { vehicle, json } => {
                cmd_maintenance_list(&svc, vehicle, json)
            }
            MaintenanceCommands::Done { id, undo, json } => {
                cmd_maintenance_done(&svc, id, undo, json)
            }
        },
        Commands::Report {
            vehicle,
            from,
            to,
            json,
        } => cmd_report(&svc, vehicle, from, to, json),
        Commands::Theme { mode, json } => cmd_theme(&svc, mode.as_deref(), json),
        Commands::Upload { json } => {
            cmd_sync(&sync_engine(&config, &svc)?, SyncAction::Upload, json).await
        }
        Commands::Download { json } => {
            cmd_sync(&sync_engine(&config, &svc)?, SyncAction::Download, json).await
        }
        Commands::Sync { json } => {
            cmd_sync(&sync_engine(&config, &svc)?, SyncAction::Sync, json).await
        }
        Commands::Serve { .. }
        | Commands::Login { .. }
        | Commands::Logout { .. }
        | Commands::Whoami { .. } => Ok(()),
    }
}
