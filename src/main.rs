mod config;

use std::process::ExitCode;
use std::sync::Arc;

use air_client::{
    Client, CompletionContext, FlightCache, FlightId, FlightRequest, JsonFileStore, TrackEvent, TrackReport,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use config::AppConfig;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "air", about = "Register flights and download their AiR flight data", version)]
struct Cli {
    /// API base URL, e.g. https://air.xsanda.me/api/v1 (overrides config and AIR_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a flight, then poll and download its data
    Register {
        /// Flight number such as BA123
        flight_number: String,

        /// Departure date as YYYY-MM-DD (defaults to today)
        date: Option<String>,

        /// Only register; print the identifier and exit
        #[arg(long)]
        no_track: bool,
    },

    /// Poll and download data for an already registered flight
    Track {
        id: String,
    },

    /// Ask the server to recompute a flight, then download the new data
    Reload {
        id: String,
    },

    /// List flights registered on this machine
    List,

    /// Print the config file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if matches!(cli.command, Command::ConfigPath) {
        println!("{}", AppConfig::get_config_path()?.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = AppConfig::load()?;
    let server_url = cli.server.unwrap_or_else(|| config.resolve_server_url());
    debug!("Using server {}", server_url);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let result = run(cli.command, &config, server_url, &cancel).await;
    Ok(ExitCode::from(exit_status(&result)))
}

/// Log a failed command once and map it to the process exit status.
fn exit_status(result: &Result<(), air_client::Error>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e.user_message());
            debug!("{:?}", e);
            1
        }
    }
}

async fn run(
    command: Command,
    config: &AppConfig,
    server_url: String,
    cancel: &CancellationToken,
) -> Result<(), air_client::Error> {
    let client = build_client(config, server_url)?;

    match command {
        Command::Register {
            flight_number,
            date,
            no_track,
        } => {
            let request = match date {
                Some(date) => FlightRequest::parse(flight_number, &date)?,
                None => FlightRequest::new(flight_number, Local::now().date_naive())?,
            };
            info!("Registering {} on {}", request.flight_number(), request.date());

            if no_track {
                let id = client.create_flight(&request, cancel).await?;
                println!("{id}");
                return Ok(());
            }

            let (context, printer) = spawn_event_printer();
            let result = client.register_and_track(&request, &context, cancel).await;
            finish(context, printer, result).await
        }
        Command::Track { id } => {
            let (context, printer) = spawn_event_printer();
            let result = client.track(&FlightId::new(id), &context, cancel).await;
            finish(context, printer, result).await
        }
        Command::Reload { id } => {
            let (context, printer) = spawn_event_printer();
            let result = client.reload_and_track(&FlightId::new(id), &context, cancel).await;
            finish(context, printer, result).await
        }
        Command::List => {
            let flights = client.flights().await?;
            if flights.is_empty() {
                println!("No flights registered");
            }
            for id in flights {
                match client.cached_flight(&id) {
                    Some(data) => println!(
                        "{id}\t{}\t{}",
                        data.route_label().unwrap_or_else(|| "unknown route".to_string()),
                        data.date.as_deref().unwrap_or("-"),
                    ),
                    None => println!("{id}\t(not downloaded)"),
                }
            }
            Ok(())
        }
        Command::ConfigPath => Ok(()),
    }
}

fn build_client(config: &AppConfig, server_url: String) -> Result<Client, air_client::Error> {
    let store = JsonFileStore::default_location()?;
    debug!("Flight registry at {}", store.path().display());

    let client = Client::new(config.to_client_config(server_url), Arc::new(store))?;
    if !config.cache_tiles {
        return Ok(client);
    }
    match FlightCache::new() {
        Ok(cache) => Ok(client.with_cache(cache)),
        Err(e) => {
            warn!("Flight cache unavailable, continuing without it: {}", e);
            Ok(client)
        }
    }
}

fn spawn_event_printer() -> (CompletionContext, JoinHandle<()>) {
    let (context, mut events) = CompletionContext::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TrackEvent::StateChanged(state) => debug!("State: {:?}", state),
                TrackEvent::Progress(progress) => info!("Progress: {:.0}%", progress * 100.0),
                TrackEvent::TileFinished { index, tile_id, ok } => {
                    if ok {
                        debug!("Tile {} ({}) downloaded", index, tile_id);
                    } else {
                        warn!("Tile {} ({}) failed", index, tile_id);
                    }
                }
                TrackEvent::Completed { id, failed_tiles } => {
                    info!("Flight {} complete ({} failed tiles)", id, failed_tiles);
                }
                TrackEvent::Failed(message) => debug!("Session failed: {}", message),
            }
        }
    });
    (context, printer)
}

async fn finish(
    context: CompletionContext,
    printer: JoinHandle<()>,
    result: Result<TrackReport, air_client::Error>,
) -> Result<(), air_client::Error> {
    drop(context);
    let _ = printer.await;

    let report = result?;
    if let Some(route) = report.data.route_label() {
        println!("{}: {}", report.id, route);
    }
    println!(
        "{}: {} of {} tiles downloaded",
        report.id,
        report.images.len(),
        report.images.len() + report.failed.len()
    );
    for failed in &report.failed {
        println!("  tile {} failed: {}", failed.tile.id, failed.error);
    }
    Ok(())
}
