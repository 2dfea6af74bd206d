/// Show how far behind each station is, and manage scenario assignments
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dwlr_simulator::config::{Config, StoreKind};
use dwlr_simulator::db::{self, ReadingRepository, StationRepository};
use dwlr_simulator::models::Station;
use dwlr_simulator::slots::SlotInterval;
use dwlr_simulator::source::{CursorSource, StationSource};
use dwlr_simulator::supabase::SupabaseClient;
use dwlr_simulator::trend::Scenario;

#[derive(Parser)]
#[command(name = "station-status")]
#[command(about = "Inspect simulated DWLR stations", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List stations with their last reading and missing intervals (default)
    List,
    /// Assign a scenario to one station, registering it if needed (PostgreSQL only)
    SetScenario {
        station: String,
        scenario: String,
    },
    /// Set the run-wide default scenario (PostgreSQL only)
    SetGlobal { scenario: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    match (args.command.unwrap_or(Command::List), config.store) {
        (Command::List, StoreKind::Postgres) => {
            let pool = db::connect(config.database_url()?, config.max_connections).await?;
            let stations = StationRepository::new(pool.clone(), &config.tables);
            let readings = ReadingRepository::new(pool, &config.tables.readings);
            list(&stations, &readings, config.interval).await?;
        }
        (Command::List, StoreKind::Supabase) => {
            let client = SupabaseClient::new(config.supabase_credentials()?, &config.tables)?;
            list(&client, &client, config.interval).await?;
        }
        (Command::SetScenario { station, scenario }, StoreKind::Postgres) => {
            let pool = db::connect(config.database_url()?, config.max_connections).await?;
            let repo = StationRepository::new(pool, &config.tables);
            let scenario = parse_scenario(&scenario)?;

            let existing = repo
                .list_stations()
                .await?
                .into_iter()
                .find(|s| s.wlcode == station);
            let mut entry = existing.unwrap_or_else(|| Station::with_code(&station));
            entry.scenario = Some(scenario.clone());
            repo.upsert_station(&entry).await?;
            println!("{station}: scenario set to {scenario}");
        }
        (Command::SetGlobal { scenario }, StoreKind::Postgres) => {
            let pool = db::connect(config.database_url()?, config.max_connections).await?;
            let repo = StationRepository::new(pool, &config.tables);
            let scenario = parse_scenario(&scenario)?;
            repo.set_global_scenario(&scenario).await?;
            println!("Global scenario set to {scenario}");
        }
        (_, StoreKind::Supabase) => {
            return Err("Scenario changes are only supported with the PostgreSQL store".into());
        }
    }

    Ok(())
}

fn parse_scenario(tag: &str) -> Result<Scenario, Box<dyn std::error::Error>> {
    let scenario = Scenario::from_tag(tag);
    if !scenario.is_recognized() {
        return Err(format!(
            "Unknown scenario '{tag}' (expected normal, drought, over_extraction or recharge)"
        )
        .into());
    }
    Ok(scenario)
}

async fn list<St, Cu>(
    stations: &St,
    cursors: &Cu,
    interval: SlotInterval,
) -> Result<(), Box<dyn std::error::Error>>
where
    St: StationSource,
    Cu: CursorSource,
{
    let now = Utc::now();
    let global = stations
        .global_default_scenario()
        .await?
        .unwrap_or_default();
    let registered = stations.list_stations().await?;

    println!("Default scenario: {global}");
    println!(
        "{:<10} {:<16} {:<20} {:<18} {:>9} {:>8}",
        "WLCODE", "SCENARIO", "DISTRICT", "LAST READING", "LEVEL", "BEHIND"
    );

    for station in &registered {
        let scenario = station.scenario.clone().unwrap_or_else(|| global.clone());
        let (last, level, behind) = match cursors.last_reading(&station.wlcode).await? {
            Some(cursor) => (
                cursor.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                cursor
                    .water_level
                    .map(|l| format!("{l:.3}"))
                    .unwrap_or_else(|| "-".to_string()),
                interval.slots_between(cursor.timestamp, now).to_string(),
            ),
            None => ("never".to_string(), "-".to_string(), "-".to_string()),
        };
        println!(
            "{:<10} {:<16} {:<20} {:<18} {:>9} {:>8}",
            station.wlcode, scenario, station.district, last, level, behind
        );
    }

    println!("\nTotal stations: {}", registered.len());
    Ok(())
}
