use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use tracing::{info, instrument, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dwlr_simulator::backup::CsvBackup;
use dwlr_simulator::config::{Config, StoreKind};
use dwlr_simulator::db::{self, ReadingRepository, StationRepository};
use dwlr_simulator::registry::StaticRegistry;
use dwlr_simulator::report::{render_run, ProgressSink};
use dwlr_simulator::scheduler;
use dwlr_simulator::services::{AbortFlag, BackfillService, BackfillSettings};
use dwlr_simulator::source::{CursorSource, ReadingSink, StationSource};
use dwlr_simulator::supabase::SupabaseClient;
use dwlr_simulator::trend::{Scenario, TrendGenerator};

#[derive(Parser, Debug)]
#[command(name = "dwlr-simulator")]
#[command(about = "Backfill simulated DWLR groundwater readings up to the current interval", long_about = None)]
struct Args {
    /// Simulate only this station code (uses default metadata if it is not registered)
    #[arg(long)]
    station: Option<String>,

    /// Force one scenario for every station: normal, drought, over_extraction or recharge
    #[arg(long)]
    scenario: Option<String>,

    /// Seed for reproducible levels (overrides SIM_SEED)
    #[arg(long)]
    seed: Option<u64>,

    /// Append every generated reading to this CSV file (overrides SIM_BACKUP_FILE)
    #[arg(long)]
    backup_file: Option<PathBuf>,

    /// Read the station registry from a JSON file instead of the store
    #[arg(long, conflicts_with = "builtin_registry")]
    stations_file: Option<PathBuf>,

    /// Simulate the built-in demonstration station instead of the store's registry
    #[arg(long)]
    builtin_registry: bool,

    /// Keep running, backfilling again every interval until interrupted
    #[arg(long)]
    watch: bool,

    /// Do not draw the progress spinner
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dwlr_simulator=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.backup_file.is_some() {
        config.backup_file = args.backup_file.clone();
    }
    info!("Starting DWLR simulator with config: {:?}", config);

    let registry = if let Some(path) = &args.stations_file {
        Some(StaticRegistry::from_json_file(path)?)
    } else if args.builtin_registry {
        Some(StaticRegistry::builtin())
    } else {
        None
    };

    let abort = AbortFlag::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current reading");
                abort.abort();
            }
        });
    }

    match config.store {
        StoreKind::Postgres => {
            let pool = db::connect(config.database_url()?, config.max_connections).await?;
            if config.run_migrations {
                db::run_migrations(&pool).await?;
            }
            let readings = ReadingRepository::new(pool.clone(), &config.tables.readings);
            match registry {
                Some(registry) => {
                    drive(registry, readings.clone(), readings, &config, &args, abort).await
                }
                None => {
                    let stations = StationRepository::new(pool, &config.tables);
                    drive(stations, readings.clone(), readings, &config, &args, abort).await
                }
            }
        }
        StoreKind::Supabase => {
            let client = SupabaseClient::new(config.supabase_credentials()?, &config.tables)?;
            match registry {
                Some(registry) => {
                    drive(registry, client.clone(), client, &config, &args, abort).await
                }
                None => drive(client.clone(), client.clone(), client, &config, &args, abort).await,
            }
        }
    }
}

#[instrument(skip_all)]
async fn drive<St, Cu, Si>(
    stations: St,
    cursors: Cu,
    sink: Si,
    config: &Config,
    args: &Args,
    abort: AbortFlag,
) -> Result<(), Box<dyn std::error::Error>>
where
    St: StationSource,
    Cu: CursorSource,
    Si: ReadingSink,
{
    // The spinner would interleave with the per-run reports in watch mode
    let sink = if args.no_progress || args.watch {
        ProgressSink::hidden(sink)
    } else {
        ProgressSink::new(sink)
    };

    let mut settings = BackfillSettings::from_config(config);
    settings.forced_scenario = args.scenario.as_deref().map(Scenario::from_tag);
    settings.only_station = args.station.clone();

    let trend = TrendGenerator::from_seed_option(config.seed);
    let mut service =
        BackfillService::new(stations, cursors, sink, trend, settings).with_abort_flag(abort.clone());
    if let Some(path) = &config.backup_file {
        info!("Backing up readings to {}", path.display());
        service = service.with_backup(CsvBackup::new(path));
    }

    if args.watch {
        let interval = config.interval.duration().to_std()?;
        scheduler::start_backfill_scheduler(service, interval, abort, |summary| {
            print!("{}", render_run(summary));
        })
        .await;
        return Ok(());
    }

    let summary = service.run(Utc::now()).await?;
    service.sink().finish();
    print!("{}", render_run(&summary));
    Ok(())
}
