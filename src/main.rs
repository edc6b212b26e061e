mod error;
mod feed;
mod parser;
mod sensor;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::info;

use feed::FeedClient;
use parser::DisplayFormat;
use sensor::{Sensor, Snapshot};
use settings::{Settings, Source, SourceConfig, DEFAULT_DISPLAY_FORMAT};

#[derive(Parser)]
#[command(
    name = "blutspende",
    about = "Next DRK blood donation appointment from spenderservice.net"
)]
struct Cli {
    /// Settings file (TOML); BLUTSPENDE_* environment variables override it
    #[arg(short, long, global = true, default_value = "blutspende.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every source once and print its snapshot
    Once {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Poll all configured sources on the configured interval until Ctrl-C
    Watch,
    /// Run the extraction pipeline on a saved RSS file
    Parse {
        file: PathBuf,
        /// strftime pattern for the `date` attribute
        #[arg(long, default_value = DEFAULT_DISPLAY_FORMAT)]
        format: String,
        /// Comma-separated postcodes to keep
        #[arg(long, default_value = "")]
        zip_filter: String,
        /// Print every matching appointment instead of the soonest
        #[arg(long)]
        all: bool,
    },
    /// Print the feed URL queried for each source
    Url {
        #[command(flatten)]
        source: SourceArgs,
    },
}

/// Ad-hoc source; replaces the configured ones when `--zipcode` is given.
#[derive(Args)]
struct SourceArgs {
    #[arg(long)]
    zipcode: Option<String>,
    /// Search radius in km
    #[arg(long)]
    radius: Option<u32>,
    #[arg(long)]
    county: Option<String>,
    /// Days ahead to request
    #[arg(long)]
    lookahead: Option<u32>,
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    zip_filter: Option<String>,
}

impl SourceArgs {
    fn into_config(self) -> Option<SourceConfig> {
        let defaults = SourceConfig::default();
        Some(SourceConfig {
            zipcode: self.zipcode?,
            radius: self.radius,
            county_id: self.county,
            lookahead_days: self.lookahead.or(defaults.lookahead_days),
            display_format: self.format.unwrap_or(defaults.display_format),
            zip_filter: self.zip_filter,
            name: None,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Once { source } => {
            let t0 = Instant::now();
            let settings = load_settings(&cli.config)?;
            let sources = resolve_sources(&settings, source)?;
            let client = Arc::new(FeedClient::new(settings.request_timeout())?);
            let mut sensors: Vec<Sensor> = sources
                .into_iter()
                .map(|s| Sensor::new(s, settings.poll_interval()))
                .collect();

            sensor::poll_all(&mut sensors, &client, Instant::now(), Local::now().date_naive()).await;
            for s in &sensors {
                print_snapshot(&s.snapshot())?;
            }
            info!("Done in {:.1?}", t0.elapsed());
            Ok(())
        }
        Commands::Watch => {
            let settings = load_settings(&cli.config)?;
            let sources = settings.sources()?;
            if sources.is_empty() {
                bail!(
                    "No sources configured. Add [[sources]] to {}",
                    cli.config.display()
                );
            }
            let client = Arc::new(FeedClient::new(settings.request_timeout())?);
            let interval = settings.poll_interval();
            let mut sensors: Vec<Sensor> = sources
                .into_iter()
                .map(|s| Sensor::new(s, interval))
                .collect();

            info!(
                sources = sensors.len(),
                interval_secs = interval.as_secs(),
                "Polling"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    tick = ticker.tick() => {
                        // the throttle measures against the schedule, not handling time
                        let refreshed = sensor::poll_all(
                            &mut sensors,
                            &client,
                            tick.into_std(),
                            Local::now().date_naive(),
                        )
                        .await;
                        info!(refreshed, "Poll cycle finished");
                        for s in &sensors {
                            print_snapshot(&s.snapshot())?;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping");
                        break;
                    }
                }
            }
            Ok(())
        }
        Commands::Parse {
            file,
            format,
            zip_filter,
            all,
        } => {
            let xml = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let format = DisplayFormat::new(&format)
                .ok_or_else(|| anyhow!("Invalid display format {:?}", format))?;
            let entries = feed::parse_feed(&xml)?;
            info!("Parsed {} entries from {}", entries.len(), file.display());

            if all {
                let records = parser::matching_records(&entries, &format, &zip_filter);
                for r in &records {
                    println!("{}", serde_json::to_string(&r.attributes())?);
                }
                println!("{} of {} entries matched.", records.len(), entries.len());
                return Ok(());
            }

            match parser::run(&entries, &format, &zip_filter) {
                Some(r) => println!("{}", serde_json::to_string(&r.attributes())?),
                None => println!("{}", sensor::UNKNOWN),
            }
            Ok(())
        }
        Commands::Url { source } => {
            let settings = load_settings(&cli.config)?;
            let today = Local::now().date_naive();
            for s in resolve_sources(&settings, source)? {
                let county = s
                    .county_id
                    .as_deref()
                    .and_then(settings::county_name)
                    .unwrap_or("-");
                let sensor = Sensor::new(s, settings.poll_interval());
                println!(
                    "{} ({}, county: {})",
                    sensor.entity_id(),
                    sensor.source().name,
                    county
                );
                println!("  {}", sensor.query_url(today));
            }
            Ok(())
        }
    }
}

fn load_settings(path: &std::path::Path) -> anyhow::Result<Settings> {
    Settings::load(path).with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn resolve_sources(settings: &Settings, args: SourceArgs) -> anyhow::Result<Vec<Source>> {
    if let Some(cfg) = args.into_config() {
        return Ok(vec![cfg.validate()?]);
    }
    let sources = settings.sources()?;
    if sources.is_empty() {
        bail!("No sources configured. Pass --zipcode or add [[sources]] to the settings file.");
    }
    Ok(sources)
}

fn print_snapshot(snapshot: &Snapshot) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(snapshot)?);
    Ok(())
}
