use clap::{Arg, ArgMatches, Command, value_parser};
use common::Result;
use common::config::Settings;
use common::logging::{LogFormat, init_tracing};
use lakehouse::replay::{CancelToken, ReplayConfig, cancellation};
use lakehouse::services::SetupService;
use std::process;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "config/stock_streaming.toml";

fn cli() -> Command {
    Command::new("Streaming Stock Setup")
        .version("1.0")
        .about("Prepares the streaming stock analysis tables and replays price history into them")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Sets a custom config file"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .global(true)
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Log output format"),
        )
        .subcommand(Command::new("download").about("Download the price and fundamentals samples"))
        .subcommand(
            Command::new("bootstrap")
                .about("Recreate the price, fundamentals and price/fundamentals tables"),
        )
        .subcommand(
            Command::new("replay")
                .about("Replay the price history into the streaming table")
                .arg(
                    Arg::new("batch-size")
                        .long("batch-size")
                        .value_name("N")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(i64))
                        .help("Distinct dates appended per batch"),
                )
                .arg(
                    Arg::new("pause-secs")
                        .long("pause-secs")
                        .value_name("SECONDS")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(f64))
                        .help("Pause after each batch"),
                ),
        )
        .subcommand(Command::new("count").about("Count the rows in the streaming table"))
        .subcommand(Command::new("run").about("Download, bootstrap and replay in one go"))
}

/// Cancels the returned token on the first Ctrl-C.
fn cancel_on_interrupt() -> CancelToken {
    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping before the next batch");
            handle.cancel();
        }
    });
    token
}

async fn execute(matches: &ArgMatches, settings: Settings) -> Result<()> {
    match matches.subcommand() {
        Some(("download", _)) => {
            SetupService::new(settings).download_sources().await?;
        }
        Some(("bootstrap", _)) => {
            let service = SetupService::new(settings);
            service.bootstrap_tables().await?;
            service.register_price_table().await?;
        }
        Some(("replay", replay_matches)) => {
            let batch_size = replay_matches
                .get_one::<i64>("batch-size")
                .copied()
                .unwrap_or(settings.replay.batch_size);
            let pause_secs = replay_matches
                .get_one::<f64>("pause-secs")
                .copied()
                .unwrap_or(settings.replay.pause_secs);
            let config = ReplayConfig::new(batch_size, pause_secs)?;

            let report = SetupService::new(settings)
                .replay_prices(config, cancel_on_interrupt())
                .await?;
            println!(
                "Replayed {} batches ({} rows) out of {} distinct dates{}",
                report.batches.len(),
                report.total_rows(),
                report.distinct_keys,
                if report.cancelled { ", cancelled" } else { "" }
            );
        }
        Some(("count", _)) => {
            let count = SetupService::new(settings).count_price_rows().await?;
            println!("{}", count);
        }
        Some(("run", _)) => {
            lakehouse::run_setup_pipeline(settings, cancel_on_interrupt()).await?;
        }
        _ => return Err(common::Error::InvalidInput("Unknown subcommand".to_string())),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let format = matches
        .get_one::<String>("log-format")
        .and_then(|f| LogFormat::parse(f))
        .unwrap_or(LogFormat::Text);
    init_tracing(format);

    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG);
    info!(config = config_path, "Loading configuration");

    let settings = match Settings::new(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Failed to load configuration from {}", config_path);
            process::exit(1);
        }
    };

    if let Err(e) = execute(&matches, settings).await {
        error!(error = %e, "Setup failed");
        process::exit(1);
    }
}
