use clap::{Arg, Command};
use common::logging::{LogFormat, init_tracing};
use std::process;


#[tokio::main]
async fn main() {
    let matches = Command::new("Sample Data Fetcher")
        .version("1.0")
        .about("Downloads the streaming stock analysis sample files")
        .subcommand(
            Command::new("download")
                .about("Download the price and fundamentals Parquet samples")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Sets a custom config file"),
                ),
        )
        .get_matches();

    init_tracing(LogFormat::Text);

    match matches.subcommand() {
        Some(("download", download_matches)) => {
            let config_path = download_matches.get_one::<String>("config")
                .map(|s| s.as_str())
                .unwrap_or("config/stock_streaming.toml");
            println!("Downloading samples with config: {}", config_path);

            if let Err(e) = etl::run_download(config_path).await {
                eprintln!("Download error: {}", e);
                process::exit(1);
            }
        },

        _ => {
            eprintln!("Please specify a valid subcommand");
            process::exit(1);
        }
    }
}
