use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;

use fizhub::config::HubConfig;
use fizhub::hub::Hub;
use fizhub::indicator::LogIndicator;
use fizhub::recorder::TimedRecorder;
use fizhub::transport::run_line_bridge;
use fizhub::validation::ValidationClient;

#[derive(Parser, Debug)]
#[command(name = "fizhub", about = "NFC bonding hub")]
struct Args {
    /// Path to the JSON config file
    #[arg(long, default_value = "configs/config.json")]
    config: PathBuf,

    /// Override the validation service base URL
    #[arg(long)]
    validation_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let args = Args::parse();
    let mut config = HubConfig::load(&args.config)?;
    config.apply_env();
    if let Some(url) = args.validation_url {
        config.validation.base_url = url;
    }
    log::info!("Validation service: {}", config.validation.base_url);

    let validator = ValidationClient::new(&config.validation);
    let recorder = Arc::new(TimedRecorder::new(config.recorder.max_duration));
    let indicator = Arc::new(LogIndicator::default());
    let hub = Hub::new(config, validator, recorder, indicator)?;
    hub.start()?;

    // Reader messages arrive as `<topic> <json>` lines on stdin.
    let bridge = tokio::spawn(run_line_bridge(
        BufReader::new(tokio::io::stdin()),
        hub.registry().clone(),
        hub.tasks().shutdown_signal(),
    ));

    log::info!("Hub running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    let report = hub.shutdown().await;
    log::info!(
        "Stopped {} loop(s); {} call(s) finished, {} aborted",
        report.periodic_stopped,
        report.outstanding_completed,
        report.outstanding_aborted
    );
    bridge.abort();
    Ok(())
}
