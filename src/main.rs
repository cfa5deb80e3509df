use clap::Parser;
use kafka_bridge::{Bridge, BridgeConfig, Result, ShutdownFlag};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-bridge")]
#[command(about = "Kafka to REST to Kafka bridge", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", help = "Optional config file, overlaid by the environment")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path),
        None => BridgeConfig::from_env(),
    };
    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    init_logging(&config, args.json_logs, args.verbose)?;

    info!("Starting kafka-bridge");
    info!(
        input_topic = %config.input_topic,
        input_format = ?config.input_format,
        output_topic = %config.output_topic,
        output_format = ?config.output_format,
        api_url = %config.api_base(),
        api_endpoint = %config.api_endpoint,
        batch_size = config.batch_size,
        "Configuration summary"
    );

    let shutdown = ShutdownFlag::new();
    let mut bridge = match Bridge::new(config, shutdown.clone()) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("Failed to build bridge: {}", e);
            return Err(e);
        }
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                shutdown.request_stop();
            }
        }
    });

    bridge.run().await
}

fn init_logging(config: &BridgeConfig, json: bool, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        EnvFilter::new("kafka_bridge=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("kafka_bridge={},warn", config.log_level)))
    };

    let json = json || config.log_format == "json";
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    Ok(())
}
