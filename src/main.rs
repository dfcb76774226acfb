use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use joystick_bridge::bus::{session, ProducerSession, Publisher};
use joystick_bridge::config::BridgeConfig;
use joystick_bridge::controller::JoystickDevice;
use joystick_bridge::pipeline::Pipeline;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "joystick-bridge")]
#[command(about = "Publish joystick button and axis events to a broker topic")]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension)
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    setup()?;

    let config = BridgeConfig::load(&args.config)
        .wrap_err_with(|| format!("Failed to load configuration {}", args.config.display()))?;
    info!("Loading configuration\n{}", config.render());

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let client_id = match &config.client_id {
        Some(id) => id.clone(),
        None => session::local_hostname()?,
    };
    let options = config.session_options(client_id);
    options.validate().wrap_err("Broker client configuration rejected")?;

    let device = JoystickDevice::open(&config.device)
        .wrap_err_with(|| format!("Failed to open joystick {}", config.device.display()))?;

    let mut producer = ProducerSession::configure(options).wrap_err("Broker client configuration rejected")?;
    let topic = producer
        .open_topic(&config.topic)
        .wrap_err("Broker client configuration rejected")?;

    let pipeline = Pipeline::new(device, producer, topic, config.pipeline_settings());
    let report = pipeline.run(shutdown).await;

    if report.flush.timed_out {
        warn!(
            "{} messages were still unacknowledged at shutdown",
            report.flush.undelivered()
        );
    }
    info!("Shutdown complete");
    Ok(())
}

// Missing or extra arguments exit with status 1, help and version with 0
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            eprintln!("Usage: joystick-bridge config.toml");
            process::exit(1);
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

// Only requests cancellation; cleanup happens on the pipeline's task
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Caught interrupt signal, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Unable to listen for interrupt signal: {}", e),
        }
    });
}
