use std::{io, net::SocketAddr, num::NonZeroU32, path::PathBuf};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use log_genie::{
    config::{self, Config, Overrides},
    event::Synthesizer,
    logger::Logger,
};
use log_genie_throttle::Throttle;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{runtime::Builder, signal};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),
    #[error("Throttle error: {0}")]
    Throttle(#[from] log_genie_throttle::Error),
    #[error("Failed to install Prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    args: GenieArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
}

#[derive(Args)]
struct GenieArgs {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// number of logs per second
    #[clap(long, env = "LOG_GENIE_RATE")]
    rate: Option<u32>,
    /// log verbosity level: debug, info, warn, error
    #[clap(long, env = "LOG_GENIE_VERBOSITY")]
    verbosity: Option<String>,
    /// enable OpenTelemetry logs export
    #[clap(long, env = "LOG_GENIE_TELEMETRY", num_args = 0..=1, require_equals = true,
           default_missing_value = "true", value_parser = BoolishValueParser::new())]
    telemetry: Option<bool>,
    /// OpenTelemetry collector endpoint
    #[clap(long, env = "LOG_GENIE_TELEMETRY_ENDPOINT")]
    telemetry_endpoint: Option<String>,
    /// write local logs to stdout even when telemetry is enabled
    #[clap(long, env = "LOG_GENIE_LOCAL_LOGS", num_args = 0..=1, require_equals = true,
           default_missing_value = "true", value_parser = BoolishValueParser::new())]
    local_logs: Option<bool>,
    /// show responses from the OpenTelemetry collector
    #[clap(long, env = "LOG_GENIE_SHOW_RESPONSES", num_args = 0..=1, require_equals = true,
           default_missing_value = "true", value_parser = BoolishValueParser::new())]
    show_responses: Option<bool>,
    /// address for the internal Prometheus scrape endpoint
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
    /// seed for the event synthesizer
    #[clap(long)]
    seed: Option<u64>,
}

impl GenieArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            rate: self.rate,
            verbosity: self.verbosity.clone(),
            telemetry: self.telemetry,
            telemetry_endpoint: self.telemetry_endpoint.clone(),
            local_logs: self.local_logs,
            show_responses: self.show_responses,
            prometheus_addr: self.prometheus_addr,
            seed: self.seed,
        }
    }
}

fn get_config(args: &GenieArgs) -> Result<Config, Error> {
    let mut config = config::load(args.config_path.as_deref())?;
    config.apply(args.overrides());
    config.validate()?;
    Ok(config)
}

fn validate_config(cmd: &ConfigCheckCommand) -> Result<Config, Error> {
    let config = config::load(cmd.config_path.as_deref())?;
    config.validate()?;
    info!("Configuration is valid");
    Ok(config)
}

fn startup_message(config: &Config, local_enabled: bool) -> String {
    let telemetry = if config.telemetry.enabled {
        format!("enabled, endpoint: {}", config.telemetry.endpoint)
    } else {
        "disabled".to_string()
    };
    let enabled = |on: bool| if on { "enabled" } else { "disabled" };
    format!(
        "Starting log generation at {rate} logs per second with {verbosity} verbosity. \
         OpenTelemetry: {telemetry}. Local logs: {local}. Show responses: {show}",
        rate = config.rate,
        verbosity = config.verbosity,
        local = enabled(local_enabled),
        show = enabled(config.telemetry.show_responses),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("unable to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("unable to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(addr) = config.prometheus_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        debug!("serving internal metrics on {addr}");
    }

    let rate = NonZeroU32::new(config.rate).ok_or(config::Error::ZeroRate)?;
    let mut throttle = Throttle::new_with_config(config.throttle, rate);
    let mut synthesizer = Synthesizer::new(config.seed);

    let mut logger = Logger::new(&config, io::stdout());
    logger.announce(&startup_message(&config, logger.local_enabled()));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let res = loop {
        tokio::select! {
            res = throttle.wait() => {
                if let Err(err) = res {
                    error!("throttle failed: {err}");
                    break Err(Error::Throttle(err));
                }
                logger.emit(synthesizer.next_event());
            }
            () = &mut shutdown => break Ok(()),
        }
    };

    info!("Shutting down log generator");
    logger.shutdown().await;
    res
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let cli = Cli::parse();
    if let Some(Commands::ConfigCheck(cmd)) = cli.command {
        match validate_config(&cmd) {
            Ok(_) => std::process::exit(0),
            Err(err) => {
                error!("Configuration validation failed: {err}");
                std::process::exit(1)
            }
        }
    }

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting log-genie {version}.");
    let config = get_config(&cli.args)?;

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    let res = runtime.block_on(inner_main(config));
    info!("Bye. :)");
    res
}
