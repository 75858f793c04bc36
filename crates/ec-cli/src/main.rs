//! EC actuator client entry point.
//!
//! Connects to a controller (simulated, or a gateway over Modbus RTU) and
//! runs either the interactive console or the demo sequence. `--probe`
//! runs the connection diagnostics instead.

mod demo;
mod diagnostics;
mod repl;
mod signals;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ec_common::config::{ControllerConfig, TransportKind};
use ec_common::error::EcResult;
use ec_motion::{simulated_controller, Actuator, AxisId, AxisIo, Gateway, GatewayAxis, TagAxis, TagMap};
use ec_transport::{ModbusRtuTransport, SharedTransport};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::demo::DemoPlan;
use crate::diagnostics::{format_report, Verdict, PROBE_PORTS};
use crate::repl::{Console, GatewayConsole, PositionConsole};
use crate::signals::SignalHandler;

/// EC actuator client command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ec-actuator",
    about = "IAI EC actuator client - interactive console and demo sequence",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the simulated controller regardless of the configured driver.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Run the demo sequence instead of the console.
    #[arg(long)]
    demo: bool,

    /// Probe the controller's network ports and exit.
    #[arg(long)]
    probe: bool,

    /// Print the probe report as JSON.
    #[arg(long, requires = "probe")]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Gateway unit of the axis to drive (Modbus RTU).
    #[arg(long, default_value = "0")]
    unit: u8,

    /// Gateway axis to drive (Modbus RTU).
    #[arg(long, default_value = "0")]
    axis: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting EC actuator client");

    let mut config = load_config(&args)?;
    if args.simulated {
        config.connection.driver = TransportKind::Simulated;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        driver = ?config.connection.driver,
        model = %config.controller.model,
        "Configuration loaded"
    );

    if args.probe {
        return run_probe(&config, args.json);
    }

    match config.connection.driver {
        TransportKind::Simulated => {
            let (sim, _handle) = simulated_controller(&config);
            let axis = TagAxis::new(SharedTransport::new(sim), TagMap::new(&config.tags));
            let actuator = Arc::new(Actuator::new(axis, &config));
            let console = PositionConsole::new(Arc::clone(&actuator));
            run_session(&actuator, &console, args.demo, || {
                demo::run_position_demo(actuator.as_ref(), &DemoPlan::default())
            })
        }
        TransportKind::ModbusRtu => {
            let actuator = Arc::new(Actuator::new(open_gateway_axis(&args, &config)?, &config));
            let console = GatewayConsole::new(Arc::clone(&actuator));
            run_session(&actuator, &console, args.demo, || {
                demo::run_end_demo(actuator.as_ref(), &DemoPlan::default())
            })
        }
        TransportKind::Cip => bail!(
            "no EtherNet/IP driver is linked into this build; \
             run with --simulated, or --probe to check the controller"
        ),
    }
}

/// Initialize logging with the specified log level. Logs go to stderr so
/// console output stays readable.
fn init_logging(level: &str) {
    let filter = format!(
        "ec_cli={level},ec_motion={level},ec_transport={level},ec_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `EC_CONFIG_PATH` environment variable
/// 3. `/etc/ec-actuator/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<ControllerConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ControllerConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("EC_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from EC_CONFIG_PATH");
            return ControllerConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from EC_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "EC_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/ec-actuator/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return ControllerConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(ControllerConfig::default())
}

/// Build the gateway axis selected by `--unit`/`--axis` on the serial line.
fn open_gateway_axis(args: &Args, config: &ControllerConfig) -> Result<GatewayAxis> {
    let connection = &config.connection;
    let transport = ModbusRtuTransport::serial(
        connection.serial_port.to_string_lossy(),
        connection.baud_rate,
        connection.slave_id,
        connection.response_timeout,
    );

    let gateway = Gateway::new(SharedTransport::new(transport), config.gateway.clone());
    let id = AxisId::new(args.unit, args.axis, &config.gateway)
        .context("Invalid --unit/--axis for the configured gateway")?;
    Ok(GatewayAxis::new(Arc::new(gateway), id))
}

/// Connect, run the demo or the console, then stop and disconnect.
///
/// SIGINT stops the axis; SIGTERM and SIGHUP stop it and exit.
fn run_session<IO: AxisIo + 'static>(
    actuator: &Arc<Actuator<IO>>,
    console: &dyn Console,
    demo: bool,
    run_demo: impl FnOnce() -> EcResult<()>,
) -> Result<()> {
    let stopper = Arc::clone(actuator);
    let signals = SignalHandler::install(move |kind| {
        stopper.stop();
        if kind.is_terminal() {
            stopper.disconnect();
            std::process::exit(kind.exit_code());
        }
    })
    .context("Failed to set up signal handlers")?;

    actuator
        .connect()
        .context("Failed to connect to the controller")?;

    let outcome = if demo {
        run_demo().context("Demo sequence failed")
    } else {
        let stdin = io::stdin();
        repl::run_repl(console, stdin.lock(), io::stdout()).context("Console I/O failed")
    };

    actuator.stop();
    actuator.disconnect();
    info!(
        interrupts = signals.state().interrupt_count(),
        "Session closed"
    );
    outcome
}

/// Probe the configured address and print the report.
fn run_probe(config: &ControllerConfig, json: bool) -> Result<()> {
    let report = diagnostics::probe(
        &config.connection.address,
        &PROBE_PORTS,
        config.connection.timeout,
    );
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to encode report")?
        );
    } else {
        println!("{}", format_report(&report));
    }
    if report.verdict == Verdict::Unreachable {
        bail!("controller {} is unreachable", config.connection.address);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["ec-actuator", "--simulated"]);
        assert!(args.simulated);
        assert!(!args.demo);
        assert!(args.config.is_none());
        assert_eq!((args.unit, args.axis), (0, 0));
    }

    #[test]
    fn test_args_with_config() {
        let args = Args::parse_from([
            "ec-actuator",
            "-c",
            "test.toml",
            "--demo",
            "--unit",
            "1",
            "--axis",
            "3",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("test.toml")));
        assert!(args.demo);
        assert_eq!((args.unit, args.axis), (1, 3));
    }

    #[test]
    fn test_json_requires_probe() {
        assert!(Args::try_parse_from(["ec-actuator", "--json"]).is_err());
        assert!(Args::try_parse_from(["ec-actuator", "--probe", "--json"]).is_ok());
    }

    #[test]
    fn test_load_config_from_argument() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\ndriver = \"simulated\"\n[motion]\njog_speed = 45.0").unwrap();

        let args = Args::parse_from(["ec-actuator", "-c", file.path().to_str().unwrap()]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.connection.driver, TransportKind::Simulated);
        assert!((config.motion.jog_speed - 45.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_config_missing_file_is_error() {
        let args = Args::parse_from(["ec-actuator", "-c", "/nonexistent/ec.toml"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_gateway_axis_out_of_range() {
        let config = ControllerConfig::default();
        let args = Args::parse_from(["ec-actuator", "--unit", "200"]);
        assert!(open_gateway_axis(&args, &config).is_err());
    }
}
