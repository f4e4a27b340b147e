//! Binary entrypoint for the msp-tool CLI.
//!
//! Commands:
//! - `monitor [--port <path>] [-b <baud>] [--debug-trace]` - connect and narrate; interactive line commands
//! - `reboot [--port <path>]` - reboot the board
//! - `flash --source <dir> [--target <name>]` - build firmware and flash it over DFU
//! - `init` - write a starter `msp-tool.toml`
//!
//! See the library crate docs for module-level details: `msp_tool::`.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Instant};

use msp_tool::config::Config;
use msp_tool::fc::{FcOptions, FlashOptions, FlightController, PidReceiver};
use msp_tool::metrics;
use msp_tool::msp::PidSet;
use msp_tool::rx::RxKey;
use msp_tool::transport::Connector;

/// How long `flash` waits for the board to report its target name.
const TARGET_DETECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "msp-tool")]
#[command(about = "MSP client for Betaflight, Cleanflight and INAV flight controllers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "msp-tool.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Clone)]
struct PortArgs {
    /// Serial port of the board (e.g., /dev/ttyACM0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short = 'b', long)]
    baud: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, print what the board reports and accept interactive commands
    Monitor {
        #[command(flatten)]
        port: PortArgs,

        /// Enable FEATURE_DEBUG_TRACE on INAV 1.9+ boards
        #[arg(long)]
        debug_trace: bool,
    },
    /// Reboot the board
    Reboot {
        #[command(flatten)]
        port: PortArgs,
    },
    /// Build firmware for the board's target and flash it via DFU
    Flash {
        #[command(flatten)]
        port: PortArgs,

        /// Firmware source tree (defaults to [flash] source_dir)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Target to build; detected from the board when omitted
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the file, so it must not depend on an existing one
    let mut config = match cli.command {
        Commands::Init => Config::default(),
        _ => Config::load_or_default(&cli.config).await?,
    };
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            return Ok(());
        }
        Commands::Monitor { port, debug_trace } => {
            apply_port_args(&mut config, &port)?;
            config.session.enable_debug_trace |= debug_trace;
            monitor(config).await?;
        }
        Commands::Reboot { port } => {
            apply_port_args(&mut config, &port)?;
            let (fc, mut notices) = connect(&config)?;
            fc.reboot().await?;
            fc.shutdown();
            while let Ok(line) = notices.try_recv() {
                println!("{}", line);
            }
            println!("Reboot requested on {}", config.serial.port);
        }
        Commands::Flash {
            port,
            source,
            target,
        } => {
            apply_port_args(&mut config, &port)?;
            let source = source.unwrap_or_else(|| PathBuf::from(&config.flash.source_dir));
            flash(config, source, target).await?;
        }
    }

    info!("Link stats: {}", metrics::snapshot());
    Ok(())
}

fn apply_port_args(config: &mut Config, args: &PortArgs) -> Result<()> {
    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if config.serial.port.is_empty() {
        bail!("No serial port given; use --port or set [serial] port in the config file");
    }
    Ok(())
}

#[cfg(feature = "serial")]
fn connector(config: &Config) -> Result<Arc<dyn Connector>> {
    use msp_tool::transport::SerialConnector;
    Ok(Arc::new(SerialConnector::new(config.serial.read_timeout())))
}

#[cfg(not(feature = "serial"))]
fn connector(_config: &Config) -> Result<Arc<dyn Connector>> {
    bail!("msp-tool was built without the 'serial' feature")
}

fn connect(
    config: &Config,
) -> Result<(Arc<FlightController>, tokio::sync::mpsc::UnboundedReceiver<String>)> {
    let opts = FcOptions::from_config(config);
    let (fc, notices) = FlightController::connect(opts, connector(config)?)
        .map_err(|e| anyhow!("Failed to open {}: {}", config.serial.port, e))?;
    info!(
        "Connected to {} @ {}bps",
        config.serial.port, config.serial.baud_rate
    );
    Ok((fc, notices))
}

struct PidPrinter;

impl PidReceiver for PidPrinter {
    fn received_pid(&self, pids: &PidSet) -> Result<()> {
        for (axis, pid) in pids.iter() {
            println!("{:>5} ({}): {:?}", axis.name(), pid.flight_surface, pid.values);
        }
        Ok(())
    }
}

const HELP: &str = "\
Commands:
  h  show this help
  r  reboot the board
  p  fetch PIDs
  x  toggle RC simulation
  q  quit
While simulating: w/s throttle, a/d yaw, i/k pitch, j/l roll, 1-8 toggle AUX1-8";

async fn monitor(config: Config) -> Result<()> {
    let (fc, mut notices) = connect(&config)?;
    fc.set_pid_receiver(Arc::new(PidPrinter));

    tokio::spawn(async move {
        while let Some(line) = notices.recv().await {
            println!("{}", line);
        }
    });

    let mut runner = {
        let fc = Arc::clone(&fc);
        tokio::spawn(async move { fc.run().await })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);
    loop {
        tokio::select! {
            finished = &mut runner => {
                return match finished {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        error!("{}", e);
                        error!("Link stats: {}", metrics::snapshot());
                        std::process::exit(1);
                    }
                    Err(e) => Err(anyhow!("read loop panicked: {}", e)),
                };
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(&fc, line.trim()).await {
                    break;
                }
            }
        }
    }

    fc.shutdown();
    if let Err(e) = runner.await? {
        warn!("Read loop ended with {}", e);
    }
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(fc: &Arc<FlightController>, line: &str) -> bool {
    match line {
        "" => {}
        "h" | "?" => println!("{}", HELP),
        "q" => return false,
        "r" => {
            if let Err(e) = fc.reboot().await {
                warn!("Reboot failed: {}", e);
            }
        }
        "p" => {
            if let Err(e) = fc.get_pids() {
                warn!("PID request failed: {}", e);
            }
        }
        "x" => {
            if fc.toggle_rx_simulation() {
                println!("RC simulation enabled");
            } else {
                println!("RC simulation disabled");
            }
        }
        keys if fc.is_simulating_rx() => {
            for key in keys.chars().filter_map(RxKey::from_char) {
                fc.press_key(key);
            }
        }
        other => println!("Unknown command {:?}, h for help", other),
    }
    true
}

async fn flash(config: Config, source: PathBuf, target: Option<String>) -> Result<()> {
    let (fc, mut notices) = connect(&config)?;
    tokio::spawn(async move {
        while let Some(line) = notices.recv().await {
            println!("{}", line);
        }
    });
    let runner = {
        let fc = Arc::clone(&fc);
        tokio::spawn(async move { fc.run().await })
    };

    if target.is_none() {
        let deadline = Instant::now() + TARGET_DETECT_TIMEOUT;
        while !fc.has_detected_target_name() && Instant::now() < deadline {
            sleep(Duration::from_millis(50)).await;
        }
    }

    let opts = FlashOptions::from_config(&config.flash);
    let result = fc.flash(&source, target.as_deref(), &opts).await;
    fc.shutdown();
    runner.abort();
    result?;
    println!("Flashing finished");
    Ok(())
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity raises the configured level
    let base_level = match verbosity {
        0 => config.logging.level_filter(),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(file) = config.logging.file.as_ref().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    }) {
        let file = std::sync::Mutex::new(file);
        // Only echo to the console when someone is watching
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
