/*!
# Arm Relay

TCP to serial command relay for a 6-axis robotic arm. An operator console
connects over TCP and sends single-axis commands (`0xAA axis angle`), macro
commands (`0xBB selector`), or the control tokens `TEST` and `quit`. Commands
are validated, translated into the controller's 3-byte frames, and written to
the serial link; a text acknowledgment goes back to the console.

## Features

- Single operator at a time: connections are served sequentially
- Canned macros (reset, shift left/right, grip close/open) paced for the arm
- Read-boundary or header-delimited stream framing
- Dry-run mode for running without a controller attached
- TOML configuration with command-line overrides

## Usage

### Serve with defaults (port 6657, /dev/ttyUSB0)
```bash
armrelay
```

### Override settings
```bash
armrelay serve --port 7000 --device /dev/ttyACM0 --framing stream
```

### No controller attached
```bash
armrelay serve --dry-run
```
*/

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, Level};

mod config;
mod error;
mod handler;
mod sequencer;
mod serial;
mod server;

use config::{AppConfig, Framing};
use error::RelayError;
use serial::{ControllerLink, DryRunLink, SerialLink};
use server::RelayServer;

#[derive(Parser)]
#[command(name = "armrelay")]
#[command(about = "TCP to serial command relay for a 6-axis robotic arm")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "armrelay.toml")]
    config: PathBuf,

    /// Enable debug logging (frame hex dumps)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Serve(ServeArgs),

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "armrelay.toml")]
        output: PathBuf,
    },
}

/// Overrides for values in the configuration file
#[derive(Args, Default)]
struct ServeArgs {
    /// TCP bind address
    #[arg(short, long)]
    bind_addr: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Serial device the controller is attached to
    #[arg(short, long)]
    device: Option<String>,

    /// Log frames instead of writing them to the serial device
    #[arg(long)]
    dry_run: bool,

    /// How client bytes are split into commands
    #[arg(long, value_enum)]
    framing: Option<Framing>,

    /// Send an error line to the client for rejected commands
    #[arg(long)]
    reply_on_error: bool,

    /// Close connections idle for this many seconds
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,
}

impl ServeArgs {
    fn apply(self, config: &mut AppConfig) {
        if let Some(bind_addr) = self.bind_addr {
            config.relay.bind_addr = bind_addr;
        }
        if let Some(port) = self.port {
            config.relay.port = port;
        }
        if let Some(device) = self.device {
            config.serial.device = device;
        }
        if let Some(framing) = self.framing {
            config.relay.framing = framing;
        }
        if let Some(secs) = self.idle_timeout {
            config.relay.idle_timeout_secs = Some(secs);
        }
        config.serial.dry_run |= self.dry_run;
        config.relay.reply_on_error |= self.reply_on_error;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Log to stderr; stdout is left to the config subcommand
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match cli.command {
        Some(Commands::Config { output }) => generate_config_file(output),
        Some(Commands::Serve(args)) => run_relay(cli.config, args),
        None => run_relay(cli.config, ServeArgs::default()),
    }
}

/// Load configuration, open the controller link, and serve until shutdown
fn run_relay(config_path: PathBuf, args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_or_default(&config_path)?;
    args.apply(&mut config);

    info!("🚀 {}", startup_banner());
    info!("📡 Listen address: {}:{}", config.relay.bind_addr, config.relay.port);
    info!("🔧 Framing: {:?}, error replies: {}", config.relay.framing, config.relay.reply_on_error);

    // The controller link comes up before the socket; without it there is
    // nothing to relay to.
    if config.serial.dry_run {
        let mut link = DryRunLink::new();
        serve(config, &mut link)
    } else {
        info!("🔌 Serial device: {}", config.serial.device);
        let mut link = SerialLink::open(&config.serial.device).inspect_err(log_startup_failure)?;
        link.configure().inspect_err(log_startup_failure)?;
        info!("✅ Controller link ready on {}", link.path());
        serve(config, &mut link)
    }
}

fn serve<L: ControllerLink>(config: AppConfig, link: &mut L) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let reason = runtime.block_on(async {
        let server = match RelayServer::bind(config.relay, Arc::new(AtomicBool::new(true))) {
            Ok(server) => server,
            Err(e) => {
                log_startup_failure(&e);
                link.close();
                return Err(e);
            }
        };

        // Set up Ctrl+C handler
        let running = server.get_running_flag();
        ctrlc::set_handler(move || {
            info!("🛑 Received Ctrl+C, shutting down gracefully...");
            running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| RelayError::config(format!("Failed to install Ctrl+C handler: {}", e)))?;

        Ok(server.run(link).await)
    })?;

    info!("✅ Relay stopped: {:?}", reason);
    Ok(())
}

fn startup_banner() -> String {
    format!(
        "Starting arm relay v{} (protocol v{})",
        env!("CARGO_PKG_VERSION"),
        shared::VERSION
    )
}

fn log_startup_failure(e: &RelayError) {
    if e.is_startup_fatal() {
        error!("❌ Startup failed: {}", e);
    }
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   armrelay --config {}", output_path.display());

    Ok(())
}
