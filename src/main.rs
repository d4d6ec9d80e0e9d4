//! Binary entrypoint for the gridmud CLI.
//!
//! Commands:
//! - `start [--port <n>]` - load the world and serve telnet-style clients until Ctrl-C
//! - `init` - write a starter `config.toml` and create the data dir with its first room
//! - `status` - print room and player counts
//!
//! See the library crate docs for module-level details: `gridmud::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use gridmud::config::Config;
use gridmud::mud::MudServer;

#[derive(Parser)]
#[command(name = "gridmud")]
#[command(about = "A multi-session MUD server with a persistent room grid")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MUD server
    Start {
        /// TCP port to listen on, overriding the config file
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Write a default configuration and bootstrap the world
    Init,
    /// Show world statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config, so there is nothing to load yet
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            info!("Starting gridmud v{}", env!("CARGO_PKG_VERSION"));
            let mut server = MudServer::new(config).await?;
            server.run().await?;
        }
        Commands::Init => {
            info!("Initializing new gridmud configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let config = Config::load(&cli.config).await?;
            let server = MudServer::new(config).await?;
            info!("World initialized with {} rooms", server.world().rooms().len());
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let server = MudServer::new(config).await?;
            server.show_status().await?;
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.as_ref().and_then(|c| {
        let path = c.logging.file.as_ref()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    let Some(file) = file else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
        let _ = builder.try_init();
        return;
    };

    let security_path = config
        .as_ref()
        .and_then(|c| c.logging.security_file.clone());
    let write_mutex = std::sync::Mutex::new(file);
    // Mirror to the console only when someone is watching it
    let is_tty = atty::is(atty::Stream::Stdout);

    builder.format(move |fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let line = format!("{} [{}] {}", ts, record.level(), record.args());

        if let Ok(mut guard) = write_mutex.lock() {
            let _ = writeln!(guard, "{}", line);
        }

        if record.target() == "security" {
            if let Some(ref sec_path) = security_path {
                if let Ok(mut sf) = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(sec_path)
                {
                    let _ = writeln!(sf, "{}", line);
                }
            }
        }

        if is_tty {
            writeln!(fmt, "{}", line)
        } else {
            Ok(())
        }
    });
    let _ = builder.try_init();
}
