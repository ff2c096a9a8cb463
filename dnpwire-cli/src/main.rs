//! dnpwire-cli - Master command-line tool for dnpwire outstations
//!
//! Polls and controls an outstation, and encodes or decodes wire bytes offline.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use dnpwire_link::{ConnectionConfig, Master};
use dnpwire_protocol::CrobCode;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dnpwire-cli")]
#[command(about = "Master command-line tool for dnpwire outstations")]
#[command(version)]
struct Cli {
    /// Outstation address
    #[arg(short, long, env = "DNPWIRE_SERVER", default_value = "127.0.0.1:20000")]
    server: SocketAddr,

    /// Outstation link address
    #[arg(short, long, default_value_t = 10)]
    dest: u16,

    /// Master link address
    #[arg(long, default_value_t = 1)]
    source: u16,

    /// Response timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read points of one object
    Read {
        /// Object group
        #[arg(short, long)]
        group: u8,

        /// Object variation (0 = outstation default)
        #[arg(short, long, default_value_t = 0)]
        variation: u8,

        /// First point (requires --stop)
        #[arg(long)]
        start: Option<u16>,

        /// Last point (requires --start)
        #[arg(long)]
        stop: Option<u16>,
    },

    /// Poll data classes (0 = static data)
    Class {
        #[arg(default_values_t = vec![0u8])]
        classes: Vec<u8>,
    },

    /// Operate a binary output
    Operate {
        /// Output index
        index: u16,

        /// Control code
        #[arg(value_enum)]
        code: ControlArg,

        /// Skip the select step
        #[arg(long)]
        direct: bool,

        /// Pulse on time in milliseconds
        #[arg(long, default_value_t = 0)]
        on_ms: u32,

        /// Pulse off time in milliseconds
        #[arg(long, default_value_t = 0)]
        off_ms: u32,
    },

    /// Restart the outstation
    Restart {
        /// Warm restart instead of cold
        #[arg(long)]
        warm: bool,
    },

    /// Set the outstation clock to this host's time
    WriteTime,

    /// Clear the outstation's restart indication
    ClearRestart,

    /// Read a device attribute string
    Attribute {
        /// Attribute variation (250 = product, 252 = vendor)
        #[arg(default_value_t = 250)]
        variation: u8,
    },

    /// Print the wire bytes of a read request without sending it
    EncodeRead {
        #[arg(short, long)]
        group: u8,

        #[arg(short, long, default_value_t = 0)]
        variation: u8,

        #[arg(long)]
        start: Option<u16>,

        #[arg(long)]
        stop: Option<u16>,
    },

    /// Decode captured wire bytes
    Decode {
        /// Hex string, whitespace allowed
        hex: String,
    },
}

/// Relay output control codes accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ControlArg {
    LatchOn,
    LatchOff,
    PulseOn,
    PulseOff,
    Close,
    Trip,
}

impl From<ControlArg> for CrobCode {
    fn from(arg: ControlArg) -> Self {
        match arg {
            ControlArg::LatchOn => CrobCode::LatchOn,
            ControlArg::LatchOff => CrobCode::LatchOff,
            ControlArg::PulseOn => CrobCode::PulseOn,
            ControlArg::PulseOff => CrobCode::PulseOff,
            ControlArg::Close => CrobCode::Close,
            ControlArg::Trip => CrobCode::Trip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Offline commands need no connection.
    let offline = match &cli.command {
        Commands::EncodeRead {
            group,
            variation,
            start,
            stop,
        } => Some(commands::encode_read(
            cli.dest, cli.source, *group, *variation, *start, *stop,
        )),
        Commands::Decode { hex } => Some(commands::decode(hex, cli.json)),
        _ => None,
    };
    if let Some(result) = offline {
        match result {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = ConnectionConfig::new(cli.server)
        .with_response_timeout(Duration::from_millis(cli.timeout_ms));
    let mut master = Master::connect(&config, cli.source, cli.dest)
        .await
        .map_err(|e| {
            eprintln!("{}: {}", "Connection failed".red(), e);
            e
        })?;
    tracing::debug!(
        server = %cli.server,
        source = cli.source,
        dest = cli.dest,
        "Connected to outstation"
    );

    match commands::execute(&mut master, cli.command, cli.json).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
