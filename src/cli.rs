//! Command-line surface and its mapping onto listener/connector config

use crate::config::{ConnectorConfig, ListenerConfig};
use crate::protocol::{DEFAULT_BIND, DEFAULT_OUTPUT_DIR};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "peerdrop",
    author,
    version,
    about = "Peer-to-peer file and folder transfer over TCP"
)]
pub struct Cli {
    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also append transfer events to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Defaults to `serve` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Listen for peers and save what they send
    Serve(ServeOpts),
    /// Send a file or folder to a listening peer
    Send(SendOpts),
}

/// Listener options shared by `serve` and `send --serve`
#[derive(Clone, Debug, Args)]
pub struct ServeOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Directory received files are written under
    #[arg(long = "out", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_root: PathBuf,

    /// Maximum concurrent receive sessions (unbounded if omitted)
    #[arg(long)]
    pub max_sessions: Option<usize>,
}

impl Default for ServeOpts {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            max_sessions: None,
        }
    }
}

impl ServeOpts {
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig::new(self.bind.clone(), self.output_root.clone())
            .with_max_sessions(self.max_sessions)
    }
}

#[derive(Clone, Debug, Args)]
pub struct SendOpts {
    /// Peer address (host:port, port defaults to 9000)
    pub peer: String,

    /// File or folder to send
    pub path: PathBuf,

    /// Show a progress spinner instead of one line per file
    #[arg(long)]
    pub progress: bool,

    /// Keep a listener running alongside and after the send
    #[arg(long)]
    pub serve: bool,

    #[command(flatten)]
    pub listener: ServeOpts,
}

impl SendOpts {
    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig::new(self.peer.clone())
    }
}
