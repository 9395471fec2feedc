//! Explicit configuration for the listener and connector roles

use crate::protocol::{DEFAULT_BIND, DEFAULT_BUFFER_SIZE, DEFAULT_OUTPUT_DIR, DEFAULT_PORT};
use std::path::PathBuf;

// Smallest accepted copy buffer
const MIN_BUFFER_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address (host:port)
    pub bind: String,
    /// Directory that received relative paths are reconstructed under
    pub output_root: PathBuf,
    /// Cap on concurrently running receive sessions (None = unbounded)
    pub max_sessions: Option<usize>,
    pub buffer_size: usize,
}

impl ListenerConfig {
    pub fn new(bind: impl Into<String>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            bind: bind.into(),
            output_root: output_root.into(),
            max_sessions: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_max_sessions(mut self, max: Option<usize>) -> Self {
        // Zero would never admit a session
        self.max_sessions = max.map(|n| n.max(1));
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(MIN_BUFFER_SIZE);
        self
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIND, DEFAULT_OUTPUT_DIR)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Peer address (host:port); a bare host gets the default port
    pub peer: String,
    pub buffer_size: usize,
}

impl ConnectorConfig {
    pub fn new(peer: impl Into<String>) -> Self {
        let peer: String = peer.into();
        Self {
            peer: with_default_port(&peer),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(MIN_BUFFER_SIZE);
        self
    }
}

fn with_default_port(peer: &str) -> String {
    let peer = peer.trim();
    // "[v6]:port", "host:port" or "[v6]"
    if let Some(rest) = peer.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((_, tail)) if tail.starts_with(':') => peer.to_string(),
            _ => format!("{}:{}", peer, DEFAULT_PORT),
        };
    }
    match peer.matches(':').count() {
        0 => format!("{}:{}", peer, DEFAULT_PORT),
        1 => peer.to_string(),
        // Unbracketed IPv6 literal
        _ => format!("[{}]:{}", peer, DEFAULT_PORT),
    }
}
