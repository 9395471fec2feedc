use crate::error::TransferError;
use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Transfer event sink. Every hook defaults to a no-op.
///
/// `peer` is the remote address of the session the event belongs to.
pub trait Logger: Send + Sync {
    fn session_start(&self, _peer: &str) {}
    fn file_received(&self, _peer: &str, _rel: &str, _bytes: u64) {}
    fn file_sent(&self, _peer: &str, _rel: &str, _bytes: u64) {}
    fn error(&self, _peer: &str, _err: &TransferError) {}
    fn session_done(&self, _peer: &str, _files: u64, _bytes: u64, _seconds: f64) {}
    fn send_done(&self, _peer: &str, _files: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Human-readable status lines on stderr
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn session_start(&self, peer: &str) {
        eprintln!("conn from {}", peer);
    }
    fn file_received(&self, _peer: &str, rel: &str, bytes: u64) {
        eprintln!("Received: {} ({} bytes)", rel, bytes);
    }
    fn file_sent(&self, _peer: &str, rel: &str, bytes: u64) {
        eprintln!("Sent: {} ({} bytes)", rel, bytes);
    }
    fn error(&self, peer: &str, err: &TransferError) {
        eprintln!("Error [{}] from {}: {}", err.category().label(), peer, err);
    }
    fn session_done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        eprintln!(
            "Transfer from {} finished: {} files, {} bytes in {:.2}s",
            peer, files, bytes, seconds
        );
    }
    fn send_done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        eprintln!(
            "Transfer to {} complete: {} files, {} bytes in {:.2}s",
            peer, files, bytes, seconds
        );
    }
}

/// Append-only event log with RFC 3339 timestamps
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn session_start(&self, peer: &str) {
        self.line(&format!("START peer={}", peer));
    }
    fn file_received(&self, peer: &str, rel: &str, bytes: u64) {
        self.line(&format!("RECV peer={} path={} bytes={}", peer, rel, bytes));
    }
    fn file_sent(&self, peer: &str, rel: &str, bytes: u64) {
        self.line(&format!("SENT peer={} path={} bytes={}", peer, rel, bytes));
    }
    fn error(&self, peer: &str, err: &TransferError) {
        self.line(&format!(
            "ERROR peer={} kind={} msg={}",
            peer,
            err.category().label(),
            err
        ));
    }
    fn session_done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        self.line(&format!(
            "DONE peer={peer} files={files} bytes={bytes} seconds={seconds:.3}"
        ));
    }
    fn send_done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        self.line(&format!(
            "SENT_ALL peer={peer} files={files} bytes={bytes} seconds={seconds:.3}"
        ));
    }
}

/// Forwards every event to each inner logger in order
pub struct FanoutLogger {
    sinks: Vec<Arc<dyn Logger>>,
}

impl FanoutLogger {
    pub fn new(sinks: Vec<Arc<dyn Logger>>) -> Self {
        Self { sinks }
    }
}

impl Logger for FanoutLogger {
    fn session_start(&self, peer: &str) {
        self.sinks.iter().for_each(|s| s.session_start(peer));
    }
    fn file_received(&self, peer: &str, rel: &str, bytes: u64) {
        self.sinks.iter().for_each(|s| s.file_received(peer, rel, bytes));
    }
    fn file_sent(&self, peer: &str, rel: &str, bytes: u64) {
        self.sinks.iter().for_each(|s| s.file_sent(peer, rel, bytes));
    }
    fn error(&self, peer: &str, err: &TransferError) {
        self.sinks.iter().for_each(|s| s.error(peer, err));
    }
    fn session_done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        self.sinks
            .iter()
            .for_each(|s| s.session_done(peer, files, bytes, seconds));
    }
    fn send_done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        self.sinks
            .iter()
            .for_each(|s| s.send_done(peer, files, bytes, seconds));
    }
}
