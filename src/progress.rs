//! Spinner for the sending side
//!
//! Shows a running files/bytes count while a send session streams, and
//! leaves a one-line summary behind when it finishes.

use crate::error::TransferError;
use crate::logger::Logger;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct SendProgress {
    spinner: ProgressBar,
    files: AtomicU64,
    bytes: AtomicU64,
}

impl SendProgress {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));

        Self {
            spinner,
            files: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn hidden() -> Self {
        Self {
            spinner: ProgressBar::hidden(),
            files: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn totals(&self) -> (u64, u64) {
        (
            self.files.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

impl Default for SendProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / 1_048_576.0
}

impl Logger for SendProgress {
    fn file_sent(&self, _peer: &str, rel: &str, bytes: u64) {
        let files = self.files.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.spinner.set_message(format!(
            "{} files ({:.1} MB) - {}",
            files,
            mib(total),
            rel
        ));
    }

    fn error(&self, _peer: &str, err: &TransferError) {
        self.spinner
            .abandon_with_message(format!("Failed [{}]: {}", err.category().label(), err));
    }

    fn send_done(&self, peer: &str, files: u64, bytes: u64, seconds: f64) {
        let throughput = if seconds > 0.0 {
            mib(bytes) / seconds
        } else {
            0.0
        };
        self.spinner.finish_with_message(format!(
            "Sent {} files ({:.1} MB) to {} in {:.1}s ({:.1} MB/s)",
            files,
            mib(bytes),
            peer,
            seconds,
            throughput
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sent_files() {
        let progress = SendProgress::hidden();
        progress.file_sent("peer", "a.txt", 2);
        progress.file_sent("peer", "sub/b.txt", 0);
        progress.file_sent("peer", "big.bin", 1 << 20);
        assert_eq!(progress.totals(), (3, 2 + (1 << 20)));
        progress.send_done("peer", 3, 2 + (1 << 20), 0.5);
    }
}
