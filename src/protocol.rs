//! Shared protocol constants for the peerdrop line-framed transport
//!
//! Wire format, repeated once per file:
//!
//! ```text
//! <relative/path>:<decimal length>\n<length raw bytes>
//! ```
//!
//! followed by an optional `DONE\n` terminator line before the connection
//! closes.

/// Line that ends a session when sent in place of a header
pub const TERMINATOR: &str = "DONE";

/// Separator between the relative path and the payload length
pub const FIELD_SEPARATOR: char = ':';

/// Separator used for relative paths on the wire, regardless of platform
pub const PATH_SEPARATOR: char = '/';

/// Names starting with this marker are never sent
pub const HIDDEN_PREFIX: char = '.';

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_BIND: &str = "0.0.0.0:9000";
pub const DEFAULT_OUTPUT_DIR: &str = "received_data";

// Intermediate buffer for payload copies in both directions
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

// Longest relative path accepted on the wire (bytes)
pub const MAX_PATH_LEN: usize = 4096;

// Header line cap: path + ':' + u64 digits + "\r\n"
// Prevents unbounded buffering of a newline-less header
pub const MAX_HEADER_LEN: usize = MAX_PATH_LEN + 1 + 20 + 2;
