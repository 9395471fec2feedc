//! Shared protocol logic for both ends of a transfer session
//!
//! Header encoding/decoding, the bounded payload copy, and the path rules
//! that keep received files under the output root.

use crate::error::{IoContext, Result, TransferError};
use crate::protocol::{
    FIELD_SEPARATOR, HIDDEN_PREFIX, MAX_HEADER_LEN, MAX_PATH_LEN, PATH_SEPARATOR, TERMINATOR,
};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One file announcement: relative path plus exact payload length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub path: String,
    pub len: u64,
}

/// How a session ended cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer sent the `DONE` line
    Terminator,
    /// Peer closed the stream between frames
    Closed,
}

/// Result of decoding one header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    End(SessionEnd),
}

/// Build header line: `<path>:<len>\n`
pub fn encode_header(frame: &Frame) -> Result<Vec<u8>> {
    validate_wire_path(&frame.path)?;
    let mut line = Vec::with_capacity(frame.path.len() + 22);
    line.extend_from_slice(frame.path.as_bytes());
    line.push(FIELD_SEPARATOR as u8);
    line.extend_from_slice(frame.len.to_string().as_bytes());
    line.push(b'\n');
    Ok(line)
}

pub async fn write_header<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_header(frame)?;
    writer
        .write_all(&line)
        .await
        .io_context(|| format!("send header for {}", frame.path))
}

pub async fn write_terminator<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(TERMINATOR.len() + 1);
    line.extend_from_slice(TERMINATOR.as_bytes());
    line.push(b'\n');
    writer.write_all(&line).await.io_context(|| "send terminator")
}

/// Read exactly one header line and nothing past its newline.
pub async fn read_header<R>(reader: &mut R) -> Result<Decoded>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(128);
    let n = (&mut *reader)
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut line)
        .await
        .io_context(|| "read header")?;
    if n == 0 {
        return Ok(Decoded::End(SessionEnd::Closed));
    }
    if line.last() != Some(&b'\n') {
        if line.len() >= MAX_HEADER_LEN {
            return Err(TransferError::HeaderTooLong {
                limit: MAX_HEADER_LEN,
            });
        }
        // Older peers may close right after an unterminated DONE
        if line == TERMINATOR.as_bytes() {
            return Ok(Decoded::End(SessionEnd::Terminator));
        }
        return Err(TransferError::TruncatedHeader {
            partial: String::from_utf8_lossy(&line).into_owned(),
        });
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    parse_header_line(&line)
}

/// Split a header line (without its line ending) into path and length.
///
/// A header has exactly two fields; a second separator is invalid metadata.
pub fn parse_header_line(line: &[u8]) -> Result<Decoded> {
    let text = std::str::from_utf8(line).map_err(|_| TransferError::InvalidMetadata {
        line: String::from_utf8_lossy(line).into_owned(),
    })?;
    if text == TERMINATOR {
        return Ok(Decoded::End(SessionEnd::Terminator));
    }
    let (path, field) =
        text.split_once(FIELD_SEPARATOR)
            .ok_or_else(|| TransferError::InvalidMetadata {
                line: text.to_string(),
            })?;
    if path.is_empty() || field.contains(FIELD_SEPARATOR) {
        return Err(TransferError::InvalidMetadata {
            line: text.to_string(),
        });
    }
    let len = parse_length(field).ok_or_else(|| TransferError::InvalidLength {
        path: path.to_string(),
        field: field.to_string(),
    })?;
    Ok(Decoded::Frame(Frame {
        path: path.to_string(),
        len,
    }))
}

// Digits only: u64::from_str alone would accept a leading '+'
fn parse_length(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn validate_wire_path(path: &str) -> Result<()> {
    let reason = if path.is_empty() {
        "empty path"
    } else if path.contains(['\n', '\r']) {
        "line break in path"
    } else if path.contains(FIELD_SEPARATOR) {
        "field separator in path"
    } else if path.len() > MAX_PATH_LEN {
        "path too long"
    } else {
        return Ok(());
    };
    Err(TransferError::InvalidPath {
        path: path.to_string(),
        reason,
    })
}

/// Render a relative filesystem path in wire form (`/`-separated, UTF-8).
pub fn wire_path(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => {
                let part = s.to_str().ok_or_else(|| TransferError::InvalidPath {
                    path: rel.to_string_lossy().into_owned(),
                    reason: "not valid UTF-8",
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(TransferError::InvalidPath {
                    path: rel.to_string_lossy().into_owned(),
                    reason: "not a relative path",
                })
            }
        }
    }
    let separator = PATH_SEPARATOR.to_string();
    let joined = parts.join(separator.as_str());
    validate_wire_path(&joined)?;
    Ok(joined)
}

/// True for names carrying the hidden-entry marker
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with(HIDDEN_PREFIX)
}

/// Turn a wire path into a safe relative path.
///
/// Rejects:
/// 1. absolute paths, root and prefix components
/// 2. parent directory segments anywhere
/// 3. NUL bytes
///
/// `.` and empty segments are dropped.
pub fn normalize_relative(wire: &str) -> Result<PathBuf> {
    let traversal = || TransferError::PathTraversal {
        path: wire.to_string(),
    };
    if wire.contains('\0') {
        return Err(TransferError::InvalidPath {
            path: wire.to_string(),
            reason: "NUL byte in path",
        });
    }
    if wire.starts_with(PATH_SEPARATOR) {
        return Err(traversal());
    }

    let mut safe = PathBuf::new();
    for segment in wire.split(PATH_SEPARATOR) {
        if segment.is_empty() {
            continue;
        }
        // Each wire segment must be exactly one normal platform component
        let mut comps = Path::new(segment).components();
        match (comps.next(), comps.next()) {
            (Some(Component::CurDir), None) => {}
            (Some(Component::Normal(s)), None) => safe.push(s),
            _ => return Err(traversal()),
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(TransferError::InvalidPath {
            path: wire.to_string(),
            reason: "no file name",
        });
    }
    Ok(safe)
}

/// Canonical directory that received files are written under
#[derive(Debug, Clone)]
pub struct OutputRoot {
    path: PathBuf,
}

impl OutputRoot {
    /// Create the directory if missing and pin its canonical form.
    pub async fn prepare(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .await
            .io_context(|| format!("create output root {}", path.display()))?;
        let path = fs::canonicalize(path)
            .await
            .io_context(|| format!("canonicalize output root {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a wire path under the root, creating missing parent
    /// directories one component at a time.
    ///
    /// Existing symlinks along the way must resolve inside the root.
    pub async fn prepare_destination(&self, wire: &str) -> Result<PathBuf> {
        let relative = normalize_relative(wire)?;
        let mut current = self.path.clone();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            current.push(component);
            let is_file = components.peek().is_none();
            match fs::symlink_metadata(&current).await {
                Ok(md) if md.file_type().is_symlink() => {
                    let resolved = fs::canonicalize(&current).await.map_err(|_| {
                        TransferError::PathTraversal {
                            path: wire.to_string(),
                        }
                    })?;
                    if !resolved.starts_with(&self.path) {
                        return Err(TransferError::PathTraversal {
                            path: wire.to_string(),
                        });
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if !is_file {
                        ensure_dir(&current).await?;
                    }
                }
                Err(e) => {
                    return Err(TransferError::io(
                        format!("inspect {}", current.display()),
                        e,
                    ))
                }
            }
        }
        Ok(current)
    }
}

// Concurrent sessions may race to create the same directory
async fn ensure_dir(path: &Path) -> Result<()> {
    match fs::create_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(TransferError::io(
            format!("create directory {}", path.display()),
            e,
        )),
    }
}

/// Move up to `len` bytes from `src` to `dst` through `buf`.
///
/// Returns the number of bytes moved; less than `len` means `src` hit EOF.
pub async fn copy_exact<R, W>(
    src: &mut R,
    dst: &mut W,
    len: u64,
    buf: &mut [u8],
    read_context: &str,
    write_context: &str,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    debug_assert!(!buf.is_empty());
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = src
            .read(&mut buf[..want])
            .await
            .io_context(|| read_context)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .await
            .io_context(|| write_context)?;
        remaining -= n as u64;
    }
    Ok(len - remaining)
}
