use crate::error::{IoContext, Result, TransferError};
use crate::protocol_core::{is_hidden_name, wire_path};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};
// Source enumeration for send sessions

/// A file to send, with its wire path relative to the enumeration base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub rel: String,
}

/// Enumerate everything a send of `root` transmits, in send order.
///
/// A directory is walked depth-first with hidden entries (and hidden
/// subtrees) skipped. Anything else is a single-file send whose base is
/// the file's parent directory.
pub fn enumerate_source(root: &Path) -> Result<Vec<SourceFile>> {
    let md = std::fs::metadata(root).io_context(|| format!("stat {}", root.display()))?;
    if md.is_dir() {
        return enumerate_directory(root);
    }

    let name = root.file_name().ok_or_else(|| TransferError::InvalidPath {
        path: root.to_string_lossy().into_owned(),
        reason: "no file name",
    })?;
    Ok(vec![SourceFile {
        path: root.to_path_buf(),
        rel: wire_path(Path::new(name))?,
    }])
}

/// Depth-first walk of `root`, names sorted within each directory
pub fn enumerate_directory(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        // The root is what the user asked for, even when its own name is hidden
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| {
            let at = e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| root.display().to_string());
            TransferError::io(format!("walk {}", at), e.into())
        })?;
        if !is_sendable(&entry)? {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        files.push(SourceFile {
            path: entry.path().to_path_buf(),
            rel: wire_path(rel)?,
        });
    }

    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(is_hidden_name)
        .unwrap_or(false)
}

// Regular files, and symlinks that resolve to regular files
fn is_sendable(entry: &DirEntry) -> Result<bool> {
    let ft = entry.file_type();
    if ft.is_file() {
        return Ok(true);
    }
    if ft.is_symlink() {
        return match std::fs::metadata(entry.path()) {
            Ok(md) => Ok(md.is_file()),
            // Dangling link: nothing to send
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TransferError::io(
                format!("stat {}", entry.path().display()),
                e,
            )),
        };
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn rels(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.rel.as_str()).collect()
    }

    #[test]
    fn test_single_file_uses_parent_as_base() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("deep/er");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("report.pdf");
        fs::write(&file, b"%PDF").unwrap();

        let files = enumerate_source(&file).unwrap();
        assert_eq!(rels(&files), vec!["report.pdf"]);
        assert_eq!(files[0].path, file);
    }

    #[test]
    fn test_directory_walk_skips_hidden() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.txt"), b"hi").unwrap();
        fs::create_dir_all(root.join("sub/inner")).unwrap();
        fs::write(root.join("sub/b.txt"), b"").unwrap();
        fs::write(root.join("sub/inner/c.bin"), b"\x00\x01").unwrap();
        fs::write(root.join(".DS_Store"), b"x").unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join(".git/HEAD"), b"ref").unwrap();
        fs::write(root.join(".git/objects/ab"), b"obj").unwrap();
        fs::write(root.join("sub/.hidden"), b"x").unwrap();

        let files = enumerate_source(root).unwrap();
        assert_eq!(rels(&files), vec!["a.txt", "sub/b.txt", "sub/inner/c.bin"]);
    }

    #[test]
    fn test_colon_in_name_fails_before_sending() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("ok.txt"), b"x").unwrap();
        fs::write(tmp.path().join("12:30.log"), b"x").unwrap();

        let err = enumerate_source(tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::TransferError::InvalidPath {
                reason: "field separator in path",
                ..
            }
        ));
    }

    #[test]
    fn test_hidden_root_is_still_walked() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join(".config");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("app.toml"), b"x = 1").unwrap();

        let files = enumerate_source(&root).unwrap();
        assert_eq!(rels(&files), vec!["app.toml"]);
    }

    #[test]
    fn test_empty_directory_sends_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();
        let files = enumerate_source(tmp.path()).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = enumerate_source(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Io);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_to_files_are_followed() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("src");
        fs::create_dir(&root).unwrap();
        fs::write(tmp.path().join("target.txt"), b"linked").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("target.txt"), root.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("missing"), root.join("dangling")).unwrap();
        std::os::unix::fs::symlink(tmp.path(), root.join("loop")).unwrap();

        let files = enumerate_source(&root).unwrap();
        assert_eq!(rels(&files), vec!["link.txt"]);
    }
}
