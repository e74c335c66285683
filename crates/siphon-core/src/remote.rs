//! Remote filesystem seam and POSIX path helpers.
//!
//! The device side is always a POSIX filesystem, so remote paths are plain
//! `/`-separated strings regardless of the host OS running siphon.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::SyncError;

/// Operations a stage needs from an open SFTP session.
///
/// Every error returned here is per-item; connection-level failures happen in
/// [`Connector::connect`].
pub trait RemoteFs {
    /// List entry names in a directory, excluding `.` and `..`.
    fn read_dir(&self, path: &str) -> Result<Vec<String>, SyncError>;

    /// Size of a remote file in bytes.
    fn file_size(&self, path: &str) -> Result<u64, SyncError>;

    /// Stream a remote file into `writer`, returning the bytes written.
    fn download(&self, path: &str, writer: &mut dyn Write) -> Result<u64, SyncError>;

    /// Remove a single file.
    fn remove_file(&self, path: &str) -> Result<(), SyncError>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &str) -> Result<(), SyncError>;

    /// Canonical absolute path with symbolic links resolved.
    ///
    /// Filesystems without links can keep the default, which returns `path`.
    fn real_path(&self, path: &str) -> Result<String, SyncError> {
        Ok(path.to_string())
    }
}

/// Opens sessions to one device. Each stage opens and drops its own.
pub trait Connector: Send + Sync + 'static {
    /// Session type; dropping it closes the connection.
    type Session: RemoteFs + Send;

    /// `host:port` of the device, for status messages.
    fn endpoint(&self) -> String;

    /// Connect and authenticate.
    fn connect(&self) -> Result<Self::Session, SyncError>;
}

/// Strip trailing separators from a remote root.
///
/// `/` normalizes to the empty string so joined paths still start with `/`.
pub fn normalize_remote_root(root: &str) -> String {
    root.trim().trim_end_matches('/').to_string()
}

/// Path to pass to `read_dir` for a normalized root.
pub fn listing_path(root: &str) -> &str {
    if root.is_empty() { "/" } else { root }
}

/// `root + "/" + relative`.
pub fn join_remote(root: &str, relative: &str) -> String {
    format!("{root}/{relative}")
}

/// Parent directory of a remote path, if it has one.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let parent = &trimmed[..idx];
    if parent.is_empty() { Some("/") } else { Some(parent) }
}

/// Number of separators in a remote path; deeper paths have more.
pub fn remote_depth(path: &str) -> usize {
    path.trim_end_matches('/').matches('/').count()
}

/// Parent of a relative path, `""` for top-level entries.
pub fn relative_parent(relative: &str) -> &str {
    relative.rfind('/').map(|idx| &relative[..idx]).unwrap_or("")
}

/// Map a remote relative path onto the local mirror.
///
/// Rejects relative paths that would escape `local_root`.
pub fn local_path_for(local_root: &Path, relative: &str) -> Result<PathBuf, SyncError> {
    let mut path = local_root.to_path_buf();
    let mut pushed = false;

    for part in relative.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => {
                path.push(name);
                pushed = true;
            }
            _ => {
                return Err(SyncError::remote(
                    relative,
                    "relative path escapes the local mirror",
                ));
            }
        }
    }

    if !pushed {
        return Err(SyncError::remote(relative, "empty relative path"));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_and_join() {
        assert_eq!(normalize_remote_root("/home/pi/data/"), "/home/pi/data");
        assert_eq!(normalize_remote_root("/"), "");
        assert_eq!(
            join_remote(&normalize_remote_root("/home/pi/data/"), "2026/img.jpg"),
            "/home/pi/data/2026/img.jpg"
        );
        assert_eq!(join_remote(&normalize_remote_root("/"), "img.jpg"), "/img.jpg");
        assert_eq!(listing_path(""), "/");
    }

    #[test]
    fn test_remote_parent_and_depth() {
        assert_eq!(remote_parent("/data/a/b/f1"), Some("/data/a/b"));
        assert_eq!(remote_parent("/f1"), Some("/"));
        assert_eq!(remote_parent("f1"), None);
        assert!(remote_depth("/data/a/b") > remote_depth("/data/a"));
    }

    #[test]
    fn test_relative_parent() {
        assert_eq!(relative_parent("2026-01-13/img.jpg"), "2026-01-13");
        assert_eq!(relative_parent("img.jpg"), "");
    }

    #[test]
    fn test_local_path_for() {
        let root = Path::new("/mirror");
        let path = local_path_for(root, "a/b/c.jpg").unwrap();
        assert_eq!(path, root.join("a").join("b").join("c.jpg"));

        assert!(local_path_for(root, "../etc/passwd").is_err());
        assert!(local_path_for(root, "a/../../x").is_err());
        assert!(local_path_for(root, "").is_err());
    }
}
