//! In-memory device filesystem for testing without SSH.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use siphon_core::remote::remote_parent;
use siphon_core::{Connector, RemoteFs, SyncError};

type DownloadHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Resolution gives up after this many link hops, like `ELOOP`.
const MAX_LINK_HOPS: usize = 40;

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    links: BTreeMap<String, String>,
    unreadable_dirs: HashSet<String>,
    failing_reads: HashSet<String>,
    failing_removes: HashSet<String>,
    reject_auth: bool,
    download_hook: Option<DownloadHook>,
    removed_dirs: Vec<String>,
    removed_files: Vec<String>,
    downloads: usize,
    connections: usize,
    open_sessions: usize,
}

/// A fake device shared between the test and every session it hands out.
#[derive(Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create an empty device with only `/`.
    pub fn new() -> Self {
        let mut state = State::default();
        state.dirs.insert("/".to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a file, creating its parent directories.
    pub fn with_file(self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        {
            let mut state = self.lock();
            add_parents(&mut state, path);
            state.files.insert(path.to_string(), contents.into());
        }
        self
    }

    /// Add a file of `size` filler bytes.
    pub fn with_sized_file(self, path: &str, size: usize) -> Self {
        self.with_file(path, vec![b'x'; size])
    }

    /// Add an (empty) directory and its parents.
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut state = self.lock();
            add_parents(&mut state, path);
            state.dirs.insert(path.to_string());
        }
        self
    }

    /// Add a symbolic link at `link` pointing to the absolute path `target`.
    ///
    /// Listing and stat follow links the way an SFTP server does.
    pub fn with_symlink(self, link: &str, target: &str) -> Self {
        {
            let mut state = self.lock();
            add_parents(&mut state, link);
            state.links.insert(link.to_string(), target.to_string());
        }
        self
    }

    /// Make listing this directory fail.
    pub fn unreadable_dir(self, path: &str) -> Self {
        self.lock().unreadable_dirs.insert(path.to_string());
        self
    }

    /// Make downloading this file fail halfway through.
    pub fn failing_download(self, path: &str) -> Self {
        self.lock().failing_reads.insert(path.to_string());
        self
    }

    /// Make removing this file fail.
    pub fn failing_remove(self, path: &str) -> Self {
        self.lock().failing_removes.insert(path.to_string());
        self
    }

    /// Refuse every connection with an authentication error.
    pub fn rejecting_auth(self) -> Self {
        self.lock().reject_auth = true;
        self
    }

    /// Run `hook` with the remote path before each download starts.
    pub fn on_download(self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.lock().download_hook = Some(Arc::new(hook));
        self
    }

    /// Whether a file exists.
    pub fn has_file(&self, path: &str) -> bool {
        self.lock().files.contains_key(path)
    }

    /// Whether a directory exists.
    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    /// Directories removed, in removal order.
    pub fn removed_dirs(&self) -> Vec<String> {
        self.lock().removed_dirs.clone()
    }

    /// Files removed, in removal order.
    pub fn removed_files(&self) -> Vec<String> {
        self.lock().removed_files.clone()
    }

    /// Number of completed or attempted downloads.
    pub fn downloads(&self) -> usize {
        self.lock().downloads
    }

    /// Number of successful connections so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Sessions not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }
}

fn add_parents(state: &mut State, path: &str) {
    let mut current = path;
    while let Some(parent) = remote_parent(current) {
        state.dirs.insert(parent.to_string());
        if parent == "/" {
            break;
        }
        current = parent;
    }
}

fn normalize(path: &str) -> &str {
    if path == "/" {
        path
    } else {
        path.trim_end_matches('/')
    }
}

/// Replace link prefixes with their targets until none is left.
fn resolve(state: &State, path: &str) -> String {
    let mut current = normalize(path).to_string();
    for _ in 0..MAX_LINK_HOPS {
        let hop = state.links.iter().find_map(|(link, target)| {
            if current == *link {
                return Some(target.clone());
            }
            current
                .strip_prefix(link.as_str())
                .filter(|rest| rest.starts_with('/'))
                .map(|rest| format!("{}{rest}", target.trim_end_matches('/')))
        });
        match hop {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

impl Connector for MemoryRemote {
    type Session = MemorySession;

    fn endpoint(&self) -> String {
        "memory:22".to_string()
    }

    fn connect(&self) -> Result<MemorySession, SyncError> {
        let mut state = self.lock();
        if state.reject_auth {
            return Err(SyncError::Authentication {
                host: "memory".to_string(),
                username: "test".to_string(),
                message: "password rejected".to_string(),
            });
        }
        state.connections += 1;
        state.open_sessions += 1;
        Ok(MemorySession {
            remote: self.clone(),
        })
    }
}

/// One open session on a [`MemoryRemote`].
pub struct MemorySession {
    remote: MemoryRemote,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.remote.lock().open_sessions -= 1;
    }
}

impl RemoteFs for MemorySession {
    fn read_dir(&self, path: &str) -> Result<Vec<String>, SyncError> {
        let state = self.remote.lock();
        let resolved = resolve(&state, path);
        let dir = resolved.as_str();
        if state.unreadable_dirs.contains(dir) {
            return Err(SyncError::remote(path, "permission denied"));
        }
        if !state.dirs.contains(dir) {
            return Err(SyncError::remote(path, "not a directory"));
        }

        let child_name = |child: &String| -> Option<String> {
            (remote_parent(child) == Some(dir))
                .then(|| child.rsplit('/').next().unwrap_or_default().to_string())
        };

        let mut names: Vec<String> = state.dirs.iter().filter_map(child_name).collect();
        names.extend(state.files.keys().filter_map(child_name));
        names.extend(state.links.keys().filter_map(child_name));
        names.retain(|n| !n.is_empty());
        Ok(names)
    }

    fn file_size(&self, path: &str) -> Result<u64, SyncError> {
        let state = self.remote.lock();
        state
            .files
            .get(&resolve(&state, path))
            .map(|data| data.len() as u64)
            .ok_or_else(|| SyncError::remote(path, "no such file"))
    }

    fn real_path(&self, path: &str) -> Result<String, SyncError> {
        let state = self.remote.lock();
        let resolved = resolve(&state, path);
        if state.dirs.contains(&resolved) || state.files.contains_key(&resolved) {
            Ok(resolved)
        } else {
            Err(SyncError::remote(path, "no such file"))
        }
    }

    fn download(&self, path: &str, writer: &mut dyn Write) -> Result<u64, SyncError> {
        let hook = self.remote.lock().download_hook.clone();
        if let Some(hook) = hook {
            hook(path);
        }

        let (data, failing) = {
            let mut state = self.remote.lock();
            state.downloads += 1;
            let data = state
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| SyncError::remote(path, "no such file"))?;
            (data, state.failing_reads.contains(path))
        };

        if failing {
            let half = data.len() / 2;
            writer
                .write_all(&data[..half])
                .map_err(|e| SyncError::remote(path, e))?;
            return Err(SyncError::remote(path, "connection reset during read"));
        }

        writer
            .write_all(&data)
            .map_err(|e| SyncError::remote(path, e))?;
        Ok(data.len() as u64)
    }

    fn remove_file(&self, path: &str) -> Result<(), SyncError> {
        let mut state = self.remote.lock();
        if state.failing_removes.contains(path) {
            return Err(SyncError::remote(path, "permission denied"));
        }
        if state.files.remove(path).is_none() {
            return Err(SyncError::remote(path, "no such file"));
        }
        state.removed_files.push(path.to_string());
        Ok(())
    }

    fn remove_dir(&self, path: &str) -> Result<(), SyncError> {
        let path = normalize(path);
        let mut state = self.remote.lock();
        if !state.dirs.contains(path) {
            return Err(SyncError::remote(path, "no such directory"));
        }
        let has_children = state
            .dirs
            .iter()
            .chain(state.files.keys())
            .any(|child| remote_parent(child) == Some(path) && child != path);
        if has_children {
            return Err(SyncError::remote(path, "directory not empty"));
        }
        state.dirs.remove(path);
        state.removed_dirs.push(path.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing() {
        let remote = MemoryRemote::new()
            .with_file("/data/a.jpg", "aaaa")
            .with_file("/data/sub/b.jpg", "bb");
        let session = remote.connect().unwrap();

        let mut names = session.read_dir("/data").unwrap();
        names.sort();
        assert_eq!(names, vec!["a.jpg", "sub"]);
        assert!(session.read_dir("/data/a.jpg").is_err());
        assert_eq!(session.file_size("/data/sub/b.jpg").unwrap(), 2);
        assert_eq!(session.read_dir("/").unwrap(), vec!["data"]);
    }

    #[test]
    fn test_remove_dir_requires_empty() {
        let remote = MemoryRemote::new().with_file("/data/a/f1", "1");
        let session = remote.connect().unwrap();

        assert!(session.remove_dir("/data/a").is_err());
        session.remove_file("/data/a/f1").unwrap();
        session.remove_dir("/data/a").unwrap();
        assert_eq!(remote.removed_dirs(), vec!["/data/a"]);
    }

    #[test]
    fn test_symlinks_are_followed() {
        let remote = MemoryRemote::new()
            .with_file("/data/a.jpg", "aaaa")
            .with_symlink("/data/sub/up", "/data")
            .with_symlink("/data/pic.jpg", "/data/a.jpg");
        let session = remote.connect().unwrap();

        let mut names = session.read_dir("/data/sub/up").unwrap();
        names.sort();
        assert_eq!(names, vec!["a.jpg", "pic.jpg", "sub"]);
        assert_eq!(session.read_dir("/data/sub").unwrap(), vec!["up"]);
        assert_eq!(session.file_size("/data/sub/up/pic.jpg").unwrap(), 4);
        assert_eq!(session.real_path("/data/sub/up/sub").unwrap(), "/data/sub");
        assert!(session.real_path("/data/missing").is_err());
    }

    #[test]
    fn test_sessions_are_counted() {
        let remote = MemoryRemote::new();
        {
            let _session = remote.connect().unwrap();
            assert_eq!(remote.open_sessions(), 1);
        }
        assert_eq!(remote.open_sessions(), 0);
        assert_eq!(remote.connections(), 1);
    }
}
