//! Atomic File Store Module
//!
//! One file per key directly under a root directory. Writes go to a uniquely
//! named temp file first and become visible through a single rename, so a
//! reader sees either the previous file or the new one in full.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::cache::key::SafeKey;
use crate::error::{CacheError, Result};

/// Marker between a target file name and the temp suffix.
pub const TEMP_MARKER: &str = "_temp_";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == Stored File ==
/// A regular file found under the store root.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub name: String,
    /// Modification time, UNIX seconds
    pub modified: i64,
}

// == File Store ==
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    extension: &'static str,
}

impl FileStore {
    // == Open ==
    /// Creates `dir` if missing and resolves it to an absolute path.
    ///
    /// `extension` is appended to every entry name (e.g. `".json"`); use `""`
    /// for bare key names.
    pub fn open(dir: &Path, extension: &'static str) -> Result<Self> {
        if !dir.is_dir() {
            fs::create_dir_all(dir).map_err(|e| CacheError::directory(dir, e))?;
            debug!(path = %dir.display(), "created cache directory");
        }

        let root = fs::canonicalize(dir).map_err(|e| CacheError::directory(dir, e))?;
        if !root.is_dir() {
            return Err(CacheError::directory(dir, "not a directory"));
        }

        Ok(Self { root, extension })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &SafeKey) -> PathBuf {
        self.root.join(format!("{}{}", key, self.extension))
    }

    // == Write ==
    /// Persists `payload` under `key`, replacing any previous content.
    pub fn write(&self, key: &SafeKey, payload: &[u8]) -> Result<PathBuf> {
        let target = self.path_for(key);
        let temp = temp_path_for(&target);

        if let Err(e) = write_new(&temp, payload) {
            let _ = fs::remove_file(&temp);
            return Err(CacheError::write(&temp, e));
        }

        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(CacheError::write(&target, e));
        }

        if let Err(e) = share_with_everyone(&target) {
            warn!(path = %target.display(), error = %e, "could not widen cache file permissions");
        }

        Ok(target)
    }

    // == Read ==
    /// Full content of the entry, or `None` when there is no such file.
    pub fn read(&self, key: &SafeKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Ok(None);
        }

        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            // Removed between the check and the read
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::read(&path, e)),
        }
    }

    // == Modified ==
    /// Modification time of the entry in UNIX seconds, `None` if absent.
    pub fn modified(&self, key: &SafeKey) -> Result<Option<i64>> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => modified_secs(&meta)
                .map(Some)
                .map_err(|e| CacheError::read(&path, e)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::read(&path, e)),
        }
    }

    // == Remove ==
    /// Deletes the entry. Returns whether a file was removed.
    pub fn remove(&self, key: &SafeKey) -> Result<bool> {
        remove_path(&self.path_for(key))
    }

    /// Deletes a file previously returned by [`FileStore::files`].
    pub fn remove_file(&self, file: &StoredFile) -> Result<bool> {
        remove_path(&file.path)
    }

    // == Files ==
    /// Regular files directly under the root, dot files included.
    pub fn files(&self) -> Result<Vec<StoredFile>> {
        let entries = fs::read_dir(&self.root).map_err(|e| CacheError::read(&self.root, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::read(&self.root, e))?;
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::read(entry.path(), e)),
            };
            if !meta.is_file() {
                continue;
            }
            files.push(StoredFile {
                path: entry.path(),
                name: entry.file_name().to_string_lossy().into_owned(),
                modified: modified_secs(&meta).unwrap_or(0),
            });
        }

        Ok(files)
    }

    // == Clear ==
    /// Deletes every regular file under the root, temp files included.
    /// Subdirectories are left alone. Returns the number of files removed.
    ///
    /// A failed removal does not stop the sweep; the first failure is
    /// returned once every file has been tried.
    pub fn clear(&self) -> Result<usize> {
        let paths: Vec<PathBuf> = self.files()?.into_iter().map(|file| file.path).collect();
        let removed = remove_all(&paths)?;
        debug!(root = %self.root.display(), removed, "cleared cache directory");
        Ok(removed)
    }
}

// == Helpers ==
/// `<target>_temp_<pid>_<counter>_<random>`
fn temp_path_for(target: &Path) -> PathBuf {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix = format!(
        "{}{}_{}_{:08x}",
        TEMP_MARKER,
        std::process::id(),
        counter,
        rand::random::<u32>()
    );
    let mut name = target.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes the whole payload into a file that must not exist yet.
fn write_new(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

/// Removes every path, returning the count or the first failure.
fn remove_all(paths: &[PathBuf]) -> Result<usize> {
    let mut removed = 0;
    let mut first_error = None;
    for path in paths {
        match remove_path(path) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not remove cache file");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}

fn remove_path(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::write(path, e)),
    }
}

fn modified_secs(meta: &fs::Metadata) -> std::io::Result<i64> {
    let modified = meta.modified()?;
    let secs = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    };
    Ok(secs)
}

#[cfg(unix)]
fn share_with_everyone(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o666))
}

#[cfg(not(unix))]
fn share_with_everyone(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Opens an existing entry for metadata tweaks in tests.
#[cfg(test)]
pub(crate) fn open_existing(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new().write(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::clean;
    use std::collections::HashSet;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileStore {
        FileStore::open(dir.path(), ".json").unwrap()
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");

        let store = FileStore::open(&nested, "").unwrap();

        assert!(nested.is_dir());
        assert!(store.root().is_absolute());
    }

    #[test]
    fn test_open_resolves_relative_components() {
        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("x").join("..").join("y");

        let store = FileStore::open(&odd, "").unwrap();

        assert_eq!(store.root(), fs::canonicalize(dir.path().join("y")).unwrap());
    }

    #[test]
    fn test_open_fails_on_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();

        let result = FileStore::open(&file, "");
        assert!(matches!(result, Err(CacheError::Directory { .. })));
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = clean("user:42");

        let path = store.write(&key, b"payload").unwrap();

        assert_eq!(path, store.root().join("user_42.json"));
        assert_eq!(store.read(&key).unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn test_write_overwrites_fully() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = clean("k");

        store.write(&key, b"a much longer first payload").unwrap();
        store.write(&key, b"short").unwrap();

        assert_eq!(store.read(&key).unwrap(), Some(b"short".to_vec()));
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for i in 0..10 {
            store.write(&clean(&format!("k{}", i)), b"v").unwrap();
        }

        let names: Vec<String> = store.files().unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names.len(), 10);
        assert!(names.iter().all(|n| !n.contains(TEMP_MARKER)));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_shares_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = store.write(&clean("k"), b"v").unwrap();

        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);
    }

    #[test]
    fn test_write_fails_when_root_vanished() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("gone");
        let store = FileStore::open(&root, "").unwrap();
        fs::remove_dir(&root).unwrap();

        let result = store.write(&clean("k"), b"v");
        assert!(matches!(result, Err(CacheError::Write { .. })));
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let target = PathBuf::from("/tmp/cache/key.json");
        let paths: HashSet<PathBuf> = (0..1000).map(|_| temp_path_for(&target)).collect();

        assert_eq!(paths.len(), 1000);
        assert!(paths
            .iter()
            .all(|p| p.to_string_lossy().starts_with("/tmp/cache/key.json_temp_")));
    }

    #[test]
    fn test_read_absent() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).read(&clean("missing")).unwrap(), None);
    }

    #[test]
    fn test_read_ignores_directories() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir(store.root().join("sub.json")).unwrap();

        assert_eq!(store.read(&clean("sub")).unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = clean("k");
        store.write(&key, b"v").unwrap();

        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert_eq!(store.read(&key).unwrap(), None);
    }

    #[test]
    fn test_clear_removes_files_and_dotfiles_only() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.write(&clean("a"), b"1").unwrap();
        store.write(&clean("b"), b"2").unwrap();
        fs::write(store.root().join(".hidden"), b"h").unwrap();
        fs::write(store.root().join("orphan.json_temp_1_2_3"), b"t").unwrap();
        fs::create_dir(store.root().join("subdir")).unwrap();
        fs::write(store.root().join("subdir").join("kept"), b"k").unwrap();

        let removed = store.clear().unwrap();

        assert_eq!(removed, 4);
        assert!(store.files().unwrap().is_empty());
        assert!(store.root().join("subdir").join("kept").is_file());
    }

    #[test]
    fn test_remove_all_keeps_going_after_failure() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.write(&clean("first"), b"1").unwrap();
        let last = store.write(&clean("last"), b"2").unwrap();
        // remove_file refuses directories
        let stubborn = store.root().join("stubborn");
        fs::create_dir(&stubborn).unwrap();

        let result = remove_all(&[first.clone(), stubborn.clone(), last.clone()]);

        assert!(matches!(result, Err(CacheError::Write { .. })));
        assert!(!first.exists());
        assert!(!last.exists());
        assert!(stubborn.is_dir());
    }

    #[test]
    fn test_modified_reports_mtime() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = clean("k");
        let path = store.write(&key, b"v").unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        open_existing(&path).unwrap().set_modified(past).unwrap();

        let expected = past.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        assert_eq!(store.modified(&key).unwrap(), Some(expected));
        assert_eq!(store.modified(&clean("other")).unwrap(), None);
    }
}
