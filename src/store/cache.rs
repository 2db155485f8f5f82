//! On-disk cache: content-addressed JSON files with atomic replacement.
//!
//! Layout: `<root>/workplaces/<displays>/{clients,workspaces}/...`. The
//! displays name makes every topology its own cache namespace. Writes go
//! through a sibling temp file, fsync and rename so a crash or a concurrent
//! restart never leaves a torn file behind.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, Permissions};
use std::hash::{Hash, Hasher};
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::Location;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stable hash of a logical key, truncated to `length` hex characters.
pub fn hash_string(key: &str, length: usize) -> String {
    let mut first = DefaultHasher::new();
    key.hash(&mut first);
    let mut second = DefaultHasher::new();
    key.hash(&mut second);
    key.len().hash(&mut second);

    let mut hex = format!("{:016x}{:016x}", first.finish(), second.finish());
    hex.truncate(length);
    hex
}

/// Resolved cache paths for the current topology.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Option<PathBuf>,
    displays_name: String,
}

impl CacheStore {
    pub fn new(root: Option<PathBuf>, displays_name: &str) -> Self {
        Self {
            root,
            displays_name: displays_name.into(),
        }
    }

    pub fn disabled(&self) -> bool {
        self.root.is_none()
    }

    fn base(&self) -> Option<PathBuf> {
        Some(
            self.root
                .as_ref()?
                .join("workplaces")
                .join(&self.displays_name),
        )
    }

    /// File for one (class, desktop) client snapshot.
    pub fn client_path(&self, class: &str, desktop: u32) -> Option<PathBuf> {
        let key = format!("{class}-{desktop}");
        Some(
            self.base()?
                .join("clients")
                .join(class)
                .join(hash_string(&key, 20) + ".json"),
        )
    }

    /// File for one workspace snapshot.
    pub fn workspace_path(&self, location: Location) -> Option<PathBuf> {
        let key = format!("workspace-{}-{}", location.desktop, location.screen);
        Some(
            self.base()?
                .join("workspaces")
                .join(hash_string(&key, 20) + ".json"),
        )
    }
}

/// Write `data` to `path` atomically: temp sibling, fsync, chmod, rename.
pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let folder = path.parent().context("cache path has no parent")?;
    fs::create_dir_all(folder).context("Failed to create cache directory")?;

    let file_name = path
        .file_name()
        .context("cache path has no file name")?
        .to_string_lossy();
    let suffix = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = folder.join(format!(
        "{file_name}.tmp-{}-{suffix}",
        std::process::id()
    ));

    let result = (|| -> Result<()> {
        let mut file = File::create(&temp_path).context("Failed to create temp file")?;
        file.write_all(data).context("Failed to write temp file")?;
        file.sync_all().context("Failed to sync temp file")?;
        drop(file);
        fs::set_permissions(&temp_path, Permissions::from_mode(0o644))
            .context("Failed to chmod temp file")?;
        fs::rename(&temp_path, path).context("Failed to replace cache file")?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Read a JSON snapshot; missing, empty or corrupt files count as absent.
pub fn read_file<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No cache found at {path:?}");
            return None;
        }
        Err(e) => {
            warn!("Error opening cache {path:?}: {e}");
            return None;
        }
    };
    if data.is_empty() {
        warn!("Empty cache {path:?}");
        return None;
    }
    match serde_json::from_slice(&data) {
        Ok(value) => {
            debug!("Read cache data {path:?}");
            Some(value)
        }
        Err(e) => {
            warn!("Error reading cache {path:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u32,
        label: String,
    }

    #[test]
    fn hash_is_stable_and_sized() {
        let a = hash_string("Alpha-0", 20);
        let b = hash_string("Alpha-0", 20);
        let c = hash_string("Alpha-1", 20);
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn store_paths_are_per_topology() {
        let store = CacheStore::new(Some(PathBuf::from("/var/cache/retile")), "DP-1-1-0-0-1-1");
        let path = store.client_path("Alpha", 0).unwrap();
        assert!(path.starts_with("/var/cache/retile/workplaces/DP-1-1-0-0-1-1/clients/Alpha"));
        assert!(path.to_string_lossy().ends_with(".json"));

        let other = CacheStore::new(Some(PathBuf::from("/var/cache/retile")), "HDMI-2-9-0-0-1-1");
        assert_ne!(path, other.client_path("Alpha", 0).unwrap());

        let disabled = CacheStore::new(None, "DP-1");
        assert!(disabled.disabled());
        assert!(disabled.client_path("Alpha", 0).is_none());
        assert!(disabled.workspace_path(Location::new(0, 0)).is_none());
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("nested").join("sample.json");

        let sample = Sample { value: 7, label: "seven".into() };
        let data = serde_json::to_vec_pretty(&sample).unwrap();
        write_file(&path, &data).unwrap();

        let read: Sample = read_file(&path).unwrap();
        assert_eq!(read, sample);

        // No temp leftovers next to the target
        let siblings: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn read_tolerates_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(read_file::<Sample>(&missing).is_none());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, b"{not json").unwrap();
        assert!(read_file::<Sample>(&corrupt).is_none());

        let empty = dir.path().join("empty.json");
        fs::write(&empty, b"").unwrap();
        assert!(read_file::<Sample>(&empty).is_none());
    }
}
