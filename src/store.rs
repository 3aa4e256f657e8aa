//! Per-node persistence of keypoints, descriptors and 3-D points.
//!
//! One JSON file per node, inside a scratch directory created under the
//! configured base path with a process-unique suffix. The directory is
//! scoped to the owning engine: it is created empty at init and removed at
//! teardown (with `Drop` as a backstop for error paths).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::features::FeatureSet;

/// Distinguishes scratch directories of engines sharing one base path.
static STORE_SEQ: AtomicU64 = AtomicU64::new(0);

/// The record persisted for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNode {
    pub name: String,
    pub features: FeatureSet,
}

/// File-backed node store, exclusively owned by one engine instance.
#[derive(Debug)]
pub struct FeatureStore {
    dir: PathBuf,
}

impl FeatureStore {
    /// Create a fresh scratch directory under `base`. Any leftover directory
    /// with the same name is removed first.
    pub fn create(base: &Path) -> Result<Self> {
        let seq = STORE_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = base.join(format!("nodes_{}_{}", std::process::id(), seq));

        if dir.is_dir() {
            fs::remove_dir_all(&dir).map_err(|source| Error::Directory {
                path: dir.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&dir).map_err(|source| Error::Directory {
            path: dir.clone(),
            source,
        })?;

        debug!(dir = %dir.display(), "created scratch store");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn node_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index}.json"))
    }

    /// Persist one node. Overwrites silently; node indices are assigned by
    /// the engine and never reused.
    pub fn put(&self, index: usize, name: &str, features: &FeatureSet) -> Result<()> {
        let record = StoredNode {
            name: name.to_owned(),
            features: features.clone(),
        };
        let bytes = serde_json::to_vec(&record)?;
        fs::write(self.node_path(index), bytes)?;
        Ok(())
    }

    /// Load one node. `NotFound` if the index was never stored.
    pub fn get(&self, index: usize) -> Result<StoredNode> {
        let path = self.node_path(index);
        if !path.is_file() {
            return Err(Error::NotFound(index));
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.node_path(index).is_file()
    }

    /// Remove the scratch directory. Called by the engine's `finalize`;
    /// errors here surface to the caller, unlike the best-effort `Drop`.
    pub fn remove(self) -> Result<()> {
        let dir = self.dir.clone();
        // Skip the Drop cleanup; remove_dir_all already ran.
        std::mem::forget(self);
        if dir.is_dir() {
            fs::remove_dir_all(&dir).map_err(|source| Error::Directory { path: dir, source })?;
        }
        Ok(())
    }
}

impl Drop for FeatureStore {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}
