// Copyright 2025 Botforge (https://github.com/botforge-dev)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Script storage contract and the drivers shipped with the crate.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors surfaced by a script store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("folder not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Source of hook script files.
///
/// `folder_path` arguments are logical paths relative to the store root, e.g.
/// `hooks/after_bot_mount`. Listing returns paths relative to that folder; no
/// ordering is guaranteed.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// List files under `folder_path` whose basename matches `pattern`.
    async fn list_files(
        &self,
        folder_path: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Read the contents of one file under `folder_path`.
    async fn read_file(
        &self,
        folder_path: &str,
        relative_path: &str,
    ) -> Result<String, StoreError>;

    /// Absolute base directory of this store, used to compute script
    /// locations for module resolution.
    fn root(&self) -> &Path;
}

// Listing patterns are of the `*.ext` form.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == pattern,
    }
}

/// Filesystem-backed script store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ScriptStore for DirectoryStore {
    async fn list_files(
        &self,
        folder_path: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(folder_path);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(folder_path.to_string()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !matches_pattern(&name, pattern) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&dir)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            // Normalize separators so keys are stable across platforms.
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(relative);
        }
        Ok(files)
    }

    async fn read_file(
        &self,
        folder_path: &str,
        relative_path: &str,
    ) -> Result<String, StoreError> {
        let path = self.root.join(folder_path).join(relative_path);
        Ok(tokio::fs::read_to_string(path).await?)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// In-memory script store used by tests.
///
/// Counts listing and read round trips, and can be switched into a failing
/// state to exercise error containment.
pub struct MemoryStore {
    root: PathBuf,
    files: Mutex<HashMap<String, Vec<(String, String)>>>,
    list_calls: AtomicUsize,
    read_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/memory"),
            files: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Add a script file under a logical folder path.
    pub fn insert_script(
        &self,
        folder_path: impl Into<String>,
        relative_path: impl Into<String>,
        source: impl Into<String>,
    ) {
        self.files
            .lock()
            .entry(folder_path.into())
            .or_default()
            .push((relative_path.into(), source.into()));
    }

    /// Make every subsequent call fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `list_files` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `read_file` calls served so far.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated outage".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn list_files(
        &self,
        folder_path: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        let files = self.files.lock();
        let entries = files
            .get(folder_path)
            .ok_or_else(|| StoreError::NotFound(folder_path.to_string()))?;
        Ok(entries
            .iter()
            .filter(|(relative, _)| {
                let name = relative.rsplit('/').next().unwrap_or(relative.as_str());
                matches_pattern(name, pattern)
            })
            .map(|(relative, _)| relative.clone())
            .collect())
    }

    async fn read_file(
        &self,
        folder_path: &str,
        relative_path: &str,
    ) -> Result<String, StoreError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        let files = self.files.lock();
        files
            .get(folder_path)
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|(relative, _)| relative == relative_path)
                    .map(|(_, source)| source.clone())
            })
            .ok_or_else(|| StoreError::NotFound(relative_path.to_string()))
    }

    fn root(&self) -> &Path {
        &self.root
    }
}
