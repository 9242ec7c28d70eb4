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

//! Script cache with broadcast invalidation.

use crate::store::{ScriptStore, StoreError};
use crate::{HOOKS_DIR_NAME, SCRIPT_FILE_PATTERN};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Immutable snapshot of one loaded script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecord {
    /// Path relative to the hook folder, `/`-separated.
    pub relative_path: String,
    /// Basename, used for dispatch ordering.
    pub filename: String,
    /// Script source text captured at load time.
    pub source: String,
}

/// Cache of loaded hook scripts, keyed by hook folder name.
///
/// Entries are created lazily on first access and discarded wholesale when an
/// invalidation key touches the hooks tree. A listener task subscribed to the
/// invalidation channel runs for the cache's lifetime and is aborted on drop.
///
/// Concurrent first accesses to the same uncached folder may load redundantly
/// from the store; each load publishes a complete snapshot, so readers never
/// observe a partial entry.
pub struct ScriptCache {
    store: Arc<dyn ScriptStore>,
    entries: Arc<DashMap<String, Arc<Vec<ScriptRecord>>>>,
    listener: JoinHandle<()>,
}

impl ScriptCache {
    /// Create a cache over `store`, subscribed to `invalidation_rx`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn ScriptStore>, invalidation_rx: broadcast::Receiver<String>) -> Self {
        let entries: Arc<DashMap<String, Arc<Vec<ScriptRecord>>>> = Arc::new(DashMap::new());
        let listener = tokio::spawn(Self::invalidation_loop(entries.clone(), invalidation_rx));
        Self {
            store,
            entries,
            listener,
        }
    }

    /// Any invalidation key containing this marker clears the whole cache.
    fn hooks_marker() -> String {
        format!("/{HOOKS_DIR_NAME}/")
    }

    async fn invalidation_loop(
        entries: Arc<DashMap<String, Arc<Vec<ScriptRecord>>>>,
        mut invalidation_rx: broadcast::Receiver<String>,
    ) {
        let marker = Self::hooks_marker();
        loop {
            match invalidation_rx.recv().await {
                Ok(key) => {
                    if key.to_ascii_lowercase().contains(&marker) {
                        tracing::debug!(key = %key, "invalidation touched hooks tree, clearing script cache");
                        entries.clear();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Missed keys may have touched the hooks tree.
                    tracing::warn!(missed, "invalidation receiver lagged, clearing script cache");
                    entries.clear();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Get the loaded scripts for a hook folder.
    ///
    /// On a miss the folder is loaded from the store. If the store fails, the
    /// entry is left absent and an empty snapshot is returned for this call
    /// only; the next call retries the load. Order within the snapshot is not
    /// guaranteed.
    pub async fn scripts_for(&self, folder: &str) -> Arc<Vec<ScriptRecord>> {
        if let Some(entry) = self.entries.get(folder) {
            return entry.clone();
        }

        match self.load(folder).await {
            Ok(records) => {
                let records = Arc::new(records);
                self.entries.insert(folder.to_string(), records.clone());
                records
            }
            Err(err) => {
                tracing::warn!(folder, error = %err, "failed to load hook scripts, treating folder as empty");
                self.entries.remove(folder);
                Arc::new(Vec::new())
            }
        }
    }

    async fn load(&self, folder: &str) -> Result<Vec<ScriptRecord>, StoreError> {
        let folder_path = format!("{HOOKS_DIR_NAME}/{folder}");
        let files = self
            .store
            .list_files(&folder_path, SCRIPT_FILE_PATTERN)
            .await?;

        let mut records = Vec::with_capacity(files.len());
        for relative_path in files {
            let filename = relative_path
                .rsplit(|c: char| c == '/' || c == '\\')
                .next()
                .unwrap_or(&relative_path)
                .to_string();
            // Dot-prefixed scripts are disabled.
            if filename.starts_with('.') {
                continue;
            }
            let source = self.store.read_file(&folder_path, &relative_path).await?;
            records.push(ScriptRecord {
                relative_path,
                filename,
                source,
            });
        }
        Ok(records)
    }

    /// Discard every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached folders.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for ScriptCache {
    fn drop(&mut self) {
        // Deregister from the invalidation channel.
        self.listener.abort();
    }
}
