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

//! Filesystem watcher feeding the cache invalidation channel.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors raised while setting up the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },
}

/// Publishes changed paths under a watched root as opaque invalidation keys.
///
/// The script cache matches keys by substring, so publishing full paths is
/// sufficient; watching stops when the watcher is dropped.
pub struct ScriptWatcher {
    _watcher: RecommendedWatcher,
}

impl ScriptWatcher {
    /// Watch `root` recursively, sending every changed path on `invalidations`.
    pub fn spawn(
        root: &Path,
        invalidations: broadcast::Sender<String>,
    ) -> Result<Self, WatchError> {
        let mut watcher =
            notify::recommended_watcher(move |outcome: Result<Event, notify::Error>| {
                match outcome {
                    Ok(event) => {
                        for path in event.paths {
                            // Receivers may come and go; a send to nobody is fine.
                            let _ = invalidations.send(path.to_string_lossy().into_owned());
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "script watcher error"),
                }
            })
            .map_err(|source| WatchError::Watch {
                path: root.to_path_buf(),
                source,
            })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch {
                path: root.to_path_buf(),
                source,
            })?;

        tracing::debug!(root = %root.display(), "watching hook scripts for changes");
        Ok(Self { _watcher: watcher })
    }
}
