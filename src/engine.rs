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

//! Hook engine front door - wires store, cache, watcher and dispatcher.

use crate::cache::ScriptCache;
use crate::config::{ConfigError, HookEngineConfig};
use crate::dispatcher::{DispatchReport, HookDispatcher};
use crate::events::HookInstance;
use crate::resolver::ModuleRegistry;
use crate::sandbox::{ProcessInfo, SandboxRunner};
use crate::store::{DirectoryStore, ScriptStore};
use crate::watcher::{ScriptWatcher, WatchError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the invalidation channel; keys are tiny and a lagged receiver
/// clears the cache anyway.
const INVALIDATION_CHANNEL_CAPACITY: usize = 64;

/// Errors raised while assembling the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("watcher error: {0}")]
    Watch(#[from] WatchError),
}

/// Assembled hook engine.
///
/// Owns the invalidation channel, the script cache, the optional filesystem
/// watcher, and the dispatcher. Must be constructed inside a tokio runtime.
pub struct HookEngine {
    config: HookEngineConfig,
    dispatcher: HookDispatcher,
    invalidations: broadcast::Sender<String>,
    _watcher: Option<ScriptWatcher>,
}

impl HookEngine {
    /// Build an engine over a filesystem store rooted at the configured data
    /// directory, with a watcher when `config.watch` is set and the data
    /// directory exists.
    pub fn new(
        config: HookEngineConfig,
        registry: Arc<ModuleRegistry>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let store = Arc::new(DirectoryStore::new(config.data_dir.clone()));
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);

        let watcher = if config.watch {
            if config.data_dir.is_dir() {
                Some(ScriptWatcher::spawn(
                    &config.data_dir,
                    invalidations.clone(),
                )?)
            } else {
                tracing::warn!(
                    data_dir = %config.data_dir.display(),
                    "data directory does not exist, hook hot reload is disabled"
                );
                None
            }
        } else {
            None
        };

        Ok(Self::assemble(config, store, registry, invalidations, watcher))
    }

    /// Build an engine over an explicit store, without a watcher. Intended
    /// for embedding and tests; invalidation keys can still be published via
    /// [`HookEngine::invalidations`].
    pub fn with_store(
        config: HookEngineConfig,
        store: Arc<dyn ScriptStore>,
        registry: Arc<ModuleRegistry>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Ok(Self::assemble(config, store, registry, invalidations, None))
    }

    fn assemble(
        config: HookEngineConfig,
        store: Arc<dyn ScriptStore>,
        registry: Arc<ModuleRegistry>,
        invalidations: broadcast::Sender<String>,
        watcher: Option<ScriptWatcher>,
    ) -> Self {
        let data_root: PathBuf = store.root().to_path_buf();
        let cache = Arc::new(ScriptCache::new(store, invalidations.subscribe()));
        let runner = SandboxRunner::new(ProcessInfo::from_env());
        let dispatcher = HookDispatcher::new(cache, runner, registry, data_root);
        Self {
            config,
            dispatcher,
            invalidations,
            _watcher: watcher,
        }
    }

    /// Dispatch one hook occurrence.
    ///
    /// An instance without an explicit budget picks up the configured timeout
    /// for its kind; an explicit override always wins, even when it equals
    /// the default.
    pub async fn execute_hook(&self, instance: HookInstance) -> DispatchReport {
        let instance = if instance.timeout_override().is_some() {
            instance
        } else {
            let configured = self.config.timeout_for(instance.kind());
            instance.with_timeout(configured)
        };
        self.dispatcher.execute_hook(instance).await
    }

    /// Sender half of the invalidation channel, for publishing keys from
    /// other storage layers.
    pub fn invalidations(&self) -> broadcast::Sender<String> {
        self.invalidations.clone()
    }

    /// The underlying dispatcher.
    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.dispatcher
    }

    /// The engine configuration.
    pub fn config(&self) -> &HookEngineConfig {
        &self.config
    }
}
