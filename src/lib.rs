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

//! Botforge Lifecycle Hook Engine
//!
//! Executes operator-authored scripts in response to server lifecycle events:
//! server start, bot mount/unmount, incoming message middleware, session
//! timeout, and suggestion election. Scripts live under `hooks/<folder>` in
//! the configured data directory, one folder per event kind.
//!
//! # Architecture
//!
//! - **Script store** ([`ScriptStore`]): lists and reads script files; the
//!   crate ships a filesystem driver and an in-memory test double.
//! - **Script cache** ([`ScriptCache`]): folder -> loaded script snapshot,
//!   cleared wholesale when an invalidation key touches the hooks tree.
//! - **Module resolver** ([`ModuleRegistry`], [`LookupContext`]): per-script
//!   lookup roots so a hook can import code bundled with an extension module
//!   sharing its folder name, without arbitrary filesystem access.
//! - **Sandbox runner** ([`SandboxRunner`]): runs each script in a fresh,
//!   capability-limited Rhai engine with a hard wall-clock deadline.
//! - **Hook dispatcher** ([`HookDispatcher`]): orders scripts by filename,
//!   runs them sequentially, contains failures, and never fails itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use botforge_hooks::{HookEngine, HookEngineConfig, HookInstance, ModuleRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = HookEngineConfig::default();
//!     let registry = Arc::new(ModuleRegistry::new());
//!     let engine = HookEngine::new(config, registry).unwrap();
//!
//!     let report = engine
//!         .execute_hook(HookInstance::after_bot_mount("bot1"))
//!         .await;
//!     assert!(report.all_successful());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod resolver;
pub mod sandbox;
pub mod store;
pub mod watcher;

// Re-exports
pub use cache::{ScriptCache, ScriptRecord};
pub use config::{ConfigError, HookEngineConfig};
pub use dispatcher::{DispatchReport, HookDispatcher, ScriptOutcome};
pub use engine::{EngineError, HookEngine};
pub use events::{HookInstance, HookKind, DEFAULT_HOOK_TIMEOUT_MS};
pub use resolver::{LookupContext, LookupResolver, ModuleRegistry};
pub use sandbox::{ProcessInfo, SandboxRunner, ScriptError};
pub use store::{DirectoryStore, MemoryStore, ScriptStore, StoreError};
pub use watcher::{ScriptWatcher, WatchError};

/// Directory under the data root that holds one sub-folder per hook kind.
pub const HOOKS_DIR_NAME: &str = "hooks";

/// File extension of hook scripts and importable script modules.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Listing pattern used when loading a hook folder.
pub const SCRIPT_FILE_PATTERN: &str = "*.rhai";
