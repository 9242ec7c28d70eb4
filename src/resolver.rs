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

//! Capability-scoped module resolution for hook scripts.
//!
//! A hook placed in a sub-folder named after a loaded extension module may
//! import code bundled with that module. Resolution is limited to an explicit
//! ordered list of lookup roots; anything else falls through to the engine's
//! default file resolution.

use crate::SCRIPT_EXTENSION;
use parking_lot::RwLock;
use rhai::module_resolvers::FileModuleResolver;
use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Shared};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Process-wide mapping from extension-module name to its root directory.
///
/// Populated by the host at startup; read-only from the resolver's
/// perspective.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, PathBuf>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loaded extension module and its root directory.
    pub fn register(&self, name: impl Into<String>, root: impl Into<PathBuf>) {
        self.modules.write().insert(name.into(), root.into());
    }

    /// Root directory of a registered module, if any.
    pub fn root_of(&self, name: &str) -> Option<PathBuf> {
        self.modules.read().get(name).cloned()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    /// Whether no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

/// Ordered lookup roots for one script execution.
#[derive(Debug, Clone)]
pub struct LookupContext {
    roots: Vec<PathBuf>,
}

impl LookupContext {
    /// Build the lookup context for a script.
    ///
    /// `script_dir` is the absolute directory containing the script and
    /// `hook_folder` the hook-kind folder name. The first path segment after
    /// the folder segment is the candidate module name; when it matches a
    /// registered module, that module's root is consulted first.
    pub fn for_script(script_dir: &Path, hook_folder: &str, registry: &ModuleRegistry) -> Self {
        let mut roots = vec![script_dir.to_path_buf()];
        if let Some(candidate) = candidate_module_name(script_dir, hook_folder) {
            if let Some(module_root) = registry.root_of(&candidate) {
                roots.insert(0, module_root);
            }
        }
        Self { roots }
    }

    /// The candidate roots, highest priority first.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

// The segments after (and excluding) the hook-folder segment; the first one
// names the module the script may reach into.
fn candidate_module_name(script_dir: &Path, hook_folder: &str) -> Option<String> {
    let mut components = script_dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy());
    while let Some(segment) = components.next() {
        if segment == hook_folder {
            return components.next().map(|s| s.into_owned());
        }
    }
    None
}

/// Rhai module resolver that consults the lookup roots in order.
///
/// The first root containing `<name>.rhai` wins; references matching no root
/// fall through to default file resolution relative to the working directory.
pub struct LookupResolver {
    roots: Vec<PathBuf>,
    resolvers: Vec<FileModuleResolver>,
    fallthrough: FileModuleResolver,
}

impl LookupResolver {
    pub fn new(context: &LookupContext) -> Self {
        let roots = context.roots().to_vec();
        let resolvers = roots
            .iter()
            .map(|root| FileModuleResolver::new_with_path(root.clone()))
            .collect();
        Self {
            roots,
            resolvers,
            fallthrough: FileModuleResolver::new(),
        }
    }
}

impl ModuleResolver for LookupResolver {
    fn resolve(
        &self,
        engine: &Engine,
        source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        for (root, resolver) in self.roots.iter().zip(&self.resolvers) {
            if root.join(format!("{path}.{SCRIPT_EXTENSION}")).is_file() {
                return resolver.resolve(engine, source, path, pos);
            }
        }
        self.fallthrough.resolve(engine, source, path, pos)
    }
}
