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

//! Hook dispatcher: ordering, sequential execution, failure containment.

use crate::cache::{ScriptCache, ScriptRecord};
use crate::events::{HookInstance, HookKind};
use crate::resolver::{LookupContext, ModuleRegistry};
use crate::sandbox::{SandboxRunner, ScriptError};
use crate::HOOKS_DIR_NAME;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Result of dispatching one hook occurrence.
///
/// `execute_hook` never fails; script failures are recorded here and logged.
#[derive(Debug)]
pub struct DispatchReport {
    /// Hook kind that was dispatched.
    pub kind: HookKind,
    /// Folder the scripts were loaded from.
    pub folder: &'static str,
    /// Per-script outcomes, in execution order.
    pub outcomes: Vec<ScriptOutcome>,
    /// Total dispatch time in microseconds.
    pub total_time_us: u64,
    /// Number of scripts that completed normally.
    pub success_count: usize,
    /// Number of scripts that failed or timed out.
    pub failure_count: usize,
}

impl DispatchReport {
    /// Whether every discovered script completed normally.
    pub fn all_successful(&self) -> bool {
        self.failure_count == 0
    }
}

/// Outcome of one script execution within a dispatch.
#[derive(Debug)]
pub struct ScriptOutcome {
    /// Path relative to the hook folder.
    pub relative_path: String,
    /// Basename used for ordering.
    pub filename: String,
    /// Bot the occurrence was attributed to, if any.
    pub bot_id: Option<String>,
    /// Result of the sandbox run.
    pub result: Result<(), ScriptError>,
    /// Execution time in microseconds.
    pub execution_time_us: u64,
}

/// Orchestrates hook occurrences: cache lookup, ordering, sequential
/// execution, and per-script error containment.
///
/// Scripts within one occurrence run strictly sequentially in ascending
/// filename order; later scripts may depend on side effects of earlier ones.
/// Distinct occurrences may be dispatched concurrently.
pub struct HookDispatcher {
    cache: Arc<ScriptCache>,
    runner: SandboxRunner,
    registry: Arc<ModuleRegistry>,
    data_root: PathBuf,
}

impl HookDispatcher {
    pub fn new(
        cache: Arc<ScriptCache>,
        runner: SandboxRunner,
        registry: Arc<ModuleRegistry>,
        data_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            runner,
            registry,
            data_root: data_root.into(),
        }
    }

    /// Execute every script of the occurrence's folder, exactly once each.
    ///
    /// One cache snapshot is taken for the whole dispatch. A failing script
    /// is logged (attributed to a bot when possible) and never stops its
    /// siblings; a store failure yields a zero-script report. No error of any
    /// kind reaches the caller.
    pub async fn execute_hook(&self, instance: HookInstance) -> DispatchReport {
        let start = Instant::now();
        let kind = instance.kind();
        let folder = kind.folder();

        let snapshot = self.cache.scripts_for(folder).await;

        let mut scripts: Vec<&ScriptRecord> = snapshot.iter().collect();
        scripts.sort_by(|a, b| a.filename.cmp(&b.filename));

        tracing::debug!(
            folder,
            script_count = scripts.len(),
            "dispatching hook occurrence"
        );

        let bot_id = bot_id_of(instance.payload());
        let mut outcomes = Vec::with_capacity(scripts.len());
        let mut success_count = 0;
        let mut failure_count = 0;

        for script in scripts {
            let script_start = Instant::now();
            let lookups = self.lookup_context(folder, &script.relative_path);
            let result = self
                .runner
                .run(
                    script.source.clone(),
                    lookups,
                    instance.payload().clone(),
                    instance.timeout(),
                )
                .await;
            let execution_time_us = script_start.elapsed().as_micros() as u64;

            match &result {
                Ok(()) => {
                    success_count += 1;
                    match &bot_id {
                        Some(bot) => tracing::debug!(
                            bot_id = %bot,
                            script = %script.relative_path,
                            folder,
                            "executed hook script"
                        ),
                        None => tracing::debug!(
                            script = %script.relative_path,
                            folder,
                            "executed hook script"
                        ),
                    }
                }
                Err(err) => {
                    failure_count += 1;
                    match &bot_id {
                        Some(bot) => tracing::error!(
                            bot_id = %bot,
                            script = %script.relative_path,
                            folder,
                            error = %err,
                            "hook script failed"
                        ),
                        None => tracing::error!(
                            script = %script.relative_path,
                            folder,
                            error = %err,
                            "hook script failed"
                        ),
                    }
                }
            }

            outcomes.push(ScriptOutcome {
                relative_path: script.relative_path.clone(),
                filename: script.filename.clone(),
                bot_id: bot_id.clone(),
                result,
                execution_time_us,
            });
        }

        let total_time_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            folder,
            total_time_us,
            success_count,
            failure_count,
            "hook dispatch completed"
        );

        DispatchReport {
            kind,
            folder,
            outcomes,
            total_time_us,
            success_count,
            failure_count,
        }
    }

    fn lookup_context(&self, folder: &str, relative_path: &str) -> LookupContext {
        let mut script_dir = self.data_root.join(HOOKS_DIR_NAME).join(folder);
        if let Some(parent) = Path::new(relative_path).parent() {
            if !parent.as_os_str().is_empty() {
                script_dir.push(parent);
            }
        }
        LookupContext::for_script(&script_dir, folder, &self.registry)
    }
}

// Attribution: the event's bot when present, else a top-level botId (the
// bot mount/unmount payload shape).
fn bot_id_of(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("event")
        .and_then(|event| event.get("botId"))
        .and_then(Value::as_str)
        .or_else(|| payload.get("botId").and_then(Value::as_str))
        .map(str::to_owned)
}
