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

//! Isolated execution of one hook script.
//!
//! Each run gets a fresh Rhai engine with a minimal capability surface: the
//! occurrence payload as top-level bindings, a restricted `process` object,
//! and `print`/`debug` routed to the log. No filesystem, network, or host
//! state is reachable. A wall-clock deadline is enforced through the engine
//! progress callback; a script that never yields is forcibly terminated.

use crate::resolver::{LookupContext, LookupResolver};
use rhai::serde::to_dynamic;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failure modes of one script execution.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script threw or hit a runtime error.
    #[error("script failed: {0}")]
    Runtime(String),

    /// The script exceeded its wall-clock budget and was terminated.
    #[error("script exceeded its {timeout_ms}ms time budget")]
    Timeout { timeout_ms: u64 },

    /// A payload value could not be injected into the scope.
    #[error("payload could not be injected: {0}")]
    Bindings(String),
}

impl ScriptError {
    /// Whether this failure was a forced timeout termination.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScriptError::Timeout { .. })
    }
}

/// Restricted view of the hosting process exposed to scripts as `process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub host: String,
    pub port: u16,
    pub external_url: String,
    pub env: HashMap<String, String>,
}

impl ProcessInfo {
    /// Build from the `HOST`, `PORT` and `EXTERNAL_URL` variables and the
    /// current process environment.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            external_url: env::var("EXTERNAL_URL").unwrap_or_default(),
            env: env::vars().collect(),
        }
    }
}

impl Default for ProcessInfo {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            external_url: String::new(),
            env: HashMap::new(),
        }
    }
}

const TIMEOUT_TOKEN: &str = "timeout";

/// Runs hook script source text inside an isolated engine.
#[derive(Debug, Clone, Default)]
pub struct SandboxRunner {
    process: ProcessInfo,
}

impl SandboxRunner {
    pub fn new(process: ProcessInfo) -> Self {
        Self { process }
    }

    /// Execute one script.
    ///
    /// `bindings` are spread into the scope as top-level variables; `lookups`
    /// scopes bare module imports. Evaluation happens on the blocking pool so
    /// a busy script cannot stall the async runtime.
    pub async fn run(
        &self,
        source: String,
        lookups: LookupContext,
        bindings: Map<String, Value>,
        timeout: Duration,
    ) -> Result<(), ScriptError> {
        let process = self.process.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            run_blocking(&source, &lookups, bindings, &process, timeout)
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(join_err) => Err(ScriptError::Runtime(format!(
                "script task aborted: {join_err}"
            ))),
        }
    }
}

fn run_blocking(
    source: &str,
    lookups: &LookupContext,
    bindings: Map<String, Value>,
    process: &ProcessInfo,
    timeout: Duration,
) -> Result<(), ScriptError> {
    let mut engine = Engine::new();
    engine.set_module_resolver(LookupResolver::new(lookups));
    engine.on_print(|text| tracing::debug!(target: "hook_script", "{text}"));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "hook_script", source = source.unwrap_or(""), position = %pos, "{text}")
    });

    let deadline = Instant::now() + timeout;
    engine.on_progress(move |_ops| {
        (Instant::now() >= deadline).then(|| Dynamic::from(TIMEOUT_TOKEN.to_string()))
    });

    let mut scope = Scope::new();
    for (name, value) in bindings {
        let value = to_dynamic(&value).map_err(|e| ScriptError::Bindings(e.to_string()))?;
        scope.push_dynamic(name, value);
    }
    let process = to_dynamic(process).map_err(|e| ScriptError::Bindings(e.to_string()))?;
    scope.push_constant_dynamic("process", process);

    engine
        .run_with_scope(&mut scope, source)
        .map_err(|err| match *err {
            EvalAltResult::ErrorTerminated(..) => ScriptError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            _ => ScriptError::Runtime(err.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ModuleRegistry;
    use serde_json::json;
    use std::path::Path;

    fn empty_lookups() -> LookupContext {
        let registry = ModuleRegistry::new();
        LookupContext::for_script(Path::new("/nonexistent"), "after_server_start", &registry)
    }

    fn payload(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_success() {
        let runner = SandboxRunner::default();
        let result = runner
            .run(
                "let x = 1 + 1;".to_string(),
                empty_lookups(),
                Map::new(),
                Duration::from_millis(1000),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_payload_fields_are_top_level_bindings() {
        let runner = SandboxRunner::default();
        let result = runner
            .run(
                r#"if botId != "bot1" { throw "wrong bot" }"#.to_string(),
                empty_lookups(),
                payload(&[("botId", json!("bot1"))]),
                Duration::from_millis(1000),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_nested_payload_access() {
        let runner = SandboxRunner::default();
        let result = runner
            .run(
                r#"if event.botId != "bot1" { throw "wrong bot" }"#.to_string(),
                empty_lookups(),
                payload(&[("event", json!({"botId": "bot1", "type": "text"}))]),
                Duration::from_millis(1000),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_process_object_is_restricted_view() {
        let runner = SandboxRunner::new(ProcessInfo {
            host: "0.0.0.0".to_string(),
            port: 3000,
            external_url: "https://bots.example.com".to_string(),
            env: HashMap::new(),
        });
        let result = runner
            .run(
                r#"if process.port != 3000 { throw "wrong port" }"#.to_string(),
                empty_lookups(),
                Map::new(),
                Duration::from_millis(1000),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_thrown_error_is_runtime() {
        let runner = SandboxRunner::default();
        let result = runner
            .run(
                r#"throw "boom";"#.to_string(),
                empty_lookups(),
                Map::new(),
                Duration::from_millis(1000),
            )
            .await;
        match result {
            Err(ScriptError::Runtime(message)) => assert!(message.contains("boom")),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_busy_loop_is_terminated_as_timeout() {
        let runner = SandboxRunner::default();
        let started = Instant::now();
        let result = runner
            .run(
                "let x = 0; while true { x += 1; }".to_string(),
                empty_lookups(),
                Map::new(),
                Duration::from_millis(100),
            )
            .await;
        match result {
            Err(err) => assert!(err.is_timeout(), "expected timeout, got {err:?}"),
            Ok(()) => panic!("busy loop should not complete"),
        }
        // Termination must land close to the deadline, not eventually.
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_import_resolves_against_lookup_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("extlib.rhai"), "fn double(x) { x * 2 }").unwrap();

        let registry = ModuleRegistry::new();
        let lookups = LookupContext::for_script(dir.path(), "after_bot_mount", &registry);

        let runner = SandboxRunner::default();
        let result = runner
            .run(
                r#"import "extlib" as extlib; if extlib::double(21) != 42 { throw "bad math" }"#
                    .to_string(),
                lookups,
                Map::new(),
                Duration::from_millis(1000),
            )
            .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn test_print_is_captured_not_fatal() {
        let runner = SandboxRunner::default();
        let result = runner
            .run(
                r#"print("hello from hook");"#.to_string(),
                empty_lookups(),
                Map::new(),
                Duration::from_millis(1000),
            )
            .await;
        assert!(result.is_ok());
    }
}
