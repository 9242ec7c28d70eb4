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

//! End-to-end hook dispatch against a real data directory.

use botforge_hooks::{
    HookEngine, HookEngineConfig, HookInstance, ModuleRegistry, ScriptError,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

fn write_script(dir: &Path, name: &str, source: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), source).unwrap();
}

#[derive(Debug, Clone)]
struct CapturedLog {
    level: Level,
    bot_id: Option<String>,
    message: String,
}

/// Layer collecting warn and error events for assertions.
#[derive(Clone, Default)]
struct LogCapture {
    events: Arc<Mutex<Vec<CapturedLog>>>,
}

impl LogCapture {
    fn errors(&self) -> Vec<CapturedLog> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == Level::ERROR)
            .cloned()
            .collect()
    }

    fn warnings(&self) -> Vec<CapturedLog> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == Level::WARN)
            .cloned()
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }
        let mut fields = LogFields::default();
        event.record(&mut fields);
        self.events.lock().unwrap().push(CapturedLog {
            level,
            bot_id: fields.bot_id,
            message: fields.message,
        });
    }
}

#[derive(Default)]
struct LogFields {
    bot_id: Option<String>,
    message: String,
}

impl Visit for LogFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "bot_id" => self.bot_id = Some(format!("{value:?}")),
            "message" => self.message = format!("{value:?}"),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "bot_id" => self.bot_id = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            _ => {}
        }
    }
}

fn engine_over(data_dir: &Path, registry: Arc<ModuleRegistry>) -> HookEngine {
    let config = HookEngineConfig {
        data_dir: data_dir.to_path_buf(),
        watch: false,
        ..Default::default()
    };
    HookEngine::new(config, registry).unwrap()
}

#[tokio::test]
async fn failing_script_is_attributed_and_contained() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("hooks/after_bot_mount");
    write_script(&folder, "00_log.rhai", r#"throw "log hook is broken";"#);
    write_script(&folder, "01_init.rhai", r#"print("mounting " + botId);"#);

    let engine = engine_over(dir.path(), Arc::new(ModuleRegistry::new()));
    let report = engine
        .execute_hook(HookInstance::after_bot_mount("bot1"))
        .await;

    // Ascending filename order, both attempted, one failure.
    let order: Vec<&str> = report.outcomes.iter().map(|o| o.filename.as_str()).collect();
    assert_eq!(order, vec!["00_log.rhai", "01_init.rhai"]);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.success_count, 1);

    let failed = &report.outcomes[0];
    assert!(matches!(failed.result, Err(ScriptError::Runtime(_))));
    assert_eq!(failed.bot_id.as_deref(), Some("bot1"));
    assert!(report.outcomes[1].result.is_ok());
}

#[tokio::test]
async fn failing_script_emits_one_attributed_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("hooks/after_bot_mount");
    write_script(&folder, "00_log.rhai", r#"throw "log hook is broken";"#);
    write_script(&folder, "01_init.rhai", "let x = 1;");

    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let engine = engine_over(dir.path(), Arc::new(ModuleRegistry::new()));
    let report = engine
        .execute_hook(HookInstance::after_bot_mount("bot1"))
        .await;
    assert_eq!(report.failure_count, 1);

    // Exactly one error event, carrying the bot the occurrence belongs to.
    let errors = capture.errors();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].bot_id.as_deref(), Some("bot1"));
    assert!(errors[0].message.contains("hook script failed"));
}

#[tokio::test]
async fn missing_data_dir_with_watch_enabled_warns() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let config = HookEngineConfig {
        data_dir: Path::new("/nonexistent/botforge-data").to_path_buf(),
        watch: true,
        ..Default::default()
    };
    let _engine = HookEngine::new(config, Arc::new(ModuleRegistry::new())).unwrap();

    let warnings = capture.warnings();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].message.contains("hot reload is disabled"));
}

#[tokio::test]
async fn hidden_scripts_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("hooks/after_server_start");
    write_script(&folder, "00_boot.rhai", "let x = 1;");
    write_script(&folder, ".99_disabled.rhai", r#"throw "should never run";"#);

    let engine = engine_over(dir.path(), Arc::new(ModuleRegistry::new()));
    let report = engine
        .execute_hook(HookInstance::after_server_start())
        .await;

    assert_eq!(report.outcomes.len(), 1);
    assert!(report.all_successful());
}

#[tokio::test]
async fn hook_imports_code_bundled_with_its_extension_module() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("modules/extlib");
    std::fs::create_dir_all(&module_dir).unwrap();
    std::fs::write(module_dir.join("helper.rhai"), "fn double(x) { x * 2 }").unwrap();

    let folder = dir.path().join("hooks/after_bot_mount/extlib");
    write_script(
        &folder,
        "00_use.rhai",
        r#"import "helper" as helper;
if helper::double(21) != 42 { throw "helper not resolved" }"#,
    );

    let registry = Arc::new(ModuleRegistry::new());
    registry.register("extlib", &module_dir);

    let engine = engine_over(dir.path(), registry);
    let report = engine
        .execute_hook(HookInstance::after_bot_mount("bot1"))
        .await;
    assert!(report.all_successful(), "{:?}", report.outcomes);
}

#[tokio::test]
async fn invalidation_forces_reload_of_every_folder() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("hooks/after_bot_mount");
    write_script(&folder, "00_a.rhai", "let a = 1;");

    let engine = engine_over(dir.path(), Arc::new(ModuleRegistry::new()));

    let report = engine
        .execute_hook(HookInstance::after_bot_mount("bot1"))
        .await;
    assert_eq!(report.outcomes.len(), 1);

    // New script lands after the folder was cached.
    write_script(&folder, "01_b.rhai", "let b = 2;");
    let report = engine
        .execute_hook(HookInstance::after_bot_mount("bot1"))
        .await;
    assert_eq!(report.outcomes.len(), 1, "cached snapshot must be reused");

    engine
        .invalidations()
        .send(folder.join("01_b.rhai").to_string_lossy().into_owned())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = engine
        .execute_hook(HookInstance::after_bot_mount("bot1"))
        .await;
    assert_eq!(report.outcomes.len(), 2);
}

#[tokio::test]
async fn watcher_invalidates_on_file_change() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("hooks/after_bot_mount");
    write_script(&folder, "00_a.rhai", "let a = 1;");

    let config = HookEngineConfig {
        data_dir: dir.path().to_path_buf(),
        watch: true,
        ..Default::default()
    };
    let engine = HookEngine::new(config, Arc::new(ModuleRegistry::new())).unwrap();

    let report = engine
        .execute_hook(HookInstance::after_bot_mount("bot1"))
        .await;
    assert_eq!(report.outcomes.len(), 1);

    write_script(&folder, "01_b.rhai", "let b = 2;");

    // The watcher publishes asynchronously; poll until the reload shows up.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = engine
            .execute_hook(HookInstance::after_bot_mount("bot1"))
            .await;
        if report.outcomes.len() == 2 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "watcher never invalidated the cache"
        );
    }
}
