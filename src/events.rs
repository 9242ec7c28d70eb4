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

//! Hook kinds and per-occurrence hook instances.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Default per-script execution budget, in milliseconds.
pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 1000;

/// Lifecycle event types that can trigger operator hooks.
///
/// Each kind is bound to a fixed folder name under the hooks directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    AfterServerStart,
    AfterBotMount,
    AfterBotUnmount,
    BeforeIncomingMiddleware,
    AfterIncomingMiddleware,
    BeforeSessionTimeout,
    BeforeSuggestionsElection,
}

impl HookKind {
    /// All hook kinds, in lifecycle order.
    pub const ALL: [HookKind; 7] = [
        HookKind::AfterServerStart,
        HookKind::AfterBotMount,
        HookKind::AfterBotUnmount,
        HookKind::BeforeIncomingMiddleware,
        HookKind::AfterIncomingMiddleware,
        HookKind::BeforeSessionTimeout,
        HookKind::BeforeSuggestionsElection,
    ];

    /// Folder name under the hooks directory for this kind.
    pub fn folder(self) -> &'static str {
        match self {
            HookKind::AfterServerStart => "after_server_start",
            HookKind::AfterBotMount => "after_bot_mount",
            HookKind::AfterBotUnmount => "after_bot_unmount",
            HookKind::BeforeIncomingMiddleware => "before_incoming_middleware",
            HookKind::AfterIncomingMiddleware => "after_incoming_middleware",
            HookKind::BeforeSessionTimeout => "before_session_timeout",
            HookKind::BeforeSuggestionsElection => "before_suggestions_election",
        }
    }

    /// Default execution budget for scripts of this kind.
    pub fn default_timeout(self) -> Duration {
        Duration::from_millis(DEFAULT_HOOK_TIMEOUT_MS)
    }
}

/// One concrete hook occurrence.
///
/// Carries the payload exposed to every script of the occurrence as top-level
/// bindings, plus the per-script execution budget. Immutable once built; the
/// dispatcher invocation that created it is its sole owner.
#[derive(Debug, Clone)]
pub struct HookInstance {
    kind: HookKind,
    payload: Map<String, Value>,
    timeout: Option<Duration>,
}

impl HookInstance {
    fn with_kind(kind: HookKind) -> Self {
        Self {
            kind,
            payload: Map::new(),
            timeout: None,
        }
    }

    /// Server finished booting.
    pub fn after_server_start() -> Self {
        Self::with_kind(HookKind::AfterServerStart)
    }

    /// A bot was mounted. Payload: `botId`.
    pub fn after_bot_mount(bot_id: impl Into<String>) -> Self {
        Self::with_kind(HookKind::AfterBotMount).with_context("botId", Value::String(bot_id.into()))
    }

    /// A bot was unmounted. Payload: `botId`.
    pub fn after_bot_unmount(bot_id: impl Into<String>) -> Self {
        Self::with_kind(HookKind::AfterBotUnmount)
            .with_context("botId", Value::String(bot_id.into()))
    }

    /// An incoming event is about to enter the middleware chain. Payload: `event`.
    pub fn before_incoming_middleware(event: Value) -> Self {
        Self::with_kind(HookKind::BeforeIncomingMiddleware).with_context("event", event)
    }

    /// An incoming event left the middleware chain. Payload: `event`.
    pub fn after_incoming_middleware(event: Value) -> Self {
        Self::with_kind(HookKind::AfterIncomingMiddleware).with_context("event", event)
    }

    /// A dialog session is about to time out. Payload: `event`.
    pub fn before_session_timeout(event: Value) -> Self {
        Self::with_kind(HookKind::BeforeSessionTimeout).with_context("event", event)
    }

    /// Suggestions are about to be elected. Payload: `sessionId`, `event`, `suggestions`.
    pub fn before_suggestions_election(
        session_id: impl Into<String>,
        event: Value,
        suggestions: Vec<Value>,
    ) -> Self {
        Self::with_kind(HookKind::BeforeSuggestionsElection)
            .with_context("sessionId", Value::String(session_id.into()))
            .with_context("event", event)
            .with_context("suggestions", Value::Array(suggestions))
    }

    /// Add a named context value to the payload.
    ///
    /// Every payload field becomes a top-level binding inside the sandbox.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Override the per-script execution budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The lifecycle event kind of this occurrence.
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// The context values exposed to scripts.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// The per-script execution budget, resolved against the kind default.
    pub fn timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| self.kind.default_timeout())
    }

    /// The explicit budget override, if one was set.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}
