//! Shared types between the session core and the kernel
//!
//! These types are used by both:
//! - the native session core (bus client, window manager)
//! - browser consumers (via the generated TypeScript bindings)
//!
//! Serializable with serde for JSON over WebSocket

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub mod topics;

pub use topics::Topic;

// ============================================================================
// Envelope Protocol
// ============================================================================

/// Content type stamped on every envelope built by the session core.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// `meta` key carrying the identity of the application that sent an envelope.
pub const META_IDENTITY: &str = "identity";

/// `meta` key carrying a request-scoped correlation id.
pub const META_CORRELATION_ID: &str = "correlationId";

/// Envelope - unit of exchange on the message bus
///
/// Every request, response and event travelling between the shell and the
/// kernel is wrapped in one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct Envelope {
    /// Unique message ID (ULID)
    pub id: String,

    /// Conversation or event stream (e.g., "vfs:list", "agent.taskgraph.created")
    pub topic: String,

    /// Opaque payload, interpreted only by subscribers
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,

    pub content_type: String,

    pub created_at: DateTime<Utc>,

    /// Cross-cutting context; forwarded untouched by the bus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "Record<string, unknown> | null")]
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Envelope {
    /// Build an envelope with a fresh id and the current timestamp.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            topic: topic.into(),
            payload,
            content_type: CONTENT_TYPE_JSON.to_string(),
            created_at: Utc::now(),
            meta: None,
        }
    }

    /// Serialize `payload` and build an envelope around it.
    pub fn with_payload(
        topic: impl Into<String>,
        payload: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(topic, serde_json::to_value(payload)?))
    }

    /// Parse a wire frame.
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Set a meta entry, replacing any previous value (builder pattern)
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.set_meta(key, value);
        self
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.meta
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.as_ref()?.get(key)?.as_str()
    }

    /// Identity of the sending application, if stamped.
    pub fn identity(&self) -> Option<&str> {
        self.meta_str(META_IDENTITY)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.meta_str(META_CORRELATION_ID)
    }

    /// Set correlation ID (builder pattern)
    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        self.with_meta(META_CORRELATION_ID, serde_json::Value::String(id.into()))
    }
}

// ============================================================================
// Topic Naming
// ============================================================================

/// Success reply topic paired with request topic `topic`.
pub fn response_topic(topic: &str) -> String {
    format!("{topic}:resp")
}

/// Alternate success reply topic used by some kernel services.
pub fn result_topic(topic: &str) -> String {
    format!("{topic}:result")
}

/// Failure reply topic paired with request topic `topic`.
pub fn error_topic(topic: &str) -> String {
    format!("{topic}:error")
}

/// Kind of reply a topic represents relative to a request topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Success,
    Failure,
}

/// Split a reply topic into its request topic and reply kind.
///
/// `"vfs:list:resp"` → `("vfs:list", Success)`. Returns `None` for topics that
/// follow no reply convention.
pub fn split_reply_topic(topic: &str) -> Option<(&str, ReplyKind)> {
    if let Some(request) = topic.strip_suffix(":resp") {
        return Some((request, ReplyKind::Success));
    }
    if let Some(request) = topic.strip_suffix(":result") {
        return Some((request, ReplyKind::Success));
    }
    topic
        .strip_suffix(":error")
        .map(|request| (request, ReplyKind::Failure))
}

/// Check whether `topic` matches `pattern`.
/// Supports wildcards: "agent.taskgraph.*" matches "agent.taskgraph.created";
/// "*" matches everything.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    match pattern.strip_suffix(".*") {
        Some(prefix) => {
            topic.starts_with(prefix)
                && (topic.len() == prefix.len() || topic[prefix.len()..].starts_with('.'))
        }
        None => topic == pattern,
    }
}

/// Whether `pattern` uses wildcard syntax.
pub fn is_topic_pattern(pattern: &str) -> bool {
    pattern == "*" || pattern.ends_with(".*")
}

// ============================================================================
// Connection State
// ============================================================================

/// Lifecycle of the bus client's physical connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "session.ts")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect budget exhausted; needs an explicit reconnect
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Window State
// ============================================================================

/// Window identifier, monotonically assigned per session
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, TS,
)]
#[ts(export, export_to = "session.ts")]
pub struct WindowId(pub u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export, export_to = "session.ts")]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export, export_to = "session.ts")]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// Window bounds saved while a window is maximized
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "session.ts")]
pub struct Bounds {
    pub position: Position,
    pub size: Size,
}

/// One running application window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct WindowInstance {
    pub id: WindowId,
    pub app_id: String, // "file-explorer", "terminal", "mail", etc.
    pub position: Position,
    pub size: Size,
    pub z_index: u32,
    pub is_minimized: bool,
    pub is_maximized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<Bounds>,
    #[ts(type = "unknown")]
    pub props: serde_json::Value, // App-specific data, never persisted
    pub is_dirty: bool,
}

impl WindowInstance {
    pub fn bounds(&self) -> Bounds {
        Bounds {
            position: self.position,
            size: self.size,
        }
    }

    /// Minimized windows are not visible.
    pub fn is_visible(&self) -> bool {
        !self.is_minimized
    }
}

/// Persisted subset of a window (no props, no dirty flag)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct PersistedWindow {
    pub id: WindowId,
    pub app_id: String,
    pub position: Position,
    pub size: Size,
    pub z_index: u32,
    pub is_minimized: bool,
    pub is_maximized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<Bounds>,
}

impl From<&WindowInstance> for PersistedWindow {
    fn from(window: &WindowInstance) -> Self {
        Self {
            id: window.id,
            app_id: window.app_id.clone(),
            position: window.position,
            size: window.size,
            z_index: window.z_index,
            is_minimized: window.is_minimized,
            is_maximized: window.is_maximized,
            previous_state: window.previous_state,
        }
    }
}

/// Layout that survives a session, keyed externally by principal.
///
/// Serialized as a plain ordered list of [`PersistedWindow`] records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, TS)]
#[ts(export, export_to = "session.ts")]
pub struct WorkspaceSnapshot(pub Vec<PersistedWindow>);

impl WorkspaceSnapshot {
    pub fn records(&self) -> &[PersistedWindow] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Read-only view of the desktop handed to the shell
#[derive(Debug, Clone, Serialize, Deserialize, Default, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct DesktopView {
    /// Windows in collection (open) order
    pub windows: Vec<WindowInstance>,
    pub focused: Option<WindowId>,
    pub apps: Vec<AppDefinition>,
}

/// App definition for the application registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "session.ts")]
pub struct AppDefinition {
    pub id: String,
    pub name: String,
    pub icon: String,      // emoji or SVG
    pub component: String, // renderable component name, resolved by the UI
    pub default_width: i32,
    pub default_height: i32,
}

impl AppDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        icon: impl Into<String>,
        component: impl Into<String>,
        default_size: Size,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: icon.into(),
            component: component.into(),
            default_width: default_size.width,
            default_height: default_size.height,
        }
    }

    pub fn default_size(&self) -> Size {
        Size::new(self.default_width, self.default_height)
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Built-in application ids
pub const APP_FILE_EXPLORER: &str = "file-explorer";
pub const APP_EDITOR: &str = "editor";
pub const APP_TERMINAL: &str = "terminal";
pub const APP_MAIL: &str = "mail";
pub const APP_BROWSER: &str = "browser";
pub const APP_SETTINGS: &str = "settings";

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_ids_are_unique() {
        let a = Envelope::new("vfs:list", json!({}));
        let b = Envelope::new("vfs:list", json!({}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 26); // ULID length
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new("vfs:list", json!({"path": "/x"}))
            .with_meta(META_IDENTITY, json!("file-explorer"));

        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["topic"], "vfs:list");
        assert_eq!(value["payload"]["path"], "/x");
        assert_eq!(value["contentType"], CONTENT_TYPE_JSON);
        assert!(value["createdAt"].as_str().unwrap().contains('T'));
        assert_eq!(value["meta"]["identity"], "file-explorer");
    }

    #[test]
    fn test_envelope_without_meta_omits_field() {
        let envelope = Envelope::new("agent.taskgraph.created", json!(null));
        let json = envelope.to_json().unwrap();
        assert!(!json.contains("meta"));
    }

    #[test]
    fn test_envelope_parses_frame_without_meta() {
        let frame = r#"{
            "id": "01HZX3J8W4Q9ZB2K0T5V6N7M8P",
            "topic": "vfs:list:resp",
            "payload": {"path": "/x", "entries": []},
            "contentType": "application/json",
            "createdAt": "2025-01-02T03:04:05Z"
        }"#;

        let envelope = Envelope::from_json(frame).unwrap();
        assert_eq!(envelope.topic, "vfs:list:resp");
        assert!(envelope.meta.is_none());
        assert!(envelope.identity().is_none());
    }

    #[test]
    fn test_envelope_rejects_frame_missing_topic() {
        let frame = r#"{"id": "1", "payload": {}, "contentType": "x", "createdAt": "2025-01-02T03:04:05Z"}"#;
        assert!(Envelope::from_json(frame).is_err());
    }

    #[test]
    fn test_correlation_id_roundtrip_through_meta() {
        let envelope = Envelope::new("vfs:list", json!({})).with_correlation_id("corr-1");
        assert_eq!(envelope.correlation_id(), Some("corr-1"));
        assert_eq!(envelope.meta.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_topic_matches_patterns() {
        assert!(topic_matches("*", "anything"));
        assert!(topic_matches("agent.taskgraph.*", "agent.taskgraph.created"));
        assert!(topic_matches("agent.taskgraph.*", "agent.taskgraph"));
        assert!(!topic_matches("agent.taskgraph.*", "agent.taskgraphs"));
        assert!(!topic_matches("vfs:list", "vfs:list:resp"));
        assert!(topic_matches("vfs:list", "vfs:list"));
    }

    #[test]
    fn test_reply_topics() {
        assert_eq!(response_topic("vfs:list"), "vfs:list:resp");
        assert_eq!(error_topic("vfs:list"), "vfs:list:error");
        assert_eq!(result_topic("vfs:list"), "vfs:list:result");
        assert_eq!(
            split_reply_topic("vfs:list:result"),
            Some(("vfs:list", ReplyKind::Success))
        );
        assert_eq!(
            split_reply_topic("vfs:list:error"),
            Some(("vfs:list", ReplyKind::Failure))
        );
        assert_eq!(split_reply_topic("agent.taskgraph.created"), None);
    }

    #[test]
    fn test_connection_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }

    #[test]
    fn test_snapshot_serializes_as_record_list() {
        let snapshot = WorkspaceSnapshot(vec![PersistedWindow {
            id: WindowId(3),
            app_id: APP_TERMINAL.to_string(),
            position: Position::new(10, 20),
            size: Size::new(640, 480),
            z_index: 7,
            is_minimized: false,
            is_maximized: false,
            previous_state: None,
        }]);

        let value = serde_json::to_value(&snapshot).unwrap();
        let records = value.as_array().expect("snapshot is a list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], 3);
        assert_eq!(records[0]["appId"], "terminal");
        assert_eq!(records[0]["zIndex"], 7);
        assert!(records[0].get("previousState").is_none());
        assert!(records[0].get("props").is_none());
    }

    #[test]
    fn test_persisted_window_drops_transient_fields() {
        let window = WindowInstance {
            id: WindowId(1),
            app_id: APP_EDITOR.to_string(),
            position: Position::new(1, 2),
            size: Size::new(3, 4),
            z_index: 5,
            is_minimized: true,
            is_maximized: false,
            previous_state: None,
            props: json!({"file": "/notes.md"}),
            is_dirty: true,
        };

        let persisted = PersistedWindow::from(&window);
        let value = serde_json::to_value(&persisted).unwrap();
        assert!(value.get("props").is_none());
        assert!(value.get("isDirty").is_none());
        assert_eq!(value["isMinimized"], true);
    }
}
