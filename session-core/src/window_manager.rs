//! Window Manager - authoritative window collection for one desktop session
//!
//! Pure, synchronous state machine. The desktop actor owns one instance and
//! serializes every operation through its mailbox; persistence and messaging
//! live outside this module.
//!
//! Invariants:
//! - at most one window per `app_id`
//! - the focused, non-minimized window holds the maximum z-index
//! - `previous_state` is present only while maximized
//! - window ids and z-indices are never reused within a session

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use shared_types::{
    AppDefinition, Bounds, PersistedWindow, Position, Size, WindowId, WindowInstance,
    WorkspaceSnapshot, APP_EDITOR, APP_FILE_EXPLORER,
};

use crate::apps::AppRegistry;

/// Cascade origin for newly opened windows
const CASCADE_ORIGIN: i32 = 100;
/// Offset per already-open window
const CASCADE_STEP: i32 = 30;
/// Cascade wraps back to the origin after this many windows
const CASCADE_WRAP: usize = 10;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Window not found: {0}")]
    WindowNotFound(WindowId),

    #[error("Cannot arrange windows, not open: {}", .missing.join(", "))]
    ArrangeUnavailable { missing: Vec<String> },
}

// ============================================================================
// Geometry & Layout
// ============================================================================

/// Usable desktop surface. Windows are laid out below the top bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopArea {
    pub width: i32,
    pub height: i32,
    pub top_bar: i32,
}

impl Default for DesktopArea {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 900,
            top_bar: 32,
        }
    }
}

impl DesktopArea {
    pub fn maximized_bounds(&self) -> Bounds {
        Bounds {
            position: Position::new(0, self.top_bar),
            size: Size::new(self.width, self.height - self.top_bar),
        }
    }

    pub fn left_half(&self) -> Bounds {
        Bounds {
            position: Position::new(0, self.top_bar),
            size: Size::new(self.width / 2, self.height - self.top_bar),
        }
    }

    pub fn right_half(&self) -> Bounds {
        let left = self.width / 2;
        Bounds {
            position: Position::new(left, self.top_bar),
            size: Size::new(self.width - left, self.height - self.top_bar),
        }
    }
}

/// The two applications `arrange_windows` places side by side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrangeLayout {
    pub left: String,
    pub right: String,
}

impl Default for ArrangeLayout {
    fn default() -> Self {
        Self {
            left: APP_FILE_EXPLORER.to_string(),
            right: APP_EDITOR.to_string(),
        }
    }
}

// ============================================================================
// Restore Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// App id no longer resolves in the registry
    UnknownApp,
    /// A record for the same app id was already restored
    DuplicateApp,
    /// A record with the same window id was already restored
    DuplicateId,
    /// Window id leaves no room for a later id
    CounterOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub id: WindowId,
    pub app_id: String,
    pub reason: DropReason,
}

/// Outcome of [`WindowManager::restore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<WindowId>,
    pub dropped: Vec<DroppedRecord>,
}

// ============================================================================
// Window Manager
// ============================================================================

#[derive(Debug, Clone)]
pub struct WindowManager {
    windows: Vec<WindowInstance>,
    focused: Option<WindowId>,
    next_z: u32,
    next_id: u64,
    area: DesktopArea,
    layout: ArrangeLayout,
}

impl Default for WindowManager {
    fn default() -> Self {
        Self::new(DesktopArea::default(), ArrangeLayout::default())
    }
}

impl WindowManager {
    pub fn new(area: DesktopArea, layout: ArrangeLayout) -> Self {
        Self {
            windows: Vec::new(),
            focused: None,
            next_z: 1,
            next_id: 1,
            area,
            layout,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Windows in collection (open) order.
    pub fn windows(&self) -> &[WindowInstance] {
        &self.windows
    }

    pub fn window(&self, id: WindowId) -> Option<&WindowInstance> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focused
    }

    pub fn find_by_app(&self, app_id: &str) -> Option<&WindowInstance> {
        self.windows.iter().find(|w| w.app_id == app_id)
    }

    /// Non-minimized window with the highest z-index.
    pub fn topmost_visible(&self) -> Option<&WindowInstance> {
        self.windows
            .iter()
            .filter(|w| w.is_visible())
            .max_by_key(|w| w.z_index)
    }

    pub fn area(&self) -> DesktopArea {
        self.area
    }

    pub fn layout(&self) -> &ArrangeLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn index_of(&self, id: WindowId) -> Result<usize, WindowError> {
        self.windows
            .iter()
            .position(|w| w.id == id)
            .ok_or(WindowError::WindowNotFound(id))
    }

    fn allocate_z(&mut self) -> u32 {
        if self.next_z == u32::MAX {
            self.compact_z();
        }
        let z = self.next_z;
        self.next_z += 1;
        z
    }

    /// Renumber z-indices to 1..=n keeping their order.
    fn compact_z(&mut self) {
        let mut order: Vec<usize> = (0..self.windows.len()).collect();
        order.sort_by_key(|&index| self.windows[index].z_index);
        for (rank, index) in order.into_iter().enumerate() {
            self.windows[index].z_index = rank as u32 + 1;
        }
        self.next_z = self.windows.len() as u32 + 1;
    }

    fn allocate_id(&mut self) -> WindowId {
        let id = self.next_id;
        match id.checked_add(1) {
            Some(next) => {
                self.next_id = next;
                WindowId(id)
            }
            // Id space exhausted: reuse the lowest free id
            None => (1..u64::MAX)
                .map(WindowId)
                .find(|candidate| self.index_of(*candidate).is_err())
                .unwrap_or(WindowId(id)),
        }
    }

    fn cascade_position(&self) -> Position {
        let offset = (self.windows.len() % CASCADE_WRAP) as i32 * CASCADE_STEP;
        Position::new(CASCADE_ORIGIN + offset, CASCADE_ORIGIN + offset)
    }

    /// Restore branch of minimize: un-minimize, raise, focus.
    fn restore_at(&mut self, index: usize) {
        let z = self.allocate_z();
        let window = &mut self.windows[index];
        window.is_minimized = false;
        window.z_index = z;
        self.focused = Some(window.id);
    }

    fn focus_at(&mut self, index: usize) {
        let id = self.windows[index].id;
        let z = self.windows[index].z_index;
        let holds_strict_max = self
            .windows
            .iter()
            .filter(|w| w.id != id)
            .all(|w| w.z_index < z);
        if !holds_strict_max {
            let new_z = self.allocate_z();
            self.windows[index].z_index = new_z;
        }
        self.focused = Some(id);
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Open `app`, or bring its existing window forward.
    ///
    /// Supplied `props` are merged into an existing window (object keys merged,
    /// anything else replaces).
    pub fn open_app(&mut self, app: &AppDefinition, props: Option<serde_json::Value>) -> WindowId {
        if let Some(index) = self.windows.iter().position(|w| w.app_id == app.id) {
            if self.windows[index].is_minimized {
                self.restore_at(index);
            } else {
                self.focus_at(index);
            }
            if let Some(props) = props {
                merge_props(&mut self.windows[index].props, props);
            }
            return self.windows[index].id;
        }

        let id = self.allocate_id();
        let position = self.cascade_position();
        let z_index = self.allocate_z();
        self.windows.push(WindowInstance {
            id,
            app_id: app.id.clone(),
            position,
            size: app.default_size(),
            z_index,
            is_minimized: false,
            is_maximized: false,
            previous_state: None,
            props: props.unwrap_or_else(|| serde_json::json!({})),
            is_dirty: false,
        });
        self.focused = Some(id);
        id
    }

    /// Remove a window. Focus is cleared, not reassigned, if it was focused.
    pub fn close_app(&mut self, id: WindowId) -> Result<WindowInstance, WindowError> {
        let index = self.index_of(id)?;
        let window = self.windows.remove(index);
        if self.focused == Some(id) {
            self.focused = None;
        }
        Ok(window)
    }

    pub fn focus_app(&mut self, id: WindowId) -> Result<(), WindowError> {
        let index = self.index_of(id)?;
        if self.windows[index].is_minimized {
            self.restore_at(index);
        } else {
            self.focus_at(index);
        }
        Ok(())
    }

    /// Minimize or restore. Returns `true` if the window is now minimized.
    pub fn toggle_minimize(&mut self, id: WindowId) -> Result<bool, WindowError> {
        let index = self.index_of(id)?;
        if self.windows[index].is_minimized {
            self.restore_at(index);
            return Ok(false);
        }

        let window = &mut self.windows[index];
        window.is_minimized = true;
        if window.is_maximized {
            if let Some(previous) = window.previous_state.take() {
                window.position = previous.position;
                window.size = previous.size;
            }
            window.is_maximized = false;
        }

        if self.focused == Some(id) {
            self.focused = self.topmost_visible().map(|w| w.id);
        }
        Ok(true)
    }

    /// Maximize or un-maximize. Returns `true` if the window is now maximized.
    pub fn toggle_maximize(&mut self, id: WindowId) -> Result<bool, WindowError> {
        let index = self.index_of(id)?;
        let maximized = self.area.maximized_bounds();
        let window = &mut self.windows[index];

        if window.is_maximized {
            let current = window.bounds();
            let previous = window.previous_state.take().unwrap_or(current);
            window.position = previous.position;
            window.size = previous.size;
            window.is_maximized = false;
            return Ok(false);
        }

        window.previous_state = Some(window.bounds());
        window.position = maximized.position;
        window.size = maximized.size;
        window.is_maximized = true;
        window.is_minimized = false;
        Ok(true)
    }

    pub fn update_position(&mut self, id: WindowId, position: Position) -> Result<(), WindowError> {
        let index = self.index_of(id)?;
        self.windows[index].position = position;
        Ok(())
    }

    pub fn update_size(&mut self, id: WindowId, size: Size) -> Result<(), WindowError> {
        let index = self.index_of(id)?;
        self.windows[index].size = size;
        Ok(())
    }

    /// Place the layout's two apps side by side and focus the right one.
    ///
    /// Fails without touching state unless the two apps differ and both are open.
    pub fn arrange_windows(&mut self) -> Result<(), WindowError> {
        if self.layout.left == self.layout.right {
            return Err(WindowError::ArrangeUnavailable {
                missing: vec![self.layout.right.clone()],
            });
        }
        let left = self.windows.iter().position(|w| w.app_id == self.layout.left);
        let right = self.windows.iter().position(|w| w.app_id == self.layout.right);

        let (left, right) = match (left, right) {
            (Some(left), Some(right)) => (left, right),
            (left, right) => {
                let mut missing = Vec::new();
                if left.is_none() {
                    missing.push(self.layout.left.clone());
                }
                if right.is_none() {
                    missing.push(self.layout.right.clone());
                }
                return Err(WindowError::ArrangeUnavailable { missing });
            }
        };

        for (index, bounds) in [(left, self.area.left_half()), (right, self.area.right_half())] {
            let z = self.allocate_z();
            let window = &mut self.windows[index];
            window.position = bounds.position;
            window.size = bounds.size;
            window.is_minimized = false;
            window.is_maximized = false;
            window.previous_state = None;
            window.z_index = z;
        }
        self.focused = Some(self.windows[right].id);
        Ok(())
    }

    pub fn set_dirty(&mut self, id: WindowId, dirty: bool) -> Result<(), WindowError> {
        let index = self.index_of(id)?;
        self.windows[index].is_dirty = dirty;
        Ok(())
    }

    pub fn update_props(&mut self, id: WindowId, props: serde_json::Value) -> Result<(), WindowError> {
        let index = self.index_of(id)?;
        merge_props(&mut self.windows[index].props, props);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot(self.windows.iter().map(PersistedWindow::from).collect())
    }

    /// Replace the collection with a persisted layout.
    ///
    /// Records whose app is not registered (or repeat an app or window id) are
    /// dropped, as is a window id at the top of the id space. Counters advance
    /// past every restored value (z-indices are renumbered when one sits at
    /// the top of its range) and the top-most visible window is focused.
    pub fn restore(&mut self, snapshot: WorkspaceSnapshot, registry: &AppRegistry) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut seen_apps = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut z_overflow = false;

        self.windows.clear();
        self.focused = None;

        for record in snapshot.0 {
            let reason = if !registry.contains(&record.app_id) {
                Some(DropReason::UnknownApp)
            } else if seen_apps.contains(&record.app_id) {
                Some(DropReason::DuplicateApp)
            } else if seen_ids.contains(&record.id) {
                Some(DropReason::DuplicateId)
            } else if record.id.0 == u64::MAX {
                Some(DropReason::CounterOverflow)
            } else {
                None
            };
            if let Some(reason) = reason {
                report.dropped.push(DroppedRecord {
                    id: record.id,
                    app_id: record.app_id,
                    reason,
                });
                continue;
            }

            seen_apps.insert(record.app_id.clone());
            seen_ids.insert(record.id);
            self.next_id = self.next_id.max(record.id.0 + 1);
            match record.z_index.checked_add(1) {
                Some(next_z) => self.next_z = self.next_z.max(next_z),
                None => z_overflow = true,
            }
            report.restored.push(record.id);

            let previous_state = if record.is_maximized {
                record.previous_state
            } else {
                None
            };
            self.windows.push(WindowInstance {
                id: record.id,
                app_id: record.app_id,
                position: record.position,
                size: record.size,
                z_index: record.z_index,
                is_minimized: record.is_minimized,
                is_maximized: record.is_maximized,
                previous_state,
                props: serde_json::json!({}),
                is_dirty: false,
            });
        }

        if z_overflow {
            self.compact_z();
        }
        self.focused = self.topmost_visible().map(|w| w.id);
        report
    }
}

fn merge_props(target: &mut serde_json::Value, incoming: serde_json::Value) {
    match (target, incoming) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(update)) => {
            existing.extend(update);
        }
        (target, incoming) => *target = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{APP_MAIL, APP_TERMINAL};

    fn setup() -> (WindowManager, AppRegistry) {
        (WindowManager::default(), AppRegistry::with_defaults())
    }

    fn open(wm: &mut WindowManager, registry: &AppRegistry, app_id: &str) -> WindowId {
        let app = registry.get(app_id).unwrap().clone();
        wm.open_app(&app, None)
    }

    fn z(wm: &WindowManager, id: WindowId) -> u32 {
        wm.window(id).unwrap().z_index
    }

    fn assert_focus_holds_max_z(wm: &WindowManager) {
        if let Some(focused) = wm.focused() {
            let focused_z = z(wm, focused);
            assert!(wm
                .windows()
                .iter()
                .filter(|w| w.id != focused)
                .all(|w| w.z_index < focused_z));
        }
    }

    #[test]
    fn test_open_app_creates_window_with_defaults() {
        let (mut wm, registry) = setup();
        let id = open(&mut wm, &registry, APP_FILE_EXPLORER);

        let window = wm.window(id).unwrap();
        assert_eq!(window.id, WindowId(1));
        assert_eq!(window.position, Position::new(100, 100));
        assert_eq!(window.size, Size::new(800, 600));
        assert_eq!(window.z_index, 1);
        assert!(!window.is_minimized);
        assert_eq!(window.props, json!({}));
        assert_eq!(wm.focused(), Some(id));
    }

    #[test]
    fn test_open_app_twice_yields_single_window() {
        let (mut wm, registry) = setup();
        let first = open(&mut wm, &registry, APP_TERMINAL);
        open(&mut wm, &registry, APP_EDITOR);
        let second = open(&mut wm, &registry, APP_TERMINAL);

        assert_eq!(first, second);
        assert_eq!(
            wm.windows().iter().filter(|w| w.app_id == APP_TERMINAL).count(),
            1
        );
        assert_eq!(wm.focused(), Some(first));
        assert_focus_holds_max_z(&wm);
    }

    #[test]
    fn test_open_app_merges_props() {
        let (mut wm, registry) = setup();
        let editor = registry.get(APP_EDITOR).unwrap().clone();
        let id = wm.open_app(&editor, Some(json!({"path": "/a.txt", "readOnly": true})));
        wm.open_app(&editor, Some(json!({"path": "/b.txt"})));

        assert_eq!(
            wm.window(id).unwrap().props,
            json!({"path": "/b.txt", "readOnly": true})
        );

        wm.open_app(&editor, Some(json!("scratch")));
        assert_eq!(wm.window(id).unwrap().props, json!("scratch"));
    }

    #[test]
    fn test_open_app_restores_minimized() {
        let (mut wm, registry) = setup();
        let id = open(&mut wm, &registry, APP_MAIL);
        wm.toggle_minimize(id).unwrap();
        assert_eq!(wm.focused(), None);

        let reopened = open(&mut wm, &registry, APP_MAIL);
        assert_eq!(reopened, id);
        assert!(!wm.window(id).unwrap().is_minimized);
        assert_eq!(wm.focused(), Some(id));
    }

    #[test]
    fn test_cascade_wraps_after_ten() {
        let mut wm = WindowManager::default();
        let mut registry = AppRegistry::new();
        for n in 0..11 {
            registry.register(AppDefinition::new(
                format!("app-{n}"),
                "App",
                "*",
                "App",
                Size::new(400, 300),
            ));
        }

        let positions: Vec<Position> = (0..11)
            .map(|n| {
                let id = open(&mut wm, &registry, &format!("app-{n}"));
                wm.window(id).unwrap().position
            })
            .collect();

        assert_eq!(positions[1], Position::new(130, 130));
        assert_eq!(positions[9], Position::new(370, 370));
        assert_eq!(positions[10], Position::new(100, 100));
    }

    #[test]
    fn test_close_clears_focus_without_reassignment() {
        let (mut wm, registry) = setup();
        open(&mut wm, &registry, APP_FILE_EXPLORER);
        let terminal = open(&mut wm, &registry, APP_TERMINAL);

        let closed = wm.close_app(terminal).unwrap();
        assert_eq!(closed.app_id, APP_TERMINAL);
        assert_eq!(wm.focused(), None);
        assert_eq!(wm.len(), 1);
    }

    #[test]
    fn test_unknown_window_is_error_and_noop() {
        let (mut wm, registry) = setup();
        open(&mut wm, &registry, APP_EDITOR);
        let before = wm.windows().to_vec();

        let missing = WindowId(99);
        assert_eq!(wm.close_app(missing), Err(WindowError::WindowNotFound(missing)));
        assert_eq!(wm.focus_app(missing), Err(WindowError::WindowNotFound(missing)));
        assert!(wm.toggle_minimize(missing).is_err());
        assert!(wm.toggle_maximize(missing).is_err());
        assert!(wm.update_position(missing, Position::new(1, 1)).is_err());
        assert_eq!(wm.windows(), before.as_slice());
    }

    #[test]
    fn test_focus_raises_only_when_not_strict_max() {
        let (mut wm, registry) = setup();
        let a = open(&mut wm, &registry, APP_FILE_EXPLORER);
        let b = open(&mut wm, &registry, APP_TERMINAL);

        wm.focus_app(b).unwrap();
        assert_eq!(z(&wm, b), 2, "already on top keeps its z-index");

        wm.focus_app(a).unwrap();
        assert_eq!(z(&wm, a), 3);
        assert_eq!(wm.focused(), Some(a));
    }

    #[test]
    fn test_minimize_then_restore_scenario() {
        let (mut wm, registry) = setup();
        let a = open(&mut wm, &registry, APP_FILE_EXPLORER);
        let b = open(&mut wm, &registry, APP_TERMINAL);

        wm.focus_app(a).unwrap();
        assert!(wm.toggle_minimize(a).unwrap());
        assert_eq!(wm.focused(), Some(b));

        assert!(!wm.toggle_minimize(a).unwrap());
        assert_eq!(wm.focused(), Some(a));
        assert!(z(&wm, a) > z(&wm, b));
        assert_focus_holds_max_z(&wm);
    }

    #[test]
    fn test_minimize_focus_goes_to_highest_visible() {
        let (mut wm, registry) = setup();
        let a = open(&mut wm, &registry, APP_FILE_EXPLORER);
        let b = open(&mut wm, &registry, APP_TERMINAL);
        let c = open(&mut wm, &registry, APP_EDITOR);
        wm.focus_app(a).unwrap();
        wm.toggle_minimize(c).unwrap();

        // a (focused, top) minimized: c is hidden, b is next
        wm.toggle_minimize(a).unwrap();
        assert_eq!(wm.focused(), Some(b));

        wm.toggle_minimize(b).unwrap();
        assert_eq!(wm.focused(), None);
    }

    #[test]
    fn test_minimize_unfocused_keeps_focus() {
        let (mut wm, registry) = setup();
        let a = open(&mut wm, &registry, APP_FILE_EXPLORER);
        let b = open(&mut wm, &registry, APP_TERMINAL);

        wm.toggle_minimize(a).unwrap();
        assert_eq!(wm.focused(), Some(b));
    }

    #[test]
    fn test_maximize_twice_restores_bounds() {
        let (mut wm, registry) = setup();
        let id = open(&mut wm, &registry, APP_EDITOR);
        wm.update_position(id, Position::new(42, 77)).unwrap();
        wm.update_size(id, Size::new(640, 480)).unwrap();

        assert!(wm.toggle_maximize(id).unwrap());
        let window = wm.window(id).unwrap();
        assert_eq!(window.position, Position::new(0, 32));
        assert_eq!(window.size, Size::new(1440, 868));
        assert!(window.previous_state.is_some());

        assert!(!wm.toggle_maximize(id).unwrap());
        let window = wm.window(id).unwrap();
        assert_eq!(window.position, Position::new(42, 77));
        assert_eq!(window.size, Size::new(640, 480));
        assert!(window.previous_state.is_none());
    }

    #[test]
    fn test_maximize_unminimizes() {
        let (mut wm, registry) = setup();
        let id = open(&mut wm, &registry, APP_EDITOR);
        wm.toggle_minimize(id).unwrap();

        wm.toggle_maximize(id).unwrap();
        let window = wm.window(id).unwrap();
        assert!(window.is_maximized);
        assert!(!window.is_minimized);
    }

    #[test]
    fn test_minimize_clears_maximize() {
        let (mut wm, registry) = setup();
        let id = open(&mut wm, &registry, APP_EDITOR);
        let original = wm.window(id).unwrap().bounds();
        wm.toggle_maximize(id).unwrap();

        wm.toggle_minimize(id).unwrap();
        let window = wm.window(id).unwrap();
        assert!(window.is_minimized);
        assert!(!window.is_maximized);
        assert!(window.previous_state.is_none());
        assert_eq!(window.bounds(), original);
    }

    #[test]
    fn test_arrange_places_halves_and_focuses_right() {
        let (mut wm, registry) = setup();
        let editor = open(&mut wm, &registry, APP_EDITOR);
        let files = open(&mut wm, &registry, APP_FILE_EXPLORER);
        wm.toggle_maximize(editor).unwrap();
        wm.toggle_minimize(files).unwrap();

        wm.arrange_windows().unwrap();

        let left = wm.window(files).unwrap();
        let right = wm.window(editor).unwrap();
        assert_eq!(left.position, Position::new(0, 32));
        assert_eq!(left.size, Size::new(720, 868));
        assert_eq!(right.position, Position::new(720, 32));
        assert_eq!(right.size, Size::new(720, 868));
        assert!(!left.is_minimized && !right.is_maximized);
        assert!(right.previous_state.is_none());
        assert!(right.z_index > left.z_index);
        assert_eq!(wm.focused(), Some(editor));
        assert_focus_holds_max_z(&wm);
    }

    #[test]
    fn test_arrange_requires_both_apps() {
        let (mut wm, registry) = setup();
        open(&mut wm, &registry, APP_EDITOR);
        let before = wm.clone();

        let err = wm.arrange_windows().unwrap_err();
        assert_eq!(
            err,
            WindowError::ArrangeUnavailable {
                missing: vec![APP_FILE_EXPLORER.to_string()]
            }
        );
        assert_eq!(wm.windows(), before.windows());
        assert_eq!(wm.focused(), before.focused());
    }

    #[test]
    fn test_transient_flags() {
        let (mut wm, registry) = setup();
        let id = open(&mut wm, &registry, APP_EDITOR);
        wm.set_dirty(id, true).unwrap();
        wm.update_props(id, json!({"path": "/notes.md"})).unwrap();

        let window = wm.window(id).unwrap();
        assert!(window.is_dirty);
        assert_eq!(window.props, json!({"path": "/notes.md"}));

        let snapshot = wm.snapshot();
        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(!text.contains("notes.md"));
        assert!(!text.contains("isDirty"));
    }

    #[test]
    fn test_restore_drops_unknown_and_keeps_bounds() {
        let (mut source, registry) = setup();
        let files = open(&mut source, &registry, APP_FILE_EXPLORER);
        let term = open(&mut source, &registry, APP_TERMINAL);
        source.update_position(files, Position::new(11, 22)).unwrap();
        source.update_size(term, Size::new(333, 444)).unwrap();

        let mut snapshot = source.snapshot();
        snapshot.0.push(PersistedWindow {
            id: WindowId(7),
            app_id: "calculator".to_string(),
            position: Position::new(0, 0),
            size: Size::new(1, 1),
            z_index: 50,
            is_minimized: false,
            is_maximized: false,
            previous_state: None,
        });

        let mut wm = WindowManager::default();
        let report = wm.restore(snapshot, &registry);

        assert_eq!(report.restored, vec![files, term]);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].reason, DropReason::UnknownApp);
        assert_eq!(wm.window(files).unwrap().position, Position::new(11, 22));
        assert_eq!(wm.window(term).unwrap().size, Size::new(333, 444));
        assert_eq!(wm.focused(), Some(term));
    }

    #[test]
    fn test_restore_drops_duplicate_app() {
        let (_, registry) = setup();
        let record = |id: u64, z_index: u32| PersistedWindow {
            id: WindowId(id),
            app_id: APP_EDITOR.to_string(),
            position: Position::new(0, 0),
            size: Size::new(100, 100),
            z_index,
            is_minimized: false,
            is_maximized: false,
            previous_state: None,
        };

        let mut wm = WindowManager::default();
        let report = wm.restore(WorkspaceSnapshot(vec![record(1, 1), record(2, 2)]), &registry);

        assert_eq!(report.restored, vec![WindowId(1)]);
        assert_eq!(report.dropped[0].reason, DropReason::DuplicateApp);
        assert_eq!(wm.len(), 1);
    }

    #[test]
    fn test_restore_advances_counters() {
        let (_, registry) = setup();
        let snapshot = WorkspaceSnapshot(vec![PersistedWindow {
            id: WindowId(41),
            app_id: APP_TERMINAL.to_string(),
            position: Position::new(5, 5),
            size: Size::new(300, 200),
            z_index: 90,
            is_minimized: true,
            is_maximized: false,
            previous_state: Some(Bounds {
                position: Position::new(1, 1),
                size: Size::new(2, 2),
            }),
        }]);

        let mut wm = WindowManager::default();
        wm.restore(snapshot, &registry);

        // Minimized only: nothing to focus; stale previous state dropped
        assert_eq!(wm.focused(), None);
        assert!(wm.window(WindowId(41)).unwrap().previous_state.is_none());

        let id = open(&mut wm, &registry, APP_EDITOR);
        assert!(id.0 > 41);
        assert!(z(&wm, id) > 90);
    }

    fn persisted(id: u64, app_id: &str, z_index: u32) -> PersistedWindow {
        PersistedWindow {
            id: WindowId(id),
            app_id: app_id.to_string(),
            position: Position::new(10, 10),
            size: Size::new(400, 300),
            z_index,
            is_minimized: false,
            is_maximized: false,
            previous_state: None,
        }
    }

    #[test]
    fn test_restore_max_z_index_renumbers_in_order() {
        let (_, registry) = setup();
        let snapshot = WorkspaceSnapshot(vec![
            persisted(3, APP_TERMINAL, u32::MAX),
            persisted(5, APP_MAIL, 40),
        ]);

        let mut wm = WindowManager::default();
        let report = wm.restore(snapshot, &registry);

        assert_eq!(report.restored, vec![WindowId(3), WindowId(5)]);
        assert_eq!(z(&wm, WindowId(5)), 1);
        assert_eq!(z(&wm, WindowId(3)), 2);
        assert_eq!(wm.focused(), Some(WindowId(3)));

        let id = open(&mut wm, &registry, APP_EDITOR);
        assert!(z(&wm, id) > z(&wm, WindowId(3)));
        assert_focus_holds_max_z(&wm);
    }

    #[test]
    fn test_restore_drops_max_window_id() {
        let (_, registry) = setup();
        let snapshot = WorkspaceSnapshot(vec![
            persisted(u64::MAX, APP_TERMINAL, 2),
            persisted(8, APP_MAIL, 1),
        ]);

        let mut wm = WindowManager::default();
        let report = wm.restore(snapshot, &registry);

        assert_eq!(report.restored, vec![WindowId(8)]);
        assert_eq!(report.dropped[0].reason, DropReason::CounterOverflow);
        let id = open(&mut wm, &registry, APP_TERMINAL);
        assert_eq!(id, WindowId(9));
    }

    #[test]
    fn test_z_counter_exhaustion_compacts_instead_of_wrapping() {
        let (_, registry) = setup();
        let snapshot = WorkspaceSnapshot(vec![
            persisted(1, APP_TERMINAL, u32::MAX - 1),
            persisted(2, APP_MAIL, 7),
        ]);
        let mut wm = WindowManager::default();
        wm.restore(snapshot, &registry);

        // next_z is now u32::MAX; focusing mail must still raise it above terminal
        wm.focus_app(WindowId(2)).unwrap();
        assert!(z(&wm, WindowId(2)) > z(&wm, WindowId(1)));
        assert!(z(&wm, WindowId(2)) < 10);
        assert_focus_holds_max_z(&wm);

        let id = open(&mut wm, &registry, APP_EDITOR);
        assert!(z(&wm, id) > z(&wm, WindowId(2)));
    }

    #[test]
    fn test_arrange_rejects_same_app_on_both_sides() {
        let registry = AppRegistry::with_defaults();
        let layout = ArrangeLayout {
            left: APP_EDITOR.to_string(),
            right: APP_EDITOR.to_string(),
        };
        let mut wm = WindowManager::new(DesktopArea::default(), layout);
        let editor = open(&mut wm, &registry, APP_EDITOR);
        let before = wm.window(editor).unwrap().clone();

        let result = wm.arrange_windows();

        assert!(matches!(result, Err(WindowError::ArrangeUnavailable { .. })));
        assert_eq!(wm.window(editor).unwrap(), &before);
    }
}
