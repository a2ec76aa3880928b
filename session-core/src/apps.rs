//! Application registry
//!
//! The window manager only looks definitions up by id; the shell renders the
//! `component` name.

use shared_types::{
    AppDefinition, Size, APP_BROWSER, APP_EDITOR, APP_FILE_EXPLORER, APP_MAIL, APP_SETTINGS,
    APP_TERMINAL,
};

#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    apps: Vec<AppDefinition>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in shell applications.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for app in default_apps() {
            registry.register(app);
        }
        registry
    }

    /// Add `app`, replacing any definition with the same id in place.
    pub fn register(&mut self, app: AppDefinition) {
        match self.apps.iter_mut().find(|existing| existing.id == app.id) {
            Some(existing) => *existing = app,
            None => self.apps.push(app),
        }
    }

    pub fn get(&self, app_id: &str) -> Option<&AppDefinition> {
        self.apps.iter().find(|app| app.id == app_id)
    }

    pub fn contains(&self, app_id: &str) -> bool {
        self.get(app_id).is_some()
    }

    /// Definitions in registration order.
    pub fn list(&self) -> &[AppDefinition] {
        &self.apps
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

fn default_apps() -> Vec<AppDefinition> {
    vec![
        AppDefinition::new(APP_FILE_EXPLORER, "Files", "📁", "FileExplorerApp", Size::new(800, 600)),
        AppDefinition::new(APP_EDITOR, "Editor", "📝", "EditorApp", Size::new(900, 650)),
        AppDefinition::new(APP_TERMINAL, "Terminal", "🖥️", "TerminalApp", Size::new(800, 500)),
        AppDefinition::new(APP_MAIL, "Mail", "✉️", "MailApp", Size::new(900, 600)),
        AppDefinition::new(APP_BROWSER, "Browser", "🌐", "BrowserApp", Size::new(1024, 700)),
        AppDefinition::new(APP_SETTINGS, "Settings", "⚙️", "SettingsApp", Size::new(600, 500)),
    ]
}
