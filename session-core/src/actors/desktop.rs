//! DesktopActor - owns the session's window manager and app registry
//!
//! Every window operation goes through this actor's mailbox, so operations
//! apply strictly in issue order and each one observes all prior effects.
//!
//! Persistence:
//! - each successful layout mutation schedules a debounced snapshot write
//! - no writes while the initial snapshot is being restored
//! - no writes at all for sessions without a principal
//! - write failures are logged; the in-memory layout stays authoritative

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{
    AppDefinition, DesktopView, Position, Size, WindowId, WindowInstance, WorkspaceSnapshot,
};

use crate::apps::AppRegistry;
use crate::scheduler::Debouncer;
use crate::store::{StoreError, WorkspaceStore};
use crate::window_manager::{ArrangeLayout, DesktopArea, WindowError, WindowManager};

/// Default delay between the last mutation and the snapshot write
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Actor that manages desktop window state
#[derive(Debug, Default)]
pub struct DesktopActor;

/// Arguments for spawning DesktopActor
#[derive(Clone)]
pub struct DesktopArguments {
    /// Durable identity; `None` disables persistence
    pub principal: Option<String>,
    pub registry: AppRegistry,
    pub store: Arc<dyn WorkspaceStore>,
    pub area: DesktopArea,
    pub layout: ArrangeLayout,
    pub persist_debounce: Duration,
}

/// State for DesktopActor
pub struct DesktopState {
    principal: Option<String>,
    registry: AppRegistry,
    windows: WindowManager,
    store: Arc<dyn WorkspaceStore>,
    debouncer: Debouncer,
    /// Bumped on every scheduled write; stale writes are ignored by the store
    revision: u64,
    loading: bool,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by DesktopActor
#[derive(Debug)]
pub enum DesktopMsg {
    /// Open an app, or focus/restore its existing window
    OpenApp {
        app_id: String,
        props: Option<serde_json::Value>,
        reply: RpcReplyPort<Result<WindowInstance, DesktopError>>,
    },
    CloseApp {
        window_id: WindowId,
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
    FocusApp {
        window_id: WindowId,
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
    /// Replies `true` when the window ends up minimized
    ToggleMinimize {
        window_id: WindowId,
        reply: RpcReplyPort<Result<bool, DesktopError>>,
    },
    /// Replies `true` when the window ends up maximized
    ToggleMaximize {
        window_id: WindowId,
        reply: RpcReplyPort<Result<bool, DesktopError>>,
    },
    UpdatePosition {
        window_id: WindowId,
        position: Position,
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
    UpdateSize {
        window_id: WindowId,
        size: Size,
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
    ArrangeWindows {
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
    SetDirty {
        window_id: WindowId,
        dirty: bool,
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
    UpdateProps {
        window_id: WindowId,
        props: serde_json::Value,
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
    GetWindows {
        reply: RpcReplyPort<Vec<WindowInstance>>,
    },
    GetDesktop {
        reply: RpcReplyPort<DesktopView>,
    },
    GetSnapshot {
        reply: RpcReplyPort<WorkspaceSnapshot>,
    },
    RegisterApp {
        app: AppDefinition,
        reply: RpcReplyPort<()>,
    },
    GetApps {
        reply: RpcReplyPort<Vec<AppDefinition>>,
    },
    /// Write any pending snapshot now
    FlushPersistence {
        reply: RpcReplyPort<Result<(), DesktopError>>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum DesktopError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("Desktop actor unavailable: {0}")]
    Rpc(String),

    #[error("Workspace store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ractor::RactorErr<DesktopMsg>> for DesktopError {
    fn from(e: ractor::RactorErr<DesktopMsg>) -> Self {
        DesktopError::Rpc(e.to_string())
    }
}

// ============================================================================
// Actor Implementation
// ============================================================================

#[async_trait]
impl Actor for DesktopActor {
    type Msg = DesktopMsg;
    type State = DesktopState;
    type Arguments = DesktopArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            principal = args.principal.as_deref().unwrap_or("<ephemeral>"),
            apps = args.registry.len(),
            "DesktopActor starting"
        );

        let mut state = DesktopState {
            principal: args.principal,
            registry: args.registry,
            windows: WindowManager::new(args.area, args.layout),
            store: args.store,
            debouncer: Debouncer::new(args.persist_debounce),
            revision: 0,
            loading: true,
        };

        self.restore_workspace(&mut state).await;
        state.loading = false;

        Ok(state)
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            windows = state.windows.len(),
            "DesktopActor started successfully"
        );
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DesktopMsg::OpenApp {
                app_id,
                props,
                reply,
            } => {
                let result = self.handle_open_app(app_id, props, state);
                let _ = reply.send(result);
            }
            DesktopMsg::CloseApp { window_id, reply } => {
                let result = state.windows.close_app(window_id).map(|window| {
                    tracing::debug!(window_id = %window_id, app_id = %window.app_id, "Window closed");
                });
                let _ = reply.send(self.after_mutation(state, result));
            }
            DesktopMsg::FocusApp { window_id, reply } => {
                let result = state.windows.focus_app(window_id);
                let _ = reply.send(self.after_mutation(state, result));
            }
            DesktopMsg::ToggleMinimize { window_id, reply } => {
                let result = state.windows.toggle_minimize(window_id);
                let _ = reply.send(self.after_mutation(state, result));
            }
            DesktopMsg::ToggleMaximize { window_id, reply } => {
                let result = state.windows.toggle_maximize(window_id);
                let _ = reply.send(self.after_mutation(state, result));
            }
            DesktopMsg::UpdatePosition {
                window_id,
                position,
                reply,
            } => {
                let result = state.windows.update_position(window_id, position);
                let _ = reply.send(self.after_mutation(state, result));
            }
            DesktopMsg::UpdateSize {
                window_id,
                size,
                reply,
            } => {
                let result = state.windows.update_size(window_id, size);
                let _ = reply.send(self.after_mutation(state, result));
            }
            DesktopMsg::ArrangeWindows { reply } => {
                let result = state.windows.arrange_windows();
                let _ = reply.send(self.after_mutation(state, result));
            }
            DesktopMsg::SetDirty {
                window_id,
                dirty,
                reply,
            } => {
                // Transient: not part of the snapshot
                let result = state.windows.set_dirty(window_id, dirty);
                let _ = reply.send(result.map_err(DesktopError::from));
            }
            DesktopMsg::UpdateProps {
                window_id,
                props,
                reply,
            } => {
                let result = state.windows.update_props(window_id, props);
                let _ = reply.send(result.map_err(DesktopError::from));
            }
            DesktopMsg::GetWindows { reply } => {
                let _ = reply.send(state.windows.windows().to_vec());
            }
            DesktopMsg::GetDesktop { reply } => {
                let _ = reply.send(DesktopView {
                    windows: state.windows.windows().to_vec(),
                    focused: state.windows.focused(),
                    apps: state.registry.list().to_vec(),
                });
            }
            DesktopMsg::GetSnapshot { reply } => {
                let _ = reply.send(state.windows.snapshot());
            }
            DesktopMsg::RegisterApp { app, reply } => {
                tracing::info!(app_id = %app.id, "Registering app");
                state.registry.register(app);
                let _ = reply.send(());
            }
            DesktopMsg::GetApps { reply } => {
                let _ = reply.send(state.registry.list().to_vec());
            }
            DesktopMsg::FlushPersistence { reply } => {
                let result = self.handle_flush(state).await;
                let _ = reply.send(result);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if state.debouncer.cancel() {
            tracing::warn!(
                actor_id = %myself.get_id(),
                "DesktopActor stopped with an unflushed workspace write"
            );
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            "DesktopActor stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl DesktopActor {
    async fn restore_workspace(&self, state: &mut DesktopState) {
        let Some(principal) = state.principal.clone() else {
            return;
        };

        let stored = match state.store.load(&principal).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::info!(principal = %principal, "No saved workspace");
                return;
            }
            Err(e) => {
                tracing::warn!(
                    principal = %principal,
                    error = %e,
                    "Failed to load workspace; starting empty"
                );
                return;
            }
        };

        state.revision = stored.revision;
        let report = state.windows.restore(stored.snapshot, &state.registry);
        for dropped in &report.dropped {
            tracing::warn!(
                window_id = %dropped.id,
                app_id = %dropped.app_id,
                reason = ?dropped.reason,
                "Dropped saved window"
            );
        }
        tracing::info!(
            principal = %principal,
            revision = stored.revision,
            restored = report.restored.len(),
            dropped = report.dropped.len(),
            "Workspace restored"
        );
    }

    fn handle_open_app(
        &self,
        app_id: String,
        props: Option<serde_json::Value>,
        state: &mut DesktopState,
    ) -> Result<WindowInstance, DesktopError> {
        let app = state
            .registry
            .get(&app_id)
            .cloned()
            .ok_or(DesktopError::AppNotFound(app_id))?;

        let id = state.windows.open_app(&app, props);
        let window = state
            .windows
            .window(id)
            .cloned()
            .ok_or(WindowError::WindowNotFound(id))?;

        tracing::debug!(window_id = %id, app_id = %window.app_id, z_index = window.z_index, "Window opened");
        self.schedule_persist(state);
        Ok(window)
    }

    /// Map a window-manager result, scheduling a write on success.
    fn after_mutation<T>(
        &self,
        state: &mut DesktopState,
        result: Result<T, WindowError>,
    ) -> Result<T, DesktopError> {
        match result {
            Ok(value) => {
                self.schedule_persist(state);
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Window operation rejected");
                Err(e.into())
            }
        }
    }

    fn schedule_persist(&self, state: &mut DesktopState) {
        if state.loading {
            return;
        }
        let Some(principal) = state.principal.clone() else {
            return;
        };

        state.revision += 1;
        let revision = state.revision;
        let snapshot = state.windows.snapshot();
        let store = state.store.clone();
        state.debouncer.schedule(async move {
            if let Err(e) = write_snapshot(store.as_ref(), &principal, revision, &snapshot).await {
                tracing::warn!(
                    principal = %principal,
                    revision,
                    error = %e,
                    "Workspace write failed; keeping in-memory layout"
                );
            }
        });
    }

    async fn handle_flush(&self, state: &mut DesktopState) -> Result<(), DesktopError> {
        if !state.debouncer.settle().await {
            return Ok(());
        }
        let Some(principal) = state.principal.clone() else {
            return Ok(());
        };
        let snapshot = state.windows.snapshot();
        write_snapshot(state.store.as_ref(), &principal, state.revision, &snapshot).await?;
        Ok(())
    }
}

async fn write_snapshot(
    store: &dyn WorkspaceStore,
    principal: &str,
    revision: u64,
    snapshot: &WorkspaceSnapshot,
) -> Result<(), StoreError> {
    if store.save(principal, revision, snapshot).await? {
        tracing::debug!(
            principal = %principal,
            revision,
            windows = snapshot.len(),
            "Workspace persisted"
        );
    } else {
        tracing::debug!(principal = %principal, revision, "Skipped stale workspace write");
    }
    Ok(())
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Convenience function to open (or bring forward) an app window
pub async fn open_app(
    desktop: &ActorRef<DesktopMsg>,
    app_id: impl Into<String>,
    props: Option<serde_json::Value>,
) -> Result<Result<WindowInstance, DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::OpenApp {
        app_id: app_id.into(),
        props,
        reply,
    })
}

/// Convenience function to close a window
pub async fn close_app(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::CloseApp { window_id, reply })
}

/// Convenience function to focus a window
pub async fn focus_app(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::FocusApp { window_id, reply })
}

pub async fn toggle_minimize(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
) -> Result<Result<bool, DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::ToggleMinimize { window_id, reply })
}

pub async fn toggle_maximize(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
) -> Result<Result<bool, DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::ToggleMaximize { window_id, reply })
}

/// Convenience function to move a window
pub async fn update_position(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
    position: Position,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::UpdatePosition {
        window_id,
        position,
        reply,
    })
}

/// Convenience function to resize a window
pub async fn update_size(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
    size: Size,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::UpdateSize {
        window_id,
        size,
        reply,
    })
}

pub async fn arrange_windows(
    desktop: &ActorRef<DesktopMsg>,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::ArrangeWindows { reply })
}

pub async fn set_dirty(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
    dirty: bool,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::SetDirty {
        window_id,
        dirty,
        reply,
    })
}

pub async fn update_props(
    desktop: &ActorRef<DesktopMsg>,
    window_id: WindowId,
    props: serde_json::Value,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::UpdateProps {
        window_id,
        props,
        reply,
    })
}

/// Convenience function to get all windows
pub async fn get_windows(
    desktop: &ActorRef<DesktopMsg>,
) -> Result<Vec<WindowInstance>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::GetWindows { reply })
}

/// Convenience function to get the desktop view
pub async fn get_desktop(
    desktop: &ActorRef<DesktopMsg>,
) -> Result<DesktopView, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::GetDesktop { reply })
}

pub async fn get_snapshot(
    desktop: &ActorRef<DesktopMsg>,
) -> Result<WorkspaceSnapshot, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::GetSnapshot { reply })
}

/// Convenience function to register an app
pub async fn register_app(
    desktop: &ActorRef<DesktopMsg>,
    app: AppDefinition,
) -> Result<(), ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::RegisterApp { app, reply })
}

/// Convenience function to get all apps
pub async fn get_apps(
    desktop: &ActorRef<DesktopMsg>,
) -> Result<Vec<AppDefinition>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::GetApps { reply })
}

pub async fn flush_persistence(
    desktop: &ActorRef<DesktopMsg>,
) -> Result<Result<(), DesktopError>, ractor::RactorErr<DesktopMsg>> {
    ractor::call!(desktop, |reply| DesktopMsg::FlushPersistence { reply })
}

// ============================================================================
// Tests
// ============================================================================
