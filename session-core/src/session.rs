//! Session - one desktop session's bus connection and window state
//!
//! Constructed explicitly with [`Session::open`] and torn down with
//! [`Session::close`]; consumers receive the session (or scoped clients
//! derived from it) instead of reaching for global state.

use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorRef};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::actors::desktop::{self, DesktopActor, DesktopArguments, DesktopError, DesktopMsg};
use crate::apps::AppRegistry;
use crate::bus::{BusClient, BusError, ScopedClient, Transport, TransportError};
use crate::config::Config;
use crate::store::WorkspaceStore;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid kernel endpoint: {0}")]
    Endpoint(#[from] TransportError),

    #[error("Failed to start desktop actor: {0}")]
    Spawn(String),

    #[error(transparent)]
    Desktop(#[from] DesktopError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

pub struct Session {
    id: Uuid,
    principal: Option<String>,
    bus: BusClient,
    desktop: ActorRef<DesktopMsg>,
    desktop_handle: JoinHandle<()>,
    request_timeout: Duration,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session with the built-in application registry.
    pub async fn open(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn WorkspaceStore>,
    ) -> Result<Self, SessionError> {
        Self::open_with_registry(config, transport, store, AppRegistry::with_defaults()).await
    }

    /// Build the bus client and spawn the desktop actor, which restores the
    /// saved workspace before the session is returned. Does not connect.
    pub async fn open_with_registry(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn WorkspaceStore>,
        registry: AppRegistry,
    ) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let endpoint = config.endpoint()?;
        let bus = BusClient::new(endpoint, transport, config.reconnect);

        let (desktop, desktop_handle) = Actor::spawn(
            None,
            DesktopActor,
            DesktopArguments {
                principal: config.principal.clone(),
                registry,
                store,
                area: config.area,
                layout: config.layout.clone(),
                persist_debounce: config.persist_debounce,
            },
        )
        .await
        .map_err(|e| SessionError::Spawn(e.to_string()))?;

        tracing::info!(
            session_id = %id,
            principal = config.principal.as_deref().unwrap_or("<ephemeral>"),
            endpoint = %bus.endpoint(),
            "Session opened"
        );

        Ok(Self {
            id,
            principal: config.principal.clone(),
            bus,
            desktop,
            desktop_handle,
            request_timeout: config.request_timeout,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn bus(&self) -> &BusClient {
        &self.bus
    }

    pub fn desktop(&self) -> &ActorRef<DesktopMsg> {
        &self.desktop
    }

    /// Default timeout for correlated requests.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Bus view for one application; everything it sends carries `app_id`.
    pub fn scoped(&self, app_id: impl Into<String>) -> ScopedClient {
        self.bus.scoped(app_id)
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.bus.connect().await?;
        Ok(())
    }

    /// Flush pending persistence, stop the desktop actor and close the bus.
    ///
    /// Teardown always completes; a failed final write is returned afterwards.
    pub async fn close(self) -> Result<(), SessionError> {
        let flushed = match desktop::flush_persistence(&self.desktop).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(e) => Err(SessionError::Desktop(DesktopError::from(e))),
        };
        if let Err(e) = &flushed {
            tracing::warn!(session_id = %self.id, error = %e, "Final workspace flush failed");
        }

        self.desktop.stop(None);
        if let Err(e) = self.desktop_handle.await {
            tracing::warn!(session_id = %self.id, error = %e, "Desktop actor did not shut down cleanly");
        }

        self.bus.close();
        tracing::info!(session_id = %self.id, "Session closed");
        flushed
    }
}
