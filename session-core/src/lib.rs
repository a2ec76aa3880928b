//! Desktop session core
//!
//! - [`bus`]: one reconnecting kernel connection shared by every app
//! - [`window_manager`]: the authoritative window collection
//! - [`actors::desktop`]: serializes window operations and persists layouts
//! - [`session`]: ties both together for one signed-in desktop

pub mod actors;
pub mod apps;
pub mod bus;
pub mod config;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod window_manager;

pub use apps::AppRegistry;
pub use bus::{BusClient, BusError, ScopedClient, Subscription};
pub use config::Config;
pub use session::{Session, SessionError};
pub use store::{InMemoryWorkspaceStore, SqliteWorkspaceStore, StoreError, WorkspaceStore};
pub use window_manager::{WindowError, WindowManager};
