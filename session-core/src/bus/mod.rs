//! Session message bus
//!
//! One reconnecting connection to the kernel, shared by every application in
//! the desktop session.

pub mod client;
pub(crate) mod correlation;
pub mod memory;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod scoped;
pub mod transport;
mod typed;

pub use client::{BusClient, BusError, Subscription};
pub use memory::{KernelConnection, MemoryKernel, MemoryTransport};
pub use reconnect::ReconnectPolicy;
pub use scoped::ScopedClient;
pub use transport::{Endpoint, Transport, TransportError, WsTransport};
