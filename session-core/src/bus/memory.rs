//! In-process transport
//!
//! [`MemoryTransport`] connects the bus client to a [`MemoryKernel`] living in
//! the same process. Used by the test suite and by hosts that embed the kernel.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use shared_types::Envelope;
use tokio::sync::mpsc;

use super::transport::{Connection, Endpoint, Transport, TransportError, TransportEvent};

struct MemoryShared {
    accepting: bool,
    attempts: u32,
}

fn lock(shared: &Mutex<MemoryShared>) -> MutexGuard<'_, MemoryShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Client side: hand this to the bus client
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Mutex<MemoryShared>>,
    accepted_tx: mpsc::UnboundedSender<KernelConnection>,
}

/// Kernel side: accepts connections opened by the paired transport
pub struct MemoryKernel {
    shared: Arc<Mutex<MemoryShared>>,
    accepted_rx: mpsc::UnboundedReceiver<KernelConnection>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryKernel) {
        let shared = Arc::new(Mutex::new(MemoryShared {
            accepting: true,
            attempts: 0,
        }));
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

        (
            Self {
                shared: shared.clone(),
                accepted_tx,
            },
            MemoryKernel {
                shared,
                accepted_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Connection, TransportError> {
        {
            let mut shared = lock(&self.shared);
            shared.attempts += 1;
            if !shared.accepting {
                return Err(TransportError::Refused("kernel is not accepting".to_string()));
            }
        }

        let (to_kernel_tx, to_kernel_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        self.accepted_tx
            .send(KernelConnection {
                frames: to_kernel_rx,
                events: to_client_tx,
            })
            .map_err(|_| TransportError::Refused("kernel has shut down".to_string()))?;

        Ok(Connection {
            outbound: to_kernel_tx,
            inbound: to_client_rx,
        })
    }
}

impl MemoryKernel {
    /// Refuse (or accept again) subsequent connection attempts.
    pub fn set_accepting(&self, accepting: bool) {
        lock(&self.shared).accepting = accepting;
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        lock(&self.shared).attempts
    }

    pub async fn accept(&mut self) -> Option<KernelConnection> {
        self.accepted_rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<KernelConnection> {
        self.accepted_rx.try_recv().ok()
    }
}

/// One accepted connection, from the kernel's point of view
pub struct KernelConnection {
    frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl KernelConnection {
    /// Next raw frame sent by the client; `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Next frame parsed as an envelope.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        let frame = self.recv().await?;
        Envelope::from_json(&frame).ok()
    }

    pub fn try_recv_envelope(&mut self) -> Option<Envelope> {
        let frame = self.frames.try_recv().ok()?;
        Envelope::from_json(&frame).ok()
    }

    /// Push a raw frame to the client. Returns `false` if the client is gone.
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Frame(frame.into())).is_ok()
    }

    pub fn send(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(frame) => self.send_raw(frame),
            Err(_) => false,
        }
    }

    /// Drop the connection from the kernel side.
    pub fn close(self, reason: Option<&str>) {
        let _ = self.events.send(TransportEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }
}
