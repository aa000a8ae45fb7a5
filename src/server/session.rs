//! Server-side state for one connected client and its worker loop.

use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::proto::{ChatMessage, FrameError, FrameReader, FrameWriter};

use super::registry::Registry;
use super::router;

/// One connected client. Created after a successful connect handshake and
/// owned by its registry slot; workers and the router reach it through an
/// `Arc` handed out under the gate.
pub struct Session {
    id: u64,
    peer_addr: SocketAddr,
    name: Mutex<String>,
    /// Accepted socket; the worker reads from it, shutdown closes it.
    stream: TcpStream,
    /// Dedicated send handle. Fan-outs from several workers target the same
    /// session, so frame writes are serialized here.
    writer: Mutex<TcpStream>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        id: u64,
        name: String,
    ) -> std::io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self {
            id,
            peer_addr,
            name: Mutex::new(name),
            stream,
            writer: Mutex::new(writer),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn name(&self) -> String {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name;
    }

    /// Send one framed record body to this client.
    pub fn send(&self, body: &[u8]) -> Result<(), FrameError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        FrameWriter::new(&mut *writer).write_frame(body)?;
        Ok(())
    }

    /// Close the socket in both directions, failing any blocked read.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Per-connection receive-and-dispatch loop. Runs on a dedicated thread
/// bound to `index`, which stays reserved until the slot is retired.
pub(crate) fn run_worker(registry: Arc<Registry>, index: usize, shutdown: Arc<AtomicBool>) {
    let Some(session) = registry.session_at(index) else {
        return;
    };

    let mut reader = FrameReader::new(&session.stream);
    let mut faulted = false;

    while !shutdown.load(Ordering::Relaxed) && !faulted {
        match reader.read_frame() {
            Ok(None) => break,
            // A zero-length frame is treated like a disconnect.
            Ok(Some(bytes)) if bytes.is_empty() => break,
            Ok(Some(bytes)) => {
                tracing::debug!(
                    id = session.id(),
                    name = %session.name(),
                    bytes = bytes.len(),
                    "received record"
                );
                match ChatMessage::decode(&bytes) {
                    Ok(record) => {
                        if let Err(err) = router::dispatch(&registry, &record, &session) {
                            tracing::warn!(id = session.id(), "dispatch failed: {err}");
                            faulted = true;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(id = session.id(), "protocol fault: {err}");
                        faulted = true;
                    }
                }
            }
            Err(FrameError::Io(err)) if err.kind() == ErrorKind::ConnectionReset => break,
            Err(err) => {
                tracing::warn!(id = session.id(), "receive failed: {err}");
                faulted = true;
            }
        }
    }

    if faulted {
        tracing::warn!(id = session.id(), name = %session.name(), "terminating session");
    }

    let leave = ChatMessage::server_notice(format!("{} leaves the chat.", session.name()));
    if let Err(err) = router::broadcast(&registry, &leave, Some(session.id())) {
        tracing::warn!(id = session.id(), "leave notice failed: {err}");
    }

    session.shutdown();
    registry.retire(index);
    tracing::info!(id = session.id(), name = %session.name(), "client disconnected");
}
