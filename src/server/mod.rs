//! Chat server: accept loop, handshake, and lifecycle.

use std::io::{self, BufRead};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::config::ServerConfig;
use crate::proto::{ChatCommand, ChatMessage, CodecError, FrameError, FrameReader};

pub mod gate;
pub mod registry;
mod router;
mod session;

pub use registry::{Registry, RegistryError};
pub use router::NAME_TAKEN_MARKER;
pub use session::Session;

/// Idle wait between accept polls; shutdown latency is bounded by it.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("connection closed during handshake")]
    HandshakeClosed,
    #[error("handshake did not begin with a connect record")]
    HandshakeExpectedConnect,
    #[error("unexpected {0:?} record from client")]
    UnexpectedCommand(ChatCommand),
    #[error("accept loop failed")]
    AcceptLoop,
}

pub struct Server {
    config: ServerConfig,
}

/// A running server. Dropping the handle leaves the accept loop running;
/// call [`ServerHandle::shutdown`] or [`ServerHandle::wait`] to reap it.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    accept_loop: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flag observed by the accept loop; shared with the operator-input
    /// task so `exit` on stdin can stop the server.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Request shutdown and wait for every session to be torn down.
    pub fn shutdown(self) -> Result<(), ServerError> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wait()
    }

    /// Wait for the accept loop to finish on its own.
    pub fn wait(self) -> Result<(), ServerError> {
        let _ = self.accept_loop.join();
        if self.failed.load(Ordering::Relaxed) {
            return Err(ServerError::AcceptLoop);
        }
        Ok(())
    }
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind and spawn the accept loop.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let listener = TcpListener::bind(&self.config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let registry = Registry::new();

        let accept_loop = thread::spawn({
            let shutdown = Arc::clone(&shutdown);
            let failed = Arc::clone(&failed);
            move || run_accept_loop(listener, registry, shutdown, failed)
        });

        Ok(ServerHandle {
            shutdown,
            failed,
            accept_loop,
            local_addr,
        })
    }

    /// Blocking entry point used by the binary: serves until the operator
    /// types `exit` on stdin (or the accept loop fails).
    pub fn run(self) -> Result<(), ServerError> {
        let handle = self.start()?;
        tracing::info!(addr = %handle.local_addr(), "server listening");

        let input = thread::spawn({
            let shutdown = handle.shutdown_flag();
            move || watch_operator_input(shutdown)
        });

        let outcome = handle.wait();
        // After an accept failure the input task may still be parked on a
        // stdin read; only join it once it has actually finished.
        if input.is_finished() {
            let _ = input.join();
        }
        outcome
    }
}

/// Read operator lines until the literal `exit`; everything else is
/// ignored. Input closing stops the task without stopping the server.
fn watch_operator_input(shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line == "exit" => {
                tracing::info!("operator requested shutdown");
                shutdown.store(true, Ordering::Relaxed);
                return;
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

fn run_accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = admit_client(&registry, stream, peer, &shutdown) {
                    tracing::warn!(%peer, "client rejected: {err}");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                tracing::error!("accept failed: {err}");
                failed.store(true, Ordering::Relaxed);
                shutdown.store(true, Ordering::Relaxed);
            }
        }
    }

    registry.shutdown_all();
    tracing::info!("server stopped");
}

/// Connect handshake: the first record must be a Connect carrying the
/// client's name. On success the session is installed (worker spawned)
/// before the join notice and the user list go out, so the list the joiner
/// receives includes the joiner itself. On failure the socket is dropped.
fn admit_client(
    registry: &Arc<Registry>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: &Arc<AtomicBool>,
) -> Result<(), ServerError> {
    // Some platforms hand accepted sockets the listener's nonblocking mode.
    stream.set_nonblocking(false)?;

    let hello = {
        let mut reader = FrameReader::new(&stream);
        let Some(bytes) = reader.read_frame()? else {
            return Err(ServerError::HandshakeClosed);
        };
        ChatMessage::decode(&bytes)?
    };
    if hello.command != ChatCommand::Connect {
        return Err(ServerError::HandshakeExpectedConnect);
    }

    let session = Arc::new(Session::new(
        stream,
        peer,
        registry.next_session_id(),
        hello.from.clone(),
    )?);

    let worker = {
        let registry = Arc::clone(registry);
        let shutdown = Arc::clone(shutdown);
        move |index| session::run_worker(registry, index, shutdown)
    };

    match registry.install(Arc::clone(&session), worker) {
        Ok(_) => {
            tracing::info!(id = session.id(), name = %session.name(), %peer, "client connected");
            let joined =
                ChatMessage::server_notice(format!("{} joined to the chat.", session.name()));
            router::broadcast(registry, &joined, Some(session.id()))?;
            router::list_users(registry, &session)?;
            Ok(())
        }
        Err(err) => {
            // Rejected sessions get the in-band notice, then the socket
            // drops with the last reference.
            router::reject_name(&hello.from, &session)?;
            Err(err.into())
        }
    }
}
