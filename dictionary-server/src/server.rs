//! Listener and shutdown sequencing.
//!
//! [`Server::start`] loads the snapshot, binds the socket, starts the worker
//! pool and spawns the accept thread. The accept thread wraps every incoming
//! connection in a [`ConnectionTask`] and submits it to the pool; it never
//! serves a request itself.
//!
//! Shutdown runs once, in this order:
//!
//! 1. stop accepting and join the accept thread
//! 2. signal the pool to stop (idle workers exit immediately)
//! 3. wait for in-flight requests to finish, up to the grace period
//! 4. drop connections still queued
//! 5. write the snapshot

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dictionary::Dictionary;
use crate::error::ServerError;
use crate::handler::ConnectionTask;
use crate::pool::{SubmitError, WorkerPool};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections that were queued but never started.
    pub abandoned: usize,
    /// Requests still being served when the grace period ran out.
    pub unfinished: usize,
    /// Whether the snapshot was written successfully.
    pub persisted: bool,
}

pub struct Server;

impl Server {
    /// Loads the dictionary from `config.snapshot_path` and starts serving.
    ///
    /// Any error here is fatal: nothing has been served yet.
    pub fn start(config: ServerConfig) -> Result<RunningServer, ServerError> {
        let dictionary = Dictionary::load(&config.snapshot_path)?;
        Self::start_with(config, dictionary)
    }

    /// Starts serving an already-loaded dictionary.
    pub fn start_with(
        config: ServerConfig,
        dictionary: Dictionary,
    ) -> Result<RunningServer, ServerError> {
        let listener = TcpListener::bind(config.listen).map_err(|source| ServerError::Bind {
            addr: config.listen,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: config.listen,
            source,
        })?;

        let pool = WorkerPool::new(config.workers, config.queue_capacity).map_err(|source| {
            ServerError::Spawn {
                name: "worker".into(),
                source,
            }
        })?;

        let shared = Arc::new(Shared {
            dictionary: Arc::new(dictionary),
            pool,
            stopping: AtomicBool::new(false),
            request_timeout: config.request_timeout,
        });

        let accept_state = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("dictionary-accept".into())
            .spawn(move || accept_loop(listener, &accept_state))
            .map_err(|source| ServerError::Spawn {
                name: "accept".into(),
                source,
            })?;

        info!("dictionary server listening on {}", local_addr);

        Ok(RunningServer {
            local_addr,
            sequencer: ShutdownSequencer {
                shared,
                local_addr,
                snapshot_path: config.snapshot_path,
                grace: config.shutdown_grace,
                accept: Mutex::new(Some(accept)),
                ran: AtomicBool::new(false),
            },
        })
    }
}

/// State shared by the accept thread and the shutdown sequencer.
struct Shared {
    dictionary: Arc<Dictionary>,
    pool: WorkerPool<ConnectionTask>,
    stopping: AtomicBool,
    request_timeout: Option<Duration>,
}

/// Handle to a server whose accept thread is running.
pub struct RunningServer {
    local_addr: SocketAddr,
    sequencer: ShutdownSequencer,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.sequencer.shared.dictionary
    }

    /// Accepted connections still waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sequencer.shared.pool.queued()
    }

    /// Runs the shutdown sequence. Returns `None` if it has already run.
    pub fn shutdown(&self) -> Option<ShutdownReport> {
        self.sequencer.run()
    }
}

/// Stops the server and persists the dictionary, at most once.
struct ShutdownSequencer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    snapshot_path: PathBuf,
    grace: Duration,
    accept: Mutex<Option<JoinHandle<()>>>,
    ran: AtomicBool,
}

impl ShutdownSequencer {
    fn run(&self) -> Option<ShutdownReport> {
        if self.ran.swap(true, Ordering::AcqRel) {
            return None;
        }

        info!("shutting down server");
        self.stop_accepting();

        let pool = &self.shared.pool;
        info!(workers = pool.size(), queued = pool.queued(), "stopping workers");
        pool.shutdown();
        let unfinished = pool.join_timeout(self.grace);
        let abandoned = pool.abandon();
        if abandoned > 0 {
            warn!(abandoned, "dropped queued connections that were never served");
        }

        info!(path = %self.snapshot_path.display(), "saving dictionary to file");
        let persisted = match self.shared.dictionary.persist(&self.snapshot_path) {
            Ok(()) => {
                info!(
                    words = self.shared.dictionary.word_count(),
                    "dictionary saved to file"
                );
                true
            }
            Err(err) => {
                error!(error = %err, "failed to save dictionary");
                false
            }
        };

        info!("server shut down");
        Some(ShutdownReport {
            abandoned,
            unfinished,
            persisted,
        })
    }

    fn stop_accepting(&self) {
        self.shared.stopping.store(true, Ordering::Release);

        // The accept thread is parked in accept(); a throwaway connection
        // wakes it so it can see the flag.
        if let Err(err) = TcpStream::connect_timeout(&wake_addr(self.local_addr), WAKE_TIMEOUT) {
            warn!(error = ?err, "failed to wake accept loop");
        }

        let accept = self
            .accept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = accept {
            if handle.join().is_err() {
                error!("accept thread panicked");
            }
        }
        info!("stopped accepting connections");
    }
}

fn accept_loop(listener: TcpListener, shared: &Shared) {
    for stream in listener.incoming() {
        if shared.stopping.load(Ordering::Acquire) {
            break;
        }
        match stream {
            Ok(stream) => submit_connection(stream, shared),
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
    }
    debug!("accept loop exited");
}

fn submit_connection(stream: TcpStream, shared: &Shared) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(err) => {
            warn!(error = ?err, "dropping connection without a peer address");
            return;
        }
    };
    info!(peer = %peer, "request received");

    let task = ConnectionTask::new(
        stream,
        peer,
        Arc::clone(&shared.dictionary),
        shared.request_timeout,
    );
    match shared.pool.submit(task) {
        Ok(()) => {}
        Err(SubmitError::Full(task)) => {
            warn!(
                peer = %task.peer(),
                queued = shared.pool.queued(),
                "worker queue full; rejecting connection"
            );
            task.reject();
        }
        Err(SubmitError::ShutDown(task)) => {
            debug!(peer = %task.peer(), "pool stopped; dropping connection");
        }
    }
}

/// Loopback address that reaches a listener bound to `addr`.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}
