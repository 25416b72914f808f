use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::ServerArgs;

/// Pool size used when none is configured.
pub const DEFAULT_WORKERS: usize = 8;
/// Time allowed for one whole request/response exchange when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// How long shutdown waits for in-flight requests before saving anyway.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub snapshot_path: PathBuf,
    pub workers: usize,
    /// `None` keeps the worker queue unbounded.
    pub queue_capacity: Option<usize>,
    /// Deadline for a whole exchange, counted from the moment a worker picks
    /// the connection up. `None` lets a connection hold a worker indefinitely.
    pub request_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn new(listen: SocketAddr, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            listen,
            snapshot_path: snapshot_path.into(),
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        let host = args.host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        ServerConfig::new(SocketAddr::new(host, args.port), args.dictionary_file)
            .with_workers(args.workers)
            .with_queue_capacity(args.queue_capacity)
            .with_request_timeout(Some(Duration::from_secs(args.request_timeout_secs)))
            .with_shutdown_grace(Duration::from_secs(args.shutdown_grace_secs))
    }
}
