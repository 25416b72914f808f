use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use crate::dictionary::DictionaryEntry;
use crate::protocol::{
    AddOutcome, DeleteOutcome, MAX_REQUEST_LEN, Request, Response, read_message, write_frame,
};

/// How long to wait for the server to accept a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Read/write deadline once connected.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking client that opens one connection per request.
#[derive(Debug, Clone)]
pub struct DictionaryClient {
    addr: SocketAddr,
    connect_timeout: Duration,
    io_timeout: Option<Duration>,
}

impl DictionaryClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }

    /// Resolves `host:port` and uses the first address found.
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {host}:{port}"))?
            .next()
            .ok_or_else(|| anyhow!("{host}:{port} did not resolve to any address"))?;
        Ok(Self::new(addr).with_connect_timeout(connect_timeout))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Read/write deadline once connected. `None` waits forever.
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn query(&self, word: &str) -> Result<Vec<DictionaryEntry>> {
        match self.send(&Request::Query { word: word.into() })? {
            Response::Query(entries) => Ok(entries),
            other => Err(unexpected("query", other)),
        }
    }

    /// Adds a definition. Empty input is answered locally without a round trip.
    pub fn add(&self, word: &str, definition: &str, author: &str) -> Result<AddOutcome> {
        if word.is_empty() || definition.is_empty() {
            return Ok(AddOutcome::Empty);
        }
        let request = Request::Add {
            word: word.into(),
            entry: DictionaryEntry::new(definition, author),
        };
        match self.send(&request)? {
            Response::Add(outcome) => Ok(outcome),
            other => Err(unexpected("add", other)),
        }
    }

    pub fn delete(&self, word: &str) -> Result<DeleteOutcome> {
        match self.send(&Request::Delete { word: word.into() })? {
            Response::Delete(outcome) => Ok(outcome),
            other => Err(unexpected("delete", other)),
        }
    }

    /// Sends one request and returns the server's reply.
    ///
    /// An `error` reply is turned into an `Err`.
    pub fn send(&self, request: &Request) -> Result<Response> {
        let body = request.encode().context("failed to encode request")?;
        match self.send_raw(&body)? {
            Response::Error(message) => bail!("server rejected {}: {message}", request.command()),
            response => Ok(response),
        }
    }

    /// Sends `body` verbatim as one frame and returns whatever comes back,
    /// including `error` replies.
    pub fn send_raw(&self, body: &str) -> Result<Response> {
        if body.len() > MAX_REQUEST_LEN {
            bail!(
                "request of {} bytes exceeds the server limit of {MAX_REQUEST_LEN}",
                body.len()
            );
        }
        let mut stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)
            .with_context(|| format!("failed to connect to {}", self.addr))?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        debug!("connected to {}", self.addr);

        write_frame(&mut stream, body).context("failed to send request")?;
        let response: Response = read_message(&mut stream).context("failed to read response")?;
        Ok(response)
    }
}

fn unexpected(command: &str, response: Response) -> anyhow::Error {
    anyhow!("unexpected reply to {command}: {response:?}")
}
