//! One request/response cycle per accepted connection.
//!
//! A connection moves through read -> decode -> dispatch -> write and is then
//! closed. Only I/O failures (including bytes that are not UTF-8) abort the
//! exchange without a reply; anything that reaches the decoder gets exactly
//! one response.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dictionary::Dictionary;
use crate::pool::Task;
use crate::protocol::{
    AddOutcome, DeleteOutcome, MAX_REQUEST_LEN, Request, Response, read_frame, write_frame,
    write_message,
};

/// An accepted connection waiting for a worker.
pub struct ConnectionTask {
    stream: TcpStream,
    peer: SocketAddr,
    dictionary: Arc<Dictionary>,
    timeout: Option<Duration>,
}

impl ConnectionTask {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        dictionary: Arc<Dictionary>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream,
            peer,
            dictionary,
            timeout,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Answers the client with `server busy` instead of serving it.
    pub fn reject(self) {
        let mut stream = DeadlineStream::new(&self.stream, self.timeout);
        if let Err(err) = write_message(&mut stream, &Response::busy()) {
            debug!(peer = %self.peer, error = ?err, "failed to send busy response");
        }
        close(&self.stream, self.peer);
    }
}

impl Task for ConnectionTask {
    fn run(self) {
        let mut stream = DeadlineStream::new(&self.stream, self.timeout);
        let result = serve_exchange(&mut stream, &self.dictionary);

        match result {
            Ok(command) => info!(peer = %self.peer, command, "serviced request"),
            Err(err) => warn!(peer = %self.peer, error = ?err, "connection aborted"),
        }
        close(&self.stream, self.peer);
    }
}

/// Reads one request from `stream`, applies it, and writes one response.
///
/// Returns the command that was answered (`error` for undecodable requests).
pub fn serve_exchange<S>(stream: &mut S, dictionary: &Dictionary) -> io::Result<&'static str>
where
    S: Read + Write,
{
    let body = read_frame(stream, MAX_REQUEST_LEN)?;
    let response = respond(&body, dictionary);
    let encoded = response
        .encode()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    write_frame(stream, &encoded)?;

    Ok(match response {
        Response::Add(_) => "add",
        Response::Delete(_) => "delete",
        Response::Query(_) => "query",
        Response::Error(_) => "error",
    })
}

/// Decodes `body` and produces the reply, mapping decode failures to `bad request`.
pub fn respond(body: &str, dictionary: &Dictionary) -> Response {
    match Request::decode(body) {
        Ok(request) => dispatch(request, dictionary),
        Err(err) => {
            debug!(error = %err, "rejecting request");
            Response::bad_request()
        }
    }
}

pub fn dispatch(request: Request, dictionary: &Dictionary) -> Response {
    match request {
        Request::Add { word, entry } => {
            if word.is_empty() || entry.definition.is_empty() {
                return Response::Add(AddOutcome::Empty);
            }
            if dictionary.add(&word, entry) {
                Response::Add(AddOutcome::Updated)
            } else {
                Response::Add(AddOutcome::Added)
            }
        }
        Request::Delete { word } => {
            if dictionary.delete(&word) {
                Response::Delete(DeleteOutcome::Deleted)
            } else {
                Response::Delete(DeleteOutcome::Unknown)
            }
        }
        Request::Query { word } => Response::Query(dictionary.query(&word)),
    }
}

/// A socket with one deadline for the whole exchange.
///
/// Before every read or write the socket timeout is set to whatever time is
/// left, so a client trickling bytes cannot keep the connection alive past
/// the deadline.
struct DeadlineStream<'a> {
    stream: &'a TcpStream,
    deadline: Option<Instant>,
}

impl<'a> DeadlineStream<'a> {
    fn new(stream: &'a TcpStream, timeout: Option<Duration>) -> Self {
        Self {
            stream,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    fn remaining(&self) -> io::Result<Option<Duration>> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "request deadline expired",
            ));
        }
        Ok(Some(left))
    }
}

impl Read for DeadlineStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(self.remaining()?)?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

impl Write for DeadlineStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(self.remaining()?)?;
        let mut stream = self.stream;
        stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut stream = self.stream;
        stream.flush()
    }
}

fn close(stream: &TcpStream, peer: SocketAddr) {
    if let Err(err) = stream.shutdown(Shutdown::Both) {
        // The peer often hangs up first.
        debug!(peer = %peer, error = ?err, "failed to shut down connection");
    }
}
