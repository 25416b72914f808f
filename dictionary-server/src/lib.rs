//! Multi-threaded dictionary server with a JSON request protocol.
//!
//! Clients open a TCP connection, send one length-prefixed JSON request and
//! read one reply. The server keeps every word in memory and writes the whole
//! dictionary back to its snapshot file on shutdown.
//!
//! - [`cli`] defines the server and client command lines.
//! - [`config`] turns parsed arguments into a [`config::ServerConfig`].
//! - [`dictionary`] is the lock-protected word store and its snapshot format.
//! - [`pool`] runs queued tasks on a fixed set of worker threads.
//! - [`protocol`] frames and encodes requests and responses.
//! - [`handler`] serves one connection: read, dispatch, reply, close.
//! - [`server`] owns the listener and the shutdown sequence.
//! - [`client`] is a blocking client used by the CLI and the tests.
//! - [`error`] collects the error enums.

pub mod cli;
pub mod client;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod handler;
pub mod pool;
pub mod protocol;
pub mod server;
