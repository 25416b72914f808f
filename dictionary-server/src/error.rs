//! Error types shared by the dictionary, protocol and server layers.

use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

/// Failures while loading or persisting the dictionary snapshot.
#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("failed to read dictionary snapshot {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write dictionary snapshot {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode dictionary snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A request body that could not be turned into a [`crate::protocol::Request`].
///
/// Every variant is answered with the `bad request` error response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("request body is not a JSON object")]
    NotAnObject,

    #[error("request has no command")]
    MissingCommand,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Startup failures. All of them are fatal to the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
