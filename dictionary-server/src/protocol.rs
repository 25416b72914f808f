//! Wire format shared by the server and its clients.
//!
//! Every exchange is one frame in each direction: a 4-byte big-endian length
//! followed by that many bytes of UTF-8 JSON. Length prefixes let the reader
//! find the message boundary without scanning for a delimiter.
//!
//! Requests are capped at [`MAX_REQUEST_LEN`]. Responses may use the whole
//! `u32` range, since a query returns every definition of a word and the
//! number of definitions is not bounded.
//!
//! Requests look like `{"command":"add","word":"cat","content":{...}}` and
//! responses like `{"command":"add","content":"added"}`.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::dictionary::DictionaryEntry;
use crate::error::ProtocolError;

/// Largest request body the server will read.
pub const MAX_REQUEST_LEN: usize = 1024 * 1024;
/// Largest frame body the length prefix can describe.
pub const MAX_RESPONSE_LEN: usize = u32::MAX as usize;

pub const BAD_REQUEST: &str = "bad request";
pub const SERVER_BUSY: &str = "server busy";

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Add { word: String, entry: DictionaryEntry },
    Delete { word: String },
    Query { word: String },
}

/// Field-level view of a request body before the command is interpreted.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireRequest {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    word: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
}

impl Request {
    /// Parses a request body.
    ///
    /// A missing `word` is treated as empty. For `add`, `definition` and
    /// `author` are read independently: a missing or non-string `definition`
    /// leaves the entry empty (answered with `empty`), and a missing or
    /// non-string `author` becomes `""`.
    pub fn decode(body: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(body)?;
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        let wire: WireRequest = serde_json::from_value(value)?;
        let word = wire.word.unwrap_or_default();

        match wire.command.as_deref() {
            Some("add") => Ok(Request::Add {
                word,
                entry: wire.content.as_ref().map(entry_from_content).unwrap_or_default(),
            }),
            Some("delete") => Ok(Request::Delete { word }),
            Some("query") => Ok(Request::Query { word }),
            Some(other) => Err(ProtocolError::UnknownCommand(other.to_string())),
            None => Err(ProtocolError::MissingCommand),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let wire = match self {
            Request::Add { word, entry } => WireRequest {
                command: Some("add".into()),
                word: Some(word.clone()),
                content: Some(serde_json::to_value(entry)?),
            },
            Request::Delete { word } => WireRequest {
                command: Some("delete".into()),
                word: Some(word.clone()),
                content: None,
            },
            Request::Query { word } => WireRequest {
                command: Some("query".into()),
                word: Some(word.clone()),
                content: None,
            },
        };
        serde_json::to_string(&wire)
    }

    pub fn command(&self) -> &'static str {
        match self {
            Request::Add { .. } => "add",
            Request::Delete { .. } => "delete",
            Request::Query { .. } => "query",
        }
    }
}

fn entry_from_content(content: &Value) -> DictionaryEntry {
    let field = |name: &str| {
        content
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    DictionaryEntry::new(field("definition"), field("author"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    /// Word or definition was empty; nothing was stored.
    Empty,
    Added,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    Unknown,
}

/// A server reply, encoded as `{"command": <tag>, "content": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "content", rename_all = "snake_case")]
pub enum Response {
    Add(AddOutcome),
    Delete(DeleteOutcome),
    Query(Vec<DictionaryEntry>),
    Error(String),
}

impl Response {
    pub fn bad_request() -> Self {
        Response::Error(BAD_REQUEST.to_string())
    }

    pub fn busy() -> Self {
        Response::Error(SERVER_BUSY.to_string())
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reads one length-prefixed UTF-8 frame of at most `limit` bytes.
///
/// An oversized length is refused before any of the body is read. The body
/// buffer grows as bytes arrive rather than being allocated up front.
pub fn read_frame<R: Read>(reader: &mut R, limit: usize) -> io::Result<String> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {limit}"),
        ));
    }

    let mut body = Vec::with_capacity(len.min(MAX_REQUEST_LEN));
    reader.take(len as u64).read_to_end(&mut body)?;
    if body.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame ended after {} of {len} bytes", body.len()),
        ));
    }
    String::from_utf8(body).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Writes `body` as one length-prefixed frame and flushes.
pub fn write_frame<W: Write>(writer: &mut W, body: &str) -> io::Result<()> {
    let len = u32::try_from(body.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes does not fit a length prefix", body.len()),
        )
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(body.as_bytes())?;
    writer.flush()
}

/// Reads one frame of any length and deserializes its JSON body.
pub fn read_message<R, T>(reader: &mut R) -> io::Result<T>
where
    R: Read,
    T: DeserializeOwned,
{
    let body = read_frame(reader, MAX_RESPONSE_LEN)?;
    serde_json::from_str(&body).map_err(to_io_error)
}

/// Serializes `message` to JSON and writes it as one frame.
pub fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: Write,
    T: Serialize,
{
    let body = serde_json::to_string(message).map_err(to_io_error)?;
    write_frame(writer, &body)
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
