use std::net::IpAddr;
use std::path::PathBuf;

use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand, value_parser};

/// Serve the shared dictionary over TCP.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Snapshot file loaded at startup and overwritten at shutdown.
    pub dictionary_file: PathBuf,

    /// Address to bind. Defaults to all interfaces.
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Number of worker threads serving connections.
    #[arg(
        long,
        default_value_t = crate::config::DEFAULT_WORKERS,
        value_parser = value_parser!(u64).range(1..).map(|n| n as usize)
    )]
    pub workers: usize,

    /// Maximum queued connections; extra connections are told the server is busy.
    #[arg(long, value_parser = value_parser!(u64).range(1..).map(|n| n as usize))]
    pub queue_capacity: Option<usize>,

    /// Seconds a connection may take to send its request and receive the reply. 0 disables it.
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Seconds shutdown waits for in-flight requests before saving the dictionary anyway.
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

/// Talk to a running dictionary server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Server host name or address.
    pub server: String,

    /// Server port.
    pub port: u16,

    /// Give up connecting after this many milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ClientCommand {
    /// Print every definition of a word.
    Query(WordArgs),
    /// Add a definition to a word.
    Add(AddArgs),
    /// Remove a word and all of its definitions.
    Delete(WordArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WordArgs {
    pub word: String,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    pub word: String,

    pub definition: String,

    #[arg(long, default_value = "")]
    pub author: String,
}
