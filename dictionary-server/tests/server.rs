//! Integration tests that run the server in-process over loopback TCP.

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use dictionary_server::{
    client::DictionaryClient,
    config::ServerConfig,
    dictionary::{Dictionary, DictionaryEntry},
    error::{DictionaryError, ServerError},
    protocol::{AddOutcome, DeleteOutcome, Response, read_message},
    server::{RunningServer, Server},
};
use tempfile::NamedTempFile;

const WAIT: Duration = Duration::from_secs(5);

/// Snapshot file seeded with `contents`, removed when the test ends.
fn snapshot(contents: &str) -> Result<NamedTempFile> {
    let file = NamedTempFile::new()?;
    fs::write(file.path(), contents)?;
    Ok(file)
}

fn loopback_config(path: &Path) -> ServerConfig {
    ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)), path)
}

fn start(path: &Path) -> Result<(RunningServer, DictionaryClient)> {
    let server = Server::start(loopback_config(path))?;
    let client = DictionaryClient::new(server.local_addr());
    Ok((server, client))
}

fn wait_until(description: &str, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        if Instant::now() > deadline {
            bail!("timed out waiting for {description}");
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

#[test]
fn query_add_query_delete() -> Result<()> {
    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;

    assert!(client.query("cat")?.is_empty());
    assert_eq!(client.add("cat", "a feline", "alice")?, AddOutcome::Added);
    assert_eq!(
        client.query("cat")?,
        vec![DictionaryEntry::new("a feline", "alice")]
    );
    assert_eq!(client.delete("cat")?, DeleteOutcome::Deleted);
    assert!(client.query("cat")?.is_empty());
    assert_eq!(client.delete("cat")?, DeleteOutcome::Unknown);

    server.shutdown();
    Ok(())
}

#[test]
fn second_definition_is_an_update() -> Result<()> {
    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;

    assert_eq!(client.add("cat", "a feline", "alice")?, AddOutcome::Added);
    assert_eq!(client.add("cat", "a feline", "bob")?, AddOutcome::Updated);
    assert_eq!(client.query("cat")?.len(), 2);

    server.shutdown();
    Ok(())
}

#[test]
fn empty_add_is_answered_without_changes() -> Result<()> {
    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;

    let response = client.send_raw(r#"{"command":"add","word":"cat","content":{"author":"x"}}"#)?;
    assert_eq!(response, Response::Add(AddOutcome::Empty));
    let response = client.send_raw(r#"{"command":"add","content":{"definition":"a feline"}}"#)?;
    assert_eq!(response, Response::Add(AddOutcome::Empty));
    assert_eq!(server.dictionary().entry_count(), 0);

    server.shutdown();
    Ok(())
}

#[test]
fn unknown_command_is_a_bad_request() -> Result<()> {
    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;

    let response = client.send_raw(r#"{"command":"frobnicate","word":"cat"}"#)?;
    assert_eq!(response, Response::bad_request());
    let response = client.send_raw("not json at all")?;
    assert_eq!(response, Response::bad_request());

    server.shutdown();
    Ok(())
}

#[test]
fn concurrent_adds_to_one_word_are_all_kept() -> Result<()> {
    const CLIENTS: usize = 8;
    const ADDS: usize = 25;

    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;

    let handles: Vec<_> = (0..CLIENTS)
        .map(|c| {
            let client = client.clone();
            thread::spawn(move || -> Result<Vec<AddOutcome>> {
                (0..ADDS)
                    .map(|n| client.add("cat", &format!("definition {c}-{n}"), "load"))
                    .collect()
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        let client_outcomes = handle
            .join()
            .map_err(|_| anyhow!("client thread panicked"))??;
        outcomes.extend(client_outcomes);
    }

    let added = outcomes
        .iter()
        .filter(|outcome| **outcome == AddOutcome::Added)
        .count();
    assert_eq!(added, 1, "exactly one add creates the word");
    assert_eq!(client.query("cat")?.len(), CLIENTS * ADDS);

    server.shutdown();
    Ok(())
}

#[test]
fn shutdown_persists_and_reloads() -> Result<()> {
    let file = snapshot(r#"{"dog":[{"definition":"a canine","author":"carol"}]}"#)?;
    let (server, client) = start(file.path())?;

    assert_eq!(client.query("dog")?.len(), 1);
    client.add("cat", "a feline", "alice")?;
    client.add("cat", "a jazz musician", "bob")?;

    let report = server.shutdown().context("first shutdown runs")?;
    assert!(report.persisted);
    assert_eq!(report.abandoned, 0);

    let reloaded = Dictionary::from_snapshot(&fs::read_to_string(file.path())?)?;
    assert_eq!(
        reloaded.query("cat"),
        vec![
            DictionaryEntry::new("a feline", "alice"),
            DictionaryEntry::new("a jazz musician", "bob"),
        ]
    );
    assert_eq!(reloaded.query("dog"), vec![DictionaryEntry::new("a canine", "carol")]);

    let (server, client) = start(file.path())?;
    assert_eq!(client.query("cat")?.len(), 2);
    server.shutdown();
    Ok(())
}

#[test]
fn shutdown_runs_once() -> Result<()> {
    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;

    assert!(server.shutdown().is_some());
    assert!(server.shutdown().is_none());

    // The listener is closed.
    assert!(client.query("cat").is_err());
    Ok(())
}

#[test]
fn shutdown_reports_write_failure() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dictionary.json");
    fs::write(&path, "{}")?;
    let (server, client) = start(&path)?;
    client.add("cat", "a feline", "alice")?;

    // Replace the snapshot with a directory so the write fails.
    fs::remove_file(&path)?;
    fs::create_dir(&path)?;

    let report = server.shutdown().context("shutdown runs")?;
    assert!(!report.persisted);
    Ok(())
}

#[test]
fn missing_snapshot_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing.json");

    match Server::start(loopback_config(&path)) {
        Err(ServerError::Dictionary(DictionaryError::Read { path: failed, .. })) => {
            assert_eq!(failed, path);
            Ok(())
        }
        Err(other) => bail!("unexpected error: {other}"),
        Ok(server) => {
            server.shutdown();
            bail!("server started without a snapshot file")
        }
    }
}

#[test]
fn malformed_snapshot_starts_empty() -> Result<()> {
    let file = snapshot("this is not json")?;
    let (server, client) = start(file.path())?;

    assert_eq!(server.dictionary().word_count(), 0);
    assert!(client.query("cat")?.is_empty());

    server.shutdown();
    Ok(())
}

#[test]
fn full_queue_answers_server_busy() -> Result<()> {
    let file = snapshot("{}")?;
    let config = loopback_config(file.path())
        .with_workers(1)
        .with_queue_capacity(Some(1))
        .with_request_timeout(Some(Duration::from_secs(2)));
    let server = Server::start(config)?;
    let addr = server.local_addr();

    // Silent connections hold the only worker and the only queue slot until
    // the request timeout; a worker can take at most one of them, so the
    // fourth connection always finds the queue full.
    let silent = (0..3)
        .map(|_| TcpStream::connect(addr))
        .collect::<std::io::Result<Vec<_>>>()?;

    let mut rejected = TcpStream::connect(addr)?;
    rejected.set_read_timeout(Some(WAIT))?;
    let response: Response = read_message(&mut rejected)?;
    assert_eq!(response, Response::busy());

    let mut rest = Vec::new();
    rejected.read_to_end(&mut rest)?;
    assert!(rest.is_empty(), "connection closes after the busy reply");

    drop(silent);
    server.shutdown();
    Ok(())
}

#[test]
fn stalled_client_times_out() -> Result<()> {
    let file = snapshot("{}")?;
    let config = loopback_config(file.path())
        .with_workers(1)
        .with_request_timeout(Some(Duration::from_millis(200)));
    let server = Server::start(config)?;

    let mut stalled = TcpStream::connect(server.local_addr())?;
    stalled.set_read_timeout(Some(WAIT))?;

    // The server gives up reading and closes without replying.
    let mut rest = Vec::new();
    stalled.read_to_end(&mut rest)?;
    assert!(rest.is_empty());

    // The worker is free again.
    let client = DictionaryClient::new(server.local_addr());
    assert!(client.query("cat")?.is_empty());

    server.shutdown();
    Ok(())
}

#[test]
fn shutdown_abandons_queued_connections() -> Result<()> {
    let file = snapshot("{}")?;
    let config = loopback_config(file.path())
        .with_workers(1)
        .with_request_timeout(Some(Duration::from_secs(1)));
    let server = Server::start(config)?;
    let addr = server.local_addr();

    let _in_service = TcpStream::connect(addr)?;
    let _first = TcpStream::connect(addr)?;
    let _second = TcpStream::connect(addr)?;
    wait_until("two queued connections", || server.queued() == 2)?;

    let report = server.shutdown().context("shutdown runs")?;
    assert_eq!(report.abandoned, 2);
    assert!(report.persisted);
    Ok(())
}

/// Sends a frame header promising `len` bytes, then one byte every `every`
/// until the server hangs up or `limit` bytes have gone out.
fn trickle(addr: SocketAddr, len: u32, every: Duration, limit: usize) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    let mut writer = stream.try_clone()?;
    writer.write_all(&len.to_be_bytes())?;
    thread::spawn(move || {
        for _ in 0..limit {
            thread::sleep(every);
            if writer.write_all(b"x").is_err() {
                break;
            }
        }
    });
    Ok(stream)
}

#[test]
fn trickling_client_is_cut_off_at_the_request_deadline() -> Result<()> {
    let file = snapshot("{}")?;
    let config = loopback_config(file.path())
        .with_workers(1)
        .with_request_timeout(Some(Duration::from_millis(300)));
    let server = Server::start(config)?;

    let mut trickler = trickle(server.local_addr(), 1000, Duration::from_millis(100), 50)?;
    trickler.set_read_timeout(Some(WAIT))?;

    let begun = Instant::now();
    let mut rest = Vec::new();
    // A reset is as good as a clean close here.
    let _ = trickler.read_to_end(&mut rest);
    assert!(rest.is_empty(), "no reply for an unfinished request");
    assert!(
        begun.elapsed() < Duration::from_secs(2),
        "connection held for {:?}",
        begun.elapsed()
    );

    // The only worker is free again.
    let client = DictionaryClient::new(server.local_addr());
    assert!(client.query("cat")?.is_empty());

    server.shutdown();
    Ok(())
}

#[test]
fn shutdown_saves_even_when_a_request_never_finishes() -> Result<()> {
    let file = snapshot("{}")?;
    let config = loopback_config(file.path())
        .with_workers(1)
        .with_request_timeout(None)
        .with_shutdown_grace(Duration::from_millis(300));
    let server = Server::start(config)?;
    let client = DictionaryClient::new(server.local_addr());
    client.add("cat", "a feline", "alice")?;

    // With no request deadline this holds the only worker for as long as it
    // keeps trickling.
    let _trickler = trickle(server.local_addr(), 1000, Duration::from_millis(100), 100)?;
    thread::sleep(Duration::from_millis(200));

    let (report_tx, report_rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = report_tx.send(server.shutdown());
    });
    let report = report_rx
        .recv_timeout(WAIT)
        .context("shutdown did not return")?
        .context("first shutdown runs")?;

    assert_eq!(report.unfinished, 1);
    assert!(report.persisted);
    let saved = Dictionary::from_snapshot(&fs::read_to_string(file.path())?)?;
    assert_eq!(saved.query("cat"), vec![DictionaryEntry::new("a feline", "alice")]);
    Ok(())
}

#[test]
fn query_reply_may_exceed_request_limit() -> Result<()> {
    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;
    let definition = "d".repeat(400_000);

    assert_eq!(client.add("cat", &definition, "alice")?, AddOutcome::Added);
    assert_eq!(client.add("cat", &definition, "alice")?, AddOutcome::Updated);
    assert_eq!(client.add("cat", &definition, "alice")?, AddOutcome::Updated);

    let entries = client.query("cat")?;
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|entry| entry.definition == definition));

    server.shutdown();
    Ok(())
}

#[test]
fn add_with_non_string_author_is_stored() -> Result<()> {
    let file = snapshot("{}")?;
    let (server, client) = start(file.path())?;

    let response = client.send_raw(
        r#"{"command":"add","word":"cat","content":{"definition":"a feline","author":5}}"#,
    )?;
    assert_eq!(response, Response::Add(AddOutcome::Added));
    assert_eq!(client.query("cat")?, vec![DictionaryEntry::new("a feline", "")]);

    server.shutdown();
    Ok(())
}
