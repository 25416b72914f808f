use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use dictionary_server::{
    cli::{ClientArgs, ClientCommand},
    client::DictionaryClient,
    protocol::{AddOutcome, DeleteOutcome},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let args = ClientArgs::parse();
    let client = DictionaryClient::connect(
        &args.server,
        args.port,
        Duration::from_millis(args.connect_timeout_ms),
    )?;

    match args.command {
        ClientCommand::Query(word) => {
            let entries = client.query(&word.word)?;
            if entries.is_empty() {
                println!("no definitions for '{}'", word.word);
            }
            for (n, entry) in entries.iter().enumerate() {
                if entry.author.is_empty() {
                    println!("{}. {}", n + 1, entry.definition);
                } else {
                    println!("{}. {} ({})", n + 1, entry.definition, entry.author);
                }
            }
        }
        ClientCommand::Add(add) => {
            let outcome = client.add(&add.word, &add.definition, &add.author)?;
            match outcome {
                AddOutcome::Empty => println!("word and definition must not be empty"),
                AddOutcome::Added => println!("added '{}'", add.word),
                AddOutcome::Updated => println!("added another definition to '{}'", add.word),
            }
        }
        ClientCommand::Delete(word) => match client.delete(&word.word)? {
            DeleteOutcome::Deleted => println!("deleted '{}'", word.word),
            DeleteOutcome::Unknown => println!("'{}' is not in the dictionary", word.word),
        },
    }

    Ok(())
}
