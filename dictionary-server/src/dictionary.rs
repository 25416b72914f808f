//! Thread-safe word store shared by every worker.
//!
//! The dictionary maps a word to the ordered list of definitions that clients
//! have added for it. One process-wide instance lives behind an `Arc`; all
//! access goes through its own lock, so callers never coordinate externally.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::DictionaryError;

type Words = BTreeMap<String, Vec<DictionaryEntry>>;

/// One definition attached to a word.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub definition: String,
    #[serde(default)]
    pub author: String,
}

impl DictionaryEntry {
    pub fn new(definition: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            author: author.into(),
        }
    }
}

/// Word -> definitions map guarded by a single coarse lock.
///
/// Every public method takes the lock for its whole duration and never calls
/// another public method while holding it, so effects of concurrent calls are
/// totally ordered and no caller can observe a half-applied update.
///
/// A word is present only while it has at least one entry: `delete` removes
/// the key outright instead of leaving an empty list behind.
///
/// `BTreeMap` keeps snapshot output sorted by word, which makes the file on
/// disk diff cleanly between runs.
#[derive(Debug, Default)]
pub struct Dictionary {
    words: Mutex<Words>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dictionary from snapshot text produced by [`Dictionary::serialize`].
    pub fn from_snapshot(snapshot: &str) -> Result<Self, serde_json::Error> {
        let mut words: Words = serde_json::from_str(snapshot)?;
        words.retain(|_, entries| !entries.is_empty());
        Ok(Self {
            words: Mutex::new(words),
        })
    }

    /// Loads the snapshot stored at `path`.
    ///
    /// I/O failures (missing file, permissions, disk errors) are returned as
    /// [`DictionaryError::Read`] and are meant to stop the process. Content
    /// that is not a valid snapshot is logged and replaced with an empty
    /// dictionary.
    pub fn load(path: &Path) -> Result<Self, DictionaryError> {
        let bytes = fs::read(path).map_err(|source| DictionaryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed = std::str::from_utf8(&bytes)
            .map_err(|err| err.to_string())
            .and_then(|text| Self::from_snapshot(text).map_err(|err| err.to_string()));

        match parsed {
            Ok(dictionary) => {
                info!(
                    path = %path.display(),
                    words = dictionary.word_count(),
                    "dictionary loaded from snapshot"
                );
                Ok(dictionary)
            }
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "dictionary snapshot is malformed; starting with an empty dictionary"
                );
                Ok(Self::new())
            }
        }
    }

    /// Returns a copy of the entries for `word`, empty if the word is unknown.
    pub fn query(&self, word: &str) -> Vec<DictionaryEntry> {
        self.lock().get(word).cloned().unwrap_or_default()
    }

    /// Appends `entry` to `word`, creating the word if needed.
    ///
    /// Returns `true` when the word already existed.
    pub fn add(&self, word: &str, entry: DictionaryEntry) -> bool {
        let mut words = self.lock();
        match words.get_mut(word) {
            Some(entries) => {
                entries.push(entry);
                true
            }
            None => {
                words.insert(word.to_string(), vec![entry]);
                false
            }
        }
    }

    /// Removes `word` and all of its entries. Returns `true` if it existed.
    pub fn delete(&self, word: &str) -> bool {
        self.lock().remove(word).is_some()
    }

    /// Renders the whole map as a JSON object of word -> entries.
    pub fn serialize(&self) -> Result<String, DictionaryError> {
        let words = self.lock();
        Ok(serde_json::to_string(&*words)?)
    }

    /// Serializes the dictionary and overwrites `path` with the result.
    pub fn persist(&self, path: &Path) -> Result<(), DictionaryError> {
        let snapshot = self.serialize()?;
        fs::write(path, snapshot).map_err(|source| DictionaryError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn word_count(&self) -> usize {
        self.lock().len()
    }

    pub fn entry_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    // Every mutation finishes before its guard drops, so a poisoned lock still
    // holds a consistent map.
    fn lock(&self) -> MutexGuard<'_, Words> {
        self.words.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
