//! Durable copy of the conversation transcript.
//!
//! The session controller is the only writer. Stores never fail loudly on
//! load: unreadable or corrupted records degrade to an empty transcript and a
//! warning in the log.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::core::error::ChatError;
use crate::core::message::Message;

pub const HISTORY_FILE_NAME: &str = "chat-history.json";

/// What gets written to disk: the conversation and the session it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedTranscript {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Id of the assistant reply still streaming when this was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reply: Option<String>,
}

impl PersistedTranscript {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Older records were a bare message array.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Bare(Vec<Message>),
    Full(PersistedTranscript),
}

impl From<StoredRecord> for PersistedTranscript {
    fn from(record: StoredRecord) -> Self {
        match record {
            StoredRecord::Bare(messages) => PersistedTranscript {
                session_id: None,
                messages,
                pending_reply: None,
            },
            StoredRecord::Full(transcript) => transcript,
        }
    }
}

/// Parse a stored record, falling back to an empty transcript.
pub fn parse_record(raw: &str) -> PersistedTranscript {
    if raw.trim().is_empty() {
        return PersistedTranscript::default();
    }
    match serde_json::from_str::<StoredRecord>(raw) {
        Ok(record) => record.into(),
        Err(err) => {
            warn!("Discarding unreadable chat history: {err}");
            PersistedTranscript::default()
        }
    }
}

pub trait TranscriptStore: Send {
    /// Restore the last saved transcript, or an empty one.
    fn load(&self) -> PersistedTranscript;

    /// Overwrite the stored transcript.
    ///
    /// `revision` increases with every transcript mutation; a save carrying
    /// a revision older than the last one written is dropped.
    fn save(&self, transcript: &PersistedTranscript, revision: u64) -> Result<(), ChatError>;

    /// Erase the stored transcript.
    fn clear(&self, revision: u64) -> Result<(), ChatError>;
}

/// Tracks the newest revision written so far.
#[derive(Debug, Default)]
struct RevisionGate {
    last_written: Option<u64>,
}

impl RevisionGate {
    fn admit(&mut self, revision: u64) -> bool {
        match self.last_written {
            Some(last) if revision < last => {
                debug!(revision, last, "Skipping stale transcript save");
                false
            }
            _ => {
                self.last_written = Some(revision);
                true
            }
        }
    }
}

pub struct FileTranscriptStore {
    path: PathBuf,
    gate: Mutex<RevisionGate>,
}

impl FileTranscriptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            gate: Mutex::new(RevisionGate::default()),
        }
    }

    /// `chat-history.json` in the platform data directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "peupajoh", "peupajoh")
            .map(|dirs| dirs.data_dir().join(HISTORY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, contents: &str) -> Result<(), ChatError> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(persistence_error)?;
        }

        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(persistence_error)?;

        temp_file
            .write_all(contents.as_bytes())
            .map_err(persistence_error)?;
        temp_file
            .as_file_mut()
            .sync_all()
            .map_err(persistence_error)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| persistence_error(err.error))?;
        Ok(())
    }
}

fn persistence_error(err: std::io::Error) -> ChatError {
    ChatError::Persistence(err.to_string())
}

impl TranscriptStore for FileTranscriptStore {
    fn load(&self) -> PersistedTranscript {
        match fs::read_to_string(&self.path) {
            Ok(raw) => parse_record(&raw),
            Err(err) if err.kind() == ErrorKind::NotFound => PersistedTranscript::default(),
            Err(err) => {
                warn!(path = %self.path.display(), "Could not read chat history: {err}");
                PersistedTranscript::default()
            }
        }
    }

    fn save(&self, transcript: &PersistedTranscript, revision: u64) -> Result<(), ChatError> {
        let mut gate = self
            .gate
            .lock()
            .map_err(|_| ChatError::Persistence("history lock poisoned".to_string()))?;
        if !gate.admit(revision) {
            return Ok(());
        }
        let contents = serde_json::to_string_pretty(transcript)
            .map_err(|err| ChatError::Persistence(err.to_string()))?;
        self.write_atomically(&contents)
    }

    fn clear(&self, revision: u64) -> Result<(), ChatError> {
        let mut gate = self
            .gate
            .lock()
            .map_err(|_| ChatError::Persistence("history lock poisoned".to_string()))?;
        if !gate.admit(revision) {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence_error(err)),
        }
    }
}

/// Keeps the serialized record in memory; used for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemoryTranscriptStore {
    state: Mutex<(RevisionGate, Option<String>)>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary stored record, valid or not.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            state: Mutex::new((RevisionGate::default(), Some(raw.into()))),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.state.lock().ok().and_then(|state| state.1.clone())
    }
}

impl TranscriptStore for MemoryTranscriptStore {
    fn load(&self) -> PersistedTranscript {
        self.raw()
            .map(|raw| parse_record(&raw))
            .unwrap_or_default()
    }

    fn save(&self, transcript: &PersistedTranscript, revision: u64) -> Result<(), ChatError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ChatError::Persistence("history lock poisoned".to_string()))?;
        if !state.0.admit(revision) {
            return Ok(());
        }
        let contents = serde_json::to_string(transcript)
            .map_err(|err| ChatError::Persistence(err.to_string()))?;
        state.1 = Some(contents);
        Ok(())
    }

    fn clear(&self, revision: u64) -> Result<(), ChatError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ChatError::Persistence("history lock poisoned".to_string()))?;
        if state.0.admit(revision) {
            state.1 = None;
        }
        Ok(())
    }
}
