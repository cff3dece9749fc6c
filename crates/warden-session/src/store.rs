//! JSONL transcript store implementation.

use crate::error::SessionError;
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Chat-history sink: records every command, approval and control change.
#[async_trait]
pub trait TranscriptLog: Send + Sync {
    /// Append one entry to a session's transcript.
    async fn append(&self, session_id: &str, entry: &TranscriptEntry) -> Result<(), SessionError>;

    /// The last `limit` entries, oldest first. Missing transcripts are empty.
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<TranscriptEntry>, SessionError>;
}

/// Persistent transcript storage, one JSONL file per session.
pub struct TranscriptStore {
    transcripts_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TranscriptStore {
    /// Create a new transcript store. Uses `~/.local/share/warden/transcripts/` by default.
    pub fn new() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("warden")
            .join("transcripts");
        Self::with_dir(base)
    }

    /// Create with a custom directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            transcripts_dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.transcripts_dir
    }

    /// Hash a session id into a short folder name.
    fn key_hash(key: &str) -> String {
        let hash = blake3::hash(key.as_bytes());
        hash.to_hex()[..16].to_string()
    }

    /// Get the transcript file path.
    pub fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.transcripts_dir
            .join(Self::key_hash(session_id))
            .join(format!("{session_id}.jsonl"))
    }

    /// Load every entry of a transcript.
    pub async fn load(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, SessionError> {
        let file_path = self.transcript_path(session_id);

        if !file_path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        let content = fs::read_to_string(&file_path).await?;
        let mut entries = Vec::new();
        let lines: Vec<&str> = content.lines().collect();
        let last = lines.len().saturating_sub(1);

        for (line_num, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                // a crash mid-append leaves a torn final line
                Err(e) if line_num == last => {
                    tracing::warn!(session_id, line = line_num + 1, "skipping torn transcript line: {e}");
                }
                Err(e) => {
                    return Err(SessionError::InvalidFormat(format!("Line {}: {e}", line_num + 1)));
                }
            }
        }

        Ok(entries)
    }

    /// Delete a transcript. Returns whether one existed.
    pub async fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        match fs::remove_file(self.transcript_path(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptLog for TranscriptStore {
    async fn append(&self, session_id: &str, entry: &TranscriptEntry) -> Result<(), SessionError> {
        let file_path = self.transcript_path(session_id);
        let line = serde_json::to_string(entry)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&file_path)
            .await?;
        drop_torn_tail(&mut file, &file_path, session_id).await?;
        file.seek(SeekFrom::End(0)).await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<TranscriptEntry>, SessionError> {
        let mut entries = match self.load(session_id).await {
            Ok(entries) => entries,
            Err(SessionError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}

/// Truncate a final line left without its newline by an interrupted append,
/// so the next entry starts on a line of its own.
async fn drop_torn_tail(file: &mut fs::File, path: &Path, session_id: &str) -> Result<(), SessionError> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let content = fs::read(path).await?;
    let keep = content.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    tracing::warn!(session_id, dropped = content.len() - keep, "truncating torn transcript line");
    file.set_len(keep as u64).await?;
    Ok(())
}

/// Process-local transcripts, for tests and store-less operation.
#[derive(Default)]
pub struct MemoryTranscriptLog {
    entries: Mutex<HashMap<String, Vec<TranscriptEntry>>>,
}

impl MemoryTranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptLog for MemoryTranscriptLog {
    async fn append(&self, session_id: &str, entry: &TranscriptEntry) -> Result<(), SessionError> {
        self.entries
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<TranscriptEntry>, SessionError> {
        let entries = self.entries.lock().await;
        let Some(all) = entries.get(session_id) else {
            return Ok(Vec::new());
        };
        let skip = all.len().saturating_sub(limit);
        Ok(all[skip..].to_vec())
    }
}
