//! On-disk recording of dictation sessions.
//!
//! One root-level `index.json` holds the ordered list of session
//! records, most recently started first, each with nested chunk
//! records; the audio itself is one WAV file per server-committed
//! chunk under a session-scoped directory. Audio is stored exactly as
//! it was sent upstream: PCM16, mono, 24 kHz. The index is rewritten
//! atomically on every mutation, and every rewrite trims the history
//! to the retention bound, deleting the dropped sessions' directories.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const DEFAULT_RETAINED_SESSIONS: usize = 5;
pub const SAMPLE_RATE: u32 = 24_000;

const INDEX_FILE: &str = "index.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Server item id, or a synthesized `local-<n>` id for audio that
    /// was never acknowledged before the session ended.
    pub item_id: String,
    /// WAV path relative to the history root.
    pub file: String,
    pub bytes: u64,
    pub committed_at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub transcript: Option<String>,
    pub chunks: Vec<ChunkRecord>,
}

/// The whole persisted history: session records ordered by start time
/// descending.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct HistoryIndex {
    pub sessions: Vec<SessionRecord>,
}

struct ActiveSession {
    session_id: String,
    dir: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    chunk_seq: u32,
    chunk_bytes: u64,
    next_local_id: u32,
}

impl ActiveSession {
    fn wav_spec() -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    fn current_chunk_name(&self) -> String {
        format!("chunk-{:03}.wav", self.chunk_seq)
    }

    fn append(&mut self, samples: &[i16]) -> Result<()> {
        if self.writer.is_none() {
            let path = self.dir.join(self.current_chunk_name());
            let writer = hound::WavWriter::create(&path, Self::wav_spec())
                .with_context(|| format!("failed to create {}", path.display()))?;
            self.writer = Some(writer);
        }
        if let Some(writer) = self.writer.as_mut() {
            for &sample in samples {
                writer.write_sample(sample)?;
            }
            self.chunk_bytes += samples.len() as u64 * 2;
        }
        Ok(())
    }
}

struct RecorderState {
    index: HistoryIndex,
    active: Option<ActiveSession>,
}

/// Records the audio and transcript of dictation sessions under a root
/// directory. All methods take `&self`; one session is active at a
/// time.
pub struct AudioSessionRecorder {
    root: PathBuf,
    retained_sessions: usize,
    session_counter: AtomicU64,
    state: Mutex<RecorderState>,
}

impl AudioSessionRecorder {
    pub fn new(root: impl Into<PathBuf>, retained_sessions: usize) -> Self {
        let root = root.into();
        let index = load_index(&root);
        // Seed past the sessions already on disk so ids stay unique
        // even when two recorder instances start within the same
        // millisecond.
        let seed = index.sessions.len() as u64;
        Self {
            root,
            retained_sessions: retained_sessions.max(1),
            session_counter: AtomicU64::new(seed),
            state: Mutex::new(RecorderState {
                index,
                active: None,
            }),
        }
    }

    /// Begin a new session, ending any session still open. The record
    /// goes to the front of the index. Returns the new session id.
    pub fn start_session(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.active.is_some() {
            warn!("previous recording session was never ended, closing it now");
            self.close_active(&mut state)?;
        }

        // Counter suffix keeps ids unique and lexically ordered even
        // within one millisecond.
        let seq = self.session_counter.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("{}-{seq:03}", Utc::now().format("%Y%m%d-%H%M%S%3f"));
        let dir = self.root.join(&session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        state.index.sessions.insert(
            0,
            SessionRecord {
                session_id: session_id.clone(),
                started_at: Utc::now().to_rfc3339(),
                ended_at: None,
                transcript: None,
                chunks: Vec::new(),
            },
        );
        state.active = Some(ActiveSession {
            session_id: session_id.clone(),
            dir,
            writer: None,
            chunk_seq: 0,
            chunk_bytes: 0,
            next_local_id: 0,
        });
        self.persist(&mut state)?;

        debug!("recording session {session_id} started");
        Ok(session_id)
    }

    /// Append samples that were just sent upstream. The chunk file is
    /// created lazily on the first samples after a commit.
    pub fn append_sent_audio(&self, samples: &[i16]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let session = state
            .active
            .as_mut()
            .ok_or_else(|| anyhow!("no recording session is active"))?;
        session.append(samples)
    }

    /// The server acknowledged the buffered audio as `item_id`: seal
    /// the pending chunk under that id. Repeated commits for an id
    /// already recorded are ignored.
    pub fn commit(&self, item_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(active) = state.active.as_ref() else {
            return Err(anyhow!("no recording session is active"));
        };
        let already_recorded = state
            .index
            .sessions
            .iter()
            .find(|s| s.session_id == active.session_id)
            .map(|s| s.chunks.iter().any(|c| c.item_id == item_id))
            .unwrap_or(false);
        if already_recorded {
            return Ok(());
        }
        seal_chunk(&mut state, item_id)?;
        self.persist(&mut state)
    }

    /// Record the session's final transcript text.
    pub fn set_transcript(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(active) = state.active.as_ref() else {
            return Err(anyhow!("no recording session is active"));
        };
        let session_id = active.session_id.clone();
        if let Some(session) = state
            .index
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
        {
            session.transcript = Some(text.to_string());
        }
        self.persist(&mut state)
    }

    /// Close the active session. Audio sent but never acknowledged is
    /// sealed under a synthesized `local-<n>` id so nothing recorded is
    /// lost. Returns the session directory, or `None` if no session
    /// was active.
    pub fn end_session(&self) -> Result<Option<PathBuf>> {
        let mut state = self.state.lock().unwrap();
        self.close_active(&mut state)
    }

    fn close_active(&self, state: &mut RecorderState) -> Result<Option<PathBuf>> {
        let pending_local = match state.active.as_mut() {
            None => return Ok(None),
            Some(active) if active.writer.is_some() => {
                let id = format!("local-{}", active.next_local_id);
                active.next_local_id += 1;
                Some(id)
            }
            Some(_) => None,
        };
        if let Some(local_id) = pending_local {
            seal_chunk(state, &local_id)?;
        }

        let Some(active) = state.active.take() else {
            return Ok(None);
        };
        if let Some(session) = state
            .index
            .sessions
            .iter_mut()
            .find(|s| s.session_id == active.session_id)
        {
            session.ended_at = Some(Utc::now().to_rfc3339());
        }
        self.persist(state)?;
        debug!("recording session {} ended", active.session_id);
        Ok(Some(active.dir))
    }

    /// Trim to the retention bound, then rewrite the root index
    /// atomically (tmp + rename).
    fn persist(&self, state: &mut RecorderState) -> Result<()> {
        if state.index.sessions.len() > self.retained_sessions {
            for dropped in state.index.sessions.split_off(self.retained_sessions) {
                let dir = self.root.join(&dropped.session_id);
                if let Err(e) = fs::remove_dir_all(&dir) {
                    warn!("failed to prune old session {}: {e}", dropped.session_id);
                } else {
                    debug!("pruned old session {}", dropped.session_id);
                }
            }
        }

        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join("index.json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&state.index)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Finalize the open chunk file, if any, under `item_id`.
fn seal_chunk(state: &mut RecorderState, item_id: &str) -> Result<()> {
    let Some(active) = state.active.as_mut() else {
        return Ok(());
    };
    let Some(writer) = active.writer.take() else {
        return Ok(());
    };
    let file = format!("{}/{}", active.session_id, active.current_chunk_name());
    writer
        .finalize()
        .with_context(|| format!("failed to finalize {file}"))?;
    let record = ChunkRecord {
        item_id: item_id.to_string(),
        file,
        bytes: active.chunk_bytes,
        committed_at: Utc::now().to_rfc3339(),
    };
    active.chunk_seq += 1;
    active.chunk_bytes = 0;

    let session_id = active.session_id.clone();
    if let Some(session) = state
        .index
        .sessions
        .iter_mut()
        .find(|s| s.session_id == session_id)
    {
        session.chunks.push(record);
    }
    Ok(())
}

fn load_index(root: &Path) -> HistoryIndex {
    let Ok(raw) = fs::read_to_string(root.join(INDEX_FILE)) else {
        return HistoryIndex::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!("history index is corrupt, starting fresh: {e}");
        HistoryIndex::default()
    })
}
