//! Session orchestration.
//!
//! Ties the pieces together for one push-to-talk session: audio goes to
//! the realtime service and the on-disk recorder in lockstep, server
//! events feed the transcript assembler, every transcript revision is
//! injected live, and on release the final (optionally formatted) text
//! replaces whatever was on screen.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::formatting::{FormattingPipeline, RewriteClient};
use crate::injection::InjectionController;
use crate::realtime::{RealtimeError, RealtimeSession, ServerEvent, TranscriptAssembler};
use crate::recorder::AudioSessionRecorder;
use crate::settings::PersonalGlossaryEntry;

/// How long to wait after the final commit for the server to finish
/// transcribing what it already has.
const FINAL_EVENT_WAIT: Duration = Duration::from_secs(5);

/// With VAD disabled the client decides utterance boundaries; buffered
/// audio is committed on this interval so transcripts appear while the
/// user is still speaking.
const COMMIT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error("no dictation session is active")]
    NoActiveSession,
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub transcript: String,
    /// Automatic insertion never succeeded; the host should offer the
    /// transcript for manual pasting.
    pub requires_manual_paste: bool,
}

struct ActiveState {
    assembler: TranscriptAssembler,
    last_displayed: String,
    formatted: bool,
    /// Items the server committed but has not finished transcribing.
    pending_items: HashSet<String>,
    /// Every item id the server has ever acknowledged, so repeated
    /// commit events for one item are counted once.
    acked_items: HashSet<String>,
    commits_sent: u32,
    commits_acked: u32,
}

impl ActiveState {
    /// Every commit we sent has been acknowledged and transcribed.
    fn settled(&self) -> bool {
        self.commits_acked >= self.commits_sent && self.pending_items.is_empty()
    }
}

/// One dictation pipeline instance, reused across sessions.
pub struct DictationPipeline<C> {
    recorder: AudioSessionRecorder,
    injection: InjectionController,
    formatter: Option<FormattingPipeline<C>>,
    glossary: Vec<PersonalGlossaryEntry>,
    commit_interval: Duration,
    active: Option<ActiveState>,
}

impl<C: RewriteClient> DictationPipeline<C> {
    pub fn new(
        recorder: AudioSessionRecorder,
        injection: InjectionController,
        formatter: Option<FormattingPipeline<C>>,
        glossary: Vec<PersonalGlossaryEntry>,
    ) -> Self {
        Self {
            recorder,
            injection,
            formatter,
            glossary,
            commit_interval: COMMIT_INTERVAL,
            active: None,
        }
    }

    /// Override the manual-commit cadence. Tests use a short one.
    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Begin a session. `formatted` selects whether the formatting pass
    /// runs at the end. Returns the recording session id.
    pub fn begin_session(&mut self, formatted: bool) -> Result<String, PipelineError> {
        let session_id = self.recorder.start_session().unwrap_or_else(|e| {
            // Recording is best-effort; dictation works without it.
            warn!("session recording unavailable: {e}");
            String::new()
        });
        self.injection.start_session();
        self.active = Some(ActiveState {
            assembler: TranscriptAssembler::new(),
            last_displayed: String::new(),
            formatted,
            pending_items: HashSet::new(),
            acked_items: HashSet::new(),
            commits_sent: 0,
            commits_acked: 0,
        });
        info!("dictation session started (formatted: {formatted})");
        Ok(session_id)
    }

    /// Drive a connected realtime session to completion: forward audio
    /// chunks until the channel closes (the host closes it on shortcut
    /// release), then commit, drain the remaining events, and finalize.
    pub async fn run_session(
        &mut self,
        mut session: RealtimeSession,
        mut audio: mpsc::Receiver<Vec<i16>>,
    ) -> Result<SessionOutcome, PipelineError> {
        if self.active.is_none() {
            return Err(PipelineError::NoActiveSession);
        }

        let mut failed = false;
        let mut uncommitted = false;
        let mut committed_any = false;
        let mut commit_timer = tokio::time::interval_at(
            Instant::now() + self.commit_interval,
            self.commit_interval,
        );
        // Ticks pile up while the timer branch is disabled below; they
        // must not fire in a burst once audio resumes.
        commit_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                chunk = audio.recv() => match chunk {
                    Some(samples) => {
                        if let Err(e) = self.recorder.append_sent_audio(&samples) {
                            warn!("failed to record audio chunk: {e}");
                        }
                        if let Err(e) = session.append_audio(&pcm16_bytes(&samples)).await {
                            // Finalize with whatever was transcribed so
                            // far rather than abandoning the session.
                            warn!("audio send failed, ending session: {e}");
                            failed = true;
                            break;
                        }
                        if !uncommitted {
                            // Start the commit window at the first
                            // buffered chunk, not at some stale tick.
                            commit_timer.reset();
                            uncommitted = true;
                        }
                    }
                    None => break,
                },
                _ = commit_timer.tick(), if uncommitted => {
                    if let Err(e) = session.commit().await {
                        warn!("commit failed, ending session: {e}");
                        failed = true;
                        break;
                    }
                    if let Some(state) = self.active.as_mut() {
                        state.commits_sent += 1;
                    }
                    uncommitted = false;
                    committed_any = true;
                }
                event = session.next_event() => match event {
                    Some(ServerEvent::Error { message }) => {
                        warn!("realtime session failed: {message}");
                        failed = true;
                        break;
                    }
                    Some(event) => self.apply_server_event(&event),
                    None => {
                        failed = true;
                        break;
                    }
                },
            }
        }

        if !failed {
            if uncommitted {
                match session.commit().await {
                    Ok(()) => {
                        if let Some(state) = self.active.as_mut() {
                            state.commits_sent += 1;
                        }
                        committed_any = true;
                    }
                    Err(e) => warn!("final commit failed: {e}"),
                }
            }
            // A session that never sent a commit has nothing left to
            // wait for.
            if committed_any {
                self.drain_final_events(&mut session).await;
            }
        }
        session.close().await;
        self.finalize().await
    }

    /// After the final commit, wait (bounded) for the server to finish
    /// every item it has committed.
    async fn drain_final_events(&mut self, session: &mut RealtimeSession) {
        let deadline = Instant::now() + FINAL_EVENT_WAIT;
        loop {
            if self.active.as_ref().map(|s| s.settled()).unwrap_or(true) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, session.next_event()).await {
                Ok(Some(ServerEvent::Error { message })) => {
                    warn!("realtime session failed while draining: {message}");
                    break;
                }
                Ok(Some(event)) => self.apply_server_event(&event),
                Ok(None) => break,
                Err(_) => {
                    warn!("timed out waiting for final transcription events");
                    break;
                }
            }
        }
    }

    /// Feed one server event through the recorder, the assembler, and
    /// live injection.
    pub fn apply_server_event(&mut self, event: &ServerEvent) {
        let Some(state) = self.active.as_mut() else {
            return;
        };

        match event {
            ServerEvent::InputAudioCommitted { item_id, .. } => {
                if state.acked_items.insert(item_id.clone()) {
                    state.pending_items.insert(item_id.clone());
                    state.commits_acked += 1;
                }
                if let Err(e) = self.recorder.commit(item_id) {
                    warn!("failed to seal audio chunk {item_id}: {e}");
                }
            }
            ServerEvent::TranscriptionCompleted { item_id, .. } => {
                state.pending_items.remove(item_id);
            }
            _ => {}
        }

        state.assembler.apply(event);
        let text = state.assembler.display_text();
        if !text.is_empty() && text != state.last_displayed {
            state.last_displayed = text.clone();
            if !self.injection.insert_final(&text) {
                debug!("live injection attempt failed, will retry on next revision");
            }
        }
    }

    /// Close out the session: run the formatting pass if requested,
    /// inject the final text, persist the transcript, and report.
    pub async fn finalize(&mut self) -> Result<SessionOutcome, PipelineError> {
        let state = self.active.take().ok_or(PipelineError::NoActiveSession)?;
        let raw = state.assembler.display_text();

        let transcript = if state.formatted && !raw.is_empty() {
            match &self.formatter {
                Some(formatter) => match formatter.format(&raw, &self.glossary).await {
                    Ok(formatted) => formatted,
                    Err(e) => {
                        // The raw transcript is always an acceptable
                        // result.
                        warn!("formatting failed, keeping raw transcript: {e}");
                        raw.clone()
                    }
                },
                None => raw.clone(),
            }
        } else {
            raw.clone()
        };

        if !transcript.is_empty() && transcript != state.last_displayed {
            self.injection.insert_final(&transcript);
        }

        if !transcript.is_empty() {
            if let Err(e) = self.recorder.set_transcript(&transcript) {
                warn!("failed to persist transcript: {e}");
            }
        }
        if let Err(e) = self.recorder.end_session() {
            warn!("failed to close recording session: {e}");
        }

        let result = self.injection.finish_session();
        info!(
            "dictation session finished ({} chars, manual paste: {})",
            transcript.chars().count(),
            result.requires_manual_paste
        );
        Ok(SessionOutcome {
            transcript,
            requires_manual_paste: result.requires_manual_paste,
        })
    }

    /// Abort the active session without injecting anything further.
    /// Text already injected live is left in place.
    pub async fn cancel(&mut self, session: Option<RealtimeSession>) {
        if let Some(session) = session {
            session.close().await;
        }
        if self.active.take().is_some() {
            if let Err(e) = self.recorder.end_session() {
                warn!("failed to close recording session: {e}");
            }
            let _ = self.injection.finish_session();
            info!("dictation session cancelled");
        }
    }
}

fn pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::{
        FocusedTextContext, FocusedTextSource, FrontmostApp, KeyEventSink, TextInserter,
    };
    use crate::realtime::{RealtimeConfig, SessionConfig, VadMode};
    use futures_util::{SinkExt, StreamExt};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio_tungstenite::tungstenite::Message;

    struct NullClient;
    impl RewriteClient for NullClient {
        async fn rewrite(&self, _model: &str, _prompt: &str) -> Result<String, String> {
            Err("unused".to_string())
        }
    }

    struct UppercaseClient;
    impl RewriteClient for UppercaseClient {
        async fn rewrite(&self, _model: &str, prompt: &str) -> Result<String, String> {
            // The dictated text is the prompt's final line.
            Ok(prompt.lines().last().unwrap_or("").to_uppercase())
        }
    }

    struct FailingClient;
    impl RewriteClient for FailingClient {
        async fn rewrite(&self, _model: &str, _prompt: &str) -> Result<String, String> {
            Err("service unavailable".to_string())
        }
    }

    struct StaticFrontmost;
    impl FrontmostApp for StaticFrontmost {
        fn frontmost_app_id(&self) -> Option<String> {
            Some("com.example.editor".to_string())
        }
    }

    struct LineStartFocus;
    impl FocusedTextSource for LineStartFocus {
        fn focused_text_context(&self) -> Option<FocusedTextContext> {
            Some(FocusedTextContext {
                value: String::new(),
                caret_index: 0,
            })
        }
    }

    #[derive(Clone)]
    struct RecordingInserter {
        calls: Arc<Mutex<Vec<String>>>,
        accept: Arc<AtomicBool>,
    }
    impl RecordingInserter {
        fn new(accept: bool) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                accept: Arc::new(AtomicBool::new(accept)),
            }
        }
    }
    impl TextInserter for RecordingInserter {
        fn insert(&self, text: &str) -> bool {
            self.calls.lock().unwrap().push(text.to_string());
            self.accept.load(Ordering::SeqCst)
        }
    }

    struct AcceptingKeys;
    impl KeyEventSink for AcceptingKeys {
        fn post_backspaces(&self, _count: usize) -> bool {
            true
        }
        fn post_text(&self, _text: &str) -> bool {
            true
        }
    }

    fn injection(inserter: &RecordingInserter) -> InjectionController {
        InjectionController::new(
            "dev.taptype.app",
            Box::new(StaticFrontmost),
            Box::new(LineStartFocus),
            Box::new(inserter.clone()),
            Box::new(RecordingInserter::new(false)),
            Box::new(AcceptingKeys),
        )
    }

    fn pipeline<C: RewriteClient>(
        root: &std::path::Path,
        inserter: &RecordingInserter,
        formatter: Option<FormattingPipeline<C>>,
    ) -> DictationPipeline<C> {
        DictationPipeline::new(
            AudioSessionRecorder::new(root, 5),
            injection(inserter),
            formatter,
            Vec::new(),
        )
    }

    fn delta(item_id: &str, delta: &str) -> ServerEvent {
        ServerEvent::TranscriptionDelta {
            item_id: item_id.to_string(),
            content_index: 0,
            delta: delta.to_string(),
        }
    }

    fn completed(item_id: &str, transcript: &str) -> ServerEvent {
        ServerEvent::TranscriptionCompleted {
            item_id: item_id.to_string(),
            content_index: 0,
            transcript: transcript.to_string(),
        }
    }

    fn committed(item_id: &str) -> ServerEvent {
        ServerEvent::InputAudioCommitted {
            item_id: item_id.to_string(),
            previous_item_id: None,
        }
    }

    #[tokio::test]
    async fn live_revisions_are_injected_and_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let mut pipeline = pipeline::<NullClient>(dir.path(), &inserter, None);

        pipeline.begin_session(false).unwrap();
        pipeline.apply_server_event(&committed("item_1"));
        pipeline.apply_server_event(&delta("item_1", "hello"));
        pipeline.apply_server_event(&completed("item_1", "hello world"));
        let outcome = pipeline.finalize().await.unwrap();

        assert_eq!(outcome.transcript, "hello world");
        assert!(!outcome.requires_manual_paste);
        // "hello", then the revision tail after five backspaces kept
        // "hello" and typed " world".
        assert_eq!(
            inserter.calls.lock().unwrap().as_slice(),
            &["hello".to_string(), " world".to_string()]
        );
    }

    #[tokio::test]
    async fn formatted_session_replaces_the_displayed_text() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let formatter = FormattingPipeline::new(UppercaseClient, Default::default());
        let mut pipeline = pipeline(dir.path(), &inserter, Some(formatter));

        pipeline.begin_session(true).unwrap();
        pipeline.apply_server_event(&committed("item_1"));
        pipeline.apply_server_event(&completed("item_1", "hello world"));
        let outcome = pipeline.finalize().await.unwrap();

        assert_eq!(outcome.transcript, "HELLO WORLD");
        // Live raw text first, then the formatted replacement.
        let calls = inserter.calls.lock().unwrap();
        assert_eq!(calls.first().unwrap(), "hello world");
        assert!(calls.iter().any(|c| c.contains("HELLO")));
    }

    #[tokio::test]
    async fn formatting_failure_falls_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let formatter = FormattingPipeline::new(
            FailingClient,
            crate::formatting::FormatterConfig {
                retry_delay: Duration::from_millis(0),
                ..Default::default()
            },
        );
        let mut pipeline = pipeline(dir.path(), &inserter, Some(formatter));

        pipeline.begin_session(true).unwrap();
        pipeline.apply_server_event(&committed("item_1"));
        pipeline.apply_server_event(&completed("item_1", "hello world"));
        let outcome = pipeline.finalize().await.unwrap();

        assert_eq!(outcome.transcript, "hello world");
        assert!(!outcome.requires_manual_paste);
    }

    #[tokio::test]
    async fn silent_session_requires_manual_paste() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let mut pipeline = pipeline::<NullClient>(dir.path(), &inserter, None);

        pipeline.begin_session(false).unwrap();
        let outcome = pipeline.finalize().await.unwrap();

        assert_eq!(outcome.transcript, "");
        assert!(outcome.requires_manual_paste);
        assert!(inserter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_injection_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(false);
        let mut pipeline = pipeline::<NullClient>(dir.path(), &inserter, None);

        pipeline.begin_session(false).unwrap();
        pipeline.apply_server_event(&committed("item_1"));
        pipeline.apply_server_event(&completed("item_1", "hello"));
        let outcome = pipeline.finalize().await.unwrap();

        assert_eq!(outcome.transcript, "hello");
        assert!(outcome.requires_manual_paste);
    }

    #[tokio::test]
    async fn committed_chunks_reach_the_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let mut pipeline = pipeline::<NullClient>(dir.path(), &inserter, None);

        let session_id = pipeline.begin_session(false).unwrap();
        pipeline.recorder.append_sent_audio(&[1, 2, 3]).unwrap();
        pipeline.apply_server_event(&committed("item_1"));
        pipeline.apply_server_event(&completed("item_1", "hi"));
        pipeline.finalize().await.unwrap();

        let index: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("index.json")).unwrap(),
        )
        .unwrap();
        let session = &index["sessions"][0];
        assert_eq!(session["session_id"], session_id.as_str());
        assert_eq!(session["chunks"][0]["item_id"], "item_1");
        assert_eq!(session["transcript"], "hi");
    }

    fn local_config(addr: std::net::SocketAddr) -> RealtimeConfig {
        RealtimeConfig {
            url: format!("ws://{addr}"),
            api_key: "sk-test".to_string(),
            session: SessionConfig::new("gpt-4o-transcribe", VadMode::Disabled),
        }
    }

    #[tokio::test]
    async fn transport_failure_mid_session_still_produces_an_outcome() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the handshake, swallow the configuration frame, then
        // drop the connection so every later send hits a dead socket.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
        });

        let session = RealtimeSession::connect(local_config(addr)).await.unwrap();
        server.await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let mut pipeline = pipeline::<NullClient>(dir.path(), &inserter, None)
            .with_commit_interval(Duration::from_millis(50));
        pipeline.begin_session(false).unwrap();

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for _ in 0..20 {
                if tx.send(vec![0i16; 240]).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        // The session must still end in an outcome, not an error.
        let outcome = pipeline.run_session(session, rx).await.unwrap();
        assert_eq!(outcome.transcript, "");
        assert!(outcome.requires_manual_paste);
        // The pipeline is reusable afterwards.
        pipeline.begin_session(false).unwrap();
    }

    #[tokio::test]
    async fn quiet_stretch_does_not_trigger_an_immediate_commit() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (log_tx, mut log_rx) = mpsc::unbounded_channel();
        // Acknowledge every commit with a committed + completed pair
        // and log the arrival time of each client frame.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut source) = ws.split();
            let mut item = 0u32;
            while let Some(Ok(Message::Text(text))) = source.next().await {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                let kind = value["type"].as_str().unwrap_or("").to_string();
                let _ = log_tx.send((std::time::Instant::now(), kind.clone()));
                if kind == "input_audio_buffer.commit" {
                    item += 1;
                    let committed = format!(
                        r#"{{"type":"input_audio_buffer.committed","item_id":"item_{item}"}}"#
                    );
                    let completed = format!(
                        r#"{{"type":"conversation.item.input_audio_transcription.completed","item_id":"item_{item}","content_index":0,"transcript":"part {item}"}}"#
                    );
                    if sink.send(Message::Text(committed.into())).await.is_err() {
                        break;
                    }
                    if sink.send(Message::Text(completed.into())).await.is_err() {
                        break;
                    }
                }
            }
        });

        let session = RealtimeSession::connect(local_config(addr)).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let mut pipeline = pipeline::<NullClient>(dir.path(), &inserter, None)
            .with_commit_interval(Duration::from_millis(200));
        pipeline.begin_session(false).unwrap();

        // One chunk, a quiet stretch longer than the interval, then a
        // second chunk.
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            tx.send(vec![0i16; 240]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(600)).await;
            tx.send(vec![0i16; 240]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(400)).await;
        });

        let outcome = pipeline.run_session(session, rx).await.unwrap();
        assert_eq!(outcome.transcript, "part 1 part 2");

        let _ = server.await;
        let mut frames = Vec::new();
        while let Ok(frame) = log_rx.try_recv() {
            frames.push(frame);
        }
        let appends: Vec<_> = frames
            .iter()
            .filter(|(_, kind)| kind == "input_audio_buffer.append")
            .collect();
        let commits: Vec<_> = frames
            .iter()
            .filter(|(_, kind)| kind == "input_audio_buffer.commit")
            .collect();
        assert_eq!(appends.len(), 2);
        assert_eq!(commits.len(), 2);
        // The second commit waits out a full interval after audio
        // resumes; a tick missed during the quiet stretch must not
        // fire the moment the buffer becomes non-empty again.
        let gap = commits[1].0.duration_since(appends[1].0);
        assert!(
            gap >= Duration::from_millis(100),
            "second commit arrived after only {gap:?}"
        );
    }

    #[tokio::test]
    async fn finalize_without_a_session_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let inserter = RecordingInserter::new(true);
        let mut pipeline = pipeline::<NullClient>(dir.path(), &inserter, None);
        assert!(matches!(
            pipeline.finalize().await,
            Err(PipelineError::NoActiveSession)
        ));
    }
}
