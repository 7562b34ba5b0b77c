//! Streaming engine
//!
//! Owns the session and is the only place its state changes. A merge finishing
//! or the source running out happens inside the pacer; a watcher task folds
//! those into the session as soon as the pacer reports them, and every control
//! call settles the session again before validating its own transition.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::broadcast::Broadcaster;
use crate::config::EngineConfig;
use crate::effect::{ClipLibrary, EffectInjector, EffectRequest};
use crate::error::{Error, Result};
use crate::pacer::{pace, PacerStatus};
use crate::probe::BitrateProbe;
use crate::registry::{ListenerId, ListenerRegistry, ListenerStream};
use crate::stats::BroadcastStats;

use super::command::{Command, CommandOutcome};
use super::state::{OnAir, Session, SessionState, Settled, Source};

/// Result of an effect injection that was allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// The clip is being mixed in
    Merging,
    /// The mixer failed; the broadcast carries on unchanged
    Abandoned,
}

/// Plays one source to many listeners and splices effects into it
pub struct StreamingEngine {
    config: EngineConfig,
    broadcaster: Broadcaster,
    probe: BitrateProbe,
    injector: EffectInjector,
    clips: ClipLibrary,
    session: Arc<Mutex<Session>>,
    states: watch::Receiver<SessionState>,
}

impl StreamingEngine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(ListenerRegistry::new(config.listener_capacity));
        let session = Session::new();
        Self {
            broadcaster: Broadcaster::new(registry, config.listener_write_timeout),
            probe: BitrateProbe::new(config.clone()),
            injector: EffectInjector::new(config.clone()),
            clips: ClipLibrary::new(config.clip_directory.clone()),
            states: session.subscribe(),
            session: Arc::new(Mutex::new(session)),
            config,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Listener registry shared with the broadcaster
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        self.broadcaster.registry()
    }

    /// Effect clips available to [`StreamingEngine::inject_named`]
    pub fn clips(&self) -> &ClipLibrary {
        &self.clips
    }

    /// Add a listener; it receives chunks from the next tick on
    pub async fn register_listener(&self) -> (ListenerId, ListenerStream) {
        let (id, stream) = self.registry().register().await;
        tracing::info!(listener = %id, "Listener connected");
        (id, stream)
    }

    /// Remove a listener; unknown ids are ignored
    pub async fn unregister_listener(&self, id: ListenerId) {
        if self.registry().unregister(id).await {
            tracing::info!(listener = %id, "Listener disconnected");
        }
    }

    /// Ids of every registered listener, in no particular order
    pub async fn listeners(&self) -> Vec<ListenerId> {
        let mut ids = Vec::new();
        self.registry().for_each(|id, _| ids.push(id)).await;
        ids
    }

    /// Current session state
    pub async fn state(&self) -> SessionState {
        self.settled().await.state()
    }

    /// Watch session state changes, including the ones the pacer drives
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.states.clone()
    }

    /// Source currently on air
    pub async fn source(&self) -> Option<Source> {
        self.settled().await.source().cloned()
    }

    /// Delivery counters since the engine was created
    pub fn stats(&self) -> BroadcastStats {
        self.broadcaster.stats()
    }

    /// Start broadcasting `path`
    ///
    /// Only valid while Idle. A source that cannot be opened leaves the
    /// session Idle.
    pub async fn start(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut session = self.settled().await;

        if session.state() != SessionState::Idle {
            return Err(Error::InvalidState {
                operation: "start",
                state: session.state(),
            });
        }

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| Error::SourceNotFound {
                path: path.to_path_buf(),
                source,
            })?;

        let bitrate = self.probe.probe(path).await;
        let (pacer, paced) = pace(Box::new(file), bitrate, &self.config);

        let broadcaster = self.broadcaster.clone();
        let pump = tokio::spawn(async move { broadcaster.pump(paced).await });
        watch_pacer(self.session.clone(), pacer.subscribe());

        session.begin(OnAir {
            source: Source {
                path: path.to_path_buf(),
                bitrate,
            },
            pacer,
            pump,
            splice: None,
            started_at: Instant::now(),
        });

        tracing::info!(source = %path.display(), bitrate, "Streaming started");
        Ok(())
    }

    /// Stop broadcasting; does nothing while Idle
    pub async fn stop(&self) {
        let mut session = self.settled().await;
        let elapsed = session.duration();

        match session.end() {
            Some(on_air) => {
                let source = on_air.source.path.clone();
                on_air.release().await;
                tracing::info!(source = %source.display(), on_air = ?elapsed, "Streaming stopped");
            }
            None => tracing::debug!("Stop requested while idle"),
        }
    }

    /// Mix an effect clip into the broadcast
    ///
    /// Only valid while Streaming. A mixer failure is not an error: the
    /// broadcast continues and [`InjectOutcome::Abandoned`] is returned.
    pub async fn inject_effect(&self, request: EffectRequest) -> Result<InjectOutcome> {
        let mut session = self.settled().await;
        let state = session.state();

        let on_air = match session.on_air() {
            Some(on_air) if state == SessionState::Streaming => on_air,
            _ => {
                return Err(Error::InvalidState {
                    operation: "inject effect",
                    state,
                })
            }
        };

        let bytes_per_sec = self.config.byte_rate(on_air.source.bitrate);
        match self.injector.inject(&on_air.pacer, bytes_per_sec, &request).await {
            Ok(splice) => {
                session.begin_merge(splice);
                Ok(InjectOutcome::Merging)
            }
            Err(e) => {
                tracing::warn!(clip = %request.clip.display(), error = %e, "Effect abandoned");
                Ok(InjectOutcome::Abandoned)
            }
        }
    }

    /// Mix the library clip matching `name` into the broadcast
    pub async fn inject_named(&self, name: &str) -> Result<InjectOutcome> {
        let state = self.state().await;
        if state != SessionState::Streaming {
            return Err(Error::InvalidState {
                operation: "inject effect",
                state,
            });
        }

        let clip = self.clips.find(name).await?;
        self.inject_effect(EffectRequest::new(clip, &self.config)).await
    }

    /// Carry out a free-text command
    ///
    /// Commands that do not apply in the current state are ignored rather
    /// than reported as errors.
    pub async fn handle_command(&self, text: &str) -> Result<CommandOutcome> {
        let Some(command) = Command::parse(text) else {
            tracing::debug!("Empty command ignored");
            return Ok(CommandOutcome::Ignored);
        };

        tracing::debug!(command = ?command, "Handling command");

        let result = match command {
            Command::Start => self.start(&self.config.default_source).await,
            Command::Stop => {
                self.stop().await;
                Ok(())
            }
            Command::Effect(name) => match self.inject_named(&name).await {
                Ok(InjectOutcome::Merging) => Ok(()),
                Ok(InjectOutcome::Abandoned) => return Ok(CommandOutcome::Ignored),
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(()) => Ok(CommandOutcome::Ok),
            Err(e) if e.is_invalid_state() => {
                tracing::debug!(error = %e, "Command ignored");
                Ok(CommandOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    /// Lock the session after applying transitions the pacer made on its own
    async fn settled(&self) -> MutexGuard<'_, Session> {
        let mut session = self.session.lock().await;
        let settled = session.settle();
        clean_up(settled).await;
        session
    }
}

/// Release whatever a settled transition left behind
async fn clean_up(settled: Settled) {
    match settled {
        Settled::Unchanged => {}
        Settled::MergeEnded(splice) => {
            tracing::info!(clip = %splice.clip().display(), "Effect merge ended");
            splice.finish().await;
        }
        Settled::SourceEnded(on_air) => {
            let source = on_air.source.path.clone();
            on_air.release().await;
            tracing::info!(source = %source.display(), "Source ended");
        }
    }
}

/// Settle the session whenever the pacer goes back to a plain source or ends
///
/// Exits once the pacer is gone. Settling is idempotent, so a watcher that
/// outlives its session only ever finds nothing to do.
fn watch_pacer(session: Arc<Mutex<Session>>, mut status: watch::Receiver<PacerStatus>) {
    tokio::spawn(async move {
        loop {
            let alive = status.changed().await.is_ok();
            let current = *status.borrow_and_update();

            if !alive || matches!(current, PacerStatus::Running | PacerStatus::Finished) {
                let settled = session.lock().await.settle();
                clean_up(settled).await;
            }
            if !alive {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::testutil::{fake_tool, passthrough_tool, pattern, source_file};

    fn config(dir: &Path, tool: std::path::PathBuf) -> EngineConfig {
        EngineConfig::default()
            .tool_path(tool)
            .chunk_size(512)
            .mix_start_timeout(Duration::from_millis(500))
            .clip_directory(dir.join("fx"))
            .default_source(dir.join("song.mp3"))
    }

    async fn wait_for_state(engine: &StreamingEngine, wanted: SessionState) {
        timeout(Duration::from_secs(5), async {
            while engine.state().await != wanted {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_missing_source_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "128k", "1")));

        let result = engine.start(dir.path().join("nope.mp3")).await;

        assert!(matches!(result, Err(Error::SourceNotFound { .. })));
        assert_eq!(engine.state().await, SessionState::Idle);
        assert!(engine.source().await.is_none());
    }

    #[tokio::test]
    async fn test_listener_registration() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "128k", "1")));

        let (a, _stream_a) = engine.register_listener().await;
        let (b, _stream_b) = engine.register_listener().await;
        assert_ne!(a, b);

        let mut ids = engine.listeners().await;
        ids.sort();
        assert_eq!(ids, vec![a, b]);

        engine.unregister_listener(a).await;
        engine.unregister_listener(a).await;
        assert_eq!(engine.listeners().await, vec![b]);
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "128k", "1")));

        engine.stop().await;
        assert_eq!(engine.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let song = source_file(dir.path(), "song.mp3", 200_000);
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "128k", "1")));
        let (_id, mut listener) = engine.register_listener().await;

        engine.start(&song).await.unwrap();
        assert_eq!(engine.state().await, SessionState::Streaming);
        assert_eq!(engine.source().await.unwrap().bitrate, 128_000);

        assert!(listener.recv().await.is_some());

        engine.stop().await;
        assert_eq!(engine.state().await, SessionState::Idle);
        assert!(engine.source().await.is_none());
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let song = source_file(dir.path(), "song.mp3", 200_000);
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "128k", "1")));

        engine.start(&song).await.unwrap();
        let result = engine.start(&song).await;

        assert!(matches!(
            result,
            Err(Error::InvalidState { operation: "start", state: SessionState::Streaming })
        ));
        assert_eq!(engine.state().await, SessionState::Streaming);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_inject_while_idle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "128k", "1")));

        let request = EffectRequest::new(dir.path().join("boo.mp3"), engine.config());
        let result = engine.inject_effect(request).await;

        assert!(matches!(
            result,
            Err(Error::InvalidState { state: SessionState::Idle, .. })
        ));
        assert_eq!(engine.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_inject_merges_then_returns_to_streaming() {
        let dir = tempfile::tempdir().unwrap();
        // 64 kbit/s is 8000 B/s; a 0.25s clip covers 2000 live bytes
        let song = source_file(dir.path(), "song.mp3", 400_000);
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "64k", "0.25")));
        let (_id, mut listener) = engine.register_listener().await;

        engine.start(&song).await.unwrap();
        assert!(listener.recv().await.is_some());

        let request = EffectRequest::new(dir.path().join("boo.mp3"), engine.config());
        let outcome = engine.inject_effect(request.clone()).await.unwrap();
        assert_eq!(outcome, InjectOutcome::Merging);

        // A second effect is refused until the first one ends
        assert_eq!(engine.state().await, SessionState::Merging);
        assert!(engine.inject_effect(request).await.unwrap_err().is_invalid_state());

        for _ in 0..4 {
            assert!(timeout(Duration::from_secs(2), listener.recv()).await.unwrap().is_some());
        }

        wait_for_state(&engine, SessionState::Streaming).await;
        assert!(timeout(Duration::from_secs(2), listener.recv()).await.unwrap().is_some());

        engine.stop().await;
        assert_eq!(engine.state().await, SessionState::Idle);
    }

    async fn drain(listener: &mut ListenerStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(Some(chunk)) = timeout(Duration::from_millis(500), listener.recv()).await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_every_listener_hears_the_whole_source_through_a_merge() {
        let dir = tempfile::tempdir().unwrap();
        // 16000 B/s for 2s; a 0.25s clip covers 4000 live bytes
        let song = source_file(dir.path(), "song.mp3", 32_000);
        let engine = StreamingEngine::new(
            config(dir.path(), passthrough_tool(dir.path(), "128k", "0.25")).listener_capacity(1024),
        );
        let mut states = engine.watch_state();
        let (_a, mut listener_a) = engine.register_listener().await;
        let (_b, mut listener_b) = engine.register_listener().await;

        engine.start(&song).await.unwrap();
        let request = EffectRequest::new(dir.path().join("boo.mp3"), engine.config());
        assert_eq!(engine.inject_effect(request).await.unwrap(), InjectOutcome::Merging);
        assert_eq!(engine.state().await, SessionState::Merging);

        // Both transitions happen without any further call into the engine
        timeout(Duration::from_secs(5), states.wait_for(|s| *s == SessionState::Streaming))
            .await
            .unwrap()
            .unwrap();
        timeout(Duration::from_secs(10), states.wait_for(|s| *s == SessionState::Idle))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(drain(&mut listener_a).await, pattern(32_000));
        assert_eq!(drain(&mut listener_b).await, pattern(32_000));
    }

    #[tokio::test]
    async fn test_failed_inject_keeps_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let song = source_file(dir.path(), "song.mp3", 200_000);
        let tool = fake_tool(
            dir.path(),
            "case \"$2\" in\n  -B) echo 128k ;;\n  -D) echo 1 ;;\n  *) echo 'FAIL' >&2; exit 1 ;;\nesac",
        );
        let engine = StreamingEngine::new(config(dir.path(), tool));
        let (_id, mut listener) = engine.register_listener().await;

        engine.start(&song).await.unwrap();

        let request = EffectRequest::new(dir.path().join("boo.mp3"), engine.config());
        let outcome = engine.inject_effect(request).await.unwrap();

        assert_eq!(outcome, InjectOutcome::Abandoned);
        assert_eq!(engine.state().await, SessionState::Streaming);
        assert!(timeout(Duration::from_secs(2), listener.recv()).await.unwrap().is_some());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_source_end_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let song = source_file(dir.path(), "song.mp3", 3_000);
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "1M", "1")));

        engine.start(&song).await.unwrap();
        wait_for_state(&engine, SessionState::Idle).await;
        assert!(engine.source().await.is_none());
    }

    #[tokio::test]
    async fn test_handle_command() {
        let dir = tempfile::tempdir().unwrap();
        source_file(dir.path(), "song.mp3", 200_000);
        std::fs::create_dir(dir.path().join("fx")).unwrap();
        std::fs::write(dir.path().join("fx").join("Applause.mp3"), b"clip").unwrap();
        let engine = StreamingEngine::new(config(dir.path(), passthrough_tool(dir.path(), "128k", "0.1")));

        assert_eq!(engine.handle_command("").await.unwrap(), CommandOutcome::Ignored);
        assert_eq!(engine.handle_command("applause").await.unwrap(), CommandOutcome::Ignored);

        assert_eq!(engine.handle_command("Start").await.unwrap(), CommandOutcome::Ok);
        assert_eq!(engine.state().await, SessionState::Streaming);
        assert_eq!(engine.handle_command("start").await.unwrap(), CommandOutcome::Ignored);

        assert!(matches!(
            engine.handle_command("laser").await,
            Err(Error::ClipNotFound(_))
        ));

        assert_eq!(engine.handle_command("STOP").await.unwrap(), CommandOutcome::Ok);
        assert_eq!(engine.state().await, SessionState::Idle);
    }
}
