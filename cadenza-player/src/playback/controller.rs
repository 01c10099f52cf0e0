//! Command/state controller
//!
//! The controller task is the only owner of the [`PlaybackEngine`]. Commands
//! from surfaces and the route arbiter, engine callbacks, watchdog recovery
//! requests and the controller's own timers are all handled in one
//! `select!` loop, so every engine mutation and every snapshot write happens
//! on the same logical context.
//!
//! # State machine
//!
//! `Idle → Loading → Ready ⇄ Playing/Paused → Ended`
//!
//! A track is loaded and prepared; the engine answers with `Ready` (or a
//! source error) and the pending [`StartMode`] decides what happens next.
//!
//! # Fades
//!
//! Volume is an envelope in `[0, 1]` multiplied by the user master volume.
//! Explicit play/pause/skip use the manual fade duration; automatic advance
//! fades in over the crossfade duration; the end-of-track fade-out starts once
//! per track when the remaining time drops below the crossfade window.

use crate::config::{RuntimeSettings, KEY_VOLUME_LEVEL};
use crate::db::settings::SavedSession;
use crate::engine::{EngineEvent, EngineProbe, PlaybackEngine};
use crate::error::{Error, Result, SourceErrorKind};
use crate::library::{Library, Track};
use crate::playback::fader::{FadeEngine, FadeStep};
use crate::playback::persistence::{in_resume_band, PersistenceManager};
use crate::playback::queue::PlayQueue;
use crate::playback::watchdog::RecoveryRequest;
use crate::surfaces::SurfacePublisher;
use cadenza_common::events::{
    NoticeKind, PlaybackPhase, PlaybackSnapshot, PlayerEvent, RepeatMode, TrackId,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// `previous` restarts the current track instead when past this position
pub const PREVIOUS_RESTART_MS: u64 = 3000;

/// Command channel capacity
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Commands accepted from surfaces, OS media controls and the route arbiter
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Play a track: jump to it if queued, otherwise make it the whole queue
    Play(TrackId),
    PlayQueue {
        tracks: Vec<TrackId>,
        start_index: usize,
    },
    TogglePlayPause,
    Pause,
    Resume,
    Next,
    Previous,
    ToggleShuffle,
    ToggleRepeat,
    Seek(u64),
    Stop,
    Enqueue(TrackId),
    ToggleFavorite(TrackId),
    /// Answer the cold-start resume prompt: resume at the saved point or restart
    ResolveResumePrompt {
        resume: bool,
    },
    /// User master volume (0.0-1.0)
    SetVolume(f32),
}

/// Cloneable command entry point
///
/// Closed by the orchestrator at shutdown; sends then fail with
/// `Error::ChannelClosed`.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
    open: Arc<AtomicBool>,
}

impl CommandSender {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn send(&self, command: Command) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed("controller"));
        }
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::ChannelClosed("controller"))
    }

    /// Non-blocking send for callers outside async code
    pub fn try_send(&self, command: Command) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed("controller"));
        }
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::InvalidState("controller busy".into()),
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed("controller"),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Stop accepting commands
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Lifecycle messages from the orchestrator
#[derive(Debug)]
pub enum ControlMessage {
    /// Final persist, stop the engine, then reply and exit
    Shutdown(oneshot::Sender<()>),
}

/// What to do once a loading track reports ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Explicit user start: manual fade-in
    Manual,
    /// Automatic advance: crossfade-length fade-in
    Auto,
    /// Stay paused at the start
    Hold,
    /// Cold start: position at the saved point, stay paused
    Restore { position_ms: u64 },
}

/// Completion actions of fades
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeAction {
    PauseEngine,
    /// Load whatever the queue cursor points at
    LoadCurrent(StartMode),
}

/// Snapshot-affecting change being committed
enum Change {
    Track,
    PlayState,
    Shuffle,
    Repeat,
    Queue,
    Volume,
    Favorite(TrackId, bool),
    /// Snapshot only, no event
    Quiet,
}

/// Receivers the controller loop drains
pub struct ControllerChannels {
    pub commands: mpsc::Receiver<Command>,
    pub engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    pub recoveries: mpsc::Receiver<RecoveryRequest>,
    pub control: mpsc::Receiver<ControlMessage>,
}

pub struct ControllerParts {
    pub engine: Box<dyn PlaybackEngine>,
    pub library: Arc<dyn Library>,
    pub persistence: PersistenceManager,
    pub publisher: SurfacePublisher,
    pub settings: Arc<RuntimeSettings>,
}

pub struct Controller {
    engine: Box<dyn PlaybackEngine>,
    probe: Arc<dyn EngineProbe>,
    library: Arc<dyn Library>,
    persistence: PersistenceManager,
    publisher: SurfacePublisher,
    settings: Arc<RuntimeSettings>,

    queue: PlayQueue,
    repeat: RepeatMode,
    phase: PlaybackPhase,
    is_playing: bool,
    current: Option<Track>,
    favorite: bool,
    pending_start: Option<StartMode>,
    /// Saved position awaiting the resume-or-restart answer
    pending_prompt: Option<u64>,

    fader: FadeEngine<FadeAction>,
    envelope: f32,
    user_volume: f32,
    /// End-of-track fade-out already started for the loaded track
    track_faded_out: bool,

    rng: StdRng,
}

impl Controller {
    pub fn new(parts: ControllerParts) -> Self {
        let probe = parts.engine.probe();
        let user_volume = parts.settings.volume_level.clamp(0.0, 1.0);
        let mut controller = Self {
            engine: parts.engine,
            probe,
            library: parts.library,
            persistence: parts.persistence,
            publisher: parts.publisher,
            fader: FadeEngine::new(parts.settings.fade_curve),
            settings: parts.settings,
            queue: PlayQueue::new(),
            repeat: RepeatMode::Off,
            phase: PlaybackPhase::Idle,
            is_playing: false,
            current: None,
            favorite: false,
            pending_start: None,
            pending_prompt: None,
            envelope: 1.0,
            user_volume,
            track_faded_out: false,
            rng: StdRng::from_entropy(),
        };
        controller.apply_envelope(1.0);
        controller
    }

    /// Use a fixed shuffle seed
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // ========================================================================
    // Snapshot and persistence
    // ========================================================================

    /// Position to report and persist
    ///
    /// While a restore is still loading, the engine has not been positioned
    /// yet, so the saved position stands in.
    fn position_ms(&self) -> u64 {
        match self.pending_start {
            Some(StartMode::Restore { position_ms }) => position_ms,
            _ if self.current.is_some() => self.probe.position_ms(),
            _ => 0,
        }
    }

    fn duration_ms(&self) -> u64 {
        match self.probe.duration_ms() {
            0 => self.current.as_ref().map(|t| t.duration_ms).unwrap_or(0),
            d => d,
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_id: self.current.as_ref().map(|t| t.id),
            title: self.current.as_ref().map(|t| t.title.clone()),
            original_queue: self.queue.original().to_vec(),
            queue: self.queue.effective(),
            current_index: self.queue.current_index(),
            position_ms: self.position_ms(),
            duration_ms: self.duration_ms(),
            shuffle: self.queue.is_shuffled(),
            repeat: self.repeat,
            is_playing: self.is_playing,
            volume: self.user_volume,
            phase: self.phase,
            favorite: self.current.is_some() && self.favorite,
        }
    }

    fn session(&self) -> SavedSession {
        SavedSession {
            last_track_id: self.current.as_ref().map(|t| t.id),
            last_position_ms: self.position_ms(),
            queue: self.queue.original().to_vec(),
            shuffle: self.queue.is_shuffled(),
            repeat: self.repeat,
        }
    }

    /// Update the snapshot, request a persist and notify surfaces
    fn commit(&mut self, change: Change) {
        let snapshot = self.snapshot();
        let timestamp = cadenza_common::time::now();
        let event = match change {
            Change::Track => Some(PlayerEvent::TrackChanged {
                snapshot: snapshot.clone(),
                timestamp,
            }),
            Change::PlayState => Some(PlayerEvent::PlayStateChanged {
                is_playing: self.is_playing,
                phase: self.phase,
                snapshot: snapshot.clone(),
                timestamp,
            }),
            Change::Shuffle => Some(PlayerEvent::ShuffleChanged {
                shuffle: snapshot.shuffle,
                snapshot: snapshot.clone(),
                timestamp,
            }),
            Change::Repeat => Some(PlayerEvent::RepeatChanged {
                repeat: self.repeat,
                snapshot: snapshot.clone(),
                timestamp,
            }),
            Change::Queue => Some(PlayerEvent::QueueChanged {
                queue: snapshot.queue.clone(),
                current_index: snapshot.current_index,
                timestamp,
            }),
            Change::Volume => Some(PlayerEvent::VolumeChanged {
                volume: self.user_volume,
                timestamp,
            }),
            Change::Favorite(track_id, favorite) => Some(PlayerEvent::FavoriteChanged {
                track_id,
                favorite,
                timestamp,
            }),
            Change::Quiet => None,
        };

        self.persistence.stage_session(self.session());
        self.persistence.persist();
        self.publisher.publish(snapshot, event);
    }

    /// Save (or clear) the resume point of the loaded track
    ///
    /// `finished` marks a natural end: the entry is cleared.
    fn leave_track(&mut self, finished: bool) {
        let Some(track) = &self.current else {
            return;
        };
        if finished {
            self.persistence.clear_position(&track.locator);
        } else {
            let position = self.position_ms();
            let duration = self.duration_ms();
            self.persistence
                .save_progress(&track.locator, position, duration);
        }
    }

    // ========================================================================
    // Volume envelope
    // ========================================================================

    fn apply_envelope(&mut self, envelope: f32) {
        self.envelope = envelope.clamp(0.0, 1.0);
        let output = self.envelope * self.user_volume;
        if let Err(e) = self.engine.set_volume(output) {
            warn!("Failed to set engine volume to {:.3}: {}", output, e);
        }
    }

    fn start_fade(&mut self, target: f32, duration_ms: u64, action: Option<FadeAction>) {
        trace!(
            "Fade {:.2} -> {:.2} over {} ms ({:?})",
            self.envelope,
            target,
            duration_ms,
            action
        );
        let step = self.fader.fade_to(
            self.envelope,
            target,
            Duration::from_millis(duration_ms),
            Instant::now(),
            action,
        );
        self.apply_fade_step(step);
    }

    fn step_fade(&mut self) {
        let step = self.fader.step(Instant::now());
        self.apply_fade_step(step);
    }

    fn apply_fade_step(&mut self, step: FadeStep<FadeAction>) {
        match step {
            FadeStep::Idle => {}
            FadeStep::Write(level) => self.apply_envelope(level),
            FadeStep::Finished {
                volume,
                on_complete,
            } => {
                self.apply_envelope(volume);
                match on_complete {
                    Some(FadeAction::PauseEngine) => {
                        if let Err(e) = self.engine.pause() {
                            warn!("Engine pause failed: {}", e);
                        }
                    }
                    Some(FadeAction::LoadCurrent(start)) => self.load_current(start),
                    None => {}
                }
            }
        }
    }

    /// A skip fade-out is waiting to load the next track
    fn skip_pending(&self) -> bool {
        matches!(
            self.fader.active().and_then(|job| job.on_complete),
            Some(FadeAction::LoadCurrent(_))
        )
    }

    // ========================================================================
    // Loading
    // ========================================================================

    fn load_current(&mut self, start: StartMode) {
        match self.queue.current_index() {
            Some(index) => self.load_index(index, start),
            None => self.halt(),
        }
    }

    /// Load the queue entry at `index`, skipping entries the library no
    /// longer knows
    fn load_index(&mut self, mut index: usize, start: StartMode) {
        self.fader.cancel();
        loop {
            let Some(id) = self.queue.jump(index) else {
                self.halt();
                return;
            };
            if let Some(track) = self.library.resolve(id) {
                self.begin_track(track, start);
                return;
            }

            warn!("Track {} is not in the library, dropping it from the queue", id);
            self.queue.remove(id);
            self.commit(Change::Queue);
            match self.index_after_removal() {
                Some(next) => index = next,
                None => {
                    self.halt();
                    return;
                }
            }
        }
    }

    /// Where to continue after the current entry was removed from the queue
    fn index_after_removal(&self) -> Option<usize> {
        match self.queue.current_index() {
            Some(index) => Some(index),
            None => (self.repeat == RepeatMode::All && !self.queue.is_empty()).then_some(0),
        }
    }

    fn begin_track(&mut self, track: Track, start: StartMode) {
        debug!("Loading track {} ({}) with {:?}", track.id, track.locator, start);

        let prepared = self
            .engine
            .load(&track)
            .and_then(|()| self.engine.prepare());
        if let Err(e) = prepared {
            error!("Engine failed to load track {}: {}", track.id, e);
            self.current = None;
            self.pending_start = None;
            self.phase = PlaybackPhase::Idle;
            self.is_playing = false;
            self.commit(Change::PlayState);
            return;
        }

        self.favorite = self.library.is_favorite(track.id);
        self.current = Some(track);
        self.pending_start = Some(start);
        self.pending_prompt = None;
        self.track_faded_out = false;
        self.phase = PlaybackPhase::Loading;
        self.is_playing = matches!(start, StartMode::Manual | StartMode::Auto);
        if self.is_playing {
            self.apply_envelope(0.0);
        }
        self.commit(Change::Track);
    }

    /// Stop at the end of the queue (or when nothing playable is left)
    fn halt(&mut self) {
        info!("Playback halted: end of queue");
        self.fader.cancel();
        self.pending_start = None;
        self.is_playing = false;
        self.phase = if self.current.is_some() || !self.queue.is_empty() {
            PlaybackPhase::Ended
        } else {
            PlaybackPhase::Idle
        };
        if let Err(e) = self.engine.pause() {
            debug!("Engine pause at halt failed: {}", e);
        }
        self.apply_envelope(1.0);
        self.commit(Change::PlayState);
    }

    /// Start rendering from silence with a fade-in of `fade_ms`
    fn begin_playback(&mut self, fade_ms: u64) {
        self.apply_envelope(0.0);
        self.start_fade(1.0, fade_ms, None);
        if let Err(e) = self.engine.play() {
            error!("Engine play failed: {}", e);
            self.fader.cancel();
            self.is_playing = false;
            self.phase = PlaybackPhase::Paused;
            self.commit(Change::PlayState);
            return;
        }
        self.is_playing = true;
        self.phase = PlaybackPhase::Playing;
        self.commit(Change::PlayState);
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::Play(id) => self.play(id),
            Command::PlayQueue {
                tracks,
                start_index,
            } => self.play_queue(tracks, start_index),
            Command::TogglePlayPause => self.toggle_play_pause(),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Next => self.next(),
            Command::Previous => self.previous(),
            Command::ToggleShuffle => self.toggle_shuffle(),
            Command::ToggleRepeat => self.toggle_repeat(),
            Command::Seek(position_ms) => self.seek(position_ms),
            Command::Stop => self.stop(),
            Command::Enqueue(id) => self.enqueue(id),
            Command::ToggleFavorite(id) => self.toggle_favorite(id),
            Command::ResolveResumePrompt { resume } => self.resolve_resume_prompt(resume),
            Command::SetVolume(level) => self.set_volume(level),
        }
    }

    fn play(&mut self, id: TrackId) {
        if let Some(index) = self.queue.position_of(id) {
            self.leave_track(false);
            self.load_index(index, StartMode::Manual);
        } else {
            self.play_queue(vec![id], 0);
        }
    }

    fn play_queue(&mut self, tracks: Vec<TrackId>, start_index: usize) {
        if tracks.is_empty() || start_index >= tracks.len() {
            warn!(
                "play_queue ignored: {} tracks, start index {}",
                tracks.len(),
                start_index
            );
            return;
        }
        self.leave_track(false);
        if self.queue.replace(tracks, start_index, &mut self.rng).is_none() {
            return;
        }
        self.load_current(StartMode::Manual);
    }

    fn toggle_play_pause(&mut self) {
        match self.phase {
            PlaybackPhase::Playing => self.pause(),
            PlaybackPhase::Loading if self.is_playing => self.pause(),
            PlaybackPhase::Loading | PlaybackPhase::Ready | PlaybackPhase::Paused => self.resume(),
            PlaybackPhase::Idle | PlaybackPhase::Ended => self.resume(),
        }
    }

    fn pause(&mut self) {
        if self.skip_pending() {
            // Finish the skip silently, paused on the new track
            self.fader.cancel();
            self.load_current(StartMode::Hold);
            return;
        }

        match self.phase {
            PlaybackPhase::Playing => {
                self.leave_track(false);
                self.is_playing = false;
                self.phase = PlaybackPhase::Paused;
                self.start_fade(
                    0.0,
                    self.settings.manual_fade_ms,
                    Some(FadeAction::PauseEngine),
                );
                self.commit(Change::PlayState);
            }
            PlaybackPhase::Loading if self.is_playing => {
                self.is_playing = false;
                self.pending_start = Some(StartMode::Hold);
                self.commit(Change::PlayState);
            }
            phase => debug!("pause ignored in phase {}", phase),
        }
    }

    fn resume(&mut self) {
        match self.phase {
            PlaybackPhase::Playing => debug!("resume ignored: already playing"),
            PlaybackPhase::Loading => {
                if let Some(StartMode::Restore { .. }) = self.pending_start {
                    debug!("resume ignored: session restore in progress");
                    return;
                }
                self.is_playing = true;
                self.pending_start = Some(StartMode::Manual);
                self.commit(Change::PlayState);
            }
            PlaybackPhase::Ready | PlaybackPhase::Paused if self.current.is_some() => {
                self.pending_prompt = None;
                self.start_fade(1.0, self.settings.manual_fade_ms, None);
                if let Err(e) = self.engine.play() {
                    error!("Engine play failed: {}", e);
                    self.fader.cancel();
                    return;
                }
                self.is_playing = true;
                self.phase = PlaybackPhase::Playing;
                self.commit(Change::PlayState);
            }
            _ => {
                if self.queue.is_empty() {
                    debug!("resume ignored: queue empty");
                    return;
                }
                let index = match self.phase {
                    PlaybackPhase::Ended => 0,
                    _ => self.queue.current_index().unwrap_or(0),
                };
                self.load_index(index, StartMode::Manual);
            }
        }
    }

    fn next(&mut self) {
        let Some(index) = self.queue.next_index(self.repeat == RepeatMode::All) else {
            debug!("next ignored: end of queue");
            return;
        };
        self.skip_to(index);
    }

    fn previous(&mut self) {
        if self.current.is_some() && self.probe.position_ms() > PREVIOUS_RESTART_MS {
            self.seek(0);
            return;
        }
        match self.queue.previous_index(self.repeat == RepeatMode::All) {
            Some(index) => self.skip_to(index),
            None if self.current.is_some() => self.seek(0),
            None => debug!("previous ignored: nothing before the current entry"),
        }
    }

    /// Manual skip: fade out the playing track, then load the target
    fn skip_to(&mut self, index: usize) {
        self.leave_track(false);
        let playing = self.is_playing;
        let audible = self.phase == PlaybackPhase::Playing
            && self.envelope > 0.0
            && self.settings.manual_fade_ms > 0;

        if audible {
            self.queue.jump(index);
            self.start_fade(
                0.0,
                self.settings.manual_fade_ms,
                Some(FadeAction::LoadCurrent(StartMode::Manual)),
            );
            self.commit(Change::Queue);
        } else {
            let start = if playing {
                StartMode::Manual
            } else {
                StartMode::Hold
            };
            self.load_index(index, start);
        }
    }

    fn toggle_shuffle(&mut self) {
        let enabled = !self.queue.is_shuffled();
        self.queue.set_shuffle(enabled, &mut self.rng);
        info!("Shuffle {}", if enabled { "on" } else { "off" });
        self.commit(Change::Shuffle);
    }

    fn toggle_repeat(&mut self) {
        self.repeat = self.repeat.cycled();
        info!("Repeat mode {}", self.repeat);
        self.commit(Change::Repeat);
    }

    fn seek(&mut self, position_ms: u64) {
        if self.current.is_none() {
            warn!("seek ignored: nothing loaded");
            return;
        }
        let duration = self.duration_ms();
        let target = if duration > 0 {
            position_ms.min(duration)
        } else {
            position_ms
        };
        if let Err(e) = self.engine.seek(target) {
            warn!("Seek to {} ms failed: {}", target, e);
            return;
        }
        if let Some(StartMode::Restore { .. }) = self.pending_start {
            self.pending_start = Some(StartMode::Restore {
                position_ms: target,
            });
        }

        // Seeking out of the end window undoes the end-of-track fade-out
        let remaining = duration.saturating_sub(target);
        if self.track_faded_out && remaining >= self.settings.crossfade_window_ms {
            self.track_faded_out = false;
            if self.phase == PlaybackPhase::Playing {
                self.start_fade(1.0, self.settings.manual_fade_ms, None);
            }
        }
        self.commit(Change::Quiet);
    }

    fn stop(&mut self) {
        self.fader.cancel();
        self.leave_track(false);
        if let Err(e) = self.engine.stop() {
            warn!("Engine stop failed: {}", e);
        }
        self.current = None;
        self.pending_start = None;
        self.pending_prompt = None;
        self.is_playing = false;
        self.phase = PlaybackPhase::Idle;
        self.commit(Change::PlayState);
    }

    fn enqueue(&mut self, id: TrackId) {
        if self.library.resolve(id).is_none() {
            warn!("enqueue ignored: track {} not in library", id);
            return;
        }
        self.queue.enqueue(id);
        self.commit(Change::Queue);
    }

    fn toggle_favorite(&mut self, id: TrackId) {
        let Some(favorite) = self.library.toggle_favorite(id) else {
            warn!("toggle_favorite ignored: track {} not in library", id);
            return;
        };
        if self.current.as_ref().map(|t| t.id) == Some(id) {
            self.favorite = favorite;
        }
        self.commit(Change::Favorite(id, favorite));
    }

    fn resolve_resume_prompt(&mut self, resume: bool) {
        let Some(position_ms) = self.pending_prompt.take() else {
            warn!("resume prompt answer ignored: no prompt pending");
            return;
        };
        info!(
            "Resume prompt answered: {}",
            if resume { "resume" } else { "restart" }
        );
        self.seek(if resume { position_ms } else { 0 });
        self.resume();
    }

    fn set_volume(&mut self, level: f32) {
        if !level.is_finite() {
            warn!("set_volume ignored: {} is not a number", level);
            return;
        }
        self.user_volume = level.clamp(0.0, 1.0);
        self.apply_envelope(self.envelope);
        self.persistence
            .stage_setting(KEY_VOLUME_LEVEL, self.user_volume);
        self.commit(Change::Volume);
    }

    // ========================================================================
    // Engine events
    // ========================================================================

    fn handle_engine_event(&mut self, event: EngineEvent) {
        trace!("Engine event: {:?}", event);
        match event {
            EngineEvent::Ready => self.on_ready(),
            EngineEvent::Buffering => debug!("Engine buffering"),
            EngineEvent::PlayingChanged(playing) => self.on_playing_changed(playing),
            EngineEvent::Ended => self.on_track_end(),
            EngineEvent::SourceError { kind } => self.on_source_error(kind),
        }
    }

    fn on_ready(&mut self) {
        let Some(start) = self.pending_start.take() else {
            trace!("Engine ready (no pending start)");
            return;
        };
        self.phase = PlaybackPhase::Ready;

        match start {
            StartMode::Manual => self.begin_playback(self.settings.manual_fade_ms),
            StartMode::Auto => self.begin_playback(self.settings.crossfade_ms),
            StartMode::Hold => {
                // Silent until a resume fades it in
                self.is_playing = false;
                self.apply_envelope(0.0);
                self.commit(Change::PlayState);
            }
            StartMode::Restore { position_ms } => self.finish_restore(position_ms),
        }
    }

    fn finish_restore(&mut self, position_ms: u64) {
        if position_ms > 0 {
            if let Err(e) = self.engine.seek(position_ms) {
                warn!("Restore seek to {} ms failed: {}", position_ms, e);
            }
        }
        if let Err(e) = self.engine.pause() {
            warn!("Engine pause after restore failed: {}", e);
        }
        self.is_playing = false;
        self.phase = PlaybackPhase::Paused;
        self.apply_envelope(0.0);
        self.commit(Change::PlayState);

        if position_ms > self.settings.resume_prompt_threshold_ms {
            if let Some(track) = &self.current {
                info!(
                    "Resume point {} ms for track {}, prompting",
                    position_ms, track.id
                );
                self.pending_prompt = Some(position_ms);
                self.publisher.publish_event(PlayerEvent::ResumePrompt {
                    track_id: track.id,
                    position_ms,
                    duration_ms: self.duration_ms(),
                    timestamp: cadenza_common::time::now(),
                });
            }
        }
    }

    /// Reconcile with the engine if it disagrees once no fade is pending
    fn on_playing_changed(&mut self, playing: bool) {
        trace!("Engine play_when_ready -> {}", playing);
        if self.fader.is_active() || self.pending_start.is_some() {
            return;
        }
        let actual = self.probe.play_when_ready();
        let settled = matches!(self.phase, PlaybackPhase::Playing | PlaybackPhase::Paused);
        if settled && actual != self.is_playing {
            warn!(
                "Engine reports playing={} while controller has {}, adopting engine state",
                actual, self.is_playing
            );
            self.is_playing = actual;
            self.phase = if actual {
                PlaybackPhase::Playing
            } else {
                PlaybackPhase::Paused
            };
            self.commit(Change::PlayState);
        }
    }

    fn on_track_end(&mut self) {
        if self.current.is_none() {
            return;
        }
        self.leave_track(true);

        // The cursor already points at a skip target; load it, don't advance
        if let Some(FadeAction::LoadCurrent(start)) =
            self.fader.active().and_then(|job| job.on_complete)
        {
            self.fader.cancel();
            self.load_current(start);
            return;
        }
        self.fader.cancel();

        if self.repeat == RepeatMode::One {
            if let Some(index) = self.queue.current_index() {
                self.load_index(index, StartMode::Auto);
                return;
            }
        }
        match self.queue.next_index(self.repeat == RepeatMode::All) {
            Some(index) => self.load_index(index, StartMode::Auto),
            None => self.halt(),
        }
    }

    fn on_source_error(&mut self, kind: SourceErrorKind) {
        let Some(track) = self.current.take() else {
            return;
        };
        warn!(
            "{}",
            Error::Source {
                track_id: track.id,
                kind
            }
        );

        let start = match self.pending_start.take() {
            Some(StartMode::Hold) | Some(StartMode::Restore { .. }) => StartMode::Hold,
            Some(_) => StartMode::Auto,
            None if self.is_playing => StartMode::Auto,
            None => StartMode::Hold,
        };

        self.persistence.clear_position(&track.locator);
        if !self.library.remove(track.id) {
            debug!("Track {} already absent from library", track.id);
        }
        let removed_current = self.queue.remove(track.id);

        self.publisher.publish_event(PlayerEvent::Notice {
            kind: NoticeKind::TrackSkipped,
            message: format!("Skipped \"{}\": {}", track.title, kind),
            timestamp: cadenza_common::time::now(),
        });
        self.commit(Change::Queue);

        let next = if removed_current {
            self.index_after_removal()
        } else {
            self.queue.next_index(self.repeat == RepeatMode::All)
        };
        match next {
            Some(index) => self.load_index(index, start),
            None => {
                if let Err(e) = self.engine.stop() {
                    debug!("Engine stop after source error failed: {}", e);
                }
                self.halt();
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// End-of-track fade-out, at most once per track
    fn check_track_end(&mut self) {
        if self.phase != PlaybackPhase::Playing
            || self.track_faded_out
            || self.settings.crossfade_ms == 0
            || self.fader.is_active()
            || self.envelope < 1.0
        {
            return;
        }
        let duration = self.duration_ms();
        if duration == 0 {
            return;
        }
        let remaining = duration.saturating_sub(self.probe.position_ms());
        if remaining < self.settings.crossfade_window_ms {
            debug!("{} ms left, fading out", remaining);
            self.track_faded_out = true;
            self.start_fade(0.0, self.settings.crossfade_ms, None);
        }
    }

    /// Crash-safety flush of position and session
    fn periodic_persist(&mut self) {
        if matches!(self.phase, PlaybackPhase::Playing | PlaybackPhase::Paused) {
            self.leave_track(false);
        }
        self.persistence.stage_session(self.session());
        self.persistence.persist();
    }

    fn recover(&mut self, request: RecoveryRequest) {
        let Some(track_id) = self.current.as_ref().map(|t| t.id) else {
            debug!("Recovery request ignored: nothing loaded");
            return;
        };
        let position = self.probe.position_ms();
        let resume = self.phase == PlaybackPhase::Playing;
        info!(
            "Recovering engine ({}) for track {} at {} ms",
            request.kind, track_id, position
        );

        match self.restart_engine_at(position, resume) {
            Ok(()) => info!("Engine recovery complete"),
            Err(e) => error!("Engine recovery failed: {}", e),
        }
    }

    fn restart_engine_at(&mut self, position_ms: u64, resume: bool) -> Result<()> {
        self.engine.stop()?;
        self.engine.prepare()?;
        self.engine.seek(position_ms)?;
        if resume {
            self.engine.play()?;
        }
        Ok(())
    }

    // ========================================================================
    // Cold start and shutdown
    // ========================================================================

    /// Load a saved session paused, without starting playback
    pub fn restore(&mut self, session: SavedSession) {
        let mut queue = session.queue;
        if queue.is_empty() {
            match session.last_track_id {
                Some(id) => queue.push(id),
                None => {
                    debug!("No saved session to restore");
                    return;
                }
            }
        }

        let start_index = session
            .last_track_id
            .and_then(|id| queue.iter().position(|&t| t == id))
            .unwrap_or(0);
        self.repeat = session.repeat;
        if self.queue.replace(queue, start_index, &mut self.rng).is_none() {
            return;
        }
        self.queue.set_shuffle(session.shuffle, &mut self.rng);

        let Some(id) = self.queue.current_track() else {
            return;
        };
        // The session position is fresher than the resume index but obeys
        // the same band: near either end means start from the top
        let saved_position = match self.library.resolve(id) {
            Some(track) => (session.last_track_id == Some(id))
                .then_some(session.last_position_ms)
                .filter(|&p| in_resume_band(p, track.duration_ms))
                .or_else(|| self.persistence.resume_position(&track.locator))
                .unwrap_or(0),
            None => 0,
        };

        info!(
            "Restoring session: {} queued, track {} at {} ms",
            self.queue.len(),
            id,
            saved_position
        );
        self.load_current(StartMode::Restore {
            position_ms: saved_position,
        });
    }

    async fn shutdown(&mut self) {
        info!("Controller shutting down");
        self.fader.cancel();
        self.leave_track(false);
        self.persistence.stage_session(self.session());
        match self.persistence.flush().await {
            Ok(()) => info!("Final state persisted"),
            Err(e) => error!("Final persist failed: {}", e),
        }
        self.persistence.close().await;
        if let Err(e) = self.engine.stop() {
            warn!("Engine stop at shutdown failed: {}", e);
        }
    }

    /// Run the controller loop until shutdown
    pub async fn run(mut self, channels: ControllerChannels) {
        let ControllerChannels {
            mut commands,
            mut engine_events,
            mut recoveries,
            mut control,
        } = channels;

        let mut fade_ticker = time::interval(self.settings.fade_step());
        fade_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut check_ticker = time::interval(self.settings.watchdog_interval());
        check_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let persist_period = self.settings.persist_interval();
        let mut persist_ticker = time::interval_at(Instant::now() + persist_period, persist_period);
        persist_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Controller started");

        loop {
            tokio::select! {
                biased;

                Some(msg) = control.recv() => match msg {
                    ControlMessage::Shutdown(done) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                },
                Some(event) = engine_events.recv() => self.handle_engine_event(event),
                Some(request) = recoveries.recv() => self.recover(request),
                Some(command) = commands.recv() => self.handle_command(command),
                _ = fade_ticker.tick(), if self.fader.is_active() => self.step_fade(),
                _ = check_ticker.tick() => self.check_track_end(),
                _ = persist_ticker.tick() => self.periodic_persist(),
            }
        }

        info!("Controller stopped");
    }
}
