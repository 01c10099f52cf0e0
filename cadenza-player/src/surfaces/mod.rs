//! Surface fan-out
//!
//! The controller publishes every snapshot change here. The synchronizer task
//! keeps the [`SnapshotCache`], forwards events to the [`EventBus`] and hands
//! [`SurfaceUpdate`]s to every registered surface over that surface's own
//! bounded channel.
//!
//! Publication never blocks and never fails: a surface whose channel is full
//! misses that update, and a surface whose receiver is gone is dropped from
//! the registry. Surfaces have no way to write the snapshot; they act on the
//! player only by sending commands.
//!
//! Periodic refresh runs on the synchronizer's own timer, reading position
//! through the engine probe, so a slow surface never delays the controller or
//! the watchdog.

mod logging;

pub use logging::LoggingSurface;

use crate::config::RuntimeSettings;
use crate::engine::EngineProbe;
use crate::state::{SnapshotCache, SnapshotView};
use cadenza_common::events::{EventBus, PlaybackPhase, PlaybackSnapshot, PlayerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Timer resolution of the refresh loop
pub const REFRESH_RESOLUTION: Duration = Duration::from_millis(250);

/// Per-surface channel capacity
pub const SURFACE_CHANNEL_CAPACITY: usize = 16;

/// Kinds of presentation surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    Notification,
    Widget,
    LockScreen,
    /// Floating overlay; only refreshed while visible
    Overlay,
    /// Ambient/screensaver display
    Ambient,
}

impl std::fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SurfaceKind::Notification => "notification",
            SurfaceKind::Widget => "widget",
            SurfaceKind::LockScreen => "lock_screen",
            SurfaceKind::Overlay => "overlay",
            SurfaceKind::Ambient => "ambient",
        };
        f.write_str(s)
    }
}

/// How often a surface wants position refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Only discrete changes, no periodic refresh
    OnChange,
    Periodic { playing: Duration, paused: Duration },
    /// Fixed cadence while the surface is visible, nothing while hidden
    WhileVisible(Duration),
}

impl RefreshPolicy {
    /// Refresh period for the current state, `None` for no refresh
    pub fn interval(&self, is_playing: bool, visible: bool) -> Option<Duration> {
        match *self {
            RefreshPolicy::OnChange => None,
            RefreshPolicy::Periodic { playing, paused } => {
                Some(if is_playing { playing } else { paused })
            }
            RefreshPolicy::WhileVisible(period) => visible.then_some(period),
        }
    }
}

impl SurfaceKind {
    pub fn refresh_policy(&self, settings: &RuntimeSettings) -> RefreshPolicy {
        match self {
            SurfaceKind::Widget => RefreshPolicy::Periodic {
                playing: Duration::from_millis(settings.surface_refresh_playing_ms),
                paused: Duration::from_millis(settings.surface_refresh_paused_ms),
            },
            SurfaceKind::Overlay => RefreshPolicy::WhileVisible(REFRESH_RESOLUTION),
            _ => RefreshPolicy::OnChange,
        }
    }

    /// Surfaces other than the overlay are visible from the moment they register
    fn visible_on_register(&self) -> bool {
        !matches!(self, SurfaceKind::Overlay)
    }
}

/// What a surface receives
#[derive(Debug, Clone)]
pub enum SurfaceUpdate {
    /// Discrete change
    Changed {
        event: PlayerEvent,
        snapshot: PlaybackSnapshot,
    },
    /// Periodic refresh (position moved)
    Refresh { snapshot: PlaybackSnapshot },
}

impl SurfaceUpdate {
    pub fn snapshot(&self) -> &PlaybackSnapshot {
        match self {
            SurfaceUpdate::Changed { snapshot, .. } | SurfaceUpdate::Refresh { snapshot } => {
                snapshot
            }
        }
    }
}

pub type SurfaceId = u64;

struct Registration {
    id: SurfaceId,
    kind: SurfaceKind,
    policy: RefreshPolicy,
    visible: bool,
    last_refresh: Option<Instant>,
    tx: mpsc::Sender<SurfaceUpdate>,
}

enum SyncMessage {
    Publish {
        snapshot: Option<PlaybackSnapshot>,
        event: Option<PlayerEvent>,
    },
    Register(Registration),
    Unregister(SurfaceId),
    SetVisible(SurfaceId, bool),
    ScreenOn,
}

/// Write side used by the controller and the route arbiter
#[derive(Clone)]
pub struct SurfacePublisher {
    tx: mpsc::UnboundedSender<SyncMessage>,
}

impl SurfacePublisher {
    /// Publish a new authoritative snapshot, with the event that caused it
    pub fn publish(&self, snapshot: PlaybackSnapshot, event: Option<PlayerEvent>) {
        let _ = self.tx.send(SyncMessage::Publish {
            snapshot: Some(snapshot),
            event,
        });
    }

    /// Publish an event that does not change the snapshot
    pub fn publish_event(&self, event: PlayerEvent) {
        let _ = self.tx.send(SyncMessage::Publish {
            snapshot: None,
            event: Some(event),
        });
    }
}

/// Receiving end of a registered surface
pub struct SurfaceReceiver {
    pub id: SurfaceId,
    pub kind: SurfaceKind,
    pub rx: mpsc::Receiver<SurfaceUpdate>,
}

/// Consumer-facing handle: registration, visibility, screen signals
#[derive(Clone)]
pub struct SurfaceHandle {
    tx: mpsc::UnboundedSender<SyncMessage>,
    view: SnapshotView,
    next_id: Arc<AtomicU64>,
    settings: Arc<RuntimeSettings>,
}

impl SurfaceHandle {
    /// Register a surface; it immediately receives the current snapshot
    pub fn register(&self, kind: SurfaceKind) -> SurfaceReceiver {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SURFACE_CHANNEL_CAPACITY);
        let _ = self.tx.send(SyncMessage::Register(Registration {
            id,
            kind,
            policy: kind.refresh_policy(&self.settings),
            visible: kind.visible_on_register(),
            last_refresh: None,
            tx,
        }));
        SurfaceReceiver { id, kind, rx }
    }

    pub fn unregister(&self, id: SurfaceId) {
        let _ = self.tx.send(SyncMessage::Unregister(id));
    }

    pub fn set_visible(&self, id: SurfaceId, visible: bool) {
        let _ = self.tx.send(SyncMessage::SetVisible(id, visible));
    }

    /// Screen turned on; shows the lock-screen surface if playing
    pub fn screen_on(&self) {
        let _ = self.tx.send(SyncMessage::ScreenOn);
    }

    pub fn snapshot(&self) -> SnapshotView {
        self.view.clone()
    }
}

/// A presentation consumer driven by [`spawn_surface`]
pub trait Surface: Send + 'static {
    fn kind(&self) -> SurfaceKind;

    fn render(&mut self, update: &SurfaceUpdate);
}

/// Register `surface` and feed it updates until the synchronizer stops
pub fn spawn_surface<S: Surface>(handle: &SurfaceHandle, mut surface: S) -> JoinHandle<()> {
    let mut receiver = handle.register(surface.kind());
    tokio::spawn(async move {
        while let Some(update) = receiver.rx.recv().await {
            surface.render(&update);
        }
        debug!("Surface {} ({}) detached", receiver.id, receiver.kind);
    })
}

/// The fan-out task state
pub struct SurfaceSynchronizer {
    cache: SnapshotCache,
    bus: Arc<EventBus>,
    probe: Arc<dyn EngineProbe>,
    surfaces: Vec<Registration>,
    progress_policy: RefreshPolicy,
    last_progress: Option<Instant>,
}

impl SurfaceSynchronizer {
    pub fn new(
        initial: PlaybackSnapshot,
        bus: Arc<EventBus>,
        probe: Arc<dyn EngineProbe>,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            cache: SnapshotCache::new(initial),
            bus,
            probe,
            surfaces: Vec::new(),
            progress_policy: SurfaceKind::Widget.refresh_policy(settings),
            last_progress: None,
        }
    }

    pub fn view(&self) -> SnapshotView {
        self.cache.view()
    }

    /// Best-effort delivery to every surface `wants` selects
    fn deliver(&mut self, update: SurfaceUpdate, wants: impl Fn(&Registration) -> bool) {
        self.surfaces.retain(|reg| {
            if !wants(reg) {
                return true;
            }
            match reg.tx.try_send(update.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("Surface {} ({}) lagging, update dropped", reg.id, reg.kind);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Surface {} ({}) gone, unregistering", reg.id, reg.kind);
                    false
                }
            }
        });
    }

    fn handle(&mut self, msg: SyncMessage) {
        match msg {
            SyncMessage::Publish { snapshot, event } => {
                if let Some(snapshot) = snapshot {
                    self.cache.replace(snapshot);
                }
                if let Some(event) = event {
                    self.bus.emit_lossy(event.clone());
                    let snapshot = self.cache.get();
                    self.deliver(SurfaceUpdate::Changed { event, snapshot }, |_| true);
                }
            }
            SyncMessage::Register(reg) => {
                debug!("Surface {} registered ({})", reg.id, reg.kind);
                let initial = SurfaceUpdate::Refresh {
                    snapshot: self.cache.get(),
                };
                let _ = reg.tx.try_send(initial);
                self.surfaces.push(reg);
            }
            SyncMessage::Unregister(id) => {
                self.surfaces.retain(|reg| reg.id != id);
            }
            SyncMessage::SetVisible(id, visible) => {
                if let Some(reg) = self.surfaces.iter_mut().find(|reg| reg.id == id) {
                    reg.visible = visible;
                    reg.last_refresh = None;
                }
            }
            SyncMessage::ScreenOn => {
                let snapshot = self.cache.get();
                if !snapshot.is_playing {
                    trace!("Screen on while not playing, lock screen not shown");
                    return;
                }
                let event = PlayerEvent::ShowLockScreen {
                    snapshot: snapshot.clone(),
                    timestamp: cadenza_common::time::now(),
                };
                self.bus.emit_lossy(event.clone());
                self.deliver(SurfaceUpdate::Changed { event, snapshot }, |reg| {
                    reg.kind == SurfaceKind::LockScreen
                });
            }
        }
    }

    /// Periodic position refresh
    fn refresh(&mut self, now: Instant) {
        let mut snapshot = self.cache.get();
        if snapshot.track_id.is_none() {
            return;
        }
        // A loading engine has not sought to the restored position yet
        if snapshot.phase != PlaybackPhase::Loading {
            let duration_ms = match self.probe.duration_ms() {
                0 => snapshot.duration_ms,
                d => d,
            };
            self.cache
                .update_position(self.probe.position_ms(), duration_ms);
            snapshot = self.cache.get();
        }

        let due = |last: Option<Instant>, period: Option<Duration>| match (last, period) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(last), Some(period)) => now.saturating_duration_since(last) >= period,
        };

        let period = self.progress_policy.interval(snapshot.is_playing, true);
        if due(self.last_progress, period) {
            self.last_progress = Some(now);
            self.bus.emit_lossy(PlayerEvent::PlaybackProgress {
                track_id: snapshot.track_id,
                position_ms: snapshot.position_ms,
                duration_ms: snapshot.duration_ms,
                is_playing: snapshot.is_playing,
                timestamp: cadenza_common::time::now(),
            });
        }

        let mut refreshed = Vec::new();
        for reg in &mut self.surfaces {
            let period = reg.policy.interval(snapshot.is_playing, reg.visible);
            if due(reg.last_refresh, period) {
                reg.last_refresh = Some(now);
                refreshed.push(reg.id);
            }
        }
        if !refreshed.is_empty() {
            self.deliver(SurfaceUpdate::Refresh { snapshot }, |reg| {
                refreshed.contains(&reg.id)
            });
        }
    }
}

/// Spawn the synchronizer task
pub fn spawn_synchronizer(
    synchronizer: SurfaceSynchronizer,
    settings: Arc<RuntimeSettings>,
) -> (SurfacePublisher, SurfaceHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = SurfaceHandle {
        tx: tx.clone(),
        view: synchronizer.view(),
        next_id: Arc::new(AtomicU64::new(1)),
        settings,
    };
    let publisher = SurfacePublisher { tx };

    let task = tokio::spawn(async move {
        let mut synchronizer = synchronizer;
        let mut ticker = time::interval(REFRESH_RESOLUTION);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Surface synchronizer started");

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => synchronizer.handle(msg),
                    None => break,
                },
                _ = ticker.tick() => synchronizer.refresh(Instant::now()),
            }
        }
        debug!("Surface synchronizer stopped");
    });

    (publisher, handle, task)
}
