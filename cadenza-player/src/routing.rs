//! Audio route arbiter
//!
//! Consumes output-device signals on its own channel and enforces the user's
//! per-class routing policy. When an output is connected while its policy is
//! disabled (or the policy is disabled while it is active), output is forced
//! back to the built-in speaker. Disconnecting the output resets that override.
//!
//! Play/pause is only touched to pause when the active output goes away and
//! to resume playback the arbiter itself paused. Router failures are logged
//! and left alone; routing then stays wherever the platform left it.

use crate::config::RuntimeSettings;
use crate::error::Result;
use crate::playback::{Command, CommandSender};
use crate::state::SnapshotView;
use crate::surfaces::SurfacePublisher;
use cadenza_common::events::{NoticeKind, OutputClass, PlayerEvent};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

/// Signal channel capacity
pub const SIGNAL_CHANNEL_CAPACITY: usize = 32;

/// Inbound output-device signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RouteSignal {
    Connected { output: OutputClass },
    Disconnected { output: OutputClass },
    PolicyChanged { output: OutputClass, allowed: bool },
}

/// Platform routing operations
pub trait AudioRouter: Send + 'static {
    /// Tear down any active wireless audio link
    fn disable_wireless_link(&mut self) -> Result<()>;
    /// Put the audio system in its default (non-call) mode
    fn set_normal_mode(&mut self) -> Result<()>;
    fn enable_speaker(&mut self, on: bool) -> Result<()>;
    /// Drop any override and let the platform route normally
    fn reset_routing(&mut self) -> Result<()>;
}

/// Router for the headless daemon: records requests in the log
#[derive(Debug, Default)]
pub struct LoggingRouter;

impl AudioRouter for LoggingRouter {
    fn disable_wireless_link(&mut self) -> Result<()> {
        info!("Router: wireless audio link disabled");
        Ok(())
    }

    fn set_normal_mode(&mut self) -> Result<()> {
        info!("Router: normal audio mode");
        Ok(())
    }

    fn enable_speaker(&mut self, on: bool) -> Result<()> {
        info!("Router: speaker {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn reset_routing(&mut self) -> Result<()> {
        info!("Router: routing reset to default");
        Ok(())
    }
}

/// Current output and policy, owned by the arbiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteState {
    /// Output audio is actually going to
    pub active: OutputClass,
    pub wired_connected: bool,
    pub wireless_connected: bool,
    pub wired_allowed: bool,
    pub wireless_allowed: bool,
    /// Output class the speaker override was applied for
    pub forced_for: Option<OutputClass>,
    /// Playback was paused by the arbiter and may be resumed by it
    pub paused_by_arbiter: bool,
}

impl RouteState {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            active: OutputClass::Speaker,
            wired_connected: false,
            wireless_connected: false,
            wired_allowed: settings.route_wired_allowed,
            wireless_allowed: settings.route_wireless_allowed,
            forced_for: None,
            paused_by_arbiter: false,
        }
    }

    pub fn allowed(&self, output: OutputClass) -> bool {
        match output {
            OutputClass::Speaker => true,
            OutputClass::Wired => self.wired_allowed,
            OutputClass::Wireless => self.wireless_allowed,
        }
    }

    pub fn forced_speaker(&self) -> bool {
        self.forced_for.is_some()
    }

    fn set_connected(&mut self, output: OutputClass, connected: bool) {
        match output {
            OutputClass::Speaker => {}
            OutputClass::Wired => self.wired_connected = connected,
            OutputClass::Wireless => self.wireless_connected = connected,
        }
    }

    fn set_allowed(&mut self, output: OutputClass, allowed: bool) {
        match output {
            OutputClass::Speaker => {}
            OutputClass::Wired => self.wired_allowed = allowed,
            OutputClass::Wireless => self.wireless_allowed = allowed,
        }
    }

    fn is_connected(&self, output: OutputClass) -> bool {
        match output {
            OutputClass::Speaker => true,
            OutputClass::Wired => self.wired_connected,
            OutputClass::Wireless => self.wireless_connected,
        }
    }

    /// Output the system falls back to: a connected, allowed external
    /// output (wired first), otherwise the speaker
    fn fallback_output(&self) -> OutputClass {
        [OutputClass::Wired, OutputClass::Wireless]
            .into_iter()
            .find(|&o| self.is_connected(o) && self.allowed(o))
            .unwrap_or(OutputClass::Speaker)
    }
}

pub struct RouteArbiter<R: AudioRouter> {
    router: R,
    state: RouteState,
    commands: CommandSender,
    view: SnapshotView,
    publisher: SurfacePublisher,
    wireless_settle: Duration,
    /// Deadline of a delayed resume after a wireless connect
    pending_resume: Option<Instant>,
}

impl<R: AudioRouter> RouteArbiter<R> {
    pub fn new(
        router: R,
        settings: &RuntimeSettings,
        commands: CommandSender,
        view: SnapshotView,
        publisher: SurfacePublisher,
    ) -> Self {
        Self {
            router,
            state: RouteState::from_settings(settings),
            commands,
            view,
            publisher,
            wireless_settle: settings.wireless_settle(),
            pending_resume: None,
        }
    }

    pub fn state(&self) -> &RouteState {
        &self.state
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub async fn handle(&mut self, signal: RouteSignal) {
        debug!("Route signal: {:?}", signal);
        match signal {
            RouteSignal::Connected { output } => self.on_connected(output).await,
            RouteSignal::Disconnected { output } => self.on_disconnected(output).await,
            RouteSignal::PolicyChanged { output, allowed } => {
                self.on_policy_changed(output, allowed)
            }
        }
    }

    async fn on_connected(&mut self, output: OutputClass) {
        if output == OutputClass::Speaker {
            return;
        }
        self.state.set_connected(output, true);
        self.state.active = output;

        if !self.state.allowed(output) {
            info!("{} output connected but not allowed", output);
            self.force_speaker(output);
            return;
        }

        if let Some(forced) = self.state.forced_for.take() {
            info!(
                "{} output connected, dropping the speaker override for {}",
                output, forced
            );
            if let Err(e) = self.router.reset_routing() {
                error!("Failed to reset routing for {}: {}", output, e);
            }
        }
        self.announce_route();
        if !self.state.paused_by_arbiter {
            return;
        }
        match output {
            OutputClass::Wireless => {
                debug!(
                    "Waiting {} ms for the wireless link before resuming",
                    self.wireless_settle.as_millis()
                );
                self.pending_resume = Some(Instant::now() + self.wireless_settle);
            }
            _ => self.resume_paused().await,
        }
    }

    async fn on_disconnected(&mut self, output: OutputClass) {
        if output == OutputClass::Speaker {
            return;
        }
        self.state.set_connected(output, false);

        if self.state.forced_for == Some(output) {
            // Audio was on the speaker already; just drop the override
            self.state.forced_for = None;
            self.state.active = self.state.fallback_output();
            if let Err(e) = self.router.reset_routing() {
                error!("Failed to reset routing after {} disconnect: {}", output, e);
            }
            self.announce_route();
            return;
        }

        if self.state.active != output {
            return;
        }
        self.state.active = self.state.fallback_output();
        if output == OutputClass::Wireless {
            self.pending_resume = None;
        }
        self.announce_route();

        // Still on another external output: nothing becomes noisy
        if self.state.active != OutputClass::Speaker {
            return;
        }
        if self.view.is_playing() {
            info!("{} output disconnected while playing, pausing", output);
            match self.commands.send(Command::Pause).await {
                Ok(()) => self.state.paused_by_arbiter = true,
                Err(e) => warn!("Could not pause after {} disconnect: {}", output, e),
            }
        }
    }

    fn on_policy_changed(&mut self, output: OutputClass, allowed: bool) {
        if output == OutputClass::Speaker {
            warn!("Ignoring routing policy change for the speaker");
            return;
        }
        info!(
            "Routing policy: {} output {}",
            output,
            if allowed { "allowed" } else { "disabled" }
        );
        self.state.set_allowed(output, allowed);

        if !allowed && self.state.active == output && self.state.is_connected(output) {
            self.force_speaker(output);
        } else if allowed && self.state.forced_for == Some(output) {
            self.state.forced_for = None;
            if let Err(e) = self.router.reset_routing() {
                error!("Failed to reset routing for {}: {}", output, e);
            }
            self.announce_route();
        }
    }

    /// Override output to the built-in speaker
    fn force_speaker(&mut self, output: OutputClass) {
        let already_forced = self.state.forced_speaker();
        let result = self
            .router
            .disable_wireless_link()
            .and_then(|()| self.router.set_normal_mode())
            .and_then(|()| self.router.enable_speaker(true));
        if let Err(e) = result {
            error!("Failed to force speaker output for {}: {}", output, e);
            return;
        }

        self.state.forced_for = Some(output);
        self.announce_route();
        if !already_forced {
            self.publisher.publish_event(PlayerEvent::Notice {
                kind: NoticeKind::SpeakerForced,
                message: format!("{} output is disabled, playing through the speaker", output),
                timestamp: cadenza_common::time::now(),
            });
        }
    }

    fn announce_route(&self) {
        let forced = self.state.forced_speaker();
        let output = if forced {
            OutputClass::Speaker
        } else {
            self.state.active
        };
        self.publisher.publish_event(PlayerEvent::RouteChanged {
            output,
            forced_speaker: forced,
            timestamp: cadenza_common::time::now(),
        });
    }

    /// Resume playback the arbiter paused, unless the user got there first
    async fn resume_paused(&mut self) {
        self.pending_resume = None;
        if !self.state.paused_by_arbiter {
            return;
        }
        self.state.paused_by_arbiter = false;
        if self.view.is_playing() {
            debug!("Playback already resumed, nothing to do");
            return;
        }
        info!("Output back, resuming playback");
        if let Err(e) = self.commands.send(Command::Resume).await {
            warn!("Could not resume playback: {}", e);
        }
    }

    /// Run until the signal channel closes
    pub async fn run(mut self, mut signals: mpsc::Receiver<RouteSignal>) {
        info!("Route arbiter started");
        loop {
            let deadline = self.pending_resume;
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle(signal).await,
                    None => break,
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.resume_paused().await;
                }
            }
        }
        debug!("Route arbiter stopped");
    }
}

/// Spawn the arbiter on its own signal channel
pub fn spawn_route_arbiter<R: AudioRouter>(
    arbiter: RouteArbiter<R>,
) -> (mpsc::Sender<RouteSignal>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    let task = tokio::spawn(arbiter.run(rx));
    (tx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineProbe, SimulatedEngine};
    use crate::error::Error;
    use crate::surfaces::{spawn_synchronizer, SurfaceSynchronizer};
    use cadenza_common::events::{EventBus, PlaybackSnapshot};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingRouter {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl RecordingRouter {
        fn record(&self, call: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail {
                Err(Error::Route("platform refused".into()))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AudioRouter for RecordingRouter {
        fn disable_wireless_link(&mut self) -> Result<()> {
            self.record("disable_wireless_link")
        }
        fn set_normal_mode(&mut self) -> Result<()> {
            self.record("set_normal_mode")
        }
        fn enable_speaker(&mut self, _on: bool) -> Result<()> {
            self.record("enable_speaker")
        }
        fn reset_routing(&mut self) -> Result<()> {
            self.record("reset_routing")
        }
    }

    struct Harness {
        arbiter: RouteArbiter<RecordingRouter>,
        router: RecordingRouter,
        commands: mpsc::Receiver<Command>,
        publisher: SurfacePublisher,
        events: tokio::sync::broadcast::Receiver<PlayerEvent>,
    }

    fn harness(settings: RuntimeSettings, router: RecordingRouter) -> Harness {
        let (engine, _events) = SimulatedEngine::new();
        let probe: Arc<dyn EngineProbe> = Arc::new(engine.simulated_probe());
        let bus = Arc::new(EventBus::new(64));
        let events = bus.subscribe();
        let settings = Arc::new(settings);
        let sync = SurfaceSynchronizer::new(PlaybackSnapshot::default(), bus, probe, &settings);
        let (publisher, surfaces, _task) = spawn_synchronizer(sync, settings.clone());

        let (tx, commands) = mpsc::channel(8);
        let arbiter = RouteArbiter::new(
            router.clone(),
            &settings,
            CommandSender::new(tx),
            surfaces.snapshot(),
            publisher.clone(),
        );
        Harness {
            arbiter,
            router,
            commands,
            publisher,
            events,
        }
    }

    async fn set_playing(h: &mut Harness, playing: bool) {
        let mut view = h.arbiter.view.clone();
        h.publisher.publish(
            PlaybackSnapshot {
                is_playing: playing,
                ..Default::default()
            },
            None,
        );
        while view.is_playing() != playing {
            assert!(view.changed().await);
        }
    }

    fn notices(events: &mut tokio::sync::broadcast::Receiver<PlayerEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                PlayerEvent::Notice {
                    kind: NoticeKind::SpeakerForced,
                    ..
                }
            ) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_disallowed_connect_forces_speaker_once() {
        let settings = RuntimeSettings {
            route_wireless_allowed: false,
            ..Default::default()
        };
        let mut h = harness(settings, RecordingRouter::default());

        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wireless,
            })
            .await;
        h.arbiter
            .handle(RouteSignal::PolicyChanged {
                output: OutputClass::Wireless,
                allowed: false,
            })
            .await;

        assert_eq!(h.arbiter.state().forced_for, Some(OutputClass::Wireless));
        assert_eq!(
            &h.router.calls()[..3],
            &["disable_wireless_link", "set_normal_mode", "enable_speaker"]
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(notices(&mut h.events), 1);
    }

    #[tokio::test]
    async fn test_forced_disconnect_resets_without_reforcing() {
        let settings = RuntimeSettings {
            route_wired_allowed: false,
            ..Default::default()
        };
        let mut h = harness(settings, RecordingRouter::default());

        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        assert!(h.arbiter.state().forced_speaker());

        h.arbiter
            .handle(RouteSignal::Disconnected {
                output: OutputClass::Wired,
            })
            .await;

        let state = h.arbiter.state();
        assert_eq!(state.forced_for, None);
        assert_eq!(state.active, OutputClass::Speaker);
        let calls = h.router.calls();
        assert_eq!(calls.last(), Some(&"reset_routing"));
        assert_eq!(calls.iter().filter(|c| **c == "enable_speaker").count(), 1);
    }

    #[tokio::test]
    async fn test_forced_disconnect_falls_back_to_connected_output() {
        let settings = RuntimeSettings {
            route_wired_allowed: false,
            ..Default::default()
        };
        let mut h = harness(settings, RecordingRouter::default());
        set_playing(&mut h, true).await;

        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wireless,
            })
            .await;
        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        assert_eq!(h.arbiter.state().forced_for, Some(OutputClass::Wired));

        h.arbiter
            .handle(RouteSignal::Disconnected {
                output: OutputClass::Wired,
            })
            .await;
        let state = h.arbiter.state();
        assert_eq!(state.forced_for, None);
        assert_eq!(state.active, OutputClass::Wireless);
        assert!(h.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_allowed_connect_drops_override_for_other_output() {
        let settings = RuntimeSettings {
            route_wired_allowed: false,
            ..Default::default()
        };
        let mut h = harness(settings, RecordingRouter::default());

        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        assert!(h.arbiter.state().forced_speaker());

        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wireless,
            })
            .await;
        let state = h.arbiter.state();
        assert_eq!(state.forced_for, None);
        assert_eq!(state.active, OutputClass::Wireless);
        assert_eq!(h.router.calls().last(), Some(&"reset_routing"));
    }

    #[tokio::test]
    async fn test_disconnect_with_other_output_connected_keeps_playing() {
        let mut h = harness(RuntimeSettings::default(), RecordingRouter::default());
        set_playing(&mut h, true).await;

        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wireless,
            })
            .await;
        h.arbiter
            .handle(RouteSignal::Disconnected {
                output: OutputClass::Wireless,
            })
            .await;

        assert_eq!(h.arbiter.state().active, OutputClass::Wired);
        assert!(!h.arbiter.state().paused_by_arbiter);
        assert!(h.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_policy_disabled_while_active_forces_speaker() {
        let mut h = harness(RuntimeSettings::default(), RecordingRouter::default());
        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        assert!(!h.arbiter.state().forced_speaker());

        h.arbiter
            .handle(RouteSignal::PolicyChanged {
                output: OutputClass::Wired,
                allowed: false,
            })
            .await;
        assert_eq!(h.arbiter.state().forced_for, Some(OutputClass::Wired));

        h.arbiter
            .handle(RouteSignal::PolicyChanged {
                output: OutputClass::Wired,
                allowed: true,
            })
            .await;
        assert!(!h.arbiter.state().forced_speaker());
        assert_eq!(h.router.calls().last(), Some(&"reset_routing"));
    }

    #[tokio::test]
    async fn test_router_failure_leaves_state_unforced() {
        let settings = RuntimeSettings {
            route_wired_allowed: false,
            ..Default::default()
        };
        let router = RecordingRouter {
            fail: true,
            ..Default::default()
        };
        let mut h = harness(settings, router);
        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        assert!(!h.arbiter.state().forced_speaker());
        // One attempt, no retry
        assert_eq!(h.router.calls(), vec!["disable_wireless_link"]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(notices(&mut h.events), 0);
    }

    #[tokio::test]
    async fn test_wired_disconnect_pauses_and_reconnect_resumes() {
        let mut h = harness(RuntimeSettings::default(), RecordingRouter::default());
        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        set_playing(&mut h, true).await;

        h.arbiter
            .handle(RouteSignal::Disconnected {
                output: OutputClass::Wired,
            })
            .await;
        assert_eq!(h.commands.try_recv().unwrap(), Command::Pause);
        assert!(h.arbiter.state().paused_by_arbiter);

        set_playing(&mut h, false).await;
        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        assert_eq!(h.commands.try_recv().unwrap(), Command::Resume);
        assert!(!h.arbiter.state().paused_by_arbiter);
    }

    #[tokio::test]
    async fn test_connect_does_not_resume_user_pause() {
        let mut h = harness(RuntimeSettings::default(), RecordingRouter::default());
        set_playing(&mut h, false).await;
        h.arbiter
            .handle(RouteSignal::Connected {
                output: OutputClass::Wired,
            })
            .await;
        assert!(h.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wireless_resume_waits_for_settle() {
        let h = harness(RuntimeSettings::default(), RecordingRouter::default());
        let Harness {
            mut arbiter,
            mut commands,
            publisher,
            ..
        } = h;
        arbiter.state.paused_by_arbiter = true;

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(arbiter.run(rx));
        tx.send(RouteSignal::Connected {
            output: OutputClass::Wireless,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(commands.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(commands.try_recv().unwrap(), Command::Resume);

        drop(tx);
        drop(publisher);
        task.await.unwrap();
    }
}
