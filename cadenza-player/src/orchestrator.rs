//! Component wiring and lifecycle
//!
//! Startup order: persistence (resume map + saved session) → surface
//! synchronizer → controller (restores the session paused) → watchdog →
//! route arbiter. Shutdown reverses the parts that matter: commands stop
//! first, the controller does its final awaited persist, then the remaining
//! tasks are aborted.

use crate::config::RuntimeSettings;
use crate::engine::{EngineEvent, PlaybackEngine};
use crate::error::{Error, Result};
use crate::library::Library;
use crate::playback::controller::COMMAND_CHANNEL_CAPACITY;
use crate::playback::watchdog::{spawn_watchdog, WatchdogConfig};
use crate::playback::{
    Command, CommandSender, ControlMessage, Controller, ControllerChannels, ControllerParts,
    PersistenceManager,
};
use crate::routing::{spawn_route_arbiter, AudioRouter, RouteArbiter, RouteSignal};
use crate::state::SnapshotView;
use crate::surfaces::{spawn_synchronizer, SurfaceHandle, SurfaceSynchronizer};
use cadenza_common::events::{EventBus, PlaybackSnapshot, PlayerEvent};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Event bus capacity (lagging subscribers lose the oldest events)
pub const EVENT_BUS_CAPACITY: usize = 256;

/// How long shutdown waits for the controller's final persist
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the orchestrator needs from the embedding application
pub struct OrchestratorParts<R: AudioRouter> {
    pub db: Pool<Sqlite>,
    pub settings: RuntimeSettings,
    pub library: Arc<dyn Library>,
    pub engine: Box<dyn PlaybackEngine>,
    pub engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    pub router: R,
    /// Fixed shuffle seed (tests)
    pub shuffle_seed: Option<u64>,
}

/// Cloneable access to a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: CommandSender,
    routes: mpsc::Sender<RouteSignal>,
    surfaces: SurfaceHandle,
    bus: Arc<EventBus>,
    settings: Arc<RuntimeSettings>,
    db: Pool<Sqlite>,
}

impl OrchestratorHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await
    }

    pub fn commands(&self) -> &CommandSender {
        &self.commands
    }

    /// Deliver an output-device signal to the route arbiter
    pub async fn route_signal(&self, signal: RouteSignal) -> Result<()> {
        self.routes
            .send(signal)
            .await
            .map_err(|_| Error::ChannelClosed("route arbiter"))
    }

    pub fn surfaces(&self) -> &SurfaceHandle {
        &self.surfaces
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.surfaces.snapshot().get()
    }

    pub fn view(&self) -> SnapshotView {
        self.surfaces.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn db(&self) -> &Pool<Sqlite> {
        &self.db
    }
}

pub struct Orchestrator {
    handle: OrchestratorHandle,
    control: mpsc::Sender<ControlMessage>,
    controller_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl Orchestrator {
    /// Start all components and restore the saved session (paused)
    pub async fn start<R: AudioRouter>(parts: OrchestratorParts<R>) -> Self {
        let OrchestratorParts {
            db,
            settings,
            library,
            engine,
            engine_events,
            router,
            shuffle_seed,
        } = parts;

        let settings = Arc::new(settings);
        let bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));

        let persistence = PersistenceManager::start(db.clone()).await;
        let session = persistence.load_session().await;

        let probe = engine.probe();
        let initial = PlaybackSnapshot {
            volume: settings.volume_level,
            ..Default::default()
        };
        let synchronizer = SurfaceSynchronizer::new(initial, bus.clone(), probe.clone(), &settings);
        let (publisher, surfaces, sync_task) = spawn_synchronizer(synchronizer, settings.clone());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let commands = CommandSender::new(command_tx);
        let (recover_tx, recover_rx) = mpsc::channel(4);
        let (control_tx, control_rx) = mpsc::channel(1);

        let mut controller = Controller::new(ControllerParts {
            engine,
            library,
            persistence,
            publisher: publisher.clone(),
            settings: settings.clone(),
        });
        if let Some(seed) = shuffle_seed {
            controller = controller.with_rng_seed(seed);
        }
        controller.restore(session);
        let controller_task = tokio::spawn(controller.run(ControllerChannels {
            commands: command_rx,
            engine_events,
            recoveries: recover_rx,
            control: control_rx,
        }));

        let watchdog_task =
            spawn_watchdog(probe, WatchdogConfig::from_settings(&settings), recover_tx);

        let arbiter = RouteArbiter::new(
            router,
            &settings,
            commands.clone(),
            surfaces.snapshot(),
            publisher,
        );
        let (routes, arbiter_task) = spawn_route_arbiter(arbiter);

        info!("Playback orchestrator started");

        Self {
            handle: OrchestratorHandle {
                commands,
                routes,
                surfaces,
                bus,
                settings,
                db,
            },
            control: control_tx,
            controller_task: Some(controller_task),
            tasks: vec![watchdog_task, arbiter_task, sync_task],
            shut_down: false,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    /// Stop accepting commands, persist final state, stop the engine and
    /// background tasks
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Shutting down playback orchestrator");

        self.handle.commands.close();

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .control
            .send(ControlMessage::Shutdown(done_tx))
            .await
            .is_ok()
        {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, done_rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("Controller exited before acknowledging shutdown"),
                Err(_) => warn!("Controller did not finish shutdown in time"),
            }
        } else {
            warn!("Controller already stopped");
        }

        if let Some(task) = self.controller_task.take() {
            task.abort();
            let _ = task.await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Playback orchestrator stopped");
    }
}
