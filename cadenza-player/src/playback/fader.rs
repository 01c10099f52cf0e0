//! Volume envelope ramps
//!
//! `FadeEngine` holds at most one [`FadeJob`]. Starting a fade replaces the
//! job in place, so the superseded job can never produce another volume write
//! and its completion action is dropped unfired.
//!
//! # Driving
//!
//! The engine is a pure state machine: the controller calls [`FadeEngine::step`]
//! from its own task on every fade tick and applies the returned volume. No
//! timer lives in here; `now` is passed in so ramps are testable with any
//! clock.
//!
//! # Levels
//!
//! Levels are envelope values in `[0.0, 1.0]`. The controller multiplies them
//! by the user master volume before writing to the engine.

use cadenza_common::FadeCurve;
use std::time::Duration;
use tokio::time::Instant;

/// An active volume ramp
#[derive(Debug)]
pub struct FadeJob<C> {
    pub id: u64,
    pub start_volume: f32,
    pub end_volume: f32,
    pub duration: Duration,
    pub started_at: Instant,
    /// Runs only if the ramp reaches its end
    pub on_complete: Option<C>,
}

impl<C> FadeJob<C> {
    fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }
}

/// Result of starting or stepping a fade
#[derive(Debug, PartialEq)]
pub enum FadeStep<C> {
    /// No fade is running
    Idle,
    /// Ramp in progress; write this level
    Write(f32),
    /// Ramp finished; write `volume` and run `on_complete`
    Finished { volume: f32, on_complete: Option<C> },
}

/// Single-job fade scheduler
#[derive(Debug)]
pub struct FadeEngine<C> {
    curve: FadeCurve,
    active: Option<FadeJob<C>>,
    next_id: u64,
}

impl<C> FadeEngine<C> {
    pub fn new(curve: FadeCurve) -> Self {
        Self {
            curve,
            active: None,
            next_id: 1,
        }
    }

    pub fn curve(&self) -> FadeCurve {
        self.curve
    }

    /// Ramp from `current` to `target` over `duration`
    ///
    /// Any running job is superseded before this returns. A zero duration
    /// finishes immediately: the caller writes `target` directly and runs the
    /// completion action.
    pub fn fade_to(
        &mut self,
        current: f32,
        target: f32,
        duration: Duration,
        now: Instant,
        on_complete: Option<C>,
    ) -> FadeStep<C> {
        self.cancel();
        let target = target.clamp(0.0, 1.0);

        if duration.is_zero() {
            return FadeStep::Finished {
                volume: target,
                on_complete,
            };
        }

        let id = self.next_id;
        self.next_id += 1;
        self.active = Some(FadeJob {
            id,
            start_volume: current.clamp(0.0, 1.0),
            end_volume: target,
            duration,
            started_at: now,
            on_complete,
        });
        FadeStep::Write(current.clamp(0.0, 1.0))
    }

    /// Advance the active ramp to `now`
    pub fn step(&mut self, now: Instant) -> FadeStep<C> {
        let Some(job) = &self.active else {
            return FadeStep::Idle;
        };

        let progress = job.progress(now);
        if progress >= 1.0 {
            let Some(job) = self.active.take() else {
                return FadeStep::Idle;
            };
            return FadeStep::Finished {
                volume: job.end_volume,
                on_complete: job.on_complete,
            };
        }

        FadeStep::Write(
            self.curve
                .interpolate(job.start_volume, job.end_volume, progress),
        )
    }

    /// Drop the running job without completing it
    ///
    /// Returns true if a job was running.
    pub fn cancel(&mut self) -> bool {
        self.active.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&FadeJob<C>> {
        self.active.as_ref()
    }
}
