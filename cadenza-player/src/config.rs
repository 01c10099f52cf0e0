//! Runtime settings for the playback orchestrator
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap** (`cadenza_common::config::TomlConfig`): database path,
//!    port, logging. Read once at startup.
//! 2. **Database runtime** (`RuntimeSettings`): fade timing, watchdog
//!    thresholds, persistence cadence, routing policy, user volume.
//!
//! Missing runtime keys are initialized with built-in defaults and written
//! back to the `settings` table so the table always documents what is in
//! effect.

use crate::error::{Error, Result};
use cadenza_common::events::OutputClass;
use cadenza_common::FadeCurve;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Settings key of the user master volume
pub const KEY_VOLUME_LEVEL: &str = "volume_level";

/// Runtime settings loaded from the database
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    // === Fades ===
    /// Fade used for explicit play/pause/skip (0 disables)
    pub manual_fade_ms: u64,
    /// Fade-in on automatic advance and end-of-track fade-out (0 disables)
    pub crossfade_ms: u64,
    /// Remaining time below which the end-of-track fade-out starts
    pub crossfade_window_ms: u64,
    pub fade_step_ms: u64,
    pub fade_curve: FadeCurve,

    // === Watchdog ===
    pub watchdog_interval_ms: u64,
    pub watchdog_ready_stall_ms: u64,
    pub watchdog_buffering_stall_ms: u64,
    pub watchdog_overrun_ms: u64,
    pub watchdog_cooldown_ms: u64,
    pub watchdog_progress_epsilon_ms: u64,

    // === Persistence ===
    pub persist_interval_ms: u64,
    pub resume_prompt_threshold_ms: u64,

    // === Routing ===
    pub wireless_settle_ms: u64,
    pub route_wired_allowed: bool,
    pub route_wireless_allowed: bool,

    // === Surfaces ===
    pub surface_refresh_playing_ms: u64,
    pub surface_refresh_paused_ms: u64,

    /// User master volume (0.0-1.0)
    pub volume_level: f32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            manual_fade_ms: 500,
            crossfade_ms: 3000,
            crossfade_window_ms: 3000,
            fade_step_ms: 50,
            fade_curve: FadeCurve::Linear,
            watchdog_interval_ms: 500,
            watchdog_ready_stall_ms: 10_000,
            watchdog_buffering_stall_ms: 600_000,
            watchdog_overrun_ms: 60_000,
            watchdog_cooldown_ms: 60_000,
            watchdog_progress_epsilon_ms: 100,
            persist_interval_ms: 5000,
            resume_prompt_threshold_ms: 5000,
            wireless_settle_ms: 1500,
            route_wired_allowed: true,
            route_wireless_allowed: true,
            surface_refresh_playing_ms: 1000,
            surface_refresh_paused_ms: 2000,
            volume_level: 1.0,
        }
    }
}

/// Read a setting, writing `default` back when the key is missing
///
/// An unparseable stored value is logged and replaced by the default in memory;
/// the stored text is left alone so it can be inspected.
async fn get_or_init<T>(db: &Pool<Sqlite>, key: &str, default: T) -> Result<T>
where
    T: FromStr + ToString,
{
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                warn!(
                    "Invalid value '{}' for setting '{}', using default {}",
                    s,
                    key,
                    default.to_string()
                );
                Ok(default)
            }
        },
        None => {
            info!(
                "Setting '{}' not found in database, using default: {}",
                key,
                default.to_string()
            );
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO settings (key, value, updated_at)
                VALUES (?, ?, CURRENT_TIMESTAMP)
                "#,
            )
            .bind(key)
            .bind(default.to_string())
            .execute(db)
            .await?;
            Ok(default)
        }
    }
}

impl RuntimeSettings {
    /// Load runtime settings, initializing missing keys with defaults
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let d = Self::default();

        let crossfade_ms = get_or_init(db, "crossfade_ms", d.crossfade_ms).await?;
        let curve_name =
            get_or_init(db, "fade_curve", d.fade_curve.to_db_string().to_string()).await?;
        let fade_curve = FadeCurve::parse(&curve_name).unwrap_or_else(|| {
            warn!("Unknown fade curve '{}', using linear", curve_name);
            FadeCurve::Linear
        });

        let settings = Self {
            manual_fade_ms: get_or_init(db, "manual_fade_ms", d.manual_fade_ms).await?,
            crossfade_ms,
            crossfade_window_ms: get_or_init(db, "crossfade_window_ms", crossfade_ms).await?,
            fade_step_ms: get_or_init(db, "fade_step_ms", d.fade_step_ms).await?.max(1),
            fade_curve,
            watchdog_interval_ms: get_or_init(db, "watchdog_interval_ms", d.watchdog_interval_ms)
                .await?
                .max(1),
            watchdog_ready_stall_ms: get_or_init(
                db,
                "watchdog_ready_stall_ms",
                d.watchdog_ready_stall_ms,
            )
            .await?,
            watchdog_buffering_stall_ms: get_or_init(
                db,
                "watchdog_buffering_stall_ms",
                d.watchdog_buffering_stall_ms,
            )
            .await?,
            watchdog_overrun_ms: get_or_init(db, "watchdog_overrun_ms", d.watchdog_overrun_ms)
                .await?,
            watchdog_cooldown_ms: get_or_init(db, "watchdog_cooldown_ms", d.watchdog_cooldown_ms)
                .await?,
            watchdog_progress_epsilon_ms: get_or_init(
                db,
                "watchdog_progress_epsilon_ms",
                d.watchdog_progress_epsilon_ms,
            )
            .await?,
            persist_interval_ms: get_or_init(db, "persist_interval_ms", d.persist_interval_ms)
                .await?
                .max(1),
            resume_prompt_threshold_ms: get_or_init(
                db,
                "resume_prompt_threshold_ms",
                d.resume_prompt_threshold_ms,
            )
            .await?,
            wireless_settle_ms: get_or_init(db, "wireless_settle_ms", d.wireless_settle_ms).await?,
            route_wired_allowed: get_or_init(db, "route_wired_allowed", d.route_wired_allowed)
                .await?,
            route_wireless_allowed: get_or_init(
                db,
                "route_wireless_allowed",
                d.route_wireless_allowed,
            )
            .await?,
            surface_refresh_playing_ms: get_or_init(
                db,
                "surface_refresh_playing_ms",
                d.surface_refresh_playing_ms,
            )
            .await?
            .max(1),
            surface_refresh_paused_ms: get_or_init(
                db,
                "surface_refresh_paused_ms",
                d.surface_refresh_paused_ms,
            )
            .await?
            .max(1),
            volume_level: get_or_init(db, KEY_VOLUME_LEVEL, d.volume_level)
                .await?
                .clamp(0.0, 1.0),
        };

        info!("Loaded runtime settings from database");
        Ok(settings)
    }

    /// Persist the routing policy flag for an output class
    pub async fn save_route_policy(
        db: &Pool<Sqlite>,
        class: OutputClass,
        allowed: bool,
    ) -> Result<()> {
        let key = match class {
            OutputClass::Wired => "route_wired_allowed",
            OutputClass::Wireless => "route_wireless_allowed",
            OutputClass::Speaker => {
                return Err(Error::InvalidState(
                    "speaker output has no routing policy".to_string(),
                ))
            }
        };
        crate::db::settings::set_setting(db, key, allowed).await
    }

    /// Whether output on `class` is allowed by user policy
    pub fn route_allowed(&self, class: OutputClass) -> bool {
        match class {
            OutputClass::Speaker => true,
            OutputClass::Wired => self.route_wired_allowed,
            OutputClass::Wireless => self.route_wireless_allowed,
        }
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    pub fn fade_step(&self) -> Duration {
        Duration::from_millis(self.fade_step_ms)
    }

    pub fn wireless_settle(&self) -> Duration {
        Duration::from_millis(self.wireless_settle_ms)
    }
}
