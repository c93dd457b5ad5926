//! Application state
//!
//! Holds all shared components and state

use crate::actuator::{Actuator, ActuatorManager, SimulatedActuator, SysfsGpioRelay};
use crate::bucket_ledger::{BucketLedger, LedgerRepository};
use crate::command_router::RouterContext;
use crate::error::{Error, Result};
use crate::frame_source::{FfmpegSourceFactory, RetryPolicy};
use crate::panel_buttons::PanelButtons;
use crate::power_control::{NoopPower, PowerControl, SystemPower};
use crate::realtime_hub::RealtimeHub;
use crate::report_writer::ReportWriter;
use crate::tracker::{CrossingDirection, MatchGate, TrackerConfig, TriggerAxis, TriggerLine};
use crate::vision::{ColorDetector, ColorDetectorConfig, FrameAnnotator};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Fixed number of buckets
    pub bucket_count: u32,
    /// Threshold for freshly created buckets
    pub default_set_value: u32,
    /// Persisted ledger file
    pub ledger_path: PathBuf,
    /// CSV report file
    pub report_path: PathBuf,
    /// ffmpeg input: device, file or URL
    pub video_source: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frame loop pacing target (frames/s)
    pub frame_rate: u32,
    pub jpeg_quality: u8,
    pub trigger: TriggerLine,
    pub tracker_gate: MatchGate,
    pub tracker_max_disappeared: u32,
    /// Minimum blob area in pixels
    pub detector_min_area: usize,
    pub source_open_attempts: u32,
    pub source_retry_backoff_ms: u64,
    /// Conveyor relay line; `None` runs a simulated relay
    pub relay_gpio: Option<u32>,
    pub relay_active_low: bool,
    pub start_button_gpio: Option<u32>,
    pub stop_button_gpio: Option<u32>,
    pub button_debounce_ms: u64,
    /// Empty disables power-off
    pub poweroff_command: String,
    /// Frontend directory served as fallback
    pub static_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl AppConfig {
    /// Build from any key lookup; unparseable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env { lookup: &lookup };

        let axis = match env.text("TRIGGER_AXIS", "horizontal").as_str() {
            "vertical" => TriggerAxis::Vertical,
            "horizontal" => TriggerAxis::Horizontal,
            other => {
                tracing::warn!(value = other, "Invalid TRIGGER_AXIS, using horizontal");
                TriggerAxis::Horizontal
            }
        };
        let direction = match env.text("TRIGGER_DIRECTION", "decreasing").as_str() {
            "increasing" => CrossingDirection::Increasing,
            "decreasing" => CrossingDirection::Decreasing,
            other => {
                tracing::warn!(value = other, "Invalid TRIGGER_DIRECTION, using decreasing");
                CrossingDirection::Decreasing
            }
        };
        let position = env.parse("TRIGGER_POSITION", 120.0f32);
        let trigger = match axis {
            TriggerAxis::Horizontal => TriggerLine::horizontal(position, direction),
            TriggerAxis::Vertical => TriggerLine::vertical(position, direction),
        };

        let tracker_gate = match env.text("TRACKER_MATCH", "centroid").as_str() {
            "iou" => MatchGate::Overlap(env.parse("TRACKER_MIN_IOU", 0.25f32)),
            "centroid" => MatchGate::Distance(env.parse("TRACKER_MAX_DISTANCE", 50.0f32)),
            other => {
                tracing::warn!(value = other, "Invalid TRACKER_MATCH, using centroid");
                MatchGate::Distance(env.parse("TRACKER_MAX_DISTANCE", 50.0f32))
            }
        };

        Self {
            host: env.text("HOST", "0.0.0.0"),
            port: env.parse("PORT", 8000),
            bucket_count: env.parse("BUCKET_COUNT", 14),
            default_set_value: env.parse("DEFAULT_SET_VALUE", 800),
            ledger_path: PathBuf::from(env.text("LEDGER_PATH", "/var/lib/sortline/buckets.json")),
            report_path: PathBuf::from(env.text("REPORT_PATH", "/var/lib/sortline/reports.csv")),
            video_source: env.text("VIDEO_SOURCE", "/dev/video0"),
            frame_width: env.parse("FRAME_WIDTH", 320),
            frame_height: env.parse("FRAME_HEIGHT", 240),
            frame_rate: env.parse("FRAME_RATE", 30),
            jpeg_quality: env.parse("JPEG_QUALITY", 50),
            trigger,
            tracker_gate,
            tracker_max_disappeared: env.parse("TRACKER_MAX_DISAPPEARED", 5),
            detector_min_area: env.parse("DETECTOR_MIN_AREA", 1100),
            source_open_attempts: env.parse("SOURCE_OPEN_ATTEMPTS", 3),
            source_retry_backoff_ms: env.parse("SOURCE_RETRY_BACKOFF_MS", 500),
            relay_gpio: env.optional("RELAY_GPIO"),
            relay_active_low: env.parse("RELAY_ACTIVE_LOW", false),
            start_button_gpio: env.optional("START_BUTTON_GPIO"),
            stop_button_gpio: env.optional("STOP_BUTTON_GPIO"),
            button_debounce_ms: env.parse("BUTTON_DEBOUNCE_MS", 200),
            poweroff_command: env.text("POWEROFF_COMMAND", "systemctl poweroff"),
            static_dir: (env.lookup)("STATIC_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 {
            return Err(Error::Config("BUCKET_COUNT must be at least 1".to_string()));
        }
        if self.default_set_value == 0 {
            return Err(Error::Config("DEFAULT_SET_VALUE must be at least 1".to_string()));
        }
        if self.frame_rate == 0 {
            return Err(Error::Config("FRAME_RATE must be at least 1".to_string()));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(Error::Config("FRAME_WIDTH and FRAME_HEIGHT must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            gate: self.tracker_gate,
            max_disappeared: self.tracker_max_disappeared,
            trigger: self.trigger,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.source_open_attempts,
            backoff: Duration::from_millis(self.source_retry_backoff_ms),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frame_rate.max(1)))
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn text(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr + std::fmt::Debug>(&self, key: &str, default: T) -> T {
        match (self.lookup)(key) {
            None => default,
            Some(raw) => match raw.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(key, value = %raw, default = ?default, "Invalid config value, using default");
                    default
                }
            },
        }
    }

    fn optional<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = (self.lookup)(key)?;
        if raw.trim().is_empty() {
            return None;
        }
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Invalid config value, ignoring");
                None
            }
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// RealtimeHub (WebSocket fan-out)
    pub realtime: Arc<RealtimeHub>,
    /// Bucket ledger (shared by every session)
    pub ledger: Arc<BucketLedger>,
    /// Conveyor relay ownership
    pub actuators: Arc<ActuatorManager>,
    /// Panel button fan-out
    pub panel: Arc<PanelButtons>,
    /// CSV report export
    pub reports: ReportWriter,
    /// Everything a session router needs
    pub router: RouterContext,
}

impl AppState {
    /// Construct every service from config
    pub async fn build(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let realtime = Arc::new(RealtimeHub::new());
        let ledger = Arc::new(
            BucketLedger::load(
                LedgerRepository::new(&config.ledger_path),
                config.bucket_count,
                config.default_set_value,
                realtime.clone(),
            )
            .await,
        );

        let actuator: Arc<dyn Actuator> = match config.relay_gpio {
            Some(pin) => Arc::new(SysfsGpioRelay::open(pin, config.relay_active_low).await?),
            None => {
                tracing::warn!("RELAY_GPIO not set, using simulated relay");
                Arc::new(SimulatedActuator::new())
            }
        };
        let actuators = Arc::new(ActuatorManager::new(actuator));
        let panel = Arc::new(PanelButtons::new(actuators.clone()));

        let power: Arc<dyn PowerControl> = match SystemPower::from_command_line(&config.poweroff_command) {
            Some(power) => Arc::new(power),
            None => Arc::new(NoopPower),
        };

        let router = RouterContext {
            ledger: ledger.clone(),
            actuators: actuators.clone(),
            frame_sources: Arc::new(FfmpegSourceFactory::new(
                config.video_source.clone(),
                config.frame_width,
                config.frame_height,
            )),
            detector: Arc::new(ColorDetector::new(ColorDetectorConfig {
                min_area: config.detector_min_area,
                ..Default::default()
            })),
            annotator: FrameAnnotator::new(config.jpeg_quality),
            tracker_config: config.tracker_config(),
            retry: config.retry_policy(),
            frame_interval: config.frame_interval(),
            power,
            power_off_delay: Duration::from_secs(1),
        };

        Ok(Self {
            reports: ReportWriter::new(&config.report_path),
            config,
            realtime,
            ledger,
            actuators,
            panel,
            router,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.bucket_count, 14);
        assert_eq!(config.default_set_value, 800);
        assert_eq!(config.jpeg_quality, 50);
        assert_eq!(config.relay_gpio, None);
        assert_eq!(config.tracker_gate, MatchGate::Distance(50.0));
        assert_eq!(
            config.trigger,
            TriggerLine::horizontal(120.0, CrossingDirection::Decreasing)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let config = config_from(&[
            ("PORT", "9001"),
            ("BUCKET_COUNT", "not-a-number"),
            ("TRIGGER_AXIS", "vertical"),
            ("TRIGGER_DIRECTION", "increasing"),
            ("TRIGGER_POSITION", "64"),
            ("TRACKER_MATCH", "iou"),
            ("TRACKER_MIN_IOU", "0.4"),
            ("RELAY_GPIO", "17"),
            ("STOP_BUTTON_GPIO", ""),
            ("STATIC_DIR", "/srv/ui"),
        ]);
        assert_eq!(config.port, 9001);
        assert_eq!(config.bucket_count, 14);
        assert_eq!(
            config.trigger,
            TriggerLine::vertical(64.0, CrossingDirection::Increasing)
        );
        assert_eq!(config.tracker_gate, MatchGate::Overlap(0.4));
        assert_eq!(config.relay_gpio, Some(17));
        assert_eq!(config.stop_button_gpio, None);
        assert_eq!(config.static_dir, Some(PathBuf::from("/srv/ui")));
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(matches!(
            config_from(&[("BUCKET_COUNT", "0")]).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_from(&[("DEFAULT_SET_VALUE", "0")]).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config_from(&[("FRAME_RATE", "0")]).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_frame_interval() {
        let config = config_from(&[("FRAME_RATE", "20")]);
        assert_eq!(config.frame_interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_build_with_simulated_relay() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("buckets.json");
        let report_path = dir.path().join("reports.csv");
        let config = config_from(&[
            ("BUCKET_COUNT", "4"),
            ("LEDGER_PATH", ledger_path.to_str().unwrap()),
            ("REPORT_PATH", report_path.to_str().unwrap()),
            ("POWEROFF_COMMAND", ""),
        ]);

        let state = AppState::build(config).await.unwrap();
        assert_eq!(state.ledger.snapshot().await.len(), 4);
        assert_eq!(state.actuators.describe(), "simulated");
    }
}
