//! Session Coordinator configuration.
//!
//! Configuration is loaded from environment variables. The Redis URL may
//! carry credentials and is redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default signaling bind address (WebSocket + HTTP).
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default number of engine workers to launch.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Default RTC media port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 20000;
pub const DEFAULT_RTC_MAX_PORT: u16 = 29999;

/// Default directory for recording output files.
pub const DEFAULT_RECORDING_DIR: &str = "./recordings";

/// Default recording process binary.
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// Default Redis pub/sub channel for cross-instance room events.
pub const DEFAULT_ROOM_EVENTS_CHANNEL: &str = "roomCreated";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "sc";

/// Session Coordinator configuration.
///
/// Loaded from environment variables with sensible defaults. Only the Redis
/// URL is required when cross-instance sync is enabled; everything else has
/// a default.
#[derive(Clone)]
pub struct Config {
    /// Signaling server bind address (default: "0.0.0.0:3000").
    pub signaling_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Redis connection URL for cross-instance room sync. When unset the
    /// coordinator runs standalone and skips the sync layer entirely.
    pub redis_url: Option<String>,

    /// Redis pub/sub channel for room events.
    pub room_events_channel: String,

    /// Unique identifier for this coordinator instance.
    pub instance_id: String,

    /// Number of engine workers to launch at startup.
    pub num_workers: usize,

    /// Lowest RTC media port workers may allocate.
    pub rtc_min_port: u16,

    /// Highest RTC media port workers may allocate.
    pub rtc_max_port: u16,

    /// Address announced to clients in ICE candidates, if the listen
    /// address is not directly reachable.
    pub announced_ip: Option<String>,

    /// Directory recording output files are written to.
    pub recording_dir: String,

    /// Recording process binary.
    pub ffmpeg_path: String,
}

/// Custom Debug implementation that redacts the Redis URL (may contain
/// credentials).
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("signaling_bind_address", &self.signaling_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("room_events_channel", &self.room_events_channel)
            .field("instance_id", &self.instance_id)
            .field("num_workers", &self.num_workers)
            .field("rtc_min_port", &self.rtc_min_port)
            .field("rtc_max_port", &self.rtc_max_port)
            .field("announced_ip", &self.announced_ip)
            .field("recording_dir", &self.recording_dir)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_bind_address = vars
            .get("SC_SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let redis_url = vars.get("REDIS_URL").cloned();

        let room_events_channel = vars
            .get("SC_ROOM_EVENTS_CHANNEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROOM_EVENTS_CHANNEL.to_string());

        let num_workers = vars
            .get("SC_NUM_WORKERS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_NUM_WORKERS);
        if num_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_NUM_WORKERS must be at least 1".to_string(),
            ));
        }

        let rtc_min_port = vars
            .get("SC_RTC_MIN_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RTC_MIN_PORT);

        let rtc_max_port = vars
            .get("SC_RTC_MAX_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RTC_MAX_PORT);

        if rtc_min_port >= rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RTC port range is empty: {rtc_min_port}..{rtc_max_port}"
            )));
        }

        let announced_ip = vars.get("SC_ANNOUNCED_IP").cloned();

        let recording_dir = vars
            .get("SC_RECORDING_DIR")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RECORDING_DIR.to_string());

        let ffmpeg_path = vars
            .get("SC_FFMPEG_PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FFMPEG_PATH.to_string());

        // Generate instance ID
        let instance_id = vars.get("SC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            signaling_bind_address,
            health_bind_address,
            redis_url,
            room_events_channel,
            instance_id,
            num_workers,
            rtc_min_port,
            rtc_max_port,
            announced_ip,
            recording_dir,
            ffmpeg_path,
        })
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_settings(&self) -> media_engine::EngineSettings {
        media_engine::EngineSettings {
            rtc_min_port: self.rtc_min_port,
            rtc_max_port: self.rtc_max_port,
            announced_ip: self.announced_ip.clone(),
        }
    }
}
