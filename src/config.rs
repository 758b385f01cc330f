use std::time::Duration;

use camsync_geometry::{Intrinsics, Pose};
use camsync_pipeline::{EmitPolicy, FrameIds, SyncConfig, buffer, node, trajectory};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "CAMSYNC";

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(DEFAULT_CONFIG_PATH)
}

/// Loads `path` (TOML, required) overlaid with `CAMSYNC__SECTION__KEY` environment variables.
pub fn load_config_from(path: &str) -> Result<Config, ConfigError> {
    info!("Attempting to load configuration from {}", path);

    let settings = Config::builder()
        .add_source(File::new(path, FileFormat::Toml).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build();

    match settings {
        Ok(config) => {
            info!("Successfully loaded configuration: {:?}", config);
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub buffer: BufferSettings,
    pub sync: SyncSettings,
    pub frames: FrameIds,
    pub topics: TopicSettings,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    pub capacity: usize,
    pub rate_hz: f64,
    pub emit_policy: EmitPolicy,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: buffer::DEFAULT_CAPACITY,
            rate_hz: buffer::DEFAULT_RATE_HZ,
            emit_policy: EmitPolicy::Retain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub tick_ms: u64,
    pub retention_secs: f64,
    /// Keep every trajectory pose; overrides `retention_secs`
    pub unbounded_trajectory: bool,
    /// Body-to-camera transform, `[tx, ty, tz, qx, qy, qz, qw]`
    pub camera_mount: [f64; 7],
    pub topic_capacity: usize,
    pub monitor_period_ms: u64,
    /// A tick older than this is reported as a stall
    pub stall_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let [qx, qy, qz, qw] = node::CAMERA_MOUNT_XYZW;
        Self {
            tick_ms: 10,
            retention_secs: trajectory::DEFAULT_RETENTION_SECS,
            unbounded_trajectory: false,
            camera_mount: [0.0, 0.0, 0.0, qx, qy, qz, qw],
            topic_capacity: 64,
            monitor_period_ms: 1000,
            stall_timeout_ms: 500,
        }
    }
}

impl SyncSettings {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub map_data: String,
    pub image: String,
    pub camera_info: String,
    pub get_map: String,
    pub image_out: String,
    pub camera_info_out: String,
    pub tf: String,
    pub synced: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            map_data: "mapData".to_owned(),
            image: "image".to_owned(),
            camera_info: "camera_info".to_owned(),
            get_map: "get_map".to_owned(),
            image_out: "asa/image".to_owned(),
            camera_info_out: "asa/camera_info".to_owned(),
            tf: "tf".to_owned(),
            synced: "asa/synced".to_owned(),
        }
    }
}

/// Synthetic producers standing in for the mapping system and the camera driver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub enabled: bool,
    pub image_rate_hz: f64,
    pub map_rate_hz: f64,
    /// Maximum capture-to-publish latency added to image stamps
    pub jitter_ms: f64,
    /// Radius of the circular trajectory (m)
    pub radius_m: f64,
    /// Angular speed along the circle (rad/s)
    pub angular_speed: f64,
    pub width: u32,
    pub height: u32,
    pub intrinsics: [f64; 4],
    pub map_request_period_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            image_rate_hz: 30.0,
            map_rate_hz: 5.0,
            jitter_ms: 5.0,
            radius_m: 2.0,
            angular_speed: 0.2,
            width: 640,
            height: 480,
            intrinsics: [525.0, 525.0, 319.5, 239.5],
            map_request_period_ms: 5000,
        }
    }
}

impl SimulationSettings {
    pub fn intrinsics(&self) -> Intrinsics {
        let [fx, fy, cx, cy] = self.intrinsics;
        Intrinsics::new(fx, fy, cx, cy)
    }
}

impl Settings {
    /// Loads and deserializes the default configuration file.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_config(load_config()?)
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects periods and capacities the runtime cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync.tick_ms == 0 {
            anyhow::bail!("sync.tick_ms must be non-zero");
        }
        if self.sync.monitor_period_ms == 0 {
            anyhow::bail!("sync.monitor_period_ms must be non-zero");
        }
        if self.sync.topic_capacity == 0 {
            anyhow::bail!("sync.topic_capacity must be non-zero");
        }
        if self.simulation.map_request_period_ms == 0 {
            anyhow::bail!("simulation.map_request_period_ms must be non-zero");
        }
        Ok(())
    }

    /// Builds the node configuration.
    pub fn sync_config(&self) -> anyhow::Result<SyncConfig> {
        self.validate()?;
        let camera_mount = Pose::from_flat(self.sync.camera_mount)?;
        let retention_secs = if self.sync.unbounded_trajectory {
            None
        } else {
            Some(self.sync.retention_secs)
        };
        Ok(SyncConfig {
            buffer_capacity: self.buffer.capacity,
            buffer_rate_hz: self.buffer.rate_hz,
            emit_policy: self.buffer.emit_policy,
            retention_secs,
            frames: self.frames.clone(),
            camera_mount,
        })
    }
}
