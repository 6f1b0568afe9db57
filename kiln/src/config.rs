//! Queue and device configuration.
use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Pending log length that triggers an opportunistic flush.
pub const DEFAULT_MAX_PENDING_COMMANDS: usize = 512;
/// Number of command buffers a full pending log is split into.
pub const DEFAULT_NUM_COMMAND_BUFFERS: usize = 4;
/// Maximum number of committed but uncompleted command buffers.
pub const DEFAULT_MAX_COMMAND_BUFFERS_IN_FLIGHT: usize = 8;
/// Size of the staging heap used for host to device copies.
pub const DEFAULT_STAGING_HEAP_SIZE: u64 = 128 * 1024 * 1024;

/// Which device implementation to create at start-up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Records command buffers and executes copies on host memory.
    Recording,
    /// Discards everything and completes command buffers immediately.
    Null,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Recording
    }
}

/// Tuning parameters of a `CommandQueue`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    pub max_pending_commands: usize,
    pub num_command_buffers: usize,
    pub max_command_buffers_in_flight: usize,
    pub staging_heap_size: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_pending_commands: DEFAULT_MAX_PENDING_COMMANDS,
            num_command_buffers: DEFAULT_NUM_COMMAND_BUFFERS,
            max_command_buffers_in_flight: DEFAULT_MAX_COMMAND_BUFFERS_IN_FLIGHT,
            staging_heap_size: DEFAULT_STAGING_HEAP_SIZE,
        }
    }
}

impl QueueConfig {
    /// Maximum number of log entries encoded into a single command buffer.
    pub fn window_size(&self) -> usize {
        self.max_pending_commands / self.num_command_buffers
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_pending_commands == 0 {
            return Err(Error::InvalidConfig("maxPendingCommands must be non-zero".into()));
        }
        if self.num_command_buffers == 0 {
            return Err(Error::InvalidConfig("numCommandBuffers must be non-zero".into()));
        }
        if self.max_command_buffers_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "maxCommandBuffersInFlight must be non-zero".into(),
            ));
        }
        if self.staging_heap_size == 0 {
            return Err(Error::InvalidConfig("stagingHeapSize must be non-zero".into()));
        }
        if self.window_size() == 0 {
            return Err(Error::InvalidConfig(format!(
                "maxPendingCommands ({}) is smaller than numCommandBuffers ({})",
                self.max_pending_commands, self.num_command_buffers
            )));
        }
        Ok(())
    }
}

/// Simulated swapchain of a device.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub image_count: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        SurfaceConfig {
            width: 1280,
            height: 720,
            image_count: 3,
        }
    }
}

/// Top-level configuration file.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub backend: BackendKind,
    pub surface: Option<SurfaceConfig>,
    pub queue: QueueConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Config, Error> {
        let config: Config = serde_json::from_str(json)?;
        config.queue.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let json = fs::read_to_string(path)?;
        Config::from_json_str(&json)
    }
}
