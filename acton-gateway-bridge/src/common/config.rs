/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Bridge configuration with XDG-compliant file and socket locations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::message::MAX_FRAME_SIZE;

/// Configuration for the gateway bridge.
///
/// # XDG Compliance
///
/// The socket lives in `$XDG_RUNTIME_DIR/acton/<app_name>/` and configuration
/// is loaded from `$XDG_CONFIG_HOME/acton/bridge.toml`.
///
/// # Example Configuration File
///
/// ```toml
/// [socket]
/// # path = "/run/user/1000/acton/my_app/bridge.sock"
/// app_name = "my_app"
///
/// [limits]
/// max_frame_size = 16777216  # 16 MiB
/// outbound_buffer = 256
/// callback_buffer = 32
///
/// [timeouts]
/// request_timeout_ms = 30000
/// sweep_interval_ms = 1000
///
/// [shutdown]
/// drain_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Socket configuration.
    pub socket: SocketConfig,
    /// Frame and buffer limits.
    pub limits: LimitsConfig,
    /// Timeout configuration.
    pub timeouts: TimeoutsConfig,
    /// Shutdown configuration.
    pub shutdown: ShutdownConfig,
}

/// Where the gateway socket lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Override the default socket path.
    pub path: Option<PathBuf>,

    /// Application name for sharding socket paths.
    ///
    /// If `None`, defaults to the binary name.
    pub app_name: Option<String>,
}

/// Frame and buffer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted frame body in bytes. Clamped to the codec's hard limit.
    pub max_frame_size: usize,

    /// Frames queued for the writer task before senders wait.
    pub outbound_buffer: usize,

    /// Callbacks queued per execution context before the dispatcher waits.
    pub callback_buffer: usize,
}

/// Timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Default deadline for an outbound request.
    #[serde(rename = "request_timeout_ms")]
    pub request: u64,

    /// How often the dispatcher sweeps expired pending operations.
    #[serde(rename = "sweep_interval_ms")]
    pub sweep_interval: u64,
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time in milliseconds to wait for the writer to drain.
    #[serde(rename = "drain_timeout_ms")]
    pub drain_timeout: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            outbound_buffer: 256,
            callback_buffer: 32,
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request: 30_000,
            sweep_interval: 1_000,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: 5_000,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from `$XDG_CONFIG_HOME/acton/bridge.toml`.
    ///
    /// Falls back to defaults when the file is missing or unreadable.
    #[must_use]
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("acton") {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Failed to initialize XDG directories for bridge config: {}", e);
                return Self::default();
            }
        };

        xdg_dirs.find_config_file("bridge.toml").map_or_else(
            || {
                info!("No bridge configuration file found, using defaults");
                Self::default()
            },
            |path| {
                info!("Loading bridge configuration from: {}", path.display());
                match std::fs::read_to_string(&path) {
                    Ok(config_str) => Self::from_toml(&config_str).unwrap_or_else(|e| {
                        warn!(
                            "Failed to parse bridge configuration file {}: {}",
                            path.display(),
                            e
                        );
                        Self::default()
                    }),
                    Err(e) => {
                        warn!(
                            "Failed to read bridge configuration file {}: {}",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                }
            },
        )
    }

    /// Parse configuration from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML parse error.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The configured `app_name`, or the binary name.
    #[must_use]
    pub fn app_name(&self) -> String {
        self.socket
            .app_name
            .clone()
            .unwrap_or_else(Self::default_app_name)
    }

    fn default_app_name() -> String {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "acton".to_string())
    }

    /// Socket path of the gateway.
    ///
    /// Defaults to `$XDG_RUNTIME_DIR/acton/<app_name>/bridge.sock`, with
    /// `/tmp` standing in for an unset runtime dir.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.socket.path.clone().unwrap_or_else(|| {
            let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
                .map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from);

            runtime_dir
                .join("acton")
                .join(self.app_name())
                .join("bridge.sock")
        })
    }

    /// Effective frame limit: the configured size, never above the hard limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.limits.max_frame_size.min(MAX_FRAME_SIZE)
    }

    /// Default request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request)
    }

    /// Interval between pending-operation sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.timeouts.sweep_interval)
    }

    /// Time allowed for the writer to drain during shutdown.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.drain_timeout)
    }
}
