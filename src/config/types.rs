use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        // level 直接作为 EnvFilter 指令，例如 "info" 或 "xplane_bridge=debug"
        if let Err(e) = EnvFilter::try_new(&self.log.level) {
            return Err(BridgeError::Config(format!(
                "invalid log level '{}': {e}",
                self.log.level
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 把日志转发到模拟器的 Log.txt
    #[serde(default = "default_true")]
    pub forward_to_host: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            forward_to_host: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

/// 本插件已控制相机时 `control_camera` 的行为
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// 丢弃旧的控制者，装上新的
    #[default]
    Supersede,
    /// 返回 `CameraBusy`
    Reject,
}
