//! 插件生命周期
//!
//! 宿主通过五个导出函数驱动插件：Start / Enable / Disable / Stop / ReceiveMessage。
//! [`Plugin`] 是应用实现的接口，[`PluginRuntime`] 负责在这些时机创建、安装和
//! 拆除 [`Bridge`]，`xplane_plugin!` 宏生成导出函数。

mod macros;
pub mod runtime;

use std::ffi::c_void;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;

pub use runtime::PluginRuntime;

/// `XPLMPluginID`
pub type PluginId = i32;

/// `XPluginStart` 报给宿主的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    /// 反向域名风格，在已安装插件中唯一
    pub signature: String,
    pub description: String,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, signature: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            description: description.into(),
        }
    }
}

/// 插件的应用侧。
///
/// `enable` 里通过 bridge 创建的东西，`disable` 返回后由 runtime 统一拆除；
/// `disable` 只需处理插件想按特定顺序释放的部分。
pub trait Plugin: Send + 'static {
    fn start(&mut self) -> anyhow::Result<PluginInfo>;

    fn enable(&mut self, bridge: &Arc<Bridge>) -> anyhow::Result<()>;

    fn disable(&mut self, _bridge: &Arc<Bridge>) {}

    fn stop(&mut self) {}

    fn receive_message(&mut self, _from: PluginId, _message: i32, _param: *mut c_void) {}

    /// 每次 enable 使用的 bridge 配置
    fn config(&self) -> anyhow::Result<BridgeConfig> {
        Ok(BridgeConfig::default())
    }
}
