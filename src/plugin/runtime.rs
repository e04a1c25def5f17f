use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::{error, info, warn};

use super::{Plugin, PluginId, PluginInfo};
use crate::bridge::{self, Bridge};
use crate::facade::panic_message;
use crate::host::HostApi;
use crate::logging;

/// 宿主提供的信息缓冲区为 256 字节
const HOST_BUFFER_MAX: usize = 255;

const START_ERROR_NAME: &str = "Error";
const START_ERROR_SIGNATURE: &str = "xplane-bridge.error.start";

/// 按宿主的生命周期调用驱动一个 [`Plugin`]
pub struct PluginRuntime<P> {
    plugin: P,
    host: Arc<dyn HostApi>,
    bridge: Option<Arc<Bridge>>,
}

impl<P: Plugin> PluginRuntime<P> {
    pub fn new(plugin: P, host: Arc<dyn HostApi>) -> Self {
        Self {
            plugin,
            host,
            bridge: None,
        }
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut P {
        &mut self.plugin
    }

    /// enable 与 disable 之间存活的 bridge
    pub fn bridge(&self) -> Option<&Arc<Bridge>> {
        self.bridge.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn start(&mut self) -> anyhow::Result<PluginInfo> {
        let plugin = &mut self.plugin;
        let result = hook("start", || plugin.start()).and_then(|r| r);
        match &result {
            Ok(info) => info!(name = info.name.as_str(), signature = info.signature.as_str(), "plugin started"),
            Err(e) => self.report(&format!("plugin start failed: {e:#}")),
        }
        result
    }

    /// `XPluginStart`：执行 [`start`](Self::start) 并把结果拷进宿主缓冲区，失败时缓冲区里写的是错误
    ///
    /// # Safety
    /// 每个指针为空，或指向至少 256 字节的可写缓冲区
    pub unsafe fn start_into(&mut self, out_name: *mut c_char, out_sig: *mut c_char, out_desc: *mut c_char) -> c_int {
        let (info, ok) = match self.start() {
            Ok(info) => (info, 1),
            Err(e) => (
                PluginInfo::new(
                    START_ERROR_NAME,
                    START_ERROR_SIGNATURE,
                    format!("plugin start failed: {e:#}"),
                ),
                0,
            ),
        };
        unsafe {
            copy_to_host_buffer(out_name, &info.name);
            copy_to_host_buffer(out_sig, &info.signature);
            copy_to_host_buffer(out_desc, &info.description);
        }
        ok
    }

    /// 建 bridge、接日志、把 bridge 装进进程槽位，再交给插件。插件失败时不留任何东西，重复 enable 不做事
    pub fn enable(&mut self) -> anyhow::Result<()> {
        if self.bridge.is_some() {
            return Ok(());
        }

        let config = self.plugin.config().context("plugin config")?;
        config.validate()?;
        logging::init(&config.log);
        if config.log.forward_to_host {
            logging::attach(self.host.clone());
        }

        let bridge = Arc::new(Bridge::new(self.host.clone(), config));
        if bridge::install(bridge.clone()).is_some() {
            warn!("replaced a bridge that was still installed");
        }

        let plugin = &mut self.plugin;
        let result = hook("enable", || plugin.enable(&bridge)).and_then(|r| r);
        if let Err(e) = result {
            bridge.shutdown();
            bridge::uninstall_if(&bridge);
            self.report(&format!("plugin enable failed: {e:#}"));
            logging::detach();
            return Err(e);
        }

        info!(stats = ?bridge.stats(), "plugin enabled");
        self.bridge = Some(bridge);
        Ok(())
    }

    /// 先让插件清理，再释放仍注册着的一切，并把 bridge 移出进程槽位
    pub fn disable(&mut self) {
        let Some(bridge) = self.bridge.take() else {
            return;
        };
        let plugin = &mut self.plugin;
        if let Err(e) = hook("disable", || plugin.disable(&bridge)) {
            // 插件自己的清理失败了，bridge 照样兜底释放
            self.report(&format!("plugin disable failed: {e:#}"));
        }
        bridge.shutdown();
        bridge::uninstall_if(&bridge);
        info!("plugin disabled");
        logging::detach();
    }

    pub fn stop(&mut self) {
        self.disable();
        let plugin = &mut self.plugin;
        if let Err(e) = hook("stop", || plugin.stop()) {
            self.report(&format!("plugin stop failed: {e:#}"));
        }
        info!("plugin stopped");
    }

    pub fn receive_message(&mut self, from: PluginId, message: i32, param: *mut c_void) {
        let plugin = &mut self.plugin;
        if let Err(e) = hook("receive_message", || plugin.receive_message(from, message, param)) {
            self.report(&format!("plugin message {message} from {from} failed: {e:#}"));
        }
    }

    fn report(&self, message: &str) {
        error!("{message}");
        self.host.debug_string(&format!("xplane-bridge: {message}\n"));
    }
}

/// 执行生命周期钩子，panic 转成错误
fn hook<R>(name: &'static str, f: impl FnOnce() -> R) -> anyhow::Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| anyhow!("plugin {name} hook panicked: {}", panic_message(payload.as_ref())))
}

/// `strncpy(dst, s, 255)` 再补 NUL，遇到内嵌 NUL 即停
///
/// # Safety
/// `dst` 为空，或指向至少 `HOST_BUFFER_MAX + 1` 字节的可写内存
pub(crate) unsafe fn copy_to_host_buffer(dst: *mut c_char, s: &str) {
    if dst.is_null() {
        return;
    }
    let bytes = s.as_bytes();
    let len = bytes
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(bytes.len())
        .min(HOST_BUFFER_MAX);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), dst, len);
        *dst.add(len) = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn read(buf: &[c_char; 256]) -> String {
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn host_buffer_copy_terminates() {
        let mut buf = [1 as c_char; 256];
        unsafe { copy_to_host_buffer(buf.as_mut_ptr(), "Hello") };
        assert_eq!(read(&buf), "Hello");
    }

    #[test]
    fn host_buffer_copy_truncates_at_limit() {
        let mut buf = [1 as c_char; 256];
        let long = "x".repeat(400);
        unsafe { copy_to_host_buffer(buf.as_mut_ptr(), &long) };
        assert_eq!(read(&buf).len(), HOST_BUFFER_MAX);
        assert_eq!(buf[HOST_BUFFER_MAX], 0);
    }

    #[test]
    fn host_buffer_copy_stops_at_nul() {
        let mut buf = [1 as c_char; 256];
        unsafe { copy_to_host_buffer(buf.as_mut_ptr(), "ab\0cd") };
        assert_eq!(read(&buf), "ab");
        unsafe { copy_to_host_buffer(std::ptr::null_mut(), "ignored") };
    }

    #[test]
    fn hook_reports_panic() {
        let err = hook("start", || -> u8 { panic!("bad start") }).unwrap_err();
        assert!(err.to_string().contains("start hook panicked: bad start"));
        assert_eq!(hook("stop", || 3).unwrap(), 3);
    }
}
