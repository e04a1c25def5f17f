//! bridge 服务：一个 handle 分配器、四个门面、一个进程槽位。

pub mod trampoline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::Serialize;
use tracing::info;

use crate::config::BridgeConfig;
use crate::facade::{Camera, FlightLoops, Menus, Widgets};
use crate::handle::HandleAllocator;
use crate::host::HostApi;

pub struct Bridge {
    host: Arc<dyn HostApi>,
    allocator: Arc<HandleAllocator>,
    menus: Menus,
    flight_loops: FlightLoops,
    camera: Camera,
    widgets: Widgets,
    config: BridgeConfig,
    shut_down: AtomicBool,
}

/// 诊断用的瞬时计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub handles_issued: usize,
    pub menus: usize,
    pub menu_handlers: usize,
    pub menu_items: usize,
    pub flight_loops: usize,
    pub widgets: usize,
    pub camera_controlled: bool,
}

impl BridgeStats {
    pub fn live_handles(&self) -> usize {
        self.menu_handlers + self.menu_items + self.flight_loops + self.widgets + usize::from(self.camera_controlled)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Bridge {
    pub fn new(host: Arc<dyn HostApi>, config: BridgeConfig) -> Self {
        let allocator = Arc::new(HandleAllocator::new());
        Self {
            menus: Menus::new(host.clone(), allocator.clone()),
            flight_loops: FlightLoops::new(host.clone(), allocator.clone()),
            camera: Camera::new(host.clone(), allocator.clone(), config.camera.on_conflict),
            widgets: Widgets::new(host.clone(), allocator.clone()),
            host,
            allocator,
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> &Arc<dyn HostApi> {
        &self.host
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn menus(&self) -> &Menus {
        &self.menus
    }

    pub fn flight_loops(&self) -> &FlightLoops {
        &self.flight_loops
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn widgets(&self) -> &Widgets {
        &self.widgets
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            handles_issued: self.allocator.issued(),
            menus: self.menus.menu_count(),
            menu_handlers: self.menus.handler_count(),
            menu_items: self.menus.item_count(),
            flight_loops: self.flight_loops.len(),
            widgets: self.widgets.len(),
            camera_controlled: self.camera.controller().is_some(),
        }
    }

    /// 释放插件仍持有的一切，可重复调用
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let before = self.stats();
        self.camera.shutdown();
        self.flight_loops.shutdown();
        self.widgets.shutdown();
        self.menus.shutdown();
        info!(
            menus = before.menus,
            flight_loops = before.flight_loops,
            widgets = before.widgets,
            "bridge shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 进程槽位：跳板通过它找到当前 bridge
// ═══════════════════════════════════════════════════════════════════════════

static ACTIVE: OnceLock<RwLock<Option<Arc<Bridge>>>> = OnceLock::new();

fn active_lock() -> &'static RwLock<Option<Arc<Bridge>>> {
    ACTIVE.get_or_init(|| RwLock::new(None))
}

/// 让所有 trampoline 指向 `bridge`，返回之前安装的那个
pub fn install(bridge: Arc<Bridge>) -> Option<Arc<Bridge>> {
    active_lock()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(bridge)
}

/// 当前安装的 bridge。返回前已释放槽位锁，回调里可以自由安装或卸载
pub fn current() -> Option<Arc<Bridge>> {
    active_lock()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn uninstall() -> Option<Arc<Bridge>> {
    active_lock()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

/// 只有当前安装的正是 `bridge` 时才卸载
pub fn uninstall_if(bridge: &Arc<Bridge>) -> bool {
    let mut slot = active_lock().write().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|b| Arc::ptr_eq(b, bridge)) {
        slot.take();
        true
    } else {
        false
    }
}
