//! 自定义 widget。widget 回调没有 refcon 参数，handle 在创建后写进
//! `xpProperty_Refcon`，每条消息再读出来。

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::{c_name, invoke, Invocation};
use crate::bridge::trampoline;
use crate::error::{BridgeError, Result};
use crate::handle::{Handle, HandleAllocator};
use crate::host::sys::XP_PROPERTY_REFCON;
use crate::host::{HostApi, WidgetGeometry, WidgetId};
use crate::registry::{CallbackCell, Registry};

/// 发给自定义 widget 的一条消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetEvent {
    pub message: i32,
    pub widget: WidgetId,
    pub param1: isize,
    pub param2: isize,
}

pub type WidgetCallback = dyn FnMut(&WidgetEvent) -> bool + Send;

pub struct Widgets {
    host: Arc<dyn HostApi>,
    registry: Registry<CallbackCell<WidgetCallback>>,
    // 宿主 ID → handle。父子关系以宿主为准，中间可能夹着非本插件创建的 widget
    by_id: RwLock<HashMap<WidgetId, Handle>>,
}

impl Widgets {
    pub fn new(host: Arc<dyn HostApi>, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            host,
            registry: Registry::new("widgets", allocator),
            by_id: RwLock::new(HashMap::new()),
        }
    }

    /// 创建 widget，消息交给 `callback`；返回 `true` 表示已处理。
    ///
    /// 宿主构造过程中（refcon 属性写入之前）发来的消息按未处理返回。
    pub fn create_custom_widget<F>(
        &self,
        geometry: WidgetGeometry,
        descriptor: &str,
        parent: Option<WidgetId>,
        callback: F,
    ) -> Result<WidgetId>
    where
        F: FnMut(&WidgetEvent) -> bool + Send + 'static,
    {
        let c_descriptor = c_name(descriptor)?;
        let callback: Box<WidgetCallback> = Box::new(callback);
        let handle = self.registry.register(CallbackCell::new(callback));

        let Some(id) = self
            .host
            .create_custom_widget(&geometry, &c_descriptor, parent, trampoline::widget_message)
        else {
            self.registry.unregister(handle);
            warn!(descriptor, "host refused to create widget");
            return Err(BridgeError::HostCreateFailed { what: "widget" });
        };

        self.host
            .set_widget_property(id, XP_PROPERTY_REFCON, handle.get() as isize);
        self.by_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        debug!(widget = ?id, handle = handle.get(), descriptor, "widget created");
        Ok(id)
    }

    /// 先注销 widget（`destroy_children` 时连同宿主树里它下面所有本插件
    /// 创建的 widget），再让宿主销毁。返回这个 widget 是否由本插件创建。
    pub fn destroy_widget(&self, id: WidgetId, destroy_children: bool) -> bool {
        let (known, released) = {
            let mut by_id = self.by_id.write().unwrap_or_else(PoisonError::into_inner);
            let mut doomed = vec![id];
            if destroy_children {
                doomed.extend(
                    by_id
                        .keys()
                        .filter(|w| self.ancestors(**w).any(|p| p == id))
                        .copied(),
                );
            }
            let known = by_id.contains_key(&id);
            let mut released = 0;
            for w in doomed {
                if let Some(handle) = by_id.remove(&w) {
                    self.registry.unregister(handle);
                    released += 1;
                }
            }
            (known, released)
        };

        self.host.destroy_widget(id, destroy_children);
        debug!(widget = ?id, released, destroy_children, "widget destroyed");
        known
    }

    /// 宿主父链，从直接父节点到根
    fn ancestors(&self, widget: WidgetId) -> impl Iterator<Item = WidgetId> + '_ {
        std::iter::successors(self.host.widget_parent(widget), move |p| self.host.widget_parent(*p))
    }

    pub fn handle_of(&self, id: WidgetId) -> Option<Handle> {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// widget trampoline 的入口，已处理返回 1。
    ///
    /// 回调里改属性时宿主会同步地给同一个 widget 再发消息，这种重入按
    /// 未处理返回，不会阻塞。
    pub fn dispatch(&self, message: i32, widget: *mut c_void, param1: isize, param2: isize) -> i32 {
        let Some(id) = WidgetId::from_raw(widget) else {
            return 0;
        };
        let Some(raw) = self.host.get_widget_property(id, XP_PROPERTY_REFCON) else {
            return 0;
        };
        let Some(handle) = Handle::from_raw(raw as usize) else {
            return 0;
        };
        let Some(entry) = self.registry.lookup(handle) else {
            return 0;
        };

        let event = WidgetEvent {
            message,
            widget: id,
            param1,
            param2,
        };
        match invoke("widget", handle, &entry, |f| f(&event)) {
            Invocation::Returned(handled) => i32::from(handled),
            Invocation::Reentered | Invocation::Panicked => 0,
        }
    }

    /// 从每棵树最上层的本插件 widget 开始整棵销毁
    pub fn shutdown(&self) {
        let roots: Vec<WidgetId> = {
            let by_id = self.by_id.read().unwrap_or_else(PoisonError::into_inner);
            by_id
                .keys()
                .filter(|w| self.ancestors(**w).all(|p| !by_id.contains_key(&p)))
                .copied()
                .collect()
        };
        for root in roots {
            self.destroy_widget(root, true);
        }
    }
}
