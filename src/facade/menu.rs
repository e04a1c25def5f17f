//! 菜单：handler 注册表、菜单项引用注册表，以及把两者挂到宿主菜单上的
//! 归属索引，销毁菜单时级联释放。

use std::any::Any;
use std::ffi::c_void;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::{c_name, invoke};
use crate::bridge::trampoline;
use crate::error::{BridgeError, Result};
use crate::handle::{refcon_of, Handle, HandleAllocator};
use crate::host::{HostApi, MenuHandlerFn, MenuId};
use crate::ownership::OwnershipIndex;
use crate::registry::{CallbackCell, Ref, Registry};

/// 用户选中菜单项时 handler 看到的内容
#[derive(Debug, Clone, Copy)]
pub struct MenuEvent<'a> {
    /// `create_menu` 时给的引用
    pub menu_ref: Option<&'a Ref>,
    /// 被选中项在 `append_menu_item` 时给的引用
    pub item_ref: Option<&'a Ref>,
}

impl<'a> MenuEvent<'a> {
    pub fn menu<T: Any>(&self) -> Result<&'a T> {
        self.menu_ref
            .ok_or_else(|| BridgeError::InvalidArgument("menu has no reference".into()))?
            .downcast()
    }

    pub fn item<T: Any>(&self) -> Result<&'a T> {
        self.item_ref
            .ok_or_else(|| BridgeError::InvalidArgument("item has no reference".into()))?
            .downcast()
    }
}

pub type MenuHandler = dyn for<'a> FnMut(&MenuEvent<'a>) + Send;

struct HandlerEntry {
    callback: CallbackCell<MenuHandler>,
    menu_ref: Option<Ref>,
}

pub struct Menus {
    host: Arc<dyn HostApi>,
    handlers: Registry<HandlerEntry>,
    items: Registry<Ref>,
    index: OwnershipIndex<MenuId>,
    /// 本插件创建的菜单，按创建顺序
    created: Mutex<Vec<MenuId>>,
}

impl Menus {
    pub fn new(host: Arc<dyn HostApi>, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            host,
            handlers: Registry::new("menu-handlers", allocator.clone()),
            items: Registry::new("menu-items", allocator),
            index: OwnershipIndex::new(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn find_plugins_menu(&self) -> Option<MenuId> {
        self.host.find_plugins_menu()
    }

    /// 创建菜单，选中事件交给 `handler`
    pub fn create_menu<F>(
        &self,
        name: &str,
        parent: Option<MenuId>,
        parent_item: i32,
        menu_ref: Option<Ref>,
        handler: F,
    ) -> Result<MenuId>
    where
        F: for<'a> FnMut(&MenuEvent<'a>) + Send + 'static,
    {
        let callback: Box<MenuHandler> = Box::new(handler);
        let entry = HandlerEntry {
            callback: CallbackCell::new(callback),
            menu_ref,
        };
        self.create(name, parent, parent_item, Some(entry))
    }

    /// 创建没有 handler 的菜单（只用来挂子菜单）
    pub fn create_passive_menu(&self, name: &str, parent: Option<MenuId>, parent_item: i32) -> Result<MenuId> {
        self.create(name, parent, parent_item, None)
    }

    fn create(
        &self,
        name: &str,
        parent: Option<MenuId>,
        parent_item: i32,
        entry: Option<HandlerEntry>,
    ) -> Result<MenuId> {
        let c_name = c_name(name)?;
        let handler = entry.map(|e| self.handlers.register(e));
        let callback = handler.map(|_| trampoline::menu_handler as MenuHandlerFn);

        let Some(id) = self
            .host
            .create_menu(&c_name, parent, parent_item, callback, refcon_of(handler))
        else {
            if let Some(h) = handler {
                self.handlers.unregister(h);
            }
            warn!(name, "host refused to create menu");
            return Err(BridgeError::HostCreateFailed { what: "menu" });
        };

        self.index.bind_container(id, handler);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        debug!(name, menu = ?id, handler = handler.map(Handle::get), "menu created");
        Ok(id)
    }

    /// 追加菜单项，返回它在菜单中的序号
    pub fn append_menu_item(&self, menu: MenuId, name: &str, item_ref: Option<Ref>) -> Result<i32> {
        let c_name = c_name(name)?;
        let item = item_ref.map(|r| self.items.register(r));

        let index = self.host.append_menu_item(menu, &c_name, refcon_of(item));
        if index < 0 {
            if let Some(h) = item {
                self.items.unregister(h);
            }
            warn!(name, menu = ?menu, "host refused to append menu item");
            return Err(BridgeError::HostCreateFailed { what: "menu item" });
        }

        if let Some(h) = item {
            self.index.add_item(menu, h);
        }
        Ok(index)
    }

    pub fn append_menu_separator(&self, menu: MenuId) {
        self.host.append_menu_separator(menu);
    }

    pub fn set_menu_item_name(&self, menu: MenuId, index: i32, name: &str) -> Result<()> {
        let c_name = c_name(name)?;
        self.host.set_menu_item_name(menu, index, &c_name);
        Ok(())
    }

    pub fn enable_menu_item(&self, menu: MenuId, index: i32, enabled: bool) {
        self.host.enable_menu_item(menu, index, enabled);
    }

    /// 释放菜单所有项的引用，再让宿主清空
    pub fn clear_all_menu_items(&self, menu: MenuId) {
        let released = self.index.clear_items(menu, &self.items);
        self.host.clear_all_menu_items(menu);
        debug!(menu = ?menu, released, "menu cleared");
    }

    /// 级联：菜单项 → handler → 记账 → 宿主菜单
    pub fn destroy_menu(&self, menu: MenuId) {
        self.index.destroy_container(menu, &self.handlers, &self.items);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|m| *m != menu);
        self.host.destroy_menu(menu);
    }

    /// 按显示顺序的菜单项 handle
    pub fn menu_items(&self, menu: MenuId) -> Vec<Handle> {
        self.index.items(menu)
    }

    pub fn menu_handler(&self, menu: MenuId) -> Option<Handle> {
        self.index.handler(menu)
    }

    pub fn item_ref(&self, item: Handle) -> Option<Ref> {
        self.items.lookup(item).map(|r| (*r).clone())
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.handlers.contains(handle) || self.items.contains(handle)
    }

    /// 菜单 trampoline 的入口。
    ///
    /// 菜单项引用已失效时整个跳过 handler，不会把缺了 item 的事件交出去。
    pub fn dispatch(&self, menu_refcon: *mut c_void, item_refcon: *mut c_void) {
        let Some(handle) = Handle::from_refcon(menu_refcon) else {
            return;
        };
        let Some(entry) = self.handlers.lookup(handle) else {
            return;
        };

        let item = match Handle::from_refcon(item_refcon) {
            None => None,
            Some(item) => match self.items.lookup(item) {
                Some(r) => Some(r),
                None => {
                    warn!(handler = handle.get(), item = item.get(), "menu pick for released item");
                    return;
                }
            },
        };

        let event = MenuEvent {
            menu_ref: entry.menu_ref.as_ref(),
            item_ref: item.as_deref(),
        };
        let _ = invoke("menu", handle, &entry.callback, |f| f(&event));
    }

    /// 销毁本插件创建的所有菜单（先子后父），并释放追加到别人菜单上的菜单项引用
    pub fn shutdown(&self) {
        let created = std::mem::take(&mut *self.created.lock().unwrap_or_else(PoisonError::into_inner));
        for menu in created.into_iter().rev() {
            self.destroy_menu(menu);
        }
        for foreign in self.index.ids() {
            self.index.destroy_container(foreign, &self.handlers, &self.items);
        }
    }

    pub fn menu_count(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}
