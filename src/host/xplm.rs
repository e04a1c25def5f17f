//! 生产环境宿主：转发给 XPLM / XPWidgets C API。
//!
//! Linux 上符号在模拟器加载插件时解析；Windows 上需要把 SDK 的导入库放进链接路径。

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_float, c_int};

use super::sys::{
    CameraControlFn, FlightLoopFn, MenuHandlerFn, WidgetFn, XPLMCreateFlightLoop_t,
};
use super::{
    CameraControlDuration, FlightLoopId, FlightLoopPhase, HostApi, MenuId, WidgetGeometry,
    WidgetId,
};

#[cfg_attr(target_os = "windows", link(name = "XPLM_64"))]
extern "C" {
    fn XPLMDebugString(string: *const c_char);

    fn XPLMFindPluginsMenu() -> *mut c_void;
    fn XPLMCreateMenu(
        name: *const c_char,
        parent_menu: *mut c_void,
        parent_item: c_int,
        handler: Option<MenuHandlerFn>,
        menu_ref: *mut c_void,
    ) -> *mut c_void;
    fn XPLMAppendMenuItem(
        menu: *mut c_void,
        item_name: *const c_char,
        item_ref: *mut c_void,
        deprecated_and_ignored: c_int,
    ) -> c_int;
    fn XPLMAppendMenuSeparator(menu: *mut c_void);
    fn XPLMSetMenuItemName(
        menu: *mut c_void,
        index: c_int,
        item_name: *const c_char,
        deprecated_and_ignored: c_int,
    );
    fn XPLMEnableMenuItem(menu: *mut c_void, index: c_int, enabled: c_int);
    fn XPLMClearAllMenuItems(menu: *mut c_void);
    fn XPLMDestroyMenu(menu: *mut c_void);

    fn XPLMCreateFlightLoop(params: *mut XPLMCreateFlightLoop_t) -> *mut c_void;
    fn XPLMScheduleFlightLoop(id: *mut c_void, interval: c_float, relative_to_now: c_int);
    fn XPLMDestroyFlightLoop(id: *mut c_void);

    fn XPLMControlCamera(duration: c_int, func: CameraControlFn, refcon: *mut c_void);
    fn XPLMDontControlCamera();
    fn XPLMIsCameraBeingControlled(out_duration: *mut c_int) -> c_int;
}

#[cfg_attr(target_os = "windows", link(name = "XPWidgets_64"))]
extern "C" {
    fn XPCreateCustomWidget(
        left: c_int,
        top: c_int,
        right: c_int,
        bottom: c_int,
        visible: c_int,
        descriptor: *const c_char,
        is_root: c_int,
        container: *mut c_void,
        callback: WidgetFn,
    ) -> *mut c_void;
    fn XPDestroyWidget(id: *mut c_void, destroy_children: c_int);
    fn XPSetWidgetProperty(id: *mut c_void, property: c_int, value: isize);
    fn XPGetWidgetProperty(id: *mut c_void, property: c_int, exists: *mut c_int) -> isize;
    fn XPGetParentWidget(id: *mut c_void) -> *mut c_void;
}

/// 模拟器本身
#[derive(Debug, Default, Clone, Copy)]
pub struct XplmHost;

impl XplmHost {
    pub fn new() -> Self {
        Self
    }
}

fn opt_raw<T>(id: Option<T>, raw: impl Fn(T) -> *mut c_void) -> *mut c_void {
    id.map_or(std::ptr::null_mut(), raw)
}

impl HostApi for XplmHost {
    fn debug_string(&self, message: &str) {
        // 宿主日志只接受 C 字符串，内嵌 NUL 时截断
        let bytes: Vec<u8> = message.bytes().take_while(|b| *b != 0).collect();
        if let Ok(c) = std::ffi::CString::new(bytes) {
            unsafe { XPLMDebugString(c.as_ptr()) };
        }
    }

    fn find_plugins_menu(&self) -> Option<MenuId> {
        MenuId::from_raw(unsafe { XPLMFindPluginsMenu() })
    }

    fn create_menu(
        &self,
        name: &CStr,
        parent: Option<MenuId>,
        parent_item: i32,
        handler: Option<MenuHandlerFn>,
        menu_ref: *mut c_void,
    ) -> Option<MenuId> {
        let raw = unsafe {
            XPLMCreateMenu(
                name.as_ptr(),
                opt_raw(parent, MenuId::as_raw),
                parent_item,
                handler,
                menu_ref,
            )
        };
        MenuId::from_raw(raw)
    }

    fn append_menu_item(&self, menu: MenuId, name: &CStr, item_ref: *mut c_void) -> i32 {
        unsafe { XPLMAppendMenuItem(menu.as_raw(), name.as_ptr(), item_ref, 1) }
    }

    fn append_menu_separator(&self, menu: MenuId) {
        unsafe { XPLMAppendMenuSeparator(menu.as_raw()) }
    }

    fn set_menu_item_name(&self, menu: MenuId, index: i32, name: &CStr) {
        unsafe { XPLMSetMenuItemName(menu.as_raw(), index, name.as_ptr(), 0) }
    }

    fn enable_menu_item(&self, menu: MenuId, index: i32, enabled: bool) {
        unsafe { XPLMEnableMenuItem(menu.as_raw(), index, enabled as c_int) }
    }

    fn clear_all_menu_items(&self, menu: MenuId) {
        unsafe { XPLMClearAllMenuItems(menu.as_raw()) }
    }

    fn destroy_menu(&self, menu: MenuId) {
        unsafe { XPLMDestroyMenu(menu.as_raw()) }
    }

    fn create_flight_loop(
        &self,
        phase: FlightLoopPhase,
        callback: FlightLoopFn,
        refcon: *mut c_void,
    ) -> Option<FlightLoopId> {
        let mut params = XPLMCreateFlightLoop_t {
            struct_size: std::mem::size_of::<XPLMCreateFlightLoop_t>() as c_int,
            phase: phase.to_raw(),
            callback_func: Some(callback),
            refcon,
        };
        FlightLoopId::from_raw(unsafe { XPLMCreateFlightLoop(&mut params) })
    }

    fn schedule_flight_loop(&self, id: FlightLoopId, interval: f32, relative_to_now: bool) {
        unsafe { XPLMScheduleFlightLoop(id.as_raw(), interval, relative_to_now as c_int) }
    }

    fn destroy_flight_loop(&self, id: FlightLoopId) {
        unsafe { XPLMDestroyFlightLoop(id.as_raw()) }
    }

    fn control_camera(
        &self,
        duration: CameraControlDuration,
        callback: CameraControlFn,
        refcon: *mut c_void,
    ) {
        unsafe { XPLMControlCamera(duration.to_raw(), callback, refcon) }
    }

    fn dont_control_camera(&self) {
        unsafe { XPLMDontControlCamera() }
    }

    fn is_camera_being_controlled(&self) -> Option<CameraControlDuration> {
        let mut duration: c_int = 0;
        let controlled = unsafe { XPLMIsCameraBeingControlled(&mut duration) };
        if controlled == 0 {
            None
        } else {
            CameraControlDuration::from_raw(duration)
        }
    }

    fn create_custom_widget(
        &self,
        geometry: &WidgetGeometry,
        descriptor: &CStr,
        parent: Option<WidgetId>,
        callback: WidgetFn,
    ) -> Option<WidgetId> {
        let raw = unsafe {
            XPCreateCustomWidget(
                geometry.left,
                geometry.top,
                geometry.right,
                geometry.bottom,
                geometry.visible as c_int,
                descriptor.as_ptr(),
                geometry.is_root as c_int,
                opt_raw(parent, WidgetId::as_raw),
                callback,
            )
        };
        WidgetId::from_raw(raw)
    }

    fn destroy_widget(&self, id: WidgetId, destroy_children: bool) {
        unsafe { XPDestroyWidget(id.as_raw(), destroy_children as c_int) }
    }

    fn set_widget_property(&self, id: WidgetId, property: i32, value: isize) {
        unsafe { XPSetWidgetProperty(id.as_raw(), property, value) }
    }

    fn get_widget_property(&self, id: WidgetId, property: i32) -> Option<isize> {
        let mut exists: c_int = 0;
        let value = unsafe { XPGetWidgetProperty(id.as_raw(), property, &mut exists) };
        if exists != 0 {
            Some(value)
        } else {
            None
        }
    }

    fn widget_parent(&self, id: WidgetId) -> Option<WidgetId> {
        WidgetId::from_raw(unsafe { XPGetParentWidget(id.as_raw()) })
    }
}
