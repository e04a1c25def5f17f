//! 宿主边界
//!
//! 门面对模拟器的所有调用都经过 [`HostApi`]。[`XplmHost`] 转发给真实 SDK
//! （feature `xplm`），[`SimHost`] 在进程内按模拟器的方式驱动 trampoline。

pub mod sim;
pub mod sys;
#[cfg(feature = "xplm")]
pub mod xplm;

use std::ffi::{c_void, CStr};
use std::os::raw::c_int;

pub use sim::SimHost;
pub use sys::{CameraControlFn, FlightLoopFn, MenuHandlerFn, WidgetFn, XPLMCameraPosition_t};
#[cfg(feature = "xplm")]
pub use xplm::XplmHost;

macro_rules! host_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            /// 宿主的空对象为 `None`
            pub fn from_raw(raw: *mut c_void) -> Option<Self> {
                if raw.is_null() {
                    None
                } else {
                    Some(Self(raw as usize))
                }
            }

            pub fn as_raw(self) -> *mut c_void {
                self.0 as *mut c_void
            }
        }
    };
}

host_id!(
    /// `XPLMMenuID`
    MenuId
);
host_id!(
    /// `XPLMFlightLoopID`
    FlightLoopId
);
host_id!(
    /// `XPWidgetID`
    WidgetId
);

/// 飞行循环相对飞行模型的执行时机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightLoopPhase {
    BeforeFlightModel,
    AfterFlightModel,
}

impl FlightLoopPhase {
    pub fn to_raw(self) -> c_int {
        match self {
            Self::BeforeFlightModel => sys::XPLM_FLIGHT_LOOP_PHASE_BEFORE_FLIGHT_MODEL,
            Self::AfterFlightModel => sys::XPLM_FLIGHT_LOOP_PHASE_AFTER_FLIGHT_MODEL,
        }
    }
}

/// 插件持有相机的时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraControlDuration {
    UntilViewChanges,
    Forever,
}

impl CameraControlDuration {
    pub fn to_raw(self) -> c_int {
        match self {
            Self::UntilViewChanges => sys::XPLM_CONTROL_CAMERA_UNTIL_VIEW_CHANGES,
            Self::Forever => sys::XPLM_CONTROL_CAMERA_FOREVER,
        }
    }

    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            sys::XPLM_CONTROL_CAMERA_UNTIL_VIEW_CHANGES => Some(Self::UntilViewChanges),
            sys::XPLM_CONTROL_CAMERA_FOREVER => Some(Self::Forever),
            _ => None,
        }
    }
}

/// 相机位置和朝向
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub pitch: f32,
    pub heading: f32,
    pub roll: f32,
    pub zoom: f32,
}

impl CameraPosition {
    pub fn write_to(&self, out: &mut XPLMCameraPosition_t) {
        out.x = self.x;
        out.y = self.y;
        out.z = self.z;
        out.pitch = self.pitch;
        out.heading = self.heading;
        out.roll = self.roll;
        out.zoom = self.zoom;
    }
}

impl From<XPLMCameraPosition_t> for CameraPosition {
    fn from(raw: XPLMCameraPosition_t) -> Self {
        Self {
            x: raw.x,
            y: raw.y,
            z: raw.z,
            pitch: raw.pitch,
            heading: raw.heading,
            roll: raw.roll,
            zoom: raw.zoom,
        }
    }
}

/// 创建 widget 用的屏幕矩形和标志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetGeometry {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub visible: bool,
    pub is_root: bool,
}

impl WidgetGeometry {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            visible: true,
            is_root: false,
        }
    }

    pub fn root(mut self) -> Self {
        self.is_root = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// 门面依赖的宿主 SDK 调用。
///
/// refcon 原样透传，宿主从不解读它。
pub trait HostApi: Send + Sync {
    fn debug_string(&self, message: &str);

    // ── 菜单 ──

    fn find_plugins_menu(&self) -> Option<MenuId>;

    fn create_menu(
        &self,
        name: &CStr,
        parent: Option<MenuId>,
        parent_item: i32,
        handler: Option<MenuHandlerFn>,
        menu_ref: *mut c_void,
    ) -> Option<MenuId>;

    /// 新菜单项的序号，失败时为负
    fn append_menu_item(&self, menu: MenuId, name: &CStr, item_ref: *mut c_void) -> i32;

    fn append_menu_separator(&self, menu: MenuId);

    fn set_menu_item_name(&self, menu: MenuId, index: i32, name: &CStr);

    fn enable_menu_item(&self, menu: MenuId, index: i32, enabled: bool);

    fn clear_all_menu_items(&self, menu: MenuId);

    fn destroy_menu(&self, menu: MenuId);

    // ── 飞行循环 ──

    fn create_flight_loop(
        &self,
        phase: FlightLoopPhase,
        callback: FlightLoopFn,
        refcon: *mut c_void,
    ) -> Option<FlightLoopId>;

    fn schedule_flight_loop(&self, id: FlightLoopId, interval: f32, relative_to_now: bool);

    fn destroy_flight_loop(&self, id: FlightLoopId);

    // ── 相机 ──

    fn control_camera(
        &self,
        duration: CameraControlDuration,
        callback: CameraControlFn,
        refcon: *mut c_void,
    );

    fn dont_control_camera(&self);

    fn is_camera_being_controlled(&self) -> Option<CameraControlDuration>;

    // ── widget ──

    fn create_custom_widget(
        &self,
        geometry: &WidgetGeometry,
        descriptor: &CStr,
        parent: Option<WidgetId>,
        callback: WidgetFn,
    ) -> Option<WidgetId>;

    fn destroy_widget(&self, id: WidgetId, destroy_children: bool);

    fn set_widget_property(&self, id: WidgetId, property: i32, value: isize);

    fn get_widget_property(&self, id: WidgetId, property: i32) -> Option<isize>;

    /// 宿主记录的父 widget，根或已销毁时为 `None`
    fn widget_parent(&self, id: WidgetId) -> Option<WidgetId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_host_object_is_none() {
        assert_eq!(MenuId::from_raw(std::ptr::null_mut()), None);
        let id = MenuId::from_raw(0x10 as *mut c_void).unwrap();
        assert_eq!(id.as_raw() as usize, 0x10);
    }

    #[test]
    fn camera_duration_raw_values() {
        assert_eq!(CameraControlDuration::Forever.to_raw(), 2);
        assert_eq!(CameraControlDuration::from_raw(1), Some(CameraControlDuration::UntilViewChanges));
        assert_eq!(CameraControlDuration::from_raw(9), None);
    }

    #[test]
    fn camera_position_writes_every_field() {
        let pos = CameraPosition {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            pitch: -5.0,
            heading: 90.0,
            roll: 0.5,
            zoom: 1.0,
        };
        let mut raw = XPLMCameraPosition_t::default();
        pos.write_to(&mut raw);
        assert_eq!(CameraPosition::from(raw), pos);
    }

    #[test]
    fn widget_geometry_builders() {
        let g = WidgetGeometry::new(0, 100, 200, 0).root().hidden();
        assert!(g.is_root);
        assert!(!g.visible);
    }
}
