//! 宿主 SDK 头文件规定的 C 侧布局和常量。

use std::ffi::c_void;
use std::os::raw::{c_float, c_int};

/// `XPLMMenuHandler_f`
pub type MenuHandlerFn = unsafe extern "C" fn(menu_ref: *mut c_void, item_ref: *mut c_void);

/// `XPLMFlightLoop_f`
pub type FlightLoopFn = unsafe extern "C" fn(
    elapsed_since_last_call: c_float,
    elapsed_since_last_flight_loop: c_float,
    counter: c_int,
    refcon: *mut c_void,
) -> c_float;

/// `XPLMCameraControl_f`
pub type CameraControlFn = unsafe extern "C" fn(
    out_position: *mut XPLMCameraPosition_t,
    is_losing_control: c_int,
    refcon: *mut c_void,
) -> c_int;

/// `XPWidgetFunc_t`。widget 回调没有 refcon 参数，handle 放在 widget 的
/// `xpProperty_Refcon` 属性里传递
pub type WidgetFn = unsafe extern "C" fn(
    message: c_int,
    widget: *mut c_void,
    param1: isize,
    param2: isize,
) -> c_int;

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct XPLMCameraPosition_t {
    pub x: c_float,
    pub y: c_float,
    pub z: c_float,
    pub pitch: c_float,
    pub heading: c_float,
    pub roll: c_float,
    pub zoom: c_float,
}

#[allow(non_camel_case_types)]
#[repr(C)]
pub struct XPLMCreateFlightLoop_t {
    pub struct_size: c_int,
    pub phase: c_int,
    pub callback_func: Option<FlightLoopFn>,
    pub refcon: *mut c_void,
}

pub const XPLM_FLIGHT_LOOP_PHASE_BEFORE_FLIGHT_MODEL: c_int = 0;
pub const XPLM_FLIGHT_LOOP_PHASE_AFTER_FLIGHT_MODEL: c_int = 1;

pub const XPLM_CONTROL_CAMERA_UNTIL_VIEW_CHANGES: c_int = 1;
pub const XPLM_CONTROL_CAMERA_FOREVER: c_int = 2;

pub const XP_PROPERTY_REFCON: c_int = 0;
