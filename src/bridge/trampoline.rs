//! 交给宿主的 C ABI 入口。
//!
//! 每个回调点一个静态函数：找到当前安装的 bridge，把 refcon 还原成 handle，
//! 交给门面查找。没有 bridge 或查不到 handle 时返回该回调点的中性结果。
//! 这里从不解引用 refcon。

use std::ffi::c_void;
use std::os::raw::{c_float, c_int};
use std::panic::{self, AssertUnwindSafe};

use crate::host::XPLMCameraPosition_t;

/// 锁定 -> 检查已安装的 bridge -> 执行；panic 不得越过 C 边界
macro_rules! with_bridge {
    ($neutral:expr, |$bridge:ident| $body:expr) => {{
        let Some($bridge) = super::current() else {
            return $neutral;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| $body)) {
            Ok(v) => v,
            Err(_) => {
                tracing::error!("dispatch panicked outside a callback");
                $neutral
            }
        }
    }};
}

/// `XPLMMenuHandler_f`
pub unsafe extern "C" fn menu_handler(menu_ref: *mut c_void, item_ref: *mut c_void) {
    with_bridge!((), |bridge| bridge.menus().dispatch(menu_ref, item_ref))
}

/// `XPLMFlightLoop_f`，返回 0 停止调度
pub unsafe extern "C" fn flight_loop(
    elapsed_since_last_call: c_float,
    elapsed_since_last_flight_loop: c_float,
    counter: c_int,
    refcon: *mut c_void,
) -> c_float {
    with_bridge!(0.0, |bridge| bridge.flight_loops().dispatch(
        elapsed_since_last_call,
        elapsed_since_last_flight_loop,
        counter,
        refcon,
    ))
}

/// `XPLMCameraControl_f`，返回 0 交还相机
///
/// # Safety
/// `out_position` 为空，或指向调用期间由宿主持有的相机位置
pub unsafe extern "C" fn camera_control(
    out_position: *mut XPLMCameraPosition_t,
    is_losing_control: c_int,
    refcon: *mut c_void,
) -> c_int {
    with_bridge!(0, |bridge| {
        let position = unsafe { out_position.as_mut() };
        bridge
            .camera()
            .dispatch(position, is_losing_control != 0, refcon)
    })
}

/// `XPWidgetFunc_t`，返回 0 表示交给下一个处理者
pub unsafe extern "C" fn widget_message(
    message: c_int,
    widget: *mut c_void,
    param1: isize,
    param2: isize,
) -> c_int {
    with_bridge!(0, |bridge| bridge
        .widgets()
        .dispatch(message, widget, param1, param2))
}
