//! 子系统门面，每个宿主回调点一个。
//!
//! 门面把共享的 handle 分配器、自己的注册表和宿主的创建/销毁调用组合在一起。
//! 创建时先注册（宿主需要拿 handle 当 refcon），宿主拒绝就回滚注册；
//! 销毁时先注销，最后才释放宿主对象。

pub mod camera;
pub mod menu;
pub mod processing;
pub mod widget;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::handle::Handle;
use crate::registry::CallbackCell;

pub use camera::{Camera, CameraControl, CameraEvent, ConflictPolicy};
pub use menu::{MenuEvent, Menus};
pub use processing::{FlightLoopTick, FlightLoops, NextCall};
pub use widget::{WidgetEvent, Widgets};

/// 在宿主线程上执行托管回调，panic 不会展开到宿主。`None` 表示回调 panic 了
pub(crate) fn guarded<R>(site: &'static str, handle: Handle, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => Some(r),
        Err(payload) => {
            error!(
                site,
                handle = handle.get(),
                panic = panic_message(payload.as_ref()),
                "callback panicked"
            );
            None
        }
    }
}

/// 一次派发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation<R> {
    Returned(R),
    /// 同一个回调还在执行，宿主同步地又派发了一次；本次跳过
    Reentered,
    Panicked,
}

/// 取回调锁并执行，重入不阻塞、panic 不外泄。
pub(crate) fn invoke<F: ?Sized, R>(
    site: &'static str,
    handle: Handle,
    cell: &CallbackCell<F>,
    f: impl FnOnce(&mut F) -> R,
) -> Invocation<R> {
    match guarded(site, handle, || cell.with(f)) {
        Some(Some(r)) => Invocation::Returned(r),
        Some(None) => {
            debug!(site, handle = handle.get(), "callback re-entered, dispatch skipped");
            Invocation::Reentered
        }
        None => Invocation::Panicked,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

pub(crate) fn c_name(name: &str) -> crate::error::Result<std::ffi::CString> {
    std::ffi::CString::new(name).map_err(|_| crate::error::BridgeError::InvalidName(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_passes_result_through() {
        let h = Handle::from_raw(1).unwrap();
        assert_eq!(guarded("test", h, || 5), Some(5));
    }

    #[test]
    fn guarded_swallows_panic() {
        let h = Handle::from_raw(1).unwrap();
        let r: Option<u8> = guarded("test", h, || panic!("boom"));
        assert_eq!(r, None);
    }

    #[test]
    fn invoke_reports_reentry_and_panic() {
        let h = Handle::from_raw(3).unwrap();
        let cell: CallbackCell<dyn FnMut(u8) -> u8 + Send> = CallbackCell::new(Box::new(|x: u8| {
            if x == 0 {
                panic!("zero");
            }
            x * 2
        }));
        assert_eq!(invoke("test", h, &cell, |f| f(4)), Invocation::Returned(8));
        let nested = invoke("test", h, &cell, |_| invoke("test", h, &cell, |g| g(1)));
        assert_eq!(nested, Invocation::Returned(Invocation::Reentered));
        assert_eq!(invoke("test", h, &cell, |f| f(0)), Invocation::Panicked);
        // panic 之后锁被毒化也照样能用
        assert_eq!(invoke("test", h, &cell, |f| f(5)), Invocation::Returned(10));
    }

    #[test]
    fn c_name_rejects_interior_nul() {
        assert!(c_name("ok").is_ok());
        assert!(c_name("bad\0name").is_err());
    }
}
