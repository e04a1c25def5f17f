//! 相机控制。宿主同一时刻只认一个控制者，门面记录当前是哪一个注册项。

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use super::{invoke, Invocation};
use crate::bridge::trampoline;
use crate::error::{BridgeError, Result};
use crate::handle::{Handle, HandleAllocator};
use crate::host::{CameraControlDuration, CameraPosition, HostApi, XPLMCameraPosition_t};
use crate::registry::{CallbackCell, Registry};

pub use crate::config::ConflictPolicy;

/// 控制者看到的一帧
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraEvent {
    /// 宿主正在收回相机；回调自行决定保留还是交出
    pub losing_control: bool,
    /// 宿主传入的当前位置
    pub current: CameraPosition,
}

/// 控制者对一帧的回答
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraControl {
    /// 保持控制，可选地移动相机
    Keep(Option<CameraPosition>),
    Surrender,
}

impl CameraControl {
    pub fn keep() -> Self {
        CameraControl::Keep(None)
    }

    pub fn move_to(position: CameraPosition) -> Self {
        CameraControl::Keep(Some(position))
    }
}

pub type CameraCallback = dyn FnMut(&CameraEvent) -> CameraControl + Send;

pub struct Camera {
    host: Arc<dyn HostApi>,
    registry: Registry<CallbackCell<CameraCallback>>,
    controller: Mutex<Option<Handle>>,
    policy: ConflictPolicy,
}

impl Camera {
    pub fn new(host: Arc<dyn HostApi>, allocator: Arc<HandleAllocator>, policy: ConflictPolicy) -> Self {
        Self {
            host,
            registry: Registry::new("camera", allocator),
            controller: Mutex::new(None),
            policy,
        }
    }

    /// 接管相机。已有控制者时按配置策略替换它，或返回 [`BridgeError::CameraBusy`]
    pub fn control_camera<F>(&self, duration: CameraControlDuration, callback: F) -> Result<()>
    where
        F: FnMut(&CameraEvent) -> CameraControl + Send + 'static,
    {
        let handle = {
            let mut controller = self.controller.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = *controller {
                match self.policy {
                    ConflictPolicy::Reject if self.registry.contains(previous) => {
                        return Err(BridgeError::CameraBusy);
                    }
                    _ => {
                        self.registry.unregister(previous);
                        debug!(handle = previous.get(), "camera controller superseded");
                    }
                }
            }
            let callback: Box<CameraCallback> = Box::new(callback);
            let handle = self.registry.register(CallbackCell::new(callback));
            *controller = Some(handle);
            handle
        };

        self.host
            .control_camera(duration, trampoline::camera_control, handle.to_refcon());
        info!(handle = handle.get(), ?duration, "camera control taken");
        Ok(())
    }

    /// 交还相机；本插件没有控制者时什么也不做。
    ///
    /// 宿主收回相机而回调仍回答 `Keep` 时注册项会留下，由这里清理。
    pub fn dont_control_camera(&self) {
        let previous = self
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = previous {
            self.registry.unregister(handle);
            self.host.dont_control_camera();
            info!(handle = handle.get(), "camera control released");
        }
    }

    pub fn is_camera_being_controlled(&self) -> Option<CameraControlDuration> {
        self.host.is_camera_being_controlled()
    }

    /// 当前驱动相机的注册项
    pub fn controller(&self) -> Option<Handle> {
        *self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_registered(&self, handle: Handle) -> bool {
        self.registry.contains(handle)
    }

    /// 相机 trampoline 的入口，返回宿主的 keep 标志。
    ///
    /// `losing_control` 只是回调的一个输入：`Keep` 总是写位置并返回 1；
    /// `Surrender` 或 panic 在返回前注销控制者，之后不会再被调用。
    /// 重入时不改动注册表，返回 0。
    pub fn dispatch(
        &self,
        position: Option<&mut XPLMCameraPosition_t>,
        losing_control: bool,
        refcon: *mut std::ffi::c_void,
    ) -> i32 {
        let Some(handle) = Handle::from_refcon(refcon) else {
            return 0;
        };
        let Some(entry) = self.registry.lookup(handle) else {
            return 0;
        };

        let event = CameraEvent {
            losing_control,
            current: position.as_deref().copied().map(CameraPosition::from).unwrap_or_default(),
        };
        match invoke("camera", handle, &entry, |f| f(&event)) {
            Invocation::Returned(CameraControl::Keep(target)) => {
                if let (Some(target), Some(out)) = (target, position) {
                    target.write_to(out);
                }
                1
            }
            Invocation::Returned(CameraControl::Surrender) | Invocation::Panicked => {
                self.release(handle);
                0
            }
            Invocation::Reentered => 0,
        }
    }

    fn release(&self, handle: Handle) {
        self.registry.unregister(handle);
        let mut controller = self.controller.lock().unwrap_or_else(PoisonError::into_inner);
        if *controller == Some(handle) {
            *controller = None;
        }
        debug!(handle = handle.get(), "camera controller released");
    }

    pub fn shutdown(&self) {
        self.dont_control_camera();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimHost;
    use std::ffi::c_void;

    fn camera(policy: ConflictPolicy) -> (Arc<SimHost>, Camera) {
        let host = Arc::new(SimHost::new());
        let camera = Camera::new(host.clone(), Arc::new(HandleAllocator::new()), policy);
        (host, camera)
    }

    fn refcon(host: &SimHost) -> *mut c_void {
        host.camera_refcon().unwrap() as *mut c_void
    }

    #[test]
    fn keep_three_frames_then_surrender() {
        let (host, camera) = camera(ConflictPolicy::Supersede);
        let mut frames = 0;
        camera
            .control_camera(CameraControlDuration::Forever, move |_: &CameraEvent| {
                frames += 1;
                if frames <= 3 {
                    CameraControl::keep()
                } else {
                    CameraControl::Surrender
                }
            })
            .unwrap();
        let refcon = refcon(&host);
        let handle = camera.controller().unwrap();

        let mut pos = XPLMCameraPosition_t::default();
        for _ in 0..3 {
            assert_eq!(camera.dispatch(Some(&mut pos), false, refcon), 1);
        }
        assert_eq!(camera.dispatch(Some(&mut pos), false, refcon), 0);
        assert!(!camera.is_registered(handle));
        assert_eq!(camera.controller(), None);
        assert_eq!(camera.dispatch(Some(&mut pos), false, refcon), 0, "stale refcon misses");
    }

    #[test]
    fn keep_writes_requested_position() {
        let (host, camera) = camera(ConflictPolicy::Supersede);
        let target = CameraPosition {
            y: 1000.0,
            heading: 270.0,
            zoom: 1.0,
            ..Default::default()
        };
        camera
            .control_camera(CameraControlDuration::UntilViewChanges, move |_: &CameraEvent| {
                CameraControl::move_to(target)
            })
            .unwrap();

        let mut pos = XPLMCameraPosition_t::default();
        assert_eq!(camera.dispatch(Some(&mut pos), false, refcon(&host)), 1);
        assert_eq!(CameraPosition::from(pos), target);
        assert_eq!(
            camera.is_camera_being_controlled(),
            Some(CameraControlDuration::UntilViewChanges)
        );
    }

    #[test]
    fn losing_control_leaves_the_decision_to_the_callback() {
        let (host, camera) = camera(ConflictPolicy::Supersede);
        let target = CameraPosition {
            y: 42.0,
            ..Default::default()
        };
        let saw_losing = Arc::new(Mutex::new(false));
        let flag = saw_losing.clone();
        camera
            .control_camera(CameraControlDuration::Forever, move |e: &CameraEvent| {
                *flag.lock().unwrap() = e.losing_control;
                CameraControl::move_to(target)
            })
            .unwrap();
        let refcon = refcon(&host);
        let handle = camera.controller().unwrap();

        let mut pos = XPLMCameraPosition_t::default();
        assert_eq!(camera.dispatch(Some(&mut pos), true, refcon), 1);
        assert!(*saw_losing.lock().unwrap());
        assert_eq!(pos.y, 42.0);
        assert!(camera.is_registered(handle));
        assert_eq!(camera.controller(), Some(handle));

        // 留下的注册项由 dont_control_camera 清理
        camera.dont_control_camera();
        assert!(!camera.is_registered(handle));
    }

    #[test]
    fn surrender_while_losing_control_unregisters() {
        let (host, camera) = camera(ConflictPolicy::Supersede);
        camera
            .control_camera(CameraControlDuration::Forever, |e: &CameraEvent| {
                if e.losing_control {
                    CameraControl::Surrender
                } else {
                    CameraControl::keep()
                }
            })
            .unwrap();
        let refcon = refcon(&host);
        let handle = camera.controller().unwrap();

        assert_eq!(camera.dispatch(None, false, refcon), 1);
        assert_eq!(camera.dispatch(None, true, refcon), 0);
        assert!(!camera.is_registered(handle));
        assert_eq!(camera.controller(), None);
    }

    #[test]
    fn supersede_replaces_previous_controller() {
        let (_host, camera) = camera(ConflictPolicy::Supersede);
        camera
            .control_camera(CameraControlDuration::Forever, |_: &CameraEvent| CameraControl::keep())
            .unwrap();
        let first = camera.controller().unwrap();
        camera
            .control_camera(CameraControlDuration::Forever, |_: &CameraEvent| CameraControl::keep())
            .unwrap();
        let second = camera.controller().unwrap();
        assert_ne!(first, second);
        assert!(!camera.is_registered(first));
        assert!(camera.is_registered(second));
    }

    #[test]
    fn reject_policy_reports_busy() {
        let (_host, camera) = camera(ConflictPolicy::Reject);
        camera
            .control_camera(CameraControlDuration::Forever, |_: &CameraEvent| CameraControl::keep())
            .unwrap();
        let err = camera
            .control_camera(CameraControlDuration::Forever, |_: &CameraEvent| CameraControl::keep())
            .unwrap_err();
        assert_eq!(err, BridgeError::CameraBusy);

        camera.dont_control_camera();
        assert!(camera
            .control_camera(CameraControlDuration::Forever, |_: &CameraEvent| CameraControl::keep())
            .is_ok());
    }

    #[test]
    fn dont_control_camera_releases_host_and_registry() {
        let (host, camera) = camera(ConflictPolicy::Supersede);
        camera
            .control_camera(CameraControlDuration::Forever, |_: &CameraEvent| CameraControl::keep())
            .unwrap();
        let handle = camera.controller().unwrap();
        camera.dont_control_camera();
        assert!(!camera.is_registered(handle));
        assert_eq!(host.camera_refcon(), None);
        camera.dont_control_camera();
    }

    #[test]
    fn panicking_controller_surrenders() {
        let (host, camera) = camera(ConflictPolicy::Supersede);
        camera
            .control_camera(CameraControlDuration::Forever, |_: &CameraEvent| -> CameraControl {
                panic!("camera math")
            })
            .unwrap();
        assert_eq!(camera.dispatch(None, false, refcon(&host)), 0);
        assert_eq!(camera.controller(), None);
    }
}
