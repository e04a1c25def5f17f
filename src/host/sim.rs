//! 模拟宿主
//!
//! 在进程内实现 [`HostApi`]：记录每个创建出来的对象、它的跳板函数指针和 refcon，
//! 并像真实模拟器一样调用这些跳板（点击菜单项、跑帧、驱动相机、发送 widget 消息）。
//! 单元测试、集成测试、演示程序和基准测试都用它。
//!
//! 调用跳板前会先释放内部锁，回调里可以再次调用宿主（重新调度、销毁菜单等）。

use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_void, CStr};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::sys::{
    CameraControlFn, FlightLoopFn, MenuHandlerFn, WidgetFn, XPLMCameraPosition_t,
};
use super::{
    CameraControlDuration, CameraPosition, FlightLoopId, FlightLoopPhase, HostApi, MenuId,
    WidgetGeometry, WidgetId,
};

/// `xpMsg_Create`
pub const XP_MSG_CREATE: i32 = 1;
/// `xpMsg_Destroy`
pub const XP_MSG_DESTROY: i32 = 2;

/// 默认帧长：20 FPS
const DEFAULT_FRAME_SECS: f32 = 0.05;

const TIME_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub enum SimMenuItem {
    Item {
        name: String,
        item_ref: usize,
        enabled: bool,
    },
    Separator,
}

struct SimMenu {
    name: String,
    parent: Option<(MenuId, i32)>,
    handler: Option<MenuHandlerFn>,
    menu_ref: usize,
    items: Vec<SimMenuItem>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Due {
    At(f32),
    Frame(u64),
}

struct SimFlightLoop {
    phase: FlightLoopPhase,
    callback: FlightLoopFn,
    refcon: usize,
    due: Option<Due>,
    /// 最近一次 schedule 收到的原始间隔
    interval: Option<f32>,
    last_call: Option<f32>,
    calls: u64,
}

struct SimCamera {
    duration: CameraControlDuration,
    callback: CameraControlFn,
    refcon: usize,
}

struct SimWidget {
    descriptor: String,
    parent: Option<WidgetId>,
    callback: WidgetFn,
    properties: HashMap<i32, isize>,
}

struct SimState {
    plugins_menu: MenuId,
    menus: BTreeMap<MenuId, SimMenu>,
    loops: BTreeMap<FlightLoopId, SimFlightLoop>,
    camera: Option<SimCamera>,
    camera_position: XPLMCameraPosition_t,
    widgets: BTreeMap<WidgetId, SimWidget>,
    frame: u64,
    time: f32,
    frame_secs: f32,
    fail_next_create: bool,
}

/// 进程内模拟宿主
pub struct SimHost {
    next_object: AtomicUsize,
    state: Mutex<SimState>,
    log: Mutex<Vec<String>>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    pub fn new() -> Self {
        let next_object = AtomicUsize::new(0x1000);
        let plugins_menu = MenuId(next_object.fetch_add(0x10, Ordering::Relaxed));
        let mut menus = BTreeMap::new();
        menus.insert(
            plugins_menu,
            SimMenu {
                name: "Plugins".to_string(),
                parent: None,
                handler: None,
                menu_ref: 0,
                items: Vec::new(),
            },
        );
        Self {
            next_object,
            state: Mutex::new(SimState {
                plugins_menu,
                menus,
                loops: BTreeMap::new(),
                camera: None,
                camera_position: XPLMCameraPosition_t::default(),
                widgets: BTreeMap::new(),
                frame: 0,
                time: 0.0,
                frame_secs: DEFAULT_FRAME_SECS,
                fail_next_create: false,
            }),
            log: Mutex::new(Vec::new()),
        }
    }

    /// 设置帧长（秒）
    pub fn with_frame_secs(self, secs: f32) -> Self {
        self.state().frame_secs = secs;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_raw(&self) -> usize {
        self.next_object.fetch_add(0x10, Ordering::Relaxed)
    }

    /// 下一次 create / append 调用返回失败
    pub fn fail_next_create(&self) {
        self.state().fail_next_create = true;
    }

    fn take_failure(state: &mut SimState) -> bool {
        std::mem::take(&mut state.fail_next_create)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // 观察
    // ═══════════════════════════════════════════════════════════════════════

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn plugins_menu(&self) -> MenuId {
        self.state().plugins_menu
    }

    /// 不含 Plugins 根菜单
    pub fn menu_count(&self) -> usize {
        self.state().menus.len() - 1
    }

    pub fn menu_exists(&self, menu: MenuId) -> bool {
        self.state().menus.contains_key(&menu)
    }

    pub fn menu_name(&self, menu: MenuId) -> Option<String> {
        self.state().menus.get(&menu).map(|m| m.name.clone())
    }

    pub fn menu_parent(&self, menu: MenuId) -> Option<(MenuId, i32)> {
        self.state().menus.get(&menu).and_then(|m| m.parent)
    }

    pub fn menu_items(&self, menu: MenuId) -> Vec<SimMenuItem> {
        self.state()
            .menus
            .get(&menu)
            .map(|m| m.items.clone())
            .unwrap_or_default()
    }

    /// 菜单的 refcon（测试里用来构造 "过期" 调用）
    pub fn menu_refcon(&self, menu: MenuId) -> Option<usize> {
        self.state().menus.get(&menu).map(|m| m.menu_ref)
    }

    pub fn item_refcon(&self, menu: MenuId, index: usize) -> Option<usize> {
        match self.state().menus.get(&menu)?.items.get(index)? {
            SimMenuItem::Item { item_ref, .. } => Some(*item_ref),
            SimMenuItem::Separator => None,
        }
    }

    pub fn flight_loop_count(&self) -> usize {
        self.state().loops.len()
    }

    pub fn flight_loop_exists(&self, id: FlightLoopId) -> bool {
        self.state().loops.contains_key(&id)
    }

    pub fn flight_loop_phase(&self, id: FlightLoopId) -> Option<FlightLoopPhase> {
        self.state().loops.get(&id).map(|l| l.phase)
    }

    pub fn flight_loop_calls(&self, id: FlightLoopId) -> u64 {
        self.state().loops.get(&id).map_or(0, |l| l.calls)
    }

    pub fn is_flight_loop_scheduled(&self, id: FlightLoopId) -> bool {
        self.state().loops.get(&id).is_some_and(|l| l.due.is_some())
    }

    pub fn flight_loop_interval(&self, id: FlightLoopId) -> Option<f32> {
        self.state().loops.get(&id).and_then(|l| l.interval)
    }

    pub fn flight_loop_refcon(&self, id: FlightLoopId) -> Option<usize> {
        self.state().loops.get(&id).map(|l| l.refcon)
    }

    pub fn camera_position(&self) -> CameraPosition {
        self.state().camera_position.into()
    }

    pub fn camera_refcon(&self) -> Option<usize> {
        self.state().camera.as_ref().map(|c| c.refcon)
    }

    pub fn widget_count(&self) -> usize {
        self.state().widgets.len()
    }

    pub fn widget_exists(&self, id: WidgetId) -> bool {
        self.state().widgets.contains_key(&id)
    }

    pub fn widget_descriptor(&self, id: WidgetId) -> Option<String> {
        self.state().widgets.get(&id).map(|w| w.descriptor.clone())
    }

    pub fn now(&self) -> f32 {
        self.state().time
    }

    pub fn frame(&self) -> u64 {
        self.state().frame
    }

    // ═══════════════════════════════════════════════════════════════════════
    // 驱动
    // ═══════════════════════════════════════════════════════════════════════

    /// 用户点击菜单项。返回是否调用了处理函数。
    pub fn click_menu_item(&self, menu: MenuId, index: usize) -> bool {
        let call = {
            let state = self.state();
            let Some(m) = state.menus.get(&menu) else {
                return false;
            };
            match (m.handler, m.items.get(index)) {
                (Some(handler), Some(SimMenuItem::Item { item_ref, enabled: true, .. })) => {
                    Some((handler, m.menu_ref, *item_ref))
                }
                _ => None,
            }
        };
        match call {
            Some((handler, menu_ref, item_ref)) => {
                unsafe { handler(menu_ref as *mut c_void, item_ref as *mut c_void) };
                true
            }
            None => false,
        }
    }

    /// 跑 n 帧：按调度执行飞行循环，然后驱动相机。返回本次飞行循环回调次数。
    pub fn run_frames(&self, n: u32) -> u64 {
        let mut invoked = 0;
        for _ in 0..n {
            invoked += self.run_frame();
        }
        invoked
    }

    fn run_frame(&self) -> u64 {
        let (due, frame_secs) = {
            let mut state = self.state();
            state.frame += 1;
            // 按帧号相乘而不是累加，避免 f32 漂移
            state.time = state.frame as f32 * state.frame_secs;
            let (frame, time) = (state.frame, state.time);
            let due: Vec<_> = state
                .loops
                .iter()
                .filter(|(_, l)| match l.due {
                    Some(Due::At(t)) => t <= time + TIME_TOLERANCE,
                    Some(Due::Frame(f)) => f <= frame,
                    None => false,
                })
                .map(|(id, l)| (*id, l.callback, l.refcon, time - l.last_call.unwrap_or(0.0)))
                .collect();
            (due, state.frame_secs)
        };

        let mut invoked = 0;
        for (id, callback, refcon, since_last) in due {
            let counter = {
                let mut state = self.state();
                let Some(l) = state.loops.get_mut(&id) else {
                    continue;
                };
                l.calls += 1;
                l.calls as c_int
            };
            let next = unsafe { callback(since_last, frame_secs, counter, refcon as *mut c_void) };
            invoked += 1;

            let mut state = self.state();
            let (frame, time) = (state.frame, state.time);
            // 回调里可能已经销毁或重新调度了自己
            if let Some(l) = state.loops.get_mut(&id) {
                l.last_call = Some(time);
                l.due = next_due(next, frame, time);
            }
        }

        self.render_camera_frame(false);
        invoked
    }

    /// 驱动一帧相机回调；返回插件是否仍持有相机
    fn render_camera_frame(&self, losing_control: bool) -> bool {
        let (callback, refcon, mut position) = {
            let state = self.state();
            match &state.camera {
                Some(c) => (c.callback, c.refcon, state.camera_position),
                None => return false,
            }
        };
        let keep = unsafe { callback(&mut position, losing_control as c_int, refcon as *mut c_void) };

        let mut state = self.state();
        if losing_control || keep == 0 {
            // 回调期间可能已经有新的控制者接管
            if state.camera.as_ref().is_some_and(|c| c.refcon == refcon) {
                state.camera = None;
            }
            return false;
        }
        state.camera_position = position;
        true
    }

    /// 宿主收回相机（例如用户切换视角）
    pub fn take_camera_away(&self) {
        self.render_camera_frame(true);
    }

    /// 向 widget 发送消息；返回 `None` 表示 widget 不存在
    pub fn send_widget_message(&self, id: WidgetId, message: i32, param1: isize, param2: isize) -> Option<bool> {
        let callback = self.state().widgets.get(&id)?.callback;
        Some(unsafe { callback(message, id.as_raw(), param1, param2) } != 0)
    }

    /// 建一个不经过 bridge 的标准 widget（相当于直接调用 `XPCreateWidget`）
    pub fn create_standard_widget(&self, descriptor: &str, parent: Option<WidgetId>) -> WidgetId {
        let id = WidgetId(self.next_raw());
        self.state().widgets.insert(
            id,
            SimWidget {
                descriptor: descriptor.to_string(),
                parent,
                callback: standard_widget_callback,
                properties: HashMap::new(),
            },
        );
        id
    }

    fn collect_widget_tree(state: &SimState, root: WidgetId, out: &mut Vec<WidgetId>) {
        for (id, w) in &state.widgets {
            if w.parent == Some(root) {
                Self::collect_widget_tree(state, *id, out);
            }
        }
        out.push(root);
    }
}

unsafe extern "C" fn standard_widget_callback(_: c_int, _: *mut c_void, _: isize, _: isize) -> c_int {
    0
}

fn next_due(interval: f32, frame: u64, time: f32) -> Option<Due> {
    if interval > 0.0 {
        Some(Due::At(time + interval))
    } else if interval < 0.0 {
        Some(Due::Frame(frame + (-interval).max(1.0) as u64))
    } else {
        None
    }
}

impl HostApi for SimHost {
    fn debug_string(&self, message: &str) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }

    fn find_plugins_menu(&self) -> Option<MenuId> {
        Some(self.plugins_menu())
    }

    fn create_menu(
        &self,
        name: &CStr,
        parent: Option<MenuId>,
        parent_item: i32,
        handler: Option<MenuHandlerFn>,
        menu_ref: *mut c_void,
    ) -> Option<MenuId> {
        let mut state = self.state();
        if Self::take_failure(&mut state) {
            return None;
        }
        let id = MenuId(self.next_raw());
        state.menus.insert(
            id,
            SimMenu {
                name: name.to_string_lossy().into_owned(),
                parent: parent.map(|p| (p, parent_item)),
                handler,
                menu_ref: menu_ref as usize,
                items: Vec::new(),
            },
        );
        Some(id)
    }

    fn append_menu_item(&self, menu: MenuId, name: &CStr, item_ref: *mut c_void) -> i32 {
        let mut state = self.state();
        if Self::take_failure(&mut state) {
            return -1;
        }
        match state.menus.get_mut(&menu) {
            Some(m) => {
                m.items.push(SimMenuItem::Item {
                    name: name.to_string_lossy().into_owned(),
                    item_ref: item_ref as usize,
                    enabled: true,
                });
                (m.items.len() - 1) as i32
            }
            None => -1,
        }
    }

    fn append_menu_separator(&self, menu: MenuId) {
        if let Some(m) = self.state().menus.get_mut(&menu) {
            m.items.push(SimMenuItem::Separator);
        }
    }

    fn set_menu_item_name(&self, menu: MenuId, index: i32, new_name: &CStr) {
        let mut state = self.state();
        let item = state
            .menus
            .get_mut(&menu)
            .and_then(|m| m.items.get_mut(index as usize));
        if let Some(SimMenuItem::Item { name, .. }) = item {
            *name = new_name.to_string_lossy().into_owned();
        }
    }

    fn enable_menu_item(&self, menu: MenuId, index: i32, enable: bool) {
        let mut state = self.state();
        let item = state
            .menus
            .get_mut(&menu)
            .and_then(|m| m.items.get_mut(index as usize));
        if let Some(SimMenuItem::Item { enabled, .. }) = item {
            *enabled = enable;
        }
    }

    fn clear_all_menu_items(&self, menu: MenuId) {
        if let Some(m) = self.state().menus.get_mut(&menu) {
            m.items.clear();
        }
    }

    fn destroy_menu(&self, menu: MenuId) {
        self.state().menus.remove(&menu);
    }

    fn create_flight_loop(
        &self,
        phase: FlightLoopPhase,
        callback: FlightLoopFn,
        refcon: *mut c_void,
    ) -> Option<FlightLoopId> {
        let mut state = self.state();
        if Self::take_failure(&mut state) {
            return None;
        }
        let id = FlightLoopId(self.next_raw());
        state.loops.insert(
            id,
            SimFlightLoop {
                phase,
                callback,
                refcon: refcon as usize,
                due: None,
                interval: None,
                last_call: None,
                calls: 0,
            },
        );
        Some(id)
    }

    fn schedule_flight_loop(&self, id: FlightLoopId, interval: f32, relative_to_now: bool) {
        let mut state = self.state();
        let (frame, time) = (state.frame, state.time);
        if let Some(l) = state.loops.get_mut(&id) {
            let base = match (relative_to_now, l.last_call) {
                (false, Some(last)) => last,
                _ => time,
            };
            l.due = next_due(interval, frame, base);
            l.interval = Some(interval);
        }
    }

    fn destroy_flight_loop(&self, id: FlightLoopId) {
        self.state().loops.remove(&id);
    }

    fn control_camera(
        &self,
        duration: CameraControlDuration,
        callback: CameraControlFn,
        refcon: *mut c_void,
    ) {
        self.state().camera = Some(SimCamera {
            duration,
            callback,
            refcon: refcon as usize,
        });
    }

    fn dont_control_camera(&self) {
        self.state().camera = None;
    }

    fn is_camera_being_controlled(&self) -> Option<CameraControlDuration> {
        self.state().camera.as_ref().map(|c| c.duration)
    }

    fn create_custom_widget(
        &self,
        geometry: &WidgetGeometry,
        descriptor: &CStr,
        parent: Option<WidgetId>,
        callback: WidgetFn,
    ) -> Option<WidgetId> {
        let id = {
            let mut state = self.state();
            if Self::take_failure(&mut state) {
                return None;
            }
            let id = WidgetId(self.next_raw());
            state.widgets.insert(
                id,
                SimWidget {
                    descriptor: descriptor.to_string_lossy().into_owned(),
                    parent: if geometry.is_root { None } else { parent },
                    callback,
                    properties: HashMap::new(),
                },
            );
            id
        };
        // 真实宿主在创建过程中就会发送 xpMsg_Create
        unsafe { callback(XP_MSG_CREATE, id.as_raw(), 0, 0) };
        Some(id)
    }

    fn destroy_widget(&self, id: WidgetId, destroy_children: bool) {
        let doomed = {
            let state = self.state();
            if !state.widgets.contains_key(&id) {
                return;
            }
            let mut doomed = Vec::new();
            if destroy_children {
                Self::collect_widget_tree(&state, id, &mut doomed);
            } else {
                doomed.push(id);
            }
            doomed
        };
        for w in doomed {
            let _ = self.send_widget_message(w, XP_MSG_DESTROY, 0, 0);
            let mut state = self.state();
            state.widgets.remove(&w);
            for other in state.widgets.values_mut() {
                if other.parent == Some(w) {
                    other.parent = None;
                }
            }
        }
    }

    fn set_widget_property(&self, id: WidgetId, property: i32, value: isize) {
        if let Some(w) = self.state().widgets.get_mut(&id) {
            w.properties.insert(property, value);
        }
    }

    fn get_widget_property(&self, id: WidgetId, property: i32) -> Option<isize> {
        self.state()
            .widgets
            .get(&id)
            .and_then(|w| w.properties.get(&property).copied())
    }

    fn widget_parent(&self, id: WidgetId) -> Option<WidgetId> {
        self.state().widgets.get(&id).and_then(|w| w.parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    static LOOP_CALLS: AtomicU32 = AtomicU32::new(0);

    unsafe extern "C" fn every_second(_: f32, _: f32, _: c_int, _: *mut c_void) -> f32 {
        LOOP_CALLS.fetch_add(1, Ordering::SeqCst);
        1.0
    }

    unsafe extern "C" fn noop_widget(_: c_int, _: *mut c_void, _: isize, _: isize) -> c_int {
        0
    }

    #[test]
    fn plugins_menu_exists() {
        let host = SimHost::new();
        assert!(host.menu_exists(host.plugins_menu()));
        assert_eq!(host.menu_count(), 0);
    }

    #[test]
    fn failure_injection_is_one_shot() {
        let host = SimHost::new();
        host.fail_next_create();
        let name = c"m";
        assert!(host.create_menu(name, None, 0, None, std::ptr::null_mut()).is_none());
        assert!(host.create_menu(name, None, 0, None, std::ptr::null_mut()).is_some());
    }

    #[test]
    fn flight_loop_runs_on_schedule() {
        let host = SimHost::new().with_frame_secs(0.5);
        let id = host
            .create_flight_loop(FlightLoopPhase::AfterFlightModel, every_second, std::ptr::null_mut())
            .unwrap();
        assert_eq!(host.run_frames(4), 0, "unscheduled loops never run");

        host.schedule_flight_loop(id, 1.0, true);
        // 4 帧 = 2 秒
        assert_eq!(host.run_frames(4), 2);
        assert_eq!(host.flight_loop_calls(id), 2);
    }

    #[test]
    fn widget_tree_destroy_removes_children() {
        let host = SimHost::new();
        let geo = WidgetGeometry::new(0, 10, 10, 0);
        let root = host
            .create_custom_widget(&geo.root(), c"root", None, noop_widget)
            .unwrap();
        let child = host
            .create_custom_widget(&geo, c"child", Some(root), noop_widget)
            .unwrap();
        assert_eq!(host.widget_count(), 2);

        host.destroy_widget(root, true);
        assert!(!host.widget_exists(child));
        assert_eq!(host.widget_count(), 0);
    }

    #[test]
    fn debug_string_is_captured() {
        let host = SimHost::new();
        host.debug_string("hello\n");
        assert_eq!(host.log_lines(), vec!["hello\n".to_string()]);
    }
}
