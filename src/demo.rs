//! Hello World 插件：Plugins 下的子菜单、两秒一次的飞行循环，以及菜单切换的相机抖动。

use std::sync::{Arc, Mutex, PoisonError, Weak};

use anyhow::{anyhow, Context};
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::facade::{CameraControl, CameraEvent, FlightLoopTick, MenuEvent, NextCall};
use crate::host::{CameraControlDuration, CameraPosition, FlightLoopId, FlightLoopPhase, MenuId};
use crate::plugin::{Plugin, PluginInfo};
use crate::registry::Ref;

pub const HELLO_ITEM: &str = "hello_item";
pub const CAMERA_ITEM: &str = "camera_item";
pub const COUNTER_ITEM: &str = "counter_item";

/// 子菜单里的条目序号（分隔线也占一个位置）
pub const HELLO_INDEX: usize = 0;
pub const CAMERA_INDEX: usize = 2;
pub const COUNTER_INDEX: usize = 4;

const LOOP_INTERVAL_SECS: f32 = 2.0;

#[derive(Debug, Default)]
pub struct HelloState {
    pub hellos: u64,
    pub ticks: u64,
    pub shaking: bool,
    pub shake_frames: u64,
    shake_counter: f32,
}

#[derive(Default)]
pub struct HelloPlugin {
    state: Arc<Mutex<HelloState>>,
    config: BridgeConfig,
    menu: Option<MenuId>,
    flight_loop: Option<FlightLoopId>,
}

impl HelloPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn menu(&self) -> Option<MenuId> {
        self.menu
    }

    pub fn flight_loop(&self) -> Option<FlightLoopId> {
        self.flight_loop
    }

    pub fn state(&self) -> Arc<Mutex<HelloState>> {
        self.state.clone()
    }
}

fn lock(state: &Mutex<HelloState>) -> std::sync::MutexGuard<'_, HelloState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Plugin for HelloPlugin {
    fn start(&mut self) -> anyhow::Result<PluginInfo> {
        Ok(PluginInfo::new(
            "Hello World Rust Plugin",
            "xplane-bridge.example.helloworld",
            "A plugin demonstrating menus, flight loops and camera control.",
        ))
    }

    fn enable(&mut self, bridge: &Arc<Bridge>) -> anyhow::Result<()> {
        let menus = bridge.menus();
        let plugins = menus
            .find_plugins_menu()
            .ok_or_else(|| anyhow!("could not find plugins menu"))?;
        let container = menus
            .append_menu_item(plugins, "Hello Plugin", None)
            .context("container item in plugins menu")?;

        let weak = Arc::downgrade(bridge);
        let menu = menus.create_menu(
            "Hello",
            Some(plugins),
            container,
            Some(Ref::new(self.state.clone())),
            move |event: &MenuEvent<'_>| on_menu_pick(&weak, event),
        )?;
        menus.append_menu_item(menu, "Say Hello", Some(Ref::new(HELLO_ITEM)))?;
        menus.append_menu_separator(menu);
        menus.append_menu_item(menu, "Toggle Camera Shake", Some(Ref::new(CAMERA_ITEM)))?;
        menus.append_menu_separator(menu);
        menus.append_menu_item(menu, "Log Tick Counter", Some(Ref::new(COUNTER_ITEM)))?;
        self.menu = Some(menu);

        let state = self.state.clone();
        let flight_loop = bridge.flight_loops().create_flight_loop(
            FlightLoopPhase::AfterFlightModel,
            move |tick: &FlightLoopTick| {
                let mut state = lock(&state);
                state.ticks += 1;
                info!(counter = tick.counter, since_last = tick.elapsed_since_last_call, "hello tick");
                NextCall::Seconds(LOOP_INTERVAL_SECS)
            },
        )?;
        bridge
            .flight_loops()
            .schedule_flight_loop(flight_loop, LOOP_INTERVAL_SECS, true)?;
        self.flight_loop = Some(flight_loop);

        bridge.host().debug_string("HelloPlugin: enabled\n");
        Ok(())
    }

    fn disable(&mut self, bridge: &Arc<Bridge>) {
        if let Some(menu) = self.menu.take() {
            bridge.menus().destroy_menu(menu);
        }
        if let Some(id) = self.flight_loop.take() {
            bridge.flight_loops().destroy_flight_loop(id);
        }
        let mut state = lock(&self.state);
        if state.shaking {
            bridge.camera().dont_control_camera();
            state.shaking = false;
        }
        bridge.host().debug_string("HelloPlugin: disabled\n");
    }

    fn config(&self) -> anyhow::Result<BridgeConfig> {
        Ok(self.config.clone())
    }
}

fn on_menu_pick(bridge: &Weak<Bridge>, event: &MenuEvent<'_>) {
    let state = match event.menu::<Arc<Mutex<HelloState>>>() {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "menu handler called without plugin state");
            return;
        }
    };
    let item = match event.item::<&'static str>() {
        Ok(item) => *item,
        Err(e) => {
            warn!(error = %e, "menu handler called with unexpected item");
            return;
        }
    };
    let Some(bridge) = bridge.upgrade() else {
        return;
    };

    match item {
        HELLO_ITEM => {
            lock(state).hellos += 1;
            bridge
                .host()
                .debug_string("The 'Say Hello' menu item was clicked!\n");
        }
        CAMERA_ITEM => toggle_camera_shake(&bridge, state),
        COUNTER_ITEM => {
            let ticks = lock(state).ticks;
            bridge
                .host()
                .debug_string(&format!("HelloPlugin: {ticks} flight loop ticks so far\n"));
        }
        other => warn!(item = other, "unknown menu item"),
    }
}

fn toggle_camera_shake(bridge: &Bridge, state: &Arc<Mutex<HelloState>>) {
    let start = {
        let mut s = lock(state);
        s.shaking = !s.shaking;
        s.shaking
    };
    if !start {
        info!("stopping camera shake");
        bridge.camera().dont_control_camera();
        return;
    }

    info!("starting camera shake");
    let shared = state.clone();
    let result = bridge
        .camera()
        .control_camera(CameraControlDuration::Forever, move |event: &CameraEvent| {
            shake_frame(&shared, event)
        });
    if let Err(e) = result {
        warn!(error = %e, "camera shake refused");
        lock(state).shaking = false;
    }
}

/// 在原点上方晃动相机，直到抖动被关闭或宿主收回相机
fn shake_frame(state: &Mutex<HelloState>, event: &CameraEvent) -> CameraControl {
    let mut s = lock(state);
    if event.losing_control || !s.shaking {
        s.shaking = false;
        return CameraControl::Surrender;
    }

    s.shake_frames += 1;
    s.shake_counter += 0.2;
    let offset = 0.5 * (s.shake_counter % 2.0);
    CameraControl::move_to(CameraPosition {
        x: event.current.x,
        y: 5.0 + offset,
        z: -15.0,
        pitch: -5.0,
        heading: 0.0,
        roll: 0.0,
        zoom: 1.0,
    })
}
