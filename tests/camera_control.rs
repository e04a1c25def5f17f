//! Camera controllers driven by simulated frames.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use xplane_bridge::bridge::{self, Bridge};
use xplane_bridge::config::{BridgeConfig, ConflictPolicy};
use xplane_bridge::facade::{CameraControl, CameraEvent};
use xplane_bridge::host::{CameraControlDuration, CameraPosition, SimHost};

static SLOT: Mutex<()> = Mutex::new(());

fn slot() -> MutexGuard<'static, ()> {
    SLOT.lock().unwrap_or_else(PoisonError::into_inner)
}

fn setup(config: BridgeConfig) -> (Arc<SimHost>, Arc<Bridge>) {
    let host = Arc::new(SimHost::new());
    let bridge = Arc::new(Bridge::new(host.clone(), config));
    bridge::install(bridge.clone());
    (host, bridge)
}

fn teardown(bridge: &Arc<Bridge>) {
    bridge.shutdown();
    bridge::uninstall_if(bridge);
}

fn counting(keep_for: u32) -> (Arc<AtomicU32>, impl FnMut(&CameraEvent) -> CameraControl + Send + 'static) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let callback = move |_: &CameraEvent| {
        if counter.fetch_add(1, Ordering::SeqCst) < keep_for {
            CameraControl::keep()
        } else {
            CameraControl::Surrender
        }
    };
    (calls, callback)
}

#[test]
fn keep_three_frames_then_surrender() {
    let _slot = slot();
    let (host, bridge) = setup(BridgeConfig::default());
    let (calls, callback) = counting(3);

    bridge
        .camera()
        .control_camera(CameraControlDuration::Forever, callback)
        .unwrap();
    let handle = bridge.camera().controller().unwrap();

    host.run_frames(10);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(!bridge.camera().is_registered(handle));
    assert_eq!(bridge.camera().is_camera_being_controlled(), None);
    assert!(!bridge.stats().camera_controlled);

    teardown(&bridge);
}

#[test]
fn controller_moves_the_camera() {
    let _slot = slot();
    let (host, bridge) = setup(BridgeConfig::default());
    let target = CameraPosition {
        x: 10.0,
        y: 250.0,
        z: -40.0,
        pitch: -10.0,
        heading: 180.0,
        roll: 0.0,
        zoom: 2.0,
    };
    bridge
        .camera()
        .control_camera(CameraControlDuration::UntilViewChanges, move |_: &CameraEvent| {
            CameraControl::move_to(target)
        })
        .unwrap();

    host.run_frames(1);
    assert_eq!(host.camera_position(), target);
    assert_eq!(
        bridge.camera().is_camera_being_controlled(),
        Some(CameraControlDuration::UntilViewChanges)
    );

    teardown(&bridge);
    assert_eq!(host.camera_refcon(), None);
}

#[test]
fn host_taking_the_camera_notifies_the_controller() {
    let _slot = slot();
    let (host, bridge) = setup(BridgeConfig::default());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bridge
        .camera()
        .control_camera(CameraControlDuration::UntilViewChanges, move |e: &CameraEvent| {
            sink.lock().unwrap().push(e.losing_control);
            CameraControl::keep()
        })
        .unwrap();

    host.run_frames(2);
    let handle = bridge.camera().controller().unwrap();
    host.take_camera_away();
    assert_eq!(*events.lock().unwrap(), vec![false, false, true]);
    assert_eq!(host.camera_refcon(), None);
    assert_eq!(bridge.camera().is_camera_being_controlled(), None);
    // 回调回答了 Keep，注册项保留，直到显式交还
    assert!(bridge.camera().is_registered(handle));

    host.run_frames(3);
    assert_eq!(events.lock().unwrap().len(), 3);

    bridge.camera().dont_control_camera();
    assert!(!bridge.camera().is_registered(handle));
    assert!(!bridge.stats().camera_controlled);

    teardown(&bridge);
}

#[test]
fn surrender_on_losing_frame_releases_immediately() {
    let _slot = slot();
    let (host, bridge) = setup(BridgeConfig::default());
    bridge
        .camera()
        .control_camera(CameraControlDuration::UntilViewChanges, |e: &CameraEvent| {
            if e.losing_control {
                CameraControl::Surrender
            } else {
                CameraControl::keep()
            }
        })
        .unwrap();
    let handle = bridge.camera().controller().unwrap();

    host.run_frames(1);
    host.take_camera_away();
    assert!(!bridge.camera().is_registered(handle));
    assert_eq!(bridge.camera().controller(), None);

    teardown(&bridge);
}

#[test]
fn supersede_routes_frames_to_the_new_controller() {
    let _slot = slot();
    let (host, bridge) = setup(BridgeConfig::default());
    let (first_calls, first) = counting(u32::MAX);
    let (second_calls, second) = counting(u32::MAX);

    bridge.camera().control_camera(CameraControlDuration::Forever, first).unwrap();
    host.run_frames(2);
    bridge.camera().control_camera(CameraControlDuration::Forever, second).unwrap();
    host.run_frames(3);

    assert_eq!(first_calls.load(Ordering::SeqCst), 2);
    assert_eq!(second_calls.load(Ordering::SeqCst), 3);

    teardown(&bridge);
}

#[test]
fn reject_policy_keeps_the_first_controller() {
    let _slot = slot();
    let mut config = BridgeConfig::default();
    config.camera.on_conflict = ConflictPolicy::Reject;
    let (host, bridge) = setup(config);
    let (first_calls, first) = counting(u32::MAX);
    let (second_calls, second) = counting(u32::MAX);

    bridge.camera().control_camera(CameraControlDuration::Forever, first).unwrap();
    assert!(bridge
        .camera()
        .control_camera(CameraControlDuration::Forever, second)
        .is_err());
    host.run_frames(3);

    assert_eq!(first_calls.load(Ordering::SeqCst), 3);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    teardown(&bridge);
}

#[test]
fn dont_control_camera_stops_frames() {
    let _slot = slot();
    let (host, bridge) = setup(BridgeConfig::default());
    let (calls, callback) = counting(u32::MAX);
    bridge.camera().control_camera(CameraControlDuration::Forever, callback).unwrap();
    host.run_frames(2);
    bridge.camera().dont_control_camera();
    host.run_frames(2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    teardown(&bridge);
}
