//! 飞行循环：按帧回调，返回值决定下一次调用时间。

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::{invoke, Invocation};
use crate::bridge::trampoline;
use crate::error::{BridgeError, Result};
use crate::handle::{Handle, HandleAllocator};
use crate::host::{FlightLoopId, FlightLoopPhase, HostApi};
use crate::registry::{CallbackCell, Registry};

/// 交给飞行循环回调的计时信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightLoopTick {
    pub elapsed_since_last_call: f32,
    pub elapsed_since_last_flight_loop: f32,
    /// 宿主维护的单调计数
    pub counter: i32,
}

/// 宿主下一次调用该循环的时间。
///
/// 宿主的编码：正数为秒，负数为帧数，0 停止。所有变体都原样映射到这个
/// 浮点数，不做取整或截断。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NextCall {
    Seconds(f32),
    /// 若干帧之后；`Loops(0)` 编码为 0，等同于 `Unschedule`
    Loops(u32),
    Unschedule,
    /// 宿主原始编码，原样透传
    Interval(f32),
}

impl NextCall {
    pub fn to_interval(self) -> f32 {
        match self {
            NextCall::Seconds(s) | NextCall::Interval(s) => s,
            NextCall::Loops(n) => -(n as f32),
            NextCall::Unschedule => 0.0,
        }
    }
}

impl From<f32> for NextCall {
    fn from(interval: f32) -> Self {
        NextCall::Interval(interval)
    }
}

impl From<f64> for NextCall {
    fn from(interval: f64) -> Self {
        NextCall::from(interval as f32)
    }
}

pub type FlightLoopCallback = dyn FnMut(&FlightLoopTick) -> NextCall + Send;

pub struct FlightLoops {
    host: Arc<dyn HostApi>,
    registry: Registry<CallbackCell<FlightLoopCallback>>,
    // 宿主 ID → handle，销毁时用
    by_id: RwLock<HashMap<FlightLoopId, Handle>>,
}

impl FlightLoops {
    pub fn new(host: Arc<dyn HostApi>, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            host,
            registry: Registry::new("flight-loops", allocator),
            by_id: RwLock::new(HashMap::new()),
        }
    }

    /// 创建一个未调度的循环，调用 [`schedule_flight_loop`](Self::schedule_flight_loop) 启动
    pub fn create_flight_loop<F>(&self, phase: FlightLoopPhase, callback: F) -> Result<FlightLoopId>
    where
        F: FnMut(&FlightLoopTick) -> NextCall + Send + 'static,
    {
        let callback: Box<FlightLoopCallback> = Box::new(callback);
        let handle = self.registry.register(CallbackCell::new(callback));

        let Some(id) = self
            .host
            .create_flight_loop(phase, trampoline::flight_loop, handle.to_refcon())
        else {
            self.registry.unregister(handle);
            warn!(?phase, "host refused to create flight loop");
            return Err(BridgeError::HostCreateFailed { what: "flight loop" });
        };

        self.by_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        debug!(flight_loop = ?id, handle = handle.get(), ?phase, "flight loop created");
        Ok(id)
    }

    /// `next` 可以是 [`NextCall`]，也可以是宿主原始的浮点编码（原样透传）
    pub fn schedule_flight_loop(&self, id: FlightLoopId, next: impl Into<NextCall>, relative_to_now: bool) -> Result<()> {
        if !self.is_registered(id) {
            return Err(BridgeError::UnknownObject(format!("flight loop {id:?}")));
        }
        self.host
            .schedule_flight_loop(id, next.into().to_interval(), relative_to_now);
        Ok(())
    }

    /// 先注销，再销毁宿主循环；未知 ID 不动
    pub fn destroy_flight_loop(&self, id: FlightLoopId) -> bool {
        let Some(handle) = self
            .by_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
        else {
            return false;
        };
        self.registry.unregister(handle);
        self.host.destroy_flight_loop(id);
        debug!(flight_loop = ?id, handle = handle.get(), "flight loop destroyed");
        true
    }

    pub fn is_registered(&self, id: FlightLoopId) -> bool {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn handle_of(&self, id: FlightLoopId) -> Option<Handle> {
        self.by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// 飞行循环 trampoline 的入口。查不到、重入或 panic 都返回 0（停止调度）
    pub fn dispatch(
        &self,
        elapsed_since_last_call: f32,
        elapsed_since_last_flight_loop: f32,
        counter: i32,
        refcon: *mut c_void,
    ) -> f32 {
        let Some(handle) = Handle::from_refcon(refcon) else {
            return 0.0;
        };
        let Some(entry) = self.registry.lookup(handle) else {
            return 0.0;
        };
        let tick = FlightLoopTick {
            elapsed_since_last_call,
            elapsed_since_last_flight_loop,
            counter,
        };
        match invoke("flight-loop", handle, &entry, |f| f(&tick)) {
            Invocation::Returned(next) => next.to_interval(),
            Invocation::Reentered | Invocation::Panicked => 0.0,
        }
    }

    pub fn shutdown(&self) {
        let ids: Vec<FlightLoopId> = self
            .by_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        for id in ids {
            self.destroy_flight_loop(id);
        }
    }
}
