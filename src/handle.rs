//! 句柄分配
//!
//! 宿主只会把一个指针大小的 refcon 原样回传给插件。我们不在里面放真实地址，
//! 而是放一个进程内唯一的整数句柄，回调时再查表还原。
//!
//! - 0 保留为 "无句柄 / 无引用"
//! - 计数器单调递增，退役的句柄在插件生命周期内不会复用

use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 不透明句柄，只表示身份，不携带数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroUsize);

impl Handle {
    /// 原始整数值
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// 将句柄按位重解释为宿主的 refcon 指针。结果只是一个身份令牌，永远不会被解引用。
    pub fn to_refcon(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    /// 从宿主回传的 refcon 还原句柄；空指针表示 "无句柄"
    pub fn from_refcon(refcon: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(refcon as usize).map(Self)
    }

    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 可选句柄到 refcon 的转换，`None` 映射为空指针
pub fn refcon_of(handle: Option<Handle>) -> *mut c_void {
    handle.map_or(std::ptr::null_mut(), Handle::to_refcon)
}

/// 句柄分配器
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicUsize,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicUsize::new(1),
        }
    }

    /// 分配一个本进程内从未返回过的句柄
    pub fn allocate(&self) -> Handle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // usize 溢出在实际运行中不可达；真发生了就跳过 0 继续
        match NonZeroUsize::new(raw) {
            Some(n) => Handle(n),
            None => self.allocate(),
        }
    }

    /// 已分配的句柄数量
    pub fn issued(&self) -> usize {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn first_handle_is_above_sentinel() {
        let alloc = HandleAllocator::new();
        assert_eq!(alloc.allocate().get(), 1);
        assert_eq!(alloc.allocate().get(), 2);
        assert_eq!(alloc.issued(), 2);
    }

    #[test]
    fn refcon_roundtrip_is_identity() {
        let alloc = HandleAllocator::new();
        let h = alloc.allocate();
        assert_eq!(h.to_refcon() as usize, h.get());
        assert_eq!(Handle::from_refcon(h.to_refcon()), Some(h));
    }

    #[test]
    fn null_refcon_is_no_handle() {
        assert_eq!(Handle::from_refcon(std::ptr::null_mut()), None);
        assert!(refcon_of(None).is_null());
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let alloc = Arc::new(HandleAllocator::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || (0..1000).map(|_| alloc.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for t in threads {
            for h in t.join().unwrap() {
                assert!(seen.insert(h), "handle {} issued twice", h);
            }
        }
        assert_eq!(seen.len(), 8000);
        assert_eq!(alloc.issued(), 8000);
    }

    #[test]
    fn display_format() {
        let h = Handle::from_raw(42).unwrap();
        assert_eq!(h.to_string(), "#42");
    }
}
