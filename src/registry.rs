//! 回调注册表：handle → 托管回调（以及可选的上下文）。
//!
//! 查找发生在宿主调用 trampoline 的线程上，注册/注销发生在应用线程上。
//! 表放在 `RwLock` 后面：不同 handle 的查找可以并发，修改独占。
//! 条目构造完成后才插入，查找永远看不到半成品。

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::handle::{Handle, HandleAllocator};

/// handle → 条目的并发安全映射。
///
/// `lookup` 返回克隆出的 `Arc`，调用方在读锁释放后再执行回调；
/// 回调因此可以注销自己（相机交出控制）或拆掉自己的容器（菜单
/// handler 销毁自己的菜单）而不会死锁。
pub struct Registry<T> {
    name: &'static str,
    allocator: Arc<HandleAllocator>,
    entries: RwLock<HashMap<Handle, Arc<T>>>,
}

impl<T> Registry<T> {
    pub fn new(name: &'static str, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            name,
            allocator,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 分配 handle 并存入条目，不会失败
    pub fn register(&self, entry: T) -> Handle {
        let handle = self.allocator.allocate();
        let entry = Arc::new(entry);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, entry);
        debug!(registry = self.name, handle = handle.get(), "registered");
        handle
    }

    /// 查不到是正常结果：handle 可能刚被并发的销毁路径注销
    pub fn lookup(&self, handle: Handle) -> Option<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    /// 移除条目。注销不存在的 handle 什么也不做，返回值只表示是否真的删了东西
    pub fn unregister(&self, handle: Handle) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some();
        if removed {
            debug!(registry = self.name, handle = handle.get(), "unregistered");
        }
        removed
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 存放 `FnMut` 回调。
///
/// 宿主可能在回调执行期间同步地再次派发给同一个对象（例如 widget 在
/// 回调里改属性，宿主立刻发 PropertyChanged 给它自己）。`with` 用
/// `try_lock`，重入时返回 `None` 而不是阻塞宿主线程。
pub struct CallbackCell<F: ?Sized> {
    inner: Mutex<Box<F>>,
}

impl<F: ?Sized> CallbackCell<F> {
    pub fn new(callback: Box<F>) -> Self {
        Self {
            inner: Mutex::new(callback),
        }
    }

    /// 回调正在执行（同一 handle 重入）时返回 `None`
    pub fn with<R>(&self, f: impl FnOnce(&mut F) -> R) -> Option<R> {
        let mut guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(f(&mut guard))
    }
}

/// 附在注册项上的类型擦除上下文（菜单或菜单项的引用对象）。
///
/// handler 用 [`Ref::downcast`] 取回具体类型，类型不符时返回
/// [`BridgeError::InvalidArgument`]。
#[derive(Clone)]
pub struct Ref(Arc<dyn Any + Send + Sync>);

impl Ref {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    pub fn downcast<T: Any>(&self) -> Result<&T> {
        self.0.downcast_ref::<T>().ok_or_else(|| {
            BridgeError::InvalidArgument(format!("reference is not a {}", type_name::<T>()))
        })
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// 是否指向同一个共享值
    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ref(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry<T>() -> Registry<T> {
        Registry::new("test", Arc::new(HandleAllocator::new()))
    }

    #[test]
    fn lookup_after_register() {
        let reg = registry::<&'static str>();
        let h = reg.register("cb");
        assert_eq!(reg.lookup(h).as_deref(), Some(&"cb"));
        assert!(reg.contains(h));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn miss_after_unregister_and_double_unregister() {
        let reg = registry::<u32>();
        let h = reg.register(7);
        assert!(reg.unregister(h));
        assert!(reg.lookup(h).is_none());
        assert!(!reg.unregister(h));
        assert!(reg.is_empty());
    }

    #[test]
    fn registries_sharing_allocator_never_collide() {
        let alloc = Arc::new(HandleAllocator::new());
        let a: Registry<u8> = Registry::new("a", alloc.clone());
        let b: Registry<u8> = Registry::new("b", alloc);
        let ha = a.register(1);
        let hb = b.register(2);
        assert_ne!(ha, hb);
        assert!(a.lookup(hb).is_none());
        assert!(b.lookup(ha).is_none());
    }

    #[test]
    fn entry_outlives_unregister_while_borrowed() {
        let reg = registry::<String>();
        let h = reg.register("alive".to_string());
        let held = reg.lookup(h).unwrap();
        reg.unregister(h);
        assert_eq!(held.as_str(), "alive");
        assert!(reg.lookup(h).is_none());
    }

    #[test]
    fn concurrent_lookup_while_mutating() {
        let reg = Arc::new(registry::<usize>());
        let stable = reg.register(42);

        let writer = {
            let reg = reg.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    let h = reg.register(i);
                    reg.unregister(h);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        assert_eq!(reg.lookup(stable).as_deref(), Some(&42));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn callback_cell_keeps_state() {
        let mut count = 0;
        let cell: CallbackCell<dyn FnMut() -> u32 + Send> = CallbackCell::new(Box::new(move || {
            count += 1;
            count
        }));
        assert_eq!(cell.with(|f| f()), Some(1));
        assert_eq!(cell.with(|f| f()), Some(2));
    }

    #[test]
    fn callback_cell_reentry_does_not_block() {
        let cell: Arc<CallbackCell<dyn FnMut() -> u32 + Send>> =
            Arc::new(CallbackCell::new(Box::new(|| 1)));
        let inner = cell.clone();
        let nested = cell.with(|f| (f(), inner.with(|g| g())));
        assert_eq!(nested, Some((1, None)));
        // 外层返回后锁已释放
        assert_eq!(cell.with(|f| f()), Some(1));
    }

    #[test]
    fn callback_cell_recovers_from_poison() {
        let cell: Arc<CallbackCell<dyn FnMut() -> u32 + Send>> =
            Arc::new(CallbackCell::new(Box::new(|| 9)));
        let poisoner = cell.clone();
        let _ = std::thread::spawn(move || {
            poisoner.with(|_| panic!("poison"));
        })
        .join();
        assert_eq!(cell.with(|f| f()), Some(9));
    }

    #[test]
    fn ref_downcast() {
        let r = Ref::new("hello_item");
        assert_eq!(*r.downcast::<&str>().unwrap(), "hello_item");
        assert!(r.is::<&str>());

        let err = r.downcast::<u32>().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        assert!(err.to_string().contains("u32"));
    }

    #[test]
    fn ref_ptr_eq() {
        let a = Ref::new(1u8);
        let b = a.clone();
        let c = Ref::new(1u8);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }
}
