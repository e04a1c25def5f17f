//! 结构化归属索引。
//!
//! 扁平的 [`Registry`] 只认单个 handle。容器（菜单）拥有一个 handler handle
//! 和一串有序的菜单项 handle，这个索引记住归属关系，拆容器时级联释放它拥有的一切。
//! 索引有自己的锁，和注册表分开，一个回调点的派发不会等另一个回调点的记账。
//!
//! 加锁顺序固定为 索引 → 注册表。派发只碰注册表。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::handle::Handle;
use crate::registry::Registry;

#[derive(Debug, Default)]
struct Container {
    handler: Option<Handle>,
    items: Vec<Handle>,
}

pub struct OwnershipIndex<K> {
    containers: RwLock<HashMap<K, Container>>,
}

impl<K> OwnershipIndex<K>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// 记录新建的容器和它拥有的 handler（如果有）
    pub fn bind_container(&self, id: K, handler: Option<Handle>) {
        let mut containers = self
            .containers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = containers.entry(id).or_default();
        entry.handler = handler;
    }

    /// 追加菜单项 handle，插入顺序即显示顺序
    pub fn add_item(&self, id: K, item: Handle) {
        self.containers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .items
            .push(item);
    }

    /// 注销容器拥有的所有菜单项，再清空列表。返回释放的数量，没有菜单项也没关系
    pub fn clear_items<I>(&self, id: K, items: &Registry<I>) -> usize {
        let mut containers = self
            .containers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match containers.get_mut(&id) {
            Some(container) => release_items(container, items),
            None => 0,
        }
    }

    /// 级联拆除：先菜单项，再 handler，最后容器自己的映射。容器未知时返回 false
    pub fn destroy_container<H, I>(&self, id: K, handlers: &Registry<H>, items: &Registry<I>) -> bool {
        let mut containers = self
            .containers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(container) = containers.get_mut(&id) else {
            return false;
        };

        let released = release_items(container, items);
        if let Some(handler) = container.handler.take() {
            handlers.unregister(handler);
        }
        containers.remove(&id);
        debug!(container = ?id, items = released, "container destroyed");
        true
    }

    /// 按显示顺序的菜单项 handle
    pub fn items(&self, id: K) -> Vec<Handle> {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|c| c.items.clone())
            .unwrap_or_default()
    }

    pub fn handler(&self, id: K) -> Option<Handle> {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .and_then(|c| c.handler)
    }

    pub fn contains(&self, id: K) -> bool {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn ids(&self) -> Vec<K> {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for OwnershipIndex<K>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

fn release_items<I>(container: &mut Container, items: &Registry<I>) -> usize {
    let released = std::mem::take(&mut container.items);
    for item in &released {
        items.unregister(*item);
    }
    released.len()
}
