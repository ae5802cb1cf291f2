use std::{collections::BTreeMap, sync::Arc};

use spin::{Mutex, RwLock};

use crate::{
    error::PoolError,
    lease::PoolLease,
    pool::{PoolStats, ResAddr, ResPool},
};

/// 可跨线程共享的命名资源池句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：[`ResPool`] 不做内部同步，多个端口/连接共享同一段端点内存时，
///   需要一把在每次 `alloc`/`free` 期间持有的外部锁；
/// - **契约 (What)**：克隆句柄共享同一个池；锁只在单次调用期间持有，不会跨调用泄漏；
/// - **实现 (How)**：沿用 `spin::Mutex`，与工作区其余缓冲池保持相同的同步原语。
#[derive(Clone)]
pub struct SharedPool {
    name: Arc<str>,
    inner: Arc<Mutex<ResPool>>,
}

impl SharedPool {
    /// 包装一个已创建的资源池。
    pub fn new(name: impl Into<Arc<str>>, pool: ResPool) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alloc(&self, nbytes: u64, alignment: u64) -> Result<ResAddr, PoolError> {
        self.inner.lock().alloc(nbytes, alignment)
    }

    pub fn free(&self, addr: ResAddr) -> Result<u64, PoolError> {
        self.inner.lock().free(addr)
    }

    /// 分配并返回 RAII 租约，租约 `Drop` 时自动归还区间。
    pub fn lease(&self, nbytes: u64, alignment: u64) -> Result<PoolLease, PoolError> {
        let (addr, len) = {
            let mut pool = self.inner.lock();
            let addr = pool.alloc(nbytes, alignment)?;
            (addr, pool.allocation_len(addr).unwrap_or(nbytes))
        };
        Ok(PoolLease::new(self.clone(), addr, len))
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    /// 在持锁状态下访问底层池，用于一次性执行多步只读检查。
    pub fn with<R>(&self, f: impl FnOnce(&ResPool) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard)
    }
}

impl core::fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedPool")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// 命名资源池注册表。
///
/// # 模块角色（Why）
/// - 取代进程级的全局池单例：注册表由运行时实例显式构造，并显式传递给建连代码，
///   其生命周期即运行时实例的生命周期；
/// - 同一端点地址的多条连接通过名称共享同一个池。
///
/// # 契约说明（What）
/// - `register` 对重名返回 [`PoolError::DuplicatePool`]；
/// - `get_or_register` 在名称不存在时才创建新池，已存在时忽略传入区间；
/// - `remove` 只移除注册关系，已发出的 [`SharedPool`] 句柄与租约仍然有效。
#[derive(Default)]
pub struct ResourceRegistry {
    pools: RwLock<BTreeMap<String, SharedPool>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `[start, start + size)` 上创建并注册一个新池。
    pub fn register(
        &self,
        name: &str,
        start: ResAddr,
        size: u64,
    ) -> Result<SharedPool, PoolError> {
        let mut pools = self.pools.write();
        if pools.contains_key(name) {
            return Err(PoolError::DuplicatePool {
                name: name.to_owned(),
            });
        }
        let pool = SharedPool::new(name, ResPool::new(start, size)?);
        pools.insert(name.to_owned(), pool.clone());
        tracing::debug!(
            pool.name = name,
            pool.start = start,
            pool.size = size,
            "resource pool registered"
        );
        Ok(pool)
    }

    pub fn get(&self, name: &str) -> Result<SharedPool, PoolError> {
        self.pools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::PoolNotFound {
                name: name.to_owned(),
            })
    }

    pub fn get_or_register(
        &self,
        name: &str,
        start: ResAddr,
        size: u64,
    ) -> Result<SharedPool, PoolError> {
        if let Some(pool) = self.pools.read().get(name) {
            return Ok(pool.clone());
        }
        match self.register(name, start, size) {
            // 读锁释放后可能被其它线程抢先注册。
            Err(PoolError::DuplicatePool { .. }) => self.get(name),
            other => other,
        }
    }

    pub fn remove(&self, name: &str) -> Option<SharedPool> {
        self.pools.write().remove(name)
    }

    /// 按字典序返回所有已注册名称。
    pub fn names(&self) -> Vec<String> {
        self.pools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}

impl core::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("pools", &self.names())
            .finish()
    }
}
