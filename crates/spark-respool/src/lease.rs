use crate::{error::PoolError, pool::ResAddr, registry::SharedPool};

/// `PoolLease` 是资源池区间的 RAII 所有权凭证。
///
/// # 模块角色（Why）
/// - 建立连接需要连续分配数据区、元数据区与标志区，任何一步失败时，
///   之前已经成功的分配都必须归还；把每个区间包成租约后，
///   错误通过 `?` 向上传播即可自动回滚，不会留下部分分配；
/// - 与 `PooledBuffer` 在 `Drop` 中归还缓冲的做法一致。
///
/// # 契约说明（What）
/// - `Drop` 时调用所属池的 `free`；失败只记录日志（`Drop` 不能返回错误）；
/// - [`PoolLease::release`] 显式归还并返回结果；
/// - [`PoolLease::leak`] 有意放弃归还（例如进程关闭阶段），返回起始地址。
#[derive(Debug)]
pub struct PoolLease {
    pool: SharedPool,
    addr: ResAddr,
    len: u64,
    released: bool,
}

impl PoolLease {
    pub(crate) fn new(pool: SharedPool, addr: ResAddr, len: u64) -> Self {
        Self {
            pool,
            addr,
            len,
            released: false,
        }
    }

    /// 区间起始地址。
    pub fn addr(&self) -> ResAddr {
        self.addr
    }

    /// 区间占用长度（按对齐取整后）。
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 所属池名称。
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// 显式归还区间。
    pub fn release(mut self) -> Result<u64, PoolError> {
        self.released = true;
        self.pool.free(self.addr)
    }

    /// 放弃归还，区间在池内保持占用。
    pub fn leak(mut self) -> ResAddr {
        self.released = true;
        tracing::debug!(
            pool.name = self.pool.name(),
            lease.addr = self.addr,
            lease.len = self.len,
            "lease leaked intentionally"
        );
        self.addr
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.pool.free(self.addr) {
            tracing::warn!(
                pool.name = self.pool.name(),
                lease.addr = self.addr,
                error.code = err.code(),
                "failed to return lease to resource pool"
            );
        }
    }
}
