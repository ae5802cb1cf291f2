use std::collections::BTreeMap;

use crate::error::PoolError;

/// 资源池内的线性地址。
///
/// 地址只是窗口内的偏移记账值，本身不可解引用；
/// 真实内存由上层（共享区、RDMA 注册区等）按该地址解释。
pub type ResAddr = u64;

/// `ResPool` 在固定地址区间 `[start, start + size)` 上执行 best-fit 分配。
///
/// # 模块角色（Why）
/// - 数据面在建立连接时一次性切出少量大块、长寿命的缓冲区与元数据区，
///   碎片控制比分配速度更重要，因此采用 best-fit 而非 first-fit；
/// - 长时间运行的流水线会反复建立/拆除连接，释放时必须与相邻空闲区间合并，
///   否则空闲链表只会单调碎片化。
///
/// # 核心机制（How）
/// - `free` 与 `used` 均为以起始地址为键的 `BTreeMap`，值为区间长度；
/// - 分配时扫描所有空闲区间，计算对齐填充后的总需求，选择满足需求的最小区间（同长取低地址）；
///   对齐填充留在原处保持空闲，尾部剩余部分重新插回空闲表；
/// - 释放时借助 `range(..addr).next_back()` 找到前驱，借助 `addr + len` 找到后继，双向合并。
///
/// # 契约说明（What）
/// - **不变式**：存活区间两两不重叠，且每个区间起始地址满足请求的对齐；
/// - **后置条件**：全部释放后空闲表只剩一个覆盖整个池的区间；
/// - **并发**：不做内部同步，调用方需在外部串行化（参见 [`crate::SharedPool`]）。
///
/// # 设计权衡（Trade-offs）
/// - 分配为 O(n) 扫描；数据面每条连接只有少量区间，换来的是实现简单且可证明不重叠。
#[derive(Debug)]
pub struct ResPool {
    start: ResAddr,
    size: u64,
    free: BTreeMap<ResAddr, u64>,
    used: BTreeMap<ResAddr, u64>,
    failed_allocations: u64,
}

/// 资源池统计快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// 池的总容量（字节）。
    pub total: u64,
    /// 当前空闲字节数（含对齐填充留下的碎片）。
    pub available: u64,
    /// 存活分配的数量。
    pub live_allocations: usize,
    /// 空闲区间数量；全部释放后应为 1。
    pub free_extents: usize,
    /// 最大空闲区间长度。
    pub largest_free: u64,
    /// 自创建以来因容量不足失败的分配次数。
    pub failed_allocations: u64,
}

impl ResPool {
    /// 以固定地址区间创建资源池。
    ///
    /// # 契约
    /// - `size` 必须大于 0，且 `start + size` 不得溢出 `u64`；
    /// - 创建后整个区间为单个空闲区间。
    pub fn new(start: ResAddr, size: u64) -> Result<Self, PoolError> {
        if size == 0 || start.checked_add(size).is_none() {
            return Err(PoolError::InvalidRange { start, size });
        }
        let mut free = BTreeMap::new();
        free.insert(start, size);
        Ok(Self {
            start,
            size,
            free,
            used: BTreeMap::new(),
            failed_allocations: 0,
        })
    }

    /// 分配 `nbytes` 字节并按 `alignment` 对齐，返回区间起始地址。
    ///
    /// # 参数与契约
    /// - `nbytes`：请求长度，实际占用按 `alignment` 向上取整；
    /// - `alignment`：必须是非零的 2 的幂；
    /// - **失败语义**：不存在可容纳的区间时返回 [`PoolError::Exhausted`]，
    ///   池状态保持不变，不会部分成功，也不会返回未对齐的地址。
    ///
    /// # 实现策略
    /// 1. 校验参数并计算取整后的长度；
    /// 2. 遍历空闲区间，记录“填充 + 长度”可容纳的最小区间；
    /// 3. 拆分选中区间：填充与尾部剩余重新挂回空闲表，中间部分记入已用表。
    pub fn alloc(&mut self, nbytes: u64, alignment: u64) -> Result<ResAddr, PoolError> {
        if nbytes == 0 {
            return Err(PoolError::ZeroSize);
        }
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment { alignment });
        }
        let exhausted = |pool: &mut Self| {
            pool.failed_allocations += 1;
            PoolError::Exhausted {
                requested: nbytes,
                alignment,
                largest_free: pool.largest_free(),
            }
        };
        let Some(rounded) = round_up(nbytes, alignment) else {
            return Err(exhausted(self));
        };

        let mut best: Option<(ResAddr, u64, ResAddr)> = None;
        for (&extent, &len) in &self.free {
            let Some(aligned) = round_up(extent, alignment) else {
                continue;
            };
            let Some(need) = (aligned - extent).checked_add(rounded) else {
                continue;
            };
            if need > len {
                continue;
            }
            // 同长区间保留先遇到的低地址区间。
            if best.is_none_or(|(_, best_len, _)| len < best_len) {
                best = Some((extent, len, aligned));
            }
        }

        let Some((extent, len, aligned)) = best else {
            return Err(exhausted(self));
        };
        self.free.remove(&extent);
        if aligned > extent {
            self.free.insert(extent, aligned - extent);
        }
        let tail_start = aligned + rounded;
        let tail_len = extent + len - tail_start;
        if tail_len > 0 {
            self.free.insert(tail_start, tail_len);
        }
        self.used.insert(aligned, rounded);
        Ok(aligned)
    }

    /// 释放 `addr` 对应的区间，返回其占用长度。
    ///
    /// 释放后与前驱、后继空闲区间合并。未分配或已释放的地址返回
    /// [`PoolError::UnknownAddress`]，池状态保持不变。
    pub fn free(&mut self, addr: ResAddr) -> Result<u64, PoolError> {
        let len = self
            .used
            .remove(&addr)
            .ok_or(PoolError::UnknownAddress { addr })?;

        let mut merged_start = addr;
        let mut merged_len = len;
        if let Some((&prev, &prev_len)) = self.free.range(..addr).next_back()
            && prev + prev_len == addr
        {
            self.free.remove(&prev);
            merged_start = prev;
            merged_len += prev_len;
        }
        if let Some(next_len) = self.free.remove(&(addr + len)) {
            merged_len += next_len;
        }
        self.free.insert(merged_start, merged_len);
        Ok(len)
    }

    /// 池的起始地址。
    pub fn start(&self) -> ResAddr {
        self.start
    }

    /// 池的总容量。
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 当前空闲字节总数。
    pub fn available(&self) -> u64 {
        self.free.values().sum()
    }

    /// 最大空闲区间长度；池满时为 0。
    pub fn largest_free(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    pub fn live_allocations(&self) -> usize {
        self.used.len()
    }

    pub fn free_extents(&self) -> usize {
        self.free.len()
    }

    /// 查询存活分配的占用长度（取整后）。
    pub fn allocation_len(&self, addr: ResAddr) -> Option<u64> {
        self.used.get(&addr).copied()
    }

    /// 汇总统计快照。
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.size,
            available: self.available(),
            live_allocations: self.used.len(),
            free_extents: self.free.len(),
            largest_free: self.largest_free(),
            failed_allocations: self.failed_allocations,
        }
    }
}

impl Drop for ResPool {
    fn drop(&mut self) {
        if self.used.is_empty() {
            return;
        }
        let leaked: u64 = self.used.values().sum();
        tracing::warn!(
            pool.start = self.start,
            pool.live_allocations = self.used.len(),
            pool.leaked_bytes = leaked,
            "resource pool dropped with live allocations; extents are leaked"
        );
    }
}

fn round_up(value: u64, alignment: u64) -> Option<u64> {
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}
