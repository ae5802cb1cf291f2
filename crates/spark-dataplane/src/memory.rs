//! # memory 模块说明
//!
//! ## 角色定位（Why）
//! - 描述符中的地址只有在共享地址空间的介质上才能直接解引用；
//!   其它介质上的地址只是对端的相对句柄，必须先经过映射表重映射；
//! - 两种情况用 [`MemoryHandle`] 的两个变体显式区分，误用在传输选择边界即报错，
//!   而不是在访问内存时才暴露。
//!
//! ## 内存模型（How）
//! - [`SharedRegion`] 以 `AtomicU32` 字数组模拟一段可被多方访问的端点内存窗口；
//! - 标志字使用 `Release` 写 / `Acquire` 读，数据字使用 `Relaxed` 访问，
//!   由随后的标志写入建立先后关系；
//! - 每次检查都重新读取内存，不缓存任何值。

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::error::{DataplaneError, Result};

/// 传输介质。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    /// 同一地址空间或以相同虚拟地址映射的共享内存。
    SharedMemory,
    /// RDMA 注册区：地址是远端密钥空间中的偏移。
    Rdma,
    /// 套接字：对端地址完全不可见。
    Socket,
}

impl Medium {
    /// 该介质上的地址能否被直接解引用。
    pub fn is_memory_shared(self) -> bool {
        matches!(self, Medium::SharedMemory)
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            Medium::SharedMemory => 0,
            Medium::Rdma => 1,
            Medium::Socket => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Medium::SharedMemory),
            1 => Some(Medium::Rdma),
            2 => Some(Medium::Socket),
            _ => None,
        }
    }
}

/// 内存句柄：可直接解引用的本地地址，或需重映射的远端句柄。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MemoryHandle {
    Local(u64),
    Remote { handle: u64, medium: Medium },
}

impl MemoryHandle {
    /// 取出本地地址；远端句柄返回 [`DataplaneError::DescriptorNotDereferenceable`]。
    pub fn local_addr(self) -> Result<u64> {
        match self {
            MemoryHandle::Local(addr) => Ok(addr),
            MemoryHandle::Remote { medium, .. } => {
                Err(DataplaneError::DescriptorNotDereferenceable { medium })
            }
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, MemoryHandle::Local(_))
    }

    /// 在同一地址空间内平移句柄。
    pub fn offset(self, by: u64) -> Self {
        match self {
            MemoryHandle::Local(addr) => MemoryHandle::Local(addr.wrapping_add(by)),
            MemoryHandle::Remote { handle, medium } => MemoryHandle::Remote {
                handle: handle.wrapping_add(by),
                medium,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct MappingWindow {
    medium: Medium,
    remote_base: u64,
    len: u64,
    local_base: u64,
}

/// 远端句柄到本地地址的映射表。
///
/// 每个窗口把某介质上 `[remote_base, remote_base + len)` 映射到本地 `local_base` 起始的区间；
/// 同一介质上的窗口不得重叠。
#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    windows: Vec<MappingWindow>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册映射窗口。
    pub fn map(
        &mut self,
        medium: Medium,
        remote_base: u64,
        len: u64,
        local_base: u64,
    ) -> Result<()> {
        let remote_end = remote_base
            .checked_add(len)
            .filter(|_| len > 0)
            .ok_or(DataplaneError::RegionOutOfBounds {
                addr: remote_base,
                len,
                base: remote_base,
                region_len: 0,
            })?;
        let overlaps = self.windows.iter().any(|w| {
            w.medium == medium && remote_base < w.remote_base + w.len && w.remote_base < remote_end
        });
        if overlaps {
            return Err(DataplaneError::MappingOverlap {
                medium,
                remote_base,
            });
        }
        self.windows.push(MappingWindow {
            medium,
            remote_base,
            len,
            local_base,
        });
        Ok(())
    }

    /// 把句柄解析为本地地址；本地句柄原样返回。
    ///
    /// `span` 为随后要访问的字节数，整个区间都必须落在同一窗口内。
    pub fn resolve(&self, handle: MemoryHandle, span: u64) -> Result<u64> {
        let (remote, medium) = match handle {
            MemoryHandle::Local(addr) => return Ok(addr),
            MemoryHandle::Remote { handle, medium } => (handle, medium),
        };
        self.windows
            .iter()
            .find(|w| {
                w.medium == medium
                    && remote >= w.remote_base
                    && remote
                        .checked_add(span)
                        .is_some_and(|end| end <= w.remote_base + w.len)
            })
            .map(|w| w.local_base + (remote - w.remote_base))
            .ok_or(DataplaneError::UnmappedHandle {
                handle: remote,
                medium,
            })
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// 一段可被生产者、消费者共同访问的端点内存窗口。
///
/// # 契约说明（What）
/// - 地址区间为 `[base, base + len)`，`len` 向上取整到 4 字节；
/// - 克隆共享同一份底层存储；
/// - 所有访问都做越界检查，标志字访问要求 4 字节对齐。
#[derive(Clone)]
pub struct SharedRegion {
    base: u64,
    words: Arc<[AtomicU32]>,
}

impl SharedRegion {
    pub fn new(base: u64, len: u64) -> Result<Self> {
        let out_of_bounds = DataplaneError::RegionOutOfBounds {
            addr: base,
            len,
            base,
            region_len: 0,
        };
        let span = len.div_ceil(4).checked_mul(4);
        if span.and_then(|span| base.checked_add(span)).is_none() {
            return Err(out_of_bounds);
        }
        let count = usize::try_from(len.div_ceil(4)).map_err(|_| out_of_bounds)?;
        if base % 4 != 0 {
            return Err(DataplaneError::MisalignedAccess { addr: base });
        }
        let mut words = Vec::new();
        words
            .try_reserve_exact(count)
            .map_err(|source| DataplaneError::RegionAllocation { len, source })?;
        words.resize_with(count, || AtomicU32::new(0));
        Ok(Self {
            base,
            words: words.into(),
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> u64 {
        self.words.len() as u64 * 4
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// 区间 `[addr, addr + len)` 是否完全落在窗口内。
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.base
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= self.base + self.len())
    }

    fn check(&self, addr: u64, len: u64) -> Result<usize> {
        if !self.contains(addr, len) {
            return Err(DataplaneError::RegionOutOfBounds {
                addr,
                len,
                base: self.base,
                region_len: self.len(),
            });
        }
        Ok((addr - self.base) as usize)
    }

    /// 以 `Acquire` 语义读取一个标志字。
    pub fn load_u32(&self, addr: u64) -> Result<u32> {
        let offset = self.check(addr, 4)?;
        if offset % 4 != 0 {
            return Err(DataplaneError::MisalignedAccess { addr });
        }
        Ok(self.words[offset / 4].load(Ordering::Acquire))
    }

    /// 以 `Release` 语义写入一个标志字。
    pub fn store_u32(&self, addr: u64, value: u32) -> Result<()> {
        let offset = self.check(addr, 4)?;
        if offset % 4 != 0 {
            return Err(DataplaneError::MisalignedAccess { addr });
        }
        self.words[offset / 4].store(value, Ordering::Release);
        Ok(())
    }

    /// 读取任意字节区间（小端字序）。
    pub fn read_bytes(&self, addr: u64, out: &mut [u8]) -> Result<()> {
        let offset = self.check(addr, out.len() as u64)?;
        for (i, byte) in out.iter_mut().enumerate() {
            let at = offset + i;
            let word = self.words[at / 4].load(Ordering::Relaxed);
            *byte = word.to_le_bytes()[at % 4];
        }
        Ok(())
    }

    /// 写入任意字节区间；整字直接写入，首尾不完整的字逐字节合并。
    pub fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<()> {
        let offset = self.check(addr, data.len() as u64)?;
        let mut at = offset;
        let mut rest = data;
        while !rest.is_empty() {
            let lane = at % 4;
            let word = &self.words[at / 4];
            if lane == 0 && rest.len() >= 4 {
                let (chunk, tail) = rest.split_at(4);
                word.store(
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                    Ordering::Relaxed,
                );
                rest = tail;
                at += 4;
                continue;
            }
            let take = (4 - lane).min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            let mut current = word.load(Ordering::Relaxed);
            loop {
                let mut bytes = current.to_le_bytes();
                bytes[lane..lane + take].copy_from_slice(chunk);
                let merged = u32::from_le_bytes(bytes);
                match word.compare_exchange_weak(
                    current,
                    merged,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
            rest = tail;
            at += take;
        }
        Ok(())
    }
}

impl core::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len())
            .finish()
    }
}
