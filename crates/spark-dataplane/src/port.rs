//! # port 模块说明
//!
//! ## 角色定位（Why）
//! - 端口是工作单元看到的缓冲访问面：每个端口暴露一个“当前”缓冲（地址 + 容量），
//!   生产端附带待提交的输出描述符（长度 + 操作码），消费端附带输入描述符（即 [`BufferMetaData`]）；
//! - 端口内部按环形游标轮流使用自己的缓冲，游标与传输模板的目标索引保持一致。
//!
//! ## 存储（How）
//! - 本地分配的端口从端点资源池租出数据区、元数据区、满标志区与空标志区，
//!   租约随端口一起释放；任何一步分配失败都会让已租出的区间自动归还；
//! - 远端发起的消费端口不做本地分配，只引用重映射后的窗口。

use spark_respool::PoolLease;

use crate::{
    config::DataplaneConfig,
    descriptor::{DescriptorKind, Descriptors, FLAG_SIZE, FlowRole},
    endpoint::EndpointResources,
    error::{DataplaneError, Result},
    flags::FlagSlot,
    memory::SharedRegion,
    meta::{BufferMetaData, METADATA_SIZE},
};

/// 工作单元可见的当前缓冲。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CurrentBuffer {
    pub index: u32,
    pub addr: u64,
    pub capacity: u32,
}

/// 生产端待提交的输出描述符。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputDescriptor {
    pub length: u32,
    pub opcode: u8,
}

/// 一个端口的全部缓冲槽位。
#[derive(Debug)]
pub(crate) struct PortBuffers {
    region: SharedRegion,
    descriptor: Descriptors,
    full: Vec<FlagSlot>,
    empty: Vec<Option<FlagSlot>>,
    _leases: Vec<PoolLease>,
}

fn round_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl PortBuffers {
    /// 从端点资源池分配 `count` 个 `size` 字节的缓冲及其元数据与标志。
    pub(crate) fn allocate(
        resources: &EndpointResources,
        kind: DescriptorKind,
        role: FlowRole,
        count: u32,
        size: u32,
        config: &DataplaneConfig,
    ) -> Result<Self> {
        let alignment = u64::from(config.buffer.alignment);
        let pitch = round_up(u64::from(size), alignment);
        let pitch32 = u32::try_from(pitch).map_err(|_| DataplaneError::MessageTooLarge {
            length: pitch,
            capacity: u64::from(u32::MAX),
        })?;
        let n = u64::from(count);
        let pool = resources.pool();
        let data = pool.lease(n.saturating_mul(pitch), alignment)?;
        let meta = pool.lease(n * u64::from(METADATA_SIZE), alignment)?;
        let full = pool.lease(n * u64::from(FLAG_SIZE), alignment)?;
        let empty = pool.lease(n * u64::from(FLAG_SIZE), alignment)?;

        let descriptor = Descriptors {
            kind,
            role,
            medium: resources.id().medium(),
            n_buffers: count,
            data_buffer_base_addr: data.addr(),
            data_buffer_pitch: pitch32,
            data_buffer_size: size,
            meta_data_base_addr: meta.addr(),
            meta_data_pitch: METADATA_SIZE,
            full_flag_base_addr: full.addr(),
            full_flag_size: FLAG_SIZE,
            full_flag_pitch: FLAG_SIZE,
            full_flag_value: u64::from(config.flags.full_value),
            empty_flag_base_addr: empty.addr(),
            empty_flag_size: FLAG_SIZE,
            empty_flag_pitch: FLAG_SIZE,
            empty_flag_value: u64::from(config.flags.empty_value),
        };
        let mut buffers = Self::attach(resources.region().clone(), descriptor)?;
        buffers._leases = vec![data, meta, full, empty];
        for index in 0..count {
            buffers.mark_released(index)?;
        }
        Ok(buffers)
    }

    /// 引用一段已存在的窗口；`descriptor` 中的地址必须已是本地地址。
    pub(crate) fn attach(region: SharedRegion, descriptor: Descriptors) -> Result<Self> {
        descriptor.validate()?;
        let full_value = descriptor.full_flag_value as u32;
        let empty_value = descriptor.empty_flag_value as u32;
        let mut full = Vec::with_capacity(descriptor.n_buffers as usize);
        let mut empty = Vec::with_capacity(descriptor.n_buffers as usize);
        for index in 0..descriptor.n_buffers {
            let data = descriptor.buffer_addr(index)?;
            if !region.contains(data, u64::from(descriptor.data_buffer_size)) {
                return Err(DataplaneError::RegionOutOfBounds {
                    addr: data,
                    len: u64::from(descriptor.data_buffer_size),
                    base: region.base(),
                    region_len: region.len(),
                });
            }
            let meta = descriptor.metadata_addr(index)?;
            if !region.contains(meta, u64::from(METADATA_SIZE)) {
                return Err(DataplaneError::RegionOutOfBounds {
                    addr: meta,
                    len: u64::from(METADATA_SIZE),
                    base: region.base(),
                    region_len: region.len(),
                });
            }
            full.push(FlagSlot::new(
                region.clone(),
                descriptor.full_flag_addr(index)?,
                full_value,
            )?);
            empty.push(match descriptor.empty_flag_addr(index)? {
                Some(addr) => Some(FlagSlot::new(region.clone(), addr, empty_value)?),
                None => None,
            });
        }
        Ok(Self {
            region,
            descriptor,
            full,
            empty,
            _leases: Vec::new(),
        })
    }

    pub(crate) fn descriptor(&self) -> &Descriptors {
        &self.descriptor
    }

    pub(crate) fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub(crate) fn count(&self) -> u32 {
        self.descriptor.n_buffers
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.descriptor.data_buffer_size
    }

    pub(crate) fn buffer(&self, index: u32) -> Result<CurrentBuffer> {
        Ok(CurrentBuffer {
            index,
            addr: self.descriptor.buffer_addr(index)?,
            capacity: self.capacity(),
        })
    }

    pub(crate) fn full(&self, index: u32) -> Result<&FlagSlot> {
        self.full
            .get(index as usize)
            .ok_or_else(|| DataplaneError::index("full flag", index, self.count()))
    }

    pub(crate) fn is_full(&self, index: u32) -> Result<bool> {
        self.full(index)?.is_raised()
    }

    pub(crate) fn write(&self, index: u32, offset: u32, data: &[u8]) -> Result<()> {
        let end = u64::from(offset) + data.len() as u64;
        if end > u64::from(self.capacity()) {
            return Err(DataplaneError::MessageTooLarge {
                length: end,
                capacity: u64::from(self.capacity()),
            });
        }
        let addr = self.descriptor.buffer_addr(index)? + u64::from(offset);
        self.region.write_bytes(addr, data)
    }

    pub(crate) fn read(&self, index: u32, offset: u32, out: &mut [u8]) -> Result<()> {
        let end = u64::from(offset) + out.len() as u64;
        if end > u64::from(self.capacity()) {
            return Err(DataplaneError::MessageTooLarge {
                length: end,
                capacity: u64::from(self.capacity()),
            });
        }
        let addr = self.descriptor.buffer_addr(index)? + u64::from(offset);
        self.region.read_bytes(addr, out)
    }

    pub(crate) fn metadata(&self, index: u32) -> Result<BufferMetaData> {
        BufferMetaData::read_from(&self.region, self.descriptor.metadata_addr(index)?)
    }

    /// 写入元数据，清空标志，最后置满标志。
    pub(crate) fn mark_filled(&self, index: u32, meta: &BufferMetaData) -> Result<()> {
        meta.write_to(&self.region, self.descriptor.metadata_addr(index)?)?;
        if let Some(Some(empty)) = self.empty.get(index as usize) {
            empty.clear()?;
        }
        self.full(index)?.raise()
    }

    /// 清满标志并置空标志。
    pub(crate) fn mark_released(&self, index: u32) -> Result<()> {
        self.full(index)?.clear()?;
        if let Some(Some(empty)) = self.empty.get(index as usize) {
            empty.raise()?;
        }
        Ok(())
    }
}

/// 生产端端口。
#[derive(Debug)]
pub struct OutputPort {
    rank: u32,
    buffers: PortBuffers,
    cursor: u32,
    pending: Option<OutputDescriptor>,
}

impl OutputPort {
    pub(crate) fn new(rank: u32, buffers: PortBuffers) -> Self {
        Self {
            rank,
            buffers,
            cursor: 0,
            pending: None,
        }
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// 下一条消息应写入的缓冲。
    pub fn current(&self) -> Result<CurrentBuffer> {
        self.buffers.buffer(self.cursor)
    }

    /// 本端口的本地描述符，可交给对端。
    pub fn descriptor(&self) -> &Descriptors {
        self.buffers.descriptor()
    }

    /// 向当前缓冲的 `offset` 处写入数据。
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.buffers.write(self.cursor, offset, data)
    }

    /// 设置待提交的输出描述符。
    pub fn set_output(&mut self, length: u32, opcode: u8) -> Result<()> {
        if length > self.buffers.capacity() {
            return Err(DataplaneError::MessageTooLarge {
                length: u64::from(length),
                capacity: u64::from(self.buffers.capacity()),
            });
        }
        self.pending = Some(OutputDescriptor { length, opcode });
        Ok(())
    }

    pub fn pending(&self) -> Option<OutputDescriptor> {
        self.pending
    }

    /// 当前缓冲是否可以写入；拉模式下需要等待消费者释放。
    pub fn is_free(&self) -> Result<bool> {
        Ok(!self.buffers.is_full(self.cursor)?)
    }

    pub(crate) fn cursor(&self) -> u32 {
        self.cursor
    }

    pub(crate) fn buffers(&self) -> &PortBuffers {
        &self.buffers
    }

    pub(crate) fn take_pending(&mut self) -> Option<OutputDescriptor> {
        self.pending.take()
    }

    pub(crate) fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.buffers.count();
    }
}

/// 消费端端口。
#[derive(Debug)]
pub struct InputPort {
    port_set: u32,
    rank: u32,
    buffers: PortBuffers,
    cursor: u32,
}

impl InputPort {
    pub(crate) fn new(port_set: u32, rank: u32, buffers: PortBuffers, cursor: u32) -> Self {
        Self {
            port_set,
            rank,
            buffers,
            cursor,
        }
    }

    pub fn port_set(&self) -> u32 {
        self.port_set
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// 下一条期望到达的缓冲。
    pub fn current(&self) -> Result<CurrentBuffer> {
        self.buffers.buffer(self.cursor)
    }

    pub fn descriptor(&self) -> &Descriptors {
        self.buffers.descriptor()
    }

    /// 单次检查当前缓冲：满标志已置位时返回重新读取的元数据。
    pub fn poll(&self) -> Result<Option<BufferMetaData>> {
        if !self.buffers.is_full(self.cursor)? {
            return Ok(None);
        }
        self.buffers.metadata(self.cursor).map(Some)
    }

    /// 从当前缓冲的 `offset` 处读取，返回实际读取的字节数（不超过元数据长度）。
    pub fn read(&self, offset: u32, out: &mut [u8]) -> Result<usize> {
        let Some(meta) = self.poll()? else {
            return Err(self.not_ready());
        };
        let available = meta.length.saturating_sub(offset) as usize;
        let n = available.min(out.len());
        self.buffers.read(self.cursor, offset, &mut out[..n])?;
        Ok(n)
    }

    pub(crate) fn not_ready(&self) -> DataplaneError {
        DataplaneError::BufferNotReady {
            port_set: self.port_set,
            rank: self.rank,
            buffer: self.cursor,
        }
    }

    pub(crate) fn cursor(&self) -> u32 {
        self.cursor
    }

    pub(crate) fn buffers(&self) -> &PortBuffers {
        &self.buffers
    }

    /// 释放当前缓冲并前进游标。
    pub(crate) fn release(&mut self) -> Result<()> {
        if !self.buffers.is_full(self.cursor)? {
            return Err(self.not_ready());
        }
        self.buffers.mark_released(self.cursor)?;
        self.cursor = (self.cursor + 1) % self.buffers.count();
        Ok(())
    }
}
