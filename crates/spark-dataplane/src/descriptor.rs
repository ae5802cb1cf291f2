//! # descriptor 模块说明
//!
//! ## 角色定位（Why）
//! - 描述符是连接双方为建立零拷贝可见性而交换的唯一记录：
//!   缓冲个数、数据区/元数据区/标志区的基址与步长（pitch），以及满/空标志的写入值；
//! - 它可能跨进程、跨主机传输，因此编码为固定 96 字节、小端序的平坦记录，
//!   不含指针嵌套，也不含变长字段。
//!
//! ## 地址语义（What）
//! - 第 `N` 个缓冲地址为 `base + N * pitch`；pitch 是步长而非总长；
//! - 仅当传输介质与描述符自身介质都共享地址空间时，地址才可直接解引用，
//!   否则 [`Descriptors::handles`] 产出远端句柄，必须先经 [`DescriptorHandles::remap`]。
//!
//! ## 线格式（How）
//!
//! | 偏移 | 字段 | 类型 |
//! |----:|------|------|
//! | 0 | magic `SPDT` | u32 |
//! | 4 | version | u16 |
//! | 6 | kind | u8 |
//! | 7 | role | u8 |
//! | 8 | medium | u8 |
//! | 12 | n_buffers | u32 |
//! | 16 | data_buffer_base_addr | u64 |
//! | 24 | data_buffer_pitch | u32 |
//! | 28 | data_buffer_size | u32 |
//! | 32 | meta_data_base_addr | u64 |
//! | 40 | meta_data_pitch | u32 |
//! | 44 | full_flag_size | u32 |
//! | 48 | full_flag_base_addr | u64 |
//! | 56 | full_flag_pitch | u32 |
//! | 60 | empty_flag_size | u32 |
//! | 64 | full_flag_value | u64 |
//! | 72 | empty_flag_base_addr | u64 |
//! | 80 | empty_flag_pitch | u32 |
//! | 88 | empty_flag_value | u64 |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::{DataplaneError, Result},
    memory::{MappingTable, Medium, MemoryHandle},
    meta::METADATA_SIZE,
};

/// 编码后的固定长度。
pub const WIRE_LEN: usize = 96;
/// 编码魔数。
pub const MAGIC: [u8; 4] = *b"SPDT";
/// 当前线格式版本。
pub const WIRE_VERSION: u16 = 1;
/// 满/空标志字宽度。
pub const FLAG_SIZE: u32 = 4;

/// 描述符属于连接的哪一端。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorKind {
    Producer,
    Consumer,
}

/// 该端在流控中的角色。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FlowRole {
    /// 写方主动推送数据并置满标志。
    ActiveMessage,
    /// 只主动维护标志，数据由对端搬运。
    ActiveFlowControl,
    /// 完全被动：由对端轮询标志并拉取数据。
    Passive,
}

impl DescriptorKind {
    fn tag(self) -> u8 {
        match self {
            DescriptorKind::Producer => 0,
            DescriptorKind::Consumer => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DescriptorKind::Producer),
            1 => Some(DescriptorKind::Consumer),
            _ => None,
        }
    }
}

impl FlowRole {
    fn tag(self) -> u8 {
        match self {
            FlowRole::ActiveMessage => 0,
            FlowRole::ActiveFlowControl => 1,
            FlowRole::Passive => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(FlowRole::ActiveMessage),
            1 => Some(FlowRole::ActiveFlowControl),
            2 => Some(FlowRole::Passive),
            _ => None,
        }
    }
}

/// 端点缓冲几何描述符。
///
/// `empty_flag_size == 0` 表示该端点没有空标志。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Descriptors {
    pub kind: DescriptorKind,
    pub role: FlowRole,
    pub medium: Medium,
    pub n_buffers: u32,
    pub data_buffer_base_addr: u64,
    pub data_buffer_pitch: u32,
    pub data_buffer_size: u32,
    pub meta_data_base_addr: u64,
    pub meta_data_pitch: u32,
    pub full_flag_base_addr: u64,
    pub full_flag_size: u32,
    pub full_flag_pitch: u32,
    pub full_flag_value: u64,
    pub empty_flag_base_addr: u64,
    pub empty_flag_size: u32,
    pub empty_flag_pitch: u32,
    pub empty_flag_value: u64,
}

fn span_end(base: u64, pitch: u32, size: u32, count: u32) -> Option<u64> {
    u64::from(count.saturating_sub(1))
        .checked_mul(u64::from(pitch))
        .and_then(|offset| base.checked_add(offset))
        .and_then(|last| last.checked_add(u64::from(size)))
}

impl Descriptors {
    /// 校验描述符自洽性。
    ///
    /// - `n_buffers > 0`；
    /// - 多缓冲时，各区域 pitch 不小于单项大小；
    /// - 满标志宽度固定为 4 字节，标志值非零且可放入 32 位字；
    /// - 最后一项的结束地址不得溢出。
    pub fn validate(&self) -> Result<()> {
        let reject = |reason| Err(DataplaneError::InvalidDescriptor { reason });
        if self.n_buffers == 0 {
            return reject("n_buffers must be positive");
        }
        if self.data_buffer_size == 0 {
            return reject("data_buffer_size must be positive");
        }
        if self.full_flag_size != FLAG_SIZE {
            return reject("full_flag_size must be 4");
        }
        if self.empty_flag_size != 0 && self.empty_flag_size != FLAG_SIZE {
            return reject("empty_flag_size must be 0 or 4");
        }
        if self.full_flag_value == 0 || self.full_flag_value > u64::from(u32::MAX) {
            return reject("full_flag_value must be a non-zero 32-bit value");
        }
        if self.empty_flag_size != 0
            && (self.empty_flag_value == 0 || self.empty_flag_value > u64::from(u32::MAX))
        {
            return reject("empty_flag_value must be a non-zero 32-bit value");
        }
        if self.n_buffers > 1 {
            if self.data_buffer_pitch < self.data_buffer_size {
                return reject("data_buffer_pitch is smaller than data_buffer_size");
            }
            if self.meta_data_pitch < METADATA_SIZE {
                return reject("meta_data_pitch is smaller than one metadata record");
            }
            if self.full_flag_pitch < self.full_flag_size {
                return reject("full_flag_pitch is smaller than full_flag_size");
            }
            if self.empty_flag_size != 0 && self.empty_flag_pitch < self.empty_flag_size {
                return reject("empty_flag_pitch is smaller than empty_flag_size");
            }
        }
        let n = self.n_buffers;
        let spans = [
            span_end(self.data_buffer_base_addr, self.data_buffer_pitch, self.data_buffer_size, n),
            span_end(self.meta_data_base_addr, self.meta_data_pitch, METADATA_SIZE, n),
            span_end(self.full_flag_base_addr, self.full_flag_pitch, self.full_flag_size, n),
            span_end(self.empty_flag_base_addr, self.empty_flag_pitch, self.empty_flag_size, n),
        ];
        if spans.iter().any(Option::is_none) {
            return reject("buffer addresses overflow");
        }
        Ok(())
    }

    /// 是否带空标志。
    pub fn has_empty_flag(&self) -> bool {
        self.empty_flag_size != 0
    }

    fn indexed(&self, what: &'static str, base: u64, pitch: u32, index: u32) -> Result<u64> {
        if index >= self.n_buffers {
            return Err(DataplaneError::index(what, index, self.n_buffers));
        }
        Ok(base + u64::from(index) * u64::from(pitch))
    }

    /// 第 `index` 个数据缓冲的地址。
    pub fn buffer_addr(&self, index: u32) -> Result<u64> {
        self.indexed("buffer", self.data_buffer_base_addr, self.data_buffer_pitch, index)
    }

    pub fn metadata_addr(&self, index: u32) -> Result<u64> {
        self.indexed("metadata", self.meta_data_base_addr, self.meta_data_pitch, index)
    }

    pub fn full_flag_addr(&self, index: u32) -> Result<u64> {
        self.indexed("full flag", self.full_flag_base_addr, self.full_flag_pitch, index)
    }

    /// 第 `index` 个空标志地址；无空标志时返回 `None`。
    pub fn empty_flag_addr(&self, index: u32) -> Result<Option<u64>> {
        if !self.has_empty_flag() {
            return Ok(None);
        }
        self.indexed("empty flag", self.empty_flag_base_addr, self.empty_flag_pitch, index)
            .map(Some)
    }

    /// 按 96 字节线格式写入 `dst`。
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&MAGIC);
        dst.put_u16_le(WIRE_VERSION);
        dst.put_u8(self.kind.tag());
        dst.put_u8(self.role.tag());
        dst.put_u8(self.medium.tag());
        dst.put_bytes(0, 3);
        dst.put_u32_le(self.n_buffers);
        dst.put_u64_le(self.data_buffer_base_addr);
        dst.put_u32_le(self.data_buffer_pitch);
        dst.put_u32_le(self.data_buffer_size);
        dst.put_u64_le(self.meta_data_base_addr);
        dst.put_u32_le(self.meta_data_pitch);
        dst.put_u32_le(self.full_flag_size);
        dst.put_u64_le(self.full_flag_base_addr);
        dst.put_u32_le(self.full_flag_pitch);
        dst.put_u32_le(self.empty_flag_size);
        dst.put_u64_le(self.full_flag_value);
        dst.put_u64_le(self.empty_flag_base_addr);
        dst.put_u32_le(self.empty_flag_pitch);
        dst.put_u32_le(0);
        dst.put_u64_le(self.empty_flag_value);
    }

    /// 编码为独立的 [`Bytes`]。
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(WIRE_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// 从线格式解码并校验。
    pub fn decode(mut src: &[u8]) -> Result<Self> {
        let reject = |reason| DataplaneError::InvalidDescriptor { reason };
        if src.len() < WIRE_LEN {
            return Err(reject("record shorter than 96 bytes"));
        }
        let mut magic = [0u8; 4];
        src.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(reject("bad magic"));
        }
        if src.get_u16_le() != WIRE_VERSION {
            return Err(reject("unsupported version"));
        }
        let kind = DescriptorKind::from_tag(src.get_u8()).ok_or_else(|| reject("unknown kind"))?;
        let role = FlowRole::from_tag(src.get_u8()).ok_or_else(|| reject("unknown role"))?;
        let medium = Medium::from_tag(src.get_u8()).ok_or_else(|| reject("unknown medium"))?;
        src.advance(3);
        let n_buffers = src.get_u32_le();
        let data_buffer_base_addr = src.get_u64_le();
        let data_buffer_pitch = src.get_u32_le();
        let data_buffer_size = src.get_u32_le();
        let meta_data_base_addr = src.get_u64_le();
        let meta_data_pitch = src.get_u32_le();
        let full_flag_size = src.get_u32_le();
        let full_flag_base_addr = src.get_u64_le();
        let full_flag_pitch = src.get_u32_le();
        let empty_flag_size = src.get_u32_le();
        let full_flag_value = src.get_u64_le();
        let empty_flag_base_addr = src.get_u64_le();
        let empty_flag_pitch = src.get_u32_le();
        src.advance(4);
        let empty_flag_value = src.get_u64_le();

        let descriptor = Self {
            kind,
            role,
            medium,
            n_buffers,
            data_buffer_base_addr,
            data_buffer_pitch,
            data_buffer_size,
            meta_data_base_addr,
            meta_data_pitch,
            full_flag_base_addr,
            full_flag_size,
            full_flag_pitch,
            full_flag_value,
            empty_flag_base_addr,
            empty_flag_size,
            empty_flag_pitch,
            empty_flag_value,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// 按传输介质解释描述符中的地址。
    ///
    /// 仅当 `transport` 与描述符介质都共享地址空间时得到本地句柄，
    /// 否则所有地址都被视为相对句柄。
    pub fn handles(&self, transport: Medium) -> DescriptorHandles {
        let local = transport.is_memory_shared() && self.medium.is_memory_shared();
        let wrap = |addr: u64| {
            if local {
                MemoryHandle::Local(addr)
            } else {
                MemoryHandle::Remote {
                    handle: addr,
                    medium: if self.medium.is_memory_shared() {
                        transport
                    } else {
                        self.medium
                    },
                }
            }
        };
        DescriptorHandles {
            descriptor: *self,
            data: wrap(self.data_buffer_base_addr),
            meta: wrap(self.meta_data_base_addr),
            full: wrap(self.full_flag_base_addr),
            empty: wrap(self.empty_flag_base_addr),
        }
    }
}

/// 按介质解释后的描述符地址。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DescriptorHandles {
    descriptor: Descriptors,
    data: MemoryHandle,
    meta: MemoryHandle,
    full: MemoryHandle,
    empty: MemoryHandle,
}

impl DescriptorHandles {
    /// 原始描述符。
    pub fn descriptor(&self) -> &Descriptors {
        &self.descriptor
    }

    /// 是否全部地址均可直接解引用。
    pub fn is_local(&self) -> bool {
        self.data.is_local()
            && self.meta.is_local()
            && self.full.is_local()
            && self.empty.is_local()
    }

    /// 通过映射表把远端句柄重映射为本地地址。
    ///
    /// 每个区域的完整跨度都必须落在同一映射窗口内。
    pub fn remap(&self, table: &MappingTable) -> Result<DescriptorHandles> {
        let d = &self.descriptor;
        let n = d.n_buffers;
        let resolve = |handle: MemoryHandle, pitch: u32, size: u32| -> Result<MemoryHandle> {
            if size == 0 {
                return Ok(MemoryHandle::Local(0));
            }
            let span = span_end(0, pitch, size, n).ok_or(DataplaneError::InvalidDescriptor {
                reason: "buffer addresses overflow",
            })?;
            table.resolve(handle, span).map(MemoryHandle::Local)
        };
        Ok(DescriptorHandles {
            descriptor: *d,
            data: resolve(self.data, d.data_buffer_pitch, d.data_buffer_size)?,
            meta: resolve(self.meta, d.meta_data_pitch, METADATA_SIZE)?,
            full: resolve(self.full, d.full_flag_pitch, d.full_flag_size)?,
            empty: resolve(self.empty, d.empty_flag_pitch, d.empty_flag_size)?,
        })
    }

    /// 得到地址全部可解引用的描述符；仍含远端句柄时失败。
    pub fn local(&self) -> Result<Descriptors> {
        let mut local = self.descriptor;
        local.data_buffer_base_addr = self.data.local_addr()?;
        local.meta_data_base_addr = self.meta.local_addr()?;
        local.full_flag_base_addr = self.full.local_addr()?;
        local.empty_flag_base_addr = self.empty.local_addr()?;
        Ok(local)
    }

    fn indexed(
        &self,
        what: &'static str,
        base: MemoryHandle,
        pitch: u32,
        index: u32,
    ) -> Result<MemoryHandle> {
        if index >= self.descriptor.n_buffers {
            return Err(DataplaneError::index(what, index, self.descriptor.n_buffers));
        }
        Ok(base.offset(u64::from(index) * u64::from(pitch)))
    }

    pub fn buffer(&self, index: u32) -> Result<MemoryHandle> {
        self.indexed("buffer", self.data, self.descriptor.data_buffer_pitch, index)
    }

    pub fn metadata(&self, index: u32) -> Result<MemoryHandle> {
        self.indexed("metadata", self.meta, self.descriptor.meta_data_pitch, index)
    }

    pub fn full_flag(&self, index: u32) -> Result<MemoryHandle> {
        self.indexed("full flag", self.full, self.descriptor.full_flag_pitch, index)
    }

    pub fn empty_flag(&self, index: u32) -> Result<Option<MemoryHandle>> {
        if !self.descriptor.has_empty_flag() {
            return Ok(None);
        }
        self.indexed("empty flag", self.empty, self.descriptor.empty_flag_pitch, index)
            .map(Some)
    }
}
