//! 每个缓冲附带的元数据记录。
//!
//! 记录由四个 32 位小端字组成：
//! 1. `length`：有效数据字节数；
//! 2. `opcode | end_of_whole << 8 | parts_per_whole << 16`；
//! 3. `sequence`：消息序号（取低 32 位）；
//! 4. `part_offset`：该分片在整条消息中的字节偏移。
//!
//! 传输方在置满标志之前写入记录，消费方在观察到满标志之后读取。

use crate::{error::Result, memory::SharedRegion};

/// 元数据记录字节数。
pub const METADATA_SIZE: u32 = 16;

/// 缓冲元数据，即暴露给工作单元的“输入描述符”。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct BufferMetaData {
    pub length: u32,
    pub opcode: u8,
    /// 该分片是否为本消费者收到的最后一片。
    pub end_of_whole: bool,
    pub parts_per_whole: u16,
    pub sequence: u32,
    pub part_offset: u32,
}

impl BufferMetaData {
    /// 整条消息的元数据。
    pub fn whole(length: u32, opcode: u8, sequence: u32) -> Self {
        Self {
            length,
            opcode,
            end_of_whole: true,
            parts_per_whole: 1,
            sequence,
            part_offset: 0,
        }
    }

    pub fn to_words(&self) -> [u32; 4] {
        [
            self.length,
            u32::from(self.opcode)
                | (u32::from(self.end_of_whole) << 8)
                | (u32::from(self.parts_per_whole) << 16),
            self.sequence,
            self.part_offset,
        ]
    }

    pub fn from_words(words: [u32; 4]) -> Self {
        Self {
            length: words[0],
            opcode: (words[1] & 0xFF) as u8,
            end_of_whole: (words[1] >> 8) & 1 == 1,
            parts_per_whole: (words[1] >> 16) as u16,
            sequence: words[2],
            part_offset: words[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; METADATA_SIZE as usize] {
        let mut out = [0u8; METADATA_SIZE as usize];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.to_words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: [u8; METADATA_SIZE as usize]) -> Self {
        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_words(words)
    }

    /// 写入窗口中的元数据槽位。
    pub fn write_to(&self, region: &SharedRegion, addr: u64) -> Result<()> {
        region.write_bytes(addr, &self.to_bytes())
    }

    /// 从窗口中的元数据槽位重新读取。
    pub fn read_from(region: &SharedRegion, addr: u64) -> Result<Self> {
        let mut bytes = [0u8; METADATA_SIZE as usize];
        region.read_bytes(addr, &mut bytes)?;
        Ok(Self::from_bytes(bytes))
    }
}
