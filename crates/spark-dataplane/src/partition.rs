//! # partition 模块说明
//!
//! ## 角色定位（Why）
//! - 分区策略决定“一条消息的哪些字节交给哪个 rank”，与“消息交给哪些 rank”的分发策略相互独立：
//!   分区粒度与选 rank 策略各自变化，因此单独建模；
//! - 默认的不可分割分区表示整条消息作为一个单元，此时偏移计算没有意义。
//!
//! ## 契约（What）
//! - [`PartitionKind::Indivisible`]：`calculate_buffer_offsets` 对任何输入都返回
//!   [`DataplaneError::PartitionNotApplicable`]，绝不返回零偏移；这是有意保留的契约，
//!   整消息分发的模板直接使用整缓冲拷贝，不调用偏移计算；
//! - [`PartitionKind::Block`]：长度为 `L` 的源缓冲被切为 `ceil(L / block)` 片，
//!   第 `t` 轮传输中 `R` 个 rank 里的第 `r` 个取第 `R * t + r` 片。

use crate::error::{DataplaneError, Result};

/// 分区方案。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum PartitionKind {
    /// 整条消息不可分割。
    Indivisible,
    /// 按固定字节块切分。
    Block { block_size: u32 },
}

impl PartitionKind {
    pub fn name(self) -> &'static str {
        match self {
            PartitionKind::Indivisible => "indivisible",
            PartitionKind::Block { .. } => "block",
        }
    }
}

/// 一次分片传输的偏移与长度。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BufferInfo {
    /// 源缓冲内的起始偏移。
    pub source_offset: u32,
    /// 目标缓冲内的起始偏移。
    pub target_offset: u32,
    /// 拷贝长度；0 表示本轮该 rank 无数据。
    pub length: u32,
}

/// 目标 rank 及其所在 port-set 的 rank 总数。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RankRef {
    rank: u32,
    ranks: u32,
}

impl RankRef {
    pub fn new(rank: u32, ranks: u32) -> Result<Self> {
        if rank >= ranks {
            return Err(DataplaneError::index("rank", rank, ranks));
        }
        Ok(Self { rank, ranks })
    }

    pub fn rank(self) -> u32 {
        self.rank
    }

    pub fn ranks(self) -> u32 {
        self.ranks
    }
}

/// 分区策略对象。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Partition {
    kind: PartitionKind,
}

impl Default for Partition {
    fn default() -> Self {
        Self::indivisible()
    }
}

impl Partition {
    pub fn indivisible() -> Self {
        Self {
            kind: PartitionKind::Indivisible,
        }
    }

    pub fn block(block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(DataplaneError::InvalidPartition {
                reason: "block_size must be positive",
            });
        }
        Ok(Self {
            kind: PartitionKind::Block { block_size },
        })
    }

    pub fn kind(&self) -> PartitionKind {
        self.kind
    }

    /// 计算第 `sequence` 轮传输中 `target` 应读写的偏移。
    ///
    /// 不可分割分区总是失败；块分区中超出源缓冲的分片返回长度 0。
    pub fn calculate_buffer_offsets(
        &self,
        sequence: u32,
        source_len: u32,
        target: RankRef,
    ) -> Result<BufferInfo> {
        match self.kind {
            PartitionKind::Indivisible => Err(DataplaneError::PartitionNotApplicable {
                partition: self.kind.name(),
            }),
            PartitionKind::Block { block_size } => {
                let part = u64::from(target.ranks) * u64::from(sequence) + u64::from(target.rank);
                let offset = part * u64::from(block_size);
                let len = u64::from(source_len);
                if offset >= len {
                    return Ok(BufferInfo {
                        source_offset: source_len,
                        target_offset: 0,
                        length: 0,
                    });
                }
                Ok(BufferInfo {
                    source_offset: offset as u32,
                    target_offset: 0,
                    length: (len - offset).min(u64::from(block_size)) as u32,
                })
            }
        }
    }

    /// 源缓冲被切成的片数。
    pub fn parts_count(&self, source_len: u32) -> u32 {
        match self.kind {
            PartitionKind::Indivisible => 1,
            PartitionKind::Block { block_size } => source_len.div_ceil(block_size).max(1),
        }
    }

    /// 覆盖整个源缓冲所需的传输轮数。
    pub fn transfer_count(&self, source_len: u32, ranks: u32) -> u32 {
        match self.kind {
            PartitionKind::Indivisible => 1,
            PartitionKind::Block { .. } => self.parts_count(source_len).div_ceil(ranks.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_parts_are_spread_across_ranks() {
        let partition = Partition::block(100).expect("block");
        let rank = |r| RankRef::new(r, 3).expect("rank");
        // 1000 字节 → 10 片，3 个 rank 需要 4 轮。
        assert_eq!(partition.parts_count(1000), 10);
        assert_eq!(partition.transfer_count(1000, 3), 4);
        let info = partition.calculate_buffer_offsets(1, 1000, rank(2)).expect("offsets");
        assert_eq!(info.source_offset, 500);
        assert_eq!(info.length, 100);
        // 第 4 轮只有 rank 0 拿到第 9 片。
        assert_eq!(partition.calculate_buffer_offsets(3, 1000, rank(0)).expect("last").length, 100);
        assert_eq!(partition.calculate_buffer_offsets(3, 1000, rank(1)).expect("empty").length, 0);
    }

    #[test]
    fn trailing_block_is_truncated_to_source() {
        let partition = Partition::block(64).expect("block");
        let info = partition
            .calculate_buffer_offsets(0, 100, RankRef::new(1, 2).expect("rank"))
            .expect("offsets");
        assert_eq!(info, BufferInfo { source_offset: 64, target_offset: 0, length: 36 });
    }

    #[test]
    fn zero_block_is_rejected() {
        assert!(Partition::block(0).is_err());
    }
}
