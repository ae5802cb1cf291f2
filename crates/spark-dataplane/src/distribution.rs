//! # distribution 模块说明
//!
//! ## 角色定位（Why）
//! - 分发策略描述消息流如何铺到一个消费 port-set 的各 rank 上：
//!   并行（每个 rank 收到同一条完整消息，即广播）或顺序（各 rank 分担消息流）；
//! - 策略在建连时确定，电路生命周期内不再变化。
//!
//! ## 设计要点（How）
//! - 以 [`DistributionKind`] 标签 + 静态策略表分派，而非继承层次：
//!   表项提供 `route`（第 `g` 条消息交给哪些 rank）、`cycle`（目标缓冲索引的重复周期）、
//!   `supports`（可搭配的分区方案）三个函数；
//! - [`SequentialKind`] 仅对顺序分发有意义，并行分发时为 `None`。

use crate::{
    error::{DataplaneError, Result},
    partition::{BufferInfo, Partition, PartitionKind, RankRef},
};

/// 分发类型。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DistributionKind {
    Parallel,
    Sequential,
}

/// 顺序分发的子类型。
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SequentialKind {
    /// 相邻的完整消息轮流交给各 rank。
    RoundRobin,
}

/// 单条消息的 rank 选择结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Routing {
    /// 交给全部 rank。
    All,
    /// 只交给指定 rank。
    Single(u32),
}

struct Strategy {
    route: fn(sequence: u64, ranks: u32) -> Routing,
    cycle: fn(ranks: u32, target_buffers: u32) -> u64,
    supports: fn(PartitionKind) -> bool,
}

// 以 `DistributionKind as usize` 索引。
static STRATEGIES: [Strategy; 2] = [
    Strategy {
        route: |_, _| Routing::All,
        cycle: |_, target_buffers| u64::from(target_buffers),
        supports: |_| true,
    },
    Strategy {
        route: |sequence, ranks| Routing::Single((sequence % u64::from(ranks.max(1))) as u32),
        cycle: |ranks, target_buffers| u64::from(ranks) * u64::from(target_buffers),
        supports: |partition| matches!(partition, PartitionKind::Indivisible),
    },
];

/// 分发元数据：类型、子类型与所拥有的分区策略。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DataDistributionMetaData {
    kind: DistributionKind,
    sub_kind: Option<SequentialKind>,
    partition: Partition,
}

impl DataDistributionMetaData {
    pub fn kind(&self) -> DistributionKind {
        self.kind
    }

    pub fn sub_kind(&self) -> Option<SequentialKind> {
        self.sub_kind
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }
}

/// 连接的分发策略。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DataDistribution {
    meta: DataDistributionMetaData,
}

impl Default for DataDistribution {
    fn default() -> Self {
        Self::parallel()
    }
}

impl DataDistribution {
    /// 广播整条消息。
    pub fn parallel() -> Self {
        Self {
            meta: DataDistributionMetaData {
                kind: DistributionKind::Parallel,
                sub_kind: None,
                partition: Partition::indivisible(),
            },
        }
    }

    /// 按块把每条消息切分到各 rank。
    pub fn parallel_partitioned(block_size: u32) -> Result<Self> {
        Ok(Self {
            meta: DataDistributionMetaData {
                kind: DistributionKind::Parallel,
                sub_kind: None,
                partition: Partition::block(block_size)?,
            },
        })
    }

    /// 整条消息轮流交给各 rank。
    pub fn round_robin() -> Self {
        Self {
            meta: DataDistributionMetaData {
                kind: DistributionKind::Sequential,
                sub_kind: Some(SequentialKind::RoundRobin),
                partition: Partition::indivisible(),
            },
        }
    }

    /// 通用构造。
    ///
    /// 并行分发不接受子类型；顺序分发未给出子类型时取轮转。
    /// 分区与分发的组合是否可用在构建传输模板时检查。
    pub fn new(
        kind: DistributionKind,
        sub_kind: Option<SequentialKind>,
        partition: Partition,
    ) -> Result<Self> {
        let sub_kind = match (kind, sub_kind) {
            (DistributionKind::Parallel, None) => None,
            (DistributionKind::Parallel, Some(_)) => {
                return Err(DataplaneError::topology(
                    "parallel distribution takes no sequential sub-kind",
                ));
            }
            (DistributionKind::Sequential, sub) => Some(sub.unwrap_or(SequentialKind::RoundRobin)),
        };
        Ok(Self {
            meta: DataDistributionMetaData {
                kind,
                sub_kind,
                partition,
            },
        })
    }

    pub fn metadata(&self) -> &DataDistributionMetaData {
        &self.meta
    }

    pub fn kind(&self) -> DistributionKind {
        self.meta.kind
    }

    pub fn partition(&self) -> &Partition {
        &self.meta.partition
    }

    fn strategy(&self) -> &'static Strategy {
        &STRATEGIES[self.meta.kind as usize]
    }

    /// 第 `sequence` 条消息交给哪些 rank。
    pub fn route(&self, sequence: u64, ranks: u32) -> Routing {
        (self.strategy().route)(sequence, ranks)
    }

    /// 目标缓冲索引随消息序号重复的周期。
    pub fn cycle(&self, ranks: u32, target_buffers: u32) -> u64 {
        (self.strategy().cycle)(ranks, target_buffers)
    }

    /// 该分发能否与当前分区搭配。
    pub fn supports(&self) -> bool {
        (self.strategy().supports)(self.meta.partition.kind())
    }

    /// 委托分区策略计算偏移。
    pub fn calculate_buffer_offsets(
        &self,
        sequence: u32,
        source_len: u32,
        target: RankRef,
    ) -> Result<BufferInfo> {
        self.meta
            .partition
            .calculate_buffer_offsets(sequence, source_len, target)
    }
}
