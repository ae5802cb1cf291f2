//! # template 模块说明
//!
//! ## 角色定位（Why）
//! - 每条消息的拷贝目标（哪个 port-set、哪个 rank、哪个目标缓冲、偏移与长度）只取决于拓扑形状，
//!   在拓扑不变时逐条重新推导是纯粹的浪费；
//! - 传输模板把一个完整周期内的全部拷贝操作预先展开成表，稳态路径只需按序号查表。
//!
//! ## 索引规则（What）
//! 设生产者有 `M` 个 rank、每个 rank `Ns` 个缓冲；某消费 port-set 有 `R` 个 rank、每个 rank `Nt` 个缓冲。
//! - 第 `g` 条消息由生产 rank `g mod M` 写在源缓冲 `(g div M) mod Ns`；
//! - 并行分发：每个 rank `r` 收到该消息的全部 `c_r` 片，第 `t` 片写入目标缓冲 `(g * c_r + t) mod Nt`；
//! - 轮转分发：只有 rank `g mod R` 收到，写入目标缓冲 `(g div R) mod Nt`；
//! - 周期为 `lcm(M * Ns, 各 port-set 的 cycle)`，并行 cycle 为 `Nt`，轮转 cycle 为 `R * Nt`。
//!
//! ## 构建顺序（How）
//! 1. 校验分发与分区的组合；
//! 2. 源缓冲记账：为每个 port-set 的每个 rank 计算分片表（块分区调用偏移计算，任何失败即终止构建）；
//! 3. 计算周期并逐步展开操作表。
//!
//! 构建失败时不会产出任何模板，半成品绝不会被用于传输。

use std::collections::BTreeSet;

use crate::{
    distribution::{DistributionKind, Routing, SequentialKind},
    error::{DataplaneError, Result},
    metadata::ConnectionMetaData,
    partition::{BufferInfo, PartitionKind, RankRef},
};

/// port-set 的形状。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PortSetShape {
    pub ranks: u32,
    pub buffers: u32,
    pub buffer_size: u32,
}

/// 拓扑指纹：缓存模板的键。
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TopologyFingerprint {
    pub distribution: DistributionKind,
    pub sub_kind: Option<SequentialKind>,
    pub partition: PartitionKind,
    pub producer: PortSetShape,
    pub consumers: Vec<PortSetShape>,
}

/// 单个拷贝操作。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TransferOp {
    pub port_set: u32,
    pub rank: u32,
    pub target_buffer: u32,
    pub source_offset: u32,
    pub target_offset: u32,
    /// 模板长度上限；实际拷贝长度还受消息长度约束。
    pub length: u32,
    /// 该片在本 rank 分片序列中的序号。
    pub part: u16,
    /// 本 rank 每条消息收到的片数。
    pub parts_per_whole: u16,
    pub end_of_whole: bool,
}

/// 一条消息对应的全部拷贝操作。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferStep {
    pub producer_rank: u32,
    pub source_buffer: u32,
    pub ops: Vec<TransferOp>,
}

/// 构建完成后不可变的传输模板。
#[derive(Clone, Debug)]
pub struct TransferTemplate {
    fingerprint: TopologyFingerprint,
    period: u64,
    steps: Vec<TransferStep>,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: u64, b: u64) -> Option<u64> {
    if a == 0 || b == 0 {
        return Some(a.max(b));
    }
    (a / gcd(a, b)).checked_mul(b)
}

impl TransferTemplate {
    /// 为连接当前拓扑构建模板。
    pub fn build(meta: &ConnectionMetaData, max_period: u64) -> Result<Self> {
        let fingerprint = meta.fingerprint();
        let distribution = meta.distribution();
        let partition = distribution.partition();
        if !distribution.supports() {
            return Err(DataplaneError::UnsupportedPattern {
                distribution: distribution.kind(),
                partition: partition.kind().name(),
            });
        }

        let producer = fingerprint.producer;
        let source_len = producer.buffer_size;
        let mut parts: Vec<Vec<Vec<BufferInfo>>> = Vec::with_capacity(fingerprint.consumers.len());
        for shape in &fingerprint.consumers {
            let per_rank = match partition.kind() {
                PartitionKind::Indivisible => vec![
                    vec![BufferInfo {
                        source_offset: 0,
                        target_offset: 0,
                        length: source_len,
                    }];
                    shape.ranks as usize
                ],
                PartitionKind::Block { block_size } => {
                    if block_size > shape.buffer_size {
                        return Err(DataplaneError::MessageTooLarge {
                            length: u64::from(block_size),
                            capacity: u64::from(shape.buffer_size),
                        });
                    }
                    let rounds = partition.transfer_count(source_len, shape.ranks);
                    let mut per_rank = Vec::with_capacity(shape.ranks as usize);
                    for rank in 0..shape.ranks {
                        let target = RankRef::new(rank, shape.ranks)?;
                        let mut rank_parts = Vec::new();
                        for round in 0..rounds {
                            let info =
                                distribution.calculate_buffer_offsets(round, source_len, target)?;
                            if info.length > 0 {
                                rank_parts.push(info);
                            }
                        }
                        if rank_parts.len() > shape.buffers as usize
                            || rank_parts.len() > usize::from(u16::MAX)
                        {
                            return Err(DataplaneError::topology(format!(
                                "rank {rank} needs {} parts per message but has {} buffers",
                                rank_parts.len(),
                                shape.buffers
                            )));
                        }
                        per_rank.push(rank_parts);
                    }
                    per_rank
                }
            };
            parts.push(per_rank);
        }

        let too_large = |period| DataplaneError::TemplatePeriodTooLarge {
            period,
            max: max_period,
        };
        let mut period = u64::from(producer.ranks)
            .checked_mul(u64::from(producer.buffers))
            .ok_or(too_large(u64::MAX))?;
        for shape in &fingerprint.consumers {
            period = lcm(period, distribution.cycle(shape.ranks, shape.buffers))
                .ok_or(too_large(u64::MAX))?;
        }
        if period == 0 || period > max_period {
            return Err(too_large(period));
        }

        let m = u64::from(producer.ranks);
        let ns = u64::from(producer.buffers);
        let mut steps = Vec::with_capacity(period as usize);
        for g in 0..period {
            let mut ops = Vec::new();
            for (index, shape) in fingerprint.consumers.iter().enumerate() {
                let nt = u64::from(shape.buffers);
                let mut push_parts = |rank: u32, first_target: u64, stride: u64| {
                    let rank_parts = &parts[index][rank as usize];
                    let count = rank_parts.len() as u16;
                    for (t, info) in rank_parts.iter().enumerate() {
                        ops.push(TransferOp {
                            port_set: index as u32,
                            rank,
                            target_buffer: ((first_target * stride + t as u64) % nt) as u32,
                            source_offset: info.source_offset,
                            target_offset: info.target_offset,
                            length: info.length,
                            part: t as u16,
                            parts_per_whole: count,
                            end_of_whole: t + 1 == rank_parts.len(),
                        });
                    }
                };
                match distribution.route(g, shape.ranks) {
                    Routing::All => {
                        for rank in 0..shape.ranks {
                            let stride = parts[index][rank as usize].len() as u64;
                            push_parts(rank, g, stride);
                        }
                    }
                    Routing::Single(rank) => push_parts(rank, g / u64::from(shape.ranks), 1),
                }
            }
            steps.push(TransferStep {
                producer_rank: (g % m) as u32,
                source_buffer: ((g / m) % ns) as u32,
                ops,
            });
        }

        tracing::debug!(
            template.period = period,
            template.port_sets = fingerprint.consumers.len(),
            template.distribution = ?fingerprint.distribution,
            "transfer template built"
        );
        Ok(Self {
            fingerprint,
            period,
            steps,
        })
    }

    /// 第 `sequence` 条消息的步骤。
    pub fn step(&self, sequence: u64) -> &TransferStep {
        &self.steps[(sequence % self.period) as usize]
    }

    pub fn steps(&self) -> &[TransferStep] {
        &self.steps
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    /// 全部 `(步序号, 操作)` 组合，用于比较两个模板是否等价。
    pub fn op_set(&self) -> BTreeSet<(u64, TransferOp)> {
        self.steps
            .iter()
            .zip(0u64..)
            .flat_map(|(step, g)| step.ops.iter().map(move |op| (g, *op)))
            .collect()
    }

    pub fn fingerprint(&self) -> &TopologyFingerprint {
        &self.fingerprint
    }

    /// 从 `sequence` 起，`(port_set, rank)` 第一次收到数据时写入的目标缓冲。
    pub fn first_target(&self, sequence: u64, port_set: u32, rank: u32) -> Option<u32> {
        (sequence..sequence + self.period).find_map(|g| {
            self.step(g)
                .ops
                .iter()
                .find(|op| op.port_set == port_set && op.rank == rank)
                .map(|op| op.target_buffer)
        })
    }
}
