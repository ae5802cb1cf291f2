//! `distribution_contract` 集成测试：分区偏移与分发路由。
//!
//! # 测试目标（Why）
//! - 不可分割分区没有“偏移”这一概念，任何调用都必须失败而非返回伪造的整段；
//! - 块分区必须不重不漏地覆盖整个源缓冲，否则某些字节永远到不了消费者。

use proptest::prelude::*;
use spark_dataplane::{
    DataDistribution, DistributionKind, Partition, RankRef, SequentialKind, codes,
    distribution::Routing,
};

#[test]
fn parallel_routes_to_every_rank() {
    let distribution = DataDistribution::parallel();
    assert_eq!(distribution.kind(), DistributionKind::Parallel);
    assert_eq!(distribution.route(7, 4), Routing::All);
    assert_eq!(distribution.cycle(4, 3), 3);
    assert!(distribution.supports());
}

#[test]
fn round_robin_walks_ranks_in_order() {
    let distribution = DataDistribution::round_robin();
    assert_eq!(
        distribution.metadata().sub_kind(),
        Some(SequentialKind::RoundRobin)
    );
    let order: Vec<_> = (0..7).map(|g| distribution.route(g, 3)).collect();
    assert_eq!(
        order,
        [0, 1, 2, 0, 1, 2, 0].map(Routing::Single).to_vec()
    );
    assert_eq!(distribution.cycle(3, 2), 6);
}

#[test]
fn sequential_defaults_to_round_robin() {
    let distribution =
        DataDistribution::new(DistributionKind::Sequential, None, Partition::indivisible())
            .expect("sequential");
    assert_eq!(distribution, DataDistribution::round_robin());

    let err = DataDistribution::new(
        DistributionKind::Parallel,
        Some(SequentialKind::RoundRobin),
        Partition::indivisible(),
    )
    .expect_err("parallel takes no sub-kind");
    assert_eq!(err.code(), codes::INVALID_TOPOLOGY);
}

#[test]
fn block_partition_rejects_zero_block() {
    assert_eq!(
        Partition::block(0).expect_err("zero").code(),
        codes::INVALID_PARTITION
    );
    assert!(RankRef::new(3, 3).is_err());
}

proptest! {
    #[test]
    fn indivisible_offsets_always_fail(
        sequence in any::<u32>(),
        len in 1u32..1 << 20,
        ranks in 1u32..16,
        rank_seed in any::<u32>(),
    ) {
        let target = RankRef::new(rank_seed % ranks, ranks).expect("rank");
        let err = DataDistribution::parallel()
            .calculate_buffer_offsets(sequence, len, target)
            .expect_err("indivisible");
        prop_assert_eq!(err.code(), codes::PARTITION_NOT_APPLICABLE);
    }

    #[test]
    fn block_parts_cover_source_exactly_once(
        len in 1u32..4096, block in 1u32..512, ranks in 1u32..6,
    ) {
        let distribution = DataDistribution::parallel_partitioned(block).expect("block");
        let rounds = distribution.partition().transfer_count(len, ranks);
        let mut covered = vec![0u8; len as usize];
        for rank in 0..ranks {
            let target = RankRef::new(rank, ranks).expect("rank");
            for round in 0..rounds {
                let info = distribution
                    .calculate_buffer_offsets(round, len, target)
                    .expect("offsets");
                prop_assert!(info.length <= block);
                let start = info.source_offset as usize;
                for byte in &mut covered[start..start + info.length as usize] {
                    *byte += 1;
                }
            }
        }
        prop_assert!(covered.iter().all(|&count| count == 1));
    }
}
