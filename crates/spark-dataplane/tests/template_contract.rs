//! `template_contract` 集成测试：传输模板的索引规则、周期与缓存。
//!
//! # 测试目标（Why）
//! - 模板是稳态路径唯一的路由依据，目标缓冲索引一旦与消费者游标失配，消费者会读到错序消息；
//! - 同一拓扑重复构建必须得到等价的操作集合，缓存命中时不得重建。
//!
//! # 结构安排（How）
//! - 固定形状（1-1、3-1、1-3、3-3）逐步核对索引公式；
//! - `proptest` 在随机形状上检查并行与轮转的全部步骤。

use std::sync::Arc;

use proptest::prelude::*;
use spark_dataplane::{
    ConnectionMetaData, DataDistribution, DistributionKind, EndpointId, Partition, PortRole,
    PortSetMetaData, TransferTemplate, TxHandler, codes,
};

fn port_set(role: PortRole, prefix: &str, ranks: u32, buffers: u32, size: u32) -> PortSetMetaData {
    let endpoints = (0..ranks)
        .map(|i| {
            format!("spark-shm:{prefix}{i};65536")
                .parse::<EndpointId>()
                .expect("endpoint")
        })
        .collect();
    PortSetMetaData::new(role, endpoints, buffers, size).expect("port-set")
}

fn connection(
    (m, ns): (u32, u32),
    consumers: &[(u32, u32)],
    distribution: DataDistribution,
) -> ConnectionMetaData {
    ConnectionMetaData::with_port_sets(
        port_set(PortRole::Producer, "p", m, ns, 64),
        consumers
            .iter()
            .enumerate()
            .map(|(i, &(r, nt))| port_set(PortRole::Consumer, &format!("c{i}-"), r, nt, 64))
            .collect(),
        distribution,
    )
    .expect("metadata")
}

#[test]
fn one_to_one_parallel_alternates_buffers() {
    let meta = connection((1, 2), &[(1, 2)], DataDistribution::parallel());
    let template = TransferTemplate::build(&meta, 4096).expect("build");
    assert_eq!(template.period(), 2);
    for g in 0..4u64 {
        let step = template.step(g);
        assert_eq!(step.producer_rank, 0);
        assert_eq!(u64::from(step.source_buffer), g % 2);
        assert_eq!(step.ops.len(), 1);
        assert_eq!(u64::from(step.ops[0].target_buffer), g % 2);
        assert_eq!(step.ops[0].length, 64);
    }
}

#[test]
fn three_producers_one_consumer() {
    let meta = connection((3, 2), &[(1, 2)], DataDistribution::parallel());
    let template = TransferTemplate::build(&meta, 4096).expect("build");
    assert_eq!(template.period(), 6);
    let producers: Vec<_> = template
        .steps()
        .iter()
        .map(|s| (s.producer_rank, s.source_buffer))
        .collect();
    assert_eq!(producers, [(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
}

#[test]
fn one_producer_three_round_robin_consumers() {
    let meta = connection((1, 2), &[(3, 2)], DataDistribution::round_robin());
    let template = TransferTemplate::build(&meta, 4096).expect("build");
    assert_eq!(template.period(), 6);
    let targets: Vec<_> = template
        .steps()
        .iter()
        .map(|s| {
            assert_eq!(s.ops.len(), 1);
            (s.ops[0].rank, s.ops[0].target_buffer)
        })
        .collect();
    assert_eq!(targets, [(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
}

#[test]
fn three_to_three_parallel_broadcasts_every_step() {
    let meta = connection((3, 2), &[(3, 2)], DataDistribution::parallel());
    let template = TransferTemplate::build(&meta, 4096).expect("build");
    assert_eq!(template.period(), 6);
    for (g, step) in (0u64..).zip(template.steps()) {
        let ranks: Vec<_> = step.ops.iter().map(|op| op.rank).collect();
        assert_eq!(ranks, [0, 1, 2]);
        assert!(step.ops.iter().all(|op| u64::from(op.target_buffer) == g % 2));
    }
}

#[test]
fn several_port_sets_share_one_period() {
    let meta = connection((1, 1), &[(1, 2), (1, 3)], DataDistribution::parallel());
    let template = TransferTemplate::build(&meta, 4096).expect("build");
    assert_eq!(template.period(), 6);
    assert_eq!(template.first_target(4, 1, 0), Some(1));
    assert_eq!(template.first_target(4, 0, 0), Some(0));
    assert_eq!(template.first_target(0, 2, 0), None);
}

#[test]
fn rebuilding_same_topology_is_idempotent() {
    let meta = connection((2, 3), &[(2, 2), (3, 1)], DataDistribution::parallel());
    let first = TransferTemplate::build(&meta, 4096).expect("first");
    let second = TransferTemplate::build(&meta, 4096).expect("second");
    assert_eq!(first.op_set(), second.op_set());
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[test]
fn period_limit_is_enforced() {
    let meta = connection((3, 2), &[(1, 2)], DataDistribution::parallel());
    let err = TransferTemplate::build(&meta, 3).expect_err("period 6 exceeds 3");
    assert!(matches!(
        err,
        spark_dataplane::DataplaneError::TemplatePeriodTooLarge { period: 6, max: 3 }
    ));
    assert_eq!(err.code(), codes::TEMPLATE_PERIOD_TOO_LARGE);
}

#[test]
fn sequential_with_block_partition_is_unsupported() {
    let distribution = DataDistribution::new(
        DistributionKind::Sequential,
        None,
        Partition::block(16).expect("block"),
    )
    .expect("distribution");
    let meta = connection((1, 2), &[(2, 2)], distribution);
    let err = TransferTemplate::build(&meta, 4096).expect_err("unsupported");
    assert_eq!(err.code(), codes::UNSUPPORTED_PATTERN);
}

#[test]
fn block_larger_than_target_buffer_fails() {
    let meta = connection(
        (1, 2),
        &[(2, 2)],
        DataDistribution::parallel_partitioned(128).expect("block"),
    );
    let err = TransferTemplate::build(&meta, 4096).expect_err("block too large");
    assert_eq!(err.code(), codes::MESSAGE_TOO_LARGE);
}

#[test]
fn too_many_parts_for_target_buffers_fails() {
    // 64 字节源缓冲切成 8 片，单 rank 需要 8 个目标缓冲。
    let meta = connection(
        (1, 1),
        &[(1, 2)],
        DataDistribution::parallel_partitioned(8).expect("block"),
    );
    let err = TransferTemplate::build(&meta, 4096).expect_err("not enough buffers");
    assert_eq!(err.code(), codes::INVALID_TOPOLOGY);
}

#[test]
fn tx_handler_caches_by_fingerprint() {
    let mut tx = TxHandler::new(4096);
    let mut meta = connection((1, 2), &[(1, 2)], DataDistribution::parallel());
    let first = tx.template_for(&meta).expect("build");
    let again = tx.template_for(&meta).expect("cached");
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(tx.builds(), 1);

    meta.add_port_set(port_set(PortRole::Consumer, "late", 2, 2, 64))
        .expect("add");
    let rebuilt = tx.template_for(&meta).expect("rebuild");
    assert_eq!(tx.builds(), 2);
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    // 已发出的模板不受重建影响。
    assert_eq!(first.fingerprint().consumers.len(), 1);

    let mut small = TxHandler::new(1);
    assert!(small.template_for(&meta).is_err());
    assert!(small.cached().is_none());
    assert_eq!(small.builds(), 0);
}

proptest! {
    #[test]
    fn parallel_steps_follow_index_formula(
        m in 1u32..4, ns in 1u32..4, r in 1u32..4, nt in 1u32..4,
    ) {
        let meta = connection((m, ns), &[(r, nt)], DataDistribution::parallel());
        let template = TransferTemplate::build(&meta, 4096).expect("build");
        let period = template.period();
        prop_assert_eq!(period % u64::from(m * ns), 0);
        prop_assert_eq!(period % u64::from(nt), 0);
        for (g, step) in (0u64..).zip(template.steps()) {
            prop_assert_eq!(u64::from(step.producer_rank), g % u64::from(m));
            prop_assert_eq!(u64::from(step.source_buffer), (g / u64::from(m)) % u64::from(ns));
            prop_assert_eq!(step.ops.len() as u32, r);
            for op in &step.ops {
                prop_assert_eq!(u64::from(op.target_buffer), g % u64::from(nt));
            }
        }
    }

    #[test]
    fn round_robin_steps_follow_index_formula(
        m in 1u32..4, ns in 1u32..4, r in 1u32..4, nt in 1u32..4,
    ) {
        let meta = connection((m, ns), &[(r, nt)], DataDistribution::round_robin());
        let template = TransferTemplate::build(&meta, 4096).expect("build");
        prop_assert_eq!(template.period() % u64::from(r * nt), 0);
        for (g, step) in (0u64..).zip(template.steps()) {
            prop_assert_eq!(step.ops.len(), 1);
            let op = step.ops[0];
            prop_assert_eq!(u64::from(op.rank), g % u64::from(r));
            prop_assert_eq!(
                u64::from(op.target_buffer),
                (g / u64::from(r)) % u64::from(nt)
            );
        }
    }
}
