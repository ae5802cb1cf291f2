use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use spark_dataplane::{
    Circuit, ConnectionMetaData, DataDistribution, DataplaneConfig, EndpointId, EndpointRegistry,
    PortRole, PortSetMetaData, TransferTemplate,
};

fn port_set(role: PortRole, prefix: &str, ranks: u32, buffers: u32) -> PortSetMetaData {
    let endpoints = (0..ranks)
        .map(|i| {
            format!("spark-shm:{prefix}{i};1048576")
                .parse::<EndpointId>()
                .expect("endpoint")
        })
        .collect();
    PortSetMetaData::new(role, endpoints, buffers, 4096).expect("port-set")
}

/// 比较模板整体重建与稳态查表的成本。
///
/// # 设计目的（Why）
/// - 模板缓存的价值取决于构建成本与逐条查表成本之间的差距，这里给出同一拓扑下两者的量级。
///
/// # 执行逻辑（How）
/// - `template_build`：4 个生产 rank、两个消费 port-set 的拓扑整体展开一次；
/// - `template_step`：在已构建模板上按序号查表；
/// - `push_roundtrip`：1-1 推模式电路上一次发送加一次接收，包含 4 KiB 拷贝。
fn bench_template(c: &mut Criterion) {
    let meta = ConnectionMetaData::with_port_sets(
        port_set(PortRole::Producer, "p", 4, 4),
        vec![
            port_set(PortRole::Consumer, "a", 3, 4),
            port_set(PortRole::Consumer, "b", 2, 3),
        ],
        DataDistribution::parallel(),
    )
    .expect("metadata");

    c.bench_function("template_build", |b| {
        b.iter(|| TransferTemplate::build(black_box(&meta), 4096).expect("build"))
    });

    let template = TransferTemplate::build(&meta, 4096).expect("build");
    let mut sequence = 0u64;
    c.bench_function("template_step", |b| {
        b.iter(|| {
            sequence = sequence.wrapping_add(1);
            black_box(template.step(black_box(sequence)).ops.len())
        })
    });

    let registry = EndpointRegistry::new();
    let meta = ConnectionMetaData::new(
        "spark-shm:bench-p;1048576".parse().expect("endpoint"),
        "spark-shm:bench-c;1048576".parse().expect("endpoint"),
        2,
        4096,
    )
    .expect("metadata");
    let mut circuit =
        Circuit::new("bench", meta, &registry, &DataplaneConfig::default()).expect("circuit");
    let payload = vec![0x5a; 4096];
    let mut out = Vec::with_capacity(4096);
    c.bench_function("push_roundtrip", |b| {
        b.iter(|| {
            circuit.send(0, black_box(&payload), 0).expect("send");
            circuit.receive(0, 0, &mut out).expect("receive")
        })
    });
}

criterion_group!(dataplane_benches, bench_template);
criterion_main!(dataplane_benches);
