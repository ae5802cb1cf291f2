//! `pull_contract` 集成测试：拉模式数据驱动与拉模式电路。
//!
//! # 测试目标（Why）
//! - 单次检查必须每次重新读取标志与元数据，远端随时可能写入；
//! - 轮询预算耗尽时以可恢复错误返回，而不是无限自旋；
//! - 拉模式电路中生产者只在自己的缓冲上置满，消费者拉取后释放生产者缓冲。
//!
//! # 结构安排（How）
//! - 用 [`SharedRegion`] 上手工写入的数据、元数据与标志模拟远端生产者；
//! - 电路用例通过 [`Circuit::send`] 与 [`Circuit::receive`] 走完整条拉取路径。

use std::{num::NonZeroU32, thread, time::Duration};

use spark_dataplane::{
    BufferMetaData, Circuit, ConnectionMetaData, DataplaneConfig, DescriptorKind, Descriptors,
    EndpointId, EndpointRegistry, FlagPollDriver, FlowControl, FlowRole, Medium, PollBudget,
    PortRole, PortSetMetaData, PullDataDriver, PullDataInfo, PullStatus, SharedRegion,
    TransferOutcome, codes, config::PollConfig, wait_for_data,
};

const BASE: u64 = 0x1000;

fn producer_descriptor() -> Descriptors {
    Descriptors {
        kind: DescriptorKind::Producer,
        role: FlowRole::Passive,
        medium: Medium::SharedMemory,
        n_buffers: 2,
        data_buffer_base_addr: BASE,
        data_buffer_pitch: 64,
        data_buffer_size: 64,
        meta_data_base_addr: BASE + 0x100,
        meta_data_pitch: 16,
        full_flag_base_addr: BASE + 0x200,
        full_flag_size: 4,
        full_flag_pitch: 4,
        full_flag_value: 1,
        empty_flag_base_addr: BASE + 0x300,
        empty_flag_size: 4,
        empty_flag_pitch: 4,
        empty_flag_value: 1,
    }
}

fn scripted_driver() -> (SharedRegion, FlagPollDriver) {
    let region = SharedRegion::new(BASE, 0x1000).expect("region");
    let info = PullDataInfo::new(region.clone(), producer_descriptor()).expect("pull info");
    (region, FlagPollDriver::new(info))
}

/// 模拟远端生产者：先写数据与元数据，最后置满标志。
fn remote_publish(region: &SharedRegion, index: u64, data: &[u8], sequence: u32) {
    region.write_bytes(BASE + index * 64, data).expect("data");
    BufferMetaData::whole(data.len() as u32, 3, sequence)
        .write_to(region, BASE + 0x100 + index * 16)
        .expect("metadata");
    region.store_u32(BASE + 0x200 + index * 4, 1).expect("full flag");
}

#[test]
fn check_rereads_flags_each_time() {
    let (region, driver) = scripted_driver();
    assert_eq!(driver.check_buffer_empty(0, 64).expect("check"), PullStatus::Empty);

    remote_publish(&region, 0, b"hello", 11);
    let PullStatus::Ready(meta) = driver.check_buffer_empty(0, 64).expect("check") else {
        panic!("buffer 0 should be ready");
    };
    assert_eq!(meta.length, 5);
    assert_eq!(meta.sequence, 11);

    let mut out = [0u8; 64];
    let pulled = driver.pull(0, &mut out).expect("pull").expect("ready");
    assert_eq!(pulled, meta);
    assert_eq!(&out[..5], b"hello");

    driver.release(0).expect("release");
    assert_eq!(region.load_u32(BASE + 0x200).expect("full"), 0);
    assert_eq!(region.load_u32(BASE + 0x300).expect("empty"), 1);
    assert!(driver.check_buffer_empty(0, 64).expect("check").is_empty());
}

#[test]
fn oversized_remote_message_is_reported() {
    let (region, driver) = scripted_driver();
    remote_publish(&region, 1, &[7; 48], 0);
    let err = driver.check_buffer_empty(1, 16).expect_err("limit is 16 bytes");
    assert_eq!(err.code(), codes::MESSAGE_TOO_LARGE);

    let mut small = [0u8; 16];
    assert!(driver.pull(1, &mut small).is_err());
}

#[test]
fn poll_budget_bounds_the_wait() {
    let (_region, driver) = scripted_driver();
    let budget = PollBudget::Attempts(NonZeroU32::new(4).expect("non-zero"));
    let err = wait_for_data(&driver, 1, 64, budget).expect_err("nothing published");
    assert!(matches!(
        err,
        spark_dataplane::DataplaneError::PollBudgetExhausted { attempts: 4 }
    ));
    assert!(err.is_recoverable());
}

#[test]
fn poll_budget_from_config() {
    assert_eq!(
        PollBudget::from(&PollConfig { spin_attempts: 0 }),
        PollBudget::Forever
    );
    assert_eq!(
        PollBudget::from(&PollConfig::default()),
        PollBudget::Attempts(NonZeroU32::new(1024).expect("non-zero"))
    );
}

#[test]
fn forever_budget_observes_concurrent_publish() {
    let (region, driver) = scripted_driver();
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote_publish(&region, 0, b"late", 42);
    });
    let meta = wait_for_data(&driver, 0, 64, PollBudget::Forever).expect("published");
    assert_eq!(meta.sequence, 42);
    writer.join().expect("writer thread");
}

fn endpoint(raw: &str) -> EndpointId {
    raw.parse().expect("endpoint")
}

fn pull_circuit(registry: &EndpointRegistry) -> Circuit {
    let meta = ConnectionMetaData::new(
        endpoint("spark-shm:producer;65536"),
        endpoint("spark-shm:consumer;65536"),
        2,
        64,
    )
    .expect("metadata")
    .with_flow(FlowControl::Pull);
    Circuit::new("pull", meta, registry, &DataplaneConfig::default()).expect("circuit")
}

#[test]
fn pull_circuit_moves_data_on_consumer_poll() {
    let registry = EndpointRegistry::new();
    let mut circuit = pull_circuit(&registry);
    assert!(circuit.template().is_none());

    assert_eq!(
        circuit.send(0, b"pulled", 9).expect("publish"),
        TransferOutcome::Delivered {
            sequence: 0,
            targets: 1
        }
    );
    let info = circuit.pull_info(0, 0).expect("pull info");
    assert!(info.full_flag(0).expect("flag").is_raised().expect("load"));
    // 发布只动生产者自己的缓冲。
    assert!(circuit.input(0, 0).expect("input").poll().expect("poll").is_none());

    let mut out = Vec::new();
    let meta = circuit.receive(0, 0, &mut out).expect("receive").expect("ready");
    assert_eq!(out, b"pulled");
    assert_eq!(meta.opcode, 9);
    assert!(!info.full_flag(0).expect("flag").is_raised().expect("load"));
    assert!(circuit.receive(0, 0, &mut out).expect("drained").is_none());
}

#[test]
fn pull_producer_waits_for_release() {
    let registry = EndpointRegistry::new();
    let mut circuit = pull_circuit(&registry);
    circuit.send(0, b"m0", 0).expect("m0");
    circuit.send(0, b"m1", 0).expect("m1");
    assert_eq!(
        circuit.send(0, b"m2", 0).expect("m2"),
        TransferOutcome::Busy { rank: 0, buffer: 0 }
    );
    assert_eq!(circuit.sequence(), 2);

    let mut out = Vec::new();
    circuit.receive(0, 0, &mut out).expect("receive").expect("m0 ready");
    assert_eq!(out, b"m0");
    assert!(matches!(
        circuit.send(0, b"m2", 0).expect("m2"),
        TransferOutcome::Delivered { sequence: 2, .. }
    ));
    for expected in [&b"m1"[..], b"m2"] {
        circuit.receive(0, 0, &mut out).expect("receive").expect("ready");
        assert_eq!(out, expected);
    }
}

#[test]
fn pull_circuit_rejects_push_operations() {
    let registry = EndpointRegistry::new();
    let mut circuit = pull_circuit(&registry);
    let err = circuit.advance_output(0).expect_err("push only");
    assert_eq!(err.code(), codes::FLOW_CONTROL_MISMATCH);

    let extra = PortSetMetaData::new(
        PortRole::Consumer,
        vec![endpoint("spark-shm:extra;65536")],
        2,
        64,
    )
    .expect("port-set");
    let err = circuit.add_port_set(extra, &registry).expect_err("single consumer");
    assert_eq!(err.code(), codes::INVALID_TOPOLOGY);

    let budget = PollBudget::Attempts(NonZeroU32::new(3).expect("non-zero"));
    let err = circuit.wait_input(0, 0, budget).expect_err("nothing published");
    assert!(matches!(
        err,
        spark_dataplane::DataplaneError::PollBudgetExhausted { attempts: 3 }
    ));
}

#[test]
fn pull_requires_single_ranks() {
    let registry = EndpointRegistry::new();
    let meta = ConnectionMetaData::with_port_sets(
        PortSetMetaData::new(
            PortRole::Producer,
            vec![endpoint("spark-shm:producer;65536")],
            2,
            64,
        )
        .expect("producer"),
        vec![
            PortSetMetaData::new(
                PortRole::Consumer,
                vec![endpoint("spark-shm:c0;65536"), endpoint("spark-shm:c1;65536")],
                2,
                64,
            )
            .expect("consumers"),
        ],
        Default::default(),
    )
    .expect("metadata")
    .with_flow(FlowControl::Pull);
    let err = Circuit::new("wide-pull", meta, &registry, &DataplaneConfig::default())
        .expect_err("two consumer ranks");
    assert_eq!(err.code(), codes::INVALID_TOPOLOGY);

    let circuit = pull_circuit(&registry);
    assert!(circuit.pull_info(1, 0).is_err());
}
