//! `log_fields_contract` 集成测试：日志字段名与 `observability::keys` 常量保持一致。
//!
//! # 测试目标（Why）
//! - 告警规则与日志解析按键名检索事件，调用点改名而常量不变会让检索静默失效；
//! - 每个常量都至少由一条真实路径输出一次。
//!
//! # 结构安排（How）
//! - 按对象分组驱动端点、电路、描述符交换与资源池路径；
//! - 断言捕获的日志中出现 `<key>=` 形式的字段。

use spark_dataplane::{
    Circuit, ConnectionMetaData, DataplaneConfig, DescriptorKind, Descriptors, EndpointId,
    EndpointRegistry, FlowRole, Medium, PortRole, PortSetMetaData, TransferOutcome,
    descriptor::WIRE_LEN, exchange::exchange, observability::keys,
};
use spark_respool::ResourceRegistry;
use tokio::io::duplex;
use tracing_test::traced_test;

fn endpoint(raw: &str) -> EndpointId {
    raw.parse().expect("endpoint")
}

fn field(key: &str) -> String {
    format!("{key}=")
}

#[traced_test]
#[test]
fn endpoint_and_mapping_events_use_registered_keys() {
    let registry = EndpointRegistry::new();
    registry
        .attach(&endpoint("spark-shm:fields;4096"))
        .expect("attach");
    registry
        .map_remote(Medium::Rdma, 0x9000_0000, 0x1000, 0x2_0000)
        .expect("map");

    for key in [
        keys::endpoint::FIELD_ADDRESS,
        keys::endpoint::FIELD_BASE,
        keys::endpoint::FIELD_SIZE,
        keys::endpoint::FIELD_MAPPING_MEDIUM,
        keys::endpoint::FIELD_MAPPING_REMOTE_BASE,
        keys::endpoint::FIELD_MAPPING_LEN,
        keys::endpoint::FIELD_MAPPING_LOCAL_BASE,
        keys::pool::FIELD_NAME,
        keys::pool::FIELD_START,
        keys::pool::FIELD_SIZE,
    ] {
        assert!(logs_contain(&field(key)), "{key}");
    }
}

#[traced_test]
#[test]
fn circuit_lifecycle_events_use_registered_keys() {
    let registry = EndpointRegistry::new();
    let meta = ConnectionMetaData::new(
        endpoint("spark-shm:fp;65536"),
        endpoint("spark-shm:fc;65536"),
        1,
        64,
    )
    .expect("metadata");
    let mut circuit =
        Circuit::new("fields", meta, &registry, &DataplaneConfig::default()).expect("circuit");
    let late = PortSetMetaData::new(
        PortRole::Consumer,
        vec![endpoint("spark-shm:late;65536")],
        1,
        64,
    )
    .expect("port-set");
    assert_eq!(circuit.add_port_set(late, &registry).expect("add"), 1);

    assert!(matches!(
        circuit.send(0, b"first", 0).expect("send"),
        TransferOutcome::Delivered { sequence: 0, .. }
    ));
    assert!(matches!(
        circuit.send(0, b"second", 0).expect("send"),
        TransferOutcome::Blocked { .. }
    ));
    drop(circuit);

    for key in [
        keys::circuit::FIELD_ID,
        keys::circuit::FIELD_FLOW,
        keys::circuit::FIELD_PRODUCER_RANKS,
        keys::circuit::FIELD_PORT_SETS,
        keys::template::FIELD_PERIOD,
        keys::template::FIELD_PORT_SETS,
        keys::template::FIELD_DISTRIBUTION,
        keys::template::FIELD_BUILDS,
        keys::transfer::FIELD_SEQUENCE,
        keys::transfer::FIELD_TARGETS,
        keys::transfer::FIELD_TARGET_BUFFER,
        keys::port::FIELD_PORT_SET_ORDINAL,
        keys::port::FIELD_RANK,
    ] {
        assert!(logs_contain(&field(key)), "{key}");
    }
}

#[traced_test]
#[test]
fn descriptor_exchange_events_use_registered_keys() {
    let descriptor = Descriptors {
        kind: DescriptorKind::Producer,
        role: FlowRole::ActiveMessage,
        medium: Medium::SharedMemory,
        n_buffers: 2,
        data_buffer_base_addr: 0x1000,
        data_buffer_pitch: 128,
        data_buffer_size: 96,
        meta_data_base_addr: 0x2000,
        meta_data_pitch: 16,
        full_flag_base_addr: 0x3000,
        full_flag_size: 4,
        full_flag_pitch: 8,
        full_flag_value: 1,
        empty_flag_base_addr: 0,
        empty_flag_size: 0,
        empty_flag_pitch: 0,
        empty_flag_value: 0,
    };
    let peer = Descriptors {
        kind: DescriptorKind::Consumer,
        ..descriptor
    };
    // 在测试线程上驱动运行时，事件落在测试 span 内。
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let (left, right) = runtime.block_on(async {
        let (mut a, mut b) = duplex(4 * WIRE_LEN);
        tokio::join!(exchange(&mut a, &descriptor), exchange(&mut b, &peer))
    });
    assert_eq!(left.expect("left"), peer);
    assert_eq!(right.expect("right"), descriptor);

    for key in [keys::descriptor::FIELD_KIND, keys::descriptor::FIELD_N_BUFFERS] {
        assert!(logs_contain(&field(key)), "{key}");
    }
}

#[traced_test]
#[test]
fn pool_and_lease_events_use_registered_keys() {
    let pools = ResourceRegistry::new();
    let pool = pools.register("fields", 0, 1024).expect("register");

    pool.lease(32, 16).expect("lease").leak();

    let stale = pool.lease(32, 16).expect("lease");
    pool.free(stale.addr()).expect("external free");
    drop(stale);

    pool.alloc(64, 16).expect("alloc");
    drop(pools);
    drop(pool);

    for key in [
        keys::pool::FIELD_NAME,
        keys::pool::FIELD_START,
        keys::pool::FIELD_LIVE_ALLOCATIONS,
        keys::pool::FIELD_LEAKED_BYTES,
        keys::lease::FIELD_ADDR,
        keys::lease::FIELD_LEN,
        keys::error::FIELD_CODE,
    ] {
        assert!(logs_contain(&field(key)), "{key}");
    }
}
