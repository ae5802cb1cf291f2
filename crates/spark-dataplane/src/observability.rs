//! 可观测性键名契约：数据面日志字段的单一事实来源。
//!
//! 教案式说明（Why）：`tracing` 宏的字段名写在调用点，此处集中列出同名常量，
//! 供日志解析、告警规则与测试断言引用，避免键名在多处漂移。
//! 契约定义（What）：键名一律为小写点分形式，按对象分组；调用点的字段名必须与此处一致。

/// 日志字段分组。
pub mod keys {
    /// 电路生命周期字段。
    pub mod circuit {
        #[doc = "电路标识，由装配层在建连时给出。"]
        pub const FIELD_ID: &str = "circuit.id";

        #[doc = "流控模式：`Push` 或 `Pull`。"]
        pub const FIELD_FLOW: &str = "circuit.flow";

        pub const FIELD_PRODUCER_RANKS: &str = "circuit.producer_ranks";

        pub const FIELD_PORT_SETS: &str = "circuit.port_sets";
    }

    /// 单次传输字段。
    pub mod transfer {
        #[doc = "消息在连接内的全局序号。"]
        pub const FIELD_SEQUENCE: &str = "transfer.sequence";

        #[doc = "本条消息写入的目标操作数。"]
        pub const FIELD_TARGETS: &str = "transfer.targets";

        #[doc = "阻塞时仍为满的目标缓冲索引。"]
        pub const FIELD_TARGET_BUFFER: &str = "transfer.target_buffer";
    }

    /// 端口定位字段。
    pub mod port {
        pub const FIELD_PORT_SET_ORDINAL: &str = "port_set.ordinal";

        pub const FIELD_RANK: &str = "port.rank";
    }

    /// 传输模板字段。
    pub mod template {
        #[doc = "模板周期，即展开的步数。"]
        pub const FIELD_PERIOD: &str = "template.period";

        pub const FIELD_PORT_SETS: &str = "template.port_sets";

        pub const FIELD_DISTRIBUTION: &str = "template.distribution";

        #[doc = "缓存未命中导致的累计构建次数。"]
        pub const FIELD_BUILDS: &str = "template.builds";
    }

    /// 端点与映射窗口字段。
    pub mod endpoint {
        #[doc = "注册表键：`spark-<协议>:<地址>`。"]
        pub const FIELD_ADDRESS: &str = "endpoint.address";

        pub const FIELD_BASE: &str = "endpoint.base";

        pub const FIELD_SIZE: &str = "endpoint.size";

        pub const FIELD_MAPPING_MEDIUM: &str = "mapping.medium";

        pub const FIELD_MAPPING_REMOTE_BASE: &str = "mapping.remote_base";

        pub const FIELD_MAPPING_LEN: &str = "mapping.len";

        pub const FIELD_MAPPING_LOCAL_BASE: &str = "mapping.local_base";
    }

    /// 描述符交换字段。
    pub mod descriptor {
        pub const FIELD_KIND: &str = "descriptor.kind";

        pub const FIELD_N_BUFFERS: &str = "descriptor.n_buffers";
    }

    /// 资源池字段，由 `spark-respool` 输出。
    pub mod pool {
        pub const FIELD_NAME: &str = "pool.name";

        pub const FIELD_LEAKED_BYTES: &str = "pool.leaked_bytes";

        pub const FIELD_LIVE_ALLOCATIONS: &str = "pool.live_allocations";

        pub const FIELD_START: &str = "pool.start";

        pub const FIELD_SIZE: &str = "pool.size";
    }

    /// 租约字段，由 `spark-respool` 输出。
    pub mod lease {
        pub const FIELD_ADDR: &str = "lease.addr";

        pub const FIELD_LEN: &str = "lease.len";
    }

    /// 错误上下文字段。
    pub mod error {
        #[doc = "稳定错误码，见 `codes`。"]
        pub const FIELD_CODE: &str = "error.code";
    }
}
