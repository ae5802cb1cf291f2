//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总数据面传输层的全部失败语义，并按处置方式划分为四个类别：
//!   容量耗尽（可恢复的背压）、拓扑/协议错误（快速失败）、缓冲容量错误（显式报告给工作单元）、
//!   传输介质错误（建连失败，不留下半可用的电路）；
//! - 每个变体都携带稳定错误码，供装配层决定中止整条流水线还是隔离出错的连接。
//!
//! ## 设计要求（What）
//! - 派生 `thiserror::Error`，上下文以结构化字段承载；
//! - `code()` 返回 `dataplane.*` 形式的稳定标识；资源池错误保留原始 `respool.*` 码；
//! - [`DataplaneError::is_recoverable`] 仅对 [`ErrorCategory::ResourceExhausted`] 返回 `true`。

use std::{collections::TryReserveError, io};

use spark_respool::PoolError;
use thiserror::Error;

use crate::{distribution::DistributionKind, memory::Medium, metadata::FlowControl};

/// 数据面统一返回别名。
pub type Result<T, E = DataplaneError> = core::result::Result<T, E>;

/// 数据面稳定错误码。
pub mod codes {
    pub const INVALID_ENDPOINT: &str = "dataplane.endpoint.invalid";
    pub const ENDPOINT_SIZE_MISMATCH: &str = "dataplane.endpoint.size_mismatch";
    pub const INVALID_DESCRIPTOR: &str = "dataplane.descriptor.invalid";
    pub const DESCRIPTOR_NOT_DEREFERENCEABLE: &str = "dataplane.descriptor.not_dereferenceable";
    pub const UNMAPPED_HANDLE: &str = "dataplane.memory.unmapped_handle";
    pub const MAPPING_OVERLAP: &str = "dataplane.memory.mapping_overlap";
    pub const INDEX_OUT_OF_RANGE: &str = "dataplane.index_out_of_range";
    pub const REGION_OUT_OF_BOUNDS: &str = "dataplane.memory.out_of_bounds";
    pub const MISALIGNED_ACCESS: &str = "dataplane.memory.misaligned";
    pub const REGION_ALLOCATION: &str = "dataplane.memory.allocation_failed";
    pub const PARTITION_NOT_APPLICABLE: &str = "dataplane.partition.not_applicable";
    pub const INVALID_PARTITION: &str = "dataplane.partition.invalid";
    pub const UNSUPPORTED_PATTERN: &str = "dataplane.template.unsupported_pattern";
    pub const INVALID_TOPOLOGY: &str = "dataplane.topology.invalid";
    pub const TEMPLATE_PERIOD_TOO_LARGE: &str = "dataplane.template.period_too_large";
    pub const FLOW_CONTROL_MISMATCH: &str = "dataplane.flow.mismatch";
    pub const OUT_OF_ORDER_TRANSFER: &str = "dataplane.transfer.out_of_order";
    pub const OUTPUT_NOT_SET: &str = "dataplane.transfer.output_not_set";
    pub const BUFFER_NOT_READY: &str = "dataplane.buffer.not_ready";
    pub const MESSAGE_TOO_LARGE: &str = "dataplane.buffer.message_too_large";
    pub const POLL_BUDGET_EXHAUSTED: &str = "dataplane.poll.budget_exhausted";
    pub const EXCHANGE_IO: &str = "dataplane.exchange.io";
    pub const EXCHANGE_FRAME: &str = "dataplane.exchange.frame";
    pub const EXCHANGE_REJECTED: &str = "dataplane.exchange.rejected";
    pub const CONFIG_PARSE: &str = "dataplane.config.parse";
    pub const CONFIG_RENDER: &str = "dataplane.config.render";
    pub const INVALID_CONFIG: &str = "dataplane.config.invalid";
}

/// 错误类别，决定调用方的处置策略。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// 资源暂时不足，可稍后重试或视为背压。
    ResourceExhausted,
    /// 编程、配置或协议错误，应快速失败并携带诊断信息。
    Topology,
    /// 消息超过目标缓冲容量，作为显式错误返回给工作单元，绝不截断。
    Capacity,
    /// 描述符交换或建连失败。
    Medium,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::ResourceExhausted => "resource_exhausted",
            ErrorCategory::Topology => "topology",
            ErrorCategory::Capacity => "capacity",
            ErrorCategory::Medium => "medium",
        }
    }
}

/// 数据面错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把容量、拓扑、介质三类截然不同的失败放进同一个枚举，
///   让 `?` 能够跨模块传播，同时保留足以定位问题的上下文；
/// - **契约 (What)**：任何返回错误的操作都不会留下“部分生效”的状态，
///   例如传输在确认全部目标可写之前不会拷贝任何字节；
/// - **执行逻辑 (How)**：[`DataplaneError::category`] 按变体映射类别，
///   [`DataplaneError::code`] 给出稳定码，资源池错误通过 `From` 原样包裹。
#[derive(Debug, Error)]
pub enum DataplaneError {
    /// 资源池操作失败（分配耗尽、重复释放等）。
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("endpoint `{endpoint}` is invalid: {reason}")]
    InvalidEndpoint {
        endpoint: String,
        reason: &'static str,
    },

    /// 同一端点地址以不同大小再次声明。
    #[error("endpoint address `{address}` already attached with {existing} bytes, requested {requested}")]
    EndpointSizeMismatch {
        address: String,
        existing: u64,
        requested: u64,
    },

    #[error("descriptor rejected: {reason}")]
    InvalidDescriptor { reason: &'static str },

    /// 试图直接解引用非共享地址空间介质上的句柄。
    #[error("handle carried over {medium:?} is not directly dereferenceable; remap it first")]
    DescriptorNotDereferenceable { medium: Medium },

    #[error("remote handle {handle:#x} over {medium:?} has no mapping window")]
    UnmappedHandle { handle: u64, medium: Medium },

    #[error("mapping window at {remote_base:#x} over {medium:?} overlaps an existing window")]
    MappingOverlap { medium: Medium, remote_base: u64 },

    #[error("{what} index {index} is out of range (count {count})")]
    IndexOutOfRange {
        what: &'static str,
        index: u64,
        count: u64,
    },

    #[error("access [{addr:#x}, +{len}) falls outside region [{base:#x}, +{region_len})")]
    RegionOutOfBounds {
        addr: u64,
        len: u64,
        base: u64,
        region_len: u64,
    },

    #[error("flag access at {addr:#x} is not word aligned")]
    MisalignedAccess { addr: u64 },

    /// 端点窗口的底层存储无法分配。
    #[error("memory window of {len} bytes could not be allocated")]
    RegionAllocation {
        len: u64,
        #[source]
        source: TryReserveError,
    },

    /// 不可分割分区（整消息分发）上请求偏移计算。
    #[error("offset calculation is not applicable to the {partition} partition")]
    PartitionNotApplicable { partition: &'static str },

    #[error("partition parameters are invalid: {reason}")]
    InvalidPartition { reason: &'static str },

    #[error("{distribution:?} distribution does not support the {partition} partition")]
    UnsupportedPattern {
        distribution: DistributionKind,
        partition: &'static str,
    },

    #[error("invalid topology: {reason}")]
    InvalidTopology { reason: String },

    #[error("transfer template period {period} exceeds the configured maximum {max}")]
    TemplatePeriodTooLarge { period: u64, max: u64 },

    #[error("operation requires {expected:?} flow control but the connection uses {actual:?}")]
    FlowControlMismatch {
        expected: FlowControl,
        actual: FlowControl,
    },

    /// 生产者按错误的轮次提交缓冲。
    #[error(
        "out-of-order transfer: expected rank {expected_rank} buffer {expected_buffer}, got rank {rank} buffer {buffer}"
    )]
    OutOfOrderTransfer {
        expected_rank: u32,
        expected_buffer: u32,
        rank: u32,
        buffer: u32,
    },

    #[error("output port rank {rank} has no pending output descriptor")]
    OutputNotSet { rank: u32 },

    #[error("buffer {buffer} of port-set {port_set} rank {rank} holds no data")]
    BufferNotReady { port_set: u32, rank: u32, buffer: u32 },

    /// 消息长度超过目标缓冲容量。
    #[error("message of {length} bytes does not fit a buffer of {capacity} bytes")]
    MessageTooLarge { length: u64, capacity: u64 },

    #[error("no data observed after {attempts} poll attempts")]
    PollBudgetExhausted { attempts: u32 },

    #[error("descriptor exchange failed while {stage}")]
    Exchange {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("descriptor exchange frame declares {length} bytes")]
    ExchangeFrame { length: u32 },

    #[error("peer sent an unusable descriptor")]
    ExchangeRejected {
        #[source]
        source: Box<DataplaneError>,
    },

    #[error("configuration could not be parsed")]
    ConfigParse {
        #[source]
        source: toml::de::Error,
    },

    #[error("configuration could not be rendered as TOML")]
    ConfigRender {
        #[source]
        source: toml::ser::Error,
    },

    #[error("configuration field `{field}` is invalid: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: &'static str,
    },
}

impl DataplaneError {
    pub(crate) fn topology(reason: impl Into<String>) -> Self {
        DataplaneError::InvalidTopology {
            reason: reason.into(),
        }
    }

    pub(crate) fn index(what: &'static str, index: impl Into<u64>, count: impl Into<u64>) -> Self {
        DataplaneError::IndexOutOfRange {
            what,
            index: index.into(),
            count: count.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DataplaneError::Pool(err) => err.code(),
            DataplaneError::InvalidEndpoint { .. } => codes::INVALID_ENDPOINT,
            DataplaneError::EndpointSizeMismatch { .. } => codes::ENDPOINT_SIZE_MISMATCH,
            DataplaneError::InvalidDescriptor { .. } => codes::INVALID_DESCRIPTOR,
            DataplaneError::DescriptorNotDereferenceable { .. } => {
                codes::DESCRIPTOR_NOT_DEREFERENCEABLE
            }
            DataplaneError::UnmappedHandle { .. } => codes::UNMAPPED_HANDLE,
            DataplaneError::MappingOverlap { .. } => codes::MAPPING_OVERLAP,
            DataplaneError::IndexOutOfRange { .. } => codes::INDEX_OUT_OF_RANGE,
            DataplaneError::RegionOutOfBounds { .. } => codes::REGION_OUT_OF_BOUNDS,
            DataplaneError::MisalignedAccess { .. } => codes::MISALIGNED_ACCESS,
            DataplaneError::RegionAllocation { .. } => codes::REGION_ALLOCATION,
            DataplaneError::PartitionNotApplicable { .. } => codes::PARTITION_NOT_APPLICABLE,
            DataplaneError::InvalidPartition { .. } => codes::INVALID_PARTITION,
            DataplaneError::UnsupportedPattern { .. } => codes::UNSUPPORTED_PATTERN,
            DataplaneError::InvalidTopology { .. } => codes::INVALID_TOPOLOGY,
            DataplaneError::TemplatePeriodTooLarge { .. } => codes::TEMPLATE_PERIOD_TOO_LARGE,
            DataplaneError::FlowControlMismatch { .. } => codes::FLOW_CONTROL_MISMATCH,
            DataplaneError::OutOfOrderTransfer { .. } => codes::OUT_OF_ORDER_TRANSFER,
            DataplaneError::OutputNotSet { .. } => codes::OUTPUT_NOT_SET,
            DataplaneError::BufferNotReady { .. } => codes::BUFFER_NOT_READY,
            DataplaneError::MessageTooLarge { .. } => codes::MESSAGE_TOO_LARGE,
            DataplaneError::PollBudgetExhausted { .. } => codes::POLL_BUDGET_EXHAUSTED,
            DataplaneError::Exchange { .. } => codes::EXCHANGE_IO,
            DataplaneError::ExchangeFrame { .. } => codes::EXCHANGE_FRAME,
            DataplaneError::ExchangeRejected { .. } => codes::EXCHANGE_REJECTED,
            DataplaneError::ConfigParse { .. } => codes::CONFIG_PARSE,
            DataplaneError::ConfigRender { .. } => codes::CONFIG_RENDER,
            DataplaneError::InvalidConfig { .. } => codes::INVALID_CONFIG,
        }
    }

    /// 返回错误类别。
    pub fn category(&self) -> ErrorCategory {
        match self {
            DataplaneError::Pool(err) if err.is_recoverable() => ErrorCategory::ResourceExhausted,
            DataplaneError::PollBudgetExhausted { .. }
            | DataplaneError::RegionAllocation { .. } => ErrorCategory::ResourceExhausted,
            DataplaneError::MessageTooLarge { .. } => ErrorCategory::Capacity,
            DataplaneError::Exchange { .. }
            | DataplaneError::ExchangeFrame { .. }
            | DataplaneError::ExchangeRejected { .. } => ErrorCategory::Medium,
            _ => ErrorCategory::Topology,
        }
    }

    /// 是否可由调用方本地恢复。
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::ResourceExhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_keep_their_code_and_category() {
        let exhausted: DataplaneError = PoolError::Exhausted {
            requested: 64,
            alignment: 16,
            largest_free: 0,
        }
        .into();
        assert_eq!(exhausted.code(), spark_respool::codes::EXHAUSTED);
        assert!(exhausted.is_recoverable());

        let double_free: DataplaneError = PoolError::UnknownAddress { addr: 8 }.into();
        assert_eq!(double_free.category(), ErrorCategory::Topology);
    }

    #[test]
    fn config_render_keeps_serializer_error_as_source() {
        use std::error::Error as _;

        // 顶层非表的值无法写成 TOML 文档。
        let source = toml::to_string(&1u32).expect_err("bare integer");
        let err = DataplaneError::ConfigRender { source };
        assert_eq!(err.code(), codes::CONFIG_RENDER);
        assert_eq!(err.category(), ErrorCategory::Topology);
        assert!(err.source().is_some());
    }

    #[test]
    fn exchange_failures_are_medium_errors() {
        let err = DataplaneError::Exchange {
            stage: "reading frame length",
            source: io::Error::from(io::ErrorKind::UnexpectedEof),
        };
        assert_eq!(err.category(), ErrorCategory::Medium);
        assert_eq!(err.category().as_str(), "medium");
        assert!(!err.is_recoverable());
    }
}
