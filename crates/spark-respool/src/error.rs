//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义资源池的失败语义，区分“可恢复的容量耗尽”和“调用方编程错误”；
//! - 每个变体都映射到稳定错误码，供上层 `spark-dataplane` 在转换后继续沿用。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`；
//! - 仅 [`PoolError::Exhausted`] 被视为可恢复（背压），其余均应快速失败。

use thiserror::Error;

/// 资源池稳定错误码。
///
/// 命名遵循 `<域>.<语义>` 约定，与 `spark-core::error::codes` 保持一致。
pub mod codes {
    /// 地址区间为空或越界。
    pub const INVALID_RANGE: &str = "respool.invalid_range";
    /// 请求零字节。
    pub const ZERO_SIZE: &str = "respool.zero_size";
    /// 对齐不是 2 的幂。
    pub const INVALID_ALIGNMENT: &str = "respool.invalid_alignment";
    /// 没有足够大的空闲区间。
    pub const EXHAUSTED: &str = "respool.exhausted";
    /// 释放了未分配或已释放的地址。
    pub const UNKNOWN_ADDRESS: &str = "respool.unknown_address";
    /// 同名资源池重复注册。
    pub const DUPLICATE_POOL: &str = "respool.duplicate_pool";
    /// 资源池未注册。
    pub const POOL_NOT_FOUND: &str = "respool.pool_not_found";
}

/// 资源池错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：让调用方按类别处置失败：`Exhausted` 可以稍后重试或视为背压，
///   其余变体说明配置或调用顺序本身有误。
/// - **契约 (What)**：分配失败时不会部分成功，也不会返回未对齐的地址；
///   释放失败时池内状态保持不变。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PoolError {
    /// 构造池时给出的区间为空，或 `start + size` 溢出。
    #[error("resource pool range is empty or overflows: start={start:#x}, size={size}")]
    InvalidRange { start: u64, size: u64 },

    /// 请求分配零字节。
    #[error("allocation of zero bytes is not permitted")]
    ZeroSize,

    /// 对齐参数为 0 或不是 2 的幂。
    #[error("alignment {alignment} is not a non-zero power of two")]
    InvalidAlignment { alignment: u64 },

    /// 不存在可容纳请求大小与对齐的空闲区间。
    #[error(
        "no free extent can hold {requested} bytes aligned to {alignment} (largest free extent: {largest_free} bytes)"
    )]
    Exhausted {
        requested: u64,
        alignment: u64,
        largest_free: u64,
    },

    /// 地址不对应任何存活的分配（重复释放或伪造地址）。
    #[error("address {addr:#x} does not name a live allocation")]
    UnknownAddress { addr: u64 },

    /// 注册表中已存在同名资源池。
    #[error("resource pool `{name}` is already registered")]
    DuplicatePool { name: String },

    /// 注册表中不存在该资源池。
    #[error("resource pool `{name}` is not registered")]
    PoolNotFound { name: String },
}

impl PoolError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::InvalidRange { .. } => codes::INVALID_RANGE,
            PoolError::ZeroSize => codes::ZERO_SIZE,
            PoolError::InvalidAlignment { .. } => codes::INVALID_ALIGNMENT,
            PoolError::Exhausted { .. } => codes::EXHAUSTED,
            PoolError::UnknownAddress { .. } => codes::UNKNOWN_ADDRESS,
            PoolError::DuplicatePool { .. } => codes::DUPLICATE_POOL,
            PoolError::PoolNotFound { .. } => codes::POOL_NOT_FOUND,
        }
    }

    /// 是否属于调用方可以本地恢复的失败（稍后重试 / 视为背压）。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }
}
