//! # pull 模块说明
//!
//! ## 角色定位（Why）
//! - 某些介质无法向对端投递推送通知（例如裸内存映射的设备区），
//!   消费者只能直接轮询远端缓冲的满/空标志与元数据来判断数据是否就绪；
//! - 这是一条独立的流控策略，而非推模式的降级路径。
//!
//! ## 契约（What）
//! - [`PullDataDriver::check_buffer_empty`] 是单次检查：每次都重新读取标志与元数据，
//!   标志由不受本方控制的另一方随时写入；
//! - 本层只定义单次检查；[`wait_for_data`] 在其外层按 [`PollBudget`] 忙轮询，
//!   无限等待必须由调用方显式选择 [`PollBudget::Forever`]。

use std::num::NonZeroU32;

use crate::{
    config::PollConfig,
    descriptor::{DescriptorHandles, Descriptors},
    error::{DataplaneError, Result},
    flags::FlagSlot,
    memory::SharedRegion,
    meta::BufferMetaData,
    port::{CurrentBuffer, PortBuffers},
};

/// 单次检查结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PullStatus {
    /// 远端缓冲尚无数据。
    Empty,
    /// 数据就绪，附带重新读取的元数据。
    Ready(BufferMetaData),
}

impl PullStatus {
    pub fn is_empty(&self) -> bool {
        matches!(self, PullStatus::Empty)
    }
}

/// 远端源缓冲的完整描述：数据、元数据、满/空标志与对应的描述符。
#[derive(Debug)]
pub struct PullDataInfo {
    buffers: PortBuffers,
}

impl PullDataInfo {
    /// `descriptor` 中的地址必须是落在 `region` 内的本地地址。
    pub fn new(region: SharedRegion, descriptor: Descriptors) -> Result<Self> {
        Ok(Self {
            buffers: PortBuffers::attach(region, descriptor)?,
        })
    }

    /// 由已解释的句柄构造；仍含远端句柄时失败。
    pub fn from_handles(region: SharedRegion, handles: &DescriptorHandles) -> Result<Self> {
        Self::new(region, handles.local()?)
    }

    pub fn descriptor(&self) -> &Descriptors {
        self.buffers.descriptor()
    }

    pub fn region(&self) -> &SharedRegion {
        self.buffers.region()
    }

    /// 第 `index` 个远端缓冲的位置与容量。
    pub fn buffer(&self, index: u32) -> Result<CurrentBuffer> {
        self.buffers.buffer(index)
    }

    /// 第 `index` 个满标志。
    pub fn full_flag(&self, index: u32) -> Result<&FlagSlot> {
        self.buffers.full(index)
    }

    pub(crate) fn buffers(&self) -> &PortBuffers {
        &self.buffers
    }
}

/// 拉模式数据驱动。
pub trait PullDataDriver {
    /// 检查第 `index` 个远端缓冲；数据长度超过 `length` 时返回容量错误。
    fn check_buffer_empty(&self, index: u32, length: u32) -> Result<PullStatus>;

    /// 数据就绪时把其拷入 `out` 并返回元数据；尚无数据时返回 `None`。
    fn pull(&self, index: u32, out: &mut [u8]) -> Result<Option<BufferMetaData>>;

    /// 通知远端该缓冲已被消费。
    fn release(&self, index: u32) -> Result<()>;
}

/// 基于满/空标志轮询的默认驱动。
#[derive(Debug)]
pub struct FlagPollDriver {
    info: PullDataInfo,
}

impl FlagPollDriver {
    pub fn new(info: PullDataInfo) -> Self {
        Self { info }
    }

    pub fn info(&self) -> &PullDataInfo {
        &self.info
    }
}

impl PullDataDriver for FlagPollDriver {
    fn check_buffer_empty(&self, index: u32, length: u32) -> Result<PullStatus> {
        let buffers = self.info.buffers();
        if !buffers.is_full(index)? {
            return Ok(PullStatus::Empty);
        }
        let meta = buffers.metadata(index)?;
        if meta.length > length || meta.length > buffers.capacity() {
            return Err(DataplaneError::MessageTooLarge {
                length: u64::from(meta.length),
                capacity: u64::from(length.min(buffers.capacity())),
            });
        }
        Ok(PullStatus::Ready(meta))
    }

    fn pull(&self, index: u32, out: &mut [u8]) -> Result<Option<BufferMetaData>> {
        let length = u32::try_from(out.len()).unwrap_or(u32::MAX);
        let PullStatus::Ready(meta) = self.check_buffer_empty(index, length)? else {
            return Ok(None);
        };
        self.info
            .buffers()
            .read(index, 0, &mut out[..meta.length as usize])?;
        Ok(Some(meta))
    }

    fn release(&self, index: u32) -> Result<()> {
        self.info.buffers().mark_released(index)
    }
}

/// 忙轮询预算。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollBudget {
    /// 最多检查给定次数。
    Attempts(NonZeroU32),
    /// 一直等待；必须显式选择。
    Forever,
}

impl From<&PollConfig> for PollBudget {
    fn from(config: &PollConfig) -> Self {
        match NonZeroU32::new(config.spin_attempts) {
            Some(attempts) => PollBudget::Attempts(attempts),
            None => PollBudget::Forever,
        }
    }
}

impl PollBudget {
    /// 反复执行单次检查，直到得到结果或预算耗尽。
    pub fn run<T>(self, mut check: impl FnMut() -> Result<Option<T>>) -> Result<T> {
        match self {
            PollBudget::Attempts(attempts) => {
                for _ in 0..attempts.get() {
                    if let Some(value) = check()? {
                        return Ok(value);
                    }
                    core::hint::spin_loop();
                }
                Err(DataplaneError::PollBudgetExhausted {
                    attempts: attempts.get(),
                })
            }
            PollBudget::Forever => loop {
                if let Some(value) = check()? {
                    return Ok(value);
                }
                core::hint::spin_loop();
            },
        }
    }
}

/// 在预算内等待第 `index` 个远端缓冲就绪。
pub fn wait_for_data<D>(
    driver: &D,
    index: u32,
    length: u32,
    budget: PollBudget,
) -> Result<BufferMetaData>
where
    D: PullDataDriver + ?Sized,
{
    budget.run(|| {
        Ok(match driver.check_buffer_empty(index, length)? {
            PullStatus::Empty => None,
            PullStatus::Ready(meta) => Some(meta),
        })
    })
}
