//! 数据面配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：缓冲数量/大小、标志位取值、模板周期上限与轮询预算因部署而异，
//!   集中为一个可序列化结构，由装配层从 TOML 读取后显式传入电路构造；
//! - **契约 (What)**：所有字段都有默认值，未知字段报错；[`DataplaneConfig::from_toml_str`]
//!   在解析后执行 [`DataplaneConfig::validate`]，非法组合在建连前即被拒绝；
//! - **实现 (How)**：`serde` 派生 + `toml` 反序列化，与工作区其余配置契约一致。

use serde::{Deserialize, Serialize};

use crate::error::{DataplaneError, Result};

/// 数据面顶层配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataplaneConfig {
    pub buffer: BufferConfig,
    pub flags: FlagConfig,
    pub template: TemplateConfig,
    pub poll: PollConfig,
}

/// `[buffer]`：未由远端描述符指定时使用的本地缓冲几何。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// 每个端口的缓冲个数。
    pub count: u32,
    /// 单个缓冲的字节数。
    pub size: u32,
    /// 缓冲、元数据与标志区的分配对齐；至少为 4（标志位按 32 位字访问）。
    pub alignment: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            count: 2,
            size: 4096,
            alignment: 16,
        }
    }
}

/// `[flags]`：满/空标志位置位时写入的值。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlagConfig {
    pub full_value: u32,
    pub empty_value: u32,
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            full_value: 1,
            empty_value: 1,
        }
    }
}

/// `[template]`：传输模板构建上限。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateConfig {
    /// 单个模板允许的最大步数（周期）。
    pub max_period: u64,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self { max_period: 4096 }
    }
}

/// `[poll]`：等待标志位时的轮询预算。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// 单次等待的最大轮询次数；`0` 表示显式选择无限等待。
    pub spin_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            spin_attempts: 1024,
        }
    }
}

impl DataplaneConfig {
    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|source| DataplaneError::ConfigParse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为 TOML 文本。
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|source| DataplaneError::ConfigRender { source })
    }

    /// 校验字段组合。
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason| Err(DataplaneError::InvalidConfig { field, reason });
        if self.buffer.count == 0 {
            return invalid("buffer.count", "must be at least 1");
        }
        if self.buffer.size == 0 {
            return invalid("buffer.size", "must be at least 1");
        }
        if !self.buffer.alignment.is_power_of_two() || self.buffer.alignment < 4 {
            return invalid("buffer.alignment", "must be a power of two no smaller than 4");
        }
        if self.flags.full_value == 0 {
            return invalid("flags.full_value", "must be non-zero");
        }
        if self.flags.empty_value == 0 {
            return invalid("flags.empty_value", "must be non-zero");
        }
        if self.template.max_period == 0 {
            return invalid("template.max_period", "must be at least 1");
        }
        Ok(())
    }
}
