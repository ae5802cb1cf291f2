//! # metadata 模块说明
//!
//! ## 角色定位（Why）
//! - 连接元数据描述一条端到端数据通路：一个生产 port-set、若干消费 port-set、
//!   各自的缓冲个数/大小，以及唯一的分发策略；
//! - 两种来源：本地协商（两个端点 + 缓冲几何）与远端发起（收到的描述符决定缓冲几何）。
//!
//! ## 契约（What）
//! - 构造后唯一允许的变更是 [`ConnectionMetaData::add_port_set`] 追加消费者，拓扑只增不减；
//! - 元数据拥有分发策略，分发策略拥有分区策略，析构时一并释放。

use serde::{Deserialize, Serialize};

use crate::{
    config::DataplaneConfig,
    descriptor::{DescriptorKind, Descriptors},
    distribution::DataDistribution,
    endpoint::EndpointId,
    error::{DataplaneError, Result},
    template::{PortSetShape, TopologyFingerprint},
};

/// port-set 的方向。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PortRole {
    Producer,
    Consumer,
}

/// 连接的流控模式。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// 生产者按模板把数据推入消费者缓冲并置满标志。
    #[default]
    Push,
    /// 生产者只在自己的缓冲上置满标志，消费者轮询并拉取。
    Pull,
}

/// 单个端口（rank）的元数据。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortMetaData {
    rank: u32,
    endpoint: EndpointId,
    remote: Option<Descriptors>,
}

impl PortMetaData {
    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// 远端发起时收到的描述符；本地分配的端口为 `None`。
    pub fn remote_descriptor(&self) -> Option<&Descriptors> {
        self.remote.as_ref()
    }
}

/// 一组同构端口（rank）的元数据。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortSetMetaData {
    role: PortRole,
    buffer_count: u32,
    buffer_size: u32,
    ports: Vec<PortMetaData>,
}

impl PortSetMetaData {
    /// 每个端点一个 rank，按顺序编号。
    pub fn new(
        role: PortRole,
        endpoints: Vec<EndpointId>,
        buffer_count: u32,
        buffer_size: u32,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(DataplaneError::topology("port-set needs at least one rank"));
        }
        if buffer_count == 0 || buffer_size == 0 {
            return Err(DataplaneError::topology(
                "port-set buffer count and size must be positive",
            ));
        }
        let ports = endpoints
            .into_iter()
            .zip(0u32..)
            .map(|(endpoint, rank)| PortMetaData {
                rank,
                endpoint,
                remote: None,
            })
            .collect();
        Ok(Self {
            role,
            buffer_count,
            buffer_size,
            ports,
        })
    }

    /// 由远端消费者描述符构造单 rank 消费 port-set，缓冲几何取自描述符。
    ///
    /// `endpoint` 是到达该远端所经由的本地端点，其介质决定描述符地址如何解释。
    pub fn from_descriptor(endpoint: EndpointId, descriptor: Descriptors) -> Result<Self> {
        descriptor.validate()?;
        if descriptor.kind != DescriptorKind::Consumer {
            return Err(DataplaneError::topology(
                "remote-initiated port-set requires a consumer descriptor",
            ));
        }
        Ok(Self {
            role: PortRole::Consumer,
            buffer_count: descriptor.n_buffers,
            buffer_size: descriptor.data_buffer_size,
            ports: vec![PortMetaData {
                rank: 0,
                endpoint,
                remote: Some(descriptor),
            }],
        })
    }

    pub fn role(&self) -> PortRole {
        self.role
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn ranks(&self) -> u32 {
        self.ports.len() as u32
    }

    pub fn ports(&self) -> &[PortMetaData] {
        &self.ports
    }

    pub fn shape(&self) -> PortSetShape {
        PortSetShape {
            ranks: self.ranks(),
            buffers: self.buffer_count,
            buffer_size: self.buffer_size,
        }
    }
}

/// 端到端连接元数据。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionMetaData {
    producer: PortSetMetaData,
    consumers: Vec<PortSetMetaData>,
    distribution: DataDistribution,
    flow: FlowControl,
}

impl ConnectionMetaData {
    /// 本地协商：单生产者、单消费者，两端缓冲几何一致，默认并行分发。
    pub fn new(
        producer: EndpointId,
        consumer: EndpointId,
        buffer_count: u32,
        buffer_size: u32,
    ) -> Result<Self> {
        Self::with_port_sets(
            PortSetMetaData::new(PortRole::Producer, vec![producer], buffer_count, buffer_size)?,
            vec![PortSetMetaData::new(
                PortRole::Consumer,
                vec![consumer],
                buffer_count,
                buffer_size,
            )?],
            DataDistribution::parallel(),
        )
    }

    /// 以配置中的缓冲几何进行本地协商。
    pub fn from_config(
        producer: EndpointId,
        consumer: EndpointId,
        config: &DataplaneConfig,
    ) -> Result<Self> {
        config.validate()?;
        Self::new(producer, consumer, config.buffer.count, config.buffer.size)
    }

    /// 远端发起：消费者描述符决定缓冲几何，生产者沿用同样的缓冲个数与大小。
    pub fn from_descriptor(
        producer: EndpointId,
        via: EndpointId,
        descriptor: Descriptors,
    ) -> Result<Self> {
        let consumer = PortSetMetaData::from_descriptor(via, descriptor)?;
        let producer = PortSetMetaData::new(
            PortRole::Producer,
            vec![producer],
            consumer.buffer_count,
            consumer.buffer_size,
        )?;
        Self::with_port_sets(producer, vec![consumer], DataDistribution::parallel())
    }

    /// 显式给出全部 port-set 与分发策略。
    pub fn with_port_sets(
        producer: PortSetMetaData,
        consumers: Vec<PortSetMetaData>,
        distribution: DataDistribution,
    ) -> Result<Self> {
        if producer.role != PortRole::Producer {
            return Err(DataplaneError::topology("first port-set must be a producer"));
        }
        if consumers.is_empty() {
            return Err(DataplaneError::topology("connection needs at least one consumer port-set"));
        }
        if consumers.iter().any(|ps| ps.role != PortRole::Consumer) {
            return Err(DataplaneError::topology("consumer port-set has producer role"));
        }
        Ok(Self {
            producer,
            consumers,
            distribution,
            flow: FlowControl::default(),
        })
    }

    pub fn with_flow(mut self, flow: FlowControl) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_distribution(mut self, distribution: DataDistribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// 追加一个消费 port-set，返回其序号。
    pub fn add_port_set(&mut self, port_set: PortSetMetaData) -> Result<u32> {
        if port_set.role != PortRole::Consumer {
            return Err(DataplaneError::topology("only consumer port-sets can be added"));
        }
        self.consumers.push(port_set);
        Ok(self.consumers.len() as u32 - 1)
    }

    pub fn producer(&self) -> &PortSetMetaData {
        &self.producer
    }

    pub fn consumers(&self) -> &[PortSetMetaData] {
        &self.consumers
    }

    pub fn consumer(&self, port_set: u32) -> Result<&PortSetMetaData> {
        self.consumers
            .get(port_set as usize)
            .ok_or_else(|| DataplaneError::index("port-set", port_set, self.consumers.len() as u32))
    }

    pub fn distribution(&self) -> &DataDistribution {
        &self.distribution
    }

    pub fn flow(&self) -> FlowControl {
        self.flow
    }

    /// 拓扑指纹，作为传输模板的缓存键。
    pub fn fingerprint(&self) -> TopologyFingerprint {
        TopologyFingerprint {
            distribution: self.distribution.kind(),
            sub_kind: self.distribution.metadata().sub_kind(),
            partition: self.distribution.partition().kind(),
            producer: self.producer.shape(),
            consumers: self.consumers.iter().map(PortSetMetaData::shape).collect(),
        }
    }
}
