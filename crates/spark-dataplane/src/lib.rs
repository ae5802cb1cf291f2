#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "spark-dataplane: 描述符驱动的零拷贝数据面传输层。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：生产者与消费者可能位于不同进程、不同主机甚至不同硬件域，无法共享互斥锁；"]
#![doc = "  数据面以“缓冲描述符 + 满/空标志位”完成可见性与流控，替代跨地址空间的锁。"]
#![doc = "- **What**：提供端点资源与描述符交换、分区与分发策略、预计算传输模板、"]
#![doc = "  推模式（模板拷贝 + 置满标志）与拉模式（轮询远端标志）两条数据路径。"]
#![doc = "- **How**：连接元数据 → 解析端点描述符 → 选择分发策略 → 构建并缓存传输模板 →"]
#![doc = "  每条消息按模板拷贝到目标缓冲并置满标志；消费者轮询标志、消费后置空。"]
#![doc = ""]
#![doc = "== 并发约定 =="]
#![doc = "- 同一 [`Circuit`] 的传输调用需由调用方串行化；"]
#![doc = "- 标志位为单写者/单读者协议，使用 `Release` 写与 `Acquire` 读，数据字在标志之前写入。"]
#![doc = ""]
#![doc = "== 带外交换 =="]
#![doc = "- [`exchange`] 在任意 `tokio` 异步字节流上收发固定长度的描述符帧。"]

pub mod circuit;
pub mod config;
pub mod descriptor;
pub mod distribution;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod flags;
pub mod memory;
pub mod meta;
pub mod metadata;
pub mod observability;
pub mod partition;
pub mod port;
pub mod pull;
pub mod template;
pub mod tx;

pub use circuit::{Circuit, SourceSlot, TransferOutcome};
pub use config::DataplaneConfig;
pub use descriptor::{DescriptorHandles, DescriptorKind, Descriptors, FlowRole};
pub use distribution::{
    DataDistribution, DataDistributionMetaData, DistributionKind, Routing, SequentialKind,
};
pub use endpoint::{EndpointId, EndpointRegistry, EndpointResources, MAX_ENDPOINT_SIZE};
pub use error::{DataplaneError, ErrorCategory, Result, codes};
pub use flags::FlagSlot;
pub use memory::{MappingTable, Medium, MemoryHandle, SharedRegion};
pub use meta::{BufferMetaData, METADATA_SIZE};
pub use metadata::{ConnectionMetaData, FlowControl, PortMetaData, PortRole, PortSetMetaData};
pub use partition::{BufferInfo, Partition, PartitionKind, RankRef};
pub use port::{CurrentBuffer, InputPort, OutputDescriptor, OutputPort};
pub use pull::{FlagPollDriver, PollBudget, PullDataDriver, PullDataInfo, PullStatus, wait_for_data};
pub use template::{PortSetShape, TopologyFingerprint, TransferOp, TransferStep, TransferTemplate};
pub use tx::TxHandler;
