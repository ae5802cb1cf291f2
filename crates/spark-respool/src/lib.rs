#![deny(unsafe_code)]
//! `spark-respool` 为数据面提供线性地址区间上的资源池分配器。
//!
//! # 模块定位（Why）
//! - 数据面的缓冲区、元数据区与标志位都位于某个端点的一段连续地址窗口内，
//!   需要一个能在该窗口内切分对齐区间的分配器；
//! - 该 crate 只负责“地址区间”的记账，不持有任何真实内存，
//!   因此同一套分配器可以服务共享内存、RDMA 注册区或设备寄存器窗口。
//!
//! # 设计概要（How）
//! - `pool` 模块实现 [`ResPool`]：best-fit 自由链表，释放时与相邻空闲区间合并；
//! - `lease` 模块实现 [`PoolLease`]：RAII 租约，`Drop` 时把区间归还给所属池；
//! - `registry` 模块实现 [`ResourceRegistry`]：显式构造、显式传递的命名池注册表，
//!   生命周期与所属运行时实例绑定，不存在进程级单例。
//!
//! # 并发约定（What）
//! - [`ResPool`] 本身不做任何同步，所有方法均要求 `&mut self`；
//! - 跨线程共享时通过 [`SharedPool`] 访问，它在每次 `alloc`/`free` 期间持有外部锁。

mod error;
mod lease;
mod pool;
mod registry;

pub use error::{PoolError, codes};
pub use lease::PoolLease;
pub use pool::{PoolStats, ResAddr, ResPool};
pub use registry::{ResourceRegistry, SharedPool};
