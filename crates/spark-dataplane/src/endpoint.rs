//! # endpoint 模块说明
//!
//! ## 角色定位（Why）
//! - 端点字符串标识一段可被连接双方访问的内存窗口：协议决定介质，
//!   地址区分窗口，大小约束窗口内可分配的缓冲总量；
//! - [`EndpointRegistry`] 取代全局池单例：由运行时实例构造并显式传给电路，
//!   持有每个端点的资源池、内存窗口以及远端句柄映射表。
//!
//! ## 端点格式（What）
//! `spark-<protocol>:<address>;<size>[.<mailbox>.<max_count>]`，例如 `spark-shm:node0;1048576.1.2`。
//! - `shm` / `pio` → [`Medium::SharedMemory`]
//! - `rdma` / `ofed` → [`Medium::Rdma`]
//! - `socket` / `tcp` / `udp` → [`Medium::Socket`]

use std::{collections::BTreeMap, fmt, str::FromStr};

use spark_respool::{ResourceRegistry, SharedPool};
use spin::{Mutex, RwLock};

use crate::{
    error::{DataplaneError, Result},
    memory::{MappingTable, Medium, MemoryHandle, SharedRegion},
};

const PREFIX: &str = "spark-";
/// 本地窗口之间的间隔，保证不同端点的地址互不相交，且 0 永远不是合法地址。
const WINDOW_GUARD: u64 = 0x1000;
/// 单个端点窗口的大小上限（4 GiB）。
pub const MAX_ENDPOINT_SIZE: u64 = 1 << 32;

/// 已解析的端点标识。
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EndpointId {
    protocol: String,
    medium: Medium,
    address: String,
    size: u64,
    mailbox: Option<(u16, u16)>,
}

impl EndpointId {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn medium(&self) -> Medium {
        self.medium
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 端点窗口大小（字节）。
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 邮箱编号。
    pub fn mailbox(&self) -> Option<u16> {
        self.mailbox.map(|(mailbox, _)| mailbox)
    }

    /// 邮箱总数。
    pub fn max_count(&self) -> Option<u16> {
        self.mailbox.map(|(_, max)| max)
    }

    /// 注册表键：协议与地址，不含几何信息。
    pub fn key(&self) -> String {
        format!("{PREFIX}{}:{}", self.protocol, self.address)
    }
}

fn medium_for(protocol: &str) -> Option<Medium> {
    match protocol {
        "shm" | "pio" => Some(Medium::SharedMemory),
        "rdma" | "ofed" => Some(Medium::Rdma),
        "socket" | "tcp" | "udp" => Some(Medium::Socket),
        _ => None,
    }
}

impl FromStr for EndpointId {
    type Err = DataplaneError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = |reason| DataplaneError::InvalidEndpoint {
            endpoint: raw.to_owned(),
            reason,
        };
        let body = raw
            .strip_prefix(PREFIX)
            .ok_or_else(|| invalid("missing `spark-` prefix"))?;
        let (protocol, rest) = body
            .split_once(':')
            .ok_or_else(|| invalid("missing `:` after protocol"))?;
        let medium = medium_for(protocol).ok_or_else(|| invalid("unknown protocol"))?;
        let (address, geometry) = rest
            .rsplit_once(';')
            .ok_or_else(|| invalid("missing `;<size>`"))?;
        if address.is_empty() {
            return Err(invalid("empty address"));
        }

        let mut parts = geometry.split('.');
        let size = parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| invalid("size is not a number"))?;
        if size == 0 {
            return Err(invalid("size must be non-zero"));
        }
        if size > MAX_ENDPOINT_SIZE {
            return Err(invalid("size exceeds the 4 GiB window limit"));
        }
        let mailbox = match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => None,
            (Some(mailbox), Some(max), None) => {
                let mailbox = mailbox
                    .parse::<u16>()
                    .map_err(|_| invalid("mailbox is not a number"))?;
                let max = max
                    .parse::<u16>()
                    .map_err(|_| invalid("max count is not a number"))?;
                if mailbox >= max {
                    return Err(invalid("mailbox must be below max count"));
                }
                Some((mailbox, max))
            }
            _ => return Err(invalid("expected `<size>.<mailbox>.<max_count>`")),
        };

        Ok(Self {
            protocol: protocol.to_owned(),
            medium,
            address: address.to_owned(),
            size,
            mailbox,
        })
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}:{};{}", self.protocol, self.address, self.size)?;
        if let Some((mailbox, max)) = self.mailbox {
            write!(f, ".{mailbox}.{max}")?;
        }
        Ok(())
    }
}

/// 端点在本地的资源：分配器与内存窗口。
#[derive(Clone, Debug)]
pub struct EndpointResources {
    id: EndpointId,
    pool: SharedPool,
    region: SharedRegion,
}

impl EndpointResources {
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}

/// 端点注册表。
///
/// # 教案式说明
/// - **意图 (Why)**：同一地址上的多条连接必须共享同一个分配器与内存窗口，
///   否则两个端口会拿到互相重叠的缓冲；
/// - **契约 (What)**：
///   - [`EndpointRegistry::attach`] 为 get-or-create，已存在的地址以不同大小声明时报错；
///   - 每个新窗口获得互不相交的本地基址；
///   - [`EndpointRegistry::map_remote`] 登记远端句柄窗口，供非共享介质上的描述符重映射；
/// - **实现 (How)**：资源池委托给 `spark_respool::ResourceRegistry`，窗口与映射表由 `spin::RwLock` 保护。
pub struct EndpointRegistry {
    pools: ResourceRegistry,
    endpoints: RwLock<BTreeMap<String, EndpointResources>>,
    mappings: RwLock<MappingTable>,
    next_base: Mutex<u64>,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self {
            pools: ResourceRegistry::new(),
            endpoints: RwLock::new(BTreeMap::new()),
            mappings: RwLock::new(MappingTable::new()),
            next_base: Mutex::new(WINDOW_GUARD),
        }
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或创建端点资源。
    pub fn attach(&self, id: &EndpointId) -> Result<EndpointResources> {
        let key = id.key();
        let mut endpoints = self.endpoints.write();
        if let Some(existing) = endpoints.get(&key) {
            if existing.id.size != id.size {
                return Err(DataplaneError::EndpointSizeMismatch {
                    address: key,
                    existing: existing.id.size,
                    requested: id.size,
                });
            }
            return Ok(existing.clone());
        }

        let base = {
            let mut next = self.next_base.lock();
            let base = *next;
            let span = id
                .size
                .div_ceil(WINDOW_GUARD)
                .checked_mul(WINDOW_GUARD)
                .and_then(|span| span.checked_add(WINDOW_GUARD))
                .and_then(|span| base.checked_add(span))
                .ok_or_else(|| DataplaneError::InvalidEndpoint {
                    endpoint: id.to_string(),
                    reason: "local address space exhausted",
                })?;
            *next = span;
            base
        };
        let region = SharedRegion::new(base, id.size)?;
        let pool = self.pools.register(&key, base, id.size)?;
        let resources = EndpointResources {
            id: id.clone(),
            pool,
            region,
        };
        tracing::debug!(
            endpoint.address = %key,
            endpoint.base = base,
            endpoint.size = id.size,
            "endpoint attached"
        );
        endpoints.insert(key, resources.clone());
        Ok(resources)
    }

    /// 按注册表键查询已挂载的端点。
    pub fn get(&self, id: &EndpointId) -> Option<EndpointResources> {
        self.endpoints.read().get(&id.key()).cloned()
    }

    /// 登记远端句柄映射窗口。
    pub fn map_remote(
        &self,
        medium: Medium,
        remote_base: u64,
        len: u64,
        local_base: u64,
    ) -> Result<()> {
        self.mappings
            .write()
            .map(medium, remote_base, len, local_base)?;
        tracing::debug!(
            mapping.medium = ?medium,
            mapping.remote_base = remote_base,
            mapping.len = len,
            mapping.local_base = local_base,
            "remote mapping window registered"
        );
        Ok(())
    }

    /// 通过映射表解析句柄。
    pub fn resolve(&self, handle: MemoryHandle, span: u64) -> Result<u64> {
        self.mappings.read().resolve(handle, span)
    }

    /// 在持读锁状态下访问映射表。
    pub fn with_mappings<R>(&self, f: impl FnOnce(&MappingTable) -> R) -> R {
        let mappings = self.mappings.read();
        f(&mappings)
    }

    /// 查找包含 `[addr, addr + len)` 的本地内存窗口。
    pub fn region_at(&self, addr: u64, len: u64) -> Result<SharedRegion> {
        self.endpoints
            .read()
            .values()
            .find(|res| res.region.contains(addr, len))
            .map(|res| res.region.clone())
            .ok_or(DataplaneError::RegionOutOfBounds {
                addr,
                len,
                base: 0,
                region_len: 0,
            })
    }

    /// 底层资源池注册表。
    pub fn pools(&self) -> &ResourceRegistry {
        &self.pools
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoints.read().keys().collect::<Vec<_>>())
            .field("mappings", &self.mappings.read().len())
            .finish()
    }
}
