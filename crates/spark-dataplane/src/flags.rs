use crate::{
    error::{DataplaneError, Result},
    memory::SharedRegion,
};

/// 单个缓冲槽位上的满/空标志。
///
/// # 教案式说明
/// - **意图 (Why)**：生产者与消费者之间没有共享互斥锁，
///   每个缓冲槽位由一个单写者/单读者标志字替代锁；
/// - **契约 (What)**：
///   - [`FlagSlot::raise`] 以 `Release` 写入置位值，此前写入的数据与元数据对观察到标志的一方可见；
///   - [`FlagSlot::is_raised`] 每次都以 `Acquire` 重新读取，绝不缓存；
///   - [`FlagSlot::clear`] 写入 0；
/// - **实现 (How)**：构造时校验地址落在窗口内且 4 字节对齐，此后访问不再失败。
#[derive(Clone, Debug)]
pub struct FlagSlot {
    region: SharedRegion,
    addr: u64,
    value: u32,
}

impl FlagSlot {
    pub fn new(region: SharedRegion, addr: u64, value: u32) -> Result<Self> {
        if value == 0 {
            return Err(DataplaneError::InvalidDescriptor {
                reason: "flag value must be non-zero",
            });
        }
        // 越界与对齐在此一次性校验。
        region.load_u32(addr)?;
        Ok(Self {
            region,
            addr,
            value,
        })
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn raise(&self) -> Result<()> {
        self.region.store_u32(self.addr, self.value)
    }

    pub fn clear(&self) -> Result<()> {
        self.region.store_u32(self.addr, 0)
    }

    pub fn is_raised(&self) -> Result<bool> {
        Ok(self.region.load_u32(self.addr)? == self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_reflects_foreign_writes_immediately() {
        let region = SharedRegion::new(0x40, 16).expect("region");
        let flag = FlagSlot::new(region.clone(), 0x44, 1).expect("flag");
        assert!(!flag.is_raised().expect("load"));
        region.store_u32(0x44, 1).expect("foreign write");
        assert!(flag.is_raised().expect("load"));
        // 与置位值不同的写入不视为置位。
        region.store_u32(0x44, 2).expect("foreign write");
        assert!(!flag.is_raised().expect("load"));
        flag.raise().expect("raise");
        flag.clear().expect("clear");
        assert_eq!(region.load_u32(0x44).expect("load"), 0);
    }

    #[test]
    fn misplaced_flags_are_rejected_at_construction() {
        let region = SharedRegion::new(0, 8).expect("region");
        assert!(FlagSlot::new(region.clone(), 2, 1).is_err());
        assert!(FlagSlot::new(region.clone(), 8, 1).is_err());
        assert!(FlagSlot::new(region, 0, 0).is_err());
    }
}
