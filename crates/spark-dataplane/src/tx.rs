use std::sync::Arc;

use crate::{error::Result, metadata::ConnectionMetaData, template::TransferTemplate};

/// `TxHandler` 以拓扑指纹为键缓存传输模板。
///
/// # 教案式说明
/// - **意图 (Why)**：模板是拓扑的派生值，指纹不变时直接复用，指纹变化时整体重建，
///   不在原模板上原地修改，避免传输过程中使用到半更新的计划；
/// - **契约 (What)**：
///   - [`TxHandler::template_for`] 命中缓存时不重建，[`TxHandler::builds`] 计数不变；
///   - 构建失败时清空缓存，之后不会有任何模板可用，直到下一次成功构建；
///   - 已发出的 `Arc<TransferTemplate>` 不受后续重建影响。
#[derive(Debug)]
pub struct TxHandler {
    max_period: u64,
    cache: Option<Arc<TransferTemplate>>,
    builds: u64,
}

impl TxHandler {
    pub fn new(max_period: u64) -> Self {
        Self {
            max_period,
            cache: None,
            builds: 0,
        }
    }

    /// 返回与连接当前拓扑匹配的模板，必要时重建。
    pub fn template_for(&mut self, meta: &ConnectionMetaData) -> Result<Arc<TransferTemplate>> {
        let fingerprint = meta.fingerprint();
        if let Some(cached) = &self.cache
            && *cached.fingerprint() == fingerprint
        {
            return Ok(Arc::clone(cached));
        }
        self.cache = None;
        let template = Arc::new(TransferTemplate::build(meta, self.max_period)?);
        self.builds += 1;
        self.cache = Some(Arc::clone(&template));
        Ok(template)
    }

    /// 丢弃缓存，下一次请求必然重建。
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// 成功构建的次数。
    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn cached(&self) -> Option<&Arc<TransferTemplate>> {
        self.cache.as_ref()
    }
}
