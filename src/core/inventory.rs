//! 远端清单
//!
//! 规划前需要知道「远端现在有什么」，来源有两种：
//! 实时模式逐对象列出并读回元数据（结果同时作为批次的远端快照），
//! 缓存模式直接读 remote_cache 表，省掉远端列表的开销。

use crate::db::RemoteCacheStore;
use crate::storage::{RemoteObject, RemoteStore};
use anyhow::Result;
use std::collections::HashMap;
use tracing::info;

/// 某次规划使用的远端对象集合
#[derive(Debug, Clone)]
pub struct RemoteInventory {
    /// 按对象 key 索引
    pub objects: HashMap<String, RemoteObject>,
    /// 是否来自缓存而非实时扫描
    pub from_cache: bool,
}

impl RemoteInventory {
    /// 实时模式：枚举前缀下的全部对象
    pub async fn live(store: &dyn RemoteStore, bucket: &str, prefix: &str) -> Result<Self> {
        let listed = store.list(bucket, prefix).await?;
        let mut objects = HashMap::with_capacity(listed.len());
        for obj in listed {
            objects.insert(obj.key.clone(), obj);
        }

        info!(
            "实时扫描远端完成: {} ({} 个对象, 前缀 {:?})",
            store.name(),
            objects.len(),
            prefix
        );

        Ok(Self {
            objects,
            from_cache: false,
        })
    }

    /// 缓存模式：读取任务的 remote_cache 条目
    pub async fn cached(cache: &RemoteCacheStore, job_id: &str, bucket: &str) -> Result<Self> {
        let objects = cache.get_entries(job_id, bucket).await?;

        info!("从缓存加载远端清单: {} 个对象", objects.len());

        Ok(Self {
            objects,
            from_cache: true,
        })
    }
}
