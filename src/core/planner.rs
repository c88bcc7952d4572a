//! 批次规划器
//!
//! 对本地扫描结果和远端清单做按 key 的集合差分，哈希相等判定
//! 交集里的对象是否需要覆盖。没有模糊匹配、没有改名检测。
//! 对相同的本地与远端状态重复规划，得到的上传和删除列表为空。

use crate::core::inventory::RemoteInventory;
use crate::core::scanner::LocalFile;
use crate::db::models::{BackupJob, FileSnapshot};
use std::collections::HashSet;
use tracing::debug;

/// 计划中的上传
#[derive(Debug, Clone)]
pub struct PlannedUpload {
    pub source_path: String,
    pub target_key: String,
    pub size: u64,
}

/// 计划中的删除
#[derive(Debug, Clone)]
pub struct PlannedDelete {
    pub target_key: String,
    pub size: u64,
}

/// 计划中的远端内部复制（预留，规划器目前不生成）
#[derive(Debug, Clone)]
pub struct PlannedCopy {
    pub source_key: String,
    pub target_key: String,
    pub size: u64,
}

/// 一次差异计算的完整结果，交给 BatchStore 整体持久化
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub job_id: String,
    pub bucket: String,
    pub from_cache: bool,
    pub local_snapshots: Vec<FileSnapshot>,
    /// 实时扫描时的远端快照，缓存模式为空
    pub remote_snapshots: Vec<FileSnapshot>,
    pub uploads: Vec<PlannedUpload>,
    pub deletes: Vec<PlannedDelete>,
    pub copies: Vec<PlannedCopy>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.deletes.is_empty() && self.copies.is_empty()
    }
}

/// 本地相对路径到远端对象 key 的映射
///
/// 纯函数：分隔符统一为 `/`，前缀拼接在前。相对路径由扫描器
/// 产出时已经去掉了本地根目录。
pub fn map_remote_key(remote_prefix: &str, rel_path: &str) -> String {
    let rel = rel_path.replace('\\', "/");
    let prefix = remote_prefix.trim_matches('/');
    if prefix.is_empty() {
        rel
    } else {
        format!("{}/{}", prefix, rel)
    }
}

/// 批次规划器
pub struct BatchPlanner;

impl BatchPlanner {
    /// 计算上传/删除工作列表
    ///
    /// - 上传：本地文件对应的 key 远端不存在，或存在但哈希不同
    /// - 删除：远端对象的 key 没有本地对应文件
    /// - 跳过：key 与哈希都一致
    pub fn plan(job: &BackupJob, local: &[LocalFile], inventory: &RemoteInventory) -> BatchPlan {
        let mut uploads = Vec::new();
        let mut local_snapshots = Vec::with_capacity(local.len());
        let mut local_keys: HashSet<String> = HashSet::with_capacity(local.len());
        let mut skipped = 0usize;

        // 扫描器输出按文件名排序，计划顺序因此稳定
        for file in local {
            let key = map_remote_key(&job.remote_prefix, &file.rel_path);

            local_snapshots.push(FileSnapshot {
                path: file.rel_path.clone(),
                hash: file.hash.clone(),
                size: file.size,
                modified_time: file.modified_time,
            });

            match inventory.objects.get(&key) {
                // 远端已有同 key 且哈希一致，无需动作
                Some(obj) if obj.hash.as_deref() == Some(file.hash.as_str()) => {
                    skipped += 1;
                }
                _ => uploads.push(PlannedUpload {
                    source_path: file.abs_path.to_string_lossy().into_owned(),
                    target_key: key.clone(),
                    size: file.size,
                }),
            }

            local_keys.insert(key);
        }

        let mut deletes: Vec<PlannedDelete> = inventory
            .objects
            .values()
            .filter(|obj| !local_keys.contains(&obj.key))
            .map(|obj| PlannedDelete {
                target_key: obj.key.clone(),
                size: obj.size,
            })
            .collect();
        deletes.sort_by(|a, b| a.target_key.cmp(&b.target_key));

        let remote_snapshots = if inventory.from_cache {
            Vec::new()
        } else {
            let mut snaps: Vec<FileSnapshot> = inventory
                .objects
                .values()
                .map(|obj| FileSnapshot {
                    path: obj.key.clone(),
                    hash: obj.hash.clone().unwrap_or_default(),
                    size: obj.size,
                    modified_time: obj.modified_time,
                })
                .collect();
            snaps.sort_by(|a, b| a.path.cmp(&b.path));
            snaps
        };

        debug!(
            "差异计算完成: 上传 {}, 删除 {}, 跳过 {}",
            uploads.len(),
            deletes.len(),
            skipped
        );

        BatchPlan {
            job_id: job.id.clone(),
            bucket: job.bucket.clone(),
            from_cache: inventory.from_cache,
            local_snapshots,
            remote_snapshots,
            uploads,
            deletes,
            copies: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{StoreConfig, StoreType};
    use crate::storage::RemoteObject;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn test_job(prefix: &str) -> BackupJob {
        BackupJob::new(
            "测试任务".to_string(),
            "/data".to_string(),
            "bkt".to_string(),
            prefix.to_string(),
            StoreConfig {
                typ: StoreType::S3,
                region: "us-east-1".to_string(),
                access_key: "ak".to_string(),
                secret_key: "sk".to_string(),
                endpoint: None,
            },
            vec![],
            vec![],
            vec![],
            3600,
        )
    }

    fn local_file(rel: &str, hash: &str, size: u64) -> LocalFile {
        LocalFile {
            abs_path: PathBuf::from("/data").join(rel),
            rel_path: rel.to_string(),
            hash: hash.to_string(),
            size,
            modified_time: 1000,
        }
    }

    fn remote_object(key: &str, hash: &str, size: u64) -> RemoteObject {
        RemoteObject {
            key: key.to_string(),
            hash: Some(hash.to_string()),
            size,
            modified_time: 1000,
        }
    }

    fn inventory(objects: Vec<RemoteObject>, from_cache: bool) -> RemoteInventory {
        let mut map = HashMap::new();
        for obj in objects {
            map.insert(obj.key.clone(), obj);
        }
        RemoteInventory {
            objects: map,
            from_cache,
        }
    }

    #[test]
    fn test_map_remote_key() {
        assert_eq!(map_remote_key("", "a/b.txt"), "a/b.txt");
        assert_eq!(map_remote_key("backup", "a/b.txt"), "backup/a/b.txt");
        assert_eq!(map_remote_key("/backup/", "a/b.txt"), "backup/a/b.txt");
        assert_eq!(map_remote_key("backup", "a\\b.txt"), "backup/a/b.txt");
    }

    #[test]
    fn test_diff_completeness() {
        let job = test_job("");
        let local = vec![local_file("new.txt", "h1", 3), local_file("same.txt", "h2", 4)];
        let inv = inventory(
            vec![remote_object("same.txt", "h2", 4), remote_object("gone.txt", "h9", 5)],
            false,
        );

        let plan = BatchPlanner::plan(&job, &local, &inv);

        assert_eq!(plan.uploads.len(), 1);
        assert_eq!(plan.uploads[0].target_key, "new.txt");
        assert_eq!(plan.deletes.len(), 1);
        assert_eq!(plan.deletes[0].target_key, "gone.txt");
        assert_eq!(plan.local_snapshots.len(), 2);
        assert_eq!(plan.remote_snapshots.len(), 2);
        assert!(plan.copies.is_empty());
    }

    #[test]
    fn test_diff_idempotent_when_unchanged() {
        let job = test_job("pre");
        let local = vec![local_file("a.txt", "h1", 3)];
        let inv = inventory(vec![remote_object("pre/a.txt", "h1", 3)], false);

        let plan = BatchPlanner::plan(&job, &local, &inv);
        assert!(plan.is_empty());

        // 状态不变时再次规划，结果仍为空
        let plan2 = BatchPlanner::plan(&job, &local, &inv);
        assert!(plan2.is_empty());
    }

    #[test]
    fn test_hash_change_triggers_reupload() {
        let job = test_job("");
        let local = vec![local_file("a.txt", "h-new", 3)];
        let inv = inventory(vec![remote_object("a.txt", "h-old", 3)], false);

        let plan = BatchPlanner::plan(&job, &local, &inv);
        assert_eq!(plan.uploads.len(), 1);
        assert_eq!(plan.uploads[0].target_key, "a.txt");
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_remote_without_hash_metadata_is_reuploaded() {
        let job = test_job("");
        let local = vec![local_file("a.txt", "h1", 3)];
        let inv = inventory(
            vec![RemoteObject {
                key: "a.txt".to_string(),
                hash: None,
                size: 3,
                modified_time: 1000,
            }],
            false,
        );

        let plan = BatchPlanner::plan(&job, &local, &inv);
        assert_eq!(plan.uploads.len(), 1);
    }

    #[test]
    fn test_cached_inventory_has_no_remote_snapshots() {
        let job = test_job("");
        let local = vec![local_file("a.txt", "h1", 3)];
        let inv = inventory(vec![remote_object("a.txt", "h1", 3)], true);

        let plan = BatchPlanner::plan(&job, &local, &inv);
        assert!(plan.from_cache);
        assert!(plan.remote_snapshots.is_empty());
        // 本地快照不受模式影响
        assert_eq!(plan.local_snapshots.len(), 1);
    }
}
