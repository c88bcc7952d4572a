//! 远端缓存仓库
//!
//! remote_cache 表记录每个任务「远端当前有什么」的持久化认知，
//! 按 (job_id, bucket, key) 唯一。实时扫描建立基线，之后由执行器
//! 随传输成功逐条更新；全部成功执行后与真实远端状态收敛一致。

use crate::storage::RemoteObject;
use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct RemoteCacheStore {
    db: Arc<SqlitePool>,
}

impl RemoteCacheStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// 读取任务在指定 bucket 下的全部缓存条目，按 key 索引
    pub async fn get_entries(&self, job_id: &str, bucket: &str) -> Result<HashMap<String, RemoteObject>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT key, hash, size, modified_time FROM remote_cache WHERE job_id = ? AND bucket = ?",
        )
        .bind(job_id)
        .bind(bucket)
        .fetch_all(&*self.db)
        .await?;

        let mut map = HashMap::new();
        for (key, hash, size, modified_time) in rows {
            map.insert(
                key.clone(),
                RemoteObject {
                    key,
                    hash: Some(hash),
                    size: size.max(0) as u64,
                    modified_time,
                },
            );
        }
        Ok(map)
    }

    /// 更新或插入单个缓存条目
    pub async fn upsert(
        &self,
        job_id: &str,
        bucket: &str,
        key: &str,
        hash: &str,
        size: u64,
        modified_time: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO remote_cache (job_id, bucket, key, hash, size, modified_time, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(job_id, bucket, key) DO UPDATE SET
                   hash = excluded.hash,
                   size = excluded.size,
                   modified_time = excluded.modified_time,
                   updated_at = excluded.updated_at"#,
        )
        .bind(job_id)
        .bind(bucket)
        .bind(key)
        .bind(hash)
        .bind(size as i64)
        .bind(modified_time)
        .bind(chrono::Utc::now().timestamp())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// 移除单个缓存条目（对象已不在远端）
    pub async fn remove(&self, job_id: &str, bucket: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM remote_cache WHERE job_id = ? AND bucket = ? AND key = ?")
            .bind(job_id)
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// 用一次实时扫描的结果整体重建任务的缓存
    pub async fn replace_entries(
        &self,
        job_id: &str,
        bucket: &str,
        objects: &HashMap<String, RemoteObject>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM remote_cache WHERE job_id = ? AND bucket = ?")
            .bind(job_id)
            .bind(bucket)
            .execute(&mut *tx)
            .await?;

        for obj in objects.values() {
            sqlx::query(
                "INSERT INTO remote_cache (job_id, bucket, key, hash, size, modified_time, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(job_id)
            .bind(bucket)
            .bind(&obj.key)
            .bind(obj.hash.as_deref().unwrap_or(""))
            .bind(obj.size as i64)
            .bind(obj.modified_time)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("远端缓存已重建: job={}, {} 个条目", job_id, objects.len());
        Ok(())
    }

    /// 清空任务的全部缓存
    pub async fn clear_job(&self, job_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM remote_cache WHERE job_id = ?")
            .bind(job_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
