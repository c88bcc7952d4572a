//! 批次仓库 - 执行计划的持久化与工作项状态更新
//!
//! 批次及其快照、工作项在一个事务中整体写入，执行器永远不会
//! 看到半成品批次。批次历史只追加不删除，作为审计记录保留。

use crate::core::planner::BatchPlan;
use crate::db::models::{Batch, CopyItem, DeleteItem, FileSnapshot, RunLog, UploadItem};
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

pub struct BatchStore {
    db: Arc<SqlitePool>,
}

impl BatchStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// 持久化一个完整的执行计划，返回新批次 id
    ///
    /// 批次行、本地/远端快照、上传/删除项在同一事务中写入，
    /// 要么全部可见要么全部不存在。
    pub async fn create_batch(&self, plan: &BatchPlan) -> Result<String> {
        let batch_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.db.begin().await?;

        sqlx::query("INSERT INTO batches (id, job_id, created_at, from_cache) VALUES (?, ?, ?, ?)")
            .bind(&batch_id)
            .bind(&plan.job_id)
            .bind(now)
            .bind(plan.from_cache)
            .execute(&mut *tx)
            .await?;

        for snap in &plan.local_snapshots {
            sqlx::query(
                "INSERT INTO local_snapshots (batch_id, path, hash, size, modified_time) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&batch_id)
            .bind(&snap.path)
            .bind(&snap.hash)
            .bind(snap.size as i64)
            .bind(snap.modified_time)
            .execute(&mut *tx)
            .await?;
        }

        for snap in &plan.remote_snapshots {
            sqlx::query(
                "INSERT INTO remote_snapshots (batch_id, key, hash, size, modified_time) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&batch_id)
            .bind(&snap.path)
            .bind(&snap.hash)
            .bind(snap.size as i64)
            .bind(snap.modified_time)
            .execute(&mut *tx)
            .await?;
        }

        for up in &plan.uploads {
            sqlx::query(
                "INSERT INTO upload_items (batch_id, source_path, target_key, bucket, size, completed, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(&batch_id)
            .bind(&up.source_path)
            .bind(&up.target_key)
            .bind(&plan.bucket)
            .bind(up.size as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for del in &plan.deletes {
            sqlx::query(
                "INSERT INTO delete_items (batch_id, target_key, bucket, size, completed, updated_at) VALUES (?, ?, ?, ?, 0, ?)",
            )
            .bind(&batch_id)
            .bind(&del.target_key)
            .bind(&plan.bucket)
            .bind(del.size as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for cp in &plan.copies {
            sqlx::query(
                "INSERT INTO copy_items (batch_id, source_key, target_key, bucket, size, completed, updated_at) VALUES (?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(&batch_id)
            .bind(&cp.source_key)
            .bind(&cp.target_key)
            .bind(&plan.bucket)
            .bind(cp.size as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            "批次已创建: {} (上传 {}, 删除 {}, 本地快照 {}, 远端快照 {})",
            batch_id,
            plan.uploads.len(),
            plan.deletes.len(),
            plan.local_snapshots.len(),
            plan.remote_snapshots.len()
        );

        Ok(batch_id)
    }

    /// 读取批次
    pub async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        let batch = sqlx::query_as::<_, Batch>("SELECT * FROM batches WHERE id = ?")
            .bind(batch_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(batch)
    }

    /// 任务最近创建的批次 id
    pub async fn latest_batch_id(&self, job_id: &str) -> Result<Option<String>> {
        let id: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM batches WHERE job_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(id.map(|(id,)| id))
    }

    /// 按计划顺序取出未完成的上传项
    pub async fn pending_uploads(&self, batch_id: &str) -> Result<Vec<UploadItem>> {
        let items = sqlx::query_as::<_, UploadItem>(
            "SELECT * FROM upload_items WHERE batch_id = ? AND completed = 0 ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    /// 按计划顺序取出未完成的删除项
    pub async fn pending_deletes(&self, batch_id: &str) -> Result<Vec<DeleteItem>> {
        let items = sqlx::query_as::<_, DeleteItem>(
            "SELECT * FROM delete_items WHERE batch_id = ? AND completed = 0 ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    /// 批次的全部上传项（用于报表和测试）
    pub async fn list_uploads(&self, batch_id: &str) -> Result<Vec<UploadItem>> {
        let items = sqlx::query_as::<_, UploadItem>(
            "SELECT * FROM upload_items WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    /// 批次的全部删除项
    pub async fn list_deletes(&self, batch_id: &str) -> Result<Vec<DeleteItem>> {
        let items = sqlx::query_as::<_, DeleteItem>(
            "SELECT * FROM delete_items WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    /// 批次的全部复制项（规划器目前不生成，见 copy_items 扩展点）
    pub async fn list_copies(&self, batch_id: &str) -> Result<Vec<CopyItem>> {
        let items = sqlx::query_as::<_, CopyItem>(
            "SELECT * FROM copy_items WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    /// 批次的本地快照
    pub async fn list_local_snapshots(&self, batch_id: &str) -> Result<Vec<FileSnapshot>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT path, hash, size, modified_time FROM local_snapshots WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(path, hash, size, modified_time)| FileSnapshot {
                path,
                hash,
                size: size.max(0) as u64,
                modified_time,
            })
            .collect())
    }

    /// 批次的远端快照（缓存模式的批次为空）
    pub async fn list_remote_snapshots(&self, batch_id: &str) -> Result<Vec<FileSnapshot>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT key, hash, size, modified_time FROM remote_snapshots WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(path, hash, size, modified_time)| FileSnapshot {
                path,
                hash,
                size: size.max(0) as u64,
                modified_time,
            })
            .collect())
    }

    /// 标记上传项完成，清空历史错误
    pub async fn mark_upload_done(&self, item_id: i64) -> Result<()> {
        sqlx::query("UPDATE upload_items SET completed = 1, error = NULL, updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(item_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// 标记删除项完成，清空历史错误
    pub async fn mark_delete_done(&self, item_id: i64) -> Result<()> {
        sqlx::query("UPDATE delete_items SET completed = 1, error = NULL, updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(item_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// 向上传项追加一条带时间戳的错误记录（累积，不覆盖）
    pub async fn append_upload_error(&self, item_id: i64, message: &str) -> Result<()> {
        self.append_error("upload_items", item_id, message).await
    }

    /// 向删除项追加一条带时间戳的错误记录
    pub async fn append_delete_error(&self, item_id: i64, message: &str) -> Result<()> {
        self.append_error("delete_items", item_id, message).await
    }

    async fn append_error(&self, table: &str, item_id: i64, message: &str) -> Result<()> {
        let now = chrono::Utc::now();
        let line = format!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S"), message);
        // char(10) 为换行符，历次失败按行累积
        let sql = format!(
            "UPDATE {table} SET error = COALESCE(error || char(10), '') || ?, updated_at = ? WHERE id = ?"
        );
        sqlx::query(&sql)
            .bind(&line)
            .bind(now.timestamp())
            .bind(item_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// 追加一条执行历史
    pub async fn append_run_log(&self, log: &RunLog) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO run_logs
               (job_id, batch_id, start_time, end_time, uploads_completed, uploads_failed,
                deletes_completed, deletes_failed, bytes_uploaded, ended_by_max_runtime, error_summary)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&log.job_id)
        .bind(&log.batch_id)
        .bind(log.start_time)
        .bind(log.end_time)
        .bind(log.uploads_completed)
        .bind(log.uploads_failed)
        .bind(log.deletes_completed)
        .bind(log.deletes_failed)
        .bind(log.bytes_uploaded)
        .bind(log.ended_by_max_runtime)
        .bind(&log.error_summary)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// 任务的执行历史，新的在前
    pub async fn list_run_logs(&self, job_id: &str, limit: i64) -> Result<Vec<RunLog>> {
        let logs = sqlx::query_as::<_, RunLog>(
            "SELECT * FROM run_logs WHERE job_id = ? ORDER BY start_time DESC, id DESC LIMIT ?",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&*self.db)
        .await?;
        Ok(logs)
    }
}
