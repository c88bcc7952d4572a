//! 备份引擎 - 规划与执行的编排入口

use crate::core::executor::{RetryPolicy, RunSummary, TransferExecutor};
use crate::core::inventory::RemoteInventory;
use crate::core::planner::BatchPlanner;
use crate::core::scanner::{ExcludeRules, LocalFileScanner};
use crate::db::models::RunLog;
use crate::db::{BackupJob, BatchStore, RemoteCacheStore};
use crate::storage::RemoteStore;
use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

/// 规划阶段的致命错误
///
/// 这些错误发生在批次可见之前，中止整个操作；执行阶段的单项
/// 失败不属于这里，它们只记录在工作项上。
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("任务不存在: {0}")]
    JobNotFound(String),
    #[error("扫描本地目录失败")]
    Scan(#[source] anyhow::Error),
    #[error("获取远端清单失败")]
    RemoteList(#[source] anyhow::Error),
    #[error("持久化批次失败")]
    Persist(#[source] anyhow::Error),
}

/// 备份引擎
pub struct BackupEngine {
    db: Arc<SqlitePool>,
    store: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
}

impl BackupEngine {
    pub fn new(db: Arc<SqlitePool>, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            db,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 规划：扫描本地、获取远端清单、差分、整体持久化为新批次
    ///
    /// 返回新批次 id。相同状态重复规划会得到空计划的批次。
    pub async fn plan(&self, job_id: &str, use_cache: bool) -> Result<String, PlanError> {
        let job = BackupJob::load(&self.db, job_id)
            .await
            .map_err(PlanError::Persist)?
            .ok_or_else(|| PlanError::JobNotFound(job_id.to_string()))?;

        info!(
            "开始规划: {} ({}), 模式: {}",
            job.name,
            job.id,
            if use_cache { "缓存" } else { "实时扫描" }
        );

        let scanner = LocalFileScanner::new(ExcludeRules::from_job(&job));
        let local = scanner
            .scan(Path::new(&job.local_root))
            .await
            .map_err(PlanError::Scan)?;

        let cache_store = RemoteCacheStore::new(self.db.clone());
        let inventory = if use_cache {
            RemoteInventory::cached(&cache_store, &job.id, &job.bucket)
                .await
                .map_err(PlanError::Persist)?
        } else {
            let inv = RemoteInventory::live(self.store.as_ref(), &job.bucket, &job.remote_prefix)
                .await
                .map_err(PlanError::RemoteList)?;
            // 实时扫描结果同时作为缓存的新基线
            cache_store
                .replace_entries(&job.id, &job.bucket, &inv.objects)
                .await
                .map_err(PlanError::Persist)?;
            inv
        };

        let plan = BatchPlanner::plan(&job, &local, &inventory);
        let batch_id = BatchStore::new(self.db.clone())
            .create_batch(&plan)
            .await
            .map_err(PlanError::Persist)?;

        info!(
            "规划完成: 批次 {} (上传 {}, 删除 {})",
            batch_id,
            plan.uploads.len(),
            plan.deletes.len()
        );

        Ok(batch_id)
    }

    /// 执行批次中全部未完成的工作项并记录执行历史
    pub async fn run(
        &self,
        job_id: &str,
        batch_id: &str,
        progress_tx: Option<mpsc::Sender<String>>,
    ) -> Result<RunSummary> {
        let job = BackupJob::load(&self.db, job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", job_id))?;

        let start_time = chrono::Utc::now().timestamp();
        let executor =
            TransferExecutor::new(self.db.clone(), self.store.clone()).with_retry(self.retry.clone());
        let summary = executor.execute(&job, batch_id, progress_tx).await?;
        let end_time = chrono::Utc::now().timestamp();

        let failed = summary.uploads_failed + summary.deletes_failed;
        let log = RunLog {
            id: 0,
            job_id: job.id.clone(),
            batch_id: batch_id.to_string(),
            start_time,
            end_time,
            uploads_completed: summary.uploads_completed as i64,
            uploads_failed: summary.uploads_failed as i64,
            deletes_completed: summary.deletes_completed as i64,
            deletes_failed: summary.deletes_failed as i64,
            bytes_uploaded: summary.bytes_uploaded as i64,
            ended_by_max_runtime: summary.ended_by_max_runtime,
            error_summary: if failed > 0 {
                Some(format!("{} 个工作项失败，详见工作项错误记录", failed))
            } else {
                None
            },
        };
        BatchStore::new(self.db.clone()).append_run_log(&log).await?;

        Ok(summary)
    }
}
