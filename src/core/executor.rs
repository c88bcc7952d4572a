//! 传输执行器
//!
//! 消费批次中未完成的工作项：先按计划顺序处理全部上传，再处理
//! 全部删除。工作项只有两种持久化状态：未完成、已完成（失败的
//! 项保持未完成并累积错误记录），崩溃恢复因此就是重新执行同一
//! 批次。每处理完一项检查一次运行时长预算，超出即停止，剩余项
//! 留待下次执行。

use crate::core::scanner::calculate_hash;
use crate::db::models::{BackupJob, DeleteItem, UploadItem};
use crate::db::{BatchStore, RemoteCacheStore};
use crate::storage::{DeleteOutcome, ObjectMeta, RemoteStore};
use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 重试策略：最大重试次数与指数退避的基础延迟
///
/// 作为显式的值对象注入执行器，与具体存储 SDK 解耦。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// 第 attempt 次失败后的等待时长（attempt 从 0 计）
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            // 默认最多重试 2 次，退避 2s、4s
            max_retries: 2,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// 一次执行的结果汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub batch_id: String,
    pub uploads_attempted: u32,
    pub uploads_completed: u32,
    pub uploads_failed: u32,
    pub bytes_uploaded: u64,
    pub deletes_attempted: u32,
    pub deletes_completed: u32,
    pub deletes_failed: u32,
    pub bytes_deleted: u64,
    pub elapsed_secs: u64,
    /// 因超出最大运行时长而提前结束
    pub ended_by_max_runtime: bool,
}

/// 吞吐估算：累计传输字节与耗时，推算剩余时间
///
/// 仅用于进度提示，不参与任何控制决策。
#[derive(Debug, Default)]
struct ThroughputEstimator {
    bytes: u64,
    elapsed: Duration,
}

impl ThroughputEstimator {
    fn record(&mut self, bytes: u64, elapsed: Duration) {
        self.bytes += bytes;
        self.elapsed += elapsed;
    }

    /// 字节/秒；尚无样本时为 None
    fn rate(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if self.bytes == 0 || secs <= 0.0 {
            return None;
        }
        Some(self.bytes as f64 / secs)
    }

    fn estimate_secs(&self, bytes: u64) -> Option<u64> {
        self.rate().map(|r| (bytes as f64 / r).ceil() as u64)
    }
}

/// 进度采样：第 1、2、5、10 项，之后每 15 项一次
fn should_report(processed: u64) -> bool {
    matches!(processed, 1 | 2 | 5 | 10) || (processed > 10 && processed % 15 == 0)
}

enum ItemOutcome {
    Completed { bytes: u64 },
    Failed,
}

/// 传输执行器
pub struct TransferExecutor {
    db: Arc<SqlitePool>,
    store: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
}

impl TransferExecutor {
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

    /// 执行批次中全部未完成的工作项
    ///
    /// 单项失败只记录在该项上，不会中断批次；只有批次不存在、
    /// 数据库不可用这类环境错误才返回 Err。
    pub async fn execute(
        &self,
        job: &BackupJob,
        batch_id: &str,
        progress_tx: Option<mpsc::Sender<String>>,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let deadline = start + Duration::from_secs(job.max_runtime_secs);

        let batch_store = BatchStore::new(self.db.clone());
        let cache = RemoteCacheStore::new(self.db.clone());

        let batch = batch_store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("批次不存在: {}", batch_id))?;
        anyhow::ensure!(
            batch.job_id == job.id,
            "批次 {} 不属于任务 {}",
            batch_id,
            job.id
        );

        let uploads = batch_store.pending_uploads(batch_id).await?;
        let deletes = batch_store.pending_deletes(batch_id).await?;

        let total_items = (uploads.len() + deletes.len()) as u64;
        let mut remaining_upload_bytes: u64 =
            uploads.iter().map(|u| u.size.max(0) as u64).sum();

        info!(
            "开始执行批次 {}: 待上传 {} 项, 待删除 {} 项, 预算 {}s",
            batch_id,
            uploads.len(),
            deletes.len(),
            job.max_runtime_secs
        );

        let mut summary = RunSummary {
            batch_id: batch_id.to_string(),
            ..Default::default()
        };
        let mut estimator = ThroughputEstimator::default();
        let mut processed = 0u64;

        // 上传总是先于删除处理
        for (idx, item) in uploads.iter().enumerate() {
            if let Some(eta) = estimator.estimate_secs(item.size.max(0) as u64) {
                debug!("当前项 {} 预计耗时 {}s", item.target_key, eta);
            }

            summary.uploads_attempted += 1;
            let item_start = Instant::now();

            match self.process_upload(job, item, &batch_store, &cache).await? {
                ItemOutcome::Completed { bytes } => {
                    summary.uploads_completed += 1;
                    summary.bytes_uploaded += bytes;
                    estimator.record(bytes, item_start.elapsed());
                }
                ItemOutcome::Failed => summary.uploads_failed += 1,
            }

            remaining_upload_bytes = remaining_upload_bytes.saturating_sub(item.size.max(0) as u64);
            processed += 1;
            self.report(
                &progress_tx,
                processed,
                total_items,
                &summary,
                estimator.estimate_secs(remaining_upload_bytes),
            );

            // 预算检查只在项与项之间，进行中的传输不会被打断；
            // 没有剩余工作项时不算提前结束
            let has_remaining = idx + 1 < uploads.len() || !deletes.is_empty();
            if has_remaining && Instant::now() >= deadline {
                summary.ended_by_max_runtime = true;
                break;
            }
        }

        if !summary.ended_by_max_runtime {
            for (idx, item) in deletes.iter().enumerate() {
                summary.deletes_attempted += 1;

                match self.process_delete(job, item, &batch_store, &cache).await? {
                    ItemOutcome::Completed { bytes } => {
                        summary.deletes_completed += 1;
                        summary.bytes_deleted += bytes;
                    }
                    ItemOutcome::Failed => summary.deletes_failed += 1,
                }

                processed += 1;
                self.report(&progress_tx, processed, total_items, &summary, None);

                if idx + 1 < deletes.len() && Instant::now() >= deadline {
                    summary.ended_by_max_runtime = true;
                    break;
                }
            }
        }

        summary.elapsed_secs = start.elapsed().as_secs();

        info!(
            "批次执行结束: {} - 上传 {}/{} 成功, 删除 {}/{} 成功, {} 字节, 耗时 {}s{}",
            batch_id,
            summary.uploads_completed,
            summary.uploads_attempted,
            summary.deletes_completed,
            summary.deletes_attempted,
            summary.bytes_uploaded,
            summary.elapsed_secs,
            if summary.ended_by_max_runtime {
                " (达到最大运行时长提前结束)"
            } else {
                ""
            }
        );

        Ok(summary)
    }

    async fn process_upload(
        &self,
        job: &BackupJob,
        item: &UploadItem,
        batch_store: &BatchStore,
        cache: &RemoteCacheStore,
    ) -> Result<ItemOutcome> {
        let source = Path::new(&item.source_path);

        // 计划和执行之间源文件可能消失，这类失败不重试
        let metadata = match tokio::fs::metadata(source).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("源文件不存在，跳过: {}", item.source_path);
                batch_store
                    .append_upload_error(item.id, &format!("源文件不存在: {}", item.source_path))
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
            Err(e) => {
                warn!("源文件不可读，跳过: {} - {}", item.source_path, e);
                batch_store
                    .append_upload_error(item.id, &format!("源文件不可读: {}", e))
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
        };

        let data = match tokio::fs::read(source).await {
            Ok(d) => d,
            Err(e) => {
                warn!("读取源文件失败，跳过: {} - {}", item.source_path, e);
                batch_store
                    .append_upload_error(item.id, &format!("读取源文件失败: {}", e))
                    .await?;
                return Ok(ItemOutcome::Failed);
            }
        };

        // 以传输时刻的内容为准，而不是计划时的快照
        let hash = calculate_hash(&data);
        let size = data.len() as u64;
        let modified_time = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let meta = ObjectMeta {
            hash: hash.clone(),
            modified_time,
        };

        let mut last_error = String::new();
        for attempt in 0..=self.retry.max_retries {
            match self
                .store
                .put(&item.bucket, &item.target_key, data.clone(), &meta)
                .await
            {
                Ok(()) => {
                    batch_store.mark_upload_done(item.id).await?;
                    cache
                        .upsert(&job.id, &item.bucket, &item.target_key, &hash, size, modified_time)
                        .await?;
                    debug!("上传完成: {} -> {} ({} 字节)", item.source_path, item.target_key, size);
                    return Ok(ItemOutcome::Completed { bytes: size });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.retry.max_retries {
                        let delay = self.retry.delay(attempt);
                        warn!(
                            "上传失败，{:?} 后重试 ({}/{}): {} - {}",
                            delay,
                            attempt + 1,
                            self.retry.max_retries,
                            item.target_key,
                            last_error
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(
            "上传最终失败 (已重试{}次): {} - {}",
            self.retry.max_retries, item.target_key, last_error
        );
        batch_store
            .append_upload_error(item.id, &format!("上传失败: {}", last_error))
            .await?;
        Ok(ItemOutcome::Failed)
    }

    async fn process_delete(
        &self,
        job: &BackupJob,
        item: &DeleteItem,
        batch_store: &BatchStore,
        cache: &RemoteCacheStore,
    ) -> Result<ItemOutcome> {
        let mut last_error = String::new();
        for attempt in 0..=self.retry.max_retries {
            match self.store.delete(&item.bucket, &item.target_key).await {
                // 对象本就不存在视为成功：目标状态已经成立
                Ok(outcome) => {
                    if outcome == DeleteOutcome::NotFound {
                        debug!("删除目标已不存在: {}", item.target_key);
                    } else {
                        debug!("删除完成: {}", item.target_key);
                    }
                    batch_store.mark_delete_done(item.id).await?;
                    cache.remove(&job.id, &item.bucket, &item.target_key).await?;
                    return Ok(ItemOutcome::Completed {
                        bytes: item.size.max(0) as u64,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.retry.max_retries {
                        let delay = self.retry.delay(attempt);
                        warn!(
                            "删除失败，{:?} 后重试 ({}/{}): {} - {}",
                            delay,
                            attempt + 1,
                            self.retry.max_retries,
                            item.target_key,
                            last_error
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(
            "删除最终失败 (已重试{}次): {} - {}",
            self.retry.max_retries, item.target_key, last_error
        );
        batch_store
            .append_delete_error(item.id, &format!("删除失败: {}", last_error))
            .await?;
        Ok(ItemOutcome::Failed)
    }

    /// 发送进度消息，接收方不消费也不会阻塞传输循环
    fn report(
        &self,
        tx: &Option<mpsc::Sender<String>>,
        processed: u64,
        total: u64,
        summary: &RunSummary,
        remaining_eta_secs: Option<u64>,
    ) {
        if !should_report(processed) {
            return;
        }

        let mut msg = format!(
            "进度 {}/{}: 上传成功 {} 失败 {}, 删除成功 {} 失败 {}, 已传输 {} 字节",
            processed,
            total,
            summary.uploads_completed,
            summary.uploads_failed,
            summary.deletes_completed,
            summary.deletes_failed,
            summary.bytes_uploaded
        );
        if let Some(eta) = remaining_eta_secs {
            msg.push_str(&format!(", 预计剩余 {}s", eta));
        }

        if let Some(tx) = tx {
            let _ = tx.try_send(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay(0), Duration::from_secs(2));
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(8));
    }

    #[test]
    fn test_progress_sampling() {
        let reported: Vec<u64> = (1..=60).filter(|n| should_report(*n)).collect();
        assert_eq!(reported, vec![1, 2, 5, 10, 15, 30, 45, 60]);
    }

    #[test]
    fn test_throughput_estimator() {
        let mut est = ThroughputEstimator::default();
        assert!(est.rate().is_none());
        assert!(est.estimate_secs(1000).is_none());

        est.record(1000, Duration::from_secs(1));
        est.record(1000, Duration::from_secs(1));
        let rate = est.rate().unwrap();
        assert!((rate - 1000.0).abs() < 1.0);
        assert_eq!(est.estimate_secs(2000), Some(2));
    }
}
