pub mod batch;
pub mod cache;
pub mod models;

pub use batch::BatchStore;
pub use cache::RemoteCacheStore;
pub use models::*;

use anyhow::Result;
pub use sqlx::SqlitePool;

impl BackupJob {
    /// 从数据库加载所有任务
    pub async fn load_all(pool: &SqlitePool) -> Result<Vec<BackupJob>> {
        let rows =
            sqlx::query_as::<_, BackupJobRow>("SELECT * FROM backup_jobs ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.try_into()?);
        }
        Ok(jobs)
    }

    /// 从数据库加载单个任务
    pub async fn load(pool: &SqlitePool, id: &str) -> Result<Option<BackupJob>> {
        let row = sqlx::query_as::<_, BackupJobRow>("SELECT * FROM backup_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    /// 保存到数据库
    pub async fn save(&self, pool: &SqlitePool) -> Result<()> {
        let store_config = serde_json::to_string(&self.store_config)?;
        let exclude_dirs = serde_json::to_string(&self.exclude_dirs)?;
        let exclude_dir_patterns = serde_json::to_string(&self.exclude_dir_patterns)?;
        let exclude_file_patterns = serde_json::to_string(&self.exclude_file_patterns)?;

        sqlx::query(
            r#"
            INSERT INTO backup_jobs (id, name, local_root, bucket, remote_prefix, store_config,
                exclude_dirs, exclude_dir_patterns, exclude_file_patterns,
                max_runtime_secs, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                local_root = excluded.local_root,
                bucket = excluded.bucket,
                remote_prefix = excluded.remote_prefix,
                store_config = excluded.store_config,
                exclude_dirs = excluded.exclude_dirs,
                exclude_dir_patterns = excluded.exclude_dir_patterns,
                exclude_file_patterns = excluded.exclude_file_patterns,
                max_runtime_secs = excluded.max_runtime_secs,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.local_root)
        .bind(&self.bucket)
        .bind(&self.remote_prefix)
        .bind(&store_config)
        .bind(&exclude_dirs)
        .bind(&exclude_dir_patterns)
        .bind(&exclude_file_patterns)
        .bind(self.max_runtime_secs as i64)
        .bind(self.enabled)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// 从数据库删除
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM backup_jobs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// 创建新任务
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        local_root: String,
        bucket: String,
        remote_prefix: String,
        store_config: StoreConfig,
        exclude_dirs: Vec<String>,
        exclude_dir_patterns: Vec<String>,
        exclude_file_patterns: Vec<String>,
        max_runtime_secs: u64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            local_root,
            bucket,
            remote_prefix,
            store_config,
            exclude_dirs,
            exclude_dir_patterns,
            exclude_file_patterns,
            max_runtime_secs,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}
