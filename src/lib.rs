use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod core;
pub mod db;
pub mod logging;
pub mod storage;

pub use config::EngineConfig;
pub use core::{BackupEngine, PlanError, RetryPolicy, RunSummary, TransferExecutor};
pub use db::models::{BackupJob, StoreConfig, StoreType};

/// 应用状态：数据库连接池与配置目录
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub config_dir: PathBuf,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir()
            .map(|p| p.join("backuptools"))
            .unwrap_or_else(|| PathBuf::from(".backuptools"));

        std::fs::create_dir_all(&config_dir)?;

        // 初始化数据库（带连接池配置）
        let db_path = config_dir.join("backuptools.db");
        // Windows 路径需要转换反斜杠为正斜杠
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
            .replace('\\', "/");

        let db = SqlitePoolOptions::new()
            .max_connections(5) // SQLite 单文件，不需要太多连接
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
            .await?;

        // 运行数据库迁移
        sqlx::migrate!("./migrations").run(&db).await?;

        Ok(Self {
            db: Arc::new(db),
            config_dir,
        })
    }

    /// 清理资源（应用退出时调用）
    pub async fn cleanup(&self) {
        tracing::debug!("关闭数据库连接池...");
        self.db.close().await;
    }
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }
}
