use serde::{Deserialize, Serialize};

/// 远端存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    S3,
}

/// 远端存储连接配置（序列化为 JSON 存入任务行）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub typ: StoreType,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// 备份任务配置
///
/// 由外部界面创建和编辑，核心引擎只读取。排除规则分三类：
/// 绝对目录路径、目录名通配模式、文件名通配模式。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub id: String,
    pub name: String,
    pub local_root: String,
    pub bucket: String,
    pub remote_prefix: String,
    pub store_config: StoreConfig,
    pub exclude_dirs: Vec<String>,
    pub exclude_dir_patterns: Vec<String>,
    pub exclude_file_patterns: Vec<String>,
    /// 单次执行的最大运行时长（秒）
    pub max_runtime_secs: u64,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 批次：一次差异计算生成的执行计划
///
/// 创建后自身字段不再变化，只有子工作项的状态会被执行器更新。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Batch {
    pub id: String,
    pub job_id: String,
    pub created_at: i64,
    /// 是否基于远端缓存（而非实时扫描）生成
    pub from_cache: bool,
}

/// 计划时的文件快照（本地文件或远端对象通用）
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub modified_time: i64,
}

/// 上传工作项
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadItem {
    pub id: i64,
    pub batch_id: String,
    pub source_path: String,
    pub target_key: String,
    pub bucket: String,
    pub size: i64,
    pub completed: bool,
    /// 累积的错误记录，每次失败追加一行带时间戳的消息
    pub error: Option<String>,
    pub updated_at: i64,
}

/// 删除工作项
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeleteItem {
    pub id: i64,
    pub batch_id: String,
    pub target_key: String,
    pub bucket: String,
    pub size: i64,
    pub completed: bool,
    pub error: Option<String>,
    pub updated_at: i64,
}

/// 远端内部复制工作项（预留的扩展点，规划器目前不生成）
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CopyItem {
    pub id: i64,
    pub batch_id: String,
    pub source_key: String,
    pub target_key: String,
    pub bucket: String,
    pub size: i64,
    pub completed: bool,
    pub error: Option<String>,
    pub updated_at: i64,
}

/// 一次执行的历史记录
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunLog {
    pub id: i64,
    pub job_id: String,
    pub batch_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub uploads_completed: i64,
    pub uploads_failed: i64,
    pub deletes_completed: i64,
    pub deletes_failed: i64,
    pub bytes_uploaded: i64,
    pub ended_by_max_runtime: bool,
    pub error_summary: Option<String>,
}

// 数据库表模型
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackupJobRow {
    pub id: String,
    pub name: String,
    pub local_root: String,
    pub bucket: String,
    pub remote_prefix: String,
    pub store_config: String,
    pub exclude_dirs: String,
    pub exclude_dir_patterns: String,
    pub exclude_file_patterns: String,
    pub max_runtime_secs: i64,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<BackupJobRow> for BackupJob {
    type Error = anyhow::Error;

    fn try_from(row: BackupJobRow) -> Result<Self, Self::Error> {
        let store_config: StoreConfig = serde_json::from_str(&row.store_config)?;
        let exclude_dirs: Vec<String> = serde_json::from_str(&row.exclude_dirs)?;
        let exclude_dir_patterns: Vec<String> = serde_json::from_str(&row.exclude_dir_patterns)?;
        let exclude_file_patterns: Vec<String> = serde_json::from_str(&row.exclude_file_patterns)?;

        Ok(BackupJob {
            id: row.id,
            name: row.name,
            local_root: row.local_root,
            bucket: row.bucket,
            remote_prefix: row.remote_prefix,
            store_config,
            exclude_dirs,
            exclude_dir_patterns,
            exclude_file_patterns,
            max_runtime_secs: row.max_runtime_secs.max(0) as u64,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
