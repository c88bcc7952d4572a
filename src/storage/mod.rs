pub mod s3;

use anyhow::Result;
use async_trait::async_trait;

pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- put, list 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 自定义元数据键：内容哈希
pub const META_CONTENT_HASH: &str = "content-hash";
/// 自定义元数据键：本地文件修改时间
pub const META_SOURCE_MTIME: &str = "source-mtime";

/// 远端对象信息
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    /// 上传时写入的内容哈希；对象缺失该元数据时为 None
    pub hash: Option<String>,
    pub size: u64,
    pub modified_time: i64,
}

/// 随对象一起写入的自定义元数据
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub hash: String,
    pub modified_time: i64,
}

/// 删除操作结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// 对象本就不存在；目标状态（不存在）已经成立
    NotFound,
}

/// 远端存储抽象接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 上传对象并附带内容哈希/修改时间元数据
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, meta: &ObjectMeta) -> Result<()>;

    /// 删除对象，对象不存在时返回 NotFound 而非错误
    async fn delete(&self, bucket: &str, key: &str) -> Result<DeleteOutcome>;

    /// 递归列出前缀下的所有对象，读回每个对象的元数据
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteObject>>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub fn create_store(
    config: &crate::db::StoreConfig,
) -> Result<std::sync::Arc<dyn RemoteStore>> {
    match config.typ {
        crate::db::StoreType::S3 => {
            tracing::info!(
                "初始化 S3 存储: region={}, endpoint={:?}",
                config.region,
                config.endpoint
            );
            Ok(std::sync::Arc::new(S3Store::new(
                &config.region,
                &config.access_key,
                &config.secret_key,
                config.endpoint.clone(),
            )) as std::sync::Arc<dyn RemoteStore>)
        }
    }
}
