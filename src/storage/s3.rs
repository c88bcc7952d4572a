use super::{
    DeleteOutcome, ObjectMeta, RemoteObject, RemoteStore, IO_TIMEOUT_SECS, META_CONTENT_HASH,
    META_SOURCE_MTIME, OP_TIMEOUT_SECS,
};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Operator};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct S3Store {
    region: String,
    access_key: String,
    secret_key: String,
    endpoint: Option<String>,
    /// 按 bucket 缓存的 Operator，工作项自带 bucket 字段
    operators: RwLock<HashMap<String, Operator>>,
    name: String,
}

impl S3Store {
    pub fn new(
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
    ) -> Self {
        let name = format!("s3:{}", region);
        Self {
            region: region.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            endpoint,
            operators: RwLock::new(HashMap::new()),
            name,
        }
    }

    async fn operator(&self, bucket: &str) -> Result<Operator> {
        {
            let ops = self.operators.read().await;
            if let Some(op) = ops.get(bucket) {
                return Ok(op.clone());
            }
        }

        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(&self.region)
            .access_key_id(&self.access_key)
            .secret_access_key(&self.secret_key);

        if let Some(ref ep) = self.endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let mut ops = self.operators.write().await;
        ops.insert(bucket.to_string(), operator.clone());
        Ok(operator)
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, meta: &ObjectMeta) -> Result<()> {
        let op = self.operator(bucket).await?;
        op.write_with(key, data)
            .user_metadata([
                (META_CONTENT_HASH.to_string(), meta.hash.clone()),
                (META_SOURCE_MTIME.to_string(), meta.modified_time.to_string()),
            ])
            .await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<DeleteOutcome> {
        let op = self.operator(bucket).await?;

        // S3 删除不存在的对象不报错，先 stat 区分 NotFound
        match op.stat(key).await {
            Ok(_) => {}
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                return Ok(DeleteOutcome::NotFound);
            }
            Err(e) => return Err(e.into()),
        }

        op.delete(key).await?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteObject>> {
        let op = self.operator(bucket).await?;
        let mut objects = Vec::new();

        let mut lister = op.lister_with(prefix).recursive(true).await?;

        while let Some(entry) = lister.try_next().await? {
            if entry.metadata().is_dir() {
                continue;
            }

            let key = entry.path().trim_start_matches('/').to_string();
            if key.is_empty() {
                continue;
            }

            // 列表只带基础信息，自定义元数据需要逐个 stat 读回
            let meta = op.stat(entry.path()).await?;
            let hash = meta
                .user_metadata()
                .and_then(|m| m.get(META_CONTENT_HASH))
                .cloned();
            let modified_time = meta
                .user_metadata()
                .and_then(|m| m.get(META_SOURCE_MTIME))
                .and_then(|v| v.parse::<i64>().ok())
                .or_else(|| meta.last_modified().map(|t| t.timestamp()))
                .unwrap_or(0);

            objects.push(RemoteObject {
                key,
                hash,
                size: meta.content_length(),
                modified_time,
            });
        }

        Ok(objects)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
