//! 应用配置模块

use crate::core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// 传输引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// 单个工作项的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避递增
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl EngineConfig {
    /// 从配置文件加载引擎配置
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        if config_file.exists() {
            if let Ok(content) = fs::read_to_string(&config_file) {
                if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(engine_config) = config.get("engine") {
                        if let Ok(engine) =
                            serde_json::from_value::<EngineConfig>(engine_config.clone())
                        {
                            return engine;
                        }
                    }
                }
            }
        }
        Self::default()
    }

    /// 保存引擎配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        let config_file = config_dir.join("config.json");

        // 读取现有配置，只更新 engine 一节
        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        config["engine"] = serde_json::to_value(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        fs::write(&config_file, serde_json::to_string_pretty(&config)?)
    }

    /// 转换为执行器使用的重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path());
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_base_delay_ms, 2000);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            max_retries: 5,
            retry_base_delay_ms: 100,
        };
        config.save(dir.path()).unwrap();

        let loaded = EngineConfig::load(dir.path());
        assert_eq!(loaded.max_retries, 5);
        assert_eq!(loaded.retry_base_delay_ms, 100);
        assert_eq!(loaded.retry_policy().base_delay, Duration::from_millis(100));
    }
}
