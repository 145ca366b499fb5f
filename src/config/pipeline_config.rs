// ==========================================
// 圣徒档案导入系统 - 管道配置
// ==========================================
// 优先级: 环境变量 > config_kv (global) > 默认值
// ==========================================

use crate::domain::types::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_DEDUP_BATCH_SIZE: usize = 50;
pub const DEFAULT_SOURCE_DELAY_MS: u64 = 1000;
pub const DEFAULT_WORKER_POLL_MS: u64 = 500;

/// 环境变量名
pub mod env_keys {
    pub const CONFLICT_MODE: &str = "SAINTS_CONFLICT_MODE";
    pub const DRY_RUN: &str = "SAINTS_DRY_RUN";
    pub const DEDUP_BATCH_SIZE: &str = "SAINTS_DEDUP_BATCH_SIZE";
    pub const SOURCE_DELAY_MS: &str = "SAINTS_SOURCE_DELAY_MS";
    pub const WORKER_POLL_MS: &str = "SAINTS_WORKER_POLL_MS";
    pub const DB_PATH: &str = "SAINTS_DB_PATH";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 新建工作流的默认冲突策略
    pub conflict_mode: ConflictPolicy,
    /// 清理任务默认只预览
    pub dry_run: bool,
    pub dedup_batch_size: usize,
    /// 数据源相邻调用的最小间隔
    pub source_delay_ms: u64,
    pub worker_poll_ms: u64,
    pub db_path: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            conflict_mode: ConflictPolicy::default(),
            dry_run: false,
            dedup_batch_size: DEFAULT_DEDUP_BATCH_SIZE,
            source_delay_ms: DEFAULT_SOURCE_DELAY_MS,
            worker_poll_ms: DEFAULT_WORKER_POLL_MS,
            db_path: get_default_db_path(),
        }
    }
}

impl PipelineConfig {
    /// 应用环境变量覆写
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// 按查找函数覆写（无法解析的值保留原配置并告警）
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = get(env_keys::CONFLICT_MODE) {
            match ConflictPolicy::parse(&raw) {
                Some(policy) => self.conflict_mode = policy,
                None => tracing::warn!(key = env_keys::CONFLICT_MODE, value = %raw, "冲突策略无法识别，忽略"),
            }
        }
        if let Some(raw) = get(env_keys::DRY_RUN) {
            match parse_bool(&raw) {
                Some(v) => self.dry_run = v,
                None => tracing::warn!(key = env_keys::DRY_RUN, value = %raw, "布尔值无法识别，忽略"),
            }
        }
        if let Some(v) = get(env_keys::DEDUP_BATCH_SIZE).and_then(|s| s.parse::<usize>().ok()) {
            if v > 0 {
                self.dedup_batch_size = v;
            }
        }
        if let Some(v) = get(env_keys::SOURCE_DELAY_MS).and_then(|s| s.parse::<u64>().ok()) {
            self.source_delay_ms = v;
        }
        if let Some(v) = get(env_keys::WORKER_POLL_MS).and_then(|s| s.parse::<u64>().ok()) {
            if v > 0 {
                self.worker_poll_ms = v;
            }
        }
        if let Some(path) = get(env_keys::DB_PATH) {
            self.db_path = path;
        }
        self
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 默认数据库路径
///
/// SAINTS_DB_PATH 优先；否则使用用户数据目录，取不到时回退到当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var(env_keys::DB_PATH) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./saints_import.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("saints-import");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("saints_import.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_applied() {
        let config = PipelineConfig::default().with_overrides(lookup(&[
            (env_keys::CONFLICT_MODE, "merge"),
            (env_keys::DRY_RUN, "yes"),
            (env_keys::DEDUP_BATCH_SIZE, "10"),
            (env_keys::SOURCE_DELAY_MS, "0"),
            (env_keys::DB_PATH, "/tmp/x.db"),
        ]));

        assert_eq!(config.conflict_mode, ConflictPolicy::MergeNullCoalesce);
        assert!(config.dry_run);
        assert_eq!(config.dedup_batch_size, 10);
        assert_eq!(config.source_delay_ms, 0);
        assert_eq!(config.worker_poll_ms, DEFAULT_WORKER_POLL_MS);
        assert_eq!(config.db_path, "/tmp/x.db");
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let base = PipelineConfig::default();
        let config = base.clone().with_overrides(lookup(&[
            (env_keys::CONFLICT_MODE, "replace-everything"),
            (env_keys::DRY_RUN, "maybe"),
            (env_keys::DEDUP_BATCH_SIZE, "0"),
            (env_keys::WORKER_POLL_MS, "abc"),
        ]));
        assert_eq!(config, base);
    }
}
