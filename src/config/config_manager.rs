// ==========================================
// 圣徒档案导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::PipelineConfigReader;
use crate::config::pipeline_config::{
    parse_bool, PipelineConfig, DEFAULT_DEDUP_BATCH_SIZE, DEFAULT_SOURCE_DELAY_MS, DEFAULT_WORKER_POLL_MS,
};
use crate::domain::types::ConflictPolicy;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 组装最终配置：默认值 → config_kv → 环境变量
    ///
    /// db_path 在连接打开前已确定，此处沿用 base 中的值
    pub async fn load_pipeline_config(&self, base: PipelineConfig) -> ConfigResult<PipelineConfig> {
        let config = PipelineConfig {
            conflict_mode: self.get_conflict_mode().await?,
            dry_run: self.get_dry_run().await?,
            dedup_batch_size: self.get_dedup_batch_size().await?,
            source_delay_ms: self.get_source_delay_ms().await?,
            worker_poll_ms: self.get_worker_poll_ms().await?,
            db_path: base.db_path,
        };
        Ok(config.with_env_overrides())
    }
}

// ==========================================
// PipelineConfigReader Trait 实现
// ==========================================
#[async_trait]
impl PipelineConfigReader for ConfigManager {
    async fn get_conflict_mode(&self) -> ConfigResult<ConflictPolicy> {
        let value = self.get_config_or_default(config_keys::CONFLICT_MODE, ConflictPolicy::default().as_str())?;
        Ok(ConflictPolicy::parse(&value).unwrap_or_else(|| {
            tracing::warn!(config_key = config_keys::CONFLICT_MODE, raw_value = %value, "冲突策略配置无法识别，使用默认值");
            ConflictPolicy::default()
        }))
    }

    async fn get_dry_run(&self) -> ConfigResult<bool> {
        let value = self.get_config_or_default(config_keys::DRY_RUN, "false")?;
        Ok(parse_bool(&value).unwrap_or(false))
    }

    async fn get_dedup_batch_size(&self) -> ConfigResult<usize> {
        let value = self.get_config_or_default(config_keys::DEDUP_BATCH_SIZE, "50")?;
        Ok(value
            .parse::<usize>()
            .ok()
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_DEDUP_BATCH_SIZE))
    }

    async fn get_source_delay_ms(&self) -> ConfigResult<u64> {
        let value = self.get_config_or_default(config_keys::SOURCE_DELAY_MS, "1000")?;
        Ok(value.parse::<u64>().unwrap_or(DEFAULT_SOURCE_DELAY_MS))
    }

    async fn get_worker_poll_ms(&self) -> ConfigResult<u64> {
        let value = self.get_config_or_default(config_keys::WORKER_POLL_MS, "500")?;
        Ok(value
            .parse::<u64>()
            .ok()
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_WORKER_POLL_MS))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const CONFLICT_MODE: &str = "conflict_mode";
    pub const DRY_RUN: &str = "dry_run";
    pub const DEDUP_BATCH_SIZE: &str = "dedup_batch_size";
    pub const SOURCE_DELAY_MS: &str = "source_delay_ms";
    pub const WORKER_POLL_MS: &str = "worker_poll_ms";
}
