// ==========================================
// 圣徒档案导入系统 - 配置层
// ==========================================
// 职责: 管道配置（默认值 / config_kv / 环境变量）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config_trait;
pub mod pipeline_config;

pub use config_manager::{config_keys, ConfigManager};
pub use import_config_trait::PipelineConfigReader;
pub use pipeline_config::{env_keys, get_default_db_path, PipelineConfig};
