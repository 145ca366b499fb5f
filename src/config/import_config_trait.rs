// ==========================================
// 圣徒档案导入系统 - 管道配置读取 Trait
// ==========================================
// 职责: 定义管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::ConflictPolicy;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// PipelineConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait PipelineConfigReader: Send + Sync {
    /// 新建工作流的默认冲突策略
    ///
    /// # 默认值
    /// - skip-if-exists
    async fn get_conflict_mode(&self) -> Result<ConflictPolicy, Box<dyn Error + Send + Sync>>;

    /// 清理任务是否默认只预览
    ///
    /// # 默认值
    /// - false
    async fn get_dry_run(&self) -> Result<bool, Box<dyn Error + Send + Sync>>;

    /// 重复记录清理每批处理的组数
    ///
    /// # 默认值
    /// - 50
    async fn get_dedup_batch_size(&self) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// 数据源相邻调用的最小间隔（毫秒）
    ///
    /// # 默认值
    /// - 1000
    async fn get_source_delay_ms(&self) -> Result<u64, Box<dyn Error + Send + Sync>>;

    /// 任务执行器轮询间隔（毫秒）
    async fn get_worker_poll_ms(&self) -> Result<u64, Box<dyn Error + Send + Sync>>;
}
