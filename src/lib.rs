// ==========================================
// 圣徒档案导入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + Tokio
// 系统定位: 多阶段人工审批导入管道（导入 / 去重 / 回滚）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 外部数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 服务层 - 任务队列
pub mod services;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::types::{ConflictPolicy, EntityKind, PhaseKind, WorkflowState};
pub use domain::{Event, Location, Milestone, Saint, SaintYear, SourceSnapshot};
pub use engine::{DedupEngine, EngineError, ImportExecutor, PhaseOrchestrator, RollbackManager};
pub use services::{JobQueue, JobWorker};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "圣徒档案导入系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
