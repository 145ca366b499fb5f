// ==========================================
// 圣徒档案导入系统 - 引擎层错误类型
// ==========================================
// 分类:
// - Transaction:  单元级，回滚该单元，执行器继续处理后续单元
// - Verification: 去重组级，回滚该组事务，同批次其他组不受影响
// - RollbackStep: 回滚步骤失败，中止后续步骤，可安全重入
// - PhaseGateBlocked / InvalidTransition: 审批门禁与状态机拒绝
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("单元事务失败 (unit={unit}): {message}")]
    Transaction { unit: String, message: String },

    #[error("幸存记录校验失败 (group={group}, survivor={survivor_id})")]
    Verification { group: String, survivor_id: String },

    #[error("回滚步骤失败 (step={step}): {message}")]
    RollbackStep { step: String, message: String },

    #[error("阶段门禁阻止推进 (phase={phase}): {reason}")]
    PhaseGateBlocked { phase: String, reason: String },

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition { from: String, to: String },

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("任务调度失败: {0}")]
    Scheduling(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Repository(err.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Repository(err.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
