// ==========================================
// 圣徒档案导入系统 - 引擎层
// ==========================================
// 职责: 导入管道的业务规则（阶段编排、写入执行、重复清理、回滚）
// 红线: Engine 不拼 SQL，数据访问全部经由 repository 的 *_tx 函数
// ==========================================

pub mod dedup;
pub mod error;
pub mod event_deriver;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod phases;
pub mod rollback;

// 重导出核心引擎
pub use dedup::{DedupEngine, DedupReport, DedupTarget, DuplicateGroup};
pub use error::{EngineError, EngineResult};
pub use events::{
    NoOpEventPublisher, OptionalEventPublisher, WorkflowEvent, WorkflowEventPublisher,
    WorkflowEventType,
};
pub use executor::{build_units, ExecutionReport, ImportExecutor, LocationUnit, WriteCounts};
pub use orchestrator::{ApprovalOutcome, PhaseOrchestrator, WorkflowStatus};
pub use rollback::RollbackManager;
