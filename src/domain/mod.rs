// ==========================================
// 圣徒档案导入系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、导入中间结构
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod job;
pub mod saint;
pub mod types;
pub mod workflow;

// 重导出核心类型
pub use job::{Job, JobStatus, QueueStats};
pub use saint::{
    Event, HistoricalRow, Location, LocationRow, MergeFields, Milestone, MilestoneRow, Saint,
    SaintRow, SaintYear, TabRecord,
};
pub use types::{
    ConflictPolicy, EntityKind, EventType, JobState, JobType, PhaseKind, PhaseRecordStatus,
    PhaseStatus, RollbackStatus, StepStatus, WorkflowState,
};
pub use workflow::{
    ImportPhase, ImportRollback, ImportWorkflow, IssueSeverity, LocationSheet, PhaseIssue,
    PhaseResult, RawTab, RollbackInfo, RollbackStep, SheetTab, SourceSnapshot,
};
