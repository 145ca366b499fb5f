// ==========================================
// 圣徒档案导入系统 - 领域类型定义
// ==========================================
// 职责: 工作流状态、阶段、冲突策略、任务状态等枚举
// 序列化: 数据库统一存储 as_str() 形式
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 冲突处理策略 (Conflict Policy)
// ==========================================
// 用途: 导入执行器遇到已存在记录时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    Overwrite,         // 覆盖已有记录的全部字段
    SkipIfExists,      // 已存在则跳过
    MergeNullCoalesce, // 仅填充已有记录中为空的字段
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::SkipIfExists => "skip-if-exists",
            ConflictPolicy::MergeNullCoalesce => "merge-null-coalesce",
        }
    }

    /// 解析策略字符串（大小写、下划线/连字符均兼容）
    pub fn parse(s: &str) -> Option<ConflictPolicy> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "overwrite" => Some(ConflictPolicy::Overwrite),
            "skip-if-exists" | "skip" => Some(ConflictPolicy::SkipIfExists),
            "merge-null-coalesce" | "merge" => Some(ConflictPolicy::MergeNullCoalesce),
            _ => None,
        }
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::SkipIfExists
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入阶段 (Phase Kind)
// ==========================================
// 顺序: scan → locations → verify → count → import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Scan,
    Locations,
    Verify,
    Count,
    Import,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 5] = [
        PhaseKind::Scan,
        PhaseKind::Locations,
        PhaseKind::Verify,
        PhaseKind::Count,
        PhaseKind::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Scan => "scan",
            PhaseKind::Locations => "locations",
            PhaseKind::Verify => "verify",
            PhaseKind::Count => "count",
            PhaseKind::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<PhaseKind> {
        match s.trim().to_lowercase().as_str() {
            "scan" => Some(PhaseKind::Scan),
            "locations" => Some(PhaseKind::Locations),
            "verify" => Some(PhaseKind::Verify),
            "count" => Some(PhaseKind::Count),
            "import" => Some(PhaseKind::Import),
            _ => None,
        }
    }

    /// 审批通过后的下一阶段（import 之后为 None，即完成）
    pub fn next(&self) -> Option<PhaseKind> {
        match self {
            PhaseKind::Scan => Some(PhaseKind::Locations),
            PhaseKind::Locations => Some(PhaseKind::Verify),
            PhaseKind::Verify => Some(PhaseKind::Count),
            PhaseKind::Count => Some(PhaseKind::Import),
            PhaseKind::Import => None,
        }
    }

    /// 阶段对应的工作流状态
    pub fn as_state(&self) -> WorkflowState {
        match self {
            PhaseKind::Scan => WorkflowState::Scan,
            PhaseKind::Locations => WorkflowState::Locations,
            PhaseKind::Verify => WorkflowState::Verify,
            PhaseKind::Count => WorkflowState::Count,
            PhaseKind::Import => WorkflowState::Import,
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工作流状态 (Workflow State)
// ==========================================
// 红线: 状态只能单调前进，唯一例外是显式回滚
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Scan,
    Locations,
    Verify,
    Count,
    Import,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Scan => "scan",
            WorkflowState::Locations => "locations",
            WorkflowState::Verify => "verify",
            WorkflowState::Count => "count",
            WorkflowState::Import => "import",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<WorkflowState> {
        match s.trim().to_lowercase().as_str() {
            "scan" => Some(WorkflowState::Scan),
            "locations" => Some(WorkflowState::Locations),
            "verify" => Some(WorkflowState::Verify),
            "count" => Some(WorkflowState::Count),
            "import" => Some(WorkflowState::Import),
            "completed" => Some(WorkflowState::Completed),
            "failed" => Some(WorkflowState::Failed),
            "cancelled" => Some(WorkflowState::Cancelled),
            "rolled_back" => Some(WorkflowState::RolledBack),
            _ => None,
        }
    }

    /// 当前状态对应的执行阶段（非阶段状态返回 None）
    pub fn phase(&self) -> Option<PhaseKind> {
        match self {
            WorkflowState::Scan => Some(PhaseKind::Scan),
            WorkflowState::Locations => Some(PhaseKind::Locations),
            WorkflowState::Verify => Some(PhaseKind::Verify),
            WorkflowState::Count => Some(PhaseKind::Count),
            WorkflowState::Import => Some(PhaseKind::Import),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Cancelled | WorkflowState::RolledBack)
    }

    /// 状态转换表
    ///
    /// # 规则
    /// - 阶段状态 → 下一阶段 / failed / cancelled
    /// - failed → 原阶段（重试）/ cancelled
    /// - completed → rolled_back（仅显式回滚）
    /// - cancelled / failed → rolled_back（需已有提交记录，由 RollbackManager 校验）
    /// - rolled_back 为终态，cancelled 仅可回滚
    pub fn can_transition_to(&self, to: WorkflowState) -> bool {
        use WorkflowState::*;
        match (self, to) {
            (Scan, Locations) | (Locations, Verify) | (Verify, Count) | (Count, Import) => true,
            (Import, Completed) => true,
            (Scan | Locations | Verify | Count | Import, Failed | Cancelled) => true,
            (Failed, Scan | Locations | Verify | Count | Import | Cancelled) => true,
            (Completed | Cancelled | Failed, RolledBack) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 阶段结果状态 (Phase Result Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Success,
    Warning,
    Error,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Success => "success",
            PhaseStatus::Warning => "warning",
            PhaseStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> PhaseStatus {
        match s.trim().to_lowercase().as_str() {
            "success" => PhaseStatus::Success,
            "warning" => PhaseStatus::Warning,
            _ => PhaseStatus::Error,
        }
    }
}

// ==========================================
// 阶段审批状态 (Phase Record Status)
// ==========================================
// 用途: import_phase 表中每次阶段执行的审批进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseRecordStatus {
    AwaitingApproval, // 已执行，等待人工审批
    Approved,         // 已审批通过
    Rejected,         // 已驳回
    Failed,           // 执行失败
    Superseded,       // 已被重试结果替代
}

impl PhaseRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseRecordStatus::AwaitingApproval => "awaiting_approval",
            PhaseRecordStatus::Approved => "approved",
            PhaseRecordStatus::Rejected => "rejected",
            PhaseRecordStatus::Failed => "failed",
            PhaseRecordStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> PhaseRecordStatus {
        match s.trim().to_lowercase().as_str() {
            "awaiting_approval" => PhaseRecordStatus::AwaitingApproval,
            "approved" => PhaseRecordStatus::Approved,
            "rejected" => PhaseRecordStatus::Rejected,
            "superseded" => PhaseRecordStatus::Superseded,
            _ => PhaseRecordStatus::Failed,
        }
    }
}

// ==========================================
// 实体类型 (Entity Kind)
// ==========================================
// 用途: import_workflow_record 审计关联表中的实体标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Location,
    Saint,
    SaintYear,
    Milestone,
    Event,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Location => "location",
            EntityKind::Saint => "saint",
            EntityKind::SaintYear => "saint_year",
            EntityKind::Milestone => "milestone",
            EntityKind::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        match s.trim() {
            "location" => Some(EntityKind::Location),
            "saint" => Some(EntityKind::Saint),
            "saint_year" => Some(EntityKind::SaintYear),
            "milestone" => Some(EntityKind::Milestone),
            "event" => Some(EntityKind::Event),
            _ => None,
        }
    }

    /// 实体对应的数据表名
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Location => "location",
            EntityKind::Saint => "saint",
            EntityKind::SaintYear => "saint_year",
            EntityKind::Milestone => "milestone",
            EntityKind::Event => "event",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 日历事件类型 (Event Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SaintDay,  // 圣徒日（周年纪念）
    Milestone, // 里程碑达成
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SaintDay => "saint_day",
            EventType::Milestone => "milestone",
        }
    }

    pub fn parse(s: &str) -> EventType {
        match s.trim() {
            "milestone" => EventType::Milestone,
            _ => EventType::SaintDay,
        }
    }
}

// ==========================================
// 任务类型与状态 (Job Type / Job State)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Import,    // 执行 import 阶段
    Rollback,  // 回滚指定工作流
    Reconcile, // 重复记录清理
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Import => "import",
            JobType::Rollback => "rollback",
            JobType::Reconcile => "reconcile",
        }
    }

    pub fn parse(s: &str) -> Option<JobType> {
        match s.trim() {
            "import" => Some(JobType::Import),
            "rollback" => Some(JobType::Rollback),
            "reconcile" => Some(JobType::Reconcile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> JobState {
        match s {
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "COMPLETED" => JobState::Completed,
            "CANCELLED" => JobState::Cancelled,
            _ => JobState::Failed,
        }
    }
}

// ==========================================
// 回滚步骤状态 (Step Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Running,
    Completed,
    Failed,
}

impl RollbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackStatus::Running => "running",
            RollbackStatus::Completed => "completed",
            RollbackStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> RollbackStatus {
        match s.trim() {
            "running" => RollbackStatus::Running,
            "completed" => RollbackStatus::Completed,
            _ => RollbackStatus::Failed,
        }
    }
}
