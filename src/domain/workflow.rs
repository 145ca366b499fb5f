// ==========================================
// 圣徒档案导入系统 - 导入工作流领域模型
// ==========================================
// 实体: ImportWorkflow / ImportPhase / ImportRollback
// 快照: SourceSnapshot 在工作流创建时冻结，阶段重试使用同一输入
// ==========================================

use crate::domain::types::{
    ConflictPolicy, EntityKind, PhaseKind, PhaseRecordStatus, PhaseStatus, RollbackStatus,
    StepStatus, WorkflowState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// 源数据快照
// ==========================================

/// 单个页签的原始行（第 0 行为表头）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTab {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl RawTab {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// 数据行数（不含表头）
    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }
}

/// 门店表格内的标准页签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetTab {
    Saints,
    Historical,
    Milestones,
}

impl SheetTab {
    pub const ALL: [SheetTab; 3] = [SheetTab::Saints, SheetTab::Historical, SheetTab::Milestones];

    pub fn as_str(&self) -> &'static str {
        match self {
            SheetTab::Saints => "Saints",
            SheetTab::Historical => "Historical",
            SheetTab::Milestones => "Milestones",
        }
    }

    /// 页签名别名（已规范化：小写、去空白）
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            SheetTab::Saints => &["saints", "saint"],
            SheetTab::Historical => &["historical", "history", "saintyears"],
            SheetTab::Milestones => &["milestones", "milestone"],
        }
    }

    pub fn matches(&self, tab_name: &str) -> bool {
        let normalized: String = tab_name
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        self.aliases().contains(&normalized.as_str())
    }
}

/// 单个门店的表格（Saints / Historical / Milestones 页签）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSheet {
    pub sheet_id: String,
    pub tabs: Vec<RawTab>,
}

impl LocationSheet {
    pub fn tab(&self, kind: SheetTab) -> Option<&RawTab> {
        self.tabs.iter().find(|t| kind.matches(&t.name))
    }
}

/// 工作流输入快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub master_sheet_id: String,
    /// 门店状态页签（页签名即门店状态）
    pub location_tabs: Vec<RawTab>,
    pub location_sheets: Vec<LocationSheet>,
    pub captured_at: DateTime<Utc>,
}

impl SourceSnapshot {
    pub fn sheet(&self, sheet_id: &str) -> Option<&LocationSheet> {
        self.location_sheets.iter().find(|s| s.sheet_id == sheet_id)
    }
}

// ==========================================
// ImportWorkflow - 导入工作流
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportWorkflow {
    pub workflow_id: String,
    pub state: WorkflowState,
    /// 当前（或失败时所在）阶段
    pub current_phase: PhaseKind,
    pub conflict_policy: ConflictPolicy,
    pub snapshot: SourceSnapshot,
    pub error_summary: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ==========================================
// PhaseResult - 阶段执行结果（供人工审批）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseIssue {
    pub severity: IssueSeverity,
    /// 问题范围（如 sheet_id / 页签名）
    pub scope: String,
    pub message: String,
}

impl PhaseIssue {
    pub fn info(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Info,
            scope: scope.into(),
            message: message.into(),
        }
    }

    pub fn warning(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            scope: scope.into(),
            message: message.into(),
        }
    }

    pub fn error(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            scope: scope.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: PhaseKind,
    pub status: PhaseStatus,
    pub summary: String,
    pub details: serde_json::Value,
    pub issues: Vec<PhaseIssue>,
    /// 红线: false 时审批必须被拒绝
    pub can_proceed: bool,
}

impl PhaseResult {
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .count()
    }
}

// ==========================================
// ImportPhase - 阶段执行审计记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPhase {
    pub phase_id: String,
    pub workflow_id: String,
    pub phase: PhaseKind,
    pub attempt: i32,
    pub record_status: PhaseRecordStatus,
    pub result: PhaseResult,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

// ==========================================
// 回滚
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub name: String,
    pub description: String,
    /// 本步骤处理的实体（最后一步标记工作流状态，无实体）
    pub entity: Option<EntityKind>,
    pub status: StepStatus,
    pub records_deleted: usize,
    pub records_kept: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackInfo {
    pub workflow_id: String,
    pub can_rollback: bool,
    pub rollback_steps: Vec<RollbackStep>,
    pub affected_record_counts: BTreeMap<EntityKind, usize>,
    pub estimated_duration_ms: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRollback {
    pub rollback_id: String,
    pub workflow_id: String,
    pub status: RollbackStatus,
    pub steps: Vec<RollbackStep>,
    pub warnings: Vec<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportRollback {
    /// 首个未完成步骤（断点续跑起点）
    pub fn resume_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status != StepStatus::Completed)
    }
}
