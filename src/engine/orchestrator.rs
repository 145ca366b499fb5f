// ==========================================
// 圣徒档案导入系统 - 阶段编排器
// ==========================================
// 流程: scan → locations → verify → count → import → completed
// 红线:
// - 编排器从不自动推进，每个阶段结果都需要人工审批
// - can_proceed == false 时审批必须被拒绝
// - current_phase 与阶段结果在同一事务内持久化
// ==========================================

use crate::domain::types::{ConflictPolicy, PhaseKind, PhaseRecordStatus, PhaseStatus, WorkflowState};
use crate::domain::workflow::{ImportPhase, ImportWorkflow, PhaseIssue, PhaseResult, SourceSnapshot};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{OptionalEventPublisher, WorkflowEvent, WorkflowEventType};
use crate::engine::executor::{build_units, ImportExecutor};
use crate::engine::phases;
use crate::repository::error::RepositoryError;
use crate::repository::WorkflowRepository;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 审批结果
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub workflow_id: String,
    pub approved_phase: PhaseKind,
    pub next_state: WorkflowState,
    /// count 审批后入队的 import 任务
    pub job_id: Option<String>,
}

/// 工作流状态视图（不含快照）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub state: WorkflowState,
    pub current_phase: PhaseKind,
    pub conflict_policy: ConflictPolicy,
    pub error_summary: Option<String>,
    pub phases: Vec<ImportPhase>,
}

// ==========================================
// PhaseOrchestrator
// ==========================================

pub struct PhaseOrchestrator {
    conn: Arc<Mutex<Connection>>,
    executor: ImportExecutor,
    publisher: OptionalEventPublisher,
}

impl PhaseOrchestrator {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            executor: ImportExecutor::new(conn.clone()),
            conn,
            publisher: OptionalEventPublisher::none(),
        }
    }

    pub fn with_publisher(mut self, publisher: OptionalEventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Repository(RepositoryError::LockError(e.to_string())))
    }

    fn load_workflow(&self, workflow_id: &str) -> EngineResult<ImportWorkflow> {
        let conn = self.get_conn()?;
        load_workflow_tx(&conn, workflow_id)
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 创建工作流并冻结快照
    pub fn start(&self, snapshot: SourceSnapshot, policy: ConflictPolicy, created_by: &str) -> EngineResult<String> {
        let now = Utc::now();
        let wf = ImportWorkflow {
            workflow_id: Uuid::new_v4().to_string(),
            state: WorkflowState::Scan,
            current_phase: PhaseKind::Scan,
            conflict_policy: policy,
            snapshot,
            error_summary: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let conn = self.get_conn()?;
        WorkflowRepository::insert_workflow_tx(&conn, &wf)?;
        info!(
            workflow_id = %wf.workflow_id,
            policy = %policy,
            location_tabs = wf.snapshot.location_tabs.len(),
            location_sheets = wf.snapshot.location_sheets.len(),
            "导入工作流已创建"
        );
        Ok(wf.workflow_id)
    }

    // ==========================================
    // 执行
    // ==========================================

    pub fn execute_current_phase(&self, workflow_id: &str) -> EngineResult<PhaseResult> {
        self.execute_current_phase_with_progress(workflow_id, |_, _| {})
    }

    /// 执行当前阶段并等待审批
    ///
    /// # 规则
    /// - 工作流必须处于阶段状态（failed 需通过 retry 重新执行）
    /// - 当前阶段已有待审批结果时拒绝重复执行
    /// - progress 仅在 import 阶段按门店单元回调
    #[instrument(skip(self, progress), fields(workflow_id = %workflow_id))]
    pub fn execute_current_phase_with_progress<F>(&self, workflow_id: &str, progress: F) -> EngineResult<PhaseResult>
    where
        F: FnMut(usize, usize),
    {
        let wf = self.load_workflow(workflow_id)?;
        let phase = wf.state.phase().ok_or_else(|| EngineError::InvalidTransition {
            from: wf.state.as_str().to_string(),
            to: "execute".to_string(),
        })?;

        {
            let conn = self.get_conn()?;
            if let Some(latest) = WorkflowRepository::find_latest_phase_tx(&conn, workflow_id, phase)? {
                if latest.record_status == PhaseRecordStatus::AwaitingApproval {
                    return Err(EngineError::PhaseGateBlocked {
                        phase: phase.as_str().to_string(),
                        reason: "阶段结果等待审批，如需重新执行请使用 retry".to_string(),
                    });
                }
            }
        }

        self.run_phase(wf, phase, progress)
    }

    /// 计算阶段结果并持久化（阶段记录与工作流状态同一事务）
    fn run_phase<F>(&self, wf: ImportWorkflow, phase: PhaseKind, progress: F) -> EngineResult<PhaseResult>
    where
        F: FnMut(usize, usize),
    {
        let started_at = Utc::now();
        info!(workflow_id = %wf.workflow_id, phase = %phase, "开始执行阶段");

        let result = match self.compute_phase(&wf, phase, progress) {
            Ok(result) => result,
            Err(e) => {
                error!(workflow_id = %wf.workflow_id, phase = %phase, error = %e, "阶段执行异常");
                PhaseResult {
                    phase,
                    status: PhaseStatus::Error,
                    summary: format!("阶段执行失败: {}", e),
                    details: serde_json::Value::Null,
                    issues: vec![PhaseIssue::error(phase.as_str(), e.to_string())],
                    can_proceed: false,
                }
            }
        };

        let failed = result.status == PhaseStatus::Error;
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let attempt = WorkflowRepository::next_phase_attempt_tx(&tx, &wf.workflow_id, phase)?;
        let record = ImportPhase {
            phase_id: Uuid::new_v4().to_string(),
            workflow_id: wf.workflow_id.clone(),
            phase,
            attempt,
            record_status: if failed {
                PhaseRecordStatus::Failed
            } else {
                PhaseRecordStatus::AwaitingApproval
            },
            result: result.clone(),
            started_at,
            completed_at: Utc::now(),
            decided_at: None,
        };
        WorkflowRepository::insert_phase_tx(&tx, &record)?;

        let mut updated = wf;
        updated.current_phase = phase;
        updated.updated_at = Utc::now();
        if failed {
            updated.state = WorkflowState::Failed;
            updated.error_summary = Some(result.summary.clone());
        } else {
            updated.error_summary = None;
        }
        // 执行期间工作流可能已被取消，状态只在仍处于本阶段时写回
        let written = WorkflowRepository::update_workflow_state_if_tx(&tx, &updated, phase.as_state())?;
        tx.commit()?;

        if !written {
            warn!(
                workflow_id = %updated.workflow_id,
                phase = %phase,
                "工作流状态已在执行期间变更，仅保留阶段记录"
            );
            return Ok(result);
        }

        info!(
            workflow_id = %updated.workflow_id,
            phase = %phase,
            status = result.status.as_str(),
            can_proceed = result.can_proceed,
            errors = result.error_count(),
            warnings = result.warning_count(),
            "阶段执行完成，等待审批"
        );
        Ok(result)
    }

    /// 阶段计算（连接锁只在只读计算期间持有，import 阶段由执行器按单元加锁）
    fn compute_phase<F>(&self, wf: &ImportWorkflow, phase: PhaseKind, progress: F) -> EngineResult<PhaseResult>
    where
        F: FnMut(usize, usize),
    {
        match phase {
            PhaseKind::Scan => Ok(phases::scan_phase(&wf.snapshot)),
            PhaseKind::Locations => {
                let conn = self.get_conn()?;
                phases::locations_phase(&conn, &wf.snapshot)
            }
            PhaseKind::Verify => Ok(phases::verify_phase(&wf.snapshot)),
            PhaseKind::Count => {
                phases::count_phase(&self.executor, &wf.workflow_id, &wf.snapshot, wf.conflict_policy)
            }
            PhaseKind::Import => {
                let units = build_units(&wf.snapshot);
                let report = self
                    .executor
                    .execute(&wf.workflow_id, &units, wf.conflict_policy, progress)?;
                Ok(phases::import_result(&report))
            }
        }
    }

    // ==========================================
    // 审批
    // ==========================================

    /// 审批通过指定阶段
    ///
    /// # 门禁
    /// 1. phase 必须为工作流当前阶段
    /// 2. 最近一次执行结果 can_proceed == true
    /// 3. 该结果处于 awaiting_approval，工作流处于该阶段状态
    #[instrument(skip(self), fields(workflow_id = %workflow_id, phase = %phase))]
    pub fn approve(&self, workflow_id: &str, phase: PhaseKind) -> EngineResult<ApprovalOutcome> {
        let mut conn = self.get_conn()?;
        let mut wf = load_workflow_tx(&conn, workflow_id)?;

        if wf.current_phase != phase {
            return Err(EngineError::PhaseGateBlocked {
                phase: phase.as_str().to_string(),
                reason: format!("当前阶段为 {}", wf.current_phase.as_str()),
            });
        }

        let record = WorkflowRepository::find_latest_phase_tx(&conn, workflow_id, phase)?.ok_or_else(|| {
            EngineError::PhaseGateBlocked {
                phase: phase.as_str().to_string(),
                reason: "阶段尚未执行".to_string(),
            }
        })?;

        if !record.result.can_proceed {
            warn!("阶段结果不允许推进，拒绝审批");
            return Err(EngineError::PhaseGateBlocked {
                phase: phase.as_str().to_string(),
                reason: format!("can_proceed=false: {}", record.result.summary),
            });
        }

        if record.record_status != PhaseRecordStatus::AwaitingApproval || wf.state != phase.as_state() {
            return Err(EngineError::PhaseGateBlocked {
                phase: phase.as_str().to_string(),
                reason: format!(
                    "阶段记录状态为 {}，工作流状态为 {}",
                    record.record_status.as_str(),
                    wf.state.as_str()
                ),
            });
        }

        let now = Utc::now();
        let next_state = match phase.next() {
            Some(next) => next.as_state(),
            None => WorkflowState::Completed,
        };
        if !wf.state.can_transition_to(next_state) {
            return Err(EngineError::InvalidTransition {
                from: wf.state.as_str().to_string(),
                to: next_state.as_str().to_string(),
            });
        }

        let tx = conn.transaction()?;
        WorkflowRepository::update_phase_status_tx(&tx, &record.phase_id, PhaseRecordStatus::Approved, Some(now))?;
        wf.state = next_state;
        if let Some(next) = phase.next() {
            wf.current_phase = next;
        } else {
            wf.completed_at = Some(now);
        }
        wf.updated_at = now;
        WorkflowRepository::update_workflow_state_tx(&tx, &wf)?;
        tx.commit()?;
        drop(conn);

        info!(next_state = %next_state, "阶段审批通过");

        // count 审批后调度 import 任务（事务已提交）
        let job_id = if phase == PhaseKind::Count {
            let event = WorkflowEvent::new(workflow_id, WorkflowEventType::ImportApproved, Some("approve".to_string()));
            self.publisher
                .publish(event)
                .map_err(|e| EngineError::Scheduling(e.to_string()))?
                .filter(|id| !id.is_empty())
        } else {
            None
        };

        Ok(ApprovalOutcome {
            workflow_id: workflow_id.to_string(),
            approved_phase: phase,
            next_state,
            job_id,
        })
    }

    /// 驳回指定阶段，工作流进入 cancelled
    #[instrument(skip(self), fields(workflow_id = %workflow_id, phase = %phase))]
    pub fn reject(&self, workflow_id: &str, phase: PhaseKind) -> EngineResult<ImportWorkflow> {
        let mut conn = self.get_conn()?;
        let mut wf = load_workflow_tx(&conn, workflow_id)?;

        if wf.current_phase != phase {
            return Err(EngineError::PhaseGateBlocked {
                phase: phase.as_str().to_string(),
                reason: format!("当前阶段为 {}", wf.current_phase.as_str()),
            });
        }
        if !wf.state.can_transition_to(WorkflowState::Cancelled) {
            return Err(EngineError::InvalidTransition {
                from: wf.state.as_str().to_string(),
                to: WorkflowState::Cancelled.as_str().to_string(),
            });
        }

        let now = Utc::now();
        let tx = conn.transaction()?;
        if let Some(record) = WorkflowRepository::find_latest_phase_tx(&tx, workflow_id, phase)? {
            if matches!(
                record.record_status,
                PhaseRecordStatus::AwaitingApproval | PhaseRecordStatus::Failed
            ) {
                WorkflowRepository::update_phase_status_tx(&tx, &record.phase_id, PhaseRecordStatus::Rejected, Some(now))?;
            }
        }
        wf.state = WorkflowState::Cancelled;
        wf.updated_at = now;
        WorkflowRepository::update_workflow_state_tx(&tx, &wf)?;
        tx.commit()?;

        info!("阶段已驳回，工作流取消");
        Ok(wf)
    }

    /// 使用同一冻结快照重新执行指定阶段
    ///
    /// 允许: 工作流在该阶段失败，或该阶段结果尚待审批
    #[instrument(skip(self), fields(workflow_id = %workflow_id, phase = %phase))]
    pub fn retry(&self, workflow_id: &str, phase: PhaseKind) -> EngineResult<PhaseResult> {
        let wf = {
            let mut conn = self.get_conn()?;
            let mut wf = load_workflow_tx(&conn, workflow_id)?;

            if wf.current_phase != phase {
                return Err(EngineError::PhaseGateBlocked {
                    phase: phase.as_str().to_string(),
                    reason: format!("当前阶段为 {}", wf.current_phase.as_str()),
                });
            }
            let target = phase.as_state();
            if wf.state != target && !wf.state.can_transition_to(target) {
                return Err(EngineError::InvalidTransition {
                    from: wf.state.as_str().to_string(),
                    to: target.as_str().to_string(),
                });
            }

            let tx = conn.transaction()?;
            let superseded = WorkflowRepository::supersede_open_phases_tx(&tx, workflow_id, phase)?;
            wf.state = target;
            wf.updated_at = Utc::now();
            WorkflowRepository::update_workflow_state_tx(&tx, &wf)?;
            tx.commit()?;
            info!(superseded, "重试阶段");
            wf
        };

        self.run_phase(wf, phase, |_, _| {})
    }

    /// 取消工作流
    pub fn cancel(&self, workflow_id: &str) -> EngineResult<ImportWorkflow> {
        let conn = self.get_conn()?;
        let mut wf = load_workflow_tx(&conn, workflow_id)?;
        if !wf.state.can_transition_to(WorkflowState::Cancelled) {
            return Err(EngineError::InvalidTransition {
                from: wf.state.as_str().to_string(),
                to: WorkflowState::Cancelled.as_str().to_string(),
            });
        }
        wf.state = WorkflowState::Cancelled;
        wf.updated_at = Utc::now();
        WorkflowRepository::update_workflow_state_tx(&conn, &wf)?;
        info!(workflow_id = %workflow_id, "工作流已取消");
        Ok(wf)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_workflow(&self, workflow_id: &str) -> EngineResult<ImportWorkflow> {
        self.load_workflow(workflow_id)
    }

    pub fn status(&self, workflow_id: &str) -> EngineResult<WorkflowStatus> {
        let conn = self.get_conn()?;
        let wf = load_workflow_tx(&conn, workflow_id)?;
        let phases = WorkflowRepository::list_phases_tx(&conn, workflow_id)?;
        Ok(WorkflowStatus {
            workflow_id: wf.workflow_id,
            state: wf.state,
            current_phase: wf.current_phase,
            conflict_policy: wf.conflict_policy,
            error_summary: wf.error_summary,
            phases,
        })
    }
}

fn load_workflow_tx(conn: &Connection, workflow_id: &str) -> EngineResult<ImportWorkflow> {
    WorkflowRepository::find_workflow_tx(conn, workflow_id)?.ok_or_else(|| EngineError::NotFound {
        entity: "ImportWorkflow".to_string(),
        id: workflow_id.to_string(),
    })
}
