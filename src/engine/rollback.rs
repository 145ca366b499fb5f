// ==========================================
// 圣徒档案导入系统 - 回滚管理器
// ==========================================
// 步骤: event → milestone → saint_year → saint → location → 标记工作流 rolled_back
// 红线:
// - 只处理 import_workflow_record 中标记为该工作流创建的记录
// - 父记录（saint / location）仍拥有非本工作流创建的子记录时保留，并输出警告
// - 删除为 delete-if-exists，步骤可安全重入
// - 步骤失败后停止，后续步骤保持 pending；再次执行从首个未完成步骤继续
// ==========================================

use crate::domain::types::{EntityKind, RollbackStatus, StepStatus, WorkflowState};
use crate::domain::workflow::{ImportRollback, ImportWorkflow, RollbackInfo, RollbackStep};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::error::RepositoryError;
use crate::repository::{
    EventRepository, LocationRepository, MilestoneRepository, SaintRepository,
    SaintYearRepository, WorkflowRepository,
};
use chrono::Utc;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// 预估耗时参数（毫秒）
const ESTIMATE_BASE_MS: u64 = 100;
const ESTIMATE_PER_RECORD_MS: u64 = 2;

const MARK_STEP_NAME: &str = "mark_rolled_back";

/// 回滚步骤模板（顺序即执行顺序）
pub fn default_steps() -> Vec<RollbackStep> {
    let entity_step = |entity: EntityKind, description: &str| RollbackStep {
        name: format!("delete_{}", entity.as_str()),
        description: description.to_string(),
        entity: Some(entity),
        status: StepStatus::Pending,
        records_deleted: 0,
        records_kept: 0,
        error: None,
    };

    vec![
        entity_step(EntityKind::Event, "删除本工作流创建的日历事件"),
        entity_step(EntityKind::Milestone, "删除本工作流创建的里程碑"),
        entity_step(EntityKind::SaintYear, "删除本工作流创建的圣徒年度档案"),
        entity_step(EntityKind::Saint, "删除本工作流创建的圣徒"),
        entity_step(EntityKind::Location, "删除本工作流创建的门店"),
        RollbackStep {
            name: MARK_STEP_NAME.to_string(),
            description: "标记工作流为 rolled_back".to_string(),
            entity: None,
            status: StepStatus::Pending,
            records_deleted: 0,
            records_kept: 0,
            error: None,
        },
    ]
}

fn delete_entity_tx(conn: &Connection, kind: EntityKind, id: &str) -> EngineResult<usize> {
    let deleted = match kind {
        EntityKind::Event => EventRepository::delete_if_exists_tx(conn, id)?,
        EntityKind::Milestone => MilestoneRepository::delete_if_exists_tx(conn, id)?,
        EntityKind::SaintYear => SaintYearRepository::delete_if_exists_tx(conn, id)?,
        EntityKind::Saint => SaintRepository::delete_if_exists_tx(conn, id)?,
        EntityKind::Location => LocationRepository::delete_if_exists_tx(conn, id)?,
    };
    Ok(deleted)
}

/// 预览: 将被保留的父记录 (kind, id, 外部子记录数)
///
/// Saint 拥有非本工作流子记录时保留；Location 拥有外部子记录或被保留的 Saint 时保留
fn preview_kept_parents_tx(conn: &Connection, workflow_id: &str) -> EngineResult<Vec<(EntityKind, String, usize)>> {
    let mut kept = Vec::new();
    let mut kept_saint_locations = Vec::new();

    for id in WorkflowRepository::list_tagged_ids_tx(conn, workflow_id, EntityKind::Saint)? {
        let foreign = WorkflowRepository::count_foreign_children_tx(conn, workflow_id, EntityKind::Saint, &id)?;
        if foreign > 0 {
            if let Some(saint) = SaintRepository::find_by_id_tx(conn, &id)? {
                kept_saint_locations.push(saint.location_id);
            }
            kept.push((EntityKind::Saint, id, foreign));
        }
    }

    for id in WorkflowRepository::list_tagged_ids_tx(conn, workflow_id, EntityKind::Location)? {
        let foreign = WorkflowRepository::count_foreign_children_tx(conn, workflow_id, EntityKind::Location, &id)?;
        let owns_kept_saint = kept_saint_locations.iter().any(|loc| *loc == id);
        if foreign > 0 || owns_kept_saint {
            kept.push((EntityKind::Location, id, foreign));
        }
    }

    Ok(kept)
}

/// 执行时: 父记录当前仍存在的子记录数（此前步骤已删除本工作流的子记录）
fn remaining_children_tx(conn: &Connection, kind: EntityKind, id: &str) -> EngineResult<usize> {
    let remaining = match kind {
        EntityKind::Saint => SaintRepository::count_children_tx(conn, id)?,
        EntityKind::Location => LocationRepository::count_children_tx(conn, id)?,
        _ => 0,
    };
    Ok(remaining)
}

/// 是否允许回滚
///
/// completed 总是允许；cancelled / failed 仅在存在本工作流提交的记录
/// 或存在未完成的回滚尝试时允许
fn rollback_allowed_tx(conn: &Connection, wf: &ImportWorkflow) -> EngineResult<bool> {
    if !wf.state.can_transition_to(WorkflowState::RolledBack) {
        return Ok(false);
    }
    if wf.state == WorkflowState::Completed {
        return Ok(true);
    }
    let committed: usize = WorkflowRepository::count_tagged_tx(conn, &wf.workflow_id)?.values().sum();
    if committed > 0 {
        return Ok(true);
    }
    Ok(WorkflowRepository::find_unfinished_rollback_tx(conn, &wf.workflow_id)?.is_some())
}

fn kept_warning(kind: EntityKind, id: &str, children: usize) -> String {
    format!(
        "{} {} 仍拥有 {} 条子记录（含非本工作流创建的记录），已保留",
        kind.as_str(),
        id,
        children
    )
}

pub struct RollbackManager {
    conn: Arc<Mutex<Connection>>,
}

impl RollbackManager {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Repository(RepositoryError::LockError(e.to_string())))
    }

    /// 回滚预览（只读）
    pub fn compute_rollback_info(&self, workflow_id: &str) -> EngineResult<RollbackInfo> {
        let conn = self.get_conn()?;
        let wf = WorkflowRepository::find_workflow_tx(&conn, workflow_id)?.ok_or_else(|| {
            EngineError::NotFound {
                entity: "ImportWorkflow".to_string(),
                id: workflow_id.to_string(),
            }
        })?;

        let mut warnings = Vec::new();
        let can_rollback = rollback_allowed_tx(&conn, &wf)?;
        if !can_rollback {
            warnings.push(format!(
                "工作流状态为 {}，仅 completed 或已提交记录的 cancelled / failed 工作流可回滚",
                wf.state.as_str()
            ));
        }

        let rollback_steps = match WorkflowRepository::find_unfinished_rollback_tx(&conn, workflow_id)? {
            Some(previous) => {
                warnings.push(format!(
                    "存在未完成的回滚 {}，将从步骤 {} 继续",
                    previous.rollback_id,
                    previous.resume_index().unwrap_or(0) + 1
                ));
                previous.steps
            }
            None => default_steps(),
        };

        let affected_record_counts = WorkflowRepository::count_tagged_tx(&conn, workflow_id)?;

        // 父记录隔离预判
        for (kind, id, foreign) in preview_kept_parents_tx(&conn, workflow_id)? {
            warnings.push(kept_warning(kind, &id, foreign));
        }

        let total: usize = affected_record_counts.values().sum();
        Ok(RollbackInfo {
            workflow_id: workflow_id.to_string(),
            can_rollback,
            rollback_steps,
            affected_record_counts,
            estimated_duration_ms: ESTIMATE_BASE_MS + total as u64 * ESTIMATE_PER_RECORD_MS,
            warnings,
        })
    }

    /// 执行回滚（存在未完成尝试时断点续跑）
    ///
    /// 步骤失败时返回 status=failed 的 ImportRollback，失败详情见 error_message 与对应步骤
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub fn execute_rollback(&self, workflow_id: &str) -> EngineResult<ImportRollback> {
        let mut conn = self.get_conn()?;

        let wf = WorkflowRepository::find_workflow_tx(&conn, workflow_id)?.ok_or_else(|| {
            EngineError::NotFound {
                entity: "ImportWorkflow".to_string(),
                id: workflow_id.to_string(),
            }
        })?;
        if !rollback_allowed_tx(&conn, &wf)? {
            return Err(EngineError::InvalidTransition {
                from: wf.state.as_str().to_string(),
                to: WorkflowState::RolledBack.as_str().to_string(),
            });
        }

        // ===== 获取或创建回滚记录 =====
        let mut rollback = match WorkflowRepository::find_unfinished_rollback_tx(&conn, workflow_id)? {
            Some(mut previous) => {
                info!(rollback_id = %previous.rollback_id, "继续未完成的回滚");
                previous.status = RollbackStatus::Running;
                previous.error_message = None;
                previous
            }
            None => {
                let rollback = ImportRollback {
                    rollback_id: Uuid::new_v4().to_string(),
                    workflow_id: workflow_id.to_string(),
                    status: RollbackStatus::Running,
                    steps: default_steps(),
                    warnings: Vec::new(),
                    error_message: None,
                    started_at: Utc::now(),
                    completed_at: None,
                };
                WorkflowRepository::insert_rollback_tx(&conn, &rollback)?;
                info!(rollback_id = %rollback.rollback_id, "开始回滚");
                rollback
            }
        };

        let start = rollback.resume_index().unwrap_or(rollback.steps.len());
        for idx in start..rollback.steps.len() {
            rollback.steps[idx].status = StepStatus::Running;
            rollback.steps[idx].error = None;
            WorkflowRepository::update_rollback_tx(&conn, &rollback)?;

            let step = rollback.steps[idx].clone();
            match self.run_step(&mut conn, workflow_id, &step) {
                Ok((deleted, kept_warnings)) => {
                    let current = &mut rollback.steps[idx];
                    current.status = StepStatus::Completed;
                    current.records_deleted = deleted;
                    current.records_kept = kept_warnings.len();
                    rollback.warnings.extend(kept_warnings);
                    info!(step = %step.name, deleted, "回滚步骤完成");
                    WorkflowRepository::update_rollback_tx(&conn, &rollback)?;
                }
                Err(e) => {
                    let err = EngineError::RollbackStep {
                        step: step.name.clone(),
                        message: e.to_string(),
                    };
                    error!(step = %step.name, error = %e, "回滚步骤失败，停止后续步骤");
                    rollback.steps[idx].status = StepStatus::Failed;
                    rollback.steps[idx].error = Some(e.to_string());
                    rollback.status = RollbackStatus::Failed;
                    rollback.error_message = Some(err.to_string());
                    WorkflowRepository::update_rollback_tx(&conn, &rollback)?;
                    return Ok(rollback);
                }
            }
        }

        rollback.status = RollbackStatus::Completed;
        rollback.completed_at = Some(Utc::now());
        WorkflowRepository::update_rollback_tx(&conn, &rollback)?;
        info!(rollback_id = %rollback.rollback_id, "回滚完成");
        Ok(rollback)
    }

    /// 单步事务；返回 (删除数, 保留父记录警告)
    fn run_step(
        &self,
        conn: &mut Connection,
        workflow_id: &str,
        step: &RollbackStep,
    ) -> EngineResult<(usize, Vec<String>)> {
        let tx = conn.transaction()?;

        let result = match step.entity {
            Some(kind) => {
                let mut deleted = 0;
                let mut warnings = Vec::new();

                for id in WorkflowRepository::list_tagged_ids_tx(&tx, workflow_id, kind)? {
                    let remaining = remaining_children_tx(&tx, kind, &id)?;
                    if remaining > 0 {
                        warn!(entity = %kind, id = %id, remaining, "父记录仍有外部子记录，保留");
                        warnings.push(kept_warning(kind, &id, remaining));
                        continue;
                    }
                    deleted += delete_entity_tx(&tx, kind, &id)?;
                }
                (deleted, warnings)
            }
            None => {
                let mut wf = WorkflowRepository::find_workflow_tx(&tx, workflow_id)?.ok_or_else(|| {
                    EngineError::NotFound {
                        entity: "ImportWorkflow".to_string(),
                        id: workflow_id.to_string(),
                    }
                })?;
                wf.state = WorkflowState::RolledBack;
                wf.updated_at = Utc::now();
                WorkflowRepository::update_workflow_state_tx(&tx, &wf)?;
                (0, Vec::new())
            }
        };

        tx.commit()?;
        Ok(result)
    }
}
