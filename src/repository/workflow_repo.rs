// ==========================================
// 圣徒档案导入系统 - 导入工作流仓储
// ==========================================
// 职责:
// - import_workflow: 工作流状态与冻结快照
// - import_phase: 阶段执行结果（审计）
// - import_workflow_record: 工作流创建的记录（回滚范围）
// - import_rollback: 回滚尝试
// ==========================================

use crate::domain::types::{
    ConflictPolicy, EntityKind, PhaseKind, PhaseRecordStatus, RollbackStatus, WorkflowState,
};
use crate::domain::workflow::{ImportPhase, ImportRollback, ImportWorkflow};
use crate::repository::columns::{enum_column, json_column, to_json};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const WORKFLOW_COLUMNS: &str = "workflow_id, state, current_phase, conflict_policy, snapshot_json, error_summary, created_by, created_at, updated_at, completed_at";
const PHASE_COLUMNS: &str = "phase_id, workflow_id, phase, attempt, record_status, result_json, started_at, completed_at, decided_at";
const ROLLBACK_COLUMNS: &str = "rollback_id, workflow_id, status, steps_json, warnings_json, error_message, started_at, completed_at";

fn map_workflow_row(row: &Row) -> rusqlite::Result<ImportWorkflow> {
    Ok(ImportWorkflow {
        workflow_id: row.get(0)?,
        state: enum_column(row, 1, WorkflowState::parse)?,
        current_phase: enum_column(row, 2, PhaseKind::parse)?,
        conflict_policy: enum_column(row, 3, ConflictPolicy::parse)?,
        snapshot: json_column(row, 4)?,
        error_summary: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

fn map_phase_row(row: &Row) -> rusqlite::Result<ImportPhase> {
    let record_status: String = row.get(4)?;
    Ok(ImportPhase {
        phase_id: row.get(0)?,
        workflow_id: row.get(1)?,
        phase: enum_column(row, 2, PhaseKind::parse)?,
        attempt: row.get(3)?,
        record_status: PhaseRecordStatus::parse(&record_status),
        result: json_column(row, 5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        decided_at: row.get(8)?,
    })
}

fn map_rollback_row(row: &Row) -> rusqlite::Result<ImportRollback> {
    let status: String = row.get(2)?;
    Ok(ImportRollback {
        rollback_id: row.get(0)?,
        workflow_id: row.get(1)?,
        status: RollbackStatus::parse(&status),
        steps: json_column(row, 3)?,
        warnings: json_column(row, 4)?,
        error_message: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

pub struct WorkflowRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WorkflowRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_workflow(&self, workflow_id: &str) -> RepositoryResult<Option<ImportWorkflow>> {
        let conn = self.get_conn()?;
        Self::find_workflow_tx(&conn, workflow_id)
    }

    pub fn list_workflows(&self) -> RepositoryResult<Vec<ImportWorkflow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_workflow ORDER BY created_at DESC",
            WORKFLOW_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_workflow_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_phases(&self, workflow_id: &str) -> RepositoryResult<Vec<ImportPhase>> {
        let conn = self.get_conn()?;
        Self::list_phases_tx(&conn, workflow_id)
    }

    pub fn list_rollbacks(&self, workflow_id: &str) -> RepositoryResult<Vec<ImportRollback>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_rollback WHERE workflow_id = ?1 ORDER BY started_at",
            ROLLBACK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![workflow_id], map_rollback_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_tagged(&self, workflow_id: &str) -> RepositoryResult<BTreeMap<EntityKind, usize>> {
        let conn = self.get_conn()?;
        Self::count_tagged_tx(&conn, workflow_id)
    }

    // ==========================================
    // 工作流
    // ==========================================

    pub fn insert_workflow_tx(conn: &Connection, wf: &ImportWorkflow) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO import_workflow ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                WORKFLOW_COLUMNS
            ),
            params![
                wf.workflow_id,
                wf.state.as_str(),
                wf.current_phase.as_str(),
                wf.conflict_policy.as_str(),
                to_json(&wf.snapshot)?,
                wf.error_summary,
                wf.created_by,
                wf.created_at,
                wf.updated_at,
                wf.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_workflow_tx(conn: &Connection, workflow_id: &str) -> RepositoryResult<Option<ImportWorkflow>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_workflow WHERE workflow_id = ?1",
                    WORKFLOW_COLUMNS
                ),
                params![workflow_id],
                map_workflow_row,
            )
            .optional()?)
    }

    /// 更新工作流状态（快照不可变，不在此更新）
    pub fn update_workflow_state_tx(conn: &Connection, wf: &ImportWorkflow) -> RepositoryResult<()> {
        let affected = conn.execute(
            r#"
            UPDATE import_workflow
            SET state = ?2, current_phase = ?3, error_summary = ?4, updated_at = ?5, completed_at = ?6
            WHERE workflow_id = ?1
            "#,
            params![
                wf.workflow_id,
                wf.state.as_str(),
                wf.current_phase.as_str(),
                wf.error_summary,
                wf.updated_at,
                wf.completed_at,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ImportWorkflow".to_string(),
                id: wf.workflow_id.clone(),
            });
        }
        Ok(())
    }

    /// 条件更新工作流状态：仅当库中状态仍为 expected 时写入
    ///
    /// 返回 false 表示状态已被并发操作（如 cancel）修改，未写入
    pub fn update_workflow_state_if_tx(
        conn: &Connection,
        wf: &ImportWorkflow,
        expected: WorkflowState,
    ) -> RepositoryResult<bool> {
        let affected = conn.execute(
            r#"
            UPDATE import_workflow
            SET state = ?2, current_phase = ?3, error_summary = ?4, updated_at = ?5, completed_at = ?6
            WHERE workflow_id = ?1 AND state = ?7
            "#,
            params![
                wf.workflow_id,
                wf.state.as_str(),
                wf.current_phase.as_str(),
                wf.error_summary,
                wf.updated_at,
                wf.completed_at,
                expected.as_str(),
            ],
        )?;
        Ok(affected > 0)
    }

    // ==========================================
    // 阶段记录
    // ==========================================

    pub fn next_phase_attempt_tx(conn: &Connection, workflow_id: &str, phase: PhaseKind) -> RepositoryResult<i32> {
        let max: Option<i32> = conn.query_row(
            "SELECT MAX(attempt) FROM import_phase WHERE workflow_id = ?1 AND phase = ?2",
            params![workflow_id, phase.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn insert_phase_tx(conn: &Connection, phase: &ImportPhase) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO import_phase ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                PHASE_COLUMNS
            ),
            params![
                phase.phase_id,
                phase.workflow_id,
                phase.phase.as_str(),
                phase.attempt,
                phase.record_status.as_str(),
                to_json(&phase.result)?,
                phase.started_at,
                phase.completed_at,
                phase.decided_at,
            ],
        )?;
        Ok(())
    }

    /// 最近一次阶段执行记录
    pub fn find_latest_phase_tx(
        conn: &Connection,
        workflow_id: &str,
        phase: PhaseKind,
    ) -> RepositoryResult<Option<ImportPhase>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_phase WHERE workflow_id = ?1 AND phase = ?2 ORDER BY attempt DESC LIMIT 1",
                    PHASE_COLUMNS
                ),
                params![workflow_id, phase.as_str()],
                map_phase_row,
            )
            .optional()?)
    }

    pub fn list_phases_tx(conn: &Connection, workflow_id: &str) -> RepositoryResult<Vec<ImportPhase>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_phase WHERE workflow_id = ?1 ORDER BY started_at, attempt",
            PHASE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![workflow_id], map_phase_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_phase_status_tx(
        conn: &Connection,
        phase_id: &str,
        status: PhaseRecordStatus,
        decided_at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE import_phase SET record_status = ?2, decided_at = ?3 WHERE phase_id = ?1",
            params![phase_id, status.as_str(), decided_at],
        )?;
        Ok(())
    }

    /// 将该阶段尚未决定的旧记录标记为 superseded（重试前调用）
    pub fn supersede_open_phases_tx(conn: &Connection, workflow_id: &str, phase: PhaseKind) -> RepositoryResult<usize> {
        Ok(conn.execute(
            r#"
            UPDATE import_phase
            SET record_status = ?3
            WHERE workflow_id = ?1 AND phase = ?2 AND record_status IN ('awaiting_approval', 'failed')
            "#,
            params![
                workflow_id,
                phase.as_str(),
                PhaseRecordStatus::Superseded.as_str()
            ],
        )?)
    }

    // ==========================================
    // 创建记录标记（回滚范围）
    // ==========================================

    pub fn tag_record_tx(
        conn: &Connection,
        workflow_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT OR IGNORE INTO import_workflow_record (workflow_id, entity_kind, entity_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![workflow_id, kind.as_str(), entity_id, Utc::now()],
        )?;
        Ok(())
    }

    pub fn list_tagged_ids_tx(conn: &Connection, workflow_id: &str, kind: EntityKind) -> RepositoryResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT entity_id FROM import_workflow_record WHERE workflow_id = ?1 AND entity_kind = ?2 ORDER BY entity_id",
        )?;
        let rows = stmt.query_map(params![workflow_id, kind.as_str()], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 工作流标记记录数（仅统计仍然存在的实体）
    pub fn count_tagged_tx(conn: &Connection, workflow_id: &str) -> RepositoryResult<BTreeMap<EntityKind, usize>> {
        let kinds = [
            EntityKind::Location,
            EntityKind::Saint,
            EntityKind::SaintYear,
            EntityKind::Milestone,
            EntityKind::Event,
        ];
        let mut counts = BTreeMap::new();
        for kind in kinds {
            let sql = format!(
                r#"
                SELECT COUNT(*) FROM import_workflow_record r
                JOIN {table} t ON t.id = r.entity_id
                WHERE r.workflow_id = ?1 AND r.entity_kind = ?2
                "#,
                table = kind.table()
            );
            let n: i64 = conn.query_row(&sql, params![workflow_id, kind.as_str()], |row| row.get(0))?;
            counts.insert(kind, n as usize);
        }
        Ok(counts)
    }

    /// 父记录名下未被该工作流标记的子记录数量
    ///
    /// - Saint: saint_year + milestone + event
    /// - Location: saint + event
    /// - 其余实体没有子记录，返回 0
    pub fn count_foreign_children_tx(
        conn: &Connection,
        workflow_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> RepositoryResult<usize> {
        let children_sql = match kind {
            EntityKind::Saint => {
                r#"
                SELECT id FROM saint_year WHERE saint_id = ?2
                UNION ALL SELECT id FROM milestone WHERE saint_id = ?2
                UNION ALL SELECT id FROM event WHERE saint_id = ?2
                "#
            }
            EntityKind::Location => {
                r#"
                SELECT id FROM saint WHERE location_id = ?2
                UNION ALL SELECT id FROM event WHERE location_id = ?2
                "#
            }
            _ => return Ok(0),
        };

        let sql = format!(
            r#"
            SELECT COUNT(*) FROM ({children}) c
            WHERE c.id NOT IN (
                SELECT entity_id FROM import_workflow_record WHERE workflow_id = ?1
            )
            "#,
            children = children_sql
        );
        let n: i64 = conn.query_row(&sql, params![workflow_id, entity_id], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ==========================================
    // 回滚记录
    // ==========================================

    pub fn insert_rollback_tx(conn: &Connection, rollback: &ImportRollback) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO import_rollback ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                ROLLBACK_COLUMNS
            ),
            params![
                rollback.rollback_id,
                rollback.workflow_id,
                rollback.status.as_str(),
                to_json(&rollback.steps)?,
                to_json(&rollback.warnings)?,
                rollback.error_message,
                rollback.started_at,
                rollback.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_rollback_tx(conn: &Connection, rollback: &ImportRollback) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE import_rollback
            SET status = ?2, steps_json = ?3, warnings_json = ?4, error_message = ?5, completed_at = ?6
            WHERE rollback_id = ?1
            "#,
            params![
                rollback.rollback_id,
                rollback.status.as_str(),
                to_json(&rollback.steps)?,
                to_json(&rollback.warnings)?,
                rollback.error_message,
                rollback.completed_at,
            ],
        )?;
        Ok(())
    }

    /// 最近一次未完成的回滚尝试（用于断点续跑）
    pub fn find_unfinished_rollback_tx(conn: &Connection, workflow_id: &str) -> RepositoryResult<Option<ImportRollback>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_rollback WHERE workflow_id = ?1 AND status != 'completed' ORDER BY started_at DESC LIMIT 1",
                    ROLLBACK_COLUMNS
                ),
                params![workflow_id],
                map_rollback_row,
            )
            .optional()?)
    }
}
