// ==========================================
// 圣徒档案导入系统 - 任务队列
// ==========================================
// 职责: 持久化导入 / 回滚 / 清理任务，供 worker 领取执行
// 红线:
// - 领取为条件 UPDATE（PENDING → RUNNING），同一任务只会被一个 worker 领取
// - 不做自动重试；retry 创建新任务并通过 retry_of 关联原任务
// ==========================================

use crate::domain::job::{Job, JobStatus, QueueStats};
use crate::domain::types::{JobState, JobType};
use crate::repository::columns::{enum_column, json_column, opt_json_column};
use crate::repository::error::RepositoryError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum JobQueueError {
    #[error("任务不存在: {0}")]
    NotFound(String),

    #[error("任务 {job_id} 状态为 {state}，不允许 {action}")]
    InvalidState {
        job_id: String,
        state: String,
        action: String,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<rusqlite::Error> for JobQueueError {
    fn from(err: rusqlite::Error) -> Self {
        JobQueueError::Repository(err.into())
    }
}

impl From<serde_json::Error> for JobQueueError {
    fn from(err: serde_json::Error) -> Self {
        JobQueueError::Repository(err.into())
    }
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

const JOB_COLUMNS: &str = "job_id, job_type, payload_json, state, progress, result_json, error_message, retry_of, lease_owner, created_at, started_at, completed_at";

fn map_job_row(row: &Row) -> rusqlite::Result<Job> {
    let state: String = row.get(3)?;

    Ok(Job {
        job_id: row.get(0)?,
        job_type: enum_column(row, 1, JobType::parse)?,
        payload: json_column(row, 2)?,
        state: JobState::parse(&state),
        progress: row.get(4)?,
        result: opt_json_column(row, 5)?,
        error_message: row.get(6)?,
        retry_of: row.get(7)?,
        lease_owner: row.get(8)?,
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

/// 任务队列
pub struct JobQueue {
    conn: Arc<Mutex<Connection>>,
}

impl JobQueue {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> JobQueueResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| JobQueueError::Repository(RepositoryError::LockError(e.to_string())))
    }

    /// 提交任务
    pub fn enqueue(&self, job_type: JobType, payload: serde_json::Value) -> JobQueueResult<String> {
        let conn = self.get_conn()?;
        let job_id = Uuid::new_v4().to_string();
        insert_job(&conn, &job_id, job_type, &payload, None)?;
        tracing::info!(job_id = %job_id, job_type = job_type.as_str(), "任务已加入队列");
        Ok(job_id)
    }

    /// 领取最早的待执行任务
    ///
    /// 先查询候选，再以 `WHERE state = 'PENDING'` 条件更新；
    /// 更新影响 0 行说明已被其他 worker 领取，继续尝试下一个候选
    pub fn lease_next(&self, worker_id: &str) -> JobQueueResult<Option<Job>> {
        let conn = self.get_conn()?;

        let candidates: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT job_id FROM import_job WHERE state = 'PENDING' ORDER BY created_at ASC, rowid ASC LIMIT 8",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for job_id in candidates {
            let affected = conn.execute(
                r#"
                UPDATE import_job
                SET state = 'RUNNING', lease_owner = ?2, started_at = ?3
                WHERE job_id = ?1 AND state = 'PENDING'
                "#,
                params![job_id, worker_id, Utc::now().to_rfc3339()],
            )?;
            if affected == 1 {
                tracing::info!(job_id = %job_id, worker_id = %worker_id, "任务已领取");
                return Ok(find_job(&conn, &job_id)?);
            }
        }

        Ok(None)
    }

    /// 更新运行中任务的进度（0.0 - 1.0）
    pub fn update_progress(&self, job_id: &str, progress: f64) -> JobQueueResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE import_job SET progress = ?2 WHERE job_id = ?1 AND state = 'RUNNING'",
            params![job_id, progress.clamp(0.0, 1.0)],
        )?;
        Ok(())
    }

    pub fn complete(&self, job_id: &str, result: &serde_json::Value) -> JobQueueResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            UPDATE import_job
            SET state = 'COMPLETED', progress = 1.0, result_json = ?2, completed_at = ?3
            WHERE job_id = ?1 AND state = 'RUNNING'
            "#,
            params![job_id, serde_json::to_string(result)?, Utc::now().to_rfc3339()],
        )?;
        tracing::info!(job_id = %job_id, "任务执行成功");
        Ok(())
    }

    pub fn fail(&self, job_id: &str, error: &str) -> JobQueueResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            UPDATE import_job
            SET state = 'FAILED', error_message = ?2, completed_at = ?3
            WHERE job_id = ?1 AND state = 'RUNNING'
            "#,
            params![job_id, error, Utc::now().to_rfc3339()],
        )?;
        tracing::error!(job_id = %job_id, error = %error, "任务执行失败");
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> JobQueueResult<Job> {
        let conn = self.get_conn()?;
        find_job(&conn, job_id)?.ok_or_else(|| JobQueueError::NotFound(job_id.to_string()))
    }

    pub fn get_status(&self, job_id: &str) -> JobQueueResult<JobStatus> {
        Ok(JobStatus::from(&self.get_job(job_id)?))
    }

    pub fn list_jobs(&self) -> JobQueueResult<Vec<Job>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_job ORDER BY created_at DESC, rowid DESC",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_job_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 取消任务（仅 PENDING）
    pub fn cancel(&self, job_id: &str) -> JobQueueResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE import_job SET state = 'CANCELLED', completed_at = ?2 WHERE job_id = ?1 AND state = 'PENDING'",
            params![job_id, Utc::now().to_rfc3339()],
        )?;

        if affected == 0 {
            let job = find_job(&conn, job_id)?.ok_or_else(|| JobQueueError::NotFound(job_id.to_string()))?;
            return Err(JobQueueError::InvalidState {
                job_id: job_id.to_string(),
                state: job.state.as_str().to_string(),
                action: "cancel".to_string(),
            });
        }

        tracing::info!(job_id = %job_id, "任务已取消");
        Ok(())
    }

    /// 人工重试：以原始 payload 创建新任务（仅 FAILED / CANCELLED）
    pub fn retry(&self, job_id: &str) -> JobQueueResult<String> {
        let conn = self.get_conn()?;
        let job = find_job(&conn, job_id)?.ok_or_else(|| JobQueueError::NotFound(job_id.to_string()))?;

        if !matches!(job.state, JobState::Failed | JobState::Cancelled) {
            return Err(JobQueueError::InvalidState {
                job_id: job_id.to_string(),
                state: job.state.as_str().to_string(),
                action: "retry".to_string(),
            });
        }

        let new_id = Uuid::new_v4().to_string();
        insert_job(&conn, &new_id, job.job_type, &job.payload, Some(job_id))?;
        tracing::info!(job_id = %new_id, retry_of = %job_id, "任务已重新提交");
        Ok(new_id)
    }

    /// 队列统计信息
    pub fn queue_stats(&self) -> JobQueueResult<QueueStats> {
        let conn = self.get_conn()?;
        let mut stats = QueueStats::default();

        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM import_job GROUP BY state")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (state, count) = row?;
            let count = count as u32;
            match JobState::parse(&state) {
                JobState::Pending => stats.pending_count = count,
                JobState::Running => stats.running_count = count,
                JobState::Completed => stats.completed_count = count,
                JobState::Failed => stats.failed_count += count,
                JobState::Cancelled => stats.cancelled_count = count,
            }
        }

        Ok(stats)
    }
}

fn insert_job(
    conn: &Connection,
    job_id: &str,
    job_type: JobType,
    payload: &serde_json::Value,
    retry_of: Option<&str>,
) -> JobQueueResult<()> {
    conn.execute(
        r#"
        INSERT INTO import_job (job_id, job_type, payload_json, state, progress, retry_of, created_at)
        VALUES (?1, ?2, ?3, 'PENDING', 0, ?4, ?5)
        "#,
        params![
            job_id,
            job_type.as_str(),
            serde_json::to_string(payload)?,
            retry_of,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn find_job(conn: &Connection, job_id: &str) -> JobQueueResult<Option<Job>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM import_job WHERE job_id = ?1", JOB_COLUMNS),
            params![job_id],
            map_job_row,
        )
        .optional()?)
}
