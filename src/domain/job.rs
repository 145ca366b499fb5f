// ==========================================
// 圣徒档案导入系统 - 异步任务领域模型
// ==========================================
// 红线: 不做自动重试，重试必须由人工显式发起
// ==========================================

use crate::domain::types::{JobState, JobType};
use serde::{Deserialize, Serialize};

/// 队列中的任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// 进度（0.0 - 1.0）
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// 人工重试时指向原任务
    pub retry_of: Option<String>,
    /// 持有租约的 worker
    pub lease_owner: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// 任务状态查询结果（供看板展示）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub job_type: JobType,
    pub state: JobState,
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            job_type: job.job_type,
            state: job.state,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error_message.clone(),
        }
    }
}

/// 队列统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_count: u32,
    pub running_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub cancelled_count: u32,
}
