// ==========================================
// 圣徒档案导入系统 - 事件适配器
// ==========================================
// 职责: 实现 Engine 层定义的 WorkflowEventPublisher trait
// 说明: 将 WorkflowEvent 转换为队列任务并入队
// ==========================================

use super::job_queue::JobQueue;
use crate::domain::types::JobType;
use crate::engine::events::{WorkflowEvent, WorkflowEventPublisher, WorkflowEventType};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;

/// 任务队列适配器
pub struct JobQueueAdapter {
    queue: Arc<JobQueue>,
}

impl JobQueueAdapter {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    fn convert_event_type(event_type: &WorkflowEventType) -> JobType {
        match event_type {
            WorkflowEventType::ImportApproved => JobType::Import,
        }
    }
}

impl WorkflowEventPublisher for JobQueueAdapter {
    fn publish(&self, event: WorkflowEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let job_type = Self::convert_event_type(&event.event_type);
        let payload = json!({
            "workflow_id": event.workflow_id,
            "source": event.source,
        });

        match self.queue.enqueue(job_type, payload) {
            Ok(job_id) => {
                tracing::info!(
                    "JobQueueAdapter: 事件已转换并入队 - job_id={}, workflow_id={}, event_type={}",
                    job_id,
                    event.workflow_id,
                    event.event_type.as_str()
                );
                Ok(job_id)
            }
            Err(e) => {
                tracing::error!(
                    "JobQueueAdapter: 入队失败 - workflow_id={}, error={}",
                    event.workflow_id,
                    e
                );
                Err(Box::new(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use std::sync::Mutex;

    #[test]
    fn test_import_approved_enqueues_import_job() {
        let conn = Arc::new(Mutex::new(open_in_memory().unwrap()));
        let queue = Arc::new(JobQueue::new(conn));
        let adapter = JobQueueAdapter::new(queue.clone());

        let job_id = adapter
            .publish(WorkflowEvent::new("WF001", WorkflowEventType::ImportApproved, None))
            .unwrap();

        let job = queue.get_job(&job_id).unwrap();
        assert_eq!(job.job_type, JobType::Import);
        assert_eq!(job.payload["workflow_id"], "WF001");
    }
}
