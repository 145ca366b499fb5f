// ==========================================
// 圣徒档案导入系统 - 引擎层事件发布
// ==========================================
// 职责: 定义工作流事件发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Services 层（任务队列）实现适配器
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 工作流事件类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEventType {
    /// count 阶段审批通过，需要执行 import 阶段
    ImportApproved,
}

impl WorkflowEventType {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowEventType::ImportApproved => "ImportApproved",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub workflow_id: String,
    pub event_type: WorkflowEventType,
    /// 事件来源描述
    pub source: Option<String>,
}

impl WorkflowEvent {
    pub fn new(workflow_id: impl Into<String>, event_type: WorkflowEventType, source: Option<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            event_type,
            source,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 工作流事件发布者
///
/// # 实现说明
/// - Services 层的 `JobQueue` 实现此 trait，将事件转换为任务并入队
///
/// # 返回
/// - `Ok(job_id)`: 入队的任务 ID（不支持时为空字符串）
pub trait WorkflowEventPublisher: Send + Sync {
    fn publish(&self, event: WorkflowEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者（单元测试或同步执行场景）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl WorkflowEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: WorkflowEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - workflow_id={}, event_type={}",
            event.workflow_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 简化 Option<Arc<dyn WorkflowEventPublisher>> 的使用
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn WorkflowEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn WorkflowEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件；未配置发布者时返回 Ok(None)
    pub fn publish(&self, event: WorkflowEvent) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event).map(Some),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - workflow_id={}, event_type={}",
                    event.workflow_id,
                    event.event_type.as_str()
                );
                Ok(None)
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_publisher() {
        let publisher = NoOpEventPublisher;
        let event = WorkflowEvent::new("WF001", WorkflowEventType::ImportApproved, None);

        let result = publisher.publish(event);
        assert!(result.is_ok());
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_optional_publisher_none() {
        let publisher = OptionalEventPublisher::none();
        assert!(!publisher.is_configured());

        let event = WorkflowEvent::new("WF001", WorkflowEventType::ImportApproved, None);
        assert_eq!(publisher.publish(event).unwrap(), None);
    }

    #[test]
    fn test_optional_publisher_with_noop() {
        let publisher = OptionalEventPublisher::with_publisher(Arc::new(NoOpEventPublisher));
        assert!(publisher.is_configured());

        let event = WorkflowEvent::new("WF001", WorkflowEventType::ImportApproved, Some("orchestrator".to_string()));
        assert_eq!(publisher.publish(event).unwrap(), Some(String::new()));
    }
}
