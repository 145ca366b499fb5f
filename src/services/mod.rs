// ==========================================
// 圣徒档案导入系统 - 服务层
// ==========================================
// 职责: 异步任务队列与执行器，承接引擎层发布的工作流事件
// ==========================================

pub mod event_adapter;
pub mod job_queue;
pub mod job_worker;

pub use event_adapter::JobQueueAdapter;
pub use job_queue::{JobQueue, JobQueueError, JobQueueResult};
pub use job_worker::{JobHandler, JobWorker, PipelineJobHandler};
