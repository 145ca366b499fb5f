// ==========================================
// 圣徒档案导入系统 - 任务执行器
// ==========================================
// 职责: 轮询任务队列，领取任务并交给 JobHandler 执行
// 说明: 引擎为同步实现，执行放入 spawn_blocking，避免阻塞异步运行时
// ==========================================

use super::job_queue::{JobQueue, JobQueueError, JobQueueResult};
use crate::domain::job::Job;
use crate::domain::types::{JobType, PhaseStatus, RollbackStatus};
use crate::engine::{DedupEngine, DedupTarget, PhaseOrchestrator, RollbackManager};
use crate::repository::error::RepositoryError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 任务处理器
///
/// 返回 Ok(result) 时任务记为 COMPLETED，Err(message) 时记为 FAILED
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, queue: Arc<JobQueue>) -> Result<serde_json::Value, String>;
}

// ==========================================
// PipelineJobHandler - 导入 / 回滚 / 清理
// ==========================================
pub struct PipelineJobHandler {
    orchestrator: Arc<PhaseOrchestrator>,
    rollback: Arc<RollbackManager>,
    dedup: Arc<DedupEngine>,
}

impl PipelineJobHandler {
    pub fn new(
        orchestrator: Arc<PhaseOrchestrator>,
        rollback: Arc<RollbackManager>,
        dedup: Arc<DedupEngine>,
    ) -> Self {
        Self {
            orchestrator,
            rollback,
            dedup,
        }
    }
}

fn workflow_id_of(job: &Job) -> Result<String, String> {
    job.payload
        .get("workflow_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| format!("任务 {} 缺少 workflow_id", job.job_id))
}

async fn run_blocking<T, F>(f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| format!("任务线程异常: {}", e))?
}

#[async_trait]
impl JobHandler for PipelineJobHandler {
    async fn handle(&self, job: &Job, queue: Arc<JobQueue>) -> Result<serde_json::Value, String> {
        match job.job_type {
            JobType::Import => {
                let workflow_id = workflow_id_of(job)?;
                let orchestrator = self.orchestrator.clone();
                let job_id = job.job_id.clone();

                run_blocking(move || {
                    let result = orchestrator
                        .execute_current_phase_with_progress(&workflow_id, |done, total| {
                            if total == 0 {
                                return;
                            }
                            if let Err(e) = queue.update_progress(&job_id, done as f64 / total as f64) {
                                warn!(job_id = %job_id, error = %e, "进度更新失败");
                            }
                        })
                        .map_err(|e| e.to_string())?;

                    if result.status == PhaseStatus::Error {
                        return Err(result.summary);
                    }
                    serde_json::to_value(&result).map_err(|e| e.to_string())
                })
                .await
            }
            JobType::Rollback => {
                let workflow_id = workflow_id_of(job)?;
                let rollback = self.rollback.clone();

                run_blocking(move || {
                    let outcome = rollback.execute_rollback(&workflow_id).map_err(|e| e.to_string())?;
                    if outcome.status == RollbackStatus::Failed {
                        return Err(outcome
                            .error_message
                            .unwrap_or_else(|| "回滚失败".to_string()));
                    }
                    serde_json::to_value(&outcome).map_err(|e| e.to_string())
                })
                .await
            }
            JobType::Reconcile => {
                let dry_run = job.payload.get("dry_run").and_then(|v| v.as_bool()).unwrap_or(false);
                let target = match job.payload.get("target").and_then(|v| v.as_str()) {
                    Some(raw) => Some(DedupTarget::parse(raw).ok_or_else(|| format!("未知清理目标: {}", raw))?),
                    None => None,
                };
                let dedup = self.dedup.clone();

                run_blocking(move || {
                    let reports = match target {
                        Some(target) => vec![dedup.reconcile(target, dry_run).map_err(|e| e.to_string())?],
                        None => dedup.reconcile_all(dry_run).map_err(|e| e.to_string())?,
                    };
                    Ok(json!({ "reports": reports }))
                })
                .await
            }
        }
    }
}

// ==========================================
// JobWorker
// ==========================================
pub struct JobWorker {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    worker_id: String,
}

impl JobWorker {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>, poll_interval: Duration) -> Self {
        Self {
            queue,
            handler,
            poll_interval,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 领取并执行一个任务
    ///
    /// # 返回
    /// - Ok(Some(job_id)): 已处理的任务
    /// - Ok(None): 队列为空
    pub async fn run_once(&self) -> JobQueueResult<Option<String>> {
        let worker_id = self.worker_id.clone();
        let leased = self.with_queue(move |queue| queue.lease_next(&worker_id)).await?;

        let job = match leased {
            Some(job) => job,
            None => return Ok(None),
        };

        info!(job_id = %job.job_id, job_type = job.job_type.as_str(), "开始执行任务");
        let outcome = self.handler.handle(&job, self.queue.clone()).await;
        let job_id = job.job_id.clone();
        self.with_queue(move |queue| match outcome {
            Ok(result) => queue.complete(&job_id, &result),
            Err(message) => queue.fail(&job_id, &message),
        })
        .await?;

        Ok(Some(job.job_id))
    }

    /// 队列操作持有同步锁，放入阻塞线程执行
    async fn with_queue<T, F>(&self, f: F) -> JobQueueResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobQueue) -> JobQueueResult<T> + Send + 'static,
    {
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || f(queue.as_ref()))
            .await
            .map_err(|e| JobQueueError::Repository(RepositoryError::InternalError(e.to_string())))?
    }

    /// 持续轮询直到收到停止信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "任务执行器已启动");
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // 一次 tick 内把队列处理空
                    loop {
                        match self.run_once().await {
                            Ok(Some(job_id)) => debug!(job_id = %job_id, "任务处理完成"),
                            Ok(None) => break,
                            Err(e) => {
                                error!(error = %e, "任务处理异常");
                                break;
                            }
                        }
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "任务执行器已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::types::JobState;
    use std::sync::Mutex;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        async fn handle(&self, job: &Job, _queue: Arc<JobQueue>) -> Result<serde_json::Value, String> {
            if job.payload.get("fail").is_some() {
                return Err("echo failure".to_string());
            }
            Ok(job.payload.clone())
        }
    }

    fn setup_worker() -> (Arc<JobQueue>, JobWorker) {
        let conn = Arc::new(Mutex::new(open_in_memory().unwrap()));
        let queue = Arc::new(JobQueue::new(conn));
        let worker = JobWorker::new(queue.clone(), Arc::new(EchoHandler), Duration::from_millis(10));
        (queue, worker)
    }

    #[tokio::test]
    async fn test_run_once_completes_job() {
        let (queue, worker) = setup_worker();
        let job_id = queue.enqueue(JobType::Reconcile, json!({"value": 1})).unwrap();

        assert_eq!(worker.run_once().await.unwrap(), Some(job_id.clone()));
        let status = queue.get_status(&job_id).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.result, Some(json!({"value": 1})));

        assert_eq!(worker.run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_once_records_failure() {
        let (queue, worker) = setup_worker();
        let job_id = queue.enqueue(JobType::Import, json!({"fail": true})).unwrap();

        worker.run_once().await.unwrap();
        let job = queue.get_job(&job_id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_message.as_deref(), Some("echo failure"));
        assert_eq!(job.lease_owner.as_deref(), Some(worker.worker_id()));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (queue, worker) = setup_worker();
        let job_id = queue.enqueue(JobType::Reconcile, json!({})).unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        for _ in 0..100 {
            if queue.get_status(&job_id).unwrap().state == JobState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(queue.get_status(&job_id).unwrap().state, JobState::Completed);
    }

    /// 返回前让另一线程持有连接锁一段时间
    struct LockHoldingHandler {
        conn: Arc<Mutex<rusqlite::Connection>>,
        ticks: Arc<std::sync::atomic::AtomicUsize>,
        ticks_at_return: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for LockHoldingHandler {
        async fn handle(&self, _job: &Job, _queue: Arc<JobQueue>) -> Result<serde_json::Value, String> {
            let conn = self.conn.clone();
            let (locked_tx, locked_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _guard = conn.lock().unwrap();
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
            });
            locked_rx.recv().unwrap();
            self.ticks_at_return
                .store(self.ticks.load(std::sync::atomic::Ordering::SeqCst), std::sync::atomic::Ordering::SeqCst);
            Ok(json!({}))
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_completion_write_does_not_block_runtime() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let conn = Arc::new(Mutex::new(open_in_memory().unwrap()));
        let queue = Arc::new(JobQueue::new(conn.clone()));
        let job_id = queue.enqueue(JobType::Reconcile, json!({})).unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_at_return = Arc::new(AtomicUsize::new(0));
        let handler = LockHoldingHandler {
            conn,
            ticks: ticks.clone(),
            ticks_at_return: ticks_at_return.clone(),
        };
        let worker = JobWorker::new(queue.clone(), Arc::new(handler), Duration::from_millis(10));

        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(worker.run_once().await.unwrap(), Some(job_id.clone()));
        ticker.abort();

        // 等待锁期间运行时仍在调度其他任务
        assert!(ticks.load(Ordering::SeqCst) >= ticks_at_return.load(Ordering::SeqCst) + 2);
        assert_eq!(queue.get_status(&job_id).unwrap().state, JobState::Completed);
    }
}
