// ==========================================
// 圣徒档案导入系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态与引擎实例
// 说明: 所有组件共享同一个数据库连接
// ==========================================

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::config::{ConfigManager, PipelineConfig};
use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::workflow::SourceSnapshot;
use crate::engine::{DedupEngine, OptionalEventPublisher, PhaseOrchestrator, RollbackManager, WorkflowEventPublisher};
use crate::importer::{source_for_path, ImportResult, RateLimitedSource, SnapshotLoader};
use crate::services::{JobQueue, JobQueueAdapter, JobWorker, PipelineJobHandler};

/// 应用状态
pub struct AppState {
    pub config: PipelineConfig,

    /// 共享数据库连接
    pub conn: Arc<Mutex<Connection>>,

    pub config_manager: Arc<ConfigManager>,

    /// 阶段编排器（count 审批后经任务队列调度 import）
    pub orchestrator: Arc<PhaseOrchestrator>,

    pub rollback: Arc<RollbackManager>,

    pub dedup: Arc<DedupEngine>,

    pub job_queue: Arc<JobQueue>,
}

impl AppState {
    /// 打开 config.db_path 指向的数据库并完成组装
    ///
    /// config_kv 中的配置在连接打开后合并，环境变量最后覆写
    pub async fn new(config: PipelineConfig) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", config.db_path);

        let conn = open_sqlite_connection(&config.db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("建表失败: {}", e))?;
        Self::from_connection(Arc::new(Mutex::new(conn)), config).await
    }

    /// 从已有连接组装（测试使用内存库）
    pub async fn from_connection(conn: Arc<Mutex<Connection>>, base: PipelineConfig) -> Result<Self, String> {
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone()).map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config = config_manager
            .load_pipeline_config(base)
            .await
            .map_err(|e| format!("配置加载失败: {}", e))?;

        let job_queue = Arc::new(JobQueue::new(conn.clone()));

        // 使用事件发布器而非直接依赖 JobQueue，实现依赖倒置
        let publisher: Arc<dyn WorkflowEventPublisher> = Arc::new(JobQueueAdapter::new(job_queue.clone()));
        let orchestrator = Arc::new(
            PhaseOrchestrator::new(conn.clone()).with_publisher(OptionalEventPublisher::with_publisher(publisher)),
        );
        let rollback = Arc::new(RollbackManager::new(conn.clone()));
        let dedup = Arc::new(DedupEngine::new(conn.clone()).with_batch_size(config.dedup_batch_size));

        tracing::info!(
            conflict_mode = %config.conflict_mode,
            dedup_batch_size = config.dedup_batch_size,
            worker_poll_ms = config.worker_poll_ms,
            "AppState初始化成功"
        );

        Ok(Self {
            config,
            conn,
            config_manager,
            orchestrator,
            rollback,
            dedup,
            job_queue,
        })
    }

    /// 从数据源目录读取快照（按配置限速）
    pub async fn load_snapshot(&self, root: &Path, master_sheet_id: &str) -> ImportResult<SourceSnapshot> {
        let source = RateLimitedSource::new(source_for_path(root), Duration::from_millis(self.config.source_delay_ms));
        SnapshotLoader::new(&source).load(master_sheet_id).await
    }

    /// 创建任务执行器
    pub fn worker(&self) -> JobWorker {
        let handler = Arc::new(PipelineJobHandler::new(
            self.orchestrator.clone(),
            self.rollback.clone(),
            self.dedup.clone(),
        ));
        JobWorker::new(
            self.job_queue.clone(),
            handler,
            Duration::from_millis(self.config.worker_poll_ms),
        )
    }
}
