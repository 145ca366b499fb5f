// ==========================================
// 圣徒档案导入系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 事务: *_tx 关联函数接收 &Connection，供引擎在单个事务内组合调用
// ==========================================

pub(crate) mod columns;
pub mod error;
pub mod event_repo;
pub mod location_repo;
pub mod milestone_repo;
pub mod saint_repo;
pub mod saint_year_repo;
pub mod workflow_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use event_repo::EventRepository;
pub use location_repo::LocationRepository;
pub use milestone_repo::MilestoneRepository;
pub use saint_repo::SaintRepository;
pub use saint_year_repo::SaintYearRepository;
pub use workflow_repo::WorkflowRepository;
