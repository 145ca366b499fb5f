// ==========================================
// 圣徒档案导入系统 - 应用层
// ==========================================
// 职责: 组装共享连接、配置、引擎与任务队列
// ==========================================

pub mod state;

pub use state::AppState;
