// ==========================================
// 圣徒档案导入系统 - 导入层
// ==========================================
// 职责: 外部表格 → 源数据快照 → 已校验的页签记录
// 支持: CSV 目录, Excel 工作簿, 内存数据源
// ==========================================

// 模块声明
pub mod conflict_handler;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod header_map;
pub mod tab_source;
pub mod value_parser;

// 重导出核心类型
pub use conflict_handler::{BatchKey, ConflictHandler};
pub use error::{ImportError, ImportResult, MissingHeaderError, RowError, TabIssue, TabOutput};
pub use field_mapper::{
    map_location, process_historical_tab, process_locations_tab, process_milestone_tab,
    process_saints_tab, process_sheet_tab,
};
pub use file_parser::{CsvParser, ExcelParser};
pub use header_map::HeaderMap;
pub use tab_source::{
    source_for_path, CsvTabSource, InMemoryTabSource, RateLimitedSource, SnapshotLoader,
    TabSource, WorkbookTabSource,
};
