// ==========================================
// 圣徒档案导入系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分层:
// - ImportError: 数据源读取失败（文件/表格/页签），向调用方返回
// - RowError / MissingHeaderError: 页签处理结果中的数据，不抛出
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 导入模块错误类型（数据源层）
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xls/.csv）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    // ===== 数据源错误 =====
    #[error("表格不存在: {0}")]
    SheetNotFound(String),

    #[error("页签不存在 (表格 {sheet_id}): {tab}")]
    TabNotFound { sheet_id: String, tab: String },

    #[error("快照序列化失败: {0}")]
    SnapshotError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::SnapshotError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

// ==========================================
// 页签处理结果中的错误数据
// ==========================================

/// 行级校验错误（非致命，收集后继续处理）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 原始行号（表头为第 0 行）
    pub row_index: usize,
    pub field: String,
    pub reason: String,
}

impl RowError {
    pub fn new(row_index: usize, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            row_index,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "行 {} 字段 {}: {}", self.row_index, self.field, self.reason)
    }
}

/// 页签级表头缺失（致命于该页签，其他页签不受影响）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingHeaderError {
    pub tab: String,
    /// 缺失的全部必填表头
    pub headers: Vec<String>,
}

impl fmt::Display for MissingHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "页签 {} 缺少表头: {}", self.tab, self.headers.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TabIssue {
    Row(RowError),
    MissingHeader(MissingHeaderError),
}

impl TabIssue {
    pub fn is_missing_header(&self) -> bool {
        matches!(self, TabIssue::MissingHeader(_))
    }
}

impl fmt::Display for TabIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabIssue::Row(e) => e.fmt(f),
            TabIssue::MissingHeader(e) => e.fmt(f),
        }
    }
}

/// 页签处理输出
///
/// # 约束
/// - 表头齐全时: records.len() + errors.len() == rows.len() - 1
/// - 表头缺失时: records 为空，errors 仅含一条 MissingHeader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabOutput<T> {
    pub records: Vec<T>,
    pub errors: Vec<TabIssue>,
}

impl<T> Default for TabOutput<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> TabOutput<T> {
    pub fn missing_header(tab: &str, headers: Vec<String>) -> Self {
        Self {
            records: Vec::new(),
            errors: vec![TabIssue::MissingHeader(MissingHeaderError {
                tab: tab.to_string(),
                headers,
            })],
        }
    }

    pub fn header_failed(&self) -> bool {
        self.errors.iter().any(TabIssue::is_missing_header)
    }

    pub fn row_errors(&self) -> impl Iterator<Item = &RowError> {
        self.errors.iter().filter_map(|e| match e {
            TabIssue::Row(r) => Some(r),
            TabIssue::MissingHeader(_) => None,
        })
    }
}
