// ==========================================
// 圣徒档案导入系统 - 列编解码辅助
// ==========================================
// JSON 列 / 枚举文本列 与 Rust 类型之间的转换
// ==========================================

use crate::repository::error::RepositoryResult;
use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> RepositoryResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// 读取 JSON 文本列
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 读取可空 JSON 文本列
pub(crate) fn opt_json_column<T: DeserializeOwned>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// 读取枚举文本列（无法识别时返回转换错误）
pub(crate) fn enum_column<T>(
    row: &Row,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("无法识别的枚举值: {}", raw).into(),
        )
    })
}
