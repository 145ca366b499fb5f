// ==========================================
// 圣徒档案导入系统 - 表头映射
// ==========================================
// 职责: 表头文本 → 列索引
// 规则: 大小写不敏感、忽略全部空白（"Saint  Number" == "saintnumber"）
// ==========================================

use std::collections::HashMap;

/// 规范化表头文本
pub fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 规范化后的表头 → 列索引
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    columns: HashMap<String, usize>,
}

impl HeaderMap {
    /// 从表头行构建（重复表头取第一次出现）
    pub fn from_header_row(header: &[String]) -> Self {
        let mut columns = HashMap::new();
        for (idx, raw) in header.iter().enumerate() {
            let key = normalize_header(raw);
            if key.is_empty() {
                continue;
            }
            columns.entry(key).or_insert(idx);
        }
        Self { columns }
    }

    /// 按别名列表查找列索引
    pub fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.columns.get(&normalize_header(alias)).copied())
    }

    pub fn contains(&self, aliases: &[&str]) -> bool {
        self.find(aliases).is_some()
    }

    /// 读取单元格（去除首尾空白，空串视为缺失）
    pub fn cell<'a>(&self, row: &'a [String], aliases: &[&str]) -> Option<&'a str> {
        let idx = self.find(aliases)?;
        let value = row.get(idx)?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lookup_ignores_case_and_spaces() {
        let map = HeaderMap::from_header_row(&header(&["Saint Number", " HISTORICAL  YEAR "]));
        assert_eq!(map.find(&["saintnumber"]), Some(0));
        assert_eq!(map.find(&["Historical Year"]), Some(1));
        assert_eq!(map.find(&["Year"]), None);
    }

    #[test]
    fn test_alias_order_and_blank_cells() {
        let map = HeaderMap::from_header_row(&header(&["Number", "Name"]));
        let row = header(&["  ", "Alice"]);
        assert_eq!(map.find(&["Saint Number", "Number"]), Some(0));
        assert_eq!(map.cell(&row, &["Saint Number", "Number"]), None);
        assert_eq!(map.cell(&row, &["Name"]), Some("Alice"));
    }
}
