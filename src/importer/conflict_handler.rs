// ==========================================
// 圣徒档案导入系统 - 冲突处理器实现
// ==========================================
// 职责: 检测同批次内 / 跨批次（已入库）重复自然键
// 说明: 仅检测并报告，实际写入行为由导入执行器的冲突策略决定
// ==========================================

use crate::domain::saint::{HistoricalRow, LocationRow, MilestoneRow, SaintRow};
use std::collections::{HashMap, HashSet};

/// 批次内自然键
pub trait BatchKey {
    fn batch_key(&self) -> String;
    fn row_number(&self) -> usize;
}

impl BatchKey for LocationRow {
    fn batch_key(&self) -> String {
        self.sheet_id.clone()
    }
    fn row_number(&self) -> usize {
        self.row_number
    }
}

impl BatchKey for SaintRow {
    fn batch_key(&self) -> String {
        self.saint_number.clone()
    }
    fn row_number(&self) -> usize {
        self.row_number
    }
}

impl BatchKey for HistoricalRow {
    fn batch_key(&self) -> String {
        format!("{}/{}", self.saint_number, self.year)
    }
    fn row_number(&self) -> usize {
        self.row_number
    }
}

impl BatchKey for MilestoneRow {
    fn batch_key(&self) -> String {
        format!("{}/{}", self.saint_number, self.count)
    }
    fn row_number(&self) -> usize {
        self.row_number
    }
}

pub struct ConflictHandler;

impl ConflictHandler {
    /// 检测同批次内重复自然键
    ///
    /// # 返回
    /// - Vec<(行号, 自然键)>: 重复记录列表（不包括第一次出现）
    pub fn detect_duplicates<T: BatchKey>(&self, records: &[T]) -> Vec<(usize, String)> {
        let mut first_occurrence: HashMap<String, usize> = HashMap::new();
        let mut duplicates = Vec::new();

        for record in records {
            let key = record.batch_key();
            if first_occurrence.contains_key(&key) {
                duplicates.push((record.row_number(), key));
            } else {
                first_occurrence.insert(key, record.row_number());
            }
        }

        duplicates
    }

    /// 检测跨批次重复（已入库的自然键）
    ///
    /// # 参数
    /// - records: 待导入记录列表
    /// - existing_keys: 数据库中已存在的自然键列表
    pub fn detect_cross_batch_duplicates<T: BatchKey>(
        &self,
        records: &[T],
        existing_keys: &[String],
    ) -> Vec<(usize, String)> {
        let existing_set: HashSet<&String> = existing_keys.iter().collect();
        records
            .iter()
            .filter_map(|record| {
                let key = record.batch_key();
                existing_set
                    .contains(&key)
                    .then(|| (record.row_number(), key))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(sheet_id: &str, row_number: usize) -> LocationRow {
        LocationRow {
            sheet_id: sheet_id.to_string(),
            state: "TX".to_string(),
            city: "Austin".to_string(),
            name: None,
            address: "1 Main St".to_string(),
            status: "open".to_string(),
            is_open: None,
            is_active: None,
            row_number,
        }
    }

    #[test]
    fn test_detect_duplicates_none() {
        let handler = ConflictHandler;
        let records = vec![location("s-1", 1), location("s-2", 2)];
        assert!(handler.detect_duplicates(&records).is_empty());
    }

    #[test]
    fn test_detect_duplicates_multiple() {
        let handler = ConflictHandler;
        let records = vec![location("s-1", 1), location("s-1", 2), location("s-1", 3)];

        let duplicates = handler.detect_duplicates(&records);

        assert_eq!(duplicates.len(), 2);
        assert_eq!(duplicates[0].0, 2);
        assert_eq!(duplicates[1].0, 3);
    }

    #[test]
    fn test_detect_cross_batch_duplicates() {
        let handler = ConflictHandler;
        let records = vec![location("s-1", 1), location("s-2", 2)];
        let existing = vec!["s-1".to_string()];

        let duplicates = handler.detect_cross_batch_duplicates(&records, &existing);

        assert_eq!(duplicates, vec![(1, "s-1".to_string())]);
    }
}
