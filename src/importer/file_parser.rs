// ==========================================
// 圣徒档案导入系统 - 文件解析器实现
// ==========================================
// 支持: Excel (.xlsx/.xls/.ods) / CSV (.csv)
// 输出: 按行的原始文本（第 0 行为表头），空行保留，交由字段映射器计数
// ==========================================

use crate::domain::workflow::RawTab;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto, Reader};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

fn check_exists(path: &Path) -> ImportResult<()> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl CsvParser {
    /// 探测分隔符（表头行中 ';' 多于 ',' 时使用 ';'）
    fn sniff_delimiter(path: &Path) -> ImportResult<u8> {
        let mut first_line = String::new();
        BufReader::new(File::open(path)?).read_line(&mut first_line)?;
        let semicolons = first_line.matches(';').count();
        let commas = first_line.matches(',').count();
        Ok(if semicolons > commas { b';' } else { b',' })
    }

    pub fn read_rows(&self, file_path: &Path) -> ImportResult<Vec<Vec<String>>> {
        check_exists(file_path)?;

        let ext = extension(file_path);
        if ext != "csv" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let delimiter = Self::sniff_delimiter(file_path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter)
            .from_path(file_path)?;

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(|v| v.trim().to_string()).collect());
        }
        Ok(rows)
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl ExcelParser {
    /// 读取工作簿的全部工作表（工作表 = 页签）
    pub fn read_sheets(&self, file_path: &Path) -> ImportResult<Vec<RawTab>> {
        check_exists(file_path)?;

        let ext = extension(file_path);
        if !matches!(ext.as_str(), "xlsx" | "xls" | "xlsm" | "ods") {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let mut workbook = open_workbook_auto(file_path)?;
        let sheet_names = workbook.sheet_names();
        if sheet_names.is_empty() {
            return Err(ImportError::ExcelParseError("Excel 文件无工作表".to_string()));
        }

        let mut tabs = Vec::with_capacity(sheet_names.len());
        for name in sheet_names {
            let range = workbook.worksheet_range(&name)?;
            let rows = range
                .rows()
                .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect())
                .collect();
            tabs.push(RawTab::new(name, rows));
        }
        Ok(tabs)
    }
}
