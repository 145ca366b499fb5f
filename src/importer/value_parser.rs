// ==========================================
// 圣徒档案导入系统 - 单元格值解析
// ==========================================
// 职责: 文本单元格 → 日期 / 布尔 / 整数 / 列表
// 日期: 统一转换为 NaiveDate（规范形式 YYYY-MM-DD）
//   接受: YYYY-MM-DD / M/D/YYYY / YYYYMMDD / Unix 秒
// ==========================================

use chrono::{DateTime, NaiveDate};

/// 年份合法范围
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

/// 解析日期
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    let v = value.trim();

    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%m/%d/%Y") {
        return Ok(d);
    }

    // 纯数字: 8 位优先按 YYYYMMDD，否则按 Unix 秒
    let digits = v.strip_prefix('-').unwrap_or(v);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if v.len() == 8 {
            if let Ok(d) = NaiveDate::parse_from_str(v, "%Y%m%d") {
                return Ok(d);
            }
        }
        if let Ok(secs) = v.parse::<i64>() {
            if let Some(dt) = DateTime::from_timestamp(secs, 0) {
                return Ok(dt.date_naive());
            }
        }
    }

    Err(format!("无法解析为日期: {}", value))
}

/// 解析布尔值（大小写不敏感）
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(format!("无法解析为布尔值: {}", value)),
    }
}

/// 解析整数（兼容 Excel 导出的 "12.0"）
pub fn parse_int(value: &str) -> Result<i32, String> {
    let v = value.trim();
    if let Ok(n) = v.parse::<i32>() {
        return Ok(n);
    }
    match v.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 => Ok(f as i32),
        _ => Err(format!("无法解析为整数: {}", value)),
    }
}

/// 解析年份并校验范围 [MIN_YEAR, MAX_YEAR]
pub fn parse_year(value: &str) -> Result<i32, String> {
    let year = parse_int(value)?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(format!("年份超出范围 [{}, {}]: {}", MIN_YEAR, MAX_YEAR, year));
    }
    Ok(year)
}

/// 拆分逗号分隔列表（去空白、丢弃空项）
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2023-03-17").unwrap(), ymd(2023, 3, 17));
        assert_eq!(parse_date("3/17/2023").unwrap(), ymd(2023, 3, 17));
        assert_eq!(parse_date("20230317").unwrap(), ymd(2023, 3, 17));
        assert_eq!(parse_date("1679011200").unwrap(), ymd(2023, 3, 17));
        assert!(parse_date("March 17").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_parse_bool_case_insensitive() {
        assert_eq!(parse_bool("TRUE"), Ok(true));
        assert_eq!(parse_bool(" false "), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_parse_year_range() {
        assert_eq!(parse_year("2023"), Ok(2023));
        assert_eq!(parse_year("2023.0"), Ok(2023));
        assert!(parse_year("1899").is_err());
        assert!(parse_year("2101").is_err());
        assert!(parse_year("abc").is_err());
    }

    #[test]
    fn test_split_list_drops_empty_entries() {
        assert_eq!(
            split_list(" Pliny the Elder, ,Heady Topper,, "),
            vec!["Pliny the Elder".to_string(), "Heady Topper".to_string()]
        );
        assert!(split_list("  ").is_empty());
    }
}
