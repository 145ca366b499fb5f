// ==========================================
// 圣徒档案导入系统 - 字段映射器实现
// ==========================================
// 职责: 原始页签行 → 已校验的标准记录（LocationRow / SaintRow / HistoricalRow / MilestoneRow）
// 约定:
// - 第 0 行为表头，表头匹配大小写/空白不敏感，支持别名
// - 纯函数，无 I/O，失败以数据形式返回（TabOutput.errors）
// - 表头缺失: 整个页签中止，仅返回一条 MissingHeaderError（列出全部缺失表头）
// - 值缺失 / 格式错误: 跳过该行并记录一条 RowError，继续处理
// ==========================================

use crate::domain::saint::{HistoricalRow, LocationRow, MilestoneRow, SaintRow, TabRecord};
use crate::domain::workflow::SheetTab;
use crate::importer::error::{RowError, TabIssue, TabOutput};
use crate::importer::header_map::HeaderMap;
use crate::importer::value_parser::{parse_bool, parse_date, parse_int, parse_year, split_list};

/// 标准字段: 展示名 + 可接受的表头别名
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

// ===== 门店字段 =====
pub const LOC_SHEET_ID: Field = Field {
    name: "Sheet ID",
    aliases: &["Sheet ID", "SheetId", "Sheet", "Spreadsheet ID"],
};
pub const LOC_STATE: Field = Field { name: "State", aliases: &["State"] };
pub const LOC_CITY: Field = Field { name: "City", aliases: &["City"] };
pub const LOC_ADDRESS: Field = Field { name: "Address", aliases: &["Address", "Street Address"] };
pub const LOC_NAME: Field = Field {
    name: "Name",
    aliases: &["Name", "Location Name", "Display Name"],
};
pub const LOC_OPEN: Field = Field { name: "Open", aliases: &["Open", "Is Open"] };
pub const LOC_ACTIVE: Field = Field { name: "Active", aliases: &["Active", "Is Active"] };

// ===== 圣徒字段 =====
pub const SAINT_NUMBER: Field = Field {
    name: "Saint Number",
    aliases: &["Saint Number", "Saint #", "Saint No", "Number"],
};
pub const SAINT_REAL_NAME: Field = Field { name: "Name", aliases: &["Name", "Real Name"] };
pub const SAINT_NAME: Field = Field { name: "Saint Name", aliases: &["Saint Name"] };
pub const SAINT_DATE: Field = Field { name: "Saint Date", aliases: &["Saint Date"] };
pub const SAINT_YEAR: Field = Field { name: "Saint Year", aliases: &["Saint Year"] };

// ===== 年度档案字段 =====
pub const HIST_YEAR: Field = Field { name: "Historical Year", aliases: &["Historical Year"] };
pub const HIST_BURGER: Field = Field { name: "Historical Burger", aliases: &["Historical Burger", "Burger"] };
pub const HIST_TAP_BEERS: Field = Field {
    name: "Historical Tap Beers",
    aliases: &["Historical Tap Beers", "Tap Beers"],
};
pub const HIST_CAN_BEERS: Field = Field {
    name: "Historical Can Beers",
    aliases: &["Historical Can Beers", "Historical Can/Bottle Beers", "Can Beers"],
};
pub const HIST_FACEBOOK: Field = Field {
    name: "Historical Facebook Event",
    aliases: &["Historical Facebook Event", "Facebook Event"],
};
pub const HIST_STICKER: Field = Field { name: "Historical Sticker", aliases: &["Historical Sticker"] };

// ===== 里程碑字段 =====
pub const MS_COUNT: Field = Field { name: "Milestone Count", aliases: &["Milestone Count", "Count"] };
pub const MS_DATE: Field = Field { name: "Milestone Date", aliases: &["Milestone Date", "Date"] };
pub const MS_STICKER: Field = Field { name: "Milestone Sticker", aliases: &["Milestone Sticker", "Sticker"] };
pub const MS_BEER: Field = Field { name: "Milestone Beer", aliases: &["Milestone Beer", "Beer"] };

const LOCATION_REQUIRED: [Field; 4] = [LOC_STATE, LOC_CITY, LOC_ADDRESS, LOC_SHEET_ID];
const SAINTS_REQUIRED: [Field; 5] = [SAINT_NUMBER, SAINT_REAL_NAME, SAINT_NAME, SAINT_DATE, SAINT_YEAR];
const HISTORICAL_REQUIRED: [Field; 2] = [SAINT_NUMBER, HIST_YEAR];
const MILESTONE_REQUIRED: [Field; 3] = [SAINT_NUMBER, MS_COUNT, MS_DATE];

// ==========================================
// 公共辅助
// ==========================================

fn missing_headers(map: &HeaderMap, required: &[Field]) -> Vec<String> {
    required
        .iter()
        .filter(|f| !map.contains(f.aliases))
        .map(|f| f.name.to_string())
        .collect()
}

fn optional(map: &HeaderMap, row: &[String], field: Field) -> Option<String> {
    map.cell(row, field.aliases).map(str::to_string)
}

fn required<'a>(
    map: &HeaderMap,
    row: &'a [String],
    field: Field,
    row_index: usize,
) -> Result<&'a str, RowError> {
    map.cell(row, field.aliases)
        .ok_or_else(|| RowError::new(row_index, field.name, "必填字段为空"))
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

/// 页签通用驱动: 表头检查 → 逐行映射
///
/// 每个数据行恰好产出一条记录或一条错误
fn process_rows<T, F>(tab: &str, rows: &[Vec<String>], required: &[Field], mut map_row: F) -> TabOutput<T>
where
    F: FnMut(&HeaderMap, &[String], usize) -> Result<T, RowError>,
{
    let Some(header) = rows.first() else {
        return TabOutput::missing_header(tab, required.iter().map(|f| f.name.to_string()).collect());
    };

    let map = HeaderMap::from_header_row(header);
    let missing = missing_headers(&map, required);
    if !missing.is_empty() {
        return TabOutput::missing_header(tab, missing);
    }

    let mut output = TabOutput::default();
    for (row_index, row) in rows.iter().enumerate().skip(1) {
        if is_blank(row) {
            output
                .errors
                .push(TabIssue::Row(RowError::new(row_index, "*", "空行")));
            continue;
        }
        match map_row(&map, row, row_index) {
            Ok(record) => output.records.push(record),
            Err(e) => output.errors.push(TabIssue::Row(e)),
        }
    }
    output
}

// ==========================================
// 门店页签
// ==========================================

/// 映射单个门店行
///
/// # 返回
/// - None: state / city / address / sheet id 任一缺失（跳过该行，不影响批次）
/// - 布尔字段无法识别时按未填写处理
pub fn map_location(row: &[String], header_map: &HeaderMap, status_tab: &str) -> Option<LocationRow> {
    let sheet_id = header_map.cell(row, LOC_SHEET_ID.aliases)?;
    let state = header_map.cell(row, LOC_STATE.aliases)?;
    let city = header_map.cell(row, LOC_CITY.aliases)?;
    let address = header_map.cell(row, LOC_ADDRESS.aliases)?;

    let flag = |field: Field| header_map.cell(row, field.aliases).and_then(|v| parse_bool(v).ok());

    Some(LocationRow {
        sheet_id: sheet_id.to_string(),
        state: state.to_string(),
        city: city.to_string(),
        name: optional(header_map, row, LOC_NAME),
        address: address.to_string(),
        status: status_tab.trim().to_lowercase(),
        is_open: flag(LOC_OPEN),
        is_active: flag(LOC_ACTIVE),
        row_number: 0,
    })
}

/// 处理一个门店状态页签（页签名即门店状态）
pub fn process_locations_tab(tab_name: &str, rows: &[Vec<String>]) -> TabOutput<LocationRow> {
    process_rows(tab_name, rows, &LOCATION_REQUIRED, |map, row, row_index| {
        match map_location(row, map, tab_name) {
            Some(mut location) => {
                location.row_number = row_index;
                Ok(location)
            }
            None => {
                let field = LOCATION_REQUIRED
                    .iter()
                    .find(|f| map.cell(row, f.aliases).is_none())
                    .map(|f| f.name)
                    .unwrap_or("*");
                Err(RowError::new(row_index, field, "必填字段为空"))
            }
        }
    })
}

// ==========================================
// Saints 页签
// ==========================================
pub fn process_saints_tab(rows: &[Vec<String>]) -> TabOutput<SaintRow> {
    process_rows(SheetTab::Saints.as_str(), rows, &SAINTS_REQUIRED, |map, row, row_index| {
        let saint_number = required(map, row, SAINT_NUMBER, row_index)?;
        let real_name = required(map, row, SAINT_REAL_NAME, row_index)?;
        let saint_name = required(map, row, SAINT_NAME, row_index)?;
        let saint_date = required(map, row, SAINT_DATE, row_index)?;
        let saint_year = required(map, row, SAINT_YEAR, row_index)?;

        let saint_date =
            parse_date(saint_date).map_err(|reason| RowError::new(row_index, SAINT_DATE.name, reason))?;
        let saint_year =
            parse_year(saint_year).map_err(|reason| RowError::new(row_index, SAINT_YEAR.name, reason))?;

        Ok(SaintRow {
            saint_number: saint_number.to_string(),
            real_name: real_name.to_string(),
            saint_name: saint_name.to_string(),
            saint_date,
            saint_year,
            row_number: row_index,
        })
    })
}

// ==========================================
// Historical 页签
// ==========================================
pub fn process_historical_tab(rows: &[Vec<String>]) -> TabOutput<HistoricalRow> {
    process_rows(
        SheetTab::Historical.as_str(),
        rows,
        &HISTORICAL_REQUIRED,
        |map, row, row_index| {
            let saint_number = required(map, row, SAINT_NUMBER, row_index)?;
            let year = required(map, row, HIST_YEAR, row_index)?;
            let year = parse_year(year).map_err(|reason| RowError::new(row_index, HIST_YEAR.name, reason))?;

            let list = |field: Field| {
                map.cell(row, field.aliases)
                    .map(split_list)
                    .unwrap_or_default()
            };

            Ok(HistoricalRow {
                saint_number: saint_number.to_string(),
                year,
                burger: optional(map, row, HIST_BURGER),
                tap_beers: list(HIST_TAP_BEERS),
                can_bottle_beers: list(HIST_CAN_BEERS),
                facebook_event: optional(map, row, HIST_FACEBOOK),
                sticker: optional(map, row, HIST_STICKER),
                row_number: row_index,
            })
        },
    )
}

// ==========================================
// Milestones 页签
// ==========================================
pub fn process_milestone_tab(rows: &[Vec<String>]) -> TabOutput<MilestoneRow> {
    process_rows(
        SheetTab::Milestones.as_str(),
        rows,
        &MILESTONE_REQUIRED,
        |map, row, row_index| {
            let saint_number = required(map, row, SAINT_NUMBER, row_index)?;
            let count = required(map, row, MS_COUNT, row_index)?;
            let date = required(map, row, MS_DATE, row_index)?;

            let count = parse_int(count).map_err(|reason| RowError::new(row_index, MS_COUNT.name, reason))?;
            let date = parse_date(date).map_err(|reason| RowError::new(row_index, MS_DATE.name, reason))?;

            Ok(MilestoneRow {
                saint_number: saint_number.to_string(),
                count,
                date,
                sticker: optional(map, row, MS_STICKER),
                beer: optional(map, row, MS_BEER),
                row_number: row_index,
            })
        },
    )
}

/// 按页签类型处理并统一为 TabRecord
pub fn process_sheet_tab(tab: SheetTab, rows: &[Vec<String>]) -> TabOutput<TabRecord> {
    fn wrap<T>(output: TabOutput<T>, f: fn(T) -> TabRecord) -> TabOutput<TabRecord> {
        TabOutput {
            records: output.records.into_iter().map(f).collect(),
            errors: output.errors,
        }
    }

    match tab {
        SheetTab::Saints => wrap(process_saints_tab(rows), TabRecord::Saint),
        SheetTab::Historical => wrap(process_historical_tab(rows), TabRecord::Historical),
        SheetTab::Milestones => wrap(process_milestone_tab(rows), TabRecord::Milestone),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::error::TabIssue;
    use chrono::NaiveDate;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_map_location_requires_core_fields() {
        let header = rows(&[&["State", "City", "Address", "Sheet ID", "Open", "Active"]]);
        let map = HeaderMap::from_header_row(&header[0]);

        let ok = rows(&[&["TX", "Austin", "1 Main St", "sheet-1", "TRUE", "false"]]);
        let loc = map_location(&ok[0], &map, "Open").unwrap();
        assert_eq!(loc.sheet_id, "sheet-1");
        assert_eq!(loc.status, "open");
        assert_eq!(loc.is_open, Some(true));
        assert_eq!(loc.is_active, Some(false));

        let missing_city = rows(&[&["TX", "", "1 Main St", "sheet-1", "true", "true"]]);
        assert!(map_location(&missing_city[0], &map, "Open").is_none());
    }

    #[test]
    fn test_saints_tab_missing_header_aborts_tab() {
        let input = rows(&[
            &["Saint Number", "Name", "Saint Date"],
            &["1", "Alice", "2020-01-01"],
        ]);
        let out = process_saints_tab(&input);
        assert!(out.records.is_empty());
        assert_eq!(out.errors.len(), 1);
        match &out.errors[0] {
            TabIssue::MissingHeader(e) => {
                assert_eq!(e.headers, vec!["Saint Name".to_string(), "Saint Year".to_string()]);
            }
            other => panic!("unexpected issue: {:?}", other),
        }
    }

    #[test]
    fn test_saints_tab_skips_rows_with_missing_values() {
        let input = rows(&[
            &["saint number", "NAME", "Saint  Name", "Saint Date", "Saint Year"],
            &["1", "Alice", "St. Alice", "3/17/2020", "2020"],
            &["2", "", "St. Bob", "2020-01-01", "2020"],
            &["3", "Carol", "St. Carol", "not a date", "2020"],
            &["", "", "", "", ""],
        ]);
        let out = process_saints_tab(&input);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.errors.len(), 3);
        assert_eq!(out.records.len() + out.errors.len(), input.len() - 1);
        assert_eq!(
            out.records[0].saint_date,
            NaiveDate::from_ymd_opt(2020, 3, 17).unwrap()
        );
        let fields: Vec<_> = out.row_errors().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["Name", "Saint Date", "*"]);
    }

    #[test]
    fn test_historical_tab_without_year_header() {
        let input = rows(&[
            &["Saint Number", "Historical Burger", "Historical Tap Beers"],
            &["1", "The Classic King", "A, B"],
            &["2", "The Smoky Outlaw", "C"],
        ]);
        let out = process_historical_tab(&input);
        assert!(out.records.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].is_missing_header());
    }

    #[test]
    fn test_historical_tab_parses_lists_and_year_range() {
        let input = rows(&[
            &[
                "Saint Number",
                "Historical Year",
                "Historical Burger",
                "Historical Tap Beers",
                "Historical Can Beers",
                "Historical Sticker",
            ],
            &["1", "2023", "The Classic King", "Pliny, , Heady Topper ,", "", "s1.png"],
            &["1", "1850", "Old", "", "", ""],
        ]);
        let out = process_historical_tab(&input);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.errors.len(), 1);
        let rec = &out.records[0];
        assert_eq!(rec.tap_beers, vec!["Pliny".to_string(), "Heady Topper".to_string()]);
        assert!(rec.can_bottle_beers.is_empty());
        assert_eq!(rec.sticker.as_deref(), Some("s1.png"));
        assert_eq!(rec.facebook_event, None);
    }

    #[test]
    fn test_milestone_tab_rejects_non_integer_count() {
        let input = rows(&[
            &["Saint Number", "Milestone Count", "Milestone Date", "Milestone Beer"],
            &["1", "100", "20230105", "Pliny"],
            &["1", "one hundred", "2023-01-05", ""],
            &["1", "200", "", ""],
        ]);
        let out = process_milestone_tab(&input);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].count, 100);
        assert_eq!(out.records[0].beer.as_deref(), Some("Pliny"));
        assert_eq!(out.errors.len(), 2);
    }

    #[test]
    fn test_locations_tab_counts_every_row() {
        let input = rows(&[
            &["State", "City", "Address", "Sheet ID", "Name"],
            &["TX", "Austin", "1 Main", "s-1", "Downtown"],
            &["TX", "Austin", "", "s-2", ""],
        ]);
        let out = process_locations_tab("Closed", &input);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].row_number, 1);
        assert_eq!(out.records[0].status, "closed");
        assert_eq!(out.errors.len(), 1);
    }
}
