// ==========================================
// 页签映射守恒测试
// ==========================================
// 任意页签输入: records + errors == 数据行数（不含表头）
// ==========================================

use saints_import::domain::workflow::SheetTab;
use saints_import::importer::{process_historical_tab, process_locations_tab, process_sheet_tab};

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

/// 构造混合合法/非法行的页签（含空行、短行、非法日期）
fn mixed_rows(tab: SheetTab, n: usize) -> Vec<Vec<String>> {
    let header: &[&str] = match tab {
        SheetTab::Saints => &["Saint Number", "Name", "Saint Name", "Saint Date", "Saint Year"],
        SheetTab::Historical => &["Saint Number", "Historical Year", "Historical Tap Beers"],
        SheetTab::Milestones => &["Saint Number", "Milestone Count", "Milestone Date"],
    };
    let mut rows = vec![row(header)];

    for i in 0..n {
        let num = i.to_string();
        let r = match (tab, i % 4) {
            (_, 0) => row(&[]),
            (SheetTab::Saints, 1) => row(&[&num, "Jane", "Saint Jane", "2019-03-17", "2019"]),
            (SheetTab::Saints, 2) => row(&[&num, "Jane", "Saint Jane", "not a date", "2019"]),
            (SheetTab::Saints, _) => row(&[&num, "Jane"]),
            (SheetTab::Historical, 1) => row(&[&num, "2023", "IPA, Stout"]),
            (SheetTab::Historical, 2) => row(&[&num, "2020-2022", ""]),
            (SheetTab::Historical, _) => row(&[&num, "twenty"]),
            (SheetTab::Milestones, 1) => row(&[&num, "1000", "2023-06-01"]),
            (SheetTab::Milestones, 2) => row(&[&num, "1,000", "2023-06-01"]),
            (SheetTab::Milestones, _) => row(&["", "500", "2023-06-01"]),
        };
        rows.push(r);
    }
    rows
}

#[test]
fn test_sheet_tabs_conserve_rows() {
    for tab in SheetTab::ALL {
        for n in [0, 1, 5, 17] {
            let rows = mixed_rows(tab, n);
            let output = process_sheet_tab(tab, &rows);
            assert_eq!(
                output.records.len() + output.errors.len(),
                rows.len() - 1,
                "tab={} rows={}",
                tab.as_str(),
                n
            );
        }
    }
}

#[test]
fn test_locations_tab_conserves_rows() {
    let rows = vec![
        row(&["Sheet ID", "State", "City", "Address", "Is Open"]),
        row(&["loc-1", "OH", "Columbus", "1 Main St", "TRUE"]),
        row(&["", "OH", "Columbus", "2 Main St", "true"]),
        row(&[]),
        row(&["loc-4", "OH", "Columbus", "4 Main St", "maybe"]),
    ];
    let output = process_locations_tab("Open", &rows);
    assert_eq!(output.records.len() + output.errors.len(), rows.len() - 1);
}

#[test]
fn test_missing_year_header_yields_single_error() {
    let rows = vec![
        row(&["Saint Number", "Historical Burger"]),
        row(&["1", "Classic"]),
        row(&["2", "Smash"]),
    ];
    let output = process_historical_tab(&rows);
    assert!(output.records.is_empty());
    assert_eq!(output.errors.len(), 1);
}
