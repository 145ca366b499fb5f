// ==========================================
// 圣徒档案导入系统 - 阶段计算
// ==========================================
// 阶段: scan / locations / verify / count / import
// 约束: 除 import 外均为只读，输入为工作流冻结快照
// ==========================================

use crate::domain::saint::LocationRow;
use crate::domain::types::{ConflictPolicy, PhaseKind, PhaseStatus};
use crate::domain::workflow::{IssueSeverity, PhaseIssue, PhaseResult, SheetTab, SourceSnapshot};
use crate::engine::error::EngineResult;
use crate::engine::executor::{build_units, ExecutionReport, ImportExecutor};
use crate::importer::conflict_handler::{BatchKey, ConflictHandler};
use crate::importer::error::{TabIssue, TabOutput};
use crate::importer::field_mapper::{
    process_historical_tab, process_locations_tab, process_milestone_tab, process_saints_tab,
};
use crate::repository::LocationRepository;
use rusqlite::Connection;
use serde_json::json;

/// 每个页签最多列出的行级问题条数（其余只计数）
const MAX_SAMPLE_ISSUES: usize = 5;

/// 由问题列表与 can_proceed 推导阶段状态
fn derive_status(can_proceed: bool, issues: &[PhaseIssue]) -> PhaseStatus {
    if !can_proceed {
        PhaseStatus::Error
    } else if issues.iter().any(|i| i.severity != IssueSeverity::Info) {
        PhaseStatus::Warning
    } else {
        PhaseStatus::Success
    }
}

/// 行级问题采样：前 N 条逐条列出，其余汇总为一条
fn sample_issues(scope: &str, errors: &[TabIssue], issues: &mut Vec<PhaseIssue>) {
    for issue in errors.iter().take(MAX_SAMPLE_ISSUES) {
        issues.push(PhaseIssue::warning(scope, issue.to_string()));
    }
    if errors.len() > MAX_SAMPLE_ISSUES {
        issues.push(PhaseIssue::warning(
            scope,
            format!("另有 {} 条行级问题未列出", errors.len() - MAX_SAMPLE_ISSUES),
        ));
    }
}

/// 收集全部状态页签的门店行
fn collect_locations(snapshot: &SourceSnapshot) -> Vec<(String, TabOutput<LocationRow>)> {
    snapshot
        .location_tabs
        .iter()
        .map(|tab| (tab.name.clone(), process_locations_tab(&tab.name, &tab.rows)))
        .collect()
}

// ==========================================
// scan: 页签与行数清点
// ==========================================
pub fn scan_phase(snapshot: &SourceSnapshot) -> PhaseResult {
    let mut issues = Vec::new();

    let location_rows: usize = snapshot.location_tabs.iter().map(|t| t.data_row_count()).sum();
    if snapshot.location_tabs.is_empty() {
        issues.push(PhaseIssue::error(
            &snapshot.master_sheet_id,
            "主表格中没有门店状态页签",
        ));
    }

    let mut sheet_rows = 0;
    let sheets: Vec<_> = snapshot
        .location_sheets
        .iter()
        .map(|sheet| {
            let missing: Vec<&str> = SheetTab::ALL
                .iter()
                .filter(|kind| sheet.tab(**kind).is_none())
                .map(|kind| kind.as_str())
                .collect();
            for tab in &missing {
                issues.push(PhaseIssue::warning(&sheet.sheet_id, format!("缺少页签 {}", tab)));
            }
            let rows: usize = sheet.tabs.iter().map(|t| t.data_row_count()).sum();
            sheet_rows += rows;
            json!({
                "sheetId": sheet.sheet_id,
                "tabs": sheet.tabs.iter().map(|t| json!({"name": t.name, "rows": t.data_row_count()})).collect::<Vec<_>>(),
                "missingTabs": missing,
            })
        })
        .collect();

    let can_proceed = location_rows > 0;
    if !can_proceed && !snapshot.location_tabs.is_empty() {
        issues.push(PhaseIssue::error(&snapshot.master_sheet_id, "门店状态页签中没有数据行"));
    }

    PhaseResult {
        phase: PhaseKind::Scan,
        status: derive_status(can_proceed, &issues),
        summary: format!(
            "发现 {} 个门店状态页签（{} 行），{} 个门店表格（{} 行）",
            snapshot.location_tabs.len(),
            location_rows,
            snapshot.location_sheets.len(),
            sheet_rows
        ),
        details: json!({
            "masterSheetId": snapshot.master_sheet_id,
            "locationTabs": snapshot.location_tabs.iter().map(|t| json!({"name": t.name, "rows": t.data_row_count()})).collect::<Vec<_>>(),
            "locationRows": location_rows,
            "locationSheets": sheets,
            "totalRows": location_rows + sheet_rows,
        }),
        issues,
        can_proceed,
    }
}

// ==========================================
// locations: 门店映射、批内重复、已存在门店
// ==========================================
pub fn locations_phase(conn: &Connection, snapshot: &SourceSnapshot) -> EngineResult<PhaseResult> {
    let handler = ConflictHandler;
    let mut issues = Vec::new();
    let mut all_locations = Vec::new();
    let mut skipped_rows = 0;
    let mut per_tab = Vec::new();

    for (tab_name, output) in collect_locations(snapshot) {
        skipped_rows += output.errors.len();
        sample_issues(&tab_name, &output.errors, &mut issues);
        per_tab.push(json!({
            "tab": tab_name,
            "valid": output.records.len(),
            "skipped": output.errors.len(),
        }));
        all_locations.extend(output.records);
    }

    let duplicates = handler.detect_duplicates(&all_locations);
    for (row_number, key) in &duplicates {
        issues.push(PhaseIssue::warning(
            key,
            format!("sheet_id {} 在第 {} 行重复出现，以首次出现为准", key, row_number),
        ));
    }

    let existing_ids = LocationRepository::list_sheet_ids_tx(conn)?;
    let existing = handler.detect_cross_batch_duplicates(&all_locations, &existing_ids);
    let policy_note = "将按工作流冲突策略处理";
    for (_, key) in &existing {
        issues.push(PhaseIssue::info(key, format!("门店 {} 已存在，{}", key, policy_note)));
    }

    let unique = all_locations.len() - duplicates.len();
    let can_proceed = unique > 0;
    if !can_proceed {
        issues.push(PhaseIssue::error(&snapshot.master_sheet_id, "没有有效的门店行"));
    }

    Ok(PhaseResult {
        phase: PhaseKind::Locations,
        status: derive_status(can_proceed, &issues),
        summary: format!(
            "有效门店 {} 个（新增 {}，已存在 {}），跳过 {} 行，批内重复 {} 个",
            unique,
            unique.saturating_sub(existing.len()),
            existing.len(),
            skipped_rows,
            duplicates.len()
        ),
        details: json!({
            "tabs": per_tab,
            "validLocations": unique,
            "skippedRows": skipped_rows,
            "duplicateSheetIds": duplicates.iter().map(|(_, k)| k).collect::<Vec<_>>(),
            "existingSheetIds": existing.iter().map(|(_, k)| k).collect::<Vec<_>>(),
            "locations": all_locations.iter().map(|l| json!({
                "sheetId": l.sheet_id,
                "name": l.name,
                "city": l.city,
                "state": l.state,
                "status": l.status,
            })).collect::<Vec<_>>(),
        }),
        issues,
        can_proceed,
    })
}

// ==========================================
// verify: 逐门店处理三类页签
// ==========================================

struct TabCheck {
    records: usize,
    row_errors: usize,
    duplicates: usize,
    invalid: bool,
}

fn check_tab<T: BatchKey>(scope: &str, output: TabOutput<T>, issues: &mut Vec<PhaseIssue>) -> TabCheck {
    let invalid = output.header_failed();
    if invalid {
        for issue in &output.errors {
            issues.push(PhaseIssue::error(scope, issue.to_string()));
        }
    } else {
        sample_issues(scope, &output.errors, issues);
    }

    let duplicates = ConflictHandler.detect_duplicates(&output.records);
    for (row_number, key) in duplicates.iter().take(MAX_SAMPLE_ISSUES) {
        issues.push(PhaseIssue::warning(
            scope,
            format!("第 {} 行与前文重复 (key={})", row_number, key),
        ));
    }

    TabCheck {
        records: output.records.len(),
        row_errors: output.row_errors().count(),
        duplicates: duplicates.len(),
        invalid,
    }
}

pub fn verify_phase(snapshot: &SourceSnapshot) -> PhaseResult {
    let mut issues = Vec::new();
    let mut invalid_tabs = 0;
    let mut row_errors = 0;
    let mut totals = [0usize; 3];
    let mut sheets = Vec::new();

    let mut seen = std::collections::HashSet::new();
    let sheet_ids: Vec<String> = collect_locations(snapshot)
        .into_iter()
        .flat_map(|(_, output)| output.records)
        .map(|l| l.sheet_id)
        .filter(|id| seen.insert(id.clone()))
        .collect();

    for sheet_id in &sheet_ids {
        let mut tabs = Vec::new();

        for (idx, kind) in SheetTab::ALL.iter().enumerate() {
            let scope = format!("{}/{}", sheet_id, kind.as_str());
            let raw = snapshot.sheet(sheet_id).and_then(|s| s.tab(*kind));

            let Some(raw) = raw else {
                invalid_tabs += 1;
                issues.push(PhaseIssue::error(&scope, "页签缺失"));
                tabs.push(json!({"tab": kind.as_str(), "missing": true}));
                continue;
            };

            let check = match kind {
                SheetTab::Saints => check_tab(&scope, process_saints_tab(&raw.rows), &mut issues),
                SheetTab::Historical => check_tab(&scope, process_historical_tab(&raw.rows), &mut issues),
                SheetTab::Milestones => check_tab(&scope, process_milestone_tab(&raw.rows), &mut issues),
            };

            if check.invalid {
                invalid_tabs += 1;
            }
            row_errors += check.row_errors;
            totals[idx] += check.records;
            tabs.push(json!({
                "tab": kind.as_str(),
                "missing": false,
                "headerFailed": check.invalid,
                "records": check.records,
                "rowErrors": check.row_errors,
                "duplicates": check.duplicates,
            }));
        }

        sheets.push(json!({"sheetId": sheet_id, "tabs": tabs}));
    }

    let can_proceed = invalid_tabs == 0;

    PhaseResult {
        phase: PhaseKind::Verify,
        status: derive_status(can_proceed, &issues),
        summary: format!(
            "校验 {} 个门店表格：无效页签 {} 个，行级错误 {} 条，有效记录 圣徒 {} / 年度 {} / 里程碑 {}",
            sheet_ids.len(),
            invalid_tabs,
            row_errors,
            totals[0],
            totals[1],
            totals[2]
        ),
        details: json!({
            "invalidTabs": invalid_tabs,
            "rowErrors": row_errors,
            "records": {
                "saints": totals[0],
                "historical": totals[1],
                "milestones": totals[2],
            },
            "sheets": sheets,
        }),
        issues,
        can_proceed,
    }
}

// ==========================================
// count: 按冲突策略预测写入结果（事务回滚）
// ==========================================
pub fn count_phase(
    executor: &ImportExecutor,
    workflow_id: &str,
    snapshot: &SourceSnapshot,
    policy: ConflictPolicy,
) -> EngineResult<PhaseResult> {
    let units = build_units(snapshot);
    let plan = executor.plan(workflow_id, &units, policy)?;

    let mut issues = Vec::new();
    for unit in &plan.units {
        if let Some(error) = &unit.error {
            issues.push(PhaseIssue::warning(&unit.sheet_id, format!("预计写入失败: {}", error)));
        }
        for warning in &unit.warnings {
            issues.push(PhaseIssue::warning(&unit.sheet_id, warning.clone()));
        }
    }

    let predicted_ok = plan.units.len() - plan.failed_units;
    let can_proceed = plan.units.is_empty() || predicted_ok > 0;
    let created: usize = plan.totals.values().map(|c| c.created).sum();
    let updated: usize = plan.totals.values().map(|c| c.updated + c.merged).sum();
    let skipped: usize = plan.totals.values().map(|c| c.skipped + c.unchanged).sum();

    Ok(PhaseResult {
        phase: PhaseKind::Count,
        status: derive_status(can_proceed, &issues),
        summary: format!(
            "策略 {}: 预计新增 {}，更新 {}，跳过 {}（{} 个门店单元）",
            policy,
            created,
            updated,
            skipped,
            plan.units.len()
        ),
        details: json!({
            "policy": policy.as_str(),
            "units": plan.units.len(),
            "predictedFailedUnits": plan.failed_units,
            "predicted": plan.totals,
        }),
        issues,
        can_proceed,
    })
}

// ==========================================
// import: 执行报告 → 阶段结果
// ==========================================
pub fn import_result(report: &ExecutionReport) -> PhaseResult {
    let mut issues = Vec::new();
    for unit in &report.units {
        if let Some(error) = &unit.error {
            issues.push(PhaseIssue::error(&unit.sheet_id, error.clone()));
        }
        for warning in &unit.warnings {
            issues.push(PhaseIssue::warning(&unit.sheet_id, warning.clone()));
        }
    }

    let can_proceed = report.units.is_empty() || report.committed_units > 0;
    let created: usize = report.totals.values().map(|c| c.created).sum();
    let updated: usize = report.totals.values().map(|c| c.updated + c.merged).sum();

    PhaseResult {
        phase: PhaseKind::Import,
        status: derive_status(can_proceed, &issues),
        summary: format!(
            "提交 {} 个门店单元，失败 {} 个；新增 {}，更新 {}，耗时 {} ms",
            report.committed_units, report.failed_units, created, updated, report.elapsed_ms
        ),
        details: json!({
            "policy": report.policy.as_str(),
            "committedUnits": report.committed_units,
            "failedUnits": report.failed_units,
            "counts": report.totals,
            "errors": report.errors(),
            "elapsedMs": report.elapsed_ms,
        }),
        issues,
        can_proceed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::{LocationSheet, RawTab};
    use chrono::Utc;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn snapshot(historical_header: &str) -> SourceSnapshot {
        SourceSnapshot {
            master_sheet_id: "master".to_string(),
            location_tabs: vec![RawTab::new(
                "Open",
                vec![
                    row(&["Sheet ID", "State", "City", "Address"]),
                    row(&["loc-1", "OH", "Columbus", "1 Main St"]),
                ],
            )],
            location_sheets: vec![LocationSheet {
                sheet_id: "loc-1".to_string(),
                tabs: vec![
                    RawTab::new(
                        "Saints",
                        vec![
                            row(&["Saint Number", "Name", "Saint Name", "Saint Date", "Saint Year"]),
                            row(&["1", "Jane", "Saint Jane", "2019-03-17", "2019"]),
                        ],
                    ),
                    RawTab::new(
                        "Historical",
                        vec![
                            row(&["Saint Number", historical_header, "Historical Burger"]),
                            row(&["1", "2023", "Classic"]),
                        ],
                    ),
                    RawTab::new(
                        "Milestones",
                        vec![
                            row(&["Saint Number", "Milestone Count", "Milestone Date"]),
                            row(&["1", "1000", "2023-06-01"]),
                        ],
                    ),
                ],
            }],
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_scan_counts_rows() {
        let result = scan_phase(&snapshot("Historical Year"));
        assert!(result.can_proceed);
        assert_eq!(result.details["locationRows"], 1);
        assert_eq!(result.status, PhaseStatus::Success);
    }

    #[test]
    fn test_scan_without_locations_cannot_proceed() {
        let mut snap = snapshot("Historical Year");
        snap.location_tabs[0].rows.truncate(1);
        let result = scan_phase(&snap);
        assert!(!result.can_proceed);
        assert_eq!(result.status, PhaseStatus::Error);
    }

    #[test]
    fn test_verify_passes_for_complete_sheet() {
        let result = verify_phase(&snapshot("Historical Year"));
        assert_eq!(result.details["invalidTabs"], 0);
        assert!(result.can_proceed);
    }

    #[test]
    fn test_verify_blocks_on_missing_header() {
        let result = verify_phase(&snapshot("Year"));
        assert_eq!(result.details["invalidTabs"], 1);
        assert!(!result.can_proceed);
        assert!(result
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error && i.message.contains("Historical Year")));
    }

    #[test]
    fn test_verify_counts_missing_tab_as_invalid() {
        let mut snap = snapshot("Historical Year");
        snap.location_sheets[0].tabs.pop();
        let result = verify_phase(&snap);
        assert_eq!(result.details["invalidTabs"], 1);
        assert!(!result.can_proceed);
    }
}
