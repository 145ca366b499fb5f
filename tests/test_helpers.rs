// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、快照构造、CSV 数据源目录
// ==========================================
#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use saints_import::config::PipelineConfig;
use saints_import::db::{init_schema, open_sqlite_connection};
use saints_import::domain::saint::{Event, Location, Milestone, Saint, SaintYear};
use saints_import::domain::types::{EventType, PhaseKind};
use saints_import::domain::workflow::{LocationSheet, RawTab, SourceSnapshot};
use saints_import::engine::PhaseOrchestrator;
use saints_import::repository::{EventRepository, LocationRepository, MilestoneRepository, SaintRepository, SaintYearRepository};
use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_string_lossy().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

pub fn open_test_connection(db_path: &str) -> Result<Arc<Mutex<Connection>>, Box<dyn Error>> {
    Ok(Arc::new(Mutex::new(open_sqlite_connection(db_path)?)))
}

/// 测试用配置（无限速、快速轮询）
pub fn test_config(db_path: &str) -> PipelineConfig {
    PipelineConfig {
        source_delay_ms: 0,
        worker_poll_ms: 10,
        db_path: db_path.to_string(),
        ..PipelineConfig::default()
    }
}

pub fn count_rows(conn: &Arc<Mutex<Connection>>, table: &str) -> i64 {
    let guard = conn.lock().unwrap();
    guard
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

// ==========================================
// 快照构造
// ==========================================

pub fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

pub const LOCATION_HEADER: &[&str] = &["Sheet ID", "State", "City", "Address"];
pub const SAINTS_HEADER: &[&str] = &["Saint Number", "Name", "Saint Name", "Saint Date", "Saint Year"];
pub const HISTORICAL_HEADER: &[&str] = &["Saint Number", "Historical Year", "Historical Burger"];
pub const MILESTONE_HEADER: &[&str] = &["Saint Number", "Milestone Count", "Milestone Date"];

/// 单个门店：一名圣徒、一个历史年份、一个里程碑
pub fn location_sheet(sheet_id: &str, saint_name: &str) -> LocationSheet {
    LocationSheet {
        sheet_id: sheet_id.to_string(),
        tabs: vec![
            RawTab::new(
                "Saints",
                vec![
                    row(SAINTS_HEADER),
                    row(&["1", "Jane Doe", saint_name, "2019-03-17", "2019"]),
                ],
            ),
            RawTab::new(
                "Historical",
                vec![row(HISTORICAL_HEADER), row(&["1", "2023", "Classic"])],
            ),
            RawTab::new(
                "Milestones",
                vec![row(MILESTONE_HEADER), row(&["1", "1000", "2023-06-01"])],
            ),
        ],
    }
}

/// 由门店 sheet_id 列表构造快照
pub fn snapshot_for(sheet_ids: &[&str]) -> SourceSnapshot {
    let mut rows = vec![row(LOCATION_HEADER)];
    for (idx, sheet_id) in sheet_ids.iter().enumerate() {
        rows.push(row(&[sheet_id, "OH", "Columbus", &format!("{} Main St", idx + 1)]));
    }

    SourceSnapshot {
        master_sheet_id: "master".to_string(),
        location_tabs: vec![RawTab::new("Open", rows)],
        location_sheets: sheet_ids
            .iter()
            .map(|id| location_sheet(id, &format!("Saint of {}", id)))
            .collect(),
        captured_at: Utc::now(),
    }
}

/// 执行并审批全部阶段（import 阶段同步执行）
pub fn run_to_completion(orch: &PhaseOrchestrator, workflow_id: &str) {
    for phase in PhaseKind::ALL {
        let result = orch.execute_current_phase(workflow_id).unwrap();
        assert!(result.can_proceed, "阶段 {} 被阻断: {}", phase, result.summary);
        orch.approve(workflow_id, phase).unwrap();
    }
}

// ==========================================
// CSV 数据源目录
// ==========================================

fn write_csv(dir: &Path, tab: &str, rows: &[Vec<String>]) {
    std::fs::create_dir_all(dir).unwrap();
    let mut writer = csv::Writer::from_path(dir.join(format!("{}.csv", tab))).unwrap();
    for r in rows {
        writer.write_record(r).unwrap();
    }
    writer.flush().unwrap();
}

/// 将快照写成 CSV 目录（root/<sheet_id>/<tab>.csv）
pub fn write_snapshot_csv(root: &Path, snapshot: &SourceSnapshot) {
    for tab in &snapshot.location_tabs {
        write_csv(&root.join(&snapshot.master_sheet_id), &tab.name, &tab.rows);
    }
    for sheet in &snapshot.location_sheets {
        for tab in &sheet.tabs {
            write_csv(&root.join(&sheet.sheet_id), &tab.name, &tab.rows);
        }
    }
}

// ==========================================
// 直接写入档案数据（绕过导入管道）
// ==========================================

pub fn insert_location(conn: &Connection, sheet_id: &str) -> Location {
    let now = Utc::now();
    let location = Location {
        id: Uuid::new_v4().to_string(),
        sheet_id: sheet_id.to_string(),
        state: "OH".to_string(),
        city: "Columbus".to_string(),
        name: None,
        address: "1 Main St".to_string(),
        status: "open".to_string(),
        is_open: true,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    LocationRepository::insert_tx(conn, &location).unwrap();
    location
}

pub fn insert_saint(conn: &Connection, location_id: &str, number: &str) -> Saint {
    let now = Utc::now();
    let saint = Saint {
        id: Uuid::new_v4().to_string(),
        location_id: location_id.to_string(),
        saint_number: number.to_string(),
        real_name: "Real Name".to_string(),
        saint_name: format!("Saint {}", number),
        saint_date: NaiveDate::from_ymd_opt(2019, 3, 17).unwrap(),
        saint_year: 2019,
        created_at: now,
        updated_at: now,
    };
    SaintRepository::insert_tx(conn, &saint).unwrap();
    saint
}

/// 插入 SaintYear；filled 控制填充的可选字段数（0-5）
pub fn insert_saint_year(conn: &Connection, saint_id: &str, year: i32, filled: usize) -> SaintYear {
    let record = SaintYear {
        id: Uuid::new_v4().to_string(),
        saint_id: saint_id.to_string(),
        year,
        burger: (filled >= 1).then(|| "Burger".to_string()),
        tap_beers: if filled >= 2 { vec!["IPA".to_string()] } else { vec![] },
        can_bottle_beers: if filled >= 3 { vec!["Stout".to_string()] } else { vec![] },
        facebook_event: (filled >= 4).then(|| "https://fb.example/e".to_string()),
        sticker: (filled >= 5).then(|| "gold".to_string()),
        created_at: Utc::now(),
    };
    SaintYearRepository::insert_tx(conn, &record).unwrap();
    record
}

pub fn insert_milestone(conn: &Connection, saint_id: &str, count: i32, beer: Option<&str>) -> Milestone {
    let record = Milestone {
        id: Uuid::new_v4().to_string(),
        saint_id: saint_id.to_string(),
        count,
        date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
        sticker: None,
        beer: beer.map(str::to_string),
        created_at: Utc::now(),
    };
    MilestoneRepository::insert_tx(conn, &record).unwrap();
    record
}

pub fn insert_event(conn: &Connection, saint: &Saint, title: Option<&str>) -> Event {
    let record = Event {
        id: Uuid::new_v4().to_string(),
        saint_id: saint.id.clone(),
        location_id: saint.location_id.clone(),
        date: NaiveDate::from_ymd_opt(2023, 3, 17).unwrap(),
        saint_name: saint.saint_name.clone(),
        event_type: EventType::SaintDay,
        title: title.map(str::to_string),
        description: None,
        milestone_count: None,
        sticker: None,
        created_at: Utc::now(),
    };
    EventRepository::insert_tx(conn, &record).unwrap();
    record
}
