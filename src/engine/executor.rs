// ==========================================
// 圣徒档案导入系统 - 导入执行器
// ==========================================
// 职责: 按冲突策略将已校验记录写入存储
// 顺序: Location → Saint → SaintYear / Milestone → Event
// 红线:
// - 每个门店单元一个事务，单元失败只回滚该单元，执行器继续（隔舱）
// - 本工作流新建的记录在同一事务内写入 import_workflow_record
// - 进度回调在释放连接锁之后调用
// ==========================================

use crate::domain::saint::{
    Event, HistoricalRow, Location, LocationRow, MergeFields, Milestone, MilestoneRow, Saint,
    SaintRow, SaintYear, TabRecord,
};
use crate::domain::types::{ConflictPolicy, EntityKind};
use crate::domain::workflow::{SheetTab, SourceSnapshot};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::event_deriver::{derive_milestone_event, derive_saint_day_event};
use crate::importer::field_mapper::{process_locations_tab, process_sheet_tab};
use crate::repository::error::RepositoryError;
use crate::repository::{
    EventRepository, LocationRepository, MilestoneRepository, SaintRepository,
    SaintYearRepository, WorkflowRepository,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 执行单元
// ==========================================

/// 一个门店及其名下全部已校验记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUnit {
    pub location: LocationRow,
    pub saints: Vec<SaintRow>,
    pub historical: Vec<HistoricalRow>,
    pub milestones: Vec<MilestoneRow>,
}

/// 从冻结快照构建执行单元
///
/// 同一 sheet_id 在多个状态页签重复出现时，以首次出现为准。
/// 行级/页签级错误已在 verify 阶段报告，这里只收集有效记录。
pub fn build_units(snapshot: &SourceSnapshot) -> Vec<LocationUnit> {
    let mut seen = HashSet::new();
    let mut units = Vec::new();

    for tab in &snapshot.location_tabs {
        let output = process_locations_tab(&tab.name, &tab.rows);
        for location in output.records {
            if !seen.insert(location.sheet_id.clone()) {
                continue;
            }

            let mut unit = LocationUnit {
                location,
                saints: Vec::new(),
                historical: Vec::new(),
                milestones: Vec::new(),
            };

            if let Some(sheet) = snapshot.sheet(&unit.location.sheet_id) {
                for kind in SheetTab::ALL {
                    let Some(raw) = sheet.tab(kind) else {
                        continue;
                    };
                    for record in process_sheet_tab(kind, &raw.rows).records {
                        match record {
                            TabRecord::Saint(r) => unit.saints.push(r),
                            TabRecord::Historical(r) => unit.historical.push(r),
                            TabRecord::Milestone(r) => unit.milestones.push(r),
                            TabRecord::Location(_) => {}
                        }
                    }
                }
            }

            units.push(unit);
        }
    }

    units
}

// ==========================================
// 执行报告
// ==========================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCounts {
    pub created: usize,
    pub updated: usize,
    pub merged: usize,
    pub skipped: usize,
    pub unchanged: usize,
}

impl WriteCounts {
    fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Create => self.created += 1,
            Resolution::Update => self.updated += 1,
            Resolution::Merge => self.merged += 1,
            Resolution::Skip => self.skipped += 1,
            Resolution::Unchanged => self.unchanged += 1,
        }
    }

    pub fn add(&mut self, other: &WriteCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.merged += other.merged;
        self.skipped += other.skipped;
        self.unchanged += other.unchanged;
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.merged + self.skipped + self.unchanged
    }
}

pub type EntityCounts = BTreeMap<EntityKind, WriteCounts>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub sheet_id: String,
    pub committed: bool,
    pub counts: EntityCounts,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub workflow_id: String,
    pub policy: ConflictPolicy,
    /// true: 事务统一回滚，仅用于预测
    pub dry_run: bool,
    pub units: Vec<UnitOutcome>,
    pub totals: EntityCounts,
    pub committed_units: usize,
    pub failed_units: usize,
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    pub fn errors(&self) -> Vec<String> {
        self.units.iter().filter_map(|u| u.error.clone()).collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.units.iter().flat_map(|u| u.warnings.iter().cloned()).collect()
    }
}

// ==========================================
// 冲突决策
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Create,
    Update,
    Merge,
    Skip,
    Unchanged,
}

/// 按策略决定已存在记录的处理方式，返回决策与下游使用的记录
fn resolve<T: MergeFields>(existing: Option<T>, incoming: T, policy: ConflictPolicy) -> (Resolution, T) {
    let Some(mut current) = existing else {
        return (Resolution::Create, incoming);
    };

    match policy {
        ConflictPolicy::SkipIfExists => (Resolution::Skip, current),
        ConflictPolicy::Overwrite => {
            if current.replace_fields(&incoming) {
                (Resolution::Update, current)
            } else {
                (Resolution::Unchanged, current)
            }
        }
        ConflictPolicy::MergeNullCoalesce => {
            if current.merge_missing(&incoming) {
                (Resolution::Merge, current)
            } else {
                (Resolution::Unchanged, current)
            }
        }
    }
}

/// 带主键的实体
trait Identified {
    fn id(&self) -> &str;
}

macro_rules! impl_identified {
    ($($t:ty),*) => {
        $(impl Identified for $t {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_identified!(Location, Saint, SaintYear, Milestone, Event);

/// 单元执行上下文（事务内）
struct UnitWriter<'a> {
    conn: &'a Connection,
    workflow_id: &'a str,
    policy: ConflictPolicy,
    now: DateTime<Utc>,
    counts: EntityCounts,
    warnings: Vec<String>,
}

impl<'a> UnitWriter<'a> {
    fn new(conn: &'a Connection, workflow_id: &'a str, policy: ConflictPolicy) -> Self {
        Self {
            conn,
            workflow_id,
            policy,
            now: Utc::now(),
            counts: EntityCounts::new(),
            warnings: Vec::new(),
        }
    }

    fn count(&mut self, kind: EntityKind, resolution: Resolution) {
        self.counts.entry(kind).or_default().record(resolution);
    }

    fn tag(&self, kind: EntityKind, id: &str) -> EngineResult<()> {
        WorkflowRepository::tag_record_tx(self.conn, self.workflow_id, kind, id)?;
        Ok(())
    }

    /// 写入决策结果；返回落库后的记录
    fn apply<T: Identified>(
        &mut self,
        kind: EntityKind,
        resolution: Resolution,
        record: T,
        insert: impl Fn(&Connection, &T) -> Result<(), RepositoryError>,
        update: impl Fn(&Connection, &T) -> Result<(), RepositoryError>,
    ) -> EngineResult<T> {
        match resolution {
            Resolution::Create => {
                insert(self.conn, &record)?;
                self.tag(kind, record.id())?;
            }
            Resolution::Update | Resolution::Merge => update(self.conn, &record)?,
            Resolution::Skip | Resolution::Unchanged => {}
        }
        self.count(kind, resolution);
        Ok(record)
    }

    fn write_location(&mut self, row: &LocationRow) -> EngineResult<Location> {
        let existing = LocationRepository::find_by_sheet_id_tx(self.conn, &row.sheet_id)?;
        let incoming = Location {
            id: Uuid::new_v4().to_string(),
            sheet_id: row.sheet_id.clone(),
            state: row.state.clone(),
            city: row.city.clone(),
            name: row.name.clone(),
            address: row.address.clone(),
            status: row.status.clone(),
            is_open: row.is_open.unwrap_or(true),
            is_active: row.is_active.unwrap_or(true),
            created_at: self.now,
            updated_at: self.now,
        };

        let (resolution, mut location) = resolve(existing, incoming, self.policy);
        if matches!(resolution, Resolution::Update | Resolution::Merge) {
            location.updated_at = self.now;
        }
        self.apply(
            EntityKind::Location,
            resolution,
            location,
            LocationRepository::insert_tx,
            LocationRepository::update_tx,
        )
    }

    fn write_saint(&mut self, location: &Location, row: &SaintRow) -> EngineResult<Saint> {
        let existing = SaintRepository::find_by_number_tx(self.conn, &location.id, &row.saint_number)?;
        let incoming = Saint {
            id: Uuid::new_v4().to_string(),
            location_id: location.id.clone(),
            saint_number: row.saint_number.clone(),
            real_name: row.real_name.clone(),
            saint_name: row.saint_name.clone(),
            saint_date: row.saint_date,
            saint_year: row.saint_year,
            created_at: self.now,
            updated_at: self.now,
        };

        let (resolution, mut saint) = resolve(existing, incoming, self.policy);
        if matches!(resolution, Resolution::Update | Resolution::Merge) {
            saint.updated_at = self.now;
        }
        self.apply(
            EntityKind::Saint,
            resolution,
            saint,
            SaintRepository::insert_tx,
            SaintRepository::update_tx,
        )
    }

    /// 解析圣徒编号：优先本单元 Saints 页签，其次库中同门店记录
    fn resolve_saint(
        &mut self,
        saints: &HashMap<String, Saint>,
        location: &Location,
        saint_number: &str,
        kind: EntityKind,
        row_number: usize,
    ) -> EngineResult<Option<Saint>> {
        if let Some(saint) = saints.get(saint_number) {
            return Ok(Some(saint.clone()));
        }
        if let Some(saint) = SaintRepository::find_by_number_tx(self.conn, &location.id, saint_number)? {
            return Ok(Some(saint));
        }

        let message = format!(
            "{}: 第 {} 行的圣徒编号 {} 无法解析，已跳过",
            location.sheet_id, row_number, saint_number
        );
        warn!(sheet_id = %location.sheet_id, saint_number = %saint_number, entity = %kind, "圣徒编号无法解析，跳过该行");
        self.warnings.push(message);
        self.count(kind, Resolution::Skip);
        Ok(None)
    }

    fn write_saint_year(&mut self, saint: &Saint, row: &HistoricalRow) -> EngineResult<SaintYear> {
        let existing = SaintYearRepository::find_by_key_tx(self.conn, &saint.id, row.year)?;
        let incoming = SaintYear {
            id: Uuid::new_v4().to_string(),
            saint_id: saint.id.clone(),
            year: row.year,
            burger: row.burger.clone(),
            tap_beers: row.tap_beers.clone(),
            can_bottle_beers: row.can_bottle_beers.clone(),
            facebook_event: row.facebook_event.clone(),
            sticker: row.sticker.clone(),
            created_at: self.now,
        };

        let (resolution, record) = resolve(existing, incoming, self.policy);
        self.apply(
            EntityKind::SaintYear,
            resolution,
            record,
            SaintYearRepository::insert_tx,
            SaintYearRepository::update_tx,
        )
    }

    fn write_milestone(&mut self, saint: &Saint, row: &MilestoneRow) -> EngineResult<Milestone> {
        // 两个自然键 (count / date) 任一命中即视为已存在
        let existing = match MilestoneRepository::find_by_count_tx(self.conn, &saint.id, row.count)? {
            Some(found) => Some(found),
            None => MilestoneRepository::find_by_date_tx(self.conn, &saint.id, row.date)?,
        };
        let mut incoming = Milestone {
            id: Uuid::new_v4().to_string(),
            saint_id: saint.id.clone(),
            count: row.count,
            date: row.date,
            sticker: row.sticker.clone(),
            beer: row.beer.clone(),
            created_at: self.now,
        };

        // 覆盖日期不得与同一圣徒的其他里程碑冲突
        if let (Some(current), ConflictPolicy::Overwrite) = (&existing, self.policy) {
            if current.date != incoming.date {
                if let Some(sibling) = MilestoneRepository::find_by_date_tx(self.conn, &saint.id, incoming.date)? {
                    if sibling.id != current.id {
                        warn!(
                            saint_id = %saint.id,
                            count = row.count,
                            date = %incoming.date,
                            "里程碑日期与其他里程碑冲突，保留原日期"
                        );
                        self.warnings.push(format!(
                            "第 {} 行里程碑 {} 的日期 {} 已被里程碑 {} 使用，保留原日期 {}",
                            row.row_number, row.count, incoming.date, sibling.count, current.date
                        ));
                        incoming.date = current.date;
                    }
                }
            }
        }

        let (resolution, record) = resolve(existing, incoming, self.policy);
        self.apply(
            EntityKind::Milestone,
            resolution,
            record,
            MilestoneRepository::insert_tx,
            MilestoneRepository::update_tx,
        )
    }

    fn write_event(&mut self, incoming: Event) -> EngineResult<Event> {
        let existing = EventRepository::find_by_key_tx(
            self.conn,
            incoming.date,
            &incoming.saint_name,
            incoming.event_type,
        )?;

        let (resolution, record) = resolve(existing, incoming, self.policy);
        self.apply(
            EntityKind::Event,
            resolution,
            record,
            EventRepository::insert_tx,
            EventRepository::update_tx,
        )
    }

    fn write_unit(&mut self, unit: &LocationUnit) -> EngineResult<()> {
        // ===== Step 1: Location =====
        let location = self.write_location(&unit.location)?;

        // ===== Step 2: Saint =====
        let mut saints: HashMap<String, Saint> = HashMap::new();
        for row in &unit.saints {
            let saint = self.write_saint(&location, row)?;
            saints.insert(row.saint_number.clone(), saint);
        }

        // ===== Step 3: SaintYear / Milestone（同时派生事件）=====
        let mut events = Vec::new();
        for row in &unit.historical {
            let Some(saint) = self.resolve_saint(
                &saints,
                &location,
                &row.saint_number,
                EntityKind::SaintYear,
                row.row_number,
            )?
            else {
                continue;
            };
            let record = self.write_saint_year(&saint, row)?;
            if let Some(event) = derive_saint_day_event(&saint, &record) {
                events.push(event);
            }
        }

        for row in &unit.milestones {
            let Some(saint) = self.resolve_saint(
                &saints,
                &location,
                &row.saint_number,
                EntityKind::Milestone,
                row.row_number,
            )?
            else {
                continue;
            };
            let record = self.write_milestone(&saint, row)?;
            events.push(derive_milestone_event(&saint, &record));
        }

        // ===== Step 4: Event =====
        for event in events {
            self.write_event(event)?;
        }

        Ok(())
    }
}

// ==========================================
// ImportExecutor
// ==========================================

pub struct ImportExecutor {
    conn: Arc<Mutex<Connection>>,
}

impl ImportExecutor {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Repository(RepositoryError::LockError(e.to_string())))
    }

    /// 执行导入（每个单元独立提交）
    ///
    /// # 参数
    /// - progress: 每个单元结束后回调 (已完成数, 总数)
    #[instrument(skip(self, units, progress), fields(workflow_id = %workflow_id, units = units.len()))]
    pub fn execute<F>(
        &self,
        workflow_id: &str,
        units: &[LocationUnit],
        policy: ConflictPolicy,
        mut progress: F,
    ) -> EngineResult<ExecutionReport>
    where
        F: FnMut(usize, usize),
    {
        info!(policy = %policy, "开始执行导入");
        let report = self.run(workflow_id, units, policy, false, &mut progress)?;
        info!(
            committed = report.committed_units,
            failed = report.failed_units,
            elapsed_ms = report.elapsed_ms,
            "导入执行完成"
        );
        Ok(report)
    }

    /// 预测写入结果：执行相同写入路径，但每个单元事务统一回滚
    pub fn plan(
        &self,
        workflow_id: &str,
        units: &[LocationUnit],
        policy: ConflictPolicy,
    ) -> EngineResult<ExecutionReport> {
        self.run(workflow_id, units, policy, true, &mut |_, _| {})
    }

    fn run(
        &self,
        workflow_id: &str,
        units: &[LocationUnit],
        policy: ConflictPolicy,
        dry_run: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> EngineResult<ExecutionReport> {
        let start = Instant::now();
        let total = units.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut totals = EntityCounts::new();

        for (idx, unit) in units.iter().enumerate() {
            let outcome = self.run_unit(workflow_id, unit, policy, dry_run)?;
            for (kind, counts) in &outcome.counts {
                totals.entry(*kind).or_default().add(counts);
            }
            outcomes.push(outcome);

            // 连接锁已在 run_unit 内释放
            progress(idx + 1, total);
        }

        let committed_units = outcomes.iter().filter(|u| u.committed).count();
        let failed_units = outcomes.iter().filter(|u| u.error.is_some()).count();

        Ok(ExecutionReport {
            workflow_id: workflow_id.to_string(),
            policy,
            dry_run,
            units: outcomes,
            totals,
            committed_units,
            failed_units,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// 单元事务；仅连接锁失败向上传播，其余错误记录为 Transaction 错误
    fn run_unit(
        &self,
        workflow_id: &str,
        unit: &LocationUnit,
        policy: ConflictPolicy,
        dry_run: bool,
    ) -> EngineResult<UnitOutcome> {
        let sheet_id = unit.location.sheet_id.clone();
        let mut conn = self.get_conn()?;
        let result = write_unit_tx(&mut conn, workflow_id, unit, policy, dry_run);
        drop(conn);

        match result {
            Ok((counts, warnings)) => {
                debug!(sheet_id = %sheet_id, dry_run, "单元处理完成");
                Ok(UnitOutcome {
                    sheet_id,
                    committed: !dry_run,
                    counts,
                    warnings,
                    error: None,
                })
            }
            Err(e) => {
                let err = EngineError::Transaction {
                    unit: sheet_id.clone(),
                    message: e.to_string(),
                };
                warn!(sheet_id = %sheet_id, error = %err, "单元事务失败，已回滚");
                Ok(UnitOutcome {
                    sheet_id,
                    committed: false,
                    counts: EntityCounts::new(),
                    warnings: Vec::new(),
                    error: Some(err.to_string()),
                })
            }
        }
    }
}

fn write_unit_tx(
    conn: &mut Connection,
    workflow_id: &str,
    unit: &LocationUnit,
    policy: ConflictPolicy,
    dry_run: bool,
) -> EngineResult<(EntityCounts, Vec<String>)> {
    let tx = conn.transaction()?;
    let mut writer = UnitWriter::new(&tx, workflow_id, policy);
    writer.write_unit(unit)?;
    let UnitWriter { counts, warnings, .. } = writer;
    if dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    Ok((counts, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::types::{PhaseKind, WorkflowState};
    use crate::domain::workflow::ImportWorkflow;
    use chrono::NaiveDate;

    fn setup() -> (Arc<Mutex<Connection>>, String) {
        let conn = open_in_memory().unwrap();
        let workflow_id = "wf-1".to_string();
        let wf = ImportWorkflow {
            workflow_id: workflow_id.clone(),
            state: WorkflowState::Import,
            current_phase: PhaseKind::Import,
            conflict_policy: ConflictPolicy::SkipIfExists,
            snapshot: SourceSnapshot {
                master_sheet_id: "master".to_string(),
                location_tabs: vec![],
                location_sheets: vec![],
                captured_at: Utc::now(),
            },
            error_summary: None,
            created_by: "test".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        WorkflowRepository::insert_workflow_tx(&conn, &wf).unwrap();
        (Arc::new(Mutex::new(conn)), workflow_id)
    }

    fn unit(sheet_id: &str, burger: Option<&str>) -> LocationUnit {
        LocationUnit {
            location: LocationRow {
                sheet_id: sheet_id.to_string(),
                state: "OH".to_string(),
                city: "Columbus".to_string(),
                name: None,
                address: "1 Main St".to_string(),
                status: "open".to_string(),
                is_open: None,
                is_active: None,
                row_number: 1,
            },
            saints: vec![SaintRow {
                saint_number: "1".to_string(),
                real_name: "Jane Doe".to_string(),
                saint_name: "Saint Jane".to_string(),
                saint_date: NaiveDate::from_ymd_opt(2019, 3, 17).unwrap(),
                saint_year: 2019,
                row_number: 1,
            }],
            historical: vec![HistoricalRow {
                saint_number: "1".to_string(),
                year: 2023,
                burger: burger.map(|s| s.to_string()),
                tap_beers: vec![],
                can_bottle_beers: vec![],
                facebook_event: None,
                sticker: None,
                row_number: 1,
            }],
            milestones: vec![MilestoneRow {
                saint_number: "1".to_string(),
                count: 1000,
                date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
                sticker: None,
                beer: None,
                row_number: 1,
            }],
        }
    }

    #[test]
    fn test_creates_full_hierarchy_and_tags_records() {
        let (conn, wf) = setup();
        let executor = ImportExecutor::new(conn.clone());

        let report = executor
            .execute(&wf, &[unit("loc-1", Some("Classic"))], ConflictPolicy::SkipIfExists, |_, _| {})
            .unwrap();

        assert_eq!(report.committed_units, 1);
        assert_eq!(report.totals[&EntityKind::Location].created, 1);
        assert_eq!(report.totals[&EntityKind::Saint].created, 1);
        assert_eq!(report.totals[&EntityKind::SaintYear].created, 1);
        assert_eq!(report.totals[&EntityKind::Milestone].created, 1);
        assert_eq!(report.totals[&EntityKind::Event].created, 2);

        let guard = conn.lock().unwrap();
        let tagged = WorkflowRepository::count_tagged_tx(&guard, &wf).unwrap();
        assert_eq!(tagged[&EntityKind::Event], 2);
        assert_eq!(tagged[&EntityKind::Location], 1);
    }

    #[test]
    fn test_skip_if_exists_second_run_writes_nothing() {
        let (conn, wf) = setup();
        let executor = ImportExecutor::new(conn.clone());
        let units = [unit("loc-1", Some("Classic"))];

        executor.execute(&wf, &units, ConflictPolicy::SkipIfExists, |_, _| {}).unwrap();
        let second = executor.execute(&wf, &units, ConflictPolicy::SkipIfExists, |_, _| {}).unwrap();

        for counts in second.totals.values() {
            assert_eq!(counts.created, 0);
            assert_eq!(counts.updated, 0);
        }
        assert_eq!(second.totals[&EntityKind::Event].skipped, 2);
    }

    #[test]
    fn test_merge_fills_only_missing_fields() {
        let (conn, wf) = setup();
        let executor = ImportExecutor::new(conn.clone());

        executor
            .execute(&wf, &[unit("loc-1", None)], ConflictPolicy::SkipIfExists, |_, _| {})
            .unwrap();
        let report = executor
            .execute(&wf, &[unit("loc-1", Some("Smoky"))], ConflictPolicy::MergeNullCoalesce, |_, _| {})
            .unwrap();
        assert_eq!(report.totals[&EntityKind::SaintYear].merged, 1);

        // 已有值不被覆盖
        executor
            .execute(&wf, &[unit("loc-1", Some("Other"))], ConflictPolicy::MergeNullCoalesce, |_, _| {})
            .unwrap();
        let guard = conn.lock().unwrap();
        let all = SaintYearRepository::list_all_tx(&guard).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].burger.as_deref(), Some("Smoky"));
    }

    #[test]
    fn test_plan_predicts_without_writing() {
        let (conn, wf) = setup();
        let executor = ImportExecutor::new(conn.clone());

        let plan = executor
            .plan(&wf, &[unit("loc-1", Some("Classic"))], ConflictPolicy::Overwrite)
            .unwrap();
        assert!(plan.dry_run);
        assert_eq!(plan.committed_units, 0);
        assert_eq!(plan.totals[&EntityKind::Event].created, 2);

        let guard = conn.lock().unwrap();
        assert!(LocationRepository::find_by_sheet_id_tx(&guard, "loc-1").unwrap().is_none());
    }

    #[test]
    fn test_unresolved_saint_number_is_skipped_with_warning() {
        let (conn, wf) = setup();
        let executor = ImportExecutor::new(conn);
        let mut u = unit("loc-1", None);
        u.historical[0].saint_number = "99".to_string();

        let report = executor.execute(&wf, &[u], ConflictPolicy::SkipIfExists, |_, _| {}).unwrap();
        assert_eq!(report.committed_units, 1);
        assert_eq!(report.totals[&EntityKind::SaintYear].skipped, 1);
        assert_eq!(report.warnings().len(), 1);
        // 仅里程碑事件
        assert_eq!(report.totals[&EntityKind::Event].created, 1);
    }

    #[test]
    fn test_failing_unit_is_isolated() {
        let (conn, wf) = setup();
        {
            let guard = conn.lock().unwrap();
            guard
                .execute_batch(
                    "CREATE TRIGGER block_bad BEFORE INSERT ON saint WHEN NEW.saint_name = 'Bad'
                     BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
                )
                .unwrap();
        }
        let executor = ImportExecutor::new(conn.clone());
        let mut bad = unit("loc-bad", None);
        bad.saints[0].saint_name = "Bad".to_string();

        let mut calls = Vec::new();
        let report = executor
            .execute(&wf, &[bad, unit("loc-good", None)], ConflictPolicy::SkipIfExists, |done, total| {
                calls.push((done, total))
            })
            .unwrap();

        assert_eq!(report.failed_units, 1);
        assert_eq!(report.committed_units, 1);
        assert_eq!(calls, vec![(1, 2), (2, 2)]);

        let guard = conn.lock().unwrap();
        assert!(LocationRepository::find_by_sheet_id_tx(&guard, "loc-bad").unwrap().is_none());
        assert!(LocationRepository::find_by_sheet_id_tx(&guard, "loc-good").unwrap().is_some());
    }

    fn milestone(count: i32, month: u32) -> MilestoneRow {
        MilestoneRow {
            saint_number: "1".to_string(),
            count,
            date: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
            sticker: None,
            beer: None,
            row_number: 1,
        }
    }

    #[test]
    fn test_same_date_milestones_are_not_duplicated() {
        let (conn, wf) = setup();
        let executor = ImportExecutor::new(conn.clone());
        let mut u = unit("loc-1", None);
        u.milestones = vec![milestone(1000, 6), milestone(2000, 6)];

        let report = executor.execute(&wf, &[u], ConflictPolicy::SkipIfExists, |_, _| {}).unwrap();
        assert_eq!(report.totals[&EntityKind::Milestone].created, 1);
        assert_eq!(report.totals[&EntityKind::Milestone].skipped, 1);

        let guard = conn.lock().unwrap();
        let all = MilestoneRepository::list_all_tx(&guard).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].count, 1000);
    }

    #[test]
    fn test_overwrite_keeps_date_when_sibling_owns_it() {
        let (conn, wf) = setup();
        let executor = ImportExecutor::new(conn.clone());
        let mut first = unit("loc-1", None);
        first.milestones = vec![milestone(1000, 6), milestone(2000, 7)];
        executor.execute(&wf, &[first], ConflictPolicy::SkipIfExists, |_, _| {}).unwrap();

        let mut second = unit("loc-1", None);
        second.milestones = vec![milestone(1000, 7)];
        let report = executor.execute(&wf, &[second], ConflictPolicy::Overwrite, |_, _| {}).unwrap();
        assert!(report.warnings().iter().any(|w| w.contains("保留原日期")));

        let guard = conn.lock().unwrap();
        let all = MilestoneRepository::list_all_tx(&guard).unwrap();
        assert_eq!(all.len(), 2);
        let dates: HashSet<NaiveDate> = all.iter().map(|m| m.date).collect();
        assert_eq!(dates.len(), 2);
        let thousand = all.iter().find(|m| m.count == 1000).unwrap();
        assert_eq!(thousand.date, NaiveDate::from_ymd_opt(2023, 6, 1).unwrap());
    }
}
