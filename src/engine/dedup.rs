// ==========================================
// 圣徒档案导入系统 - 重复记录清理引擎
// ==========================================
// 流程: 分组 → 完整度评分 → 选择幸存记录 → 删除其余记录 → 校验幸存记录仍存在
// 红线:
// - 每组一个事务；幸存记录校验失败则整组回滚 (Verification)
// - 被删除记录上独有的字段值只输出审计警告，不自动合并
// - dry-run 与真实执行使用相同的分组与评分
// ==========================================

use crate::domain::saint::{Event, Milestone, SaintYear};
use crate::domain::types::EntityKind;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::error::RepositoryError;
use crate::repository::{EventRepository, MilestoneRepository, SaintYearRepository};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

pub const DEFAULT_BATCH_SIZE: usize = 50;

// ==========================================
// 清理目标
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupTarget {
    SaintYear,        // (saint_id, year)
    MilestoneByCount, // (saint_id, count)
    MilestoneByDate,  // (saint_id, date)
    Event,            // (date, saint_name, event_type)
}

impl DedupTarget {
    pub const ALL: [DedupTarget; 4] = [
        DedupTarget::SaintYear,
        DedupTarget::MilestoneByCount,
        DedupTarget::MilestoneByDate,
        DedupTarget::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DedupTarget::SaintYear => "saint_year",
            DedupTarget::MilestoneByCount => "milestone_by_count",
            DedupTarget::MilestoneByDate => "milestone_by_date",
            DedupTarget::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<DedupTarget> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "saint_year" | "saintyear" => Some(DedupTarget::SaintYear),
            "milestone_by_count" | "milestone_count" => Some(DedupTarget::MilestoneByCount),
            "milestone_by_date" | "milestone_date" => Some(DedupTarget::MilestoneByDate),
            "event" => Some(DedupTarget::Event),
            _ => None,
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            DedupTarget::SaintYear => EntityKind::SaintYear,
            DedupTarget::MilestoneByCount | DedupTarget::MilestoneByDate => EntityKind::Milestone,
            DedupTarget::Event => EntityKind::Event,
        }
    }
}

// ==========================================
// 分组与评分
// ==========================================

/// 参与比较的候选记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCandidate {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// 可选字段（字段名, 值）；None 表示未填写
    pub fields: Vec<(String, Option<String>)>,
}

impl DedupCandidate {
    /// 完整度评分 = 已填写的可选字段数
    pub fn score(&self) -> usize {
        self.fields.iter().filter(|(_, v)| v.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub target: DedupTarget,
    pub key: String,
    pub members: Vec<DedupCandidate>,
}

impl DuplicateGroup {
    /// 幸存记录下标: 评分最高 → 创建时间最新 → id 最大
    pub fn survivor_index(&self) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.score()
                    .cmp(&b.score())
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|(idx, _)| idx)
    }

    /// 被删除记录上独有（其余成员均不具备）的字段值
    pub fn unique_data(&self, loser_idx: usize) -> Vec<String> {
        let Some(loser) = self.members.get(loser_idx) else {
            return Vec::new();
        };

        loser
            .fields
            .iter()
            .filter_map(|(name, value)| {
                let value = value.as_ref()?;
                let shared = self.members.iter().enumerate().any(|(idx, other)| {
                    idx != loser_idx
                        && other
                            .fields
                            .iter()
                            .any(|(n, v)| n == name && v.as_ref() == Some(value))
                });
                (!shared).then(|| format!("{}={}", name, value))
            })
            .collect()
    }
}

fn opt(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

fn list(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(", "))
}

fn saint_year_candidate(r: &SaintYear) -> DedupCandidate {
    DedupCandidate {
        id: r.id.clone(),
        created_at: r.created_at,
        fields: vec![
            ("burger".to_string(), opt(&r.burger)),
            ("tap_beers".to_string(), list(&r.tap_beers)),
            ("can_bottle_beers".to_string(), list(&r.can_bottle_beers)),
            ("facebook_event".to_string(), opt(&r.facebook_event)),
            ("sticker".to_string(), opt(&r.sticker)),
        ],
    }
}

fn milestone_candidate(r: &Milestone) -> DedupCandidate {
    DedupCandidate {
        id: r.id.clone(),
        created_at: r.created_at,
        fields: vec![
            ("sticker".to_string(), opt(&r.sticker)),
            ("beer".to_string(), opt(&r.beer)),
        ],
    }
}

fn event_candidate(r: &Event) -> DedupCandidate {
    DedupCandidate {
        id: r.id.clone(),
        created_at: r.created_at,
        fields: vec![
            ("title".to_string(), opt(&r.title)),
            ("description".to_string(), opt(&r.description)),
            ("milestone_count".to_string(), r.milestone_count.map(|c| c.to_string())),
            ("sticker".to_string(), opt(&r.sticker)),
        ],
    }
}

/// 加载目标全部记录并按自然键分组（仅保留成员数 > 1 的组）
pub fn find_duplicate_groups_tx(conn: &Connection, target: DedupTarget) -> EngineResult<Vec<DuplicateGroup>> {
    let keyed: Vec<(String, DedupCandidate)> = match target {
        DedupTarget::SaintYear => SaintYearRepository::list_all_tx(conn)?
            .iter()
            .map(|r| (format!("{}/{}", r.saint_id, r.year), saint_year_candidate(r)))
            .collect(),
        DedupTarget::MilestoneByCount => MilestoneRepository::list_all_tx(conn)?
            .iter()
            .map(|r| (format!("{}/{}", r.saint_id, r.count), milestone_candidate(r)))
            .collect(),
        DedupTarget::MilestoneByDate => MilestoneRepository::list_all_tx(conn)?
            .iter()
            .map(|r| (format!("{}/{}", r.saint_id, r.date), milestone_candidate(r)))
            .collect(),
        DedupTarget::Event => EventRepository::list_all_tx(conn)?
            .iter()
            .map(|r| {
                (
                    format!("{}/{}/{}", r.date, r.saint_name, r.event_type.as_str()),
                    event_candidate(r),
                )
            })
            .collect(),
    };

    let mut grouped: BTreeMap<String, Vec<DedupCandidate>> = BTreeMap::new();
    for (key, candidate) in keyed {
        grouped.entry(key).or_default().push(candidate);
    }

    Ok(grouped
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(key, members)| DuplicateGroup {
            target,
            key,
            members,
        })
        .collect())
}

fn delete_record_tx(conn: &Connection, target: DedupTarget, id: &str) -> EngineResult<usize> {
    let deleted = match target {
        DedupTarget::SaintYear => SaintYearRepository::delete_if_exists_tx(conn, id)?,
        DedupTarget::MilestoneByCount | DedupTarget::MilestoneByDate => {
            MilestoneRepository::delete_if_exists_tx(conn, id)?
        }
        DedupTarget::Event => EventRepository::delete_if_exists_tx(conn, id)?,
    };
    Ok(deleted)
}

fn record_exists_tx(conn: &Connection, target: DedupTarget, id: &str) -> EngineResult<bool> {
    let exists = match target {
        DedupTarget::SaintYear => SaintYearRepository::find_by_id_tx(conn, id)?.is_some(),
        DedupTarget::MilestoneByCount | DedupTarget::MilestoneByDate => {
            MilestoneRepository::find_by_id_tx(conn, id)?.is_some()
        }
        DedupTarget::Event => EventRepository::find_by_id_tx(conn, id)?.is_some(),
    };
    Ok(exists)
}

// ==========================================
// 报告
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub id: String,
    pub score: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDecision {
    pub key: String,
    pub survivor_id: String,
    pub survivor_score: usize,
    pub deleted: Vec<DeletedRecord>,
    /// false: 组事务失败并已回滚
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupReport {
    pub target: DedupTarget,
    pub dry_run: bool,
    pub groups_found: usize,
    pub groups_processed: usize,
    pub groups_failed: usize,
    /// dry-run 时为计划删除数
    pub records_deleted: usize,
    pub decisions: Vec<GroupDecision>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl DedupReport {
    fn new(target: DedupTarget, dry_run: bool, groups_found: usize) -> Self {
        Self {
            target,
            dry_run,
            groups_found,
            groups_processed: 0,
            groups_failed: 0,
            records_deleted: 0,
            decisions: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

// ==========================================
// DedupEngine
// ==========================================

pub struct DedupEngine {
    conn: Arc<Mutex<Connection>>,
    batch_size: usize,
}

impl DedupEngine {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Repository(RepositoryError::LockError(e.to_string())))
    }

    pub fn find_duplicate_groups(&self, target: DedupTarget) -> EngineResult<Vec<DuplicateGroup>> {
        let conn = self.get_conn()?;
        find_duplicate_groups_tx(&conn, target)
    }

    /// 清理单个目标的重复记录
    #[instrument(skip(self), fields(target = target.as_str()))]
    pub fn reconcile(&self, target: DedupTarget, dry_run: bool) -> EngineResult<DedupReport> {
        let groups = self.find_duplicate_groups(target)?;
        let mut report = DedupReport::new(target, dry_run, groups.len());
        info!(groups = groups.len(), dry_run, "开始清理重复记录");

        for (batch_no, batch) in groups.chunks(self.batch_size).enumerate() {
            for group in batch {
                self.process_group(group, dry_run, &mut report)?;
            }
            info!(
                batch = batch_no + 1,
                processed = report.groups_processed,
                failed = report.groups_failed,
                "批次处理完成"
            );
        }

        info!(
            deleted = report.records_deleted,
            failed = report.groups_failed,
            "重复记录清理完成"
        );
        Ok(report)
    }

    /// 依次清理全部目标（milestone 先按 count 再按 date）
    pub fn reconcile_all(&self, dry_run: bool) -> EngineResult<Vec<DedupReport>> {
        DedupTarget::ALL
            .iter()
            .map(|target| self.reconcile(*target, dry_run))
            .collect()
    }

    /// 处理单组；组级失败计入报告，不向上传播
    fn process_group(&self, group: &DuplicateGroup, dry_run: bool, report: &mut DedupReport) -> EngineResult<()> {
        let Some(survivor_idx) = group.survivor_index() else {
            return Ok(());
        };
        let survivor = &group.members[survivor_idx];

        let losers: Vec<(usize, &DedupCandidate)> = group
            .members
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != survivor_idx)
            .collect();

        for (idx, loser) in &losers {
            let unique = group.unique_data(*idx);
            if !unique.is_empty() {
                let message = format!(
                    "{} {}: 待删除记录 {} 含独有数据 [{}]，幸存记录 {}",
                    group.target.as_str(),
                    group.key,
                    loser.id,
                    unique.join("; "),
                    survivor.id
                );
                warn!(group = %group.key, loser = %loser.id, "待删除记录含独有数据");
                report.warnings.push(message);
            }
        }

        let mut decision = GroupDecision {
            key: group.key.clone(),
            survivor_id: survivor.id.clone(),
            survivor_score: survivor.score(),
            deleted: losers
                .iter()
                .map(|(_, c)| DeletedRecord {
                    id: c.id.clone(),
                    score: c.score(),
                })
                .collect(),
            applied: false,
        };

        if dry_run {
            report.records_deleted += decision.deleted.len();
            report.groups_processed += 1;
            report.decisions.push(decision);
            return Ok(());
        }

        let mut conn = self.get_conn()?;
        match delete_group_tx(&mut conn, group, &survivor.id, &decision.deleted) {
            Ok(deleted) => {
                decision.applied = true;
                report.records_deleted += deleted;
                report.groups_processed += 1;
            }
            Err(e) => {
                warn!(group = %group.key, error = %e, "重复组清理失败，已回滚");
                report.groups_failed += 1;
                report.errors.push(e.to_string());
            }
        }
        report.decisions.push(decision);
        Ok(())
    }
}

/// 组事务: 删除其余记录后重新读取幸存记录
fn delete_group_tx(
    conn: &mut Connection,
    group: &DuplicateGroup,
    survivor_id: &str,
    losers: &[DeletedRecord],
) -> EngineResult<usize> {
    let tx = conn.transaction()?;

    let mut deleted = 0;
    for loser in losers {
        deleted += delete_record_tx(&tx, group.target, &loser.id)?;
    }

    if !record_exists_tx(&tx, group.target, survivor_id)? {
        // tx 在此处 drop，自动回滚
        return Err(EngineError::Verification {
            group: format!("{}:{}", group.target.as_str(), group.key),
            survivor_id: survivor_id.to_string(),
        });
    }

    tx.commit()?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(id: &str, age_minutes: i64, fields: &[(&str, Option<&str>)]) -> DedupCandidate {
        DedupCandidate {
            id: id.to_string(),
            created_at: Utc::now() - Duration::minutes(age_minutes),
            fields: fields
                .iter()
                .map(|(n, v)| (n.to_string(), v.map(|s| s.to_string())))
                .collect(),
        }
    }

    fn group(members: Vec<DedupCandidate>) -> DuplicateGroup {
        DuplicateGroup {
            target: DedupTarget::SaintYear,
            key: "S1/2023".to_string(),
            members,
        }
    }

    #[test]
    fn test_highest_score_survives() {
        let g = group(vec![
            candidate("a", 10, &[("burger", Some("X")), ("sticker", None)]),
            candidate("b", 5, &[("burger", Some("X")), ("sticker", Some("s.png"))]),
            candidate("c", 1, &[("burger", None), ("sticker", Some("s.png"))]),
        ]);
        assert_eq!(g.survivor_index(), Some(1));
    }

    #[test]
    fn test_tie_goes_to_most_recent() {
        let g = group(vec![
            candidate("a", 10, &[("burger", Some("X"))]),
            candidate("b", 1, &[("burger", Some("Y"))]),
        ]);
        assert_eq!(g.survivor_index(), Some(1));
    }

    #[test]
    fn test_unique_data_detection() {
        let g = group(vec![
            candidate("a", 10, &[("burger", Some("Classic")), ("sticker", Some("s.png"))]),
            candidate("b", 1, &[("burger", Some("Classic")), ("sticker", None)]),
        ]);
        assert!(g.unique_data(1).is_empty());
        assert_eq!(g.unique_data(0), vec!["sticker=s.png".to_string()]);
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(DedupTarget::parse("milestone-by-date"), Some(DedupTarget::MilestoneByDate));
        assert_eq!(DedupTarget::parse("Event"), Some(DedupTarget::Event));
        assert_eq!(DedupTarget::parse("saint"), None);
    }
}
