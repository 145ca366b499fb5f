// ==========================================
// 圣徒档案导入系统 - 档案领域模型
// ==========================================
// 实体: Location → Saint → SaintYear / Milestone / Event
// 约束: 所有子记录必须引用已存在的 Saint，Saint 必须引用已存在的 Location
// 日期: 统一使用 NaiveDate，落库为 ISO 文本 (YYYY-MM-DD)
// ==========================================

use crate::domain::types::EventType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Location - 门店
// ==========================================
// 自然键: sheet_id（外部表格标识）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub sheet_id: String,         // 外部表格标识（自然键）
    pub state: String,            // 州
    pub city: String,             // 城市
    pub name: Option<String>,     // 展示名称
    pub address: String,          // 地址
    pub status: String,           // 来源状态页签（如 open / closed）
    pub is_open: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// Saint - 圣徒（被跟踪的会员）
// ==========================================
// 自然键: (location_id, saint_number)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saint {
    pub id: String,
    pub location_id: String,
    pub saint_number: String,   // 会员编号
    pub real_name: String,      // 真实姓名
    pub saint_name: String,     // 圣徒名（展示名）
    pub saint_date: NaiveDate,  // 圣徒日
    pub saint_year: i32,        // 封圣年份
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// SaintYear - 圣徒年度档案
// ==========================================
// 自然键: (saint_id, year)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaintYear {
    pub id: String,
    pub saint_id: String,
    pub year: i32,
    pub burger: Option<String>,
    pub tap_beers: Vec<String>,
    pub can_bottle_beers: Vec<String>,
    pub facebook_event: Option<String>,
    pub sticker: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// Milestone - 里程碑
// ==========================================
// 自然键: (saint_id, count) 与 (saint_id, date) 分别查重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub saint_id: String,
    pub count: i32,          // 啤酒数量阈值
    pub date: NaiveDate,     // 达成日期
    pub sticker: Option<String>,
    pub beer: Option<String>, // 达成时的啤酒
    pub created_at: DateTime<Utc>,
}

// ==========================================
// Event - 派生日历事件
// ==========================================
// 自然键: (date, saint_name, event_type)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub saint_id: String,
    pub location_id: String,
    pub date: NaiveDate,
    pub saint_name: String,
    pub event_type: EventType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub milestone_count: Option<i32>,
    pub sticker: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// 导入中间结构体（已校验的页签行）
// ==========================================
// 用途: 字段映射器输出，进入管道前已完成类型转换
// 生命周期: 仅在导入流程内（随工作流快照可重复生成）

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRow {
    pub sheet_id: String,
    pub state: String,
    pub city: String,
    pub name: Option<String>,
    pub address: String,
    pub status: String,
    pub is_open: Option<bool>,
    pub is_active: Option<bool>,
    pub row_number: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaintRow {
    pub saint_number: String,
    pub real_name: String,
    pub saint_name: String,
    pub saint_date: NaiveDate,
    pub saint_year: i32,
    pub row_number: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
    pub saint_number: String,
    pub year: i32,
    pub burger: Option<String>,
    pub tap_beers: Vec<String>,
    pub can_bottle_beers: Vec<String>,
    pub facebook_event: Option<String>,
    pub sticker: Option<String>,
    pub row_number: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRow {
    pub saint_number: String,
    pub count: i32,
    pub date: NaiveDate,
    pub sticker: Option<String>,
    pub beer: Option<String>,
    pub row_number: usize,
}

/// 按页签类型区分的已校验记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tab", rename_all = "snake_case")]
pub enum TabRecord {
    Location(LocationRow),
    Saint(SaintRow),
    Historical(HistoricalRow),
    Milestone(MilestoneRow),
}

impl TabRecord {
    pub fn row_number(&self) -> usize {
        match self {
            TabRecord::Location(r) => r.row_number,
            TabRecord::Saint(r) => r.row_number,
            TabRecord::Historical(r) => r.row_number,
            TabRecord::Milestone(r) => r.row_number,
        }
    }
}

// ==========================================
// MergeFields - 冲突策略下的字段合并
// ==========================================
// 约定: id / created_at / 自然键字段不参与合并
// 返回值: 目标记录是否发生变化
pub trait MergeFields {
    /// 仅填充目标记录中为空的字段（merge-null-coalesce）
    fn merge_missing(&mut self, incoming: &Self) -> bool;

    /// 用新记录覆盖全部业务字段（overwrite）
    fn replace_fields(&mut self, incoming: &Self) -> bool;
}

fn fill<T: Clone>(target: &mut Option<T>, source: &Option<T>) -> bool {
    if target.is_none() && source.is_some() {
        *target = source.clone();
        return true;
    }
    false
}

fn fill_list(target: &mut Vec<String>, source: &[String]) -> bool {
    if target.is_empty() && !source.is_empty() {
        *target = source.to_vec();
        return true;
    }
    false
}

fn replace<T: Clone + PartialEq>(target: &mut T, source: &T) -> bool {
    if target != source {
        *target = source.clone();
        return true;
    }
    false
}

impl MergeFields for Location {
    fn merge_missing(&mut self, incoming: &Self) -> bool {
        fill(&mut self.name, &incoming.name)
    }

    fn replace_fields(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= replace(&mut self.state, &incoming.state);
        changed |= replace(&mut self.city, &incoming.city);
        changed |= replace(&mut self.name, &incoming.name);
        changed |= replace(&mut self.address, &incoming.address);
        changed |= replace(&mut self.status, &incoming.status);
        changed |= replace(&mut self.is_open, &incoming.is_open);
        changed |= replace(&mut self.is_active, &incoming.is_active);
        changed
    }
}

impl MergeFields for Saint {
    fn merge_missing(&mut self, _incoming: &Self) -> bool {
        // Saint 的业务字段均为必填，不存在可填充的空值
        false
    }

    fn replace_fields(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= replace(&mut self.real_name, &incoming.real_name);
        changed |= replace(&mut self.saint_name, &incoming.saint_name);
        changed |= replace(&mut self.saint_date, &incoming.saint_date);
        changed |= replace(&mut self.saint_year, &incoming.saint_year);
        changed
    }
}

impl MergeFields for SaintYear {
    fn merge_missing(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= fill(&mut self.burger, &incoming.burger);
        changed |= fill_list(&mut self.tap_beers, &incoming.tap_beers);
        changed |= fill_list(&mut self.can_bottle_beers, &incoming.can_bottle_beers);
        changed |= fill(&mut self.facebook_event, &incoming.facebook_event);
        changed |= fill(&mut self.sticker, &incoming.sticker);
        changed
    }

    fn replace_fields(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= replace(&mut self.burger, &incoming.burger);
        changed |= replace(&mut self.tap_beers, &incoming.tap_beers);
        changed |= replace(&mut self.can_bottle_beers, &incoming.can_bottle_beers);
        changed |= replace(&mut self.facebook_event, &incoming.facebook_event);
        changed |= replace(&mut self.sticker, &incoming.sticker);
        changed
    }
}

impl MergeFields for Milestone {
    fn merge_missing(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= fill(&mut self.sticker, &incoming.sticker);
        changed |= fill(&mut self.beer, &incoming.beer);
        changed
    }

    fn replace_fields(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= replace(&mut self.date, &incoming.date);
        changed |= replace(&mut self.sticker, &incoming.sticker);
        changed |= replace(&mut self.beer, &incoming.beer);
        changed
    }
}

impl MergeFields for Event {
    fn merge_missing(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= fill(&mut self.title, &incoming.title);
        changed |= fill(&mut self.description, &incoming.description);
        changed |= fill(&mut self.milestone_count, &incoming.milestone_count);
        changed |= fill(&mut self.sticker, &incoming.sticker);
        changed
    }

    fn replace_fields(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        changed |= replace(&mut self.saint_id, &incoming.saint_id);
        changed |= replace(&mut self.location_id, &incoming.location_id);
        changed |= replace(&mut self.title, &incoming.title);
        changed |= replace(&mut self.description, &incoming.description);
        changed |= replace(&mut self.milestone_count, &incoming.milestone_count);
        changed |= replace(&mut self.sticker, &incoming.sticker);
        changed
    }
}
