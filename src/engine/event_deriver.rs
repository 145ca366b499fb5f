// ==========================================
// 圣徒档案导入系统 - 日历事件派生
// ==========================================
// 规则:
// - 每条 SaintYear 派生一条 saint_day 事件（该年份的圣徒日；2/29 在非闰年取 2/28）
// - 每条 Milestone 派生一条 milestone 事件（达成日期）
// ==========================================

use crate::domain::saint::{Event, Milestone, Saint, SaintYear};
use crate::domain::types::EventType;
use chrono::{Datelike, NaiveDate, Utc};
use uuid::Uuid;

/// 圣徒日在指定年份的日期
pub fn saint_day_in_year(feast: NaiveDate, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, feast.month(), feast.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, feast.month(), 28))
}

pub fn derive_saint_day_event(saint: &Saint, saint_year: &SaintYear) -> Option<Event> {
    let date = saint_day_in_year(saint.saint_date, saint_year.year)?;
    Some(Event {
        id: Uuid::new_v4().to_string(),
        saint_id: saint.id.clone(),
        location_id: saint.location_id.clone(),
        date,
        saint_name: saint.saint_name.clone(),
        event_type: EventType::SaintDay,
        title: Some(format!("{} Day {}", saint.saint_name, saint_year.year)),
        description: saint_year.burger.clone(),
        milestone_count: None,
        sticker: saint_year.sticker.clone(),
        created_at: Utc::now(),
    })
}

pub fn derive_milestone_event(saint: &Saint, milestone: &Milestone) -> Event {
    Event {
        id: Uuid::new_v4().to_string(),
        saint_id: saint.id.clone(),
        location_id: saint.location_id.clone(),
        date: milestone.date,
        saint_name: saint.saint_name.clone(),
        event_type: EventType::Milestone,
        title: Some(format!("{} - {} beers", saint.saint_name, milestone.count)),
        description: milestone.beer.clone(),
        milestone_count: Some(milestone.count),
        sticker: milestone.sticker.clone(),
        created_at: Utc::now(),
    }
}
