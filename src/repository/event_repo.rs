// ==========================================
// 圣徒档案导入系统 - 日历事件仓储
// ==========================================
// 职责: 管理 event 表的 CRUD
// 自然键: (date, saint_name, event_type)，无唯一索引
// ==========================================

use crate::domain::saint::Event;
use crate::domain::types::EventType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const EVENT_COLUMNS: &str = "id, saint_id, location_id, date, saint_name, event_type, title, description, milestone_count, sticker, created_at";

fn map_event_row(row: &Row) -> rusqlite::Result<Event> {
    let event_type: String = row.get(5)?;
    Ok(Event {
        id: row.get(0)?,
        saint_id: row.get(1)?,
        location_id: row.get(2)?,
        date: row.get(3)?,
        saint_name: row.get(4)?,
        event_type: EventType::parse(&event_type),
        title: row.get(6)?,
        description: row.get(7)?,
        milestone_count: row.get(8)?,
        sticker: row.get(9)?,
        created_at: row.get(10)?,
    })
}

pub struct EventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EventRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn list_by_saint(&self, saint_id: &str) -> RepositoryResult<Vec<Event>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM event WHERE saint_id = ?1 ORDER BY date, event_type",
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![saint_id], map_event_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM event", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ==========================================
    // 事务内函数
    // ==========================================

    /// 按自然键查找（存在重复时取最新创建的一条）
    pub fn find_by_key_tx(
        conn: &Connection,
        date: NaiveDate,
        saint_name: &str,
        event_type: EventType,
    ) -> RepositoryResult<Option<Event>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM event WHERE date = ?1 AND saint_name = ?2 AND event_type = ?3 ORDER BY created_at DESC, id DESC LIMIT 1",
                    EVENT_COLUMNS
                ),
                params![date, saint_name, event_type.as_str()],
                map_event_row,
            )
            .optional()?)
    }

    pub fn find_by_id_tx(conn: &Connection, id: &str) -> RepositoryResult<Option<Event>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM event WHERE id = ?1", EVENT_COLUMNS),
                params![id],
                map_event_row,
            )
            .optional()?)
    }

    pub fn list_all_tx(conn: &Connection) -> RepositoryResult<Vec<Event>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM event ORDER BY date, saint_name, event_type, created_at, id",
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_event_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_tx(conn: &Connection, event: &Event) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO event ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                EVENT_COLUMNS
            ),
            params![
                event.id,
                event.saint_id,
                event.location_id,
                event.date,
                event.saint_name,
                event.event_type.as_str(),
                event.title,
                event.description,
                event.milestone_count,
                event.sticker,
                event.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_tx(conn: &Connection, event: &Event) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE event
            SET saint_id = ?2, location_id = ?3, title = ?4, description = ?5,
                milestone_count = ?6, sticker = ?7
            WHERE id = ?1
            "#,
            params![
                event.id,
                event.saint_id,
                event.location_id,
                event.title,
                event.description,
                event.milestone_count,
                event.sticker,
            ],
        )?;
        Ok(())
    }

    pub fn delete_if_exists_tx(conn: &Connection, id: &str) -> RepositoryResult<usize> {
        Ok(conn.execute("DELETE FROM event WHERE id = ?1", params![id])?)
    }
}
