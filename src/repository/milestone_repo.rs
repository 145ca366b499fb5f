// ==========================================
// 圣徒档案导入系统 - 里程碑仓储
// ==========================================
// 职责: 管理 milestone 表的 CRUD
// 自然键: (saint_id, count) 与 (saint_id, date)，均无唯一索引
// ==========================================

use crate::domain::saint::Milestone;
use chrono::NaiveDate;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const MILESTONE_COLUMNS: &str = "id, saint_id, count, date, sticker, beer, created_at";

fn map_milestone_row(row: &Row) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        saint_id: row.get(1)?,
        count: row.get(2)?,
        date: row.get(3)?,
        sticker: row.get(4)?,
        beer: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub struct MilestoneRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MilestoneRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM milestone", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ==========================================
    // 事务内函数
    // ==========================================

    /// 按 (saint_id, count) 查找（存在重复时取最新创建的一条）
    pub fn find_by_count_tx(conn: &Connection, saint_id: &str, count: i32) -> RepositoryResult<Option<Milestone>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM milestone WHERE saint_id = ?1 AND count = ?2 ORDER BY created_at DESC, id DESC LIMIT 1",
                    MILESTONE_COLUMNS
                ),
                params![saint_id, count],
                map_milestone_row,
            )
            .optional()?)
    }

    /// 按 (saint_id, date) 查找（存在重复时取最新创建的一条）
    pub fn find_by_date_tx(conn: &Connection, saint_id: &str, date: NaiveDate) -> RepositoryResult<Option<Milestone>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM milestone WHERE saint_id = ?1 AND date = ?2 ORDER BY created_at DESC, id DESC LIMIT 1",
                    MILESTONE_COLUMNS
                ),
                params![saint_id, date],
                map_milestone_row,
            )
            .optional()?)
    }

    pub fn find_by_id_tx(conn: &Connection, id: &str) -> RepositoryResult<Option<Milestone>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM milestone WHERE id = ?1", MILESTONE_COLUMNS),
                params![id],
                map_milestone_row,
            )
            .optional()?)
    }

    pub fn list_all_tx(conn: &Connection) -> RepositoryResult<Vec<Milestone>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM milestone ORDER BY saint_id, count, created_at, id",
            MILESTONE_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_milestone_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_tx(conn: &Connection, record: &Milestone) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO milestone ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                MILESTONE_COLUMNS
            ),
            params![
                record.id,
                record.saint_id,
                record.count,
                record.date,
                record.sticker,
                record.beer,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_tx(conn: &Connection, record: &Milestone) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE milestone SET date = ?2, sticker = ?3, beer = ?4 WHERE id = ?1",
            params![record.id, record.date, record.sticker, record.beer],
        )?;
        Ok(())
    }

    pub fn delete_if_exists_tx(conn: &Connection, id: &str) -> RepositoryResult<usize> {
        Ok(conn.execute("DELETE FROM milestone WHERE id = ?1", params![id])?)
    }
}
