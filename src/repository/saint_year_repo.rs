// ==========================================
// 圣徒档案导入系统 - 圣徒年度档案仓储
// ==========================================
// 职责: 管理 saint_year 表的 CRUD
// 自然键: (saint_id, year)，无唯一索引（重复由去重引擎清理）
// 列表字段以 JSON 数组文本存储
// ==========================================

use crate::domain::saint::SaintYear;
use crate::repository::columns::{json_column, to_json};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SAINT_YEAR_COLUMNS: &str =
    "id, saint_id, year, burger, tap_beers, can_bottle_beers, facebook_event, sticker, created_at";

fn map_saint_year_row(row: &Row) -> rusqlite::Result<SaintYear> {
    Ok(SaintYear {
        id: row.get(0)?,
        saint_id: row.get(1)?,
        year: row.get(2)?,
        burger: row.get(3)?,
        tap_beers: json_column(row, 4)?,
        can_bottle_beers: json_column(row, 5)?,
        facebook_event: row.get(6)?,
        sticker: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub struct SaintYearRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SaintYearRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn list_by_key(&self, saint_id: &str, year: i32) -> RepositoryResult<Vec<SaintYear>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM saint_year WHERE saint_id = ?1 AND year = ?2 ORDER BY created_at, id",
            SAINT_YEAR_COLUMNS
        ))?;
        let rows = stmt.query_map(params![saint_id, year], map_saint_year_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM saint_year", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ==========================================
    // 事务内函数
    // ==========================================

    /// 按自然键查找（存在重复时取最新创建的一条）
    pub fn find_by_key_tx(conn: &Connection, saint_id: &str, year: i32) -> RepositoryResult<Option<SaintYear>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM saint_year WHERE saint_id = ?1 AND year = ?2 ORDER BY created_at DESC, id DESC LIMIT 1",
                    SAINT_YEAR_COLUMNS
                ),
                params![saint_id, year],
                map_saint_year_row,
            )
            .optional()?)
    }

    pub fn find_by_id_tx(conn: &Connection, id: &str) -> RepositoryResult<Option<SaintYear>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM saint_year WHERE id = ?1", SAINT_YEAR_COLUMNS),
                params![id],
                map_saint_year_row,
            )
            .optional()?)
    }

    pub fn list_all_tx(conn: &Connection) -> RepositoryResult<Vec<SaintYear>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM saint_year ORDER BY saint_id, year, created_at, id",
            SAINT_YEAR_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_saint_year_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_tx(conn: &Connection, record: &SaintYear) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO saint_year ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                SAINT_YEAR_COLUMNS
            ),
            params![
                record.id,
                record.saint_id,
                record.year,
                record.burger,
                to_json(&record.tap_beers)?,
                to_json(&record.can_bottle_beers)?,
                record.facebook_event,
                record.sticker,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_tx(conn: &Connection, record: &SaintYear) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE saint_year
            SET burger = ?2, tap_beers = ?3, can_bottle_beers = ?4, facebook_event = ?5, sticker = ?6
            WHERE id = ?1
            "#,
            params![
                record.id,
                record.burger,
                to_json(&record.tap_beers)?,
                to_json(&record.can_bottle_beers)?,
                record.facebook_event,
                record.sticker,
            ],
        )?;
        Ok(())
    }

    pub fn delete_if_exists_tx(conn: &Connection, id: &str) -> RepositoryResult<usize> {
        Ok(conn.execute("DELETE FROM saint_year WHERE id = ?1", params![id])?)
    }
}
