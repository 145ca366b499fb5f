// ==========================================
// 圣徒档案导入系统 - 圣徒仓储
// ==========================================
// 职责: 管理 saint 表的 CRUD
// 自然键: (location_id, saint_number)，唯一索引
// ==========================================

use crate::domain::saint::Saint;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SAINT_COLUMNS: &str = "id, location_id, saint_number, real_name, saint_name, saint_date, saint_year, created_at, updated_at";

fn map_saint_row(row: &Row) -> rusqlite::Result<Saint> {
    Ok(Saint {
        id: row.get(0)?,
        location_id: row.get(1)?,
        saint_number: row.get(2)?,
        real_name: row.get(3)?,
        saint_name: row.get(4)?,
        saint_date: row.get(5)?,
        saint_year: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub struct SaintRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SaintRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn list_by_location(&self, location_id: &str) -> RepositoryResult<Vec<Saint>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM saint WHERE location_id = ?1 ORDER BY saint_number",
            SAINT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![location_id], map_saint_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM saint", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ==========================================
    // 事务内函数
    // ==========================================

    pub fn find_by_number_tx(
        conn: &Connection,
        location_id: &str,
        saint_number: &str,
    ) -> RepositoryResult<Option<Saint>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM saint WHERE location_id = ?1 AND saint_number = ?2",
                    SAINT_COLUMNS
                ),
                params![location_id, saint_number],
                map_saint_row,
            )
            .optional()?)
    }

    pub fn find_by_id_tx(conn: &Connection, id: &str) -> RepositoryResult<Option<Saint>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM saint WHERE id = ?1", SAINT_COLUMNS),
                params![id],
                map_saint_row,
            )
            .optional()?)
    }

    pub fn insert_tx(conn: &Connection, saint: &Saint) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO saint ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                SAINT_COLUMNS
            ),
            params![
                saint.id,
                saint.location_id,
                saint.saint_number,
                saint.real_name,
                saint.saint_name,
                saint.saint_date,
                saint.saint_year,
                saint.created_at,
                saint.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_tx(conn: &Connection, saint: &Saint) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE saint
            SET real_name = ?2, saint_name = ?3, saint_date = ?4, saint_year = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                saint.id,
                saint.real_name,
                saint.saint_name,
                saint.saint_date,
                saint.saint_year,
                saint.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_if_exists_tx(conn: &Connection, id: &str) -> RepositoryResult<usize> {
        Ok(conn.execute("DELETE FROM saint WHERE id = ?1", params![id])?)
    }

    /// 圣徒名下的子记录数量（saint_year + milestone + event）
    pub fn count_children_tx(conn: &Connection, id: &str) -> RepositoryResult<usize> {
        let n: i64 = conn.query_row(
            r#"
            SELECT
              (SELECT COUNT(*) FROM saint_year WHERE saint_id = ?1)
            + (SELECT COUNT(*) FROM milestone WHERE saint_id = ?1)
            + (SELECT COUNT(*) FROM event WHERE saint_id = ?1)
            "#,
            params![id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}
