// ==========================================
// 圣徒档案导入系统 - 门店仓储
// ==========================================
// 职责: 管理 location 表的 CRUD
// 红线: 不含业务逻辑，只负责数据访问
// 说明: *_tx 函数接收 &Connection，事务内外均可调用
// ==========================================

use crate::domain::saint::Location;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const LOCATION_COLUMNS: &str = "id, sheet_id, state, city, name, address, status, is_open, is_active, created_at, updated_at";

fn map_location_row(row: &Row) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get(0)?,
        sheet_id: row.get(1)?,
        state: row.get(2)?,
        city: row.get(3)?,
        name: row.get(4)?,
        address: row.get(5)?,
        status: row.get(6)?,
        is_open: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub struct LocationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LocationRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_sheet_id(&self, sheet_id: &str) -> RepositoryResult<Option<Location>> {
        let conn = self.get_conn()?;
        Self::find_by_sheet_id_tx(&conn, sheet_id)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<Location>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM location ORDER BY sheet_id",
            LOCATION_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_location_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM location", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ==========================================
    // 事务内函数
    // ==========================================

    pub fn find_by_sheet_id_tx(conn: &Connection, sheet_id: &str) -> RepositoryResult<Option<Location>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM location WHERE sheet_id = ?1", LOCATION_COLUMNS),
                params![sheet_id],
                map_location_row,
            )
            .optional()?)
    }

    pub fn find_by_id_tx(conn: &Connection, id: &str) -> RepositoryResult<Option<Location>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM location WHERE id = ?1", LOCATION_COLUMNS),
                params![id],
                map_location_row,
            )
            .optional()?)
    }

    /// 已存在的 sheet_id（用于跨批次重复检测）
    pub fn list_sheet_ids_tx(conn: &Connection) -> RepositoryResult<Vec<String>> {
        let mut stmt = conn.prepare("SELECT sheet_id FROM location")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn insert_tx(conn: &Connection, location: &Location) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO location ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                LOCATION_COLUMNS
            ),
            params![
                location.id,
                location.sheet_id,
                location.state,
                location.city,
                location.name,
                location.address,
                location.status,
                location.is_open,
                location.is_active,
                location.created_at,
                location.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_tx(conn: &Connection, location: &Location) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE location
            SET state = ?2, city = ?3, name = ?4, address = ?5, status = ?6,
                is_open = ?7, is_active = ?8, updated_at = ?9
            WHERE id = ?1
            "#,
            params![
                location.id,
                location.state,
                location.city,
                location.name,
                location.address,
                location.status,
                location.is_open,
                location.is_active,
                location.updated_at,
            ],
        )?;
        Ok(())
    }

    /// 按 id 删除（不存在时为 no-op）
    pub fn delete_if_exists_tx(conn: &Connection, id: &str) -> RepositoryResult<usize> {
        Ok(conn.execute("DELETE FROM location WHERE id = ?1", params![id])?)
    }

    /// 门店名下的子记录数量（saint + event）
    pub fn count_children_tx(conn: &Connection, id: &str) -> RepositoryResult<usize> {
        let n: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM saint WHERE location_id = ?1) + (SELECT COUNT(*) FROM event WHERE location_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}
