// ==========================================
// 圣徒档案导入系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 统一建表入口，所有表使用 CREATE TABLE IF NOT EXISTS
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存数据库（测试 / 试运行）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 初始化全部数据表
///
/// # 说明
/// - 档案表: location / saint / saint_year / milestone / event
/// - saint_year / milestone / event 的自然键不加唯一索引，重复由去重引擎清理
/// - 工作流表: import_workflow / import_phase / import_workflow_record / import_rollback
/// - 队列表: import_job
/// - 配置表: config_kv
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS location (
            id TEXT PRIMARY KEY,
            sheet_id TEXT NOT NULL UNIQUE,
            state TEXT NOT NULL,
            city TEXT NOT NULL,
            name TEXT,
            address TEXT NOT NULL,
            status TEXT NOT NULL,
            is_open INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS saint (
            id TEXT PRIMARY KEY,
            location_id TEXT NOT NULL REFERENCES location(id),
            saint_number TEXT NOT NULL,
            real_name TEXT NOT NULL,
            saint_name TEXT NOT NULL,
            saint_date TEXT NOT NULL,
            saint_year INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (location_id, saint_number)
        );

        CREATE TABLE IF NOT EXISTS saint_year (
            id TEXT PRIMARY KEY,
            saint_id TEXT NOT NULL REFERENCES saint(id),
            year INTEGER NOT NULL,
            burger TEXT,
            tap_beers TEXT NOT NULL DEFAULT '[]',
            can_bottle_beers TEXT NOT NULL DEFAULT '[]',
            facebook_event TEXT,
            sticker TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_saint_year_key ON saint_year(saint_id, year);

        CREATE TABLE IF NOT EXISTS milestone (
            id TEXT PRIMARY KEY,
            saint_id TEXT NOT NULL REFERENCES saint(id),
            count INTEGER NOT NULL,
            date TEXT NOT NULL,
            sticker TEXT,
            beer TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_milestone_count ON milestone(saint_id, count);
        CREATE INDEX IF NOT EXISTS idx_milestone_date ON milestone(saint_id, date);

        CREATE TABLE IF NOT EXISTS event (
            id TEXT PRIMARY KEY,
            saint_id TEXT NOT NULL REFERENCES saint(id),
            location_id TEXT NOT NULL REFERENCES location(id),
            date TEXT NOT NULL,
            saint_name TEXT NOT NULL,
            event_type TEXT NOT NULL,
            title TEXT,
            description TEXT,
            milestone_count INTEGER,
            sticker TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_event_key ON event(date, saint_name, event_type);

        CREATE TABLE IF NOT EXISTS import_workflow (
            workflow_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            current_phase TEXT NOT NULL,
            conflict_policy TEXT NOT NULL,
            snapshot_json TEXT NOT NULL,
            error_summary TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS import_phase (
            phase_id TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL REFERENCES import_workflow(workflow_id),
            phase TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            record_status TEXT NOT NULL,
            result_json TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            decided_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_import_phase_wf ON import_phase(workflow_id, phase);

        CREATE TABLE IF NOT EXISTS import_workflow_record (
            workflow_id TEXT NOT NULL REFERENCES import_workflow(workflow_id),
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (workflow_id, entity_kind, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_wf_record_entity ON import_workflow_record(entity_kind, entity_id);

        CREATE TABLE IF NOT EXISTS import_rollback (
            rollback_id TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL REFERENCES import_workflow(workflow_id),
            status TEXT NOT NULL,
            steps_json TEXT NOT NULL,
            warnings_json TEXT NOT NULL DEFAULT '[]',
            error_message TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS import_job (
            job_id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'PENDING',
            progress REAL NOT NULL DEFAULT 0,
            result_json TEXT,
            error_message TEXT,
            retry_of TEXT,
            lease_owner TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            started_at TEXT,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_import_job_state ON import_job(state, created_at);

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_in_memory().unwrap();
        let err = conn.execute(
            "INSERT INTO saint (id, location_id, saint_number, real_name, saint_name, saint_date, saint_year, created_at, updated_at)
             VALUES ('s1', 'missing', '1', 'A', 'B', '2020-01-01', 2020, 'x', 'x')",
            [],
        );
        assert!(err.is_err());
    }
}
