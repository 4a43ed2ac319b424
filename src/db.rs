// ==========================================
// 汽修厂管理系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 幂等建表: 实体表 + 断点表 + 导入日志 + 配置表
// ==========================================

use crate::domain::types::EntityKind;
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

/// 实体表 DDL（列集合由 EntityKind::attribute_columns 决定）
fn entity_table_ddl(kind: EntityKind) -> String {
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "natural_key TEXT NOT NULL".to_string(),
        "external_id TEXT".to_string(),
    ];
    columns.extend(
        kind.attribute_columns()
            .iter()
            .map(|c| format!("{} TEXT", c)),
    );
    if kind.links_customer() {
        columns.push("customer_id INTEGER REFERENCES customers(id)".to_string());
    }
    if kind.links_vehicle() {
        columns.push("vehicle_id INTEGER REFERENCES vehicles(id)".to_string());
    }
    columns.push("extensions TEXT NOT NULL DEFAULT '{}'".to_string());
    columns.push("created_at TEXT NOT NULL DEFAULT (datetime('now'))".to_string());
    columns.push("updated_at TEXT NOT NULL DEFAULT (datetime('now'))".to_string());

    // 客户姓名不是可靠的唯一键,只建普通索引
    let key_index = if kind == EntityKind::Customer {
        "INDEX"
    } else {
        "UNIQUE INDEX"
    };
    let table = kind.table_name();

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {cols}\n);\n\
         CREATE {key_index} IF NOT EXISTS idx_{table}_natural_key ON {table}(natural_key);\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_external_id ON {table}(external_id);\n",
        table = table,
        cols = columns.join(",\n    "),
        key_index = key_index,
    )
}

/// 幂等建表
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    let mut ddl = String::new();
    for kind in EntityKind::IMPORT_ORDER {
        ddl.push_str(&entity_table_ddl(kind));
    }

    ddl.push_str(
        r#"
        CREATE TABLE IF NOT EXISTS import_checkpoint (
            fingerprint TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            committed_units INTEGER NOT NULL DEFAULT 0,
            last_row INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS import_file_log (
            batch_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            fingerprint TEXT,
            total_rows INTEGER NOT NULL,
            inserted INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            unchanged INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            unlinked INTEGER NOT NULL,
            elapsed_ms INTEGER NOT NULL,
            report_json TEXT NOT NULL,
            imported_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
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
    );

    conn.execute_batch(&ddl)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}
