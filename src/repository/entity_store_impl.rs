// ==========================================
// 汽修厂管理系统 - 实体存储 SQLite 实现
// ==========================================
// 职责: customers / vehicles / invoices / documents 表的查找与 upsert,
//       导入断点与导入日志
// 约束: 所有值参数化; 列名只来自 EntityKind 的静态声明
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::entity::{EntityLinks, EntityRecord};
use crate::domain::types::{EntityId, EntityKey, EntityKind};
use crate::repository::entity_store::{Checkpoint, CheckpointStore, EntityStore, FileLogEntry};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

// ==========================================
// SqliteEntityStore
// ==========================================
pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    /// 打开数据库并幂等建表
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(format!("{}: {}", db_path, e)))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（同样执行建表）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            init_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    /// 共享连接（配置读取等复用同一数据库）
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 表内行数
    pub fn count(&self, kind: EntityKind) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// 按 id 读取
    pub fn get_by_id(&self, kind: EntityKind, id: EntityId) -> RepositoryResult<Option<EntityRecord>> {
        let conn = self.get_conn()?;
        let mut records = query_records(&conn, kind, "id = ?1", Value::Integer(id), Some(1))?;
        Ok(records.pop())
    }

    /// 全表读取（id 升序）
    pub fn list(&self, kind: EntityKind) -> RepositoryResult<Vec<EntityRecord>> {
        let conn = self.get_conn()?;
        query_records(&conn, kind, "1 = ?1", Value::Integer(1), None)
    }
}

// ==========================================
// SQL 片段
// ==========================================

fn select_columns(kind: EntityKind) -> Vec<&'static str> {
    let mut cols = vec!["id", "natural_key", "external_id"];
    cols.extend_from_slice(kind.attribute_columns());
    if kind.links_customer() {
        cols.push("customer_id");
    }
    if kind.links_vehicle() {
        cols.push("vehicle_id");
    }
    cols.push("extensions");
    cols
}

/// 行 → (实体, 扩展列 JSON)
fn read_row(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<(EntityRecord, String)> {
    let id: i64 = row.get(0)?;
    let natural_key: String = row.get(1)?;
    let external_id: Option<String> = row.get(2)?;

    let mut idx = 3;
    let mut attributes = BTreeMap::new();
    for column in kind.attribute_columns() {
        let value: Option<String> = row.get(idx)?;
        if let Some(value) = value {
            attributes.insert(column.to_string(), value);
        }
        idx += 1;
    }

    let mut links = EntityLinks::default();
    if kind.links_customer() {
        links.customer_id = row.get(idx)?;
        idx += 1;
    }
    if kind.links_vehicle() {
        links.vehicle_id = row.get(idx)?;
        idx += 1;
    }
    let extensions: String = row.get(idx)?;

    Ok((
        EntityRecord {
            id: Some(id),
            kind,
            key: EntityKey::new(natural_key),
            external_id,
            attributes,
            links,
            extensions: BTreeMap::new(),
        },
        extensions,
    ))
}

fn query_records(
    conn: &Connection,
    kind: EntityKind,
    where_clause: &str,
    param: Value,
    limit: Option<usize>,
) -> RepositoryResult<Vec<EntityRecord>> {
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY id{}",
        select_columns(kind).join(", "),
        kind.table_name(),
        where_clause,
        limit_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([param], |row| read_row(kind, row))?;

    let mut records = Vec::new();
    for row in rows {
        let (mut record, extensions_json) = row?;
        record.extensions = serde_json::from_str(&extensions_json)?;
        records.push(record);
    }
    Ok(records)
}

fn text_or_null(value: Option<&String>) -> Value {
    value.map(|s| Value::Text(s.clone())).unwrap_or(Value::Null)
}

fn id_or_null(value: Option<EntityId>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

/// upsert 时查找已有行
fn find_existing_id(conn: &Connection, record: &EntityRecord) -> RepositoryResult<Option<EntityId>> {
    let table = record.kind.table_name();
    // 客户带外部 ID 时只按外部 ID 认领,避免并入同名的其他客户
    let found = match (&record.kind, &record.external_id) {
        (EntityKind::Customer, Some(external_id)) => conn
            .query_row(
                &format!("SELECT id FROM {} WHERE external_id = ?1 ORDER BY id LIMIT 1", table),
                params![external_id],
                |row| row.get(0),
            )
            .optional()?,
        _ => conn
            .query_row(
                &format!("SELECT id FROM {} WHERE natural_key = ?1 ORDER BY id LIMIT 1", table),
                params![record.key.as_str()],
                |row| row.get(0),
            )
            .optional()?,
    };
    Ok(found)
}

fn insert_record(conn: &Connection, record: &EntityRecord, extensions_json: String) -> RepositoryResult<EntityId> {
    let kind = record.kind;
    let mut columns = vec!["natural_key", "external_id"];
    let mut values = vec![
        Value::Text(record.key.as_str().to_string()),
        text_or_null(record.external_id.as_ref()),
    ];
    for column in kind.attribute_columns() {
        columns.push(column);
        values.push(text_or_null(record.attributes.get(*column)));
    }
    if kind.links_customer() {
        columns.push("customer_id");
        values.push(id_or_null(record.links.customer_id));
    }
    if kind.links_vehicle() {
        columns.push("vehicle_id");
        values.push(id_or_null(record.links.vehicle_id));
    }
    columns.push("extensions");
    values.push(Value::Text(extensions_json));

    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        kind.table_name(),
        columns.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, params_from_iter(values))?;
    Ok(conn.last_insert_rowid())
}

fn update_record(
    conn: &Connection,
    id: EntityId,
    record: &EntityRecord,
    extensions_json: String,
) -> RepositoryResult<()> {
    let kind = record.kind;
    let mut assignments = vec!["natural_key = ?1".to_string()];
    let mut values = vec![Value::Text(record.key.as_str().to_string())];

    // 空值不覆盖已有数据
    let mut push_coalesce = |column: &str, value: Value, values: &mut Vec<Value>| {
        values.push(value);
        assignments.push(format!("{col} = COALESCE(?{n}, {col})", col = column, n = values.len()));
    };

    push_coalesce("external_id", text_or_null(record.external_id.as_ref()), &mut values);
    for column in kind.attribute_columns() {
        push_coalesce(column, text_or_null(record.attributes.get(*column)), &mut values);
    }
    if kind.links_customer() {
        push_coalesce("customer_id", id_or_null(record.links.customer_id), &mut values);
    }
    if kind.links_vehicle() {
        push_coalesce("vehicle_id", id_or_null(record.links.vehicle_id), &mut values);
    }

    values.push(Value::Text(extensions_json));
    let ext_param = values.len();
    assignments.push(format!(
        "extensions = CASE WHEN ?{n} = '{{}}' THEN extensions ELSE ?{n} END",
        n = ext_param
    ));
    assignments.push("updated_at = datetime('now')".to_string());

    values.push(Value::Integer(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        kind.table_name(),
        assignments.join(", "),
        values.len()
    );

    let affected = conn.execute(&sql, params_from_iter(values))?;
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: kind.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

impl EntityStore for SqliteEntityStore {
    fn lookup(&self, kind: EntityKind, key: &EntityKey) -> RepositoryResult<Option<EntityRecord>> {
        let conn = self.get_conn()?;
        let mut records = query_records(
            &conn,
            kind,
            "natural_key = ?1",
            Value::Text(key.as_str().to_string()),
            Some(1),
        )?;
        Ok(records.pop())
    }

    fn lookup_all(&self, kind: EntityKind, key: &EntityKey) -> RepositoryResult<Vec<EntityRecord>> {
        let conn = self.get_conn()?;
        query_records(
            &conn,
            kind,
            "natural_key = ?1",
            Value::Text(key.as_str().to_string()),
            None,
        )
    }

    fn lookup_by_external_id(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> RepositoryResult<Option<EntityRecord>> {
        let conn = self.get_conn()?;
        let mut records = query_records(
            &conn,
            kind,
            "external_id = ?1",
            Value::Text(external_id.to_string()),
            Some(1),
        )?;
        Ok(records.pop())
    }

    fn upsert(&self, record: &EntityRecord) -> RepositoryResult<EntityId> {
        let conn = self.get_conn()?;
        let extensions_json = serde_json::to_string(&record.extensions)?;

        let existing = match record.id {
            Some(id) => Some(id),
            None => find_existing_id(&conn, record)?,
        };

        match existing {
            Some(id) => {
                update_record(&conn, id, record, extensions_json)?;
                debug!(kind = %record.kind, key = %record.key, id, "实体已更新");
                Ok(id)
            }
            None => {
                let id = insert_record(&conn, record, extensions_json)?;
                debug!(kind = %record.kind, key = %record.key, id, "实体已插入");
                Ok(id)
            }
        }
    }

    fn begin(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    fn commit(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch("COMMIT")
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    fn rollback(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        // 无活动事务时无需回滚
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK")
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    fn ping(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get::<_, i64>(0))
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(())
    }
}

impl CheckpointStore for SqliteEntityStore {
    fn load_checkpoint(&self, fingerprint: &str) -> RepositoryResult<Option<Checkpoint>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT fingerprint, file_path, entity_kind, committed_units, last_row, completed
                FROM import_checkpoint WHERE fingerprint = ?1
                "#,
                params![fingerprint],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((fingerprint, file_path, kind, committed_units, last_row, completed)) = row else {
            return Ok(None);
        };
        let entity_kind = EntityKind::parse(&kind).ok_or_else(|| RepositoryError::FieldValueError {
            field: "entity_kind".to_string(),
            message: format!("未知实体种类: {}", kind),
        })?;

        Ok(Some(Checkpoint {
            fingerprint,
            file_path,
            entity_kind,
            committed_units: committed_units.max(0) as usize,
            last_row: last_row.max(0) as usize,
            completed: completed != 0,
        }))
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_checkpoint (
                fingerprint, file_path, entity_kind, committed_units, last_row, completed, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
            ON CONFLICT(fingerprint) DO UPDATE SET
                file_path = excluded.file_path,
                entity_kind = excluded.entity_kind,
                committed_units = excluded.committed_units,
                last_row = excluded.last_row,
                completed = excluded.completed,
                updated_at = excluded.updated_at
            "#,
            params![
                checkpoint.fingerprint,
                checkpoint.file_path,
                checkpoint.entity_kind.as_str(),
                checkpoint.committed_units as i64,
                checkpoint.last_row as i64,
                checkpoint.completed as i64,
            ],
        )?;
        Ok(())
    }

    fn complete_checkpoint(&self, fingerprint: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE import_checkpoint SET completed = 1, updated_at = datetime('now') WHERE fingerprint = ?1",
            params![fingerprint],
        )?;
        Ok(())
    }

    fn record_file_log(&self, entry: &FileLogEntry) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_file_log (
                batch_id, run_id, file_path, entity_kind, fingerprint,
                total_rows, inserted, updated, unchanged, skipped, unlinked,
                elapsed_ms, report_json, imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                entry.batch_id,
                entry.run_id,
                entry.file_path,
                entry.entity_kind.as_str(),
                entry.fingerprint,
                entry.total_rows as i64,
                entry.inserted as i64,
                entry.updated as i64,
                entry.unchanged as i64,
                entry.skipped as i64,
                entry.unlinked as i64,
                entry.elapsed_ms as i64,
                entry.report_json,
                entry.imported_at,
            ],
        )?;
        Ok(())
    }
}
