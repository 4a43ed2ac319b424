// ==========================================
// 汽修厂管理系统 - 配置管理器
// ==========================================
// 职责: 导入配置的加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::types::EntityKind;
use crate::importer::error::{ImportError, ImportResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| lock_error(&e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e.to_string()))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 配置值
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e.to_string()))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析数值配置
    fn get_parsed<T: FromStr>(&self, key: &str) -> ImportResult<Option<T>> {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ImportError::Config {
                key: key.to_string(),
                value: raw.clone(),
                message: "不是合法的非负整数".to_string(),
            })
    }
}

fn lock_error(message: &str) -> ImportError {
    ImportError::Other(anyhow::anyhow!("锁获取失败: {}", message))
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_batch_size(&self) -> ImportResult<Option<usize>> {
        self.get_parsed(config_keys::BATCH_SIZE)
    }

    async fn get_workers(&self) -> ImportResult<Option<usize>> {
        self.get_parsed(config_keys::WORKERS)
    }

    async fn get_heartbeat_secs(&self) -> ImportResult<Option<u64>> {
        self.get_parsed(config_keys::HEARTBEAT_SECS)
    }

    async fn get_sniff_sample_bytes(&self) -> ImportResult<Option<usize>> {
        self.get_parsed(config_keys::SNIFF_SAMPLE_BYTES)
    }

    async fn get_extra_synonyms(&self, kind: EntityKind) -> ImportResult<HashMap<String, String>> {
        let key = config_keys::synonyms_key(kind);
        let Some(raw) = self.get_global_config_value(&key)? else {
            return Ok(HashMap::new());
        };

        serde_json::from_str(&raw).map_err(|e| ImportError::Config {
            key,
            value: raw.clone(),
            message: format!("需为 JSON 对象 {{\"表头\": \"字段\"}}: {}", e),
        })
    }
}

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    use crate::domain::types::EntityKind;

    pub const BATCH_SIZE: &str = "import.batch_size";
    pub const WORKERS: &str = "import.workers";
    pub const HEARTBEAT_SECS: &str = "import.heartbeat_secs";
    pub const SNIFF_SAMPLE_BYTES: &str = "import.sniff_sample_bytes";

    /// 追加同义词: import.synonyms.<kind>
    pub fn synonyms_key(kind: EntityKind) -> String {
        format!("import.synonyms.{}", kind.as_str())
    }
}
