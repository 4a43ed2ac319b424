// ==========================================
// 汽修厂管理系统 - 导入运行配置
// ==========================================
// 职责: 一次导入所需的全部参数（显式传入编排器,无全局状态）
// 优先级: 命令行 > config_kv > 内置默认值
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::domain::types::EntityKind;
use crate::importer::encoding_sniffer::DEFAULT_SAMPLE_BYTES;
use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 10;

/// 默认数据库路径: <数据目录>/garage-import/garage.db
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("garage-import")
        .join("garage.db")
}

// ==========================================
// ImportConfig
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub root_dir: PathBuf,
    pub db_path: PathBuf,
    pub batch_size: usize,
    pub dry_run: bool,
    pub workers: usize,
    pub heartbeat_secs: u64,
    pub sample_bytes: usize,
    pub extra_synonyms: HashMap<EntityKind, HashMap<String, String>>,
}

impl ImportConfig {
    pub fn new(root_dir: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            db_path: db_path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            workers: DEFAULT_WORKERS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            sample_bytes: DEFAULT_SAMPLE_BYTES,
            extra_synonyms: HashMap::new(),
        }
    }

    /// 合并 config_kv 覆写与命令行覆写
    ///
    /// # 参数
    /// - reader: 配置读取器
    /// - overrides: 命令行显式给出的值
    ///
    /// # 返回
    /// - Err(ImportError::Config): 配置值非法（致命）
    pub async fn resolve<R>(mut self, reader: &R, overrides: &ConfigOverrides) -> ImportResult<Self>
    where
        R: ImportConfigReader + ?Sized,
    {
        if let Some(v) = reader.get_batch_size().await? {
            self.batch_size = v;
        }
        if let Some(v) = reader.get_workers().await? {
            self.workers = v;
        }
        if let Some(v) = reader.get_heartbeat_secs().await? {
            self.heartbeat_secs = v;
        }
        if let Some(v) = reader.get_sniff_sample_bytes().await? {
            self.sample_bytes = v;
        }
        for kind in EntityKind::IMPORT_ORDER {
            let synonyms = reader.get_extra_synonyms(kind).await?;
            if !synonyms.is_empty() {
                self.extra_synonyms.insert(kind, synonyms);
            }
        }

        if let Some(v) = overrides.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = overrides.workers {
            self.workers = v;
        }
        self.dry_run |= overrides.dry_run;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ImportResult<()> {
        let positive = [
            ("import.batch_size", self.batch_size),
            ("import.workers", self.workers),
            ("import.sniff_sample_bytes", self.sample_bytes),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ImportError::Config {
                    key: key.to_string(),
                    value: value.to_string(),
                    message: "必须大于 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// 命令行覆写项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub dry_run: bool,
}
