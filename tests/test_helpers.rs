// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时导入目录、临时数据库、CSV 样例写入、故障注入存储
// ==========================================

#![allow(dead_code)]

use garage_import::config::ImportConfig;
use garage_import::domain::{EntityKey, EntityKind, EntityRecord, ImportReport};
use garage_import::importer::{DirectoryImporter, ImportOrchestrator};
use garage_import::repository::{
    Checkpoint, CheckpointStore, EntityStore, FileLogEntry, RepositoryError, RepositoryResult,
    SqliteEntityStore,
};
use garage_import::EntityId;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// 测试环境（TempDir 需保持存活）
pub struct TestEnv {
    pub import_dir: TempDir,
    pub db_dir: TempDir,
    pub db_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let import_dir = TempDir::new().expect("创建导入目录失败");
        let db_dir = TempDir::new().expect("创建数据库目录失败");
        let db_path = db_dir.path().join("garage.db");
        Self {
            import_dir,
            db_dir,
            db_path,
        }
    }

    pub fn root(&self) -> &Path {
        self.import_dir.path()
    }

    /// 写入 UTF-8 CSV 文件
    pub fn write_csv(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        std::fs::write(&path, bytes).expect("写入测试文件失败");
        path
    }

    pub fn open_store(&self) -> Arc<SqliteEntityStore> {
        Arc::new(SqliteEntityStore::new(self.db_path.to_str().unwrap()).expect("打开测试数据库失败"))
    }

    pub fn config(&self) -> ImportConfig {
        ImportConfig::new(self.root(), &self.db_path)
    }
}

/// 使用默认解析器运行一次导入
pub async fn run_import<S>(config: ImportConfig, store: Arc<S>) -> ImportReport
where
    S: EntityStore + CheckpointStore + 'static,
{
    ImportOrchestrator::new(config, store)
        .expect("创建编排器失败")
        .run_import()
        .await
        .expect("导入不应出现致命错误")
}

/// 单张表的行数
pub fn count_rows(store: &SqliteEntityStore, kind: EntityKind) -> usize {
    store.count(kind).expect("统计行数失败")
}

/// 查询车辆
pub fn vehicle(store: &SqliteEntityStore, registration: &str) -> Option<EntityRecord> {
    store
        .lookup(EntityKind::Vehicle, &EntityKey::new(registration))
        .expect("查询车辆失败")
}

/// 按姓名查询客户（全部同名记录）
pub fn customers_named(store: &SqliteEntityStore, name: &str) -> Vec<EntityRecord> {
    store
        .lookup_all(EntityKind::Customer, &EntityKey::for_customer_name(name))
        .expect("查询客户失败")
}

/// 生成 N 行发票 CSV
pub fn invoice_csv(rows: usize, corrupt_row: Option<usize>) -> String {
    let mut csv = String::from("Invoice No,Date,Total,VAT\n");
    for i in 1..=rows {
        let total = if Some(i) == corrupt_row {
            "£12..0".to_string()
        } else {
            format!("£{}.50", i)
        };
        csv.push_str(&format!("INV{:04},15/03/2024,{},{}.10\n", i, total, i));
    }
    csv
}

// ==========================================
// FaultyStore - 故障注入存储
// ==========================================
// 包装 SqliteEntityStore:
// - fail_key: 该自然键的 upsert 总是失败
// - cancel_after: 第 N 次 upsert 后置位取消标志
pub struct FaultyStore {
    pub inner: Arc<SqliteEntityStore>,
    pub fail_key: Option<String>,
    pub cancel_after: Option<(usize, Arc<AtomicBool>)>,
    pub upserts: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<SqliteEntityStore>) -> Self {
        Self {
            inner,
            fail_key: None,
            cancel_after: None,
            upserts: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_key = Some(key.to_string());
        self
    }

    pub fn cancelling_after(mut self, upserts: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((upserts, flag));
        self
    }
}

impl EntityStore for FaultyStore {
    fn lookup(&self, kind: EntityKind, key: &EntityKey) -> RepositoryResult<Option<EntityRecord>> {
        self.inner.lookup(kind, key)
    }

    fn lookup_all(&self, kind: EntityKind, key: &EntityKey) -> RepositoryResult<Vec<EntityRecord>> {
        self.inner.lookup_all(kind, key)
    }

    fn lookup_by_external_id(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> RepositoryResult<Option<EntityRecord>> {
        self.inner.lookup_by_external_id(kind, external_id)
    }

    fn upsert(&self, record: &EntityRecord) -> RepositoryResult<EntityId> {
        if self.fail_key.as_deref() == Some(record.key.as_str()) {
            return Err(RepositoryError::FieldValueError {
                field: "natural_key".to_string(),
                message: format!("注入故障: {}", record.key),
            });
        }

        let id = self.inner.upsert(record)?;
        let done = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, flag)) = &self.cancel_after {
            if done >= *limit {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(id)
    }

    fn begin(&self) -> RepositoryResult<()> {
        self.inner.begin()
    }

    fn commit(&self) -> RepositoryResult<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> RepositoryResult<()> {
        self.inner.rollback()
    }

    fn ping(&self) -> RepositoryResult<()> {
        self.inner.ping()
    }
}

impl CheckpointStore for FaultyStore {
    fn load_checkpoint(&self, fingerprint: &str) -> RepositoryResult<Option<Checkpoint>> {
        self.inner.load_checkpoint(fingerprint)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> RepositoryResult<()> {
        self.inner.save_checkpoint(checkpoint)
    }

    fn complete_checkpoint(&self, fingerprint: &str) -> RepositoryResult<()> {
        self.inner.complete_checkpoint(fingerprint)
    }

    fn record_file_log(&self, entry: &FileLogEntry) -> RepositoryResult<()> {
        self.inner.record_file_log(entry)
    }
}
