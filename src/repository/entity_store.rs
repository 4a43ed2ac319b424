// ==========================================
// 汽修厂管理系统 - 实体存储 Repository Trait
// ==========================================
// 职责: 定义导入所消费的存储契约（查找 / upsert / 事务边界 / 断点）
// 红线: Repository 不含业务规则,只做数据读写
// ==========================================

use crate::domain::entity::EntityRecord;
use crate::domain::types::{EntityId, EntityKey, EntityKind};
use crate::repository::error::RepositoryResult;
use serde::{Deserialize, Serialize};

// ==========================================
// EntityStore Trait
// ==========================================
// 实现者: SqliteEntityStore
pub trait EntityStore: Send + Sync {
    /// 按自然键查找（多条时取 id 最小者）
    fn lookup(&self, kind: EntityKind, key: &EntityKey) -> RepositoryResult<Option<EntityRecord>>;

    /// 按自然键查找全部（id 升序）
    fn lookup_all(&self, kind: EntityKind, key: &EntityKey) -> RepositoryResult<Vec<EntityRecord>>;

    /// 按导出系统的外部 ID 查找
    fn lookup_by_external_id(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> RepositoryResult<Option<EntityRecord>>;

    /// 写入实体
    ///
    /// # 说明
    /// - id 已知: 按 id 更新
    /// - id 未知: 按键查找已有行后更新,否则插入（重复执行不产生重复行）
    /// - 空属性不覆盖已有值
    ///
    /// # 返回
    /// - Ok(EntityId): 实体 ID
    fn upsert(&self, record: &EntityRecord) -> RepositoryResult<EntityId>;

    // ===== 事务边界 =====
    fn begin(&self) -> RepositoryResult<()>;
    fn commit(&self) -> RepositoryResult<()>;
    fn rollback(&self) -> RepositoryResult<()>;

    /// 连通性检查（启动时调用,失败视为致命）
    fn ping(&self) -> RepositoryResult<()>;
}

// ==========================================
// Checkpoint - 文件导入断点
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub fingerprint: String,      // 文件内容 SHA-256
    pub file_path: String,
    pub entity_kind: EntityKind,
    pub committed_units: usize,   // 已提交的写入单元数
    pub last_row: usize,          // 已提交的最后源行号
    pub completed: bool,
}

// ==========================================
// FileLogEntry - 单文件导入日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogEntry {
    pub batch_id: String,   // UUID
    pub run_id: String,
    pub file_path: String,
    pub entity_kind: EntityKind,
    pub fingerprint: Option<String>,
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub unlinked: usize,
    pub elapsed_ms: u64,
    pub report_json: String,
    pub imported_at: String, // RFC3339
}

// ==========================================
// CheckpointStore Trait
// ==========================================
pub trait CheckpointStore: Send + Sync {
    fn load_checkpoint(&self, fingerprint: &str) -> RepositoryResult<Option<Checkpoint>>;

    /// 保存断点（在批次事务内调用时随批次一起提交）
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> RepositoryResult<()>;

    fn complete_checkpoint(&self, fingerprint: &str) -> RepositoryResult<()>;

    fn record_file_log(&self, entry: &FileLogEntry) -> RepositoryResult<()>;
}

/// 导入所需的完整存储能力
pub trait ImportStore: EntityStore + CheckpointStore {}

impl<T: EntityStore + CheckpointStore> ImportStore for T {}
