// ==========================================
// 汽修厂管理系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供导入所消费的存储契约及其 SQLite 实现
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod entity_store;
pub mod entity_store_impl;
pub mod error;

// 重导出核心仓储
pub use entity_store::{Checkpoint, CheckpointStore, EntityStore, FileLogEntry, ImportStore};
pub use entity_store_impl::SqliteEntityStore;
pub use error::{RepositoryError, RepositoryResult};
