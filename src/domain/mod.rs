// ==========================================
// 汽修厂管理系统 - 领域模型层
// ==========================================
// 职责: 定义实体种类、导入中间结构、存储实体、导入报告
// 红线: 不含数据访问逻辑,不含导入流程逻辑
// ==========================================

pub mod entity;
pub mod record;
pub mod report;
pub mod types;

// 重导出核心类型
pub use entity::{EntityLinks, EntityRecord};
pub use record::{FieldWarning, NormalizedRecord, RawRow, Reference, RowError};
pub use report::{FileReport, ImportReport, ManualLinkEntry, ReportTotals};
pub use types::{EntityId, EntityKey, EntityKind, FieldValue, ValueClass};
