// ==========================================
// 汽修厂管理系统 - 数据导入核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 历史导出 CSV → 客户 / 车辆 / 发票 / 单据
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 外部数据
pub mod importer;

// 配置层 - 导入配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{EntityId, EntityKey, EntityKind, FieldValue};

// 领域实体与报告
pub use domain::{EntityRecord, FileReport, ImportReport, ManualLinkEntry, NormalizedRecord};

// 导入
pub use importer::{DirectoryImporter, ImportError, ImportOrchestrator, ImportResult};

// 存储
pub use repository::{ImportStore, SqliteEntityStore};

// 配置
pub use config::{ConfigManager, ConfigOverrides, ImportConfig};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "汽修厂管理系统 - 数据导入";
