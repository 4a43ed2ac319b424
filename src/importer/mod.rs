// ==========================================
// 汽修厂管理系统 - 导入层
// ==========================================
// 职责: 把导出的 CSV 文件转为一致的客户 / 车辆 / 发票 / 单据数据
// 流程: 字节 → 编码探测 → 表头映射 → 行清洗 → 实体识别 → 分批写入 → 汇总报告
// ==========================================

// 模块声明
pub mod batch_writer;
pub mod data_cleaner;
pub mod encoding_sniffer;
pub mod entity_resolver;
pub mod error;
pub mod file_parser;
pub mod import_orchestrator;
pub mod importer_trait;
pub mod record_normalizer;
pub mod schema_mapper;
pub mod synonym_table;

// 重导出核心类型
pub use batch_writer::{BatchWriter, WriteContext, WriteOutcome};
pub use data_cleaner::{Cleaned, DataCleaner};
pub use encoding_sniffer::{sniff, SniffResult, TextEncoding};
pub use entity_resolver::{Decision, EntityResolver, ResolveOutcome, ResolvedUnit};
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvFileParser, ParsedFile};
pub use import_orchestrator::{classify_file, ImportOrchestrator};
pub use record_normalizer::RecordNormalizer;
pub use schema_mapper::{match_header, HeaderMap, MappingDecision, MatchReason, SchemaMapper};

// 重导出 Trait 接口
pub use importer_trait::{DirectoryImporter, FileParser};
