// ==========================================
// 汽修厂管理系统 - 导入接口 Trait
// ==========================================
// 职责: 定义导入接口（不包含实现）
// ==========================================

use crate::domain::report::ImportReport;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::ParsedFile;
use async_trait::async_trait;
use std::path::Path;

// ==========================================
// DirectoryImporter Trait
// ==========================================
// 用途: 目录级导入主接口
// 实现者: ImportOrchestrator
#[async_trait]
pub trait DirectoryImporter: Send + Sync {
    /// 导入配置目录下的全部导出文件
    ///
    /// # 返回
    /// - Ok(ImportReport): 导入报告（部分失败时同样返回,错误记录在报告内）
    /// - Err: 仅致命错误（根目录无效、存储不可达）
    ///
    /// # 导入流程
    /// 1. 校验根目录与存储
    /// 2. 扫描文件并按文件名关键字归类
    /// 3. 按依赖顺序（客户 → 车辆 → 发票 → 单据）逐类处理
    /// 4. 每个文件: 探测 → 表头映射 → 清洗 → 实体判定 → 分批落库
    async fn run_import(&self) -> ImportResult<ImportReport>;
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 文件读取与解析接口（阶段 0）
// 实现者: CsvFileParser
pub trait FileParser: Send + Sync {
    /// 读取并解析单个文件
    ///
    /// # 参数
    /// - file_path: 文件路径
    ///
    /// # 返回
    /// - Ok(ParsedFile): 表头、原始行、指纹与探测结果
    /// - Err: 文件读取错误、编码无法识别
    fn parse_file(&self, file_path: &Path) -> ImportResult<ParsedFile>;
}
