// ==========================================
// 汽修厂管理系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分级: 字段/行问题不越过行; 编码/表头问题不越过文件;
//       仅配置类错误（根目录无效、存储不可达）终止整次导入
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件级错误（跳过该文件）=====
    #[error("编码无法识别: {0}")]
    Encoding(String),

    #[error("缺少必填列: {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    // ===== 批次错误（触发逐行重试）=====
    #[error("批次写入失败 (批次 {batch}): {message}")]
    Batch { batch: usize, message: String },

    // ===== 致命错误（终止本次导入）=====
    #[error("导入目录无效: {0}")]
    InvalidRoot(String),

    #[error("存储不可用: {0}")]
    StorageUnavailable(String),

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    Config {
        key: String,
        value: String,
        message: String,
    },

    // ===== 通用错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 是否为致命错误（退出码 2）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::InvalidRoot(_)
                | ImportError::StorageUnavailable(_)
                | ImportError::Config { .. }
        )
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
