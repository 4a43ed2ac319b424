// ==========================================
// 汽修厂管理系统 - 导入报告
// ==========================================
// 用途: 单文件 / 全量导入的计数、告警、错误明细
// 红线: 任何被跳过的单元都必须带可读原因
// ==========================================

use crate::domain::record::{FieldWarning, RowError};
use crate::domain::types::EntityKind;
use serde::{Deserialize, Serialize};

// ==========================================
// FileReport - 单文件报告
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileReport {
    pub file: String,                     // 源文件路径
    pub entity_kind: Option<EntityKind>,  // 由文件名推断
    pub encoding: Option<String>,         // 探测到的编码
    pub delimiter: Option<String>,        // 探测到的分隔符
    pub low_confidence: bool,             // 探测低置信度
    pub total_rows: usize,                // 数据行数（不含表头/空行）
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub unlinked: usize,
    pub resumed: bool,                    // 从断点续传
    pub warnings: Vec<FieldWarning>,
    pub errors: Vec<RowError>,
}

impl FileReport {
    pub fn new(file: impl Into<String>, entity_kind: EntityKind) -> Self {
        Self {
            file: file.into(),
            entity_kind: Some(entity_kind),
            ..Default::default()
        }
    }

    /// 文件级失败（编码 / 表头）
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.errors.push(RowError::file(reason));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ==========================================
// ManualLinkEntry - 待人工关联条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualLinkEntry {
    pub file: String,
    pub row: usize,
    pub entity_kind: EntityKind,
    pub entity_key: String,
    pub reference: String,  // 原始引用文本
    pub reason: String,
}

// ==========================================
// ReportTotals - 汇总计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub unlinked: usize,
    pub warnings: usize,
    pub errors: usize,
}

// ==========================================
// ImportReport - 全量导入报告
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub run_id: String,
    pub dry_run: bool,
    pub files_processed: usize,
    pub totals: ReportTotals,
    pub per_file: Vec<FileReport>,
    pub manual_linking: Vec<ManualLinkEntry>,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn new(run_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id: run_id.into(),
            dry_run,
            ..Default::default()
        }
    }

    /// 追加单文件报告并累加汇总
    pub fn push_file(&mut self, file: FileReport) {
        self.files_processed += 1;
        self.totals.total_rows += file.total_rows;
        self.totals.inserted += file.inserted;
        self.totals.updated += file.updated;
        self.totals.unchanged += file.unchanged;
        self.totals.skipped += file.skipped;
        self.totals.unlinked += file.unlinked;
        self.totals.warnings += file.warnings.len();
        self.totals.errors += file.errors.len();
        self.per_file.push(file);
    }

    pub fn has_errors(&self) -> bool {
        self.per_file.iter().any(FileReport::has_errors)
    }

    /// 进程退出码: 0 = 全部成功, 1 = 存在文件/行错误
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() || self.cancelled {
            1
        } else {
            0
        }
    }
}
