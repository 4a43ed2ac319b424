// ==========================================
// 汽修厂管理系统 - 导入中间结构体
// ==========================================
// 用途: 导入管道中间产物（文件解析 → 表头映射 → 清洗 → 此结构）
// 生命周期: 仅在单次导入流程内,不落库
// ==========================================

use crate::domain::types::{EntityKey, EntityKind, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ==========================================
// RawRow - 原始行
// ==========================================
#[derive(Debug, Clone)]
pub struct RawRow {
    pub file: Arc<str>,      // 源文件标识
    pub row_number: usize,   // 数据行号（1 起,不含表头）
    pub cells: Vec<String>,  // 原始单元格
}

impl RawRow {
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(|c| c.as_str())
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}

// ==========================================
// FieldWarning - 字段级告警（不阻断行）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldWarning {
    pub row: Option<usize>,
    pub field: Option<String>,
    pub message: String,
}

impl FieldWarning {
    pub fn field(row: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn row(row: usize, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            field: None,
            message: message.into(),
        }
    }

    pub fn file(message: impl Into<String>) -> Self {
        Self {
            row: None,
            field: None,
            message: message.into(),
        }
    }
}

// ==========================================
// RowError - 行级错误（该行跳过）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row: Option<usize>,
    pub reason: String,
}

impl RowError {
    pub fn new(row: usize, reason: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            reason: reason.into(),
        }
    }

    /// 文件级错误（row 为空）
    pub fn file(reason: impl Into<String>) -> Self {
        Self {
            row: None,
            reason: reason.into(),
        }
    }
}

// ==========================================
// Reference - 跨实体引用（待解析）
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub target: EntityKind,
    pub external_id: Option<String>,
    pub key: Option<EntityKey>,
    pub display: String, // 原始引用文本（报告用）
}

impl Reference {
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none() && self.key.is_none()
    }
}

// ==========================================
// NormalizedRecord - 清洗后的单实体记录
// ==========================================
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub kind: EntityKind,
    pub row_number: usize,
    pub key: EntityKey,
    pub external_id: Option<String>,
    pub values: BTreeMap<&'static str, FieldValue>,
    pub references: Vec<Reference>,
    pub extensions: BTreeMap<String, String>, // 未映射列,原样保留
    pub warnings: Vec<FieldWarning>,
}

impl NormalizedRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn get_text(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(|v| v.as_text())
    }
}
