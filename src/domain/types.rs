// ==========================================
// 汽修厂管理系统 - 领域类型定义
// ==========================================
// 职责: 实体种类 / 自然键 / 字段值类型
// 红线: 纯数据定义,不含 IO
// ==========================================

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 存储层分配的实体 ID
pub type EntityId = i64;

// ==========================================
// EntityKind - 实体种类
// ==========================================
// 顺序即导入依赖顺序: 客户 → 车辆 → 发票 → 单据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    Vehicle,
    Invoice,
    Document,
}

impl EntityKind {
    /// 依赖顺序（被引用方在前）
    pub const IMPORT_ORDER: [EntityKind; 4] = [
        EntityKind::Customer,
        EntityKind::Vehicle,
        EntityKind::Invoice,
        EntityKind::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Vehicle => "vehicle",
            EntityKind::Invoice => "invoice",
            EntityKind::Document => "document",
        }
    }

    /// 文件名关键字（小写匹配）
    pub fn filename_keyword(&self) -> &'static str {
        self.as_str()
    }

    /// 对应的数据表
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customers",
            EntityKind::Vehicle => "vehicles",
            EntityKind::Invoice => "invoices",
            EntityKind::Document => "documents",
        }
    }

    /// 实体属性列（不含 id / natural_key / external_id / 关联 / 扩展列）
    pub fn attribute_columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Customer => &[
                "name",
                "title",
                "forename",
                "surname",
                "company",
                "email",
                "phone",
                "alternate_phone",
                "address",
                "postcode",
            ],
            EntityKind::Vehicle => &[
                "registration",
                "make",
                "model",
                "year",
                "first_registered",
                "colour",
                "vin",
                "engine_size",
                "fuel_type",
                "transmission",
                "mot_expiry",
            ],
            EntityKind::Invoice => &[
                "invoice_number",
                "invoice_date",
                "due_date",
                "total_amount",
                "tax_amount",
                "status",
                "notes",
            ],
            EntityKind::Document => &[
                "document_number",
                "document_type",
                "document_date",
                "total_amount",
                "tax_amount",
                "status",
                "notes",
            ],
        }
    }

    /// 是否带 customer_id 关联列
    pub fn links_customer(&self) -> bool {
        !matches!(self, EntityKind::Customer)
    }

    /// 是否带 vehicle_id 关联列
    pub fn links_vehicle(&self) -> bool {
        matches!(self, EntityKind::Invoice | EntityKind::Document)
    }

    pub fn parse(value: &str) -> Option<EntityKind> {
        match value.trim().to_lowercase().as_str() {
            "customer" | "customers" => Some(EntityKind::Customer),
            "vehicle" | "vehicles" => Some(EntityKind::Vehicle),
            "invoice" | "invoices" => Some(EntityKind::Invoice),
            "document" | "documents" => Some(EntityKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// EntityKey - 自然键
// ==========================================
// 车辆: 规范化车牌; 客户: 规范化全名（小写）; 发票/单据: 编号
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 客户名 → 键（大小写不敏感）
    pub fn for_customer_name(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ==========================================
// ValueClass - 值类别（决定清洗函数）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueClass {
    Text,
    Name,
    Registration,
    Money,
    Date,
    Phone,
    Email,
    Postcode,
    Year,
    Code, // 大写去空格（VIN / 单号）
}

// ==========================================
// FieldValue - 清洗后的字段值
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Money(BigDecimal),
    Year(i32),
}

impl FieldValue {
    /// 存储口径文本（日期 ISO-8601, 金额 2 位小数）
    pub fn to_storage(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Money(m) => m.with_scale(2).to_string(),
            FieldValue::Year(y) => y.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}
