// ==========================================
// 汽修厂管理系统 - 记录规范化
// ==========================================
// 职责: RawRow + HeaderMap → NormalizedRecord
// 流程: 逐列清洗 → 组合字段（姓名/电话/地址/年份）→ 自然键 → 跨实体引用
// 红线: 字段失败只告警; 必填字段失败 → RowError,该行跳过
// ==========================================

use crate::domain::record::{FieldWarning, NormalizedRecord, RawRow, Reference, RowError};
use crate::domain::types::{EntityKey, EntityKind, FieldValue};
use crate::importer::data_cleaner::{Cleaned, DataCleaner};
use crate::importer::schema_mapper::HeaderMap;
use chrono::Datelike;
use std::collections::{BTreeMap, HashMap};

/// 单行清洗后的输入字段（组合前）
struct CleanedFields {
    values: HashMap<&'static str, FieldValue>,
    invalid: HashMap<&'static str, String>,
}

impl CleanedFields {
    fn text(&self, field: &str) -> Option<String> {
        self.values
            .get(field)
            .and_then(|v| v.as_text())
            .map(|s| s.to_string())
    }

    fn take(&mut self, field: &str) -> Option<FieldValue> {
        self.values.remove(field)
    }

    /// 必填字段失败原因
    fn required_failure(&self, field: &str) -> String {
        match self.invalid.get(field) {
            Some(message) => format!("必填字段 {} 无效: {}", field, message),
            None => format!("必填字段 {} 为空", field),
        }
    }
}

pub struct RecordNormalizer {
    cleaner: DataCleaner,
}

impl RecordNormalizer {
    pub fn new() -> Self {
        Self {
            cleaner: DataCleaner,
        }
    }

    /// 规范化单行
    ///
    /// # 参数
    /// - row: 原始行
    /// - map: 该文件的表头映射
    ///
    /// # 返回
    /// - Ok(NormalizedRecord): 可能带字段级告警
    /// - Err(RowError): 必填字段缺失或无效
    pub fn normalize(&self, row: &RawRow, map: &HeaderMap) -> Result<NormalizedRecord, RowError> {
        let row_number = row.row_number;
        let mut warnings = Vec::new();
        let mut fields = CleanedFields {
            values: HashMap::new(),
            invalid: HashMap::new(),
        };

        for (column, spec) in map.mapped_fields() {
            let raw = row.cell(column).unwrap_or("");
            match self.cleaner.clean(spec.class, raw) {
                Cleaned::Value(value) => {
                    fields.values.insert(spec.name, value);
                }
                Cleaned::Empty => {}
                Cleaned::Invalid { kept, message } => {
                    warnings.push(FieldWarning::field(row_number, spec.name, message.clone()));
                    fields.invalid.insert(spec.name, message);
                    if let Some(value) = kept {
                        fields.values.insert(spec.name, value);
                    }
                }
            }
        }

        let extensions: BTreeMap<String, String> = map
            .extension_columns()
            .iter()
            .filter_map(|(column, name)| {
                let raw = row.cell(*column)?;
                self.cleaner
                    .clean_text(raw)
                    .map(|value| (name.clone(), value))
            })
            .collect();

        let external_id = fields.text("external_id");
        let mut record = match map.kind {
            EntityKind::Customer => self.compose_customer(row_number, &mut fields)?,
            EntityKind::Vehicle => self.compose_vehicle(row_number, &mut fields)?,
            EntityKind::Invoice => {
                self.compose_document_like(row_number, EntityKind::Invoice, "invoice_number", &mut fields)?
            }
            EntityKind::Document => {
                self.compose_document_like(row_number, EntityKind::Document, "document_number", &mut fields)?
            }
        };

        record.external_id = external_id;
        record.extensions = extensions;
        record.warnings = warnings;
        Ok(record)
    }

    fn compose_customer(
        &self,
        row_number: usize,
        fields: &mut CleanedFields,
    ) -> Result<NormalizedRecord, RowError> {
        let title = fields.text("title");
        let forename = fields.text("forename");
        let surname = fields.text("surname");
        let company = fields.text("company");

        // 姓名: 称谓 + 名 + 姓; 否则全名列; 否则公司名
        let name = if forename.is_some() || surname.is_some() {
            Some(
                [&title, &forename, &surname]
                    .iter()
                    .filter_map(|part| part.as_deref())
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        } else {
            fields.text("full_name").or_else(|| company.clone())
        };
        let Some(name) = name else {
            return Err(RowError::new(
                row_number,
                "客户姓名为空（称谓/名/姓/全名/公司名均无有效值）",
            ));
        };

        let mut values = BTreeMap::new();
        values.insert("name", FieldValue::Text(name.clone()));
        for (field, value) in [
            ("title", title),
            ("forename", forename),
            ("surname", surname),
            ("company", company),
        ] {
            if let Some(value) = value {
                values.insert(field, FieldValue::Text(value));
            }
        }
        if let Some(email) = fields.take("email") {
            values.insert("email", email);
        }
        if let Some(postcode) = fields.take("postcode") {
            values.insert("postcode", postcode);
        }

        // 电话: 手机优先,另一号码保留为备用
        let mobile = fields.take("mobile");
        let landline = fields.take("landline");
        match (mobile, landline) {
            (Some(mobile), landline) => {
                if let Some(landline) = landline.filter(|l| *l != mobile) {
                    values.insert("alternate_phone", landline);
                }
                values.insert("phone", mobile);
            }
            (None, Some(landline)) => {
                values.insert("phone", landline);
            }
            (None, None) => {}
        }

        if let Some(address) = compose_address(fields) {
            values.insert("address", FieldValue::Text(address));
        }

        Ok(NormalizedRecord {
            kind: EntityKind::Customer,
            row_number,
            key: EntityKey::for_customer_name(&name),
            external_id: None,
            values,
            references: Vec::new(),
            extensions: BTreeMap::new(),
            warnings: Vec::new(),
        })
    }

    fn compose_vehicle(
        &self,
        row_number: usize,
        fields: &mut CleanedFields,
    ) -> Result<NormalizedRecord, RowError> {
        let Some(registration) = fields.text("registration") else {
            return Err(RowError::new(row_number, fields.required_failure("registration")));
        };

        let mut values = BTreeMap::new();
        values.insert("registration", FieldValue::Text(registration.clone()));
        for field in [
            "make",
            "model",
            "first_registered",
            "colour",
            "vin",
            "engine_size",
            "fuel_type",
            "transmission",
            "mot_expiry",
        ] {
            if let Some(value) = fields.take(field) {
                values.insert(field, value);
            }
        }

        // 无年份列时由首次登记日期推出
        let year = fields.take("year").or_else(|| {
            values
                .get("first_registered")
                .and_then(|v| v.as_date())
                .map(|d| FieldValue::Year(d.year()))
        });
        if let Some(year) = year {
            values.insert("year", year);
        }

        let references = customer_reference(fields).into_iter().collect();

        Ok(NormalizedRecord {
            kind: EntityKind::Vehicle,
            row_number,
            key: EntityKey::new(registration),
            external_id: None,
            values,
            references,
            extensions: BTreeMap::new(),
            warnings: Vec::new(),
        })
    }

    fn compose_document_like(
        &self,
        row_number: usize,
        kind: EntityKind,
        number_field: &'static str,
        fields: &mut CleanedFields,
    ) -> Result<NormalizedRecord, RowError> {
        let Some(number) = fields.text(number_field) else {
            return Err(RowError::new(row_number, fields.required_failure(number_field)));
        };

        let mut values = BTreeMap::new();
        for field in kind.attribute_columns() {
            if let Some(value) = fields.take(field) {
                values.insert(*field, value);
            }
        }

        let mut references: Vec<Reference> = customer_reference(fields).into_iter().collect();
        let vehicle_id = fields.text("vehicle_ref_id");
        let registration = fields.text("registration");
        if vehicle_id.is_some() || registration.is_some() {
            references.push(Reference {
                target: EntityKind::Vehicle,
                display: registration
                    .clone()
                    .or_else(|| vehicle_id.as_ref().map(|id| format!("#{}", id)))
                    .unwrap_or_default(),
                external_id: vehicle_id,
                key: registration.map(EntityKey::new),
            });
        }

        Ok(NormalizedRecord {
            kind,
            row_number,
            key: EntityKey::new(number),
            external_id: None,
            values,
            references,
            extensions: BTreeMap::new(),
            warnings: Vec::new(),
        })
    }
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// 客户引用（外部 ID 优先,其次客户名）
fn customer_reference(fields: &CleanedFields) -> Option<Reference> {
    let external_id = fields.text("customer_ref_id");
    let name = fields.text("customer_name");
    if external_id.is_none() && name.is_none() {
        return None;
    }
    Some(Reference {
        target: EntityKind::Customer,
        display: name
            .clone()
            .or_else(|| external_id.as_ref().map(|id| format!("#{}", id)))
            .unwrap_or_default(),
        external_id,
        key: name.as_deref().map(EntityKey::for_customer_name),
    })
}

/// 地址: 门牌 + 街道, 小区, 城镇, 郡
fn compose_address(fields: &CleanedFields) -> Option<String> {
    let first_line = [fields.text("house_no"), fields.text("street")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    let parts: Vec<String> = std::iter::once(first_line)
        .chain(["locality", "town", "county"].iter().filter_map(|f| fields.text(f)))
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
