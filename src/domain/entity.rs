// ==========================================
// 汽修厂管理系统 - 存储实体模型
// ==========================================
// 用途: 导入层写入、存储层持久化的统一实体表示
// 对齐: customers / vehicles / invoices / documents 表
// ==========================================

use crate::domain::record::NormalizedRecord;
use crate::domain::types::{EntityId, EntityKey, EntityKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// EntityLinks - 外键关联
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLinks {
    pub customer_id: Option<EntityId>,
    pub vehicle_id: Option<EntityId>,
}

// ==========================================
// EntityRecord - 实体记录
// ==========================================
// 属性值统一为存储口径文本；缺失即 NULL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Option<EntityId>,
    pub kind: EntityKind,
    pub key: EntityKey,
    pub external_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub links: EntityLinks,
    pub extensions: BTreeMap<String, String>,
}

impl EntityRecord {
    /// 由清洗后的记录构建（关联由解析器补齐）
    pub fn from_normalized(record: &NormalizedRecord) -> Self {
        let attributes = record
            .values
            .iter()
            .filter(|(field, _)| record.kind.attribute_columns().contains(field))
            .map(|(field, value)| (field.to_string(), value.to_storage()))
            .collect();

        Self {
            id: None,
            kind: record.kind,
            key: record.key.clone(),
            external_id: record.external_id.clone(),
            attributes,
            links: EntityLinks::default(),
            extensions: record.extensions.clone(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// 合并入站记录
    ///
    /// # 规则
    /// - 仅入站中存在的字段覆盖现有值
    /// - 入站缺失/为空的字段永不清空现有数据
    ///
    /// # 返回
    /// - 发生变化的字段名列表（空 = 无变化）
    pub fn merge_from(&mut self, incoming: &EntityRecord) -> Vec<String> {
        let mut changed = Vec::new();

        if let Some(ext) = &incoming.external_id {
            if self.external_id.as_ref() != Some(ext) {
                self.external_id = Some(ext.clone());
                changed.push("external_id".to_string());
            }
        }

        for (field, value) in &incoming.attributes {
            if self.attributes.get(field) != Some(value) {
                self.attributes.insert(field.clone(), value.clone());
                changed.push(field.clone());
            }
        }

        if let Some(customer_id) = incoming.links.customer_id {
            if self.links.customer_id != Some(customer_id) {
                self.links.customer_id = Some(customer_id);
                changed.push("customer_id".to_string());
            }
        }
        if let Some(vehicle_id) = incoming.links.vehicle_id {
            if self.links.vehicle_id != Some(vehicle_id) {
                self.links.vehicle_id = Some(vehicle_id);
                changed.push("vehicle_id".to_string());
            }
        }

        for (name, value) in &incoming.extensions {
            if self.extensions.get(name) != Some(value) {
                self.extensions.insert(name.clone(), value.clone());
                changed.push(format!("ext:{}", name));
            }
        }

        // 客户按外部 ID 匹配时姓名可能变化,自然键随之更新
        if self.key != incoming.key && changed.iter().any(|f| f == "name") {
            self.key = incoming.key.clone();
        }

        changed
    }
}
