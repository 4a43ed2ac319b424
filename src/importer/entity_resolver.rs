// ==========================================
// 汽修厂管理系统 - 实体识别
// ==========================================
// 职责: 判定每条规范化记录为 新增 / 更新 / 无变化,并解析跨实体引用
// 顺序: 文件内按匹配键折叠 → 本次运行待定索引 → 存储查找
// 红线: 引用无法解析时外键留空并标记 unlinked,不猜测关联
// ==========================================

use crate::domain::entity::EntityRecord;
use crate::domain::record::{FieldWarning, NormalizedRecord, Reference, RowError};
use crate::domain::report::ManualLinkEntry;
use crate::domain::types::{EntityId, EntityKey, EntityKind};
use crate::repository::entity_store::EntityStore;
use crate::repository::error::RepositoryResult;
use std::collections::HashMap;
use tracing::{debug, warn};

// ==========================================
// Decision - 识别结论
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update { changed: Vec<String> },
    NoOp,
}

impl Decision {
    pub fn needs_write(&self) -> bool {
        !matches!(self, Decision::NoOp)
    }
}

/// 被折叠进同一实体的后续行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldedRow {
    pub row: usize,
    pub changed: bool, // 折叠时是否改变了字段
}

// ==========================================
// ResolvedUnit - 写入单元（一个实体,可能对应多行）
// ==========================================
#[derive(Debug, Clone)]
pub struct ResolvedUnit {
    pub slot: usize, // 待定索引槽位,提交后回填 ID
    pub first_row: usize,
    pub folded_rows: Vec<FoldedRow>,
    pub record: EntityRecord,
    pub decision: Decision,
    pub unlinked: bool,
}

impl ResolvedUnit {
    pub fn last_row(&self) -> usize {
        self.folded_rows
            .last()
            .map(|f| f.row)
            .unwrap_or(self.first_row)
    }

    pub fn row_count(&self) -> usize {
        1 + self.folded_rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.first_row).chain(self.folded_rows.iter().map(|f| f.row))
    }
}

/// 单文件识别结果
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub units: Vec<ResolvedUnit>,
    pub warnings: Vec<FieldWarning>,
    pub errors: Vec<RowError>,
    pub manual_linking: Vec<ManualLinkEntry>,
}

impl ResolveOutcome {
    /// 因查找失败而跳过的行数
    pub fn skipped_rows(&self) -> usize {
        self.errors.len()
    }
}

// 折叠后的草稿
struct Draft {
    first_row: usize,
    folded_rows: Vec<FoldedRow>,
    record: EntityRecord,
    references: Vec<Reference>,
}

enum Linkage {
    Linked(EntityId),
    Provisional, // 本次运行中已识别但尚未提交（dry-run）
    Ambiguous { id: EntityId, candidates: usize },
    Missing,
}

struct PendingEntry {
    id: Option<EntityId>,
    record: EntityRecord,
    failed: bool, // 写入失败,不再作为引用目标
}

// ==========================================
// EntityResolver
// ==========================================
// 生命周期: 一次导入运行
pub struct EntityResolver {
    entries: Vec<PendingEntry>,
    by_key: HashMap<(EntityKind, EntityKey), usize>,
    by_external: HashMap<(EntityKind, String), usize>,
    by_id: HashMap<(EntityKind, EntityId), usize>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
            by_external: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// 识别一个文件的全部记录
    ///
    /// # 参数
    /// - store: 存储协作方（只读查找）
    /// - file: 报告中使用的文件名
    /// - records: 按源顺序排列的规范化记录
    ///
    /// # 返回
    /// - 按首行顺序排列的写入单元,查找失败的行记为行错误
    pub fn resolve_file<S>(&mut self, store: &S, file: &str, records: Vec<NormalizedRecord>) -> ResolveOutcome
    where
        S: EntityStore + ?Sized,
    {
        let mut outcome = ResolveOutcome::default();

        for draft in fold_records(records) {
            let first_row = draft.first_row;
            let rows: Vec<usize> = std::iter::once(first_row)
                .chain(draft.folded_rows.iter().map(|f| f.row))
                .collect();

            match self.resolve_draft(store, file, draft, &mut outcome) {
                Ok(unit) => outcome.units.push(unit),
                Err(e) => {
                    warn!(file = %file, row = first_row, error = %e, "实体查找失败,跳过该实体");
                    for row in rows {
                        outcome
                            .errors
                            .push(RowError::new(row, format!("实体查找失败: {}", e)));
                    }
                }
            }
        }

        debug!(
            file = %file,
            units = outcome.units.len(),
            manual = outcome.manual_linking.len(),
            "实体识别完成"
        );
        outcome
    }

    /// 提交后回填实体 ID
    pub fn assign_id(&mut self, slot: usize, id: EntityId) {
        if let Some(entry) = self.entries.get_mut(slot) {
            entry.id = Some(id);
            entry.record.id = Some(id);
            self.by_id.insert((entry.record.kind, id), slot);
        }
    }

    /// 标记写入失败的实体
    ///
    /// 失败且从未落库的实体不再参与待定匹配,后续引用回落到存储查找
    pub fn mark_failed(&mut self, slot: usize) {
        if let Some(entry) = self.entries.get_mut(slot) {
            if entry.id.is_none() {
                entry.failed = true;
            }
        }
    }

    /// 本次运行中已识别的实体数
    pub fn pending_len(&self) -> usize {
        self.entries.len()
    }

    fn resolve_draft<S>(
        &mut self,
        store: &S,
        file: &str,
        draft: Draft,
        outcome: &mut ResolveOutcome,
    ) -> RepositoryResult<ResolvedUnit>
    where
        S: EntityStore + ?Sized,
    {
        let Draft {
            first_row,
            folded_rows,
            mut record,
            references,
        } = draft;

        // 1. 跨实体引用
        let mut unlinked = false;
        for reference in &references {
            if reference.is_empty() {
                continue;
            }
            match self.resolve_reference(store, reference)? {
                Linkage::Linked(id) => set_link(&mut record, reference.target, id),
                Linkage::Provisional => {}
                Linkage::Ambiguous { id, candidates } => {
                    set_link(&mut record, reference.target, id);
                    outcome.warnings.push(FieldWarning::row(
                        first_row,
                        format!(
                            "collision: 引用的{} '{}' 匹配到 {} 条记录,已取最早创建者 #{}",
                            reference.target, reference.display, candidates, id
                        ),
                    ));
                    outcome.manual_linking.push(manual_entry(
                        file,
                        first_row,
                        &record,
                        &reference.display,
                        format!("{} 名称重复（{} 条）", reference.target, candidates),
                    ));
                }
                Linkage::Missing => {
                    unlinked = true;
                    outcome.manual_linking.push(manual_entry(
                        file,
                        first_row,
                        &record,
                        &reference.display,
                        format!("未找到引用的{}", reference.target),
                    ));
                }
            }
        }

        // 2. 查找已有实体
        let existing = match self.find_pending(&record) {
            Some(slot) => Some((Some(slot), self.entries[slot].record.clone())),
            None => self
                .find_stored(store, file, first_row, &record, outcome)?
                .map(|stored| {
                    let slot = stored
                        .id
                        .and_then(|id| self.by_id.get(&(stored.kind, id)).copied());
                    (slot, stored)
                }),
        };

        // 3. 判定
        let (slot, merged, decision) = match existing {
            None => {
                let slot = self.push_entry(record.clone());
                (slot, record, Decision::Insert)
            }
            Some((slot, mut base)) => {
                let changed = base.merge_from(&record);
                let slot = match slot {
                    Some(slot) => slot,
                    None => self.push_entry(base.clone()),
                };
                let decision = if changed.is_empty() {
                    Decision::NoOp
                } else {
                    Decision::Update { changed }
                };
                (slot, base, decision)
            }
        };

        self.index_entry(slot, &merged);

        Ok(ResolvedUnit {
            slot,
            first_row,
            folded_rows,
            record: merged,
            decision,
            unlinked,
        })
    }

    fn push_entry(&mut self, record: EntityRecord) -> usize {
        let slot = self.entries.len();
        self.entries.push(PendingEntry {
            id: record.id,
            record,
            failed: false,
        });
        slot
    }

    fn index_entry(&mut self, slot: usize, record: &EntityRecord) {
        let kind = record.kind;
        self.entries[slot].record = record.clone();
        if self.entries[slot].id.is_none() {
            self.entries[slot].id = record.id;
        }

        let keyed = self.by_key.entry((kind, record.key.clone())).or_insert(slot);
        if self.entries[*keyed].failed {
            *keyed = slot;
        }
        if let Some(ext) = &record.external_id {
            let keyed = self.by_external.entry((kind, ext.clone())).or_insert(slot);
            if self.entries[*keyed].failed {
                *keyed = slot;
            }
        }
        if let Some(id) = self.entries[slot].id {
            self.by_id.insert((kind, id), slot);
        }
    }

    fn find_pending(&self, record: &EntityRecord) -> Option<usize> {
        if record.kind == EntityKind::Customer {
            if let Some(ext) = &record.external_id {
                if let Some(slot) = self.live_external(record.kind, ext) {
                    return Some(slot);
                }
            }
            return self
                .live_key(record.kind, &record.key)
                .filter(|slot| compatible_external_id(&self.entries[*slot].record, record));
        }

        self.live_key(record.kind, &record.key)
    }

    fn live_key(&self, kind: EntityKind, key: &EntityKey) -> Option<usize> {
        self.by_key
            .get(&(kind, key.clone()))
            .copied()
            .filter(|slot| !self.entries[*slot].failed)
    }

    fn live_external(&self, kind: EntityKind, external_id: &str) -> Option<usize> {
        self.by_external
            .get(&(kind, external_id.to_string()))
            .copied()
            .filter(|slot| !self.entries[*slot].failed)
    }

    fn find_stored<S>(
        &self,
        store: &S,
        file: &str,
        row: usize,
        record: &EntityRecord,
        outcome: &mut ResolveOutcome,
    ) -> RepositoryResult<Option<EntityRecord>>
    where
        S: EntityStore + ?Sized,
    {
        if record.kind != EntityKind::Customer {
            return store.lookup(record.kind, &record.key);
        }

        // 客户: 外部 ID 优先
        if let Some(ext) = &record.external_id {
            if let Some(found) = store.lookup_by_external_id(record.kind, ext)? {
                return Ok(Some(found));
            }
        }

        // 再按姓名,外部 ID 冲突的不合并
        let candidates: Vec<EntityRecord> = store
            .lookup_all(record.kind, &record.key)?
            .into_iter()
            .filter(|stored| compatible_external_id(stored, record))
            .collect();

        if candidates.len() > 1 {
            let chosen = candidates[0].id.unwrap_or_default();
            let name = record.attribute("name").unwrap_or(record.key.as_str());
            outcome.warnings.push(FieldWarning::row(
                row,
                format!(
                    "collision: 客户 '{}' 存在 {} 条同名记录,已取最早创建者 #{}",
                    name,
                    candidates.len(),
                    chosen
                ),
            ));
            outcome.manual_linking.push(manual_entry(
                file,
                row,
                record,
                name,
                format!("同名客户 {} 条", candidates.len()),
            ));
        }

        Ok(candidates.into_iter().next())
    }

    fn resolve_reference<S>(&self, store: &S, reference: &Reference) -> RepositoryResult<Linkage>
    where
        S: EntityStore + ?Sized,
    {
        let target = reference.target;

        // 1. 外部 ID
        if let Some(ext) = &reference.external_id {
            if let Some(slot) = self.live_external(target, ext) {
                return Ok(self.pending_linkage(slot));
            }
            if let Some(id) = store
                .lookup_by_external_id(target, ext)?
                .and_then(|r| r.id)
            {
                return Ok(Linkage::Linked(id));
            }
        }

        // 2. 自然键
        let Some(key) = &reference.key else {
            return Ok(Linkage::Missing);
        };
        // 已提交的客户交给存储查找,以便发现同名冲突
        if let Some(slot) = self.live_key(target, key) {
            if target != EntityKind::Customer || self.entries[slot].id.is_none() {
                return Ok(self.pending_linkage(slot));
            }
        }

        if target == EntityKind::Customer {
            let found = store.lookup_all(target, key)?;
            let ids: Vec<EntityId> = found.iter().filter_map(|r| r.id).collect();
            return Ok(match ids.as_slice() {
                [] => Linkage::Missing,
                [id] => Linkage::Linked(*id),
                [first, ..] => Linkage::Ambiguous {
                    id: *first,
                    candidates: ids.len(),
                },
            });
        }

        Ok(store
            .lookup(target, key)?
            .and_then(|r| r.id)
            .map(Linkage::Linked)
            .unwrap_or(Linkage::Missing))
    }

    fn pending_linkage(&self, slot: usize) -> Linkage {
        match self.entries[slot].id {
            Some(id) => Linkage::Linked(id),
            None => Linkage::Provisional,
        }
    }
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// 双方都有外部 ID 且不相同时视为不同实体
fn compatible_external_id(stored: &EntityRecord, incoming: &EntityRecord) -> bool {
    match (&stored.external_id, &incoming.external_id) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn set_link(record: &mut EntityRecord, target: EntityKind, id: EntityId) {
    match target {
        EntityKind::Customer => record.links.customer_id = Some(id),
        EntityKind::Vehicle => record.links.vehicle_id = Some(id),
        _ => {}
    }
}

fn manual_entry(
    file: &str,
    row: usize,
    record: &EntityRecord,
    reference: &str,
    reason: String,
) -> ManualLinkEntry {
    ManualLinkEntry {
        file: file.to_string(),
        row,
        entity_kind: record.kind,
        entity_key: record.key.to_string(),
        reference: reference.to_string(),
        reason,
    }
}

/// 文件内匹配键: 客户有外部 ID 时用外部 ID,其余用自然键
fn match_key(record: &NormalizedRecord) -> String {
    match (record.kind, &record.external_id) {
        (EntityKind::Customer, Some(ext)) => format!("ext:{}", ext),
        _ => format!("key:{}", record.key),
    }
}

/// 按源顺序折叠同键行（后出现的非空字段覆盖先出现的）
fn fold_records(records: Vec<NormalizedRecord>) -> Vec<Draft> {
    let mut drafts: Vec<Draft> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = match_key(&record);
        let entity = EntityRecord::from_normalized(&record);

        match index.get(&key) {
            Some(&i) => {
                let draft = &mut drafts[i];
                let mut changed = !draft.record.merge_from(&entity).is_empty();
                for reference in record.references {
                    changed |= merge_reference(&mut draft.references, reference);
                }
                draft.folded_rows.push(FoldedRow {
                    row: record.row_number,
                    changed,
                });
            }
            None => {
                index.insert(key, drafts.len());
                drafts.push(Draft {
                    first_row: record.row_number,
                    folded_rows: Vec::new(),
                    record: entity,
                    references: record.references,
                });
            }
        }
    }

    drafts
}

fn merge_reference(references: &mut Vec<Reference>, incoming: Reference) -> bool {
    if incoming.is_empty() {
        return false;
    }
    match references.iter_mut().find(|r| r.target == incoming.target) {
        Some(existing) if *existing == incoming => false,
        Some(existing) => {
            *existing = incoming;
            true
        }
        None => {
            references.push(incoming);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::types::FieldValue;
    use crate::repository::entity_store_impl::SqliteEntityStore;
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn store() -> SqliteEntityStore {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        SqliteEntityStore::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn customer(row: usize, name: &str, ext: Option<&str>) -> NormalizedRecord {
        let mut values = BTreeMap::new();
        values.insert("name", FieldValue::Text(name.to_string()));
        NormalizedRecord {
            kind: EntityKind::Customer,
            row_number: row,
            key: EntityKey::for_customer_name(name),
            external_id: ext.map(|s| s.to_string()),
            values,
            references: Vec::new(),
            extensions: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    fn vehicle(row: usize, reg: &str, make: &str, owner: Option<&str>) -> NormalizedRecord {
        let mut values = BTreeMap::new();
        values.insert("registration", FieldValue::Text(reg.to_string()));
        values.insert("make", FieldValue::Text(make.to_string()));
        NormalizedRecord {
            kind: EntityKind::Vehicle,
            row_number: row,
            key: EntityKey::new(reg),
            external_id: None,
            values,
            references: owner
                .map(|name| Reference {
                    target: EntityKind::Customer,
                    external_id: None,
                    key: Some(EntityKey::for_customer_name(name)),
                    display: name.to_string(),
                })
                .into_iter()
                .collect(),
            extensions: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_duplicate_rows_fold_into_one_insert() {
        let store = store();
        let mut resolver = EntityResolver::new();

        let outcome = resolver.resolve_file(
            &store,
            "Customers.csv",
            vec![
                customer(1, "Mr John Smith", None),
                customer(2, "Jane Doe", None),
                customer(3, "Mr John Smith", None),
            ],
        );

        assert_eq!(outcome.units.len(), 2);
        assert_eq!(outcome.units[0].decision, Decision::Insert);
        assert_eq!(
            outcome.units[0].folded_rows,
            vec![FoldedRow { row: 3, changed: false }]
        );
        assert_eq!(outcome.units[0].last_row(), 3);
    }

    #[test]
    fn test_stored_entity_unchanged_is_noop() {
        let store = store();
        let mut resolver = EntityResolver::new();
        let first = resolver.resolve_file(&store, "v.csv", vec![vehicle(1, "AB12XYZ", "Ford", None)]);
        store.upsert(&first.units[0].record).unwrap();

        let mut second_run = EntityResolver::new();
        let second = second_run.resolve_file(&store, "v.csv", vec![vehicle(1, "AB12XYZ", "Ford", None)]);
        assert_eq!(second.units[0].decision, Decision::NoOp);

        let third = EntityResolver::new().resolve_file(
            &store,
            "v.csv",
            vec![vehicle(1, "AB12XYZ", "Vauxhall", None)],
        );
        assert_eq!(
            third.units[0].decision,
            Decision::Update {
                changed: vec!["make".to_string()]
            }
        );
    }

    #[test]
    fn test_unresolved_reference_is_unlinked() {
        let store = store();
        let mut resolver = EntityResolver::new();

        let outcome = resolver.resolve_file(
            &store,
            "Vehicles.csv",
            vec![vehicle(1, "AB12XYZ", "Ford", Some("Unknown Person"))],
        );

        let unit = &outcome.units[0];
        assert!(unit.unlinked);
        assert_eq!(unit.record.links.customer_id, None);
        assert_eq!(outcome.manual_linking.len(), 1);
        assert_eq!(outcome.manual_linking[0].reference, "Unknown Person");
    }

    #[test]
    fn test_reference_resolves_through_assigned_id() {
        let store = store();
        let mut resolver = EntityResolver::new();

        let customers = resolver.resolve_file(&store, "c.csv", vec![customer(1, "Jane Doe", None)]);
        let id = store.upsert(&customers.units[0].record).unwrap();
        resolver.assign_id(customers.units[0].slot, id);

        let vehicles = resolver.resolve_file(
            &store,
            "v.csv",
            vec![vehicle(1, "AB12XYZ", "Ford", Some("Jane Doe"))],
        );
        assert!(!vehicles.units[0].unlinked);
        assert_eq!(vehicles.units[0].record.links.customer_id, Some(id));
    }

    #[test]
    fn test_reference_to_failed_write_is_unlinked() {
        let store = store();
        let mut resolver = EntityResolver::new();

        let customers = resolver.resolve_file(&store, "c.csv", vec![customer(1, "Jane Doe", None)]);
        resolver.mark_failed(customers.units[0].slot);

        let vehicles = resolver.resolve_file(
            &store,
            "v.csv",
            vec![vehicle(1, "AB12XYZ", "Ford", Some("Jane Doe"))],
        );
        assert!(vehicles.units[0].unlinked);
        assert_eq!(vehicles.units[0].record.links.customer_id, None);
        assert_eq!(vehicles.manual_linking.len(), 1);

        // 失败的实体在后续文件中重新判定为新增
        let retry = resolver.resolve_file(&store, "c2.csv", vec![customer(1, "Jane Doe", None)]);
        assert_eq!(retry.units[0].decision, Decision::Insert);
        assert_ne!(retry.units[0].slot, customers.units[0].slot);
    }

    #[test]
    fn test_name_collision_takes_first_created() {
        let store = store();
        let first = EntityRecord::from_normalized(&customer(1, "John Smith", Some("C1")));
        let second = EntityRecord::from_normalized(&customer(2, "John Smith", Some("C2")));
        let first_id = store.upsert(&first).unwrap();
        store.upsert(&second).unwrap();

        let mut resolver = EntityResolver::new();
        let outcome = resolver.resolve_file(&store, "c.csv", vec![customer(1, "John Smith", None)]);

        assert_eq!(outcome.units[0].record.id, Some(first_id));
        assert!(outcome.warnings[0].message.starts_with("collision"));
        assert_eq!(outcome.manual_linking.len(), 1);
    }

    #[test]
    fn test_different_external_id_never_merged() {
        let store = store();
        let stored = EntityRecord::from_normalized(&customer(1, "John Smith", Some("C1")));
        store.upsert(&stored).unwrap();

        let mut resolver = EntityResolver::new();
        let outcome = resolver.resolve_file(&store, "c.csv", vec![customer(1, "John Smith", Some("C9"))]);

        assert_eq!(outcome.units[0].decision, Decision::Insert);
    }
}
