// ==========================================
// 汽修厂管理系统 - 表头映射器
// ==========================================
// 职责: 原始表头 → 规范字段（HeaderMap）,按表头元组缓存
// 规则:
//   1. 同义词精确匹配（含配置追加的同义词）
//   2. 关键字包含匹配,多字段命中时最长关键字胜出
//   3. 未映射列保留为扩展属性,并给出原因
//   同一字段多列命中: 精确优先于关键字,其次列序靠前者
// ==========================================

use crate::domain::types::EntityKind;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::synonym_table::{normalize_header, schema_for, FieldSpec};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ==========================================
// MatchReason - 映射原因（可解释）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    Synonym(&'static str),
    ConfiguredSynonym(String),
    Keyword(&'static str),
    EmptyHeader,
    NoMatch,
    /// 字段已被其他列占用
    Superseded { field: &'static str, by_column: usize },
}

impl MatchReason {
    fn is_exact(&self) -> bool {
        matches!(self, MatchReason::Synonym(_) | MatchReason::ConfiguredSynonym(_))
    }

    pub fn describe(&self) -> String {
        match self {
            MatchReason::Synonym(s) => format!("同义词精确匹配 '{}'", s),
            MatchReason::ConfiguredSynonym(s) => format!("配置同义词精确匹配 '{}'", s),
            MatchReason::Keyword(k) => format!("包含关键字 '{}'", k),
            MatchReason::EmptyHeader => "表头为空".to_string(),
            MatchReason::NoMatch => "无同义词或关键字命中".to_string(),
            MatchReason::Superseded { field, by_column } => {
                format!("字段 {} 已由第 {} 列映射", field, by_column + 1)
            }
        }
    }
}

// ==========================================
// MappingDecision - 单列映射决策
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDecision {
    pub column: usize,
    pub header: String,
    pub field: Option<&'static FieldSpec>,
    pub reason: MatchReason,
}

/// 单个表头的匹配（纯函数）
///
/// # 参数
/// - kind: 目标实体种类
/// - header: 原始表头
/// - extra: 追加同义词（归一化表头 → 字段）
pub fn match_header(
    kind: EntityKind,
    column: usize,
    header: &str,
    extra: Option<&HashMap<String, &'static FieldSpec>>,
) -> MappingDecision {
    let schema = schema_for(kind);
    let normalized = normalize_header(header);
    let decision = |field, reason| MappingDecision {
        column,
        header: header.to_string(),
        field,
        reason,
    };

    if normalized.is_empty() {
        return decision(None, MatchReason::EmptyHeader);
    }

    // 1. 精确匹配
    if let Some(spec) = schema
        .fields
        .iter()
        .find(|spec| spec.synonyms.contains(&normalized.as_str()))
    {
        let synonym = spec
            .synonyms
            .iter()
            .find(|s| **s == normalized)
            .copied()
            .unwrap_or(spec.name);
        return decision(Some(spec), MatchReason::Synonym(synonym));
    }
    if let Some(spec) = extra.and_then(|m| m.get(&normalized)) {
        return decision(Some(*spec), MatchReason::ConfiguredSynonym(normalized));
    }

    // 2. 关键字匹配（最长关键字胜出,等长取声明顺序靠前者）
    let mut best: Option<(&'static FieldSpec, &'static str)> = None;
    for spec in schema.fields {
        for keyword in spec.keywords {
            if !normalized.contains(keyword) {
                continue;
            }
            match best {
                Some((_, current)) if keyword.len() <= current.len() => {}
                _ => best = Some((spec, keyword)),
            }
        }
    }

    match best {
        Some((spec, keyword)) => decision(Some(spec), MatchReason::Keyword(keyword)),
        None => decision(None, MatchReason::NoMatch),
    }
}

// ==========================================
// HeaderMap - 列 → 规范字段
// ==========================================
// 构建后不可变
#[derive(Debug)]
pub struct HeaderMap {
    pub kind: EntityKind,
    decisions: Vec<MappingDecision>,
    by_field: HashMap<&'static str, usize>,
    extensions: Vec<(usize, String)>,
}

impl HeaderMap {
    fn build(
        kind: EntityKind,
        headers: &[String],
        extra: Option<&HashMap<String, &'static FieldSpec>>,
    ) -> Self {
        let mut decisions: Vec<MappingDecision> = headers
            .iter()
            .enumerate()
            .map(|(col, header)| match_header(kind, col, header, extra))
            .collect();

        // 同一字段多列命中: 精确 > 关键字,其次列序
        let mut by_field: HashMap<&'static str, usize> = HashMap::new();
        for idx in 0..decisions.len() {
            let Some(spec) = decisions[idx].field else {
                continue;
            };
            match by_field.get(spec.name).copied() {
                None => {
                    by_field.insert(spec.name, idx);
                }
                Some(holder) => {
                    let (winner, loser) =
                        if decisions[idx].reason.is_exact() && !decisions[holder].reason.is_exact() {
                            (idx, holder)
                        } else {
                            (holder, idx)
                        };
                    by_field.insert(spec.name, winner);
                    decisions[loser].field = None;
                    decisions[loser].reason = MatchReason::Superseded {
                        field: spec.name,
                        by_column: winner,
                    };
                }
            }
        }

        let mut used_names = HashSet::new();
        let extensions = decisions
            .iter()
            .filter(|d| d.field.is_none())
            .map(|d| {
                let base = match d.header.trim() {
                    "" => format!("column_{}", d.column + 1),
                    other => other.to_string(),
                };
                let name = if used_names.contains(&base) {
                    format!("{}_{}", base, d.column + 1)
                } else {
                    base
                };
                used_names.insert(name.clone());
                (d.column, name)
            })
            .collect();

        Self {
            kind,
            decisions,
            by_field,
            extensions,
        }
    }

    /// 字段对应的列
    pub fn column_of(&self, field: &str) -> Option<usize> {
        self.by_field.get(field).copied()
    }

    /// 已映射字段（列序）
    pub fn mapped_fields(&self) -> impl Iterator<Item = (usize, &'static FieldSpec)> + '_ {
        self.decisions
            .iter()
            .filter_map(|d| d.field.map(|spec| (d.column, spec)))
    }

    /// 扩展列（列号, 扩展属性名）
    pub fn extension_columns(&self) -> &[(usize, String)] {
        &self.extensions
    }

    pub fn decisions(&self) -> &[MappingDecision] {
        &self.decisions
    }

    /// 未满足的必填规则
    pub fn missing_required(&self) -> Vec<String> {
        schema_for(self.kind)
            .required
            .iter()
            .filter(|group| !group.iter().any(|f| self.by_field.contains_key(f)))
            .map(|group| group.join(" / "))
            .collect()
    }
}

// ==========================================
// SchemaMapper - 带缓存的映射器
// ==========================================
pub struct SchemaMapper {
    extra: HashMap<EntityKind, HashMap<String, &'static FieldSpec>>,
    cache: Mutex<HashMap<(EntityKind, Vec<String>), Arc<HeaderMap>>>,
}

impl SchemaMapper {
    pub fn new() -> Self {
        Self {
            extra: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 追加配置同义词
    ///
    /// # 参数
    /// - extra: 实体种类 → { 表头文本 → 规范字段名 }
    ///
    /// # 返回
    /// - Err(ImportError::Config): 字段名不属于该实体种类
    pub fn with_extra_synonyms(
        extra: &HashMap<EntityKind, HashMap<String, String>>,
    ) -> ImportResult<Self> {
        let mut resolved = HashMap::new();
        for (kind, entries) in extra {
            let schema = schema_for(*kind);
            let mut table = HashMap::new();
            for (header, field_name) in entries {
                let spec = schema.field(field_name).ok_or_else(|| ImportError::Config {
                    key: format!("import.synonyms.{}", kind),
                    value: field_name.clone(),
                    message: format!("{} 没有规范字段 {}", kind, field_name),
                })?;
                table.insert(normalize_header(header), spec);
            }
            resolved.insert(*kind, table);
        }

        Ok(Self {
            extra: resolved,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// 映射表头
    ///
    /// # 返回
    /// - Ok(HeaderMap): 全部必填规则满足
    /// - Err(ImportError::Schema): 列出缺失的必填字段,整文件拒绝
    pub fn map_headers(&self, kind: EntityKind, headers: &[String]) -> ImportResult<Arc<HeaderMap>> {
        let cache_key = (kind, headers.to_vec());

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&cache_key)
            .cloned();

        let map = match cached {
            Some(map) => {
                debug!(kind = %kind, "表头模板命中缓存");
                map
            }
            None => {
                let map = Arc::new(HeaderMap::build(kind, headers, self.extra.get(&kind)));
                for decision in map.decisions() {
                    debug!(
                        kind = %kind,
                        column = decision.column,
                        header = %decision.header,
                        field = decision.field.map(|f| f.name).unwrap_or("-"),
                        reason = %decision.reason.describe(),
                        "表头映射"
                    );
                }
                self.cache
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(cache_key, Arc::clone(&map));
                map
            }
        };

        let missing = map.missing_required();
        if !missing.is_empty() {
            return Err(ImportError::Schema { missing });
        }
        Ok(map)
    }

    /// 已缓存的表头模板数
    pub fn cached_templates(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for SchemaMapper {
    fn default() -> Self {
        Self::new()
    }
}
