// ==========================================
// 汽修厂管理系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::EntityKind;
use crate::importer::error::ImportResult;
use async_trait::async_trait;
use std::collections::HashMap;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
// 约定: 返回 None 表示未配置,由调用方使用内置默认值
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    /// 获取批次大小（写入单元数）
    ///
    /// # 默认值
    /// - 1000
    async fn get_batch_size(&self) -> ImportResult<Option<usize>>;

    /// 获取同类文件并发预读数
    ///
    /// # 默认值
    /// - 2
    async fn get_workers(&self) -> ImportResult<Option<usize>>;

    /// 获取单批次软超时（秒）,超时仅输出进度心跳
    ///
    /// # 默认值
    /// - 10
    async fn get_heartbeat_secs(&self) -> ImportResult<Option<u64>>;

    /// 获取编码探测样本大小（字节）
    ///
    /// # 默认值
    /// - 8192
    async fn get_sniff_sample_bytes(&self) -> ImportResult<Option<usize>>;

    /// 获取追加表头同义词
    ///
    /// # 返回
    /// - { 表头文本 → 规范字段名 },未配置时为空
    async fn get_extra_synonyms(&self, kind: EntityKind) -> ImportResult<HashMap<String, String>>;
}
