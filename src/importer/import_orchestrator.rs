// ==========================================
// 汽修厂管理系统 - 导入编排器
// ==========================================
// 职责: 扫描目录、按依赖顺序处理文件、汇总导入报告
// 流程: 探测 → 表头映射 → 清洗 → 实体判定 → 分批落库 → 断点完成 → 导入日志
// 顺序: 客户 → 车辆 → 发票 → 单据,同类文件可并发预读,提交严格按文件顺序
// ==========================================

use crate::config::ImportConfig;
use crate::domain::record::RowError;
use crate::domain::report::{FileReport, ImportReport, ManualLinkEntry};
use crate::domain::types::EntityKind;
use crate::importer::batch_writer::{BatchWriter, WriteContext};
use crate::importer::entity_resolver::EntityResolver;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{CsvFileParser, ParsedFile};
use crate::importer::importer_trait::{DirectoryImporter, FileParser};
use crate::importer::record_normalizer::RecordNormalizer;
use crate::importer::schema_mapper::SchemaMapper;
use crate::repository::entity_store::{FileLogEntry, ImportStore};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// 按文件名关键字推断实体类型（多个关键字命中时取依赖顺序靠前者）
pub fn classify_file(path: &Path) -> Option<EntityKind> {
    let is_csv = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if !is_csv {
        return None;
    }

    let name = path.file_name()?.to_str()?.to_lowercase();
    EntityKind::IMPORT_ORDER
        .into_iter()
        .find(|kind| name.contains(kind.filename_keyword()))
}

/// 单文件处理结果
struct FileOutcome {
    report: FileReport,
    manual_linking: Vec<ManualLinkEntry>,
    cancelled: bool,
}

// ==========================================
// ImportOrchestrator
// ==========================================
pub struct ImportOrchestrator<S>
where
    S: ImportStore + 'static,
{
    config: ImportConfig,
    store: Arc<S>,
    parser: Arc<dyn FileParser>,
    mapper: SchemaMapper,
    normalizer: RecordNormalizer,
    cancel: Arc<AtomicBool>,
}

impl<S> ImportOrchestrator<S>
where
    S: ImportStore + 'static,
{
    /// 创建编排器
    ///
    /// # 参数
    /// - config: 已合并覆写项的运行配置
    /// - store: 存储协作方
    ///
    /// # 返回
    /// - Err(ImportError::Config): 追加同义词指向未知字段
    pub fn new(config: ImportConfig, store: Arc<S>) -> ImportResult<Self> {
        let mapper = SchemaMapper::with_extra_synonyms(&config.extra_synonyms)?;
        let parser: Arc<dyn FileParser> = Arc::new(CsvFileParser::new(config.sample_bytes));

        Ok(Self {
            config,
            store,
            parser,
            mapper,
            normalizer: RecordNormalizer::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 替换文件解析器
    pub fn with_parser(mut self, parser: Arc<dyn FileParser>) -> Self {
        self.parser = parser;
        self
    }

    /// 共享取消标志（Ctrl-C 处理器持有）
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// 扫描根目录,按实体类型归类（各类内按路径排序）
    pub fn discover_files(&self) -> BTreeMap<EntityKind, Vec<PathBuf>> {
        let mut files: BTreeMap<EntityKind, Vec<PathBuf>> = BTreeMap::new();

        for entry in WalkDir::new(&self.config.root_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            match classify_file(entry.path()) {
                Some(kind) => files.entry(kind).or_default().push(entry.path().to_path_buf()),
                None => debug!(file = %entry.path().display(), "文件名未匹配任何实体关键字,忽略"),
            }
        }

        for paths in files.values_mut() {
            paths.sort();
        }
        files
    }

    /// 并发预读同类文件（读取 + 指纹 + 探测 + 切行）,结果保持文件顺序
    async fn load_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, ImportResult<ParsedFile>)> {
        stream::iter(paths.to_vec())
            .map(|path| {
                let parser = Arc::clone(&self.parser);
                async move {
                    let target = path.clone();
                    let result = tokio::task::spawn_blocking(move || parser.parse_file(&target))
                        .await
                        .unwrap_or_else(|e| {
                            Err(ImportError::Other(anyhow::anyhow!("解析任务异常退出: {}", e)))
                        });
                    (path, result)
                }
            })
            .buffered(self.config.workers.max(1))
            .collect()
            .await
    }

    fn display_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.config.root_dir)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// 处理单个文件
    #[instrument(skip_all, fields(file = %path.display(), kind = %kind))]
    fn import_file(
        &self,
        kind: EntityKind,
        path: &Path,
        parsed: ImportResult<ParsedFile>,
        resolver: &mut EntityResolver,
        run_id: &str,
    ) -> FileOutcome {
        let start_time = Instant::now();
        let file_name = self.display_name(path);
        let mut report = FileReport::new(file_name.clone(), kind);

        // 1. 解析结果（编码无法识别 / 读取失败 → 跳过文件）
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "文件无法读取,跳过");
                report.fail(e.to_string());
                return FileOutcome {
                    report,
                    manual_linking: Vec::new(),
                    cancelled: false,
                };
            }
        };
        report.encoding = Some(parsed.sniff.encoding.label().to_string());
        report.delimiter = Some(parsed.sniff.delimiter_label());
        report.low_confidence = parsed.sniff.low_confidence;
        report.total_rows = parsed.rows.len();
        report.warnings.extend(parsed.warnings.iter().cloned());

        // 2. 表头映射（缺必填列 → 整个文件不处理）
        let header_map = match self.mapper.map_headers(kind, &parsed.headers) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "表头校验失败,跳过文件");
                report.fail(e.to_string());
                report.skipped = report.total_rows;
                return FileOutcome {
                    report,
                    manual_linking: Vec::new(),
                    cancelled: false,
                };
            }
        };

        // 3. 逐行清洗
        let mut records = Vec::with_capacity(parsed.rows.len());
        for row in &parsed.rows {
            match self.normalizer.normalize(row, &header_map) {
                Ok(record) => {
                    report.warnings.extend(record.warnings.iter().cloned());
                    records.push(record);
                }
                Err(row_error) => {
                    debug!(row = row.row_number, reason = %row_error.reason, "行被跳过");
                    report.errors.push(row_error);
                    report.skipped += 1;
                }
            }
        }

        // 4. 断点
        let resume_from = if self.config.dry_run {
            0
        } else {
            match self.store.load_checkpoint(&parsed.fingerprint) {
                Ok(Some(cp)) if !cp.completed && cp.entity_kind == kind => {
                    info!(committed = cp.committed_units, last_row = cp.last_row, "发现未完成断点");
                    report.resumed = true;
                    cp.committed_units
                }
                Ok(_) => 0,
                Err(e) => {
                    warn!(error = %e, "断点读取失败,从头导入");
                    0
                }
            }
        };

        // 5. 实体判定
        let resolved = resolver.resolve_file(self.store.as_ref(), &file_name, records);
        report.warnings.extend(resolved.warnings.iter().cloned());
        report.skipped += resolved.skipped_rows();
        report.errors.extend(resolved.errors.iter().cloned());

        // 6. 分批落库
        let writer = BatchWriter::new(
            self.store.as_ref(),
            self.config.batch_size,
            Duration::from_secs(self.config.heartbeat_secs),
            self.config.dry_run,
            &self.cancel,
        );
        let written = writer.write(
            &WriteContext {
                file: &file_name,
                fingerprint: &parsed.fingerprint,
                entity_kind: kind,
                resume_from,
            },
            &resolved.units,
        );
        for (slot, id) in &written.assigned {
            resolver.assign_id(*slot, *id);
        }
        for slot in &written.failed_slots {
            resolver.mark_failed(*slot);
        }

        report.inserted = written.inserted;
        report.updated = written.updated;
        report.unchanged = written.unchanged;
        report.skipped += written.skipped;
        report.unlinked = written.unlinked;
        report.errors.extend(written.errors);
        if written.cancelled {
            report.errors.push(RowError::file(format!(
                "导入已取消,已提交 {} 个写入单元,下次运行从断点继续",
                written.committed_units
            )));
        }

        // 7. 完成断点 + 导入日志
        let elapsed = start_time.elapsed();
        if !self.config.dry_run && !written.cancelled {
            if let Err(e) = self.store.complete_checkpoint(&parsed.fingerprint) {
                warn!(error = %e, "断点完成标记失败");
            }
            self.record_file_log(run_id, kind, path, &parsed.fingerprint, &report, elapsed);
        }

        info!(
            total_rows = report.total_rows,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            unlinked = report.unlinked,
            elapsed_ms = elapsed.as_millis() as u64,
            "文件导入完成"
        );

        FileOutcome {
            report,
            manual_linking: resolved.manual_linking,
            cancelled: written.cancelled,
        }
    }

    fn record_file_log(
        &self,
        run_id: &str,
        kind: EntityKind,
        path: &Path,
        fingerprint: &str,
        report: &FileReport,
        elapsed: Duration,
    ) {
        let report_json = match serde_json::to_string(report) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "文件报告序列化失败");
                String::from("{}")
            }
        };

        let entry = FileLogEntry {
            batch_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            file_path: path.display().to_string(),
            entity_kind: kind,
            fingerprint: Some(fingerprint.to_string()),
            total_rows: report.total_rows,
            inserted: report.inserted,
            updated: report.updated,
            unchanged: report.unchanged,
            skipped: report.skipped,
            unlinked: report.unlinked,
            elapsed_ms: elapsed.as_millis() as u64,
            report_json,
            imported_at: Utc::now().to_rfc3339(),
        };

        if let Err(e) = self.store.record_file_log(&entry) {
            warn!(error = %e, "导入日志写入失败");
        }
    }
}

#[async_trait]
impl<S> DirectoryImporter for ImportOrchestrator<S>
where
    S: ImportStore + 'static,
{
    async fn run_import(&self) -> ImportResult<ImportReport> {
        let root = &self.config.root_dir;
        if !root.is_dir() {
            return Err(ImportError::InvalidRoot(root.display().to_string()));
        }
        self.store
            .ping()
            .map_err(|e| ImportError::StorageUnavailable(e.to_string()))?;

        let run_id = Uuid::new_v4().to_string();
        let mut report = ImportReport::new(run_id.clone(), self.config.dry_run);
        let files = self.discover_files();

        info!(
            run_id = %run_id,
            root = %root.display(),
            files = files.values().map(Vec::len).sum::<usize>(),
            dry_run = self.config.dry_run,
            "开始导入"
        );

        let mut resolver = EntityResolver::new();
        'kinds: for kind in EntityKind::IMPORT_ORDER {
            let Some(paths) = files.get(&kind) else {
                continue;
            };

            // 同类文件全部完成后才进入下一类
            for (path, parsed) in self.load_files(paths).await {
                if self.cancel.load(Ordering::SeqCst) {
                    report.cancelled = true;
                    break 'kinds;
                }

                let outcome = self.import_file(kind, &path, parsed, &mut resolver, &run_id);
                report.manual_linking.extend(outcome.manual_linking);
                report.push_file(outcome.report);
                if outcome.cancelled {
                    report.cancelled = true;
                    break 'kinds;
                }
            }
        }

        info!(
            run_id = %run_id,
            files = report.files_processed,
            inserted = report.totals.inserted,
            updated = report.totals.updated,
            skipped = report.totals.skipped,
            unlinked = report.totals.unlinked,
            manual = report.manual_linking.len(),
            cancelled = report.cancelled,
            "导入结束"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_keyword() {
        assert_eq!(
            classify_file(Path::new("/x/Customers.csv")),
            Some(EntityKind::Customer)
        );
        assert_eq!(
            classify_file(Path::new("/x/vehicle_export_2024.CSV")),
            Some(EntityKind::Vehicle)
        );
        assert_eq!(classify_file(Path::new("/x/Invoices.csv")), Some(EntityKind::Invoice));
        assert_eq!(classify_file(Path::new("/x/appointments.csv")), None);
        assert_eq!(classify_file(Path::new("/x/Customers.xlsx")), None);
    }

    #[test]
    fn test_classify_multiple_keywords_takes_dependency_order() {
        assert_eq!(
            classify_file(Path::new("/x/vehicle_documents.csv")),
            Some(EntityKind::Vehicle)
        );
        assert_eq!(
            classify_file(Path::new("/x/customer_invoice.csv")),
            Some(EntityKind::Customer)
        );
    }
}
