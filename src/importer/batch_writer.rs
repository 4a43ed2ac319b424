// ==========================================
// 汽修厂管理系统 - 批量写入
// ==========================================
// 职责: 按固定大小分批,每批一个事务,提交后记录断点
// 失败: 批次事务失败 → 回滚 → 逐行重试（非事务）
// 取消: 仅在批次边界生效,批次要么全部提交要么全部回滚
// ==========================================

use crate::domain::record::RowError;
use crate::domain::types::{EntityId, EntityKind};
use crate::importer::entity_resolver::{Decision, ResolvedUnit};
use crate::importer::error::ImportError;
use crate::repository::entity_store::{Checkpoint, ImportStore};
use crate::repository::error::RepositoryResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 写入上下文（单文件）
#[derive(Debug, Clone)]
pub struct WriteContext<'a> {
    pub file: &'a str,
    pub fingerprint: &'a str,
    pub entity_kind: EntityKind,
    pub resume_from: usize, // 断点中已提交的写入单元数
}

/// 单文件写入结果
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub unlinked: usize,
    pub errors: Vec<RowError>,
    pub assigned: Vec<(usize, EntityId)>, // (待定槽位, 实体 ID)
    pub failed_slots: Vec<usize>,         // 写入失败的待定槽位
    pub committed_units: usize,
    pub first_failed: Option<usize>, // 首个写入失败单元的序号,断点不越过它
    pub retried_batches: usize,
    pub cancelled: bool,
}

impl WriteOutcome {
    fn count(&mut self, unit: &ResolvedUnit) {
        match unit.decision {
            Decision::Insert => self.inserted += 1,
            Decision::Update { .. } => self.updated += 1,
            Decision::NoOp => self.unchanged += 1,
        }
        for folded in &unit.folded_rows {
            if folded.changed && unit.decision.needs_write() {
                self.updated += 1;
            } else {
                self.unchanged += 1;
            }
        }
        if unit.unlinked {
            self.unlinked += 1;
        }
    }

    /// 断点可推进到的单元数
    fn checkpoint_units(&self, upto: usize) -> usize {
        self.first_failed.map_or(upto, |index| index.min(upto))
    }

    fn fail(&mut self, index: usize, unit: &ResolvedUnit, reason: &str) {
        self.failed_slots.push(unit.slot);
        self.first_failed.get_or_insert(index);
        for row in unit.rows() {
            self.errors
                .push(RowError::new(row, format!("写入失败: {}", reason)));
        }
        self.skipped += unit.row_count();
    }
}

// ==========================================
// BatchWriter
// ==========================================
pub struct BatchWriter<'a, S: ImportStore + ?Sized> {
    store: &'a S,
    batch_size: usize,
    heartbeat: Duration,
    dry_run: bool,
    cancel: &'a AtomicBool,
}

impl<'a, S: ImportStore + ?Sized> BatchWriter<'a, S> {
    pub fn new(
        store: &'a S,
        batch_size: usize,
        heartbeat: Duration,
        dry_run: bool,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            heartbeat,
            dry_run,
            cancel,
        }
    }

    /// 写入一个文件的全部单元
    ///
    /// # 参数
    /// - ctx: 文件上下文（断点续传从 resume_from 之后开始）
    /// - units: 按源顺序排列的写入单元
    ///
    /// # 返回
    /// - WriteOutcome: 计数、行错误、需回填的实体 ID
    pub fn write(&self, ctx: &WriteContext<'_>, units: &[ResolvedUnit]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();

        // 断点之前的单元已提交;重新判定后仍需写入的单元说明并未落库,从它开始
        let resume_from = ctx.resume_from.min(units.len());
        let resume_from = units[..resume_from]
            .iter()
            .position(|unit| unit.decision.needs_write())
            .unwrap_or(resume_from);
        let (committed, remaining) = units.split_at(resume_from);
        for unit in committed {
            outcome.count(unit);
            if let Some(id) = unit.record.id {
                outcome.assigned.push((unit.slot, id));
            }
        }
        outcome.committed_units = resume_from;
        if resume_from > 0 {
            info!(file = %ctx.file, units = resume_from, "从断点继续,跳过已提交单元");
        }

        for (batch_index, chunk) in remaining.chunks(self.batch_size).enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                info!(
                    file = %ctx.file,
                    committed = outcome.committed_units,
                    "收到取消请求,在批次边界停止"
                );
                outcome.cancelled = true;
                break;
            }

            if self.dry_run {
                for unit in chunk {
                    outcome.count(unit);
                }
                outcome.committed_units += chunk.len();
                continue;
            }

            let checkpoint = Checkpoint {
                fingerprint: ctx.fingerprint.to_string(),
                file_path: ctx.file.to_string(),
                entity_kind: ctx.entity_kind,
                committed_units: outcome.checkpoint_units(outcome.committed_units + chunk.len()),
                last_row: chunk.last().map(ResolvedUnit::last_row).unwrap_or(0),
                completed: false,
            };

            match self.apply_batch(ctx, batch_index, chunk, &checkpoint) {
                Ok(ids) => {
                    for (unit, id) in chunk.iter().zip(ids) {
                        outcome.count(unit);
                        if let Some(id) = id {
                            outcome.assigned.push((unit.slot, id));
                        }
                    }
                    debug!(
                        file = %ctx.file,
                        batch = batch_index,
                        units = chunk.len(),
                        "批次已提交"
                    );
                }
                Err(e) => {
                    let err = ImportError::Batch {
                        batch: batch_index,
                        message: e.to_string(),
                    };
                    warn!(file = %ctx.file, error = %err, "批次事务失败,逐行重试");
                    outcome.retried_batches += 1;
                    self.retry_rows(ctx, chunk, &checkpoint, &mut outcome);
                }
            }
            outcome.committed_units += chunk.len();
        }

        outcome
    }

    /// 单事务写入一个批次（含断点）
    fn apply_batch(
        &self,
        ctx: &WriteContext<'_>,
        batch_index: usize,
        chunk: &[ResolvedUnit],
        checkpoint: &Checkpoint,
    ) -> RepositoryResult<Vec<Option<EntityId>>> {
        self.store.begin()?;

        let mut beat = Instant::now();
        let mut run = || -> RepositoryResult<Vec<Option<EntityId>>> {
            let mut ids = Vec::with_capacity(chunk.len());
            for (i, unit) in chunk.iter().enumerate() {
                ids.push(self.write_unit(unit)?);

                if beat.elapsed() >= self.heartbeat {
                    info!(
                        file = %ctx.file,
                        batch = batch_index,
                        written = i + 1,
                        total = chunk.len(),
                        "批次写入进行中"
                    );
                    beat = Instant::now();
                }
            }
            self.store.save_checkpoint(checkpoint)?;
            self.store.commit()?;
            Ok(ids)
        };
        let result = run();

        if result.is_err() {
            if let Err(e) = self.store.rollback() {
                warn!(file = %ctx.file, error = %e, "批次回滚失败");
            }
        }
        result
    }

    /// 逐行重试（非事务）,单行失败不影响其余行
    fn retry_rows(
        &self,
        ctx: &WriteContext<'_>,
        chunk: &[ResolvedUnit],
        checkpoint: &Checkpoint,
        outcome: &mut WriteOutcome,
    ) {
        let offset = outcome.committed_units;
        for (i, unit) in chunk.iter().enumerate() {
            match self.write_unit(unit) {
                Ok(id) => {
                    outcome.count(unit);
                    if let Some(id) = id {
                        outcome.assigned.push((unit.slot, id));
                    }
                }
                Err(e) => {
                    warn!(file = %ctx.file, row = unit.first_row, error = %e, "行写入失败");
                    outcome.fail(offset + i, unit, &e.to_string());
                }
            }
        }

        // 失败行之后的单元不计入断点,续传时重新写入
        let checkpoint = Checkpoint {
            committed_units: outcome.checkpoint_units(checkpoint.committed_units),
            ..checkpoint.clone()
        };
        if let Err(e) = self.store.save_checkpoint(&checkpoint) {
            warn!(file = %ctx.file, error = %e, "断点保存失败");
        }
    }

    fn write_unit(&self, unit: &ResolvedUnit) -> RepositoryResult<Option<EntityId>> {
        if unit.decision.needs_write() {
            self.store.upsert(&unit.record).map(Some)
        } else {
            Ok(unit.record.id)
        }
    }
}
