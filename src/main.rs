// ==========================================
// 汽修厂管理系统 - 命令行主入口
// ==========================================
// 用法: garage-import run-import --dir <目录> [--dry-run] [--batch-size N]
// 退出码: 0 = 全部成功, 1 = 存在文件/行错误, 2 = 致命配置错误
// ==========================================

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use garage_import::config::{default_db_path, ConfigManager, ConfigOverrides, ImportConfig};
use garage_import::i18n::{self, t, t_with_args};
use garage_import::importer::{DirectoryImporter, ImportError, ImportOrchestrator};
use garage_import::repository::SqliteEntityStore;
use garage_import::{logging, ImportReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "garage-import")]
#[command(about = "汽修厂管理系统 - 历史导出数据导入工具")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 导入目录下的 CSV 导出文件
    RunImport(RunImportArgs),
}

#[derive(Args, Debug)]
struct RunImportArgs {
    /// 导出文件所在目录
    #[arg(long, env = "GARAGE_IMPORT_DIR")]
    dir: PathBuf,

    /// SQLite 数据库路径（默认: <数据目录>/garage-import/garage.db）
    #[arg(long, env = "GARAGE_IMPORT_DB")]
    db: Option<PathBuf>,

    /// 只预演,不写入任何数据
    #[arg(long)]
    dry_run: bool,

    /// 每个事务的写入单元数
    #[arg(long)]
    batch_size: Option<usize>,

    /// 同类文件并发预读数
    #[arg(long)]
    workers: Option<usize>,

    /// JSON 报告输出路径
    #[arg(long)]
    report: Option<PathBuf>,

    /// 日志输出为 JSON
    #[arg(long)]
    log_json: bool,

    /// 输出语言（zh-CN / en）
    #[arg(long, default_value = "zh-CN")]
    lang: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::RunImport(args) => {
            logging::init(args.log_json);
            i18n::set_locale(&args.lang);

            let cancel = Arc::new(AtomicBool::new(false));
            spawn_ctrl_c_handler(Arc::clone(&cancel));

            match run_import(args, cancel).await {
                Ok(code) => ExitCode::from(code),
                Err(e) => {
                    let message = fatal_message(&e);
                    error!(error = %format!("{:#}", e), "导入终止");
                    eprintln!("{}", message);
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }
    }
}

/// Ctrl-C 只设置取消标志,由写入方在批次边界响应
fn spawn_ctrl_c_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("{}", t("cli.cancel_requested"));
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

async fn run_import(args: RunImportArgs, cancel: Arc<AtomicBool>) -> anyhow::Result<u8> {
    let db_path = args.db.clone().unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ImportError::StorageUnavailable(format!("{}: {}", parent.display(), e)))?;
    }

    let store = SqliteEntityStore::new(&db_path.to_string_lossy())
        .map_err(|e| ImportError::StorageUnavailable(e.to_string()))?;
    let config_manager = ConfigManager::from_connection(store.connection())?;

    let overrides = ConfigOverrides {
        batch_size: args.batch_size,
        workers: args.workers,
        dry_run: args.dry_run,
    };
    let config = ImportConfig::new(args.dir.clone(), db_path.clone())
        .resolve(&config_manager, &overrides)
        .await?;

    info!(
        db = %db_path.display(),
        batch_size = config.batch_size,
        workers = config.workers,
        "{}",
        t_with_args("cli.starting", &[("path", &args.dir.display().to_string())])
    );

    let orchestrator = ImportOrchestrator::new(config, Arc::new(store))?.with_cancel_flag(cancel);
    let report = orchestrator.run_import().await?;

    println!("{}", i18n::render_summary(&report));

    if let Some(path) = &args.report {
        match write_report(path, &report) {
            Ok(()) => info!("{}", t_with_args("cli.report_written", &[("path", &path.display().to_string())])),
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!("{}", t_with_args("cli.report_write_failed", &[("reason", &reason)]));
            }
        }
    }

    Ok(report.exit_code() as u8)
}

fn write_report(path: &Path, report: &ImportReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("报告序列化失败")?;
    std::fs::write(path, json).with_context(|| format!("无法写入 {}", path.display()))?;
    Ok(())
}

fn fatal_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ImportError>() {
        Some(ImportError::InvalidRoot(path)) => t_with_args("cli.invalid_root", &[("path", path)]),
        Some(ImportError::StorageUnavailable(reason)) => {
            t_with_args("cli.storage_unavailable", &[("reason", reason)])
        }
        Some(e @ ImportError::Config { .. }) => {
            t_with_args("cli.config_error", &[("reason", &e.to_string())])
        }
        _ => format!("{:#}", err),
    }
}
