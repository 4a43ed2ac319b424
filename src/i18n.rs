// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库
// 支持中文（默认）和英文,用于命令行输出的导入摘要
// ==========================================
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

use crate::domain::report::{FileReport, ImportReport};

/// 获取当前语言
pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 设置语言
///
/// # 参数
/// - locale: 语言代码（"zh-CN" 或 "en"）
pub fn set_locale(locale: &str) {
    rust_i18n::set_locale(locale);
}

/// 翻译消息（无参数）
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息（带参数）
///
/// # 示例
/// ```no_run
/// use garage_import::i18n::t_with_args;
/// let msg = t_with_args("cli.invalid_root", &[("path", "/tmp/exports")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    let mut result = rust_i18n::t!(key).to_string();
    for (k, v) in args {
        let placeholder = format!("%{{{}}}", k);
        result = result.replace(&placeholder, v);
    }
    result
}

fn file_line(file: &FileReport) -> String {
    let kind = file
        .entity_kind
        .map(|k| t(&format!("kind.{}", k.as_str())))
        .unwrap_or_default();

    t_with_args(
        "report.file_line",
        &[
            ("file", &file.file),
            ("kind", &kind),
            ("total", &file.total_rows.to_string()),
            ("inserted", &file.inserted.to_string()),
            ("updated", &file.updated.to_string()),
            ("unchanged", &file.unchanged.to_string()),
            ("skipped", &file.skipped.to_string()),
            ("unlinked", &file.unlinked.to_string()),
        ],
    )
}

/// 生成导入报告的人类可读摘要（按当前语言）
pub fn render_summary(report: &ImportReport) -> String {
    let mut lines = Vec::new();

    let title = if report.dry_run {
        t("report.title_dry_run")
    } else {
        t("report.title")
    };
    lines.push(title);

    for file in &report.per_file {
        lines.push(file_line(file));
        for error in &file.errors {
            let row = error
                .row
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            lines.push(t_with_args(
                "report.error_line",
                &[("row", &row), ("reason", &error.reason)],
            ));
        }
    }

    let totals = &report.totals;
    lines.push(t_with_args(
        "report.totals",
        &[
            ("files", &report.files_processed.to_string()),
            ("inserted", &totals.inserted.to_string()),
            ("updated", &totals.updated.to_string()),
            ("unchanged", &totals.unchanged.to_string()),
            ("skipped", &totals.skipped.to_string()),
            ("unlinked", &totals.unlinked.to_string()),
            ("warnings", &totals.warnings.to_string()),
        ],
    ));

    if !report.manual_linking.is_empty() {
        lines.push(t_with_args(
            "report.manual_linking",
            &[("count", &report.manual_linking.len().to_string())],
        ));
    }
    if report.cancelled {
        lines.push(t("report.cancelled"));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EntityKind;
    use std::sync::Mutex;

    // rust-i18n 的 locale 为全局状态，且 Rust 测试默认并行执行；
    // 为避免测试互相干扰，这里对 i18n 相关测试串行化。
    static LOCALE_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_set_locale() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        assert_eq!(current_locale(), "en");

        // 恢复默认语言
        set_locale("zh-CN");
        assert_eq!(current_locale(), "zh-CN");
    }

    #[test]
    fn test_translate_with_args() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("zh-CN");
        let msg = t_with_args("cli.invalid_root", &[("path", "/tmp/exports")]);
        assert!(msg.contains("/tmp/exports"));
        assert!(msg.contains("导入目录无效"));

        set_locale("en");
        let msg = t_with_args("cli.invalid_root", &[("path", "/tmp/exports")]);
        assert!(msg.contains("Invalid import directory"));

        set_locale("zh-CN");
    }

    #[test]
    fn test_render_summary_lists_files() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");

        let mut report = ImportReport::new("run-1", false);
        let mut file = FileReport::new("Customers.csv", EntityKind::Customer);
        file.total_rows = 3;
        file.inserted = 2;
        file.unchanged = 1;
        report.push_file(file);

        let summary = render_summary(&report);
        assert!(summary.contains("Customers.csv"));
        assert!(summary.contains("inserted 2"));

        set_locale("zh-CN");
    }
}
