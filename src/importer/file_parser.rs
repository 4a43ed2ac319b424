// ==========================================
// 汽修厂管理系统 - 文件解析器实现
// ==========================================
// 阶段 0: 文件读取 → 指纹 → 编码/分隔符探测 → 按行切分
// 支持: CSV（任意候选分隔符）
// ==========================================

use crate::domain::record::{FieldWarning, RawRow};
use crate::importer::encoding_sniffer::{self, SniffResult, DEFAULT_SAMPLE_BYTES};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::importer_trait::FileParser;
use csv::ReaderBuilder;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

// ==========================================
// ParsedFile - 解析结果
// ==========================================
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file: Arc<str>,
    pub fingerprint: String,       // SHA-256（十六进制）
    pub sniff: SniffResult,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub warnings: Vec<FieldWarning>,
}

/// 文件内容指纹
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ==========================================
// CsvFileParser - CSV 解析器
// ==========================================
pub struct CsvFileParser {
    sample_bytes: usize,
}

impl CsvFileParser {
    pub fn new(sample_bytes: usize) -> Self {
        Self {
            sample_bytes: sample_bytes.max(1),
        }
    }

    /// 由内存字节解析（文件读取之后的全部步骤）
    pub fn parse_bytes(&self, file: &str, bytes: &[u8]) -> ImportResult<ParsedFile> {
        let sample_len = bytes.len().min(self.sample_bytes);
        let sniff = encoding_sniffer::sniff(&bytes[..sample_len], sample_len < bytes.len())?;

        let mut warnings = Vec::new();
        if sniff.low_confidence {
            warnings.push(FieldWarning::file(
                "编码/分隔符探测置信度低,按 UTF-8 + 逗号处理",
            ));
        }

        let (text, replaced) = sniff.encoding.decode_lossy(bytes);
        if replaced {
            warn!(file = %file, encoding = %sniff.encoding, "解码时替换了无效字节");
            warnings.push(FieldWarning::file(format!(
                "按 {} 解码时存在无效字节,已替换",
                sniff.encoding
            )));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(sniff.delimiter)
            .flexible(true) // 允许行长度不一致
            .from_reader(text.as_bytes());

        // 读取表头
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let file_id: Arc<str> = Arc::from(file);
        let mut rows = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            let row = RawRow {
                file: Arc::clone(&file_id),
                row_number: idx + 1,
                cells: record.iter().map(|c| c.to_string()).collect(),
            };

            // 跳过完全空白的行
            if row.is_blank() {
                continue;
            }
            rows.push(row);
        }

        debug!(
            file = %file,
            encoding = %sniff.encoding,
            delimiter = %sniff.delimiter_label(),
            rows = rows.len(),
            "文件解析完成"
        );

        Ok(ParsedFile {
            file: file_id,
            fingerprint: fingerprint(bytes),
            sniff,
            headers,
            rows,
            warnings,
        })
    }
}

impl Default for CsvFileParser {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_BYTES)
    }
}

impl FileParser for CsvFileParser {
    fn parse_file(&self, file_path: &Path) -> ImportResult<ParsedFile> {
        // 检查文件存在
        if !file_path.is_file() {
            return Err(ImportError::FileReadError(format!(
                "文件不存在: {}",
                file_path.display()
            )));
        }

        let bytes = std::fs::read(file_path)?;
        self.parse_bytes(&file_path.display().to_string(), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::encoding_sniffer::TextEncoding;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_semicolon_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "Name;Registration").unwrap();
        writeln!(temp, "John Smith;AB12 XYZ").unwrap();
        writeln!(temp, ";").unwrap();
        writeln!(temp, "Jane Doe;CD34 ABC").unwrap();

        let parsed = CsvFileParser::default().parse_file(temp.path()).unwrap();

        assert_eq!(parsed.headers, vec!["Name", "Registration"]);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].row_number, 1);
        // 空白行跳过,但行号保持源文件位置
        assert_eq!(parsed.rows[1].row_number, 3);
        assert_eq!(parsed.rows[1].cell(1), Some("CD34 ABC"));
        assert_eq!(parsed.fingerprint.len(), 64);
    }

    #[test]
    fn test_parse_windows_1252_bytes() {
        let parsed = CsvFileParser::default()
            .parse_bytes("Invoices.csv", b"Invoice Number,Total\r\nINV-1,\xA3120.00\r\n")
            .unwrap();

        assert_eq!(parsed.sniff.encoding, TextEncoding::Windows1252);
        assert_eq!(parsed.rows[0].cell(1), Some("£120.00"));
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_quoted_delimiter_kept_in_cell() {
        let parsed = CsvFileParser::default()
            .parse_bytes("Customers.csv", b"Name,Address\n\"Smith, John\",\"1 High St, Leeds\"\n")
            .unwrap();
        assert_eq!(parsed.rows[0].cell(0), Some("Smith, John"));
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
    }

    #[test]
    fn test_missing_file() {
        let result = CsvFileParser::default().parse_file(Path::new("/no/such/Customers.csv"));
        assert!(matches!(result, Err(ImportError::FileReadError(_))));
    }
}
