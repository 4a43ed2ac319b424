// ==========================================
// 汽修厂管理系统 - 编码与分隔符探测
// ==========================================
// 职责: 由文件头部字节样本判定文本编码与字段分隔符
// 红线: 纯函数,无 IO、无副作用
// ==========================================
// 候选编码（按序）: UTF-8 BOM → UTF-8 → Windows-1252 → Latin-1
// 候选分隔符（按序）: , ; | \t
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// Windows-1252 未定义码位,视为解码失败以便回退到 Latin-1
const CP1252_UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

/// 候选分隔符（顺序即并列时的优先级）
pub const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'|', b'\t'];

/// 默认样本大小（字节）
pub const DEFAULT_SAMPLE_BYTES: usize = 8 * 1024;

// ==========================================
// TextEncoding - 文本编码
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    Utf8Bom,
    Utf8,
    Windows1252,
    Latin1,
}

impl TextEncoding {
    pub const CANDIDATES: [TextEncoding; 4] = [
        TextEncoding::Utf8Bom,
        TextEncoding::Utf8,
        TextEncoding::Windows1252,
        TextEncoding::Latin1,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8Bom => "utf-8-bom",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Latin1 => "latin-1",
        }
    }

    /// 严格解码样本
    ///
    /// # 参数
    /// - bytes: 样本字节
    /// - truncated: 样本是否截断自更大的文件（截断处的半个 UTF-8 字符不算错误）
    ///
    /// # 返回
    /// - Some(text): 解码成功
    /// - None: 存在解码错误
    fn try_decode<'a>(&self, bytes: &'a [u8], truncated: bool) -> Option<Cow<'a, str>> {
        match self {
            TextEncoding::Utf8Bom => {
                let body = bytes.strip_prefix(UTF8_BOM)?;
                decode_utf8_strict(body, truncated)
            }
            TextEncoding::Utf8 => decode_utf8_strict(bytes, truncated),
            TextEncoding::Windows1252 => {
                if bytes.iter().any(|b| CP1252_UNDEFINED.contains(b)) {
                    return None;
                }
                let (text, had_errors) =
                    encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
                if had_errors {
                    None
                } else {
                    Some(text)
                }
            }
            TextEncoding::Latin1 => Some(encoding_rs::mem::decode_latin1(bytes)),
        }
    }

    /// 解码整个文件（容错）
    ///
    /// # 返回
    /// - (文本, 是否发生替换)
    pub fn decode_lossy<'a>(&self, bytes: &'a [u8]) -> (Cow<'a, str>, bool) {
        match self {
            TextEncoding::Utf8Bom | TextEncoding::Utf8 => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                encoding_rs::UTF_8.decode_without_bom_handling(body)
            }
            TextEncoding::Windows1252 => encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes),
            TextEncoding::Latin1 => (encoding_rs::mem::decode_latin1(bytes), false),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn decode_utf8_strict(bytes: &[u8], truncated: bool) -> Option<Cow<'_, str>> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(Cow::Borrowed(text)),
        // error_len() == None: 末尾字符被截断,而非非法字节
        Err(e) if truncated && e.error_len().is_none() => {
            std::str::from_utf8(&bytes[..e.valid_up_to()])
                .ok()
                .map(Cow::Borrowed)
        }
        Err(_) => None,
    }
}

// ==========================================
// SniffResult - 探测结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffResult {
    pub encoding: TextEncoding,
    pub delimiter: u8,
    pub low_confidence: bool,
}

impl SniffResult {
    pub fn delimiter_label(&self) -> String {
        match self.delimiter {
            b'\t' => "\\t".to_string(),
            other => (other as char).to_string(),
        }
    }
}

/// 探测编码与分隔符
///
/// # 参数
/// - sample: 文件头部样本
/// - truncated: 样本是否短于整个文件
///
/// # 返回
/// - Ok(SniffResult): 探测结果（无法确定时 low_confidence = true,逗号 + UTF-8）
/// - Err(ImportError::Encoding): 空文件或二进制内容
pub fn sniff(sample: &[u8], truncated: bool) -> ImportResult<SniffResult> {
    if sample.is_empty() {
        return Err(ImportError::Encoding("文件为空".to_string()));
    }
    if sample.contains(&0u8) {
        return Err(ImportError::Encoding(
            "包含 NUL 字节,疑似二进制或 UTF-16 文件".to_string(),
        ));
    }

    let decoded = TextEncoding::CANDIDATES
        .iter()
        .find_map(|enc| enc.try_decode(sample, truncated).map(|text| (*enc, text)));

    if let Some((encoding, text)) = decoded {
        if let Some(delimiter) = pick_delimiter(first_line(&text)) {
            return Ok(SniffResult {
                encoding,
                delimiter,
                low_confidence: false,
            });
        }
    }

    Ok(SniffResult {
        encoding: TextEncoding::Utf8,
        delimiter: b',',
        low_confidence: true,
    })
}

fn first_line(text: &str) -> &str {
    let line = text.split('\n').next().unwrap_or("");
    line.strip_suffix('\r').unwrap_or(line)
}

/// 在首行中统计引号外各候选分隔符出现次数
///
/// 取次数最多者（须 ≥ 1,即至少切出两列）；并列按候选顺序
fn pick_delimiter(line: &str) -> Option<u8> {
    let mut counts = [0usize; DELIMITER_CANDIDATES.len()];
    let mut in_quotes = false;

    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(idx) = DELIMITER_CANDIDATES.iter().position(|d| *d == byte) {
            counts[idx] += 1;
        }
    }

    let mut best: Option<(u8, usize)> = None;
    for (idx, count) in counts.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        match best {
            Some((_, best_count)) if *count <= best_count => {}
            _ => best = Some((DELIMITER_CANDIDATES[idx], *count)),
        }
    }
    best.map(|(delimiter, _)| delimiter)
}
