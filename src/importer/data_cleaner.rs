// ==========================================
// 汽修厂管理系统 - 数据清洗器实现
// ==========================================
// 职责: 按值类别清洗单元格（文本/姓名/车牌/金额/日期/电话/邮箱/邮编/年份/编码）
// 红线: 单元格清洗失败只产生告警,是否阻断行由 RecordNormalizer 按必填规则决定
// ==========================================

use crate::domain::types::{FieldValue, ValueClass};
use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// 日期格式尝试顺序（日在前优先于月在前）
pub const DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%m/%d/%Y"];

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}")
        .expect("email pattern")
});

static UK_POSTCODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(GIR0AA|[A-Z]{1,2}[0-9][A-Z0-9]?[0-9][ABD-HJLNP-UW-Z]{2})$")
        .expect("postcode pattern")
});

// ==========================================
// Cleaned - 清洗结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum Cleaned {
    Value(FieldValue),
    Empty,
    /// 无法清洗: kept 为仍可保留的值（如格式不符的邮编）
    Invalid {
        kept: Option<FieldValue>,
        message: String,
    },
}

impl Cleaned {
    pub fn value(self) -> Option<FieldValue> {
        match self {
            Cleaned::Value(v) => Some(v),
            Cleaned::Invalid { kept, .. } => kept,
            Cleaned::Empty => None,
        }
    }
}

pub struct DataCleaner;

impl DataCleaner {
    /// 按值类别分派
    pub fn clean(&self, class: ValueClass, raw: &str) -> Cleaned {
        let Some(text) = self.clean_text(raw) else {
            return Cleaned::Empty;
        };

        match class {
            ValueClass::Text => Cleaned::Value(FieldValue::Text(text)),
            ValueClass::Name => Cleaned::Value(FieldValue::Text(self.title_case(&text))),
            ValueClass::Registration => match self.clean_registration(&text) {
                Some(reg) => Cleaned::Value(FieldValue::Text(reg)),
                None => invalid(format!("车牌无有效字符: '{}'", text)),
            },
            ValueClass::Code => Cleaned::Value(FieldValue::Text(
                text.chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_uppercase(),
            )),
            ValueClass::Money => match self.parse_money(&text) {
                Some(amount) => Cleaned::Value(FieldValue::Money(amount)),
                None => invalid(format!("金额无法解析: '{}'", text)),
            },
            ValueClass::Date => match self.parse_date(&text) {
                Some(date) => Cleaned::Value(FieldValue::Date(date)),
                None => invalid(format!("日期无法解析: '{}'", text)),
            },
            ValueClass::Phone => match self.clean_phone(&text) {
                Some(phone) => Cleaned::Value(FieldValue::Text(phone)),
                None => invalid(format!("电话号码位数不足: '{}'", text)),
            },
            ValueClass::Email => match self.clean_email(&text) {
                Some(email) => Cleaned::Value(FieldValue::Text(email)),
                None => invalid(format!("邮箱格式无效: '{}'", text)),
            },
            ValueClass::Postcode => {
                let (postcode, valid) = self.clean_postcode(&text);
                if valid {
                    Cleaned::Value(FieldValue::Text(postcode))
                } else {
                    Cleaned::Invalid {
                        message: format!("邮编格式不符: '{}'", text),
                        kept: Some(FieldValue::Text(postcode)),
                    }
                }
            }
            ValueClass::Year => match self.parse_year(&text) {
                Some(year) => Cleaned::Value(FieldValue::Year(year)),
                None => invalid(format!("年份无效: '{}'", text)),
            },
        }
    }

    /// 文本清洗: NFKC → TRIM → 去包裹引号 → 合并空白; 空串/NULL → None
    pub fn clean_text(&self, value: &str) -> Option<String> {
        let normalized: String = value.nfkc().collect();
        let mut trimmed = normalized.trim();
        for quote in ['"', '\''] {
            if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
                trimmed = trimmed[1..trimmed.len() - 1].trim();
            }
        }

        let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty()
            || collapsed.eq_ignore_ascii_case("null")
            || collapsed.eq_ignore_ascii_case("n/a")
        {
            None
        } else {
            Some(collapsed)
        }
    }

    /// 车牌: 大写,去除全部空白与标点
    pub fn clean_registration(&self, value: &str) -> Option<String> {
        let reg: String = value
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_uppercase)
            .collect();
        if reg.is_empty() {
            None
        } else {
            Some(reg)
        }
    }

    /// 姓名: 每个词首字母大写（连字符/撇号后同样大写）,已是大小写混排的词保持原样
    pub fn title_case(&self, value: &str) -> String {
        value
            .split(' ')
            .map(|word| {
                let has_upper = word.chars().any(char::is_uppercase);
                let has_lower = word.chars().any(char::is_lowercase);
                let first_upper = word.chars().next().map(char::is_uppercase).unwrap_or(false);
                if has_upper && has_lower && first_upper {
                    return word.to_string();
                }

                let mut out = String::with_capacity(word.len());
                let mut at_start = true;
                for c in word.chars() {
                    if at_start {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    at_start = c == '-' || c == '\'';
                }
                out
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 金额: 去货币符号与千分位,括号表示负数,定点 2 位小数
    pub fn parse_money(&self, value: &str) -> Option<BigDecimal> {
        let mut text = value.trim().to_string();
        let mut negative = false;
        if text.starts_with('(') && text.ends_with(')') {
            negative = true;
            text = text[1..text.len() - 1].to_string();
        }

        let upper = text.to_uppercase();
        let stripped = upper.trim_start_matches("GBP").trim_end_matches("GBP");
        let grouped: String = stripped
            .chars()
            .filter(|c| !matches!(c, '£' | '$' | '€' | ' '))
            .collect();
        if !thousands_grouping_ok(&grouped) {
            return None;
        }
        let cleaned = grouped.replace(',', "");
        if cleaned.is_empty() || cleaned.contains('E') {
            return None;
        }

        let amount = BigDecimal::from_str(&cleaned).ok()?.round(2);
        Some(if negative { -amount } else { amount })
    }

    /// 日期: 按 DATE_FORMATS 顺序尝试,其次取首个日期片段（去掉时间部分）
    pub fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        let text = value.trim();
        let token = text
            .split(|c: char| c.is_whitespace() || c == 'T')
            .next()
            .unwrap_or(text);

        [text, token]
            .iter()
            .find_map(|candidate| {
                DATE_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
            })
            .filter(|date| (MIN_YEAR..=MAX_YEAR).contains(&date.year()))
    }

    /// 电话: 取数字最多的号码片段,保留末尾 10-11 位国内号码
    pub fn clean_phone(&self, value: &str) -> Option<String> {
        let digits = value
            .split(|c: char| !(c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.' | '+')))
            .map(|run| run.chars().filter(char::is_ascii_digit).collect::<String>())
            .max_by_key(|run| run.len())?;

        let len = digits.len();
        if len < 10 {
            return None;
        }
        if len >= 11 && digits.as_bytes()[len - 11] == b'0' {
            return Some(digits[len - 11..].to_string());
        }

        let tail = &digits[len - 10..];
        if len == 10 && tail.starts_with('0') {
            Some(tail.to_string())
        } else {
            Some(format!("0{}", tail))
        }
    }

    /// 邮箱: 提取首个地址并转小写
    pub fn clean_email(&self, value: &str) -> Option<String> {
        EMAIL_PATTERN
            .find(value)
            .map(|m| m.as_str().to_lowercase())
    }

    /// 英国邮编: 大写,内向码前保留一个空格
    ///
    /// # 返回
    /// - (清洗后的邮编, 是否符合格式)
    pub fn clean_postcode(&self, value: &str) -> (String, bool) {
        let compact: String = value
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect();

        if UK_POSTCODE_PATTERN.is_match(&compact) {
            let split = compact.len() - 3;
            (format!("{} {}", &compact[..split], &compact[split..]), true)
        } else {
            (value.trim().to_uppercase(), false)
        }
    }

    /// 年份: 4 位数字或可解析日期中的年份
    pub fn parse_year(&self, value: &str) -> Option<i32> {
        let text = value.trim();
        let year = if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
            text.parse::<i32>().ok()
        } else {
            self.parse_date(text).map(|d| d.year())
        }?;
        (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year)
    }
}

fn invalid(message: String) -> Cleaned {
    Cleaned::Invalid {
        kept: None,
        message,
    }
}

// 千分位逗号只能出现在整数部分,且每组 3 位（拒绝 "1.234,56" 这类小数逗号写法）
fn thousands_grouping_ok(amount: &str) -> bool {
    let (integer, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    if fraction.contains(',') {
        return false;
    }
    integer
        .split(',')
        .skip(1)
        .all(|group| group.len() == 3 && group.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_clean_text_basic() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.clean_text("  Ford   Focus\t "), Some("Ford Focus".to_string()));
        assert_eq!(cleaner.clean_text("\"  \""), None);
        assert_eq!(cleaner.clean_text("NULL"), None);
        // NFKC: 全角字符折叠
        assert_eq!(cleaner.clean_text("ＦＯＲＤ"), Some("FORD".to_string()));
    }

    #[test]
    fn test_registration_variants_converge() {
        let cleaner = DataCleaner;
        for raw in ["ab12 xyz", "AB12XYZ", "Ab12-Xyz"] {
            assert_eq!(cleaner.clean_registration(raw), Some("AB12XYZ".to_string()));
        }
    }

    #[test]
    fn test_date_formats_converge() {
        let cleaner = DataCleaner;
        for raw in ["15/03/2024", "2024-03-15", "15-03-2024"] {
            assert_eq!(cleaner.parse_date(raw), Some(date(2024, 3, 15)));
        }
        // 歧义值按日在前解析
        assert_eq!(cleaner.parse_date("03/04/2024"), Some(date(2024, 4, 3)));
        // 日在前不合法时回退为月在前
        assert_eq!(cleaner.parse_date("12/31/2023"), Some(date(2023, 12, 31)));
        assert_eq!(cleaner.parse_date("15/03/2024 10:45"), Some(date(2024, 3, 15)));
        assert_eq!(cleaner.parse_date("not a date"), None);
        assert_eq!(cleaner.parse_date("01/01/0024"), None);
    }

    #[test]
    fn test_parse_money() {
        let cleaner = DataCleaner;
        let parse = |s: &str| cleaner.parse_money(s).map(|m| m.with_scale(2).to_string());
        assert_eq!(parse("£1,234.5"), Some("1234.50".to_string()));
        assert_eq!(parse("GBP 99"), Some("99.00".to_string()));
        assert_eq!(parse("(12.344)"), Some("-12.34".to_string()));
        assert_eq!(parse("twelve"), None);
        assert_eq!(parse("1e5"), None);
        assert_eq!(parse("1,234,567"), Some("1234567.00".to_string()));
    }

    #[test]
    fn test_decimal_comma_amount_is_rejected() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_money("1.234,56"), None);
        assert_eq!(cleaner.parse_money("12,5"), None);
        match cleaner.clean(ValueClass::Money, "€1.234,56") {
            Cleaned::Invalid { kept, .. } => assert!(kept.is_none()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_money_failure_is_warning_not_value() {
        match DataCleaner.clean(ValueClass::Money, "£12..0") {
            Cleaned::Invalid { kept, message } => {
                assert!(kept.is_none());
                assert!(message.contains("£12..0"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_clean_phone() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.clean_phone("07700 900123"), Some("07700900123".to_string()));
        assert_eq!(cleaner.clean_phone("+44 (0)7700 900123"), Some("07700900123".to_string()));
        assert_eq!(cleaner.clean_phone("+44 7700 900123"), Some("07700900123".to_string()));
        assert_eq!(cleaner.clean_phone("tel: 0113 496 0000 ext"), Some("01134960000".to_string()));
        assert_eq!(cleaner.clean_phone("12345"), None);
    }

    #[test]
    fn test_title_case_names() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.title_case("mary-jane o'brien"), "Mary-Jane O'Brien");
        assert_eq!(cleaner.title_case("JOHN SMITH"), "John Smith");
        assert_eq!(cleaner.title_case("Ewan McGregor"), "Ewan McGregor");
    }

    #[test]
    fn test_email_and_postcode() {
        let cleaner = DataCleaner;
        assert_eq!(
            cleaner.clean_email("mailto: John.Smith@Example.co.uk;"),
            Some("john.smith@example.co.uk".to_string())
        );
        assert_eq!(cleaner.clean_email("no email"), None);

        assert_eq!(cleaner.clean_postcode("ls11ab"), ("LS1 1AB".to_string(), true));
        assert_eq!(cleaner.clean_postcode("sw1a 1aa"), ("SW1A 1AA".to_string(), true));
        assert_eq!(cleaner.clean_postcode("12345"), ("12345".to_string(), false));
    }

    #[test]
    fn test_parse_year() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_year("2015"), Some(2015));
        assert_eq!(cleaner.parse_year("01/09/2012"), Some(2012));
        assert_eq!(cleaner.parse_year("1850"), None);
    }
}
