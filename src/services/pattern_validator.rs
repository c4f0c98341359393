//! 格式校验 - 业务能力层
//!
//! 按字段类型检查原始值的格式：完全符合规则得 1.0，只差分隔符或
//! 空白得近似分，否则 0.0。自由文本不做格式约束，总是 1.0。

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::HashMap;

use crate::config::PatternConfig;
use crate::error::ConfigError;
use crate::models::field::FieldType;
use crate::models::schema::FieldSpec;

const IDENTIFIER_RULES: &[&str] = &[
    r"^\d{4,12}$",
    r"^[A-Z]{1,3}\d{4,8}$",
    r"^\d{2}[A-Z]{2}\d{4,6}$",
    r"^[A-Z]{2,4}\d{6,10}$",
    r"^\d{4,6}/\d{2,4}$",
    r"^REG\d{6,10}$",
];

const NAME_RULES: &[&str] = &[r"^[A-Za-z][A-Za-z.'\-]*(?: [A-Za-z][A-Za-z.'\-]*)*$"];

const GRADE_RULES: &[&str] = &[
    r"^[A-F][+-]?$",
    r"^[A-E][12]$",
    r"^O$",
    r"^(?i)(?:FIRST|SECOND|THIRD|1ST|2ND|3RD) DIVISION(?: WITH DISTINCTION)?$",
    r"^(?i)(?:DISTINCTION|PASS|PASSED|FAIL|FAILED|COMPARTMENT)$",
];

const NUMERIC_RULES: &[&str] = &[r"^\d{1,5}(?:\.\d{1,2})?$", r"^\d{1,3}(?:\.\d{1,2})?%$"];

/// 日期的标准写法
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
];

/// 合理的年份范围
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2100;

/// 格式校验器
#[derive(Debug, Clone)]
pub struct PatternValidator {
    rules: HashMap<FieldType, Vec<Regex>>,
    near_miss_score: f64,
}

impl PatternValidator {
    pub fn new(config: &PatternConfig) -> Result<Self, ConfigError> {
        let mut rules = HashMap::new();
        for (field_type, patterns) in [
            (FieldType::Identifier, IDENTIFIER_RULES),
            (FieldType::Name, NAME_RULES),
            (FieldType::Grade, GRADE_RULES),
            (FieldType::Numeric, NUMERIC_RULES),
        ] {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConfigError::Invalid(format!("格式规则编译失败: {}", e)))?;
            rules.insert(field_type, compiled);
        }
        Ok(Self {
            rules,
            near_miss_score: config.near_miss_score,
        })
    }

    /// 按字段类型给原始值打分
    pub fn validate(&self, field_type: FieldType, raw: &str) -> f64 {
        match field_type {
            FieldType::Freeform => 1.0,
            FieldType::Date => self.score(raw, |v| strict_date(v).is_some(), normalize_date),
            FieldType::Identifier => self.score(raw, |v| self.matches(field_type, v), normalize_identifier),
            FieldType::Name => self.score(
                raw,
                |v| v.chars().count() >= 2 && self.matches(field_type, v),
                normalize_name,
            ),
            FieldType::Grade => self.score(raw, |v| self.matches(field_type, v), normalize_grade),
            FieldType::Numeric => self.score(raw, |v| self.matches(field_type, v), normalize_number),
        }
    }

    /// 按字段定义打分，数值字段额外检查取值范围
    pub fn validate_field(&self, spec: &FieldSpec, raw: &str) -> f64 {
        let score = self.validate(spec.field_type, raw);
        match (spec.bounds, spec.field_type) {
            (Some((lo, hi)), FieldType::Numeric) if score > 0.0 => match parse_number(raw) {
                Some(n) if n >= lo && n <= hi => score,
                _ => 0.0,
            },
            _ => score,
        }
    }

    fn matches(&self, field_type: FieldType, value: &str) -> bool {
        self.rules
            .get(&field_type)
            .map(|rules| rules.iter().any(|re| re.is_match(value)))
            .unwrap_or(false)
    }

    fn score(&self, raw: &str, exact: impl Fn(&str) -> bool, normalize: fn(&str) -> String) -> f64 {
        if exact(raw) {
            return 1.0;
        }
        let normalized = normalize(raw);
        if !normalized.is_empty() && normalized != raw && exact(&normalized) {
            self.near_miss_score
        } else {
            0.0
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.' | '_'))
        .map(|c| if c == '\\' { '/' } else { c.to_ascii_uppercase() })
        .collect()
}

fn normalize_name(raw: &str) -> String {
    collapse_whitespace(raw)
        .trim_matches(|c: char| matches!(c, ',' | ':' | ';' | '.'))
        .trim()
        .to_string()
}

fn normalize_grade(raw: &str) -> String {
    let upper = collapse_whitespace(&raw.to_uppercase()).replace('.', "");
    upper.replace(" +", "+").replace(" -", "-")
}

fn normalize_number(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.split('/').next().unwrap_or("").to_string();
    if has_thousands_separators(&compact) {
        compact.replace(',', "")
    } else if compact.contains('.') {
        compact
    } else {
        compact.replace(',', ".")
    }
}

/// `1,000`、`12,345.5` 这类写法：逗号后恰好跟三位数字
fn has_thousands_separators(compact: &str) -> bool {
    let mut groups = compact.split(',');
    let head = groups.next().unwrap_or("");
    let head = head.trim_start_matches(['-', '+']);
    if head.is_empty() || head.len() > 3 || !head.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let rest: Vec<&str> = groups.collect();
    !rest.is_empty()
        && rest.iter().enumerate().all(|(i, group)| {
            let (Some(digits), Some(tail)) = (group.get(..3), group.get(3..)) else {
                return false;
            };
            let tail_ok = tail.is_empty() || (i + 1 == rest.len() && tail.starts_with('.'));
            digits.chars().all(|c| c.is_ascii_digit()) && tail_ok
        })
}

fn normalize_date(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    let mut out = String::new();
    let chars: Vec<char> = collapsed.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let between_digits = i > 0
            && i + 1 < chars.len()
            && chars[i - 1].is_ascii_digit()
            && chars[i + 1].is_ascii_digit();
        match c {
            '.' | '\\' | '_' => out.push('-'),
            ' ' if between_digits => out.push('-'),
            ' ' if matches!(chars.get(i + 1), Some('/' | '-')) => {}
            ' ' if i > 0 && matches!(chars[i - 1], '/' | '-') => {}
            _ => out.push(c),
        }
    }
    out
}

fn strict_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
        .filter(|d| YEAR_RANGE.contains(&d.year()))
}

/// 解析日期，允许分隔符不规范
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    strict_date(raw).or_else(|| strict_date(&normalize_date(raw)))
}

/// 解析数值，允许空白、逗号小数点、百分号和 “得分/满分” 写法
pub fn parse_number(raw: &str) -> Option<f64> {
    let normalized = normalize_number(raw);
    let trimmed = normalized.trim_end_matches('%');
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::{candidate_details, overall_result};

    fn validator() -> PatternValidator {
        PatternValidator::new(&PatternConfig::default()).unwrap()
    }

    #[test]
    fn test_identifier_scores() {
        let v = validator();
        assert_eq!(v.validate(FieldType::Identifier, "2103456"), 1.0);
        assert_eq!(v.validate(FieldType::Identifier, "REG12345678"), 1.0);
        assert_eq!(v.validate(FieldType::Identifier, "12345/2019"), 1.0);
        assert_eq!(v.validate(FieldType::Identifier, "21 03456"), 0.5);
        assert_eq!(v.validate(FieldType::Identifier, "ab-123456"), 0.5);
        assert_eq!(v.validate(FieldType::Identifier, "not an id"), 0.0);
    }

    #[test]
    fn test_name_scores() {
        let v = validator();
        assert_eq!(v.validate(FieldType::Name, "ASHA VERMA"), 1.0);
        assert_eq!(v.validate(FieldType::Name, "D'Souza Anne-Marie"), 1.0);
        assert_eq!(v.validate(FieldType::Name, "  ASHA   VERMA,"), 0.5);
        assert_eq!(v.validate(FieldType::Name, "ASHA V3RMA"), 0.0);
        assert_eq!(v.validate(FieldType::Name, "A"), 0.0);
    }

    #[test]
    fn test_date_scores() {
        let v = validator();
        assert_eq!(v.validate(FieldType::Date, "2004-03-09"), 1.0);
        assert_eq!(v.validate(FieldType::Date, "09/03/2004"), 1.0);
        assert_eq!(v.validate(FieldType::Date, "9 March 2004"), 1.0);
        assert_eq!(v.validate(FieldType::Date, "09.03.2004"), 0.5);
        assert_eq!(v.validate(FieldType::Date, "2004.03.09"), 0.5);
        assert_eq!(v.validate(FieldType::Date, "31/02/2004"), 0.0);
        assert_eq!(v.validate(FieldType::Date, "yesterday"), 0.0);
    }

    #[test]
    fn test_grade_scores() {
        let v = validator();
        assert_eq!(v.validate(FieldType::Grade, "A+"), 1.0);
        assert_eq!(v.validate(FieldType::Grade, "B2"), 1.0);
        assert_eq!(v.validate(FieldType::Grade, "First Division"), 1.0);
        assert_eq!(v.validate(FieldType::Grade, "PASS"), 1.0);
        assert_eq!(v.validate(FieldType::Grade, "a +"), 0.5);
        assert_eq!(v.validate(FieldType::Grade, "Z9"), 0.0);
    }

    #[test]
    fn test_numeric_scores_and_bounds() {
        let v = validator();
        assert_eq!(v.validate(FieldType::Numeric, "78"), 1.0);
        assert_eq!(v.validate(FieldType::Numeric, "81.40%"), 1.0);
        assert_eq!(v.validate(FieldType::Numeric, "81,4"), 0.5);
        assert_eq!(v.validate(FieldType::Numeric, "seventy"), 0.0);

        assert_eq!(v.validate_field(&overall_result::percentage, "81.4"), 1.0);
        assert_eq!(v.validate_field(&overall_result::percentage, "181.4"), 0.0);
        assert_eq!(v.validate_field(&overall_result::cgpa, "8.6"), 1.0);
    }

    #[test]
    fn test_freeform_always_passes() {
        let v = validator();
        assert_eq!(v.validate(FieldType::Freeform, "St. Xavier's School, Patna"), 1.0);
        assert_eq!(v.validate_field(&candidate_details::institution, ""), 1.0);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let v = validator();
        for raw in ["21 03456", "09.03.2004", "a +", "81,4"] {
            for t in FieldType::ALL {
                assert_eq!(v.validate(t, raw), v.validate(t, raw));
            }
        }
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_number("81.4 %"), Some(81.4));
        assert_eq!(parse_number("78/100"), Some(78.0));
        assert_eq!(parse_number("7,5"), Some(7.5));
        assert_eq!(parse_number("1,000"), Some(1000.0));
        assert_eq!(parse_number("12,345.5"), Some(12345.5));
        assert_eq!(parse_number("1,234,567"), Some(1234567.0));
        assert_eq!(parse_number("81,45"), Some(81.45));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_date("09.03.2004"), NaiveDate::from_ymd_opt(2004, 3, 9));
        assert_eq!(parse_date("1850-01-01"), None);
    }
}
