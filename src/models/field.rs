//! 字段层数据模型
//!
//! 一个字段从模型输出到最终结果会经历两种形态：
//! - `DraftField`：结构化之后、聚合之前，带着模型置信度和归属的识别 token
//! - `FieldValue`：聚合之后的最终值，只带一个最终置信度

use chrono::NaiveDate;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt::Display;

/// 字段类型，决定格式规则和置信度区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum FieldType {
    Name,
    Identifier,
    Date,
    Numeric,
    Grade,
    Freeform,
}

impl FieldType {
    pub const ALL: [FieldType; 6] = [
        FieldType::Name,
        FieldType::Identifier,
        FieldType::Date,
        FieldType::Numeric,
        FieldType::Grade,
        FieldType::Freeform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Name => "name",
            FieldType::Identifier => "identifier",
            FieldType::Date => "date",
            FieldType::Numeric => "numeric",
            FieldType::Grade => "grade",
            FieldType::Freeform => "freeform",
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FieldType::ALL
            .into_iter()
            .find(|t| t.as_str() == value.to_ascii_lowercase())
            .ok_or_else(|| format!("未知的字段类型: {}", value))
    }
}

/// 字段的类型化取值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// 字段缺失的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentReason {
    /// 模型明确表示文档中没有该字段
    NotFound,
    /// 模型响应中完全没有出现该字段
    MissingFromResponse,
    /// 模型给出的值无法作为该字段使用（例如对象或数组）
    InvalidValue,
}

/// 缺失字段在输出中的置信度
pub const ABSENT_CONFIDENCE: f64 = 0.0;

/// 字段槽位：要么有值，要么显式缺失
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Present(T),
    Absent(AbsentReason),
}

impl<T> Field<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            Field::Present(v) => Some(v),
            Field::Absent(_) => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent(_))
    }

    pub fn is_present(&self) -> bool {
        !self.is_absent()
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Present(v) => v.serialize(serializer),
            Field::Absent(reason) => {
                let mut s = serializer.serialize_struct("AbsentField", 3)?;
                s.serialize_field("value", &Option::<()>::None)?;
                s.serialize_field("confidence", &ABSENT_CONFIDENCE)?;
                s.serialize_field("absent_reason", reason)?;
                s.end()
            }
        }
    }
}

/// 结构化之后、聚合之前的字段
#[derive(Debug, Clone, PartialEq)]
pub struct DraftField {
    /// 模型给出的原始文本
    pub raw: String,
    /// 按字段类型转换后的值
    pub value: Value,
    /// 模型自报置信度，已限制在 [0,1]
    pub model_confidence: f64,
    /// 归属到该字段的识别 token 下标
    pub token_indices: Vec<usize>,
}

/// 最终字段值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub value: Value,
    pub confidence: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
}

/// 四路置信度信号，创建后不再修改
///
/// `None` 表示该信号对这个字段不适用（例如没有任何归属 token 时的 ocr）。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConfidenceComponents {
    pub ocr: Option<f64>,
    pub pattern: Option<f64>,
    pub model: Option<f64>,
    pub context: Option<f64>,
}

impl ConfidenceComponents {
    pub fn new(ocr: Option<f64>, pattern: f64, model: f64, context: f64) -> Self {
        Self {
            ocr,
            pattern: Some(pattern),
            model: Some(model),
            context: Some(context),
        }
    }

    /// 按 (名称, 值) 顺序列出四路信号
    pub fn signals(&self) -> [(&'static str, Option<f64>); 4] {
        [
            ("ocr", self.ocr),
            ("pattern", self.pattern),
            ("model", self.model),
            ("context", self.context),
        ]
    }
}

/// 字段在记录中的位置，例如 `candidate_details.name` 或 `subjects[2].grade`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(section: &str, field: &str) -> Self {
        Self(format!("{}.{}", section, field))
    }

    pub fn indexed(section: &str, index: usize, field: &str) -> Self {
        Self(format!("{}[{}].{}", section, index, field))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
