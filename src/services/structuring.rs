//! 结构化服务 - 业务能力层
//!
//! 负责调用结构化后端（带超时与重试），并把后端返回的
//! `{字段路径: 原始输出}` 整理成类型化的抽取草稿。

use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::StructuringError;
use crate::infrastructure::structurer::{
    check_schema, RawField, StructuredFields, Structurer, StructuringRequest,
};
use crate::models::field::{AbsentReason, DraftField, Field, FieldPath, FieldType, Value};
use crate::models::recognition::{DocumentText, RecognizedToken};
use crate::models::record::{
    candidate_details, document_info, overall_result, CandidateDetails, DocumentInfo,
    ExtractionDraft, OverallResult, SubjectEntry,
};
use crate::models::schema::{subject_index, ExtractionSchema, FieldSpec, SUBJECTS_KEY};
use crate::services::pattern_validator::{parse_date, parse_number};
use crate::services::recognition::attribute_tokens;

/// 被限流后重试前的等待时间
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);

/// 模型用来表示“没有”的文本
const EMPTY_MARKERS: &[&str] = &["", "null", "none", "n/a", "na", "-", "--", "nil"];

/// 结构化服务
#[derive(Clone)]
pub struct StructuringService {
    structurer: Arc<dyn Structurer>,
    schema: ExtractionSchema,
    timeout: Duration,
    attempts: u32,
    max_subjects: usize,
}

impl StructuringService {
    pub fn new(structurer: Arc<dyn Structurer>, timeout: Duration, attempts: u32, max_subjects: usize) -> Self {
        Self {
            structurer,
            schema: ExtractionSchema::marksheet(),
            timeout,
            attempts: attempts.max(1),
            max_subjects,
        }
    }

    pub fn model_id(&self) -> String {
        self.structurer.model_id()
    }

    pub async fn health_check(&self) -> bool {
        self.structurer.health_check().await
    }

    /// 结构化全文并生成草稿
    ///
    /// 每次尝试单独计时；响应中出现模式之外的字段也算一次失败。
    /// 所有尝试都失败时返回最后一次的错误。
    pub async fn structure(&self, text: &DocumentText) -> Result<ExtractionDraft, StructuringError> {
        let request = StructuringRequest {
            text: &text.text,
            tokens: &text.tokens,
            schema: &self.schema,
        };

        let mut attempt = 1;
        loop {
            let result = match timeout(self.timeout, self.structurer.structure(&request)).await {
                Ok(result) => result.and_then(|fields| {
                    check_schema(&fields, &self.schema)?;
                    Ok(fields)
                }),
                Err(_) => Err(StructuringError::Timeout { after: self.timeout }),
            };

            match result {
                Ok(fields) => {
                    debug!("结构化返回 {} 个字段 (尝试 {}/{})", fields.len(), attempt, self.attempts);
                    return Ok(build_draft(fields, &text.tokens, self.max_subjects));
                }
                Err(e) if attempt < self.attempts => {
                    warn!("⚠️ 结构化失败 (尝试 {}/{}): {}，准备重试", attempt, self.attempts, e);
                    if matches!(e, StructuringError::RateLimited(_)) {
                        sleep(RATE_LIMIT_BACKOFF).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 把后端原始输出整理成草稿
///
/// 只为响应中出现过、且小于 `max_subjects` 的下标生成科目行，按下标排序；
/// 所有字段都缺失的科目行会被丢弃。
pub fn build_draft(
    mut fields: StructuredFields,
    tokens: &[RecognizedToken],
    max_subjects: usize,
) -> ExtractionDraft {
    let rows = subject_rows(&fields, max_subjects);
    let mut take = |path: &FieldPath, spec: &'static FieldSpec| -> Field<DraftField> {
        draft_field(fields.remove(path.as_str()), spec, tokens)
    };

    let candidate = CandidateDetails::build(|spec| {
        take(&FieldPath::new(candidate_details::KEY, spec.name), spec)
    });
    let overall = OverallResult::build(|spec| {
        take(&FieldPath::new(overall_result::KEY, spec.name), spec)
    });
    let info = DocumentInfo::build(|spec| {
        take(&FieldPath::new(document_info::KEY, spec.name), spec)
    });

    let subjects = rows
        .into_iter()
        .map(|i| SubjectEntry::build(|spec| take(&FieldPath::indexed(SUBJECTS_KEY, i, spec.name), spec)))
        .filter(|entry| entry.fields().iter().any(|(_, f)| !f.is_absent()))
        .collect();

    ExtractionDraft {
        candidate_details: candidate,
        subjects,
        overall_result: overall,
        document_info: info,
    }
}

/// 响应中出现过的科目下标
fn subject_rows(fields: &StructuredFields, max_subjects: usize) -> BTreeSet<usize> {
    let mut rows = BTreeSet::new();
    for key in fields.keys() {
        match subject_index(key) {
            Some(index) if index < max_subjects => {
                rows.insert(index);
            }
            Some(index) => warn!("⚠️ 忽略超出上限 {} 的科目下标: {}", max_subjects, index),
            None => {}
        }
    }
    rows
}

fn draft_field(raw: Option<RawField>, spec: &FieldSpec, tokens: &[RecognizedToken]) -> Field<DraftField> {
    let Some(raw) = raw else {
        return Field::Absent(AbsentReason::MissingFromResponse);
    };

    let text = match &raw.value {
        JsonValue::Null => return Field::Absent(AbsentReason::NotFound),
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(_) | JsonValue::Array(_) | JsonValue::Object(_) => {
            return Field::Absent(AbsentReason::InvalidValue)
        }
    };
    if EMPTY_MARKERS.contains(&text.to_lowercase().as_str()) {
        return Field::Absent(AbsentReason::NotFound);
    }

    let explicit: Vec<usize> = raw.tokens.iter().copied().filter(|&i| i < tokens.len()).collect();
    let token_indices = if explicit.is_empty() {
        attribute_tokens(&text, tokens)
    } else {
        explicit
    };

    Field::Present(DraftField {
        value: coerce(spec.field_type, &text),
        raw: text,
        model_confidence: raw.confidence,
        token_indices,
    })
}

/// 按字段类型转换取值，转换失败时保留原文
fn coerce(field_type: FieldType, text: &str) -> Value {
    match field_type {
        FieldType::Numeric => parse_number(text).map(Value::Number),
        FieldType::Date => parse_date(text).map(Value::Date),
        _ => None,
    }
    .unwrap_or_else(|| Value::Text(text.to_string()))
}
