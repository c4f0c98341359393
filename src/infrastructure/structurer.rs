//! 结构化后端
//!
//! `Structurer` 把识别出的全文映射到抽取模式上，返回
//! `{字段路径: {value, confidence, tokens}}`。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务均可使用（自定义 base url 与模型名）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::StructuringError;
use crate::models::recognition::RecognizedToken;
use crate::models::schema::ExtractionSchema;
use crate::utils::truncate_text;

/// 一次结构化请求
#[derive(Debug, Clone, Copy)]
pub struct StructuringRequest<'a> {
    /// 合并后的全文
    pub text: &'a str,
    /// 全文档 token 表，下标即编号
    pub tokens: &'a [RecognizedToken],
    pub schema: &'a ExtractionSchema,
}

/// 模型对单个字段的原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    /// `null` 表示模型认为文档中没有该字段
    pub value: JsonValue,
    /// 已校验到 [0,1]，非法值记为 0
    pub confidence: f64,
    /// 模型归属的 token 编号
    pub tokens: Vec<usize>,
}

/// 字段路径 → 原始输出
pub type StructuredFields = BTreeMap<String, RawField>;

/// 结构化能力
#[async_trait]
pub trait Structurer: Send + Sync {
    async fn structure(
        &self,
        request: &StructuringRequest<'_>,
    ) -> Result<StructuredFields, StructuringError>;

    /// 输出中记录的模型标识
    fn model_id(&self) -> String;

    async fn health_check(&self) -> bool {
        true
    }
}

/// 提示词中最多列出的 token 数
const MAX_PROMPT_TOKENS: usize = 1500;

const SYSTEM_PROMPT: &str = "You are an expert at extracting structured data from academic \
marksheets and certificates. Read the OCR output carefully, extract only what is printed, \
never invent values, and answer with a single JSON object.";

/// 基于 OpenAI 兼容接口的结构化后端
pub struct OpenAiStructurer {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiStructurer {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    async fn chat(&self, system: &str, user: &str, max_tokens: u32) -> Result<String, StructuringError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(|e| StructuringError::Backend(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()
                    .map_err(|e| StructuringError::Backend(e.to_string()))?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(max_tokens)
            .build()
            .map_err(|e| StructuringError::Backend(e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_backend_error(&e.to_string())
        })?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| StructuringError::MalformedResponse("LLM 返回内容为空".to_string()))
    }
}

#[async_trait]
impl Structurer for OpenAiStructurer {
    async fn structure(
        &self,
        request: &StructuringRequest<'_>,
    ) -> Result<StructuredFields, StructuringError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        let prompt = build_prompt(request);
        debug!("提示词长度: {} 字符", prompt.len());

        let content = self.chat(SYSTEM_PROMPT, &prompt, self.max_tokens).await?;
        debug!("LLM 响应长度: {} 字符", content.len());
        parse_structured_response(&content, request.schema).inspect_err(|e| {
            warn!("⚠️ {}，响应开头: {}", e, truncate_text(&content, 200));
        })
    }

    fn model_id(&self) -> String {
        format!("openai-{}", self.model_name)
    }

    async fn health_check(&self) -> bool {
        match self.chat("Reply with OK.", "ping", 5).await {
            Ok(_) => true,
            Err(e) => {
                warn!("结构化服务健康检查失败: {}", e);
                false
            }
        }
    }
}

fn classify_backend_error(message: &str) -> StructuringError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        StructuringError::RateLimited(message.to_string())
    } else {
        StructuringError::Backend(message.to_string())
    }
}

/// 构造用户提示词：字段清单 + 输出格式 + 编号 token + 全文
pub fn build_prompt(request: &StructuringRequest<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str("Extract the following fields from the marksheet below.\n\nFields:\n");
    prompt.push_str(&request.schema.describe());
    prompt.push_str(
        "\n\nReturn ONLY a JSON object of this form:\n\
         {\"fields\": {\"<field path>\": {\"value\": <value or null>, \"confidence\": <0.0-1.0>, \"tokens\": [<token numbers>]}}}\n\n\
         Rules:\n\
         - Use the exact field paths listed above; number subjects from 0 (subjects[0].subject, subjects[1].subject, ...).\n\
         - If a field is not present in the document, set value to null and confidence to 0.0.\n\
         - confidence is your certainty that the value is correct.\n\
         - tokens lists the numbers of the OCR tokens the value was read from; use [] if you inferred it.\n\
         - Keep identifiers exactly as printed; give dates as YYYY-MM-DD when unambiguous; give marks as plain numbers.\n",
    );

    if !request.tokens.is_empty() {
        prompt.push_str("\nOCR tokens (number: text):\n");
        for (i, token) in request.tokens.iter().take(MAX_PROMPT_TOKENS).enumerate() {
            prompt.push_str(&format!("{}: {}\n", i, token.text));
        }
    }

    prompt.push_str("\nDocument text:\n");
    prompt.push_str(request.text);
    prompt
}

/// 解析模型响应
///
/// 截取第一个 `{` 到最后一个 `}` 之间的内容；同时接受扁平的
/// `{"fields": {...}}` 和按分区嵌套的两种形状。字段路径必须都在
/// `schema` 中。
pub fn parse_structured_response(
    content: &str,
    schema: &ExtractionSchema,
) -> Result<StructuredFields, StructuringError> {
    let (start, end) = match (content.find('{'), content.rfind('}')) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            return Err(StructuringError::MalformedResponse(
                "响应中没有 JSON 对象".to_string(),
            ))
        }
    };

    let json: JsonValue = serde_json::from_str(&content[start..=end])
        .map_err(|e| StructuringError::MalformedResponse(e.to_string()))?;
    let obj = json
        .as_object()
        .ok_or_else(|| StructuringError::MalformedResponse("顶层不是 JSON 对象".to_string()))?;

    let mut out = StructuredFields::new();
    match obj.get("fields").and_then(|f| f.as_object()) {
        Some(fields) => {
            for (path, entry) in fields {
                out.insert(path.clone(), raw_field(entry));
            }
        }
        None => flatten_nested(obj, &mut out),
    }
    check_schema(&out, schema)?;
    Ok(out)
}

/// 响应必须至少包含一个模式字段，且不能出现模式之外的路径
pub fn check_schema(fields: &StructuredFields, schema: &ExtractionSchema) -> Result<(), StructuringError> {
    if let Some(unknown) = fields.keys().find(|path| !schema.contains_path(path)) {
        return Err(StructuringError::MalformedResponse(format!(
            "字段 {} 不在抽取模式中",
            unknown
        )));
    }
    if fields.is_empty() {
        return Err(StructuringError::MalformedResponse(
            "响应中没有任何模式字段".to_string(),
        ));
    }
    Ok(())
}

fn flatten_nested(obj: &Map<String, JsonValue>, out: &mut StructuredFields) {
    for (section, section_value) in obj {
        match section_value {
            JsonValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(fields) = item.as_object() {
                        for (field, entry) in fields {
                            out.insert(format!("{}[{}].{}", section, i, field), raw_field(entry));
                        }
                    }
                }
            }
            JsonValue::Object(fields) => {
                for (field, entry) in fields {
                    out.insert(format!("{}.{}", section, field), raw_field(entry));
                }
            }
            // 留给模式检查拒绝
            other => {
                out.insert(section.clone(), raw_field(other));
            }
        }
    }
}

fn raw_field(entry: &JsonValue) -> RawField {
    match entry.as_object() {
        Some(obj) if obj.contains_key("value") => RawField {
            value: obj.get("value").cloned().unwrap_or(JsonValue::Null),
            confidence: validate_confidence(obj.get("confidence")),
            tokens: obj
                .get("tokens")
                .and_then(|t| t.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_u64().map(|n| n as usize))
                        .collect()
                })
                .unwrap_or_default(),
        },
        _ => RawField {
            value: entry.clone(),
            confidence: 0.0,
            tokens: Vec::new(),
        },
    }
}

/// 模型置信度必须是 [0,1] 内的数，否则记为 0
fn validate_confidence(value: Option<&JsonValue>) -> f64 {
    match value.and_then(|v| v.as_f64()) {
        Some(c) if (0.0..=1.0).contains(&c) => c,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_flat_response_with_prose() {
        let content = r#"Here is the data:
        {"fields": {
            "candidate_details.name": {"value": "ASHA VERMA", "confidence": 0.93, "tokens": [3, 4]},
            "candidate_details.father_name": {"value": null, "confidence": 0.0},
            "subjects[0].obtained_marks": {"value": 78, "confidence": 1.7}
        }}
        Hope this helps."#;
        let fields = parse_structured_response(content, &ExtractionSchema::marksheet()).unwrap();
        assert_eq!(fields.len(), 3);
        let name = &fields["candidate_details.name"];
        assert_eq!(name.value, json!("ASHA VERMA"));
        assert_eq!(name.tokens, vec![3, 4]);
        assert!(fields["candidate_details.father_name"].value.is_null());
        // 超出范围的置信度记为 0
        assert_eq!(fields["subjects[0].obtained_marks"].confidence, 0.0);
    }

    #[test]
    fn test_parse_nested_response() {
        let content = r#"{
            "candidate_details": {"roll_no": {"value": "2103456", "confidence": 0.9}},
            "subjects": [
                {"subject": {"value": "Physics", "confidence": 0.8}, "grade": "A1"}
            ],
            "overall_result": {"percentage": {"value": "81.4", "confidence": 0.7}}
        }"#;
        let fields = parse_structured_response(content, &ExtractionSchema::marksheet()).unwrap();
        assert_eq!(fields["candidate_details.roll_no"].value, json!("2103456"));
        assert_eq!(fields["subjects[0].subject"].confidence, 0.8);
        assert_eq!(fields["subjects[0].grade"].value, json!("A1"));
        assert_eq!(fields["subjects[0].grade"].confidence, 0.0);
        assert_eq!(fields["overall_result.percentage"].value, json!("81.4"));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let schema = ExtractionSchema::marksheet();
        assert!(matches!(
            parse_structured_response("I could not read the document", &schema),
            Err(StructuringError::MalformedResponse(_))
        ));
        assert!(parse_structured_response("{ broken json", &schema).is_err());
    }

    #[test]
    fn test_parse_rejects_off_schema_json() {
        let schema = ExtractionSchema::marksheet();
        for content in [
            r#"{"answer": "sorry, I cannot help"}"#,
            r#"{"fields": {}}"#,
            r#"{"fields": {"candidate_details.name": {"value": "A", "confidence": 0.9}, "notes": {"value": "x"}}}"#,
            r#"{"candidate_details": {"nickname": {"value": "Ash", "confidence": 0.9}}}"#,
        ] {
            assert!(
                matches!(
                    parse_structured_response(content, &schema),
                    Err(StructuringError::MalformedResponse(_))
                ),
                "accepted: {}",
                content
            );
        }
    }

    #[test]
    fn test_classify_backend_error() {
        assert!(matches!(
            classify_backend_error("HTTP 429 Too Many Requests"),
            StructuringError::RateLimited(_)
        ));
        assert!(matches!(
            classify_backend_error("connection reset"),
            StructuringError::Backend(_)
        ));
    }

    #[test]
    fn test_build_prompt_lists_tokens() {
        let schema = ExtractionSchema::marksheet();
        let tokens = vec![RecognizedToken {
            text: "VERMA".to_string(),
            confidence: 0.9,
            bbox: None,
            page: 0,
        }];
        let request = StructuringRequest {
            text: "Name ASHA VERMA",
            tokens: &tokens,
            schema: &schema,
        };
        let prompt = build_prompt(&request);
        assert!(prompt.contains("0: VERMA"));
        assert!(prompt.contains("candidate_details.roll_no"));
        assert!(prompt.ends_with("Name ASHA VERMA"));
    }

    #[tokio::test]
    #[ignore] // 需要真实的 LLM 服务：cargo test -- --ignored
    async fn test_openai_structurer_health() {
        let structurer = OpenAiStructurer::new(&Config::from_env());
        assert!(structurer.health_check().await);
    }
}
