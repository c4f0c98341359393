//! 文字识别后端
//!
//! `Recognizer` 是识别能力的抽象；`HttpRecognizer` 通过 HTTP 调用
//! 外部 OCR 服务（请求体为 PNG/JPEG 字节，响应为 JSON）。

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RecognitionError;
use crate::models::recognition::{BoundingBox, RawRecognitionResult, RecognizedToken};
use crate::models::page_image::PreprocessedImage;

/// 文字识别能力
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// 识别单页图像
    ///
    /// 返回的 token 置信度必须已归一化到 [0,1]，`page` 由调用方填写。
    async fn recognize(
        &self,
        image: &PreprocessedImage,
    ) -> Result<RawRecognitionResult, RecognitionError>;

    /// 后端是否可用
    async fn health_check(&self) -> bool {
        true
    }
}

/// HTTP OCR 服务的响应
#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tokens: Vec<OcrToken>,
}

#[derive(Debug, Deserialize)]
struct OcrToken {
    text: String,
    confidence: f64,
    /// [x, y, width, height]
    #[serde(default)]
    bbox: Option<[f32; 4]>,
}

/// 基于 HTTP 的识别后端
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRecognizer {
    pub fn new(config: &Config) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.recognition_timeout_secs))
            .build()
            .map_err(|e| RecognitionError::Unavailable {
                endpoint: config.recognition_api_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: config.recognition_api_url.clone(),
        })
    }

    fn unavailable(&self, e: impl ToString) -> RecognitionError {
        RecognitionError::Unavailable {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(
        &self,
        image: &PreprocessedImage,
    ) -> Result<RawRecognitionResult, RecognitionError> {
        debug!("调用识别服务: {} ({} 字节)", self.endpoint, image.bytes.len());

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, image.content_type())
            .body(image.bytes.clone())
            .send()
            .await
            .map_err(|e| {
                warn!("识别服务调用失败: {}", e);
                self.unavailable(e)
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::UnreadableInput(body));
        }
        if !status.is_success() {
            return Err(self.unavailable(format!("HTTP {}", status)));
        }

        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::MalformedResponse(e.to_string()))?;
        Ok(into_result(body))
    }

    async fn health_check(&self) -> bool {
        match self.client.get(&self.endpoint).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(e) => {
                warn!("识别服务健康检查失败: {}", e);
                false
            }
        }
    }
}

/// 不超过该值的置信度按 [0,1] 刻度处理，超出 1 的部分直接截断
const CONFIDENCE_SLACK: f64 = 2.0;

/// 把 0-100 的百分比置信度（Tesseract 风格）统一到 [0,1]
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() || raw < 0.0 {
        0.0
    } else if raw <= CONFIDENCE_SLACK {
        raw.min(1.0)
    } else {
        (raw / 100.0).min(1.0)
    }
}

fn into_result(body: OcrResponse) -> RawRecognitionResult {
    let tokens: Vec<RecognizedToken> = body
        .tokens
        .into_iter()
        .filter(|t| !t.text.trim().is_empty())
        .map(|t| RecognizedToken {
            text: t.text,
            confidence: normalize_confidence(t.confidence),
            bbox: t.bbox.map(|[x, y, width, height]| BoundingBox {
                x,
                y,
                width,
                height,
            }),
            page: 0,
        })
        .collect();
    let text = body.text.unwrap_or_else(|| {
        tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    });
    RawRecognitionResult { text, tokens }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.87), 0.87);
        assert_eq!(normalize_confidence(87.0), 0.87);
        assert_eq!(normalize_confidence(-1.0), 0.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(1.02), 1.0);
        assert_eq!(normalize_confidence(1.0), 1.0);
        assert_eq!(normalize_confidence(1.5), 1.0);
        assert_eq!(normalize_confidence(2.5), 0.025);
    }

    #[test]
    fn test_parse_ocr_response() {
        let json = r#"{
            "tokens": [
                {"text": "Roll", "confidence": 91, "bbox": [10, 20, 40, 12]},
                {"text": " ", "confidence": 10},
                {"text": "123456", "confidence": 0.8}
            ]
        }"#;
        let body: OcrResponse = serde_json::from_str(json).unwrap();
        let result = into_result(body);
        assert_eq!(result.text, "Roll 123456");
        assert_eq!(result.tokens.len(), 2);
        assert!((result.tokens[0].confidence - 0.91).abs() < 1e-9);
        assert_eq!(result.tokens[0].bbox.unwrap().width, 40.0);
        assert!(result.tokens[1].bbox.is_none());
    }

    #[tokio::test]
    #[ignore] // 需要本地识别服务：cargo test -- --ignored
    async fn test_http_recognizer_health() {
        let recognizer = HttpRecognizer::new(&Config::from_env()).unwrap();
        assert!(recognizer.health_check().await);
    }
}
