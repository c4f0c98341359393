//! 文字识别服务 - 业务能力层
//!
//! 包装识别后端：补全页码、约束置信度范围，并提供
//! 字段级别的识别置信度计算。

use std::sync::Arc;

use crate::error::RecognitionError;
use crate::infrastructure::recognizer::{normalize_confidence, Recognizer};
use crate::models::recognition::{RawRecognitionResult, RecognizedToken};
use crate::models::page_image::PreprocessedImage;

/// 文字识别服务
#[derive(Clone)]
pub struct RecognitionService {
    recognizer: Arc<dyn Recognizer>,
}

impl RecognitionService {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self { recognizer }
    }

    /// 识别单页
    pub async fn recognize_page(
        &self,
        page: usize,
        image: &PreprocessedImage,
    ) -> Result<RawRecognitionResult, RecognitionError> {
        let mut result = self.recognizer.recognize(image).await?;
        for token in &mut result.tokens {
            token.page = page;
            token.confidence = normalize_confidence(token.confidence);
        }
        Ok(result)
    }

    pub async fn health_check(&self) -> bool {
        self.recognizer.health_check().await
    }
}

/// 字段的识别置信度：归属 token 置信度按字符长度加权平均
///
/// 没有任何有效归属 token 时返回 `None`，表示该信号不适用。
pub fn ocr_confidence(tokens: &[RecognizedToken], indices: &[usize]) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total_len = 0usize;
    for token in indices.iter().filter_map(|&i| tokens.get(i)) {
        let len = token.text.chars().count().max(1);
        weighted += token.confidence * len as f64;
        total_len += len;
    }
    if total_len == 0 {
        None
    } else {
        Some((weighted / total_len as f64).clamp(0.0, 1.0))
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// 按文本匹配归属 token
///
/// 值中的每个词取第一个文本相同（忽略大小写和首尾标点）且尚未
/// 被使用的 token。
pub fn attribute_tokens(value: &str, tokens: &[RecognizedToken]) -> Vec<usize> {
    let mut used = vec![false; tokens.len()];
    let mut out = Vec::new();
    for word in value.split_whitespace().map(normalize_word) {
        if word.is_empty() {
            continue;
        }
        if let Some(i) = tokens
            .iter()
            .enumerate()
            .position(|(i, t)| !used[i] && normalize_word(&t.text) == word)
        {
            used[i] = true;
            out.push(i);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn token(text: &str, confidence: f64) -> RecognizedToken {
        RecognizedToken {
            text: text.to_string(),
            confidence,
            bbox: None,
            page: 0,
        }
    }

    #[test]
    fn test_ocr_confidence_is_length_weighted() {
        let tokens = vec![token("A", 0.2), token("VERMAS", 0.8)];
        let conf = ocr_confidence(&tokens, &[0, 1]).unwrap();
        // (0.2*1 + 0.8*6) / 7
        assert!((conf - 5.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_ocr_confidence_undefined_without_tokens() {
        let tokens = vec![token("A", 0.2)];
        assert_eq!(ocr_confidence(&tokens, &[]), None);
        assert_eq!(ocr_confidence(&tokens, &[7]), None);
    }

    #[test]
    fn test_attribute_tokens_by_words() {
        let tokens = vec![
            token("Name:", 0.9),
            token("Asha", 0.8),
            token("VERMA,", 0.7),
            token("asha", 0.6),
        ];
        assert_eq!(attribute_tokens("ASHA VERMA", &tokens), vec![1, 2]);
        assert_eq!(attribute_tokens("Asha Asha", &tokens), vec![1, 3]);
        assert!(attribute_tokens("Ravi", &tokens).is_empty());
    }

    struct FixedRecognizer;

    #[async_trait]
    impl Recognizer for FixedRecognizer {
        async fn recognize(
            &self,
            _image: &PreprocessedImage,
        ) -> Result<RawRecognitionResult, RecognitionError> {
            Ok(RawRecognitionResult {
                text: "Roll 123456".to_string(),
                tokens: vec![token("Roll", 95.0), token("123456", 0.9)],
            })
        }
    }

    #[tokio::test]
    async fn test_recognize_page_sets_page_and_normalizes() {
        let service = RecognitionService::new(Arc::new(FixedRecognizer));
        let image = PreprocessedImage::passthrough(vec![0u8; 4]);
        let result = service.recognize_page(3, &image).await.unwrap();
        assert!(result.tokens.iter().all(|t| t.page == 3));
        assert!((result.tokens[0].confidence - 0.95).abs() < 1e-9);
        assert!(service.health_check().await);
    }
}
