//! 文字识别结果

use serde::{Deserialize, Serialize};

/// 识别框（像素坐标）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// 单个识别 token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedToken {
    pub text: String,
    /// 已归一化到 [0,1]
    pub confidence: f64,
    /// 内嵌文本没有坐标
    pub bbox: Option<BoundingBox>,
    /// 所在页码
    pub page: usize,
}

/// 单页的识别结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecognitionResult {
    pub text: String,
    pub tokens: Vec<RecognizedToken>,
}

impl RawRecognitionResult {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tokens.is_empty()
    }

    /// 由可信的内嵌文本生成识别结果，每个词一个 token
    pub fn from_embedded_text(text: &str, page: usize, confidence: f64) -> Self {
        let tokens = text
            .split_whitespace()
            .map(|word| RecognizedToken {
                text: word.to_string(),
                confidence,
                bbox: None,
                page,
            })
            .collect();
        Self {
            text: text.to_string(),
            tokens,
        }
    }
}

/// 多页识别结果合并后的全文与 token 表
///
/// token 下标在整份文档内唯一，结构化后端按这个下标归属 token。
#[derive(Debug, Clone, Default)]
pub struct DocumentText {
    pub text: String,
    pub tokens: Vec<RecognizedToken>,
}

impl DocumentText {
    /// 按页码顺序合并
    pub fn merge(pages: Vec<RawRecognitionResult>) -> Self {
        let mut texts = Vec::new();
        let mut tokens = Vec::new();
        for page in pages {
            if !page.text.trim().is_empty() {
                texts.push(page.text);
            }
            tokens.extend(page.tokens);
        }
        Self {
            text: texts.join("\n\n"),
            tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_embedded_text_splits_words() {
        let result = RawRecognitionResult::from_embedded_text("Roll No  123456\nPhysics", 2, 0.95);
        assert_eq!(result.tokens.len(), 4);
        assert_eq!(result.tokens[2].text, "123456");
        assert!(result.tokens.iter().all(|t| t.page == 2 && t.bbox.is_none()));
    }

    #[test]
    fn test_merge_skips_empty_pages() {
        let merged = DocumentText::merge(vec![
            RawRecognitionResult::from_embedded_text("page one", 0, 0.95),
            RawRecognitionResult::default(),
            RawRecognitionResult::from_embedded_text("page three", 2, 0.95),
        ]);
        assert_eq!(merged.text, "page one\n\npage three");
        assert_eq!(merged.tokens.len(), 4);
        assert_eq!(merged.tokens[3].page, 2);
    }
}
