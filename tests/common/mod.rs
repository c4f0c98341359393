//! 集成测试共用的内存后端与文档构造工具

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use lopdf::{dictionary, Object, Stream};
use marksheet_extract::config::{PipelineConfig, PreprocessConfig};
use marksheet_extract::error::{RecognitionError, StructuringError};
use marksheet_extract::infrastructure::{RawField, StructuredFields, Structurer, StructuringRequest};
use marksheet_extract::models::{Document, MediaType, PreprocessedImage, RawRecognitionResult, RecognizedToken};
use marksheet_extract::{ExtractionFlow, Recognizer};
use serde_json::Value as JsonValue;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 触发识别失败的页面内容
pub const UNREADABLE: &str = "UNREADABLE";
/// 触发结构化失败的文本
pub const STRUCTURE_FAIL: &str = "STRUCTURE_FAIL";
/// 让结构化后端 panic 的文本
pub const PANIC: &str = "PANIC";

fn tokens_for(text: &str, page: usize) -> Vec<RecognizedToken> {
    text.split_whitespace()
        .map(|word| RecognizedToken {
            text: word.to_string(),
            confidence: 0.9,
            bbox: None,
            page,
        })
        .collect()
}

/// 把图像字节当作 UTF-8 文本“识别”
#[derive(Default)]
pub struct EchoRecognizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Recognizer for EchoRecognizer {
    async fn recognize(&self, image: &PreprocessedImage) -> Result<RawRecognitionResult, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(&image.bytes).to_string();
        if text.contains(UNREADABLE) {
            return Err(RecognitionError::UnreadableInput("blurred scan".to_string()));
        }
        Ok(RawRecognitionResult {
            tokens: tokens_for(&text, 0),
            text,
        })
    }
}

/// 按调用顺序返回预设文本，`None` 表示该次调用失败
pub struct ScriptedRecognizer {
    pages: Vec<Option<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(pages: Vec<Option<String>>) -> Self {
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, _image: &PreprocessedImage) -> Result<RawRecognitionResult, RecognitionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(n) {
            Some(Some(text)) => Ok(RawRecognitionResult {
                text: text.clone(),
                tokens: tokens_for(text, 0),
            }),
            _ => Err(RecognitionError::Unavailable {
                endpoint: "scripted".to_string(),
                message: format!("call {} failed", n),
            }),
        }
    }
}

/// 把 `path: value` 形式的行解析成字段
pub struct LineStructurer {
    delay: Duration,
    /// 前几次调用卡住直到超时
    hang_calls: usize,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl LineStructurer {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            hang_calls: 0,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn hanging_first(calls: usize) -> Self {
        Self {
            hang_calls: calls,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Structurer for LineStructurer {
    async fn structure(&self, request: &StructuringRequest<'_>) -> Result<StructuredFields, StructuringError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.hang_calls {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if request.text.contains(PANIC) {
            panic!("structurer crashed");
        }
        if request.text.contains(STRUCTURE_FAIL) {
            return Err(StructuringError::Backend("model overloaded".to_string()));
        }

        let mut fields = StructuredFields::new();
        for line in request.text.lines() {
            if let Some((path, value)) = line.split_once(": ") {
                fields.insert(
                    path.trim().to_string(),
                    RawField {
                        value: JsonValue::String(value.trim().to_string()),
                        confidence: 0.9,
                        tokens: Vec::new(),
                    },
                );
            }
        }
        Ok(fields)
    }

    fn model_id(&self) -> String {
        "line-structurer".to_string()
    }
}

/// 一份字段齐全的成绩单文本
pub fn marksheet_text(name: &str, roll_no: &str) -> String {
    [
        format!("candidate_details.name: {}", name),
        format!("candidate_details.roll_no: {}", roll_no),
        "subjects[0].subject: Physics".to_string(),
        "subjects[0].obtained_marks: 78".to_string(),
        "subjects[0].max_marks: 100".to_string(),
        "subjects[1].subject: Chemistry".to_string(),
        "subjects[1].obtained_marks: 85".to_string(),
        "subjects[1].max_marks: 100".to_string(),
        "overall_result.percentage: 81.5".to_string(),
    ]
    .join("\n")
}

/// 内容即“扫描文本”的位图文档
pub fn text_document(id: &str, text: &str) -> Document {
    Document::new(id, MediaType::Png, text.as_bytes().to_vec())
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        preprocess: PreprocessConfig::disabled(),
        structuring_timeout: Duration::from_millis(200),
        ..PipelineConfig::default()
    }
}

pub fn flow(recognizer: Arc<dyn Recognizer>, structurer: Arc<dyn Structurer>) -> Arc<ExtractionFlow> {
    Arc::new(ExtractionFlow::new(test_config(), recognizer, structurer).unwrap())
}

fn tiny_jpeg(shade: u8) -> Vec<u8> {
    let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([shade])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
    buf.into_inner()
}

/// 生成单页、每行一个文本对象的 PDF
pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content: String = lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("BT /F1 12 Tf 72 {} Td ({}) Tj ET\n", 720 - 16 * i, line))
        .collect();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    });
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::from(page_id)],
        "Count" => Object::Integer(1),
    });
    if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
        dict.set("Parent", pages_id);
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// 生成每页一张 JPEG、没有内嵌文本的 PDF
pub fn scanned_pdf(pages: usize) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.4");
    let mut page_ids = Vec::new();
    for i in 0..pages {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 8,
                "Height" => 8,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            tiny_jpeg(40 * i as u8),
        ));
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            b"q 100 0 0 100 0 0 cm /Im1 Do Q".to_vec(),
        ));
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im1" => image_id },
        });
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(pages as i64),
    });
    for &page_id in &page_ids {
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}
