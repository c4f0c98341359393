//! 送往识别后端的页面图像

use serde::Serialize;

/// 预处理步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreprocessStep {
    Grayscale,
    Contrast,
    Denoise,
    Deskew,
    Binarize,
}

/// 图像字节的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Png,
    /// 未经处理的原始字节
    Original,
}

/// 预处理后的页面图像
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    pub applied: Vec<PreprocessStep>,
    /// 降级但未中断的步骤说明
    pub warnings: Vec<String>,
}

impl PreprocessedImage {
    pub fn passthrough(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            encoding: ImageEncoding::Original,
            applied: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self.encoding {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Original => "application/octet-stream",
        }
    }
}
