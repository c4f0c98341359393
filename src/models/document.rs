//! 文档与页面

use serde::Serialize;
use std::path::Path;

/// 文档媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Png,
    Jpeg,
    Tiff,
}

impl MediaType {
    /// 根据文件扩展名判断媒体类型
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MediaType::Pdf),
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "tif" | "tiff" => Some(MediaType::Tiff),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Self::from_extension)
    }

    /// 是否为单页位图
    pub fn is_raster(&self) -> bool {
        !matches!(self, MediaType::Pdf)
    }
}

/// 待处理的文档
///
/// 内容在进入流水线之后不再修改。
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub bytes: Vec<u8>,
    pub media_type: MediaType,
    /// 声明的页数，位图固定为 1
    pub page_count: usize,
}

impl Document {
    pub fn new(id: impl Into<String>, media_type: MediaType, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
            media_type,
            page_count: 1,
        }
    }

    pub fn with_page_count(mut self, page_count: usize) -> Self {
        self.page_count = page_count;
        self
    }
}

/// 页面的处理路线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRoute {
    /// 页面自带可信文本，跳过识别
    EmbeddedText,
    /// 需要对页面图像做文字识别
    Recognition,
}

/// 路由之后的单个页面
#[derive(Debug, Clone)]
pub struct Page {
    /// 从 0 开始的页码
    pub index: usize,
    pub route: PageRoute,
    pub embedded_text: Option<String>,
    /// 编码后的页面图像（PNG/JPEG 等）
    pub image: Option<Vec<u8>>,
}

impl Page {
    pub fn embedded(index: usize, text: String) -> Self {
        Self {
            index,
            route: PageRoute::EmbeddedText,
            embedded_text: Some(text),
            image: None,
        }
    }

    pub fn raster(index: usize, image: Option<Vec<u8>>) -> Self {
        Self {
            index,
            route: PageRoute::Recognition,
            embedded_text: None,
            image,
        }
    }
}
