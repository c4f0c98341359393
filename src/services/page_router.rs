//! 页面路由 - 业务能力层
//!
//! 决定每一页走哪条路线：有足够内嵌文本的 PDF 页直接使用文本，
//! 其余页面（以及所有位图）交给文字识别。

use tracing::debug;

use crate::error::RoutingError;
use crate::infrastructure::pdf;
use crate::models::document::{Document, MediaType, Page};

/// 页面路由器
#[derive(Debug, Clone)]
pub struct PageRouter {
    /// 内嵌文本至少需要的非空白字符数
    min_text_chars: usize,
}

impl PageRouter {
    pub fn new(min_text_chars: usize) -> Self {
        Self { min_text_chars }
    }

    /// 把文档拆成按页码排序的页面列表
    pub fn route(&self, document: &Document) -> Result<Vec<Page>, RoutingError> {
        if document.bytes.is_empty() {
            return Err(RoutingError::EmptyDocument);
        }

        match document.media_type {
            MediaType::Pdf => self.route_pdf(document),
            _ => Ok(vec![Page::raster(0, Some(document.bytes.clone()))]),
        }
    }

    fn route_pdf(&self, document: &Document) -> Result<Vec<Page>, RoutingError> {
        let pages = pdf::read_pages(&document.bytes)?;
        if document.page_count != 0 && document.page_count != pages.len() {
            debug!(
                "声明页数 {} 与实际页数 {} 不一致，以实际为准",
                document.page_count,
                pages.len()
            );
        }

        Ok(pages
            .into_iter()
            .map(|page| {
                if self.has_usable_text(&page.text) {
                    Page::embedded(page.index, page.text)
                } else {
                    Page::raster(page.index, page.image)
                }
            })
            .collect())
    }

    /// 内嵌文本是否足够可信
    pub fn has_usable_text(&self, text: &str) -> bool {
        text.chars().filter(|c| !c.is_whitespace()).count() >= self.min_text_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pdf::test_support::{build_pdf, tiny_jpeg, TestPage};
    use crate::models::document::PageRoute;

    #[test]
    fn test_raster_is_single_recognition_page() {
        let doc = Document::new("scan.png", MediaType::Png, vec![1, 2, 3]);
        let pages = PageRouter::new(20).route(&doc).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].route, PageRoute::Recognition);
        assert_eq!(pages[0].image.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_pdf_pages_routed_by_text() {
        let pdf = build_pdf(&[
            TestPage::Text("Central Board of Secondary Education Statement of Marks"),
            TestPage::Jpeg(tiny_jpeg(180)),
            TestPage::Text("p. 3"),
        ]);
        let doc = Document::new("marks.pdf", MediaType::Pdf, pdf).with_page_count(3);
        let pages = PageRouter::new(20).route(&doc).unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].route, PageRoute::EmbeddedText);
        assert!(pages[0].embedded_text.as_deref().unwrap().contains("Statement of Marks"));
        assert_eq!(pages[1].route, PageRoute::Recognition);
        assert!(pages[1].image.is_some());
        // 文本太短，按识别处理；页面没有图像
        assert_eq!(pages[2].route, PageRoute::Recognition);
        assert!(pages[2].image.is_none());
        assert_eq!(pages.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let doc = Document::new("empty.pdf", MediaType::Pdf, Vec::new());
        assert!(matches!(
            PageRouter::new(20).route(&doc),
            Err(RoutingError::EmptyDocument)
        ));
    }
}
