//! PDF 读取
//!
//! 只负责把 PDF 拆成逐页的内嵌文本和内嵌图像，路由决策在
//! `services::page_router` 中完成。

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::error::RoutingError;

/// 从 PDF 中读出的单页内容
#[derive(Debug, Clone)]
pub struct PdfPage {
    pub index: usize,
    pub text: String,
    /// 页面上第一张 JPEG 图像
    pub image: Option<Vec<u8>>,
}

fn load(bytes: &[u8]) -> Result<Document, RoutingError> {
    Document::load_mem(bytes).map_err(|e| RoutingError::PdfParse(e.to_string()))
}

/// 统计页数
pub fn count_pages(bytes: &[u8]) -> Result<usize, RoutingError> {
    Ok(load(bytes)?.get_pages().len())
}

/// 逐页读取文本和图像
pub fn read_pages(bytes: &[u8]) -> Result<Vec<PdfPage>, RoutingError> {
    let doc = load(bytes)?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(RoutingError::NoPages);
    }

    let mut out = Vec::with_capacity(pages.len());
    for (index, (page_number, page_id)) in pages.iter().enumerate() {
        let text = match doc.extract_text(&[*page_number]) {
            Ok(text) => text,
            Err(e) => {
                debug!("第 {} 页文本提取失败: {}", page_number, e);
                String::new()
            }
        };
        out.push(PdfPage {
            index,
            text,
            image: first_jpeg_image(&doc, *page_id),
        });
    }
    Ok(out)
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    doc.dereference(obj).ok().map(|(_, o)| o)
}

/// 查找页面资源字典，允许从父节点继承
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..16 {
        if let Ok(res) = node.get(b"Resources") {
            return resolve(doc, res)?.as_dict().ok();
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn has_filter(dict: &Dictionary, filter: &[u8]) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name.as_slice() == filter,
        Ok(Object::Array(items)) => items
            .iter()
            .any(|item| item.as_name().map(|n| n == filter).unwrap_or(false)),
        _ => false,
    }
}

fn first_jpeg_image(doc: &Document, page_id: ObjectId) -> Option<Vec<u8>> {
    let resources = page_resources(doc, page_id)?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?.as_dict().ok()?;

    for (_, obj) in xobjects.iter() {
        let Some(stream) = resolve(doc, obj).and_then(|o| o.as_stream().ok()) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(|s| s.as_name())
            .map(|n| n == b"Image")
            .unwrap_or(false);
        if is_image && has_filter(&stream.dict, b"DCTDecode") {
            return Some(stream.content.clone());
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::io::Cursor;

    /// 测试用的页面内容
    pub enum TestPage<'a> {
        Text(&'a str),
        Jpeg(Vec<u8>),
        Blank,
    }

    pub fn tiny_jpeg(shade: u8) -> Vec<u8> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([shade])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    /// 生成多页 PDF，每页可以是文本、JPEG 图像或空白
    pub fn build_pdf(pages: &[TestPage<'_>]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut page_ids = Vec::new();
        for page in pages {
            let (content, resources) = match page {
                TestPage::Text(text) => {
                    let content = format!(
                        "BT /F1 12 Tf 100 700 Td ({}) Tj ET",
                        text.replace('\\', "\\\\")
                            .replace('(', "\\(")
                            .replace(')', "\\)")
                    );
                    let resources = dictionary! {
                        "Font" => dictionary! { "F1" => font_id },
                    };
                    (content, resources)
                }
                TestPage::Jpeg(bytes) => {
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
                        bytes.clone(),
                    ));
                    let resources = dictionary! {
                        "XObject" => dictionary! { "Im1" => image_id },
                    };
                    ("q 100 0 0 100 0 0 cm /Im1 Do Q".to_string(), resources)
                }
                TestPage::Blank => (String::new(), dictionary! {}),
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let resources_id = doc.add_object(resources);
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
            "Count" => Object::Integer(pages.len() as i64),
        });
        for page_id in &page_ids {
            if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
                dict.set("Parent", pages_id);
            }
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}
