use crate::infrastructure::pdf;
use crate::models::document::{Document, MediaType};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从文件加载单个文档
///
/// 媒体类型由扩展名决定；超过 `max_file_size` 的文件直接拒绝。
pub async fn load_document(path: &Path, max_file_size: u64) -> Result<Document> {
    let media_type = MediaType::from_path(path)
        .with_context(|| format!("不支持的文件类型: {}", path.display()))?;

    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("无法读取文件信息: {}", path.display()))?;
    if metadata.len() > max_file_size {
        anyhow::bail!(
            "文件过大: {} ({} 字节，上限 {} 字节)",
            path.display(),
            metadata.len(),
            max_file_size
        );
    }

    let bytes = fs::read(path)
        .await
        .with_context(|| format!("无法读取文件: {}", path.display()))?;
    if bytes.is_empty() {
        anyhow::bail!("文件为空: {}", path.display());
    }

    let id = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let page_count = match media_type {
        MediaType::Pdf => pdf::count_pages(&bytes).unwrap_or(0),
        _ => 1,
    };

    Ok(Document::new(id, media_type, bytes).with_page_count(page_count))
}

/// 从文件夹中加载所有可处理的文档，按文件名排序
pub async fn load_all_documents(folder_path: &str, max_file_size: u64) -> Result<Vec<Document>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if MediaType::from_path(&path).is_some() {
            paths.push(path);
        } else if path.is_file() {
            tracing::debug!("跳过不支持的文件: {}", path.display());
        }
    }
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        match load_document(&path, max_file_size).await {
            Ok(doc) => {
                tracing::info!("成功加载 {} 页", doc.page_count);
                documents.push(doc);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(documents)
}
